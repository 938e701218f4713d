//! Streaming CoT (Cursor on Target) framing and codec for TAK connections
//!
//! A TAK server streams back-to-back `<event>` elements over a single TLS
//! socket with no length prefix or delimiter. This crate provides:
//!
//! - [`scanner`]: pulls one complete `<event>` element at a time out of an
//!   accumulating receive buffer, tolerating leading garbage and self-closing
//!   elements
//! - [`parser`]: decodes an element into an [`Event`], keeping the raw text
//! - [`serializer`]: encodes an [`Event`] for the wire and builds the
//!   keep-alive ping
//! - [`geojson`]: GeoJSON Feature view of an event for WebSocket subscribers
//!
//! # Example
//!
//! ```rust
//! use takbridge_cot::{decode, find_cot};
//!
//! let buffer = r#"garbage<event version="2.0" uid="u-1" type="a-f-G" how="m-g"><point lat="1.5" lon="2.5"/></event><event"#;
//!
//! let frame = find_cot(buffer).expect("one complete frame");
//! assert_eq!(frame.remainder, "<event");
//!
//! let event = decode(frame.event).expect("valid CoT");
//! assert!(event.is_atom());
//! assert_eq!(event.raw, frame.event);
//! ```

pub mod event;
pub mod geojson;
pub mod parser;
pub mod scanner;
pub mod serializer;

pub use event::{Contact, Detail, Event, Group, Point, Track};
pub use geojson::to_geojson;
pub use parser::{decode, ParseError};
pub use scanner::{find_cot, Frame};
pub use serializer::{encode, ping};

/// CoT type the server sends to acknowledge the client handshake
pub const HANDSHAKE_ACK_TYPE: &str = "t-x-c-t-r";

/// CoT type of the server version banner
pub const VERSION_BANNER_TYPE: &str = "t-x-takp-v";

/// CoT type of the keep-alive ping written by clients
pub const PING_TYPE: &str = "t-x-c-t";
