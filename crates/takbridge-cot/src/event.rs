//! CoT Event structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A decoded CoT event.
///
/// Streamed events are not all full position reports: handshake replies and
/// version banners carry little more than a type. Everything except the type
/// is therefore optional, and the element text as received is kept in
/// [`Event::raw`] so it can be relayed without re-serialising.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// CoT version (typically "2.0")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Unique identifier for this event
    #[serde(default)]
    pub uid: String,
    /// CoT type (e.g., "a-f-G" for atom-friendly-ground)
    #[serde(rename = "type")]
    pub event_type: String,
    /// How the event was generated (e.g., "h-e" for human-entered)
    #[serde(default)]
    pub how: String,
    /// Event timestamp
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    /// Event start time
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Event stale time (when the event becomes invalid)
    #[serde(default)]
    pub stale: Option<DateTime<Utc>>,
    /// Geographic location and accuracy
    #[serde(default)]
    pub point: Option<Point>,
    /// Detail section
    #[serde(default)]
    pub detail: Option<Detail>,
    /// Element text as received; empty for locally built events
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw: String,
}

impl Event {
    /// Creates an event with only a type and uid.
    pub fn new(event_type: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            version: Some("2.0".to_string()),
            uid: uid.into(),
            event_type: event_type.into(),
            how: String::new(),
            time: None,
            start: None,
            stale: None,
            point: None,
            detail: None,
            raw: String::new(),
        }
    }

    /// True for atoms (`a-...`), the events that describe things on the map.
    pub fn is_atom(&self) -> bool {
        self.event_type.split('-').next() == Some("a")
    }

    /// Callsign from `detail/contact`, if any.
    pub fn callsign(&self) -> Option<&str> {
        self.detail
            .as_ref()
            .and_then(|d| d.contact.as_ref())
            .and_then(|c| c.callsign.as_deref())
    }

    /// Server version from `detail/TakControl/TakServerVersionInfo`.
    pub fn server_version(&self) -> Option<&str> {
        self.detail.as_ref().and_then(|d| d.server_version.as_deref())
    }
}

/// Geographic point with accuracy metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Latitude in decimal degrees (-90 to 90)
    pub lat: f64,
    /// Longitude in decimal degrees (-180 to 180)
    pub lon: f64,
    /// Height above ellipsoid in meters
    pub hae: f64,
    /// Circular error in meters
    pub ce: f64,
    /// Linear error in meters
    pub le: f64,
}

/// Value CoT uses for unknown hae/ce/le
pub const UNKNOWN_ACCURACY: f64 = 9999999.0;

impl Point {
    pub fn new(lat: f64, lon: f64, hae: f64) -> Self {
        Self {
            lat,
            lon,
            hae,
            ce: UNKNOWN_ACCURACY,
            le: UNKNOWN_ACCURACY,
        }
    }
}

/// Detail section.
///
/// A handful of well-known children are parsed; `xml` always holds the
/// complete inner XML so nothing is lost on re-encoding.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Detail {
    /// Inner XML of the `<detail>` element, verbatim
    pub xml: String,
    pub contact: Option<Contact>,
    pub group: Option<Group>,
    pub track: Option<Track>,
    pub remarks: Option<String>,
    /// `TakControl/TakServerVersionInfo@serverVersion`
    pub server_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Contact {
    pub callsign: Option<String>,
    pub endpoint: Option<String>,
}

/// `__group` team membership
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Group {
    pub name: Option<String>,
    pub role: Option<String>,
}

/// Track information for moving entities
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Track {
    /// Speed in meters per second
    pub speed: Option<f64>,
    /// Course in degrees (0-360)
    pub course: Option<f64>,
}
