//! Inbound byte handling: UTF-8 reassembly, framing and classification.

use crate::client::ClientEvent;
use crate::state::ClientState;
use takbridge_core::ConnectionId;
use takbridge_cot::{decode, find_cot, HANDSHAKE_ACK_TYPE, VERSION_BANNER_TYPE};
use tracing::{debug, warn};

/// Accumulates socket bytes as text and yields complete `<event>` frames.
///
/// A multi-byte character split across two reads is held back until the
/// rest of it arrives.
#[derive(Debug)]
pub(crate) struct ReceiveBuffer {
    text: String,
    partial: Vec<u8>,
    limit: usize,
}

impl ReceiveBuffer {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            partial: Vec::new(),
            limit,
        }
    }

    /// Appends raw bytes from the socket.
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        let joined;
        let mut input: &[u8] = if self.partial.is_empty() {
            bytes
        } else {
            self.partial.extend_from_slice(bytes);
            joined = std::mem::take(&mut self.partial);
            &joined
        };

        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    return;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    self.text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[bad..];
                        }
                        None => {
                            self.partial.extend_from_slice(rest);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Removes and returns the next complete event, if the buffer holds one.
    pub(crate) fn next_frame(&mut self) -> Option<String> {
        let (start, consumed) = {
            let frame = find_cot(&self.text)?;
            (frame.consumed - frame.event.len(), frame.consumed)
        };
        let event = self.text[start..consumed].to_string();
        self.text.drain(..consumed);
        Some(event)
    }

    /// Bytes buffered without yet forming a complete event.
    pub(crate) fn len(&self) -> usize {
        self.text.len() + self.partial.len()
    }

    pub(crate) fn is_overflowing(&self) -> bool {
        self.len() > self.limit
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit
    }
}

/// Decodes one frame and decides what, if anything, the owner sees.
///
/// Frames that fail to decode are logged and dropped; the session goes on.
pub(crate) fn process_frame(
    frame: &str,
    state: &ClientState,
    session: u64,
    id: ConnectionId,
) -> Option<ClientEvent> {
    let event = match decode(frame) {
        Ok(event) => event,
        Err(e) => {
            state.metrics().record_decode_error();
            warn!(connection_id = %id, error = %e, raw = frame, "Dropping undecodable CoT frame");
            return None;
        }
    };
    state.metrics().record_event();

    match event.event_type.as_str() {
        HANDSHAKE_ACK_TYPE => {
            if !state.is_open() {
                debug!(connection_id = %id, "Handshake acknowledged");
            }
            state.mark_open(session);
            Some(ClientEvent::Ping)
        }
        VERSION_BANNER_TYPE => {
            match event.server_version() {
                Some(version) => {
                    debug!(connection_id = %id, version, "Server version banner");
                    state.set_server_version(version);
                }
                None => {
                    warn!(connection_id = %id, raw = frame, "Version banner without serverVersion");
                }
            }
            None
        }
        _ => Some(ClientEvent::Cot(event)),
    }
}
