//! Incremental framing of a CoT stream
//!
//! The TAK stream is a sequence of `<event>` elements with nothing between
//! them to mark boundaries. [`find_cot`] looks at the accumulated receive
//! buffer and cuts off the first complete element, if any. It does not
//! validate the XML inside the element; that is the decoder's job.

const EVENT_OPEN: &str = "<event";
const EVENT_CLOSE: &str = "</event>";

/// One complete event element cut from a receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// The matched element, verbatim
    pub event: &'a str,
    /// Everything after the element
    pub remainder: &'a str,
    /// Bytes of the buffer consumed, including any discarded leading text
    pub consumed: usize,
}

/// Finds the first complete `<event>` element in `buffer`.
///
/// Both `<event ...>...</event>` and the self-closing `<event .../>` forms
/// are recognized. The body of the open/close form ends at the first
/// `</event>`. Text before the element is discarded. Returns `None` when the
/// buffer holds no complete element yet, including when the first element's
/// open tag or body is still truncated.
pub fn find_cot(buffer: &str) -> Option<Frame<'_>> {
    let mut from = 0;

    loop {
        let start = from + buffer[from..].find(EVENT_OPEN)?;
        let name_end = start + EVENT_OPEN.len();

        // `<events>` or `<eventually` are not event elements
        match buffer[name_end..].chars().next() {
            None => return None,
            Some(c) if c == '>' || c == '/' || c.is_whitespace() => {}
            Some(_) => {
                from = name_end;
                continue;
            }
        }

        let tag_end = open_tag_end(buffer, name_end)?;
        let end = if buffer[..tag_end].ends_with('/') {
            tag_end + 1
        } else {
            let body = tag_end + 1;
            body + buffer[body..].find(EVENT_CLOSE)? + EVENT_CLOSE.len()
        };

        return Some(Frame {
            event: &buffer[start..end],
            remainder: &buffer[end..],
            consumed: end,
        });
    }
}

/// Index of the `>` closing the open tag, skipping quoted attribute values.
fn open_tag_end(buffer: &str, from: usize) -> Option<usize> {
    let mut quote = None;

    for (i, &b) in buffer.as_bytes()[from..].iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'>' => return Some(from + i),
                _ => {}
            },
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"<event version="2.0" uid="u-1" type="a-f-G" how="m-g"><point lat="1.0" lon="2.0"/><detail><contact callsign="ALPHA"/></detail></event>"#;

    /// Drains every frame the way the client's receive loop does.
    fn drain(buffer: &str) -> (Vec<String>, String) {
        let mut rest = buffer.to_string();
        let mut frames = Vec::new();
        while let Some(frame) = find_cot(&rest) {
            let event = frame.event.to_string();
            let consumed = frame.consumed;
            frames.push(event);
            rest.drain(..consumed);
        }
        (frames, rest)
    }

    #[test]
    fn test_empty_buffer() {
        assert_eq!(find_cot(""), None);
    }

    #[test]
    fn test_full_element() {
        let frame = find_cot(FULL).unwrap();
        assert_eq!(frame.event, FULL);
        assert_eq!(frame.remainder, "");
        assert_eq!(frame.consumed, FULL.len());
    }

    #[test]
    fn test_self_closing_element() {
        let frame = find_cot(r#"<event id="1"/>"#).unwrap();
        assert_eq!(frame.event, r#"<event id="1"/>"#);
        assert_eq!(frame.remainder, "");
    }

    #[test]
    fn test_self_closing_followed_by_full_element() {
        let buffer = format!(r#"<event type="t-x-c-t-r"/>{}"#, FULL);
        let (frames, rest) = drain(&buffer);
        assert_eq!(frames, vec![r#"<event type="t-x-c-t-r"/>"#.to_string(), FULL.to_string()]);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_leading_garbage_is_discarded() {
        let buffer = format!("\u{0}\r\n<?xml version=\"1.0\"?>junk{}", FULL);
        let frame = find_cot(&buffer).unwrap();
        assert_eq!(frame.event, FULL);
        assert_eq!(frame.consumed, buffer.len());
    }

    #[test]
    fn test_remainder_is_suffix() {
        let buffer = format!("xx{}<event uid=", FULL);
        let frame = find_cot(&buffer).unwrap();
        let tail = format!("{}{}", frame.event, frame.remainder);
        assert!(buffer.ends_with(&tail));
        assert_eq!(frame.remainder, "<event uid=");
    }

    #[test]
    fn test_concatenated_events_with_garbage() {
        let mut buffer = String::from("noise");
        for i in 0..25 {
            if i % 3 == 0 {
                buffer.push_str(&format!(r#"<event uid="s-{}" type="t-x-c-t-r"/>"#, i));
            } else {
                buffer.push_str(&format!(
                    r#"<event uid="e-{}" type="a-f-G"><point lat="0" lon="0"/></event>"#,
                    i
                ));
            }
        }

        let (frames, rest) = drain(&buffer);
        assert_eq!(frames.len(), 25);
        assert!(frames[0].contains(r#"uid="s-0""#));
        assert!(frames[23].contains(r#"uid="e-23""#));
        assert!(frames[24].contains(r#"uid="s-24""#));
        assert!(rest.is_empty());
    }

    #[test]
    fn test_every_proper_prefix_yields_nothing() {
        for cut in 0..FULL.len() {
            assert_eq!(find_cot(&FULL[..cut]), None, "prefix of length {cut}");
        }
        let closing = r#"<event id="1"/>"#;
        for cut in 0..closing.len() {
            assert_eq!(find_cot(&closing[..cut]), None, "prefix of length {cut}");
        }
    }

    #[test]
    fn test_gt_inside_attribute_value() {
        let buffer = r#"<event uid="a>b" type="a-f-G"/>"#;
        let frame = find_cot(buffer).unwrap();
        assert_eq!(frame.event, buffer);
    }

    #[test]
    fn test_other_tags_starting_with_event() {
        let buffer = r#"<events><eventually/><event uid="x"/>"#;
        let frame = find_cot(buffer).unwrap();
        assert_eq!(frame.event, r#"<event uid="x"/>"#);
    }

    #[test]
    fn test_incomplete_first_element_waits() {
        let buffer = r#"<event uid="a" type="a-f-G"><point lat="0" lon="0"/>"#;
        assert_eq!(find_cot(buffer), None);
    }

    #[test]
    fn test_no_validation_inside_element() {
        let buffer = "<event>not <xml at all</event>tail";
        let frame = find_cot(buffer).unwrap();
        assert_eq!(frame.event, "<event>not <xml at all</event>");
        assert_eq!(frame.remainder, "tail");
    }

    #[test]
    fn test_multibyte_text_around_frames() {
        let buffer = "ü<event uid=\"ß\"/>é";
        let frame = find_cot(buffer).unwrap();
        assert_eq!(frame.event, "<event uid=\"ß\"/>");
        assert_eq!(frame.remainder, "é");
    }
}
