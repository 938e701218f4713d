//! XML serialization for CoT messages

use crate::event::{Event, Point, UNKNOWN_ACCURACY};
use crate::PING_TYPE;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use quick_xml::escape::escape;
use std::fmt::Write;

/// Lifetime of a ping before it goes stale
const PING_STALE_SECS: i64 = 20;

/// Serializes an event to wire XML, prologue included.
///
/// The detail section is written from [`crate::Detail::xml`] verbatim.
pub fn encode(event: &Event) -> String {
    let mut xml = String::with_capacity(256 + event.detail.as_ref().map_or(0, |d| d.xml.len()));

    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');

    xml.push_str("<event");
    if let Some(ref version) = event.version {
        push_attr(&mut xml, "version", version);
    }
    push_attr(&mut xml, "uid", &event.uid);
    push_attr(&mut xml, "type", &event.event_type);
    if !event.how.is_empty() {
        push_attr(&mut xml, "how", &event.how);
    }
    for (name, value) in [("time", event.time), ("start", event.start), ("stale", event.stale)] {
        if let Some(value) = value {
            push_attr(&mut xml, name, &format_time(&value));
        }
    }

    if event.point.is_none() && event.detail.is_none() {
        xml.push_str("/>");
        return xml;
    }
    xml.push('>');

    if let Some(ref point) = event.point {
        push_point(&mut xml, point);
    }

    if let Some(ref detail) = event.detail {
        if detail.xml.is_empty() {
            xml.push_str("<detail/>");
        } else {
            xml.push_str("<detail>");
            xml.push_str(&detail.xml);
            xml.push_str("</detail>");
        }
    }

    xml.push_str("</event>");
    xml
}

/// Builds the keep-alive ping a client writes to the server.
pub fn ping() -> Event {
    let now = Utc::now();
    Event {
        version: Some("2.0".to_string()),
        uid: "takPing".to_string(),
        event_type: PING_TYPE.to_string(),
        how: "h-g-i-g-o".to_string(),
        time: Some(now),
        start: Some(now),
        stale: Some(now + Duration::seconds(PING_STALE_SECS)),
        point: Some(Point {
            lat: 0.0,
            lon: 0.0,
            hae: 0.0,
            ce: UNKNOWN_ACCURACY,
            le: UNKNOWN_ACCURACY,
        }),
        detail: None,
        raw: String::new(),
    }
}

fn push_attr(xml: &mut String, name: &str, value: &str) {
    let _ = write!(xml, r#" {}="{}""#, name, escape(value));
}

fn push_point(xml: &mut String, point: &Point) {
    let _ = write!(
        xml,
        r#"<point lat="{}" lon="{}" hae="{}" ce="{}" le="{}"/>"#,
        point.lat, point.lon, point.hae, point.ce, point.le
    );
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::decode;

    #[test]
    fn test_encode_has_prologue() {
        let xml = encode(&Event::new("a-f-G", "u-1"));
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.ends_with(r#"<event version="2.0" uid="u-1" type="a-f-G"/>"#));
    }

    #[test]
    fn test_encode_escapes_attributes() {
        let xml = encode(&Event::new("a-f-G", r#"a"b<c"#));
        assert!(xml.contains(r#"uid="a&quot;b&lt;c""#));
    }

    #[test]
    fn test_ping_shape() {
        let ping = ping();
        assert_eq!(ping.event_type, "t-x-c-t");
        assert_eq!(ping.uid, "takPing");
        assert!(ping.stale > ping.time);
        assert!(!ping.is_atom());

        let xml = encode(&ping);
        assert!(xml.contains(r#"type="t-x-c-t""#));
        assert!(xml.contains("<point "));
        assert!(xml.contains(r#"time=""#));
        assert!(xml.ends_with("</event>"));
    }

    #[test]
    fn test_detail_is_written_verbatim() {
        let source = r#"<event version="2.0" uid="m-1" type="b-m-p-s-p-i" how="h-g-i-g-o" time="2024-01-15T10:30:00Z"><point lat="1" lon="2"/><detail><contact callsign="MARKER"/><color argb="-1"/><archive/></detail></event>"#;
        let event = decode(source).unwrap();
        let xml = encode(&event);

        assert!(xml.contains(r#"<detail><contact callsign="MARKER"/><color argb="-1"/><archive/></detail>"#));
        assert!(xml.contains(r#"time="2024-01-15T10:30:00.000Z""#));

        let body = xml.split_once('\n').unwrap().1;
        let again = decode(body).unwrap();
        assert_eq!(again.detail, event.detail);
        assert_eq!(again.point, event.point);
        assert_eq!(again.time, event.time);
    }
}
