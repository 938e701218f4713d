//! Decoding of single CoT event elements

use crate::event::{Contact, Detail, Event, Group, Point, Track, UNKNOWN_ACCURACY};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("XML parsing error: {0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid datetime format: {0}")]
    InvalidDateTime(String),

    #[error("Invalid number format: {0}")]
    InvalidNumber(String),

    #[error("Invalid event structure: {0}")]
    InvalidStructure(String),
}

/// Decodes one `<event>` element.
///
/// Only the `type` attribute is required. The input is kept verbatim in
/// [`Event::raw`].
pub fn decode(xml: &str) -> Result<Event, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event()? {
            XmlEvent::Start(e) if e.name().as_ref() == b"event" => {
                let mut event = event_from_attributes(&e)?;
                read_event_body(&mut reader, xml, &mut event)?;
                event.raw = xml.to_string();
                return Ok(event);
            }
            XmlEvent::Empty(e) if e.name().as_ref() == b"event" => {
                let mut event = event_from_attributes(&e)?;
                event.raw = xml.to_string();
                return Ok(event);
            }
            XmlEvent::Start(e) | XmlEvent::Empty(e) => {
                return Err(ParseError::InvalidStructure(format!(
                    "root element is <{}>, expected <event>",
                    String::from_utf8_lossy(e.name().as_ref())
                )));
            }
            XmlEvent::Eof => {
                return Err(ParseError::InvalidStructure("no <event> element".into()));
            }
            // Declaration, comments, processing instructions
            _ => {}
        }
    }
}

fn event_from_attributes(e: &BytesStart) -> Result<Event, ParseError> {
    let mut version = None;
    let mut uid = String::new();
    let mut event_type = None;
    let mut how = String::new();
    let mut time = None;
    let mut start = None;
    let mut stale = None;

    for attr in e.attributes() {
        let attr = attr.map_err(|e| ParseError::XmlError(quick_xml::Error::InvalidAttr(e)))?;
        let value = String::from_utf8_lossy(attr.value.as_ref());
        match attr.key.as_ref() {
            b"version" => version = Some(value.into_owned()),
            b"uid" => uid = value.into_owned(),
            b"type" => event_type = Some(value.into_owned()),
            b"how" => how = value.into_owned(),
            b"time" => time = Some(parse_datetime(&value)?),
            b"start" => start = Some(parse_datetime(&value)?),
            b"stale" => stale = Some(parse_datetime(&value)?),
            _ => {}
        }
    }

    Ok(Event {
        version,
        uid,
        event_type: event_type.ok_or_else(|| ParseError::MissingField("type".into()))?,
        how,
        time,
        start,
        stale,
        point: None,
        detail: None,
        raw: String::new(),
    })
}

fn read_event_body(
    reader: &mut Reader<&[u8]>,
    source: &str,
    event: &mut Event,
) -> Result<(), ParseError> {
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            XmlEvent::Start(e) => match e.name().as_ref() {
                b"detail" if depth == 0 => {
                    event.detail = Some(parse_detail(reader, source)?);
                }
                name => {
                    if name == b"point" && depth == 0 {
                        event.point = Some(parse_point(&e)?);
                    }
                    depth += 1;
                }
            },
            XmlEvent::Empty(e) if depth == 0 => match e.name().as_ref() {
                b"point" => event.point = Some(parse_point(&e)?),
                b"detail" => event.detail = Some(Detail::default()),
                _ => {}
            },
            XmlEvent::End(_) => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            XmlEvent::Eof => {
                return Err(ParseError::InvalidStructure("unterminated <event>".into()));
            }
            _ => {}
        }
    }
}

fn parse_point(e: &BytesStart) -> Result<Point, ParseError> {
    let mut lat = None;
    let mut lon = None;
    let mut hae = None;
    let mut ce = None;
    let mut le = None;

    for attr in e.attributes() {
        let attr = attr.map_err(|e| ParseError::XmlError(quick_xml::Error::InvalidAttr(e)))?;
        let value = String::from_utf8_lossy(attr.value.as_ref());
        match attr.key.as_ref() {
            b"lat" => lat = Some(parse_f64(&value)?),
            b"lon" => lon = Some(parse_f64(&value)?),
            b"hae" => hae = Some(parse_f64(&value)?),
            b"ce" => ce = Some(parse_f64(&value)?),
            b"le" => le = Some(parse_f64(&value)?),
            _ => {}
        }
    }

    Ok(Point {
        lat: lat.ok_or_else(|| ParseError::MissingField("lat".into()))?,
        lon: lon.ok_or_else(|| ParseError::MissingField("lon".into()))?,
        hae: hae.unwrap_or(0.0),
        ce: ce.unwrap_or(UNKNOWN_ACCURACY),
        le: le.unwrap_or(UNKNOWN_ACCURACY),
    })
}

/// Parses the children of `<detail>`; the reader is positioned just after
/// the open tag and is left just after `</detail>`.
fn parse_detail(reader: &mut Reader<&[u8]>, source: &str) -> Result<Detail, ParseError> {
    let inner_start = reader.buffer_position() as usize;
    let mut detail = Detail::default();
    let mut path: Vec<Vec<u8>> = Vec::new();

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event()? {
            XmlEvent::Start(e) => {
                detail_element(&e, &path, &mut detail)?;
                path.push(e.name().as_ref().to_vec());
            }
            XmlEvent::Empty(e) => detail_element(&e, &path, &mut detail)?,
            XmlEvent::Text(t) if is_remarks(&path) => {
                let text = String::from_utf8_lossy(&t).into_owned();
                let text = quick_xml::escape::unescape(&text)
                    .map(|s| s.into_owned())
                    .unwrap_or(text);
                append_remarks(&mut detail, &text);
            }
            XmlEvent::CData(c) if is_remarks(&path) => {
                append_remarks(&mut detail, &String::from_utf8_lossy(&c));
            }
            XmlEvent::End(_) => {
                if path.pop().is_none() {
                    detail.xml = source
                        .get(inner_start..before)
                        .unwrap_or_default()
                        .trim()
                        .to_string();
                    return Ok(detail);
                }
            }
            XmlEvent::Eof => {
                return Err(ParseError::InvalidStructure("unterminated <detail>".into()));
            }
            _ => {}
        }
    }
}

fn is_remarks(path: &[Vec<u8>]) -> bool {
    path.len() == 1 && path[0] == b"remarks"
}

fn append_remarks(detail: &mut Detail, text: &str) {
    detail.remarks.get_or_insert_with(String::new).push_str(text);
}

fn detail_element(e: &BytesStart, path: &[Vec<u8>], detail: &mut Detail) -> Result<(), ParseError> {
    let name = e.name();
    match (path, name.as_ref()) {
        ([], b"contact") => {
            detail.contact = Some(Contact {
                callsign: attribute(e, b"callsign")?,
                endpoint: attribute(e, b"endpoint")?,
            });
        }
        ([], b"__group") => {
            detail.group = Some(Group {
                name: attribute(e, b"name")?,
                role: attribute(e, b"role")?,
            });
        }
        ([], b"track") => {
            detail.track = Some(Track {
                speed: attribute(e, b"speed")?.map(|s| parse_f64(&s)).transpose()?,
                course: attribute(e, b"course")?.map(|s| parse_f64(&s)).transpose()?,
            });
        }
        ([], b"remarks") => {
            detail.remarks.get_or_insert_with(String::new);
        }
        ([parent], b"TakServerVersionInfo") if parent.as_slice() == b"TakControl" => {
            detail.server_version = attribute(e, b"serverVersion")?;
        }
        _ => {}
    }
    Ok(())
}

fn attribute(e: &BytesStart, key: &[u8]) -> Result<Option<String>, ParseError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| ParseError::XmlError(quick_xml::Error::InvalidAttr(e)))?;
        if attr.key.as_ref() == key {
            return Ok(Some(String::from_utf8_lossy(attr.value.as_ref()).into_owned()));
        }
    }
    Ok(None)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, ParseError> {
    s.parse::<DateTime<Utc>>()
        .map_err(|_| ParseError::InvalidDateTime(s.to_string()))
}

fn parse_f64(s: &str) -> Result<f64, ParseError> {
    s.trim()
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidNumber(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const POSITION: &str = r#"<event version="2.0" uid="ANDROID-1234" type="a-f-G-U-C" time="2024-01-15T10:30:00Z" start="2024-01-15T10:30:00Z" stale="2024-01-15T10:35:00Z" how="m-g"><point lat="37.7749" lon="-122.4194" hae="100.0" ce="10.0" le="5.0"/><detail><contact callsign="ALPHA-1" endpoint="*:-1:stcp"/><__group name="Cyan" role="Team Member"/><track speed="3.5" course="271.0"/><remarks>moving &amp; observing</remarks><usericon iconsetpath="COT_MAPPING_2525B/a-f/a-f-G"/></detail></event>"#;

    #[test]
    fn test_decode_position_report() {
        let event = decode(POSITION).unwrap();
        assert_eq!(event.version.as_deref(), Some("2.0"));
        assert_eq!(event.uid, "ANDROID-1234");
        assert_eq!(event.event_type, "a-f-G-U-C");
        assert_eq!(event.how, "m-g");
        assert!(event.time.is_some());
        assert!(event.stale > event.start);
        assert_eq!(event.raw, POSITION);

        let point = event.point.unwrap();
        assert_eq!(point.lat, 37.7749);
        assert_eq!(point.lon, -122.4194);
        assert_eq!(point.ce, 10.0);

        let detail = event.detail.as_ref().unwrap();
        assert_eq!(event.callsign(), Some("ALPHA-1"));
        assert_eq!(detail.group.as_ref().unwrap().name.as_deref(), Some("Cyan"));
        assert_eq!(detail.track.unwrap().course, Some(271.0));
        assert_eq!(detail.remarks.as_deref(), Some("moving & observing"));
        assert!(detail.xml.starts_with("<contact"));
        assert!(detail.xml.ends_with("a-f-G\"/>"));
    }

    #[test]
    fn test_decode_self_closing_handshake() {
        let event = decode(r#"<event type="t-x-c-t-r"/>"#).unwrap();
        assert_eq!(event.event_type, "t-x-c-t-r");
        assert!(event.uid.is_empty());
        assert!(event.point.is_none());
        assert!(event.detail.is_none());
    }

    #[test]
    fn test_decode_server_version_banner() {
        let xml = r#"<event version="2.0" uid="TakServerVersion" type="t-x-takp-v" how="h-g-i-g-o"><point lat="0.0" lon="0.0" hae="0.0" ce="999999" le="999999"/><detail><TakControl><TakProtocolSupport version="1"/><TakServerVersionInfo serverVersion="5.2-RELEASE-16-HEAD" apiVersion="3"/></TakControl></detail></event>"#;
        let event = decode(xml).unwrap();
        assert_eq!(event.server_version(), Some("5.2-RELEASE-16-HEAD"));
    }

    #[test]
    fn test_nested_version_info_is_ignored_outside_takcontrol() {
        let xml = r#"<event type="b-t-f"><detail><TakServerVersionInfo serverVersion="x"/></detail></event>"#;
        let event = decode(xml).unwrap();
        assert_eq!(event.server_version(), None);
    }

    #[test]
    fn test_missing_type() {
        let result = decode(r#"<event version="2.0">invalid</event>"#);
        assert!(matches!(result, Err(ParseError::MissingField(ref f)) if f == "type"));
    }

    #[test]
    fn test_wrong_root() {
        assert!(matches!(
            decode(r#"<message type="a-f-G"/>"#),
            Err(ParseError::InvalidStructure(_))
        ));
        assert!(matches!(decode(""), Err(ParseError::InvalidStructure(_))));
    }

    #[test]
    fn test_invalid_point() {
        let xml = r#"<event type="a-f-G"><point lat="north" lon="0"/></event>"#;
        assert!(matches!(decode(xml), Err(ParseError::InvalidNumber(_))));

        let xml = r#"<event type="a-f-G"><point lon="0"/></event>"#;
        assert!(matches!(decode(xml), Err(ParseError::MissingField(_))));
    }

    #[test]
    fn test_invalid_time() {
        let xml = r#"<event type="a-f-G" time="yesterday"/>"#;
        assert!(matches!(decode(xml), Err(ParseError::InvalidDateTime(_))));
    }

    #[test]
    fn test_unterminated_event() {
        let xml = r#"<event type="a-f-G"><point lat="0" lon="0"/>"#;
        assert!(decode(xml).is_err());
    }

    #[test]
    fn test_prologue_is_skipped() {
        let xml = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<event type=\"a-h-G\" uid=\"h1\"><point lat=\"1\" lon=\"2\"/></event>";
        let event = decode(xml).unwrap();
        assert_eq!(event.uid, "h1");
        assert!(event.point.is_some());
    }
}
