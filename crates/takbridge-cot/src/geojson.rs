//! GeoJSON view of CoT events

use crate::event::Event;
use serde_json::{json, Map, Value};

/// Converts an event to a GeoJSON Feature.
///
/// The geometry is a `Point` of `[lon, lat, hae]`, or `null` for events
/// without a point. Event attributes and the parsed detail children become
/// feature properties.
pub fn to_geojson(event: &Event) -> Value {
    let mut properties = Map::new();
    properties.insert("type".into(), json!(event.event_type));
    properties.insert("how".into(), json!(event.how));
    for (name, value) in [("time", event.time), ("start", event.start), ("stale", event.stale)] {
        if let Some(value) = value {
            properties.insert(name.into(), json!(value.to_rfc3339()));
        }
    }

    if let Some(ref detail) = event.detail {
        if let Some(callsign) = event.callsign() {
            properties.insert("callsign".into(), json!(callsign));
        }
        if let Some(ref group) = detail.group {
            properties.insert("group".into(), json!({ "name": group.name, "role": group.role }));
        }
        if let Some(ref track) = detail.track {
            if let Some(speed) = track.speed {
                properties.insert("speed".into(), json!(speed));
            }
            if let Some(course) = track.course {
                properties.insert("course".into(), json!(course));
            }
        }
        if let Some(ref remarks) = detail.remarks {
            properties.insert("remarks".into(), json!(remarks));
        }
    }

    let geometry = match event.point {
        Some(point) => {
            properties.insert("ce".into(), json!(point.ce));
            properties.insert("le".into(), json!(point.le));
            json!({
                "type": "Point",
                "coordinates": [point.lon, point.lat, point.hae],
            })
        }
        None => Value::Null,
    };

    json!({
        "id": event.uid,
        "type": "Feature",
        "properties": properties,
        "geometry": geometry,
    })
}
