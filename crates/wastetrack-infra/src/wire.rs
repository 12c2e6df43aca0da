//! Wire formats for queue bodies and raw objects
//!
//! - telemetry batch body: JSON objects joined by commas
//! - raw object: JSON objects separated by newlines and/or commas (both the
//!   delivery-stream and the queue writer produce these)
//! - geocode batch body: JSON array of `{postcode, lon, lat}`

use serde_json::Value;
use wastetrack_types::{Error, GeoCode, Result, TelemetryEvent};

/// A raw record that could not be read as a telemetry event
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub value: Value,
    pub reason: String,
}

/// Telemetry batch body: comma-joined JSON objects
pub fn encode_telemetry_batch(events: &[TelemetryEvent]) -> Result<String> {
    let parts = events
        .iter()
        .map(serde_json::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(parts.join(","))
}

/// Newline-terminated JSON objects, as the live delivery stream writes them
pub fn encode_json_lines(events: &[TelemetryEvent]) -> Result<String> {
    let mut out = String::new();
    for event in events {
        out.push_str(&serde_json::to_string(event)?);
        out.push('\n');
    }
    Ok(out)
}

/// Split a sequence of JSON values separated by whitespace and/or commas.
/// A top-level array contributes its elements.
///
/// A fragment that is not valid JSON is rejected on its own and reading
/// resumes at the next record boundary, so one broken record never hides
/// the records around it.
pub fn split_json_values(text: &str) -> Vec<std::result::Result<Value, RejectedRecord>> {
    let mut values = Vec::new();
    let mut rest = text;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }
        let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Array(items))) => values.extend(items.into_iter().map(Ok)),
            Some(Ok(value)) => values.push(Ok(value)),
            Some(Err(e)) => {
                let end = fragment_end(rest);
                values.push(Err(RejectedRecord {
                    value: Value::String(rest[..end].trim_end().to_string()),
                    reason: format!("malformed JSON: {e}"),
                }));
                rest = &rest[end..];
                continue;
            }
            None => break,
        }
        rest = &rest[stream.byte_offset()..];
    }
    values
}

/// End of a malformed fragment: the next newline, or a `,` followed by `{`
/// outside any array. Inside an object a comma is always followed by a key,
/// so `,{` there can only start the next record.
fn fragment_end(text: &str) -> usize {
    let mut in_string = false;
    let mut escaped = false;
    let mut brackets = 0usize;
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            return i;
        }
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' => brackets += 1,
            b']' => brackets = brackets.saturating_sub(1),
            b',' if brackets == 0 && text[i + 1..].trim_start().starts_with('{') => return i,
            _ => {}
        }
    }
    text.len()
}

/// Read a raw object into events, keeping unreadable records aside
pub fn decode_telemetry_records(text: &str) -> Vec<std::result::Result<TelemetryEvent, RejectedRecord>> {
    split_json_values(text)
        .into_iter()
        .map(|record| {
            let value = record?;
            serde_json::from_value::<TelemetryEvent>(value.clone()).map_err(|e| RejectedRecord {
                value,
                reason: e.to_string(),
            })
        })
        .collect()
}

pub fn encode_geocode_batch(codes: &[GeoCode]) -> Result<String> {
    Ok(serde_json::to_string(codes)?)
}

/// Parse a geocode batch body. Single-quoted bodies (a Python list repr) are
/// accepted too.
pub fn decode_geocode_batch(body: &str) -> Result<Vec<GeoCode>> {
    match serde_json::from_str(body) {
        Ok(codes) => Ok(codes),
        Err(first) if body.contains('\'') => serde_json::from_str(&body.replace('\'', "\""))
            .map_err(|_| Error::InvalidRecord(format!("invalid geocode batch: {first}"))),
        Err(e) => Err(Error::InvalidRecord(format!("invalid geocode batch: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, load: f64) -> TelemetryEvent {
        TelemetryEvent {
            timestamp: 1_546_214_460_000,
            truck_id: id.into(),
            lat: 55.86,
            lon: -4.25,
            load,
        }
    }

    #[test]
    fn test_batch_body_is_comma_joined() {
        let body = encode_telemetry_batch(&[event("gla0001", 1.5), event("gla0002", 2.0)]).unwrap();
        assert!(body.starts_with('{'));
        assert!(body.ends_with('}'));
        assert_eq!(body.matches("},{").count(), 1);
    }

    #[test]
    fn test_decode_batch_body() {
        let events = vec![event("gla0001", 1.5), event("gla0002", 2.0)];
        let body = encode_telemetry_batch(&events).unwrap();
        let decoded: Vec<_> = decode_telemetry_records(&body)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(decoded, events);
    }

    #[test]
    fn test_decode_trailing_comma_and_newlines() {
        let text = "{\"timestamp\":1,\"truck_id\":\"a\",\"lat\":1.0,\"lon\":2.0,\"load\":3.0},\n\
                    {\"timestamp\":2,\"truck_id\":\"b\",\"lat\":1.0,\"lon\":2.0,\"load\":3.0}\n\
                    {\"timestamp\":3,\"truck_id\":\"c\",\"lat\":1.0,\"lon\":2.0,\"load\":3.0},";
        let decoded = decode_telemetry_records(text);
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[2].as_ref().unwrap().truck_id, "c");
    }

    #[test]
    fn test_decode_json_lines_output() {
        let text = encode_json_lines(&[event("dun0001", 4.0)]).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(decode_telemetry_records(&text).len(), 1);
    }

    #[test]
    fn test_decode_array_form() {
        let text = "[{\"timestamp\":1,\"truck_id\":\"a\",\"lat\":1.0,\"lon\":2.0,\"load\":3.0}]";
        assert_eq!(decode_telemetry_records(text).len(), 1);
    }

    #[test]
    fn test_decode_rejects_incomplete_record() {
        let text = "{\"timestamp\":1,\"truck_id\":\"a\",\"lat\":1.0,\"lon\":2.0,\"load\":3.0},{\"truck_id\":\"b\"}";
        let decoded = decode_telemetry_records(text);
        assert!(decoded[0].is_ok());
        let rejected = decoded[1].as_ref().unwrap_err();
        assert_eq!(rejected.value["truck_id"], "b");
        assert!(rejected.reason.contains("timestamp"));
    }

    #[test]
    fn test_truncated_tail_is_rejected() {
        let decoded = decode_telemetry_records("{\"timestamp\": 1, ");
        assert_eq!(decoded.len(), 1);
        let rejected = decoded[0].as_ref().unwrap_err();
        assert_eq!(rejected.value, Value::String("{\"timestamp\": 1,".into()));
        assert!(rejected.reason.starts_with("malformed JSON"));
    }

    #[test]
    fn test_broken_line_does_not_hide_neighbours() {
        let text = "{\"timestamp\":1,\"truck_id\":\"a\",\"lat\":1.0,\"lon\":2.0,\"load\":3.0}\n\
                    {\"timestamp\":2,\"truck_id\":\"b\",\"lat\":55.9x}\n\
                    {\"timestamp\":3,\"truck_id\":\"c\",\"lat\":1.0,\"lon\":2.0,\"load\":3.0}\n";
        let decoded = decode_telemetry_records(text);
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].as_ref().unwrap().truck_id, "a");
        let rejected = decoded[1].as_ref().unwrap_err();
        assert!(rejected.value.as_str().unwrap().contains("55.9x"));
        assert_eq!(decoded[2].as_ref().unwrap().truck_id, "c");
    }

    #[test]
    fn test_broken_record_in_comma_joined_body() {
        let text = "{\"timestamp\":1,\"truck_id\":\"a\",\"lat\":1.0,\"lon\":2.0,\"load\":3.0},\
                    {\"timestamp\":2,\"truck_id\":\"b\",\"lat\":,\
                    {\"timestamp\":3,\"truck_id\":\"c\",\"lat\":1.0,\"lon\":2.0,\"load\":3.0}";
        let decoded = decode_telemetry_records(text);
        assert_eq!(decoded.len(), 3);
        assert!(decoded[1].is_err());
        assert_eq!(decoded[2].as_ref().unwrap().truck_id, "c");
    }

    #[test]
    fn test_fragment_end_skips_commas_inside_strings_and_arrays() {
        assert_eq!(fragment_end("{\"a\":\",{\" x"), 11);
        assert_eq!(fragment_end("[1,{2} x\nnext"), 8);
        assert_eq!(fragment_end("{\"a\":1,{\"b\""), 6);
    }

    #[test]
    fn test_empty_input() {
        assert!(decode_telemetry_records("  \n").is_empty());
    }

    #[test]
    fn test_geocode_batch_round_trip_shape() {
        let body = encode_geocode_batch(&[GeoCode::new("AB10", 57.13, -2.11)]).unwrap();
        assert!(body.starts_with("[{\"postcode\":\"AB10\""));
        let codes = decode_geocode_batch(&body).unwrap();
        assert_eq!(codes[0].code, "AB10");
    }

    #[test]
    fn test_geocode_batch_python_repr() {
        let body = "[{'postcode': 'G1 1AA', 'lon': -4.25, 'lat': 55.86}]";
        let codes = decode_geocode_batch(body).unwrap();
        assert_eq!(codes[0].code, "G1 1AA");
        assert_eq!(codes[0].lat, 55.86);
    }
}
