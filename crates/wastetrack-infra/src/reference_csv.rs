//! Reference data loader for `postcodes.csv` and `outcodes.csv`
//!
//! Expected columns: `postcode` (or `outcode`), `latitude`, `longitude`.
//! Extra columns are ignored.

use std::io::Read;
use std::path::Path;

use tracing::warn;

use wastetrack_types::{CodeKind, Error, GeoCode, GeoPoint, Result};

struct Columns {
    code: usize,
    lat: usize,
    lon: usize,
}

fn locate_columns(headers: &csv::StringRecord, kind: CodeKind) -> Result<Columns> {
    let find = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let code = find(kind.code_column())
        .or_else(|| find("postcode"))
        .ok_or_else(|| Error::InvalidInput(format!("missing column '{}'", kind.code_column())))?;
    let lat = find("latitude").ok_or_else(|| Error::InvalidInput("missing column 'latitude'".into()))?;
    let lon =
        find("longitude").ok_or_else(|| Error::InvalidInput("missing column 'longitude'".into()))?;
    Ok(Columns { code, lat, lon })
}

fn parse_coordinate(value: &str, row: usize, column: &str) -> Result<f64> {
    value.parse::<f64>().map_err(|_| {
        Error::InvalidInput(format!("invalid {column} in row {row}: '{value}'"))
    })
}

/// Load reference codes from any reader
pub fn read_reference_codes<R: Read>(reader: R, kind: CodeKind) -> Result<Vec<GeoCode>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let columns = locate_columns(&headers, kind)?;

    let mut codes = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result?;
        let row = row_idx + 2;
        let code = record.get(columns.code).unwrap_or("");
        if code.is_empty() {
            warn!(row, "skipping row without a code");
            continue;
        }
        let lat = parse_coordinate(record.get(columns.lat).unwrap_or(""), row, "latitude")?;
        let lon = parse_coordinate(record.get(columns.lon).unwrap_or(""), row, "longitude")?;
        if !GeoPoint::new(lat, lon).is_valid() {
            return Err(Error::InvalidInput(format!(
                "coordinate out of range in row {row}: ({lat}, {lon})"
            )));
        }
        codes.push(GeoCode::new(code, lat, lon));
    }
    Ok(codes)
}

/// Load reference codes from a file; the kind is taken from the file name
/// unless given explicitly
pub fn load_reference_codes<P: AsRef<Path>>(
    path: P,
    kind: Option<CodeKind>,
) -> Result<(CodeKind, Vec<GeoCode>)> {
    let path = path.as_ref();
    let kind = match kind {
        Some(kind) => kind,
        None => CodeKind::from_reference_file(&path.to_string_lossy()).ok_or_else(|| {
            Error::InvalidInput(format!(
                "cannot tell postcodes from outcodes for '{}'",
                path.display()
            ))
        })?,
    };
    let file = std::fs::File::open(path)?;
    Ok((kind, read_reference_codes(file, kind)?))
}
