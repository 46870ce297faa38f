//! CSV bar ingest
//!
//! Parses uploaded OHLCV files into `BarRecord`s ready for the store.
//! Expected header: `date,open,high,low,close,volume` (extra columns ignored).

use crate::models::BarRecord;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

pub const REQUIRED_COLUMNS: [&str; 6] = ["date", "open", "high", "low", "close", "volume"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y"];

/// Parse an ISO-like timestamp. Offsets are converted to UTC and dropped;
/// date-only values mean midnight.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestError {
    /// Header lacks one or more required columns
    MissingColumns(Vec<String>),
    /// File could not be read as CSV
    Malformed(String),
    /// Unparsable `date` value (1-based data row)
    InvalidTimestamp { row: usize, value: String },
    /// Unparsable or non-finite numeric value (1-based data row)
    InvalidValue { row: usize, column: &'static str },
    /// Two rows share a timestamp
    NonMonotonic,
    /// No data rows
    Empty,
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingColumns(missing) => write!(
                f,
                "CSV must contain columns: {} (missing: {})",
                REQUIRED_COLUMNS.join(", "),
                missing.join(", ")
            ),
            Self::Malformed(e) => write!(f, "Failed to read CSV: {}", e),
            Self::InvalidTimestamp { row, value } => {
                write!(f, "Invalid datetime format in CSV (row {}: {:?})", row, value)
            }
            Self::InvalidValue { row, column } => {
                write!(f, "Invalid {} value in CSV (row {})", column, row)
            }
            Self::NonMonotonic => write!(f, "Timestamps must be strictly increasing"),
            Self::Empty => write!(f, "CSV contains no rows"),
        }
    }
}

impl std::error::Error for IngestError {}

/// Parse a CSV upload into bars sorted by timestamp.
pub fn parse_bars_csv(bytes: &[u8]) -> Result<Vec<BarRecord>, IngestError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| IngestError::Malformed(e.to_string()))?
        .clone();

    let position = |name: &str| headers.iter().position(|h| h == name);
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| position(**c).is_none())
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns(missing));
    }
    // Checked above
    let idx: Vec<usize> = REQUIRED_COLUMNS
        .iter()
        .filter_map(|c| position(*c))
        .collect();

    let mut records = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let row = i + 1;
        let record = result.map_err(|e| IngestError::Malformed(e.to_string()))?;
        let field = |n: usize| record.get(idx[n]).unwrap_or("");

        let timestamp = parse_timestamp(field(0)).ok_or_else(|| IngestError::InvalidTimestamp {
            row,
            value: field(0).to_string(),
        })?;

        let number = |n: usize| -> Result<f64, IngestError> {
            field(n)
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or(IngestError::InvalidValue {
                    row,
                    column: REQUIRED_COLUMNS[n],
                })
        };

        records.push(BarRecord {
            timestamp,
            open: number(1)?,
            high: number(2)?,
            low: number(3)?,
            close: number(4)?,
            volume: number(5)?,
        });
    }

    if records.is_empty() {
        return Err(IngestError::Empty);
    }

    records.sort_by_key(|r| r.timestamp);
    if records.windows(2).any(|w| w[0].timestamp >= w[1].timestamp) {
        return Err(IngestError::NonMonotonic);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sorted_bars() {
        let csv = "date,open,high,low,close,volume\n\
                   2015-01-09 09:16:00,8300,8312,8299,8310,1500\n\
                   2015-01-09 09:15:00,8290,8305,8285,8300,1200\n";
        let bars = parse_bars_csv(csv.as_bytes()).unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 8300.0);
        assert_eq!(bars[1].close, 8310.0);
        assert_eq!(bars[0].timestamp, parse_timestamp("2015-01-09T09:15:00").unwrap());
    }

    #[test]
    fn test_bom_and_extra_columns() {
        let csv = "\u{feff}date,open,high,low,close,volume,oi\n2015-01-09,1,2,0.5,1.5,10,7\n";
        let bars = parse_bars_csv(csv.as_bytes()).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].volume, 10.0);
    }

    #[test]
    fn test_missing_columns() {
        let csv = "date,open,close\n2015-01-09,1,2\n";
        match parse_bars_csv(csv.as_bytes()) {
            Err(IngestError::MissingColumns(missing)) => {
                assert_eq!(missing, vec!["high", "low", "volume"]);
            }
            other => panic!("expected missing columns, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_timestamp() {
        let csv = "date,open,high,low,close,volume\nyesterday,1,2,0.5,1.5,10\n";
        assert_eq!(
            parse_bars_csv(csv.as_bytes()),
            Err(IngestError::InvalidTimestamp {
                row: 1,
                value: "yesterday".to_string()
            })
        );
    }

    #[test]
    fn test_invalid_number() {
        let csv = "date,open,high,low,close,volume\n2015-01-09,1,2,0.5,NaN,10\n";
        assert_eq!(
            parse_bars_csv(csv.as_bytes()),
            Err(IngestError::InvalidValue {
                row: 1,
                column: "close"
            })
        );
    }

    #[test]
    fn test_duplicate_timestamps_rejected() {
        let csv = "date,open,high,low,close,volume\n\
                   2015-01-09 09:15,1,2,0.5,1.5,10\n\
                   2015-01-09 09:15,1,2,0.5,1.5,10\n";
        assert_eq!(parse_bars_csv(csv.as_bytes()), Err(IngestError::NonMonotonic));
    }

    #[test]
    fn test_empty_file() {
        let csv = "date,open,high,low,close,volume\n";
        assert_eq!(parse_bars_csv(csv.as_bytes()), Err(IngestError::Empty));
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2015, 1, 9)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2015-01-09T09:15:00"), Some(expected));
        assert_eq!(parse_timestamp("2015-01-09 09:15"), Some(expected));
        assert_eq!(parse_timestamp("2015-01-09T09:15:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2015-01-09T14:45:00+05:30"), Some(expected));
        assert_eq!(
            parse_timestamp("2015-01-09"),
            NaiveDate::from_ymd_opt(2015, 1, 9).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_timestamp("not a date"), None);
    }
}
