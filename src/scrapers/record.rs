//! Positional parser for flattened dashboard rows.
//!
//! A listing row is flattened to one string with one `|`-separated segment
//! per cell. The segment layout is fixed per dashboard schema version; the
//! `segment` table below is the only place that maps positions to fields.

use thiserror::Error;

use crate::models::ProjectRecord;

/// Dashboard row layout understood by this parser.
pub const SCHEMA_VERSION: u32 = 1;

/// Separator between flattened cells.
pub const SEPARATOR: char = '|';

/// Minimum number of segments a row must have.
pub const MIN_SEGMENTS: usize = 10;

/// Length of the numeric code the dashboard appends to every address.
const ADDRESS_CODE_LEN: usize = 5;

/// Segment positions for schema version 1.
///
/// Segments 4, 5 and 7 are present in the row but carry nothing we keep.
pub mod segment {
    pub const ADDRESS: usize = 0;
    pub const REFERENCE_ID: usize = 1;
    pub const STATUS: usize = 2;
    pub const APPLICATION_NUMBER: usize = 3;
    pub const SYS_REF: usize = 6;
    pub const STATUS_DATE: usize = 8;
    pub const UNIT: usize = 9;
}

/// Errors for a single row. Callers skip the row and carry on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed record ({found} segments, need {expected}): {raw:?}")]
    MalformedRecord {
        raw: String,
        found: usize,
        expected: usize,
    },

    #[error("invalid reference id {value:?} in record: {raw:?}")]
    InvalidReferenceId { value: String, raw: String },

    #[error("unsupported record schema version {0} (supported: {SCHEMA_VERSION})")]
    UnsupportedSchema(u32),
}

/// Check that rows of the given schema version can be parsed.
pub fn check_schema(version: u32) -> Result<(), ParseError> {
    if version == SCHEMA_VERSION {
        Ok(())
    } else {
        Err(ParseError::UnsupportedSchema(version))
    }
}

/// Parse one flattened row, tagging it with `archived`.
pub fn parse_record(raw: &str, archived: &str) -> Result<ProjectRecord, ParseError> {
    let segments: Vec<&str> = raw.split(SEPARATOR).collect();
    if segments.len() < MIN_SEGMENTS {
        return Err(ParseError::MalformedRecord {
            raw: raw.to_string(),
            found: segments.len(),
            expected: MIN_SEGMENTS,
        });
    }

    let id_text = segments[segment::REFERENCE_ID].trim();
    let reference_id = id_text
        .parse::<i64>()
        .map_err(|_| ParseError::InvalidReferenceId {
            value: id_text.to_string(),
            raw: raw.to_string(),
        })?;

    let application_number = Some(segments[segment::APPLICATION_NUMBER].trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(ProjectRecord {
        reference_id,
        application_number,
        unit: segments[segment::UNIT].trim().to_string(),
        status_more_info: None,
        status: segments[segment::STATUS].trim().to_string(),
        status_date: segments[segment::STATUS_DATE].trim().to_string(),
        address: strip_address_code(segments[segment::ADDRESS]).to_string(),
        application_type: None,
        assigned_staff: None,
        sys_ref: segments[segment::SYS_REF].trim().to_string(),
        archived: archived.to_string(),
    })
}

/// Parse a row after checking the schema version it was produced under.
pub fn parse_record_versioned(
    raw: &str,
    archived: &str,
    version: u32,
) -> Result<ProjectRecord, ParseError> {
    check_schema(version)?;
    parse_record(raw, archived)
}

/// Drop the trailing numeric code from an address cell.
///
/// Cells shorter than the code collapse to an empty address.
fn strip_address_code(cell: &str) -> &str {
    let cut = cell
        .char_indices()
        .rev()
        .nth(ADDRESS_CODE_LEN - 1)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    cell[..cut].trim_end()
}
