//! Field-level CSV conventions shared by the export and import pipelines.
//!
//! Line breaks never reach the file: any run of `\n`/`\r` inside a text
//! value is written as the two characters `\n` and restored on import.

use std::borrow::Cow;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{MoverError, Result};

/// Name of the row-number column the Oracle page wrapper adds.
pub const RNUM_COLUMN: &str = "RNUM";

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Collapse line breaks into a literal `\n` and trim trailing whitespace.
///
/// Returns the encoded text and whether any line break was replaced.
pub fn encode_text(value: &str) -> (String, bool) {
    let mut out = String::with_capacity(value.len());
    let mut had_break = false;
    let mut in_break = false;

    for ch in value.chars() {
        if ch == '\n' || ch == '\r' {
            if !in_break {
                out.push_str("\\n");
                in_break = true;
            }
            had_break = true;
        } else {
            out.push(ch);
            in_break = false;
        }
    }

    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    (out, had_break)
}

/// Replace every literal `\n` with a real line break.
pub fn decode_text(value: &str) -> Cow<'_, str> {
    if value.contains("\\n") {
        Cow::Owned(value.replace("\\n", "\n"))
    } else {
        Cow::Borrowed(value)
    }
}

/// RFC-4180 escaping: quote when the field holds a comma, quote or line
/// break (or when `force` is set), doubling interior quotes.
pub fn escape_field(value: &str, force: bool) -> Cow<'_, str> {
    let needs_quotes =
        force || value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r');
    if needs_quotes {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Split one CSV record into unescaped fields.
pub fn split_record(line: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());

    match reader.records().next() {
        Some(record) => Ok(record?.iter().map(str::to_string).collect()),
        // An empty record is a single empty field
        None => Ok(vec![String::new()]),
    }
}

/// Index of the pagination row-number column, if the result carries one
/// beyond the table's own columns.
pub fn find_rnum(result_columns: &[String], table_columns: usize) -> Option<usize> {
    if result_columns.len() <= table_columns {
        return None;
    }
    result_columns
        .iter()
        .rposition(|name| name.eq_ignore_ascii_case(RNUM_COLUMN))
}

/// Parse an ISO local date.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

/// Parse an ISO local date-time, accepting a space as the separator too.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M"))
        .ok()
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "y" | "yes" => Some(true),
        "false" | "f" | "0" | "n" | "no" => Some(false),
        _ => None,
    }
}

/// Codec error helper for a failed field parse.
pub fn field_error(table: &str, line: &str, column: &str, kind: &str, raw: &str) -> MoverError {
    MoverError::codec(
        table,
        line,
        format!("column {}: cannot parse '{}' as {}", column, raw, kind),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_text_collapses_breaks() {
        assert_eq!(encode_text("d\ne"), ("d\\ne".to_string(), true));
        assert_eq!(encode_text("a\r\n\r\nb"), ("a\\nb".to_string(), true));
        assert_eq!(encode_text("padded   "), ("padded".to_string(), false));
        assert_eq!(encode_text("  lead"), ("  lead".to_string(), false));
    }

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("a", false), "a");
        assert_eq!(escape_field("b,c", false), "\"b,c\"");
        assert_eq!(escape_field("say \"hi\"", false), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("d\\ne", true), "\"d\\ne\"");
        assert_eq!(escape_field("", true), "\"\"");
    }

    #[test]
    fn test_unescape_inverts_escape() {
        let samples = [
            "",
            "plain",
            "b,c",
            "quote \" inside",
            "\"\"",
            "multi\nline\r\ntext",
            "ünïcödé, 日本語",
            "trailing,",
        ];
        for sample in samples {
            for force in [false, true] {
                let escaped = escape_field(sample, force);
                let fields = split_record(&escaped).unwrap();
                assert_eq!(fields, vec![sample.to_string()], "sample {:?}", sample);
            }
        }
    }

    #[test]
    fn test_split_record() {
        assert_eq!(
            split_record("2,\"b,c\"").unwrap(),
            vec!["2".to_string(), "b,c".to_string()]
        );
        assert_eq!(
            split_record("1,,x").unwrap(),
            vec!["1".to_string(), String::new(), "x".to_string()]
        );
    }

    #[test]
    fn test_newline_round_trip() {
        let (encoded, _) = encode_text("line one\nline two");
        assert_eq!(decode_text(&encoded), "line one\nline two");
    }

    #[test]
    fn test_find_rnum() {
        let cols = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(find_rnum(&cols(&["ID", "PAYLOAD", "RNUM"]), 2), Some(2));
        assert_eq!(find_rnum(&cols(&["id", "rnum"]), 1), Some(1));
        // A table with its own RNUM column keeps it
        assert_eq!(find_rnum(&cols(&["ID", "RNUM"]), 2), None);
    }

    #[test]
    fn test_parse_temporal() {
        let ts = parse_timestamp("2024-03-01T12:30:05.250").unwrap();
        assert_eq!(ts.format(TIMESTAMP_FORMAT).to_string(), "2024-03-01T12:30:05.250");
        assert!(parse_timestamp("2024-03-01 12:30:05").is_some());
        assert_eq!(parse_date("2024-03-01"), NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(parse_date("2024-03-01T00:00:00"), None);
    }
}
