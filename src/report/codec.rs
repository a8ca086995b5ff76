//! Parses report payloads in any of the wire forms the CI emits.
//!
//! Three forms are accepted: the binary schema (`.binpb` / `.pb`), the
//! current textual schema (`.json`), and the legacy textual schema (`.json`
//! that fails the current parse). All normalize to [`Report`].

use anyhow::{bail, Context, Result};
use prost::Message;

use super::{legacy::LegacyReport, Report};

/// File name suffixes recognized inside a CI artifact.
pub const REPORT_SUFFIXES: &[&str] = &["report.binpb", "report.pb", "report.json"];

/// True if the entry name identifies a report payload.
pub fn is_report_name(name: &str) -> bool {
    REPORT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Decode a report payload, choosing the wire form from the file name.
pub fn parse_report(name: &str, data: &[u8]) -> Result<Report> {
    if name.ends_with(".binpb") || name.ends_with(".pb") {
        Report::decode(data).with_context(|| format!("failed to decode binary report {name}"))
    } else if name.ends_with(".json") {
        parse_json(data).with_context(|| format!("failed to parse report {name}"))
    } else {
        bail!("unrecognized report file name: {name}");
    }
}

/// Parse a textual report, falling back to the legacy schema. When both
/// parses fail, the current-schema error is returned; it is the more
/// descriptive of the two.
fn parse_json(data: &[u8]) -> Result<Report> {
    match serde_json::from_slice::<Report>(data) {
        Ok(report) => Ok(report),
        Err(current_err) => match serde_json::from_slice::<LegacyReport>(data) {
            Ok(legacy) => Ok(legacy.convert()),
            Err(_) => Err(current_err.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Measures;

    #[test]
    fn binary_roundtrip() {
        let report = Report {
            measures: Some(Measures { total_code: 7, ..Default::default() }),
            units: vec![],
        };
        let bytes = report.encode_to_vec();
        let parsed = parse_report("report.binpb", &bytes).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn legacy_json_fallback() {
        let data =
            br#"{"total_code":100,"matched_code":50,"matched_code_percent":50.0,"units":[]}"#;
        let report = parse_report("report.json", data).unwrap();
        assert_eq!(report.measures.unwrap().matched_code_percent, 50.0);
        assert!(report.units.is_empty());
    }

    #[test]
    fn garbage_json_returns_current_error() {
        let err = parse_report("report.json", b"not json at all").unwrap_err();
        // the error should speak in terms of the current schema
        assert!(format!("{err:#}").contains("report.json"));
    }

    #[test]
    fn report_name_matching() {
        assert!(is_report_name("progress/report.binpb"));
        assert!(is_report_name("report.json"));
        assert!(!is_report_name("report.txt"));
        assert!(!is_report_name("maps.json"));
    }
}
