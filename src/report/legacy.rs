//! The older flat JSON report schema and its upconversion.
//!
//! Legacy reports carry their counts at the top level instead of a nested
//! measures message, and item addresses are strings (hex with an optional
//! `0x` prefix, or decimal).

use serde::Deserialize;

use super::{Measures, Report, ReportItem, ReportUnit};

#[derive(Debug, Default, Deserialize)]
pub struct LegacyReport {
    #[serde(default)]
    pub fuzzy_match_percent: f32,
    #[serde(default)]
    pub total_code: u64,
    #[serde(default)]
    pub matched_code: u64,
    #[serde(default)]
    pub matched_code_percent: f32,
    #[serde(default)]
    pub total_data: u64,
    #[serde(default)]
    pub matched_data: u64,
    #[serde(default)]
    pub matched_data_percent: f32,
    #[serde(default)]
    pub total_functions: u32,
    #[serde(default)]
    pub matched_functions: u32,
    #[serde(default)]
    pub matched_functions_percent: f32,
    #[serde(default)]
    pub units: Vec<LegacyReportUnit>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LegacyReportUnit {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fuzzy_match_percent: f32,
    #[serde(default)]
    pub total_code: u64,
    #[serde(default)]
    pub matched_code: u64,
    #[serde(default)]
    pub total_data: u64,
    #[serde(default)]
    pub matched_data: u64,
    #[serde(default)]
    pub total_functions: u32,
    #[serde(default)]
    pub matched_functions: u32,
    pub complete: Option<bool>,
    pub module_name: Option<String>,
    pub module_id: Option<u32>,
    #[serde(default)]
    pub sections: Vec<LegacyReportItem>,
    #[serde(default)]
    pub functions: Vec<LegacyReportItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LegacyReportItem {
    #[serde(default)]
    pub name: String,
    pub demangled_name: Option<String>,
    /// Hex string with an optional `0x` prefix, or decimal.
    pub address: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub fuzzy_match_percent: f32,
}

impl LegacyReport {
    pub fn convert(self) -> Report {
        Report {
            measures: Some(Measures {
                fuzzy_match_percent: self.fuzzy_match_percent,
                total_code: self.total_code,
                matched_code: self.matched_code,
                matched_code_percent: self.matched_code_percent,
                total_data: self.total_data,
                matched_data: self.matched_data,
                matched_data_percent: self.matched_data_percent,
                total_functions: self.total_functions,
                matched_functions: self.matched_functions,
                matched_functions_percent: self.matched_functions_percent,
            }),
            units: self.units.into_iter().map(LegacyReportUnit::convert).collect(),
        }
    }
}

impl LegacyReportUnit {
    fn convert(self) -> ReportUnit {
        // Legacy units never carried percent fields; recompute them.
        let mut measures = Measures {
            fuzzy_match_percent: self.fuzzy_match_percent,
            total_code: self.total_code,
            matched_code: self.matched_code,
            total_data: self.total_data,
            matched_data: self.matched_data,
            total_functions: self.total_functions,
            matched_functions: self.matched_functions,
            ..Default::default()
        };
        measures.calculate_percents();
        ReportUnit {
            name: self.name,
            measures: Some(measures),
            sections: self.sections.into_iter().map(LegacyReportItem::convert).collect(),
            functions: self.functions.into_iter().map(LegacyReportItem::convert).collect(),
            complete: self.complete,
            module_name: self.module_name,
            module_id: self.module_id,
        }
    }
}

impl LegacyReportItem {
    fn convert(self) -> ReportItem {
        ReportItem {
            name: self.name,
            demangled_name: self.demangled_name,
            address: Some(self.address.as_deref().map(parse_address).unwrap_or(0)),
            size: self.size,
            fuzzy_match_percent: self.fuzzy_match_percent,
        }
    }
}

/// Decode a legacy address string. Unparseable input yields 0 rather than an
/// error, matching how these files have always been ingested.
fn parse_address(s: &str) -> u64 {
    let result = if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse::<u64>()
    };
    result.unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parsing() {
        assert_eq!(parse_address("0x2A"), 42);
        assert_eq!(parse_address("42"), 42);
        assert_eq!(parse_address("zz"), 0);
        assert_eq!(parse_address("0xzz"), 0);
    }

    #[test]
    fn convert_carries_top_level_measures_verbatim() {
        let legacy: LegacyReport = serde_json::from_str(
            r#"{"total_code":100,"matched_code":50,"matched_code_percent":50.0,"units":[]}"#,
        )
        .unwrap();
        let report = legacy.convert();
        let measures = report.measures.unwrap();
        assert_eq!(measures.total_code, 100);
        assert_eq!(measures.matched_code_percent, 50.0);
        assert!(report.units.is_empty());
    }

    #[test]
    fn convert_recomputes_unit_percents() {
        let legacy: LegacyReport = serde_json::from_str(
            r#"{"units":[{"name":"main.c","total_code":10,"matched_code":5,
                "functions":[{"name":"f","address":"0x100","size":16,"fuzzy_match_percent":75.0}]}]}"#,
        )
        .unwrap();
        let report = legacy.convert();
        let unit = &report.units[0];
        assert_eq!(unit.measures.unwrap().matched_code_percent, 50.0);
        assert_eq!(unit.functions[0].address, Some(0x100));
    }
}
