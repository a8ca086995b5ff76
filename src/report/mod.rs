//! Progress report wire schema and normalization.
//!
//! A report is a tree: top-level [`Measures`], plus an ordered list of
//! [`ReportUnit`]s (one per translation unit), each carrying its own measures
//! and per-section / per-function items.
//!
//! Every message derives both `prost::Message` (the binary wire form, fixed
//! field tags) and serde (the current textual form). The legacy textual
//! schema lives in [`legacy`] and is upconverted on parse.

pub mod changes;
pub mod codec;
pub mod legacy;
pub mod serialize;

use serde::{Deserialize, Serialize};

/// Aggregate counts and percentages, at report or unit scope.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize, ::prost::Message)]
#[serde(deny_unknown_fields)]
pub struct Measures {
    #[prost(float, tag = "1")]
    #[serde(default)]
    pub fuzzy_match_percent: f32,
    #[prost(uint64, tag = "2")]
    #[serde(default)]
    pub total_code: u64,
    #[prost(uint64, tag = "3")]
    #[serde(default)]
    pub matched_code: u64,
    #[prost(float, tag = "4")]
    #[serde(default)]
    pub matched_code_percent: f32,
    #[prost(uint64, tag = "5")]
    #[serde(default)]
    pub total_data: u64,
    #[prost(uint64, tag = "6")]
    #[serde(default)]
    pub matched_data: u64,
    #[prost(float, tag = "7")]
    #[serde(default)]
    pub matched_data_percent: f32,
    #[prost(uint32, tag = "8")]
    #[serde(default)]
    pub total_functions: u32,
    #[prost(uint32, tag = "9")]
    #[serde(default)]
    pub matched_functions: u32,
    #[prost(float, tag = "10")]
    #[serde(default)]
    pub matched_functions_percent: f32,
}

impl Measures {
    /// Recompute the percent fields from the counts. A zero total counts as
    /// fully matched.
    pub fn calculate_percents(&mut self) {
        self.matched_code_percent = if self.total_code == 0 {
            100.0
        } else {
            self.matched_code as f32 / self.total_code as f32 * 100.0
        };
        self.matched_data_percent = if self.total_data == 0 {
            100.0
        } else {
            self.matched_data as f32 / self.total_data as f32 * 100.0
        };
        self.matched_functions_percent = if self.total_functions == 0 {
            100.0
        } else {
            self.matched_functions as f32 / self.total_functions as f32 * 100.0
        };
    }
}

/// A complete progress report for one version of one project.
#[derive(Clone, PartialEq, Serialize, Deserialize, ::prost::Message)]
#[serde(deny_unknown_fields)]
pub struct Report {
    #[prost(message, optional, tag = "1")]
    #[serde(default)]
    pub measures: Option<Measures>,
    #[prost(message, repeated, tag = "2")]
    #[serde(default)]
    pub units: Vec<ReportUnit>,
}

/// A translation-unit-scoped subtree of a report.
#[derive(Clone, PartialEq, Serialize, Deserialize, ::prost::Message)]
#[serde(deny_unknown_fields)]
pub struct ReportUnit {
    #[prost(string, tag = "1")]
    #[serde(default)]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    #[serde(default)]
    pub measures: Option<Measures>,
    #[prost(message, repeated, tag = "3")]
    #[serde(default)]
    pub sections: Vec<ReportItem>,
    #[prost(message, repeated, tag = "4")]
    #[serde(default)]
    pub functions: Vec<ReportItem>,
    #[prost(bool, optional, tag = "5")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
    #[prost(string, optional, tag = "6")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    #[prost(uint32, optional, tag = "7")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<u32>,
}

/// A single section or function within a unit.
#[derive(Clone, PartialEq, Serialize, Deserialize, ::prost::Message)]
#[serde(deny_unknown_fields)]
pub struct ReportItem {
    #[prost(string, tag = "1")]
    #[serde(default)]
    pub name: String,
    #[prost(string, optional, tag = "2")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demangled_name: Option<String>,
    #[prost(uint64, optional, tag = "3")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u64>,
    #[prost(uint64, tag = "4")]
    #[serde(default)]
    pub size: u64,
    #[prost(float, tag = "5")]
    #[serde(default)]
    pub fuzzy_match_percent: f32,
}
