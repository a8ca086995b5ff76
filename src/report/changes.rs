//! The change-summary wire schema exchanged with the external differ.
//!
//! `ChangesInput` goes to the differ on stdin; `Changes` comes back on
//! stdout. Both use the binary wire form only.

use super::Measures;

/// Input to the differ: the two reports to compare.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChangesInput {
    #[prost(message, optional, tag = "1")]
    pub from: Option<super::Report>,
    #[prost(message, optional, tag = "2")]
    pub to: Option<super::Report>,
}

/// The differ's comparison result.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Changes {
    #[prost(message, optional, tag = "1")]
    pub from: Option<Measures>,
    #[prost(message, optional, tag = "2")]
    pub to: Option<Measures>,
    #[prost(message, repeated, tag = "3")]
    pub units: Vec<ChangeUnit>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChangeUnit {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub from: Option<Measures>,
    #[prost(message, optional, tag = "3")]
    pub to: Option<Measures>,
    #[prost(message, repeated, tag = "4")]
    pub sections: Vec<ChangeItem>,
    #[prost(message, repeated, tag = "5")]
    pub functions: Vec<ChangeItem>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChangeItem {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub from: Option<ChangeItemInfo>,
    #[prost(message, optional, tag = "3")]
    pub to: Option<ChangeItemInfo>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ChangeItemInfo {
    #[prost(float, tag = "1")]
    pub fuzzy_match_percent: f32,
    #[prost(uint64, tag = "2")]
    pub size: u64,
}
