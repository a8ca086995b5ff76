//! Markdown rendering of change summaries for PR comments.

use std::fmt::Write;

use crate::report::{
    changes::{ChangeItem, Changes},
    Measures,
};

const INC_ARROW: &str = "${\\color{green}▲}$";
const DEC_ARROW: &str = "${\\color{red}▼}$";

/// Assemble the full comment body from per-version change sections.
pub fn render_comment(sections: &[(String, String)]) -> String {
    let mut out = String::from("## Changes\n\n");
    for (version, body) in sections {
        let _ = write!(
            out,
            "<details><summary>Version {version}</summary>\n\n{body}\n\n</details>\n\n"
        );
    }
    out
}

/// Render one diff result. Returns `None` when nothing changed at all, so
/// the caller can skip commenting entirely.
pub fn render_changes(changes: &Changes) -> Option<String> {
    let mut out = String::from("### Overall\n\n");
    match measures_table(changes.from.as_ref(), changes.to.as_ref()) {
        Some(table) => {
            out.push_str(&table);
            out.push_str("\n\n");
        }
        None => {
            if changes.units.is_empty() {
                return None;
            }
            out.push_str("No changes\n\n");
        }
    }
    for unit in &changes.units {
        let _ = write!(out, "---\n### `{}`\n\n", unit.name);
        if let Some(table) = measures_table(unit.from.as_ref(), unit.to.as_ref()) {
            out.push_str(&table);
            out.push_str("\n\n");
        }
        if let Some(table) = change_item_table("Functions", &unit.functions) {
            out.push_str(&table);
            out.push_str("\n\n");
        }
    }
    Some(out)
}

fn float_arrow(diff: f32) -> &'static str {
    if diff > 0.0 {
        INC_ARROW
    } else if diff < 0.0 {
        DEC_ARROW
    } else {
        ""
    }
}

fn int_arrow(diff: i64) -> &'static str {
    if diff > 0 {
        INC_ARROW
    } else if diff < 0 {
        DEC_ARROW
    } else {
        ""
    }
}

fn arrow_suffix(arrow: &str) -> String {
    if arrow.is_empty() {
        String::new()
    } else {
        format!(" {arrow}")
    }
}

fn change_item_table(title: &str, items: &[ChangeItem]) -> Option<String> {
    let rows: Vec<String> = items.iter().filter_map(change_item_row).collect();
    if rows.is_empty() {
        return None;
    }
    Some(format!("|{title}|Previous|Current|Change|\n|-|-|-|-|\n{}", rows.join("\n")))
}

fn change_item_row(item: &ChangeItem) -> Option<String> {
    let from = item.from.map(|i| i.fuzzy_match_percent).unwrap_or(0.0);
    let to = item.to.map(|i| i.fuzzy_match_percent).unwrap_or(0.0);
    if from == to {
        return None;
    }
    let diff = to - from;
    Some(format!(
        "|`{}`|{from:.2}%|{to:.2}%|{diff:.2}%{}|",
        item.name,
        arrow_suffix(float_arrow(diff)),
    ))
}

fn measures_table(prev: Option<&Measures>, curr: Option<&Measures>) -> Option<String> {
    if prev.is_none() && curr.is_none() {
        return None;
    }
    let default = Measures::default();
    let prev = prev.unwrap_or(&default);
    let curr = curr.unwrap_or(&default);

    let mut rows = Vec::new();
    if prev.fuzzy_match_percent != curr.fuzzy_match_percent {
        rows.push(float_row("Fuzzy match", prev.fuzzy_match_percent, curr.fuzzy_match_percent));
    }
    if prev.total_code != curr.total_code {
        rows.push(int_row("Total code", prev.total_code, curr.total_code));
    }
    if prev.matched_code != curr.matched_code
        || prev.matched_code_percent != curr.matched_code_percent
    {
        rows.push(int_percent_row(
            "Matched code",
            prev.matched_code,
            prev.matched_code_percent,
            curr.matched_code,
            curr.matched_code_percent,
        ));
    }
    if prev.total_data != curr.total_data {
        rows.push(int_row("Total data", prev.total_data, curr.total_data));
    }
    if prev.matched_data != curr.matched_data
        || prev.matched_data_percent != curr.matched_data_percent
    {
        rows.push(int_percent_row(
            "Matched data",
            prev.matched_data,
            prev.matched_data_percent,
            curr.matched_data,
            curr.matched_data_percent,
        ));
    }
    if prev.total_functions != curr.total_functions {
        rows.push(int_row(
            "Total functions",
            u64::from(prev.total_functions),
            u64::from(curr.total_functions),
        ));
    }
    if prev.matched_functions != curr.matched_functions
        || prev.matched_functions_percent != curr.matched_functions_percent
    {
        rows.push(int_percent_row(
            "Matched functions",
            u64::from(prev.matched_functions),
            prev.matched_functions_percent,
            u64::from(curr.matched_functions),
            curr.matched_functions_percent,
        ));
    }
    if rows.is_empty() {
        return None;
    }
    Some(format!("|Metric|Previous|Current|Change|\n|-|-|-|-|\n{}", rows.join("\n")))
}

fn float_row(name: &str, prev: f32, curr: f32) -> String {
    let diff = curr - prev;
    format!("|{name}|{prev:.2}%|{curr:.2}%|{diff:.2}%{}|", arrow_suffix(float_arrow(diff)))
}

fn int_row(name: &str, prev: u64, curr: u64) -> String {
    let diff = curr as i64 - prev as i64;
    format!("|{name}|{prev}|{curr}|{diff}{}|", arrow_suffix(int_arrow(diff)))
}

fn int_percent_row(
    name: &str,
    prev: u64,
    prev_percent: f32,
    curr: u64,
    curr_percent: f32,
) -> String {
    let diff = curr as i64 - prev as i64;
    format!(
        "|{name}|{prev} ({prev_percent:.2}%)|{curr} ({curr_percent:.2}%)|{diff} ({:.2}%){}|",
        curr_percent - prev_percent,
        arrow_suffix(int_arrow(diff)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::changes::ChangeUnit;

    #[test]
    fn no_changes_renders_nothing() {
        let changes = Changes {
            from: Some(Measures { matched_code: 10, ..Default::default() }),
            to: Some(Measures { matched_code: 10, ..Default::default() }),
            units: vec![],
        };
        assert!(render_changes(&changes).is_none());
    }

    #[test]
    fn overall_table_shows_deltas() {
        let changes = Changes {
            from: Some(Measures { matched_code: 10, matched_code_percent: 10.0, ..Default::default() }),
            to: Some(Measures { matched_code: 20, matched_code_percent: 20.0, ..Default::default() }),
            units: vec![],
        };
        let body = render_changes(&changes).unwrap();
        assert!(body.contains("### Overall"));
        assert!(body.contains("Matched code"));
        assert!(body.contains("10 (10.00%)"));
        assert!(body.contains(INC_ARROW));
    }

    #[test]
    fn unit_changes_render_even_without_overall_delta() {
        let measures = Measures { matched_code: 5, ..Default::default() };
        let changes = Changes {
            from: Some(measures),
            to: Some(measures),
            units: vec![ChangeUnit {
                name: "main.c".into(),
                from: Some(Measures { fuzzy_match_percent: 1.0, ..Default::default() }),
                to: Some(Measures { fuzzy_match_percent: 2.0, ..Default::default() }),
                sections: vec![],
                functions: vec![],
            }],
        };
        let body = render_changes(&changes).unwrap();
        assert!(body.contains("No changes"));
        assert!(body.contains("`main.c`"));
    }

    #[test]
    fn comment_wraps_versions_in_details() {
        let body = render_comment(&[("GALE01".into(), "table".into())]);
        assert!(body.starts_with("## Changes"));
        assert!(body.contains("<details><summary>Version GALE01</summary>"));
    }
}
