//! Top gainers and losers of an index
//!
//! NSE returns every constituent of an index with its percentage change in
//! `pChange`. The first row describes the index itself and is skipped.

use std::cmp::Ordering;

use serde_json::Value;

/// Which end of the ranking to take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Gainers,
    Losers,
}

fn percent_change(row: &Value) -> Option<f64> {
    match row.get("pChange")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_index_row(row: &Value, index: &str) -> bool {
    row.get("symbol")
        .and_then(Value::as_str)
        .is_some_and(|symbol| symbol.eq_ignore_ascii_case(index.trim()))
}

/// Picks at most `count` constituents that moved in `direction`
///
/// Gainers are those with a positive change, biggest first; losers have a
/// negative change, biggest drop first. Rows without a usable `pChange` are
/// ignored.
pub fn top_movers(payload: &Value, index: &str, direction: Direction, count: usize) -> Vec<Value> {
    let Some(rows) = payload.get("data").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut movers: Vec<(f64, &Value)> = rows
        .iter()
        .filter(|row| !is_index_row(row, index))
        .filter_map(|row| percent_change(row).map(|change| (change, row)))
        .filter(|(change, _)| match direction {
            Direction::Gainers => *change > 0.0,
            Direction::Losers => *change < 0.0,
        })
        .collect();

    movers.sort_by(|a, b| match direction {
        Direction::Gainers => b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal),
        Direction::Losers => a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal),
    });

    movers
        .into_iter()
        .take(count)
        .map(|(_, row)| row.clone())
        .collect()
}
