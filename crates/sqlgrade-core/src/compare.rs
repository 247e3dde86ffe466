use crate::model::{ComparisonPolicy, RowOrder};
use crate::normalize::NormalizedRow;
use serde::Serialize;
use std::collections::BTreeMap;

pub const CORRECT_MESSAGE: &str = "Correct! Your query produced the expected output.";

#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub is_correct: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<Mismatch>,
}

impl Verdict {
    fn correct() -> Self {
        Self {
            is_correct: true,
            message: CORRECT_MESSAGE.to_string(),
            mismatch: None,
        }
    }

    fn wrong(mismatch: Mismatch) -> Self {
        Self {
            is_correct: false,
            message: mismatch.describe(),
            mismatch: Some(mismatch),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mismatch {
    RowCount {
        expected: usize,
        actual: usize,
    },
    Row {
        index: usize,
        columns: Vec<ColumnDiff>,
    },
    Rows {
        missing: Vec<NormalizedRow>,
        unexpected: Vec<NormalizedRow>,
    },
}

/// One differing column. A `None` side means the column is absent from
/// that row; `Some(None)` means SQL NULL.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ColumnDiff {
    pub column: String,
    pub expected: Option<Option<String>>,
    pub actual: Option<Option<String>>,
}

impl Mismatch {
    pub fn describe(&self) -> String {
        match self {
            Mismatch::RowCount { expected, actual } => {
                format!("Expected {} rows, but got {} rows.", expected, actual)
            }
            Mismatch::Row { index, columns } => {
                let parts: Vec<String> = columns.iter().map(describe_diff).collect();
                format!("Mismatch at row index {}: {}", index, parts.join("; "))
            }
            Mismatch::Rows {
                missing,
                unexpected,
            } => {
                let mut msg = format!(
                    "Result rows differ from expected output (row order ignored): {} expected row(s) missing, {} unexpected row(s).",
                    missing.len(),
                    unexpected.len()
                );
                if let Some(first) = missing.first() {
                    msg.push_str(&format!(" First missing row: {}", first.to_json()));
                }
                msg
            }
        }
    }
}

fn describe_diff(d: &ColumnDiff) -> String {
    match (&d.expected, &d.actual) {
        (Some(e), None) => format!(
            "column \"{}\" is missing (expected {})",
            d.column,
            show_cell(e)
        ),
        (None, Some(a)) => format!("unexpected column \"{}\" = {}", d.column, show_cell(a)),
        (Some(e), Some(a)) => format!(
            "column \"{}\" expected {} but got {}",
            d.column,
            show_cell(e),
            show_cell(a)
        ),
        (None, None) => format!("column \"{}\"", d.column),
    }
}

fn show_cell(v: &Option<String>) -> String {
    match v {
        Some(s) => format!("'{}'", s),
        None => "NULL".to_string(),
    }
}

/// Grades `user` against `expected`. Row counts are checked first and a
/// difference fails without inspecting row contents.
pub fn compare(
    user: &[NormalizedRow],
    expected: &[NormalizedRow],
    policy: &ComparisonPolicy,
) -> Verdict {
    if user.len() != expected.len() {
        return Verdict::wrong(Mismatch::RowCount {
            expected: expected.len(),
            actual: user.len(),
        });
    }

    match policy.order {
        RowOrder::Ordered => compare_ordered(user, expected, policy.numeric_tolerance),
        RowOrder::Unordered => compare_unordered(user, expected, policy.numeric_tolerance),
    }
}

fn compare_ordered(user: &[NormalizedRow], expected: &[NormalizedRow], eps: Option<f64>) -> Verdict {
    for (index, (u, e)) in user.iter().zip(expected).enumerate() {
        if !rows_equal(u, e, eps) {
            return Verdict::wrong(Mismatch::Row {
                index,
                columns: diff_columns(u, e, eps),
            });
        }
    }
    Verdict::correct()
}

fn compare_unordered(
    user: &[NormalizedRow],
    expected: &[NormalizedRow],
    eps: Option<f64>,
) -> Verdict {
    let (missing, unexpected) = match eps {
        Some(eps) => match_within_tolerance(user, expected, eps),
        None => multiset_difference(user, expected),
    };
    if missing.is_empty() && unexpected.is_empty() {
        return Verdict::correct();
    }
    Verdict::wrong(Mismatch::Rows {
        missing,
        unexpected,
    })
}

/// Exact multiset difference on the sorted-key serializations.
fn multiset_difference(
    user: &[NormalizedRow],
    expected: &[NormalizedRow],
) -> (Vec<NormalizedRow>, Vec<NormalizedRow>) {
    let mut counts: BTreeMap<String, (usize, &NormalizedRow)> = BTreeMap::new();
    for r in expected {
        counts.entry(r.canonical_key()).or_insert((0, r)).0 += 1;
    }
    let mut unexpected = Vec::new();
    for r in user {
        match counts.get_mut(&r.canonical_key()) {
            Some(entry) if entry.0 > 0 => entry.0 -= 1,
            _ => unexpected.push(r.clone()),
        }
    }
    let mut missing = Vec::new();
    for (n, r) in counts.values() {
        missing.extend(std::iter::repeat((*r).clone()).take(*n));
    }
    (missing, unexpected)
}

/// Text order says nothing about numeric closeness, so with a tolerance each
/// expected row takes the first unused user row it matches.
fn match_within_tolerance(
    user: &[NormalizedRow],
    expected: &[NormalizedRow],
    eps: f64,
) -> (Vec<NormalizedRow>, Vec<NormalizedRow>) {
    let mut used = vec![false; user.len()];
    let mut missing = Vec::new();
    for e in expected {
        let found = user
            .iter()
            .enumerate()
            .find(|(i, u)| !used[*i] && rows_equal(u, e, Some(eps)))
            .map(|(i, _)| i);
        match found {
            Some(i) => used[i] = true,
            None => missing.push(e.clone()),
        }
    }
    let unexpected = user
        .iter()
        .zip(&used)
        .filter(|(_, used)| !**used)
        .map(|(r, _)| r.clone())
        .collect();
    (missing, unexpected)
}

/// Rows are equal iff their sorted-key serializations match, or, with a
/// tolerance, they share a column set and every cell matches (numerically
/// within `eps` where both sides parse as numbers).
pub fn rows_equal(a: &NormalizedRow, b: &NormalizedRow, eps: Option<f64>) -> bool {
    let Some(eps) = eps else {
        return a.canonical_key() == b.canonical_key();
    };
    if a.len() != b.len() {
        return false;
    }
    a.cells().iter().all(|(col, av)| match b.get(col) {
        Some(bv) => cells_equal(av.as_deref(), bv, Some(eps)),
        None => false,
    })
}

fn cells_equal(a: Option<&str>, b: Option<&str>, eps: Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) if x == y => true,
        (Some(x), Some(y)) => match (eps, x.parse::<f64>(), y.parse::<f64>()) {
            (Some(eps), Ok(fx), Ok(fy)) => (fx - fy).abs() <= eps,
            _ => false,
        },
        _ => false,
    }
}

fn diff_columns(user: &NormalizedRow, expected: &NormalizedRow, eps: Option<f64>) -> Vec<ColumnDiff> {
    let mut diffs = Vec::new();
    for (col, ev) in expected.cells() {
        match user.get(col) {
            Some(uv) if cells_equal(uv, ev.as_deref(), eps) => {}
            Some(uv) => diffs.push(ColumnDiff {
                column: col.clone(),
                expected: Some(ev.clone()),
                actual: Some(uv.map(str::to_string)),
            }),
            None => diffs.push(ColumnDiff {
                column: col.clone(),
                expected: Some(ev.clone()),
                actual: None,
            }),
        }
    }
    for (col, uv) in user.cells() {
        if expected.get(col).is_none() {
            diffs.push(ColumnDiff {
                column: col.clone(),
                expected: None,
                actual: Some(uv.clone()),
            });
        }
    }
    diffs
}
