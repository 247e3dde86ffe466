//! Learner-facing explanations for engine errors and unvalidated results.
//!
//! The engine message is never replaced: [`Feedback::original_error`] always
//! carries it verbatim and the explanation is additive.

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub explanation: String,
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    pub original_error: String,
}

struct Rule {
    kind: &'static str,
    pattern: &'static str,
    build: fn(Option<&str>) -> (String, String, Vec<String>, Option<&'static str>),
}

const RULES: &[Rule] = &[
    Rule {
        kind: "table_not_found",
        pattern: r#"(?i)(?:no such table: ([\w.]+)|relation "([^"]+)" does not exist|Table '([^']+)' doesn't exist)"#,
        build: |name| {
            let name = name.unwrap_or("?");
            (
                "Table Not Found".into(),
                format!("The table \"{}\" doesn't exist in this problem's schema.", name),
                vec![
                    "Check the spelling of the table name".into(),
                    "Review the problem description for the correct table names".into(),
                ],
                Some("Common tables might be: users, orders, products, etc."),
            )
        },
    },
    Rule {
        kind: "column_not_found",
        pattern: r#"(?i)(?:no such column: ([\w.]+)|column "([^"]+)" does not exist|Unknown column '([^']+)')"#,
        build: |name| {
            let name = name.unwrap_or("?");
            (
                "Column Not Found".into(),
                format!("The column \"{}\" doesn't exist in the tables you're querying.", name),
                vec![
                    "Check the spelling of the column name".into(),
                    "Verify the column exists in the table you're selecting from".into(),
                    "Use table.column format if there's ambiguity".into(),
                ],
                Some("SELECT users.name, orders.total FROM users JOIN orders ..."),
            )
        },
    },
    Rule {
        kind: "incomplete_query",
        pattern: r"(?i)(?:incomplete input|syntax error at end of input)",
        build: |_| {
            (
                "Incomplete Query".into(),
                "Your SQL query appears to be incomplete. The database expected more content.".into(),
                vec![
                    "Make sure all clauses are complete (SELECT, FROM, WHERE, etc.)".into(),
                    "Verify that all parentheses and quotes are properly closed".into(),
                ],
                Some("SELECT * FROM table_name WHERE condition"),
            )
        },
    },
    Rule {
        kind: "syntax_error",
        pattern: r#"(?i)(?:near "([^"]*)": syntax error|syntax error at or near "([^"]*)")"#,
        build: |near| {
            (
                "Syntax Error Found".into(),
                format!(
                    "There's a syntax issue near \"{}\". This usually means a missing comma, parenthesis, or keyword.",
                    near.unwrap_or("")
                ),
                vec![
                    "Check for missing commas between column names".into(),
                    "Ensure all parentheses are properly closed".into(),
                    "Verify that SQL keywords are spelled correctly".into(),
                ],
                Some("SELECT name, age FROM users"),
            )
        },
    },
    Rule {
        kind: "ambiguous_column",
        pattern: r#"(?i)(?:ambiguous column name:? "?([\w.]+)"?|column reference "([^"]+)" is ambiguous)"#,
        build: |name| {
            let name = name.unwrap_or("?");
            (
                "Ambiguous Column Reference".into(),
                format!(
                    "Column \"{}\" exists in multiple tables, making the reference unclear.",
                    name
                ),
                vec![
                    format!("Use table prefixes: table1.{} or table2.{}", name, name),
                    "Give tables aliases for shorter references: SELECT u.name FROM users u".into(),
                ],
                Some("SELECT users.id, orders.id FROM users JOIN orders ON users.id = orders.user_id"),
            )
        },
    },
    Rule {
        kind: "group_by_error",
        pattern: r#"(?i)(?:column "([^"]+)" must appear in the GROUP BY clause|a GROUP BY clause is required before HAVING)"#,
        build: |name| {
            let explanation = match name {
                Some(n) => format!(
                    "When using GROUP BY, every column in SELECT (except aggregates) must be in the GROUP BY clause. Column \"{}\" is missing.",
                    n
                ),
                None => "HAVING filters groups, so the query needs a GROUP BY clause first.".into(),
            };
            (
                "GROUP BY Rule Violation".into(),
                explanation,
                vec![
                    "Only aggregate functions (COUNT, SUM, etc.) can be used without GROUP BY".into(),
                    "Consider if you really need to group by this column".into(),
                ],
                Some("SELECT department, COUNT(*) FROM employees GROUP BY department"),
            )
        },
    },
    Rule {
        kind: "aggregate_in_where",
        pattern: r"(?i)(?:misuse of aggregate|aggregate functions are not allowed in WHERE|Invalid use of group function)",
        build: |_| {
            (
                "Aggregate Function Misplacement".into(),
                "Aggregate functions (COUNT, SUM, AVG, etc.) cannot be used in WHERE clauses.".into(),
                vec![
                    "Use HAVING clause instead of WHERE for aggregate conditions".into(),
                    "Filter individual rows with WHERE, then aggregate with GROUP BY and HAVING".into(),
                ],
                Some("SELECT department, COUNT(*) FROM employees GROUP BY department HAVING COUNT(*) > 5"),
            )
        },
    },
    Rule {
        kind: "division_by_zero",
        pattern: r"(?i)division by zero",
        build: |_| {
            (
                "Division by Zero Error".into(),
                "Your calculation attempted to divide by zero, which is undefined.".into(),
                vec![
                    "Add a WHERE clause to exclude rows where the divisor is zero".into(),
                    "Use NULLIF function: dividend / NULLIF(divisor, 0)".into(),
                ],
                Some("SELECT revenue / NULLIF(cost, 0) AS profit_margin FROM sales"),
            )
        },
    },
];

/// Explains an engine error. `known_names` are the tables and columns in
/// scope; unknown identifiers get the closest one as a suggestion.
pub fn explain(engine_message: &str, sql: &str, known_names: &[String]) -> Feedback {
    for rule in RULES {
        let re = match Regex::new(rule.pattern) {
            Ok(re) => re,
            Err(_) => continue,
        };
        if let Some(caps) = re.captures(engine_message) {
            let subject = caps.iter().skip(1).flatten().next().map(|m| m.as_str());
            let (title, explanation, mut suggestions, example) = (rule.build)(subject);
            if matches!(rule.kind, "table_not_found" | "column_not_found") {
                if let Some(near) = subject.and_then(|s| nearest_name(s, known_names)) {
                    suggestions.insert(0, format!("Did you mean \"{}\"?", near));
                }
            }
            return Feedback {
                kind: rule.kind.to_string(),
                title,
                explanation,
                suggestions,
                example: example.map(str::to_string),
                original_error: engine_message.to_string(),
            };
        }
    }
    generic(engine_message, sql)
}

fn generic(engine_message: &str, sql: &str) -> Feedback {
    let mut suggestions = vec![
        "Check your SQL syntax carefully".to_string(),
        "Verify table and column names are spelled correctly".to_string(),
        "Try breaking down complex queries into smaller parts".to_string(),
    ];
    let upper = sql.to_ascii_uppercase();
    if upper.contains(" JOIN ") && !upper.contains(" ON ") && !upper.contains(" USING") {
        suggestions.push("Make sure your JOINs have proper ON conditions".to_string());
    }
    Feedback {
        kind: "general_error".to_string(),
        title: "SQL Execution Error".to_string(),
        explanation: "Your query encountered an error. Let's figure out what went wrong!".to_string(),
        suggestions,
        example: Some("SELECT columns FROM table WHERE condition".to_string()),
        original_error: engine_message.to_string(),
    }
}

/// Closest known identifier by normalized Levenshtein similarity, if any is
/// reasonably close.
pub fn nearest_name(target: &str, known: &[String]) -> Option<String> {
    let bare = target.rsplit('.').next().unwrap_or(target).to_ascii_lowercase();
    known
        .iter()
        .map(|k| (strsim::normalized_levenshtein(&bare, &k.to_ascii_lowercase()), k))
        .filter(|(score, k)| *score >= 0.5 && !k.eq_ignore_ascii_case(&bare))
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, k)| k.clone())
}

/// Feedback for a query that ran but cannot be graded because the problem
/// has no usable expected output.
pub fn unvalidated(row_count: usize, sql: &str) -> String {
    if row_count == 0 {
        "Query executed successfully but returned no results. Check if this is expected.".to_string()
    } else if sql.to_ascii_lowercase().contains("select *") {
        format!(
            "Query executed successfully and returned {} rows. Note: If this problem requires aggregation or specific columns, consider using GROUP BY, COUNT, AVG, etc. instead of SELECT *.",
            row_count
        )
    } else {
        format!(
            "Query executed successfully and returned {} rows. (Automatic validation not available for this problem yet)",
            row_count
        )
    }
}

/// Appends the display-limit note when rows were cut.
pub fn with_display_note(feedback: String, shown: usize, total: usize) -> String {
    if total > shown {
        format!("{} (Showing first {} of {} rows)", feedback, shown, total)
    } else {
        feedback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_table_suggests_nearest() {
        let known = vec!["customers".to_string(), "orders".to_string(), "id".to_string()];
        let f = explain("no such table: customer", "SELECT * FROM customer", &known);
        assert_eq!(f.kind, "table_not_found");
        assert_eq!(f.suggestions[0], "Did you mean \"customers\"?");
        assert_eq!(f.original_error, "no such table: customer");
    }

    #[test]
    fn syntax_error_names_the_token() {
        let f = explain("near \"FORM\": syntax error", "SELECT * FORM t", &[]);
        assert_eq!(f.kind, "syntax_error");
        assert!(f.explanation.contains("\"FORM\""));
    }

    #[test]
    fn postgres_shapes_are_recognized() {
        let f = explain("column \"nme\" does not exist", "", &["name".to_string()]);
        assert_eq!(f.kind, "column_not_found");
        assert_eq!(f.suggestions[0], "Did you mean \"name\"?");
        assert_eq!(explain("syntax error at end of input", "", &[]).kind, "incomplete_query");
    }

    #[test]
    fn unknown_errors_fall_back_to_generic() {
        let f = explain("disk I/O error", "SELECT * FROM a JOIN b", &[]);
        assert_eq!(f.kind, "general_error");
        assert!(f.suggestions.iter().any(|s| s.contains("ON conditions")));
    }

    #[test]
    fn nearest_name_ignores_distant_names() {
        assert_eq!(nearest_name("zzz", &["customers".to_string()]), None);
        assert_eq!(
            nearest_name("c.nmae", &["name".to_string(), "id".to_string()]),
            Some("name".to_string())
        );
    }

    #[test]
    fn unvalidated_guidance() {
        assert!(unvalidated(0, "SELECT 1").contains("returned no results"));
        assert!(unvalidated(3, "select * from t").contains("instead of SELECT *"));
        assert!(unvalidated(3, "SELECT id FROM t").contains("not available"));
    }

    #[test]
    fn display_note_only_when_truncated() {
        assert_eq!(with_display_note("ok".into(), 5, 5), "ok");
        assert_eq!(
            with_display_note("ok".into(), 1000, 1500),
            "ok (Showing first 1000 of 1500 rows)"
        );
    }
}
