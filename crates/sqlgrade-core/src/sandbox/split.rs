/// Splits a script into statements on `;`, ignoring semicolons inside
/// quoted strings, quoted identifiers and comments. Empty statements and
/// comment-only fragments are dropped. Trailing whitespace is trimmed.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut has_code = false;
    let mut chars = script.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                has_code = true;
                cur.push(c);
                while let Some(n) = chars.next() {
                    cur.push(n);
                    if n == c {
                        // doubled quote is an escape
                        if chars.peek() == Some(&c) {
                            if let Some(esc) = chars.next() {
                                cur.push(esc);
                            }
                            continue;
                        }
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        cur.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
                cur.push(' ');
            }
            ';' => {
                if has_code {
                    out.push(cur.trim().to_string());
                }
                cur.clear();
                has_code = false;
            }
            _ => {
                if !c.is_whitespace() {
                    has_code = true;
                }
                cur.push(c);
            }
        }
    }
    if has_code {
        out.push(cur.trim().to_string());
    }
    out
}

/// First `max` characters of a statement on one line, for error context.
pub fn excerpt(stmt: &str, max: usize) -> String {
    let flat: String = stmt.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max {
        let cut: String = flat.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_semicolons_outside_literals() {
        let s = "CREATE TABLE t(x text);\nINSERT INTO t VALUES ('a;b'), ('it''s');\n-- done;\n";
        let stmts = split_statements(s);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[1], "INSERT INTO t VALUES ('a;b'), ('it''s')");
    }

    #[test]
    fn drops_comment_only_fragments() {
        let s = "/* header; */ SELECT 1; -- trailing\n ; ";
        assert_eq!(split_statements(s), vec!["SELECT 1".to_string()]);
    }

    #[test]
    fn keeps_last_statement_without_semicolon() {
        assert_eq!(split_statements("SELECT 1; SELECT 2").len(), 2);
    }

    #[test]
    fn excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("INSERT  INTO\n t", 80), "INSERT INTO t");
        assert_eq!(excerpt("abcdef", 3), "abc...");
    }
}
