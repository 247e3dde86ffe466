use sha2::{Digest, Sha256};

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Identity of a schema's inputs. Changing setup, seed or solution SQL
/// changes the fingerprint, which is how audit spots hand-edited rows.
pub struct Context<'a> {
    pub problem_id: &'a str,
    pub dialect: &'a str,
    pub setup_sql: &'a str,
    pub sample_data: Option<&'a str>,
    pub solution_sql: &'a str,
}

pub fn compute_inputs(ctx: Context<'_>) -> String {
    let parts = [
        format!("problem={}", ctx.problem_id),
        format!("dialect={}", ctx.dialect),
        format!("setup={}", ctx.setup_sql.trim()),
        format!("sample={}", ctx.sample_data.unwrap_or("").trim()),
        format!("solution={}", ctx.solution_sql.trim()),
        format!("sqlgrade_version={}", env!("CARGO_PKG_VERSION")),
    ];
    sha256_hex(&parts.join("\n"))
}
