use crate::compare::Mismatch;
use crate::engine::{AuditReport, AuditStatus, ExecutionData, GeneratedOutput, Rejection};
use crate::sandbox::SetupReport;

const PREVIEW_ROWS: usize = 20;

pub fn print_execution(data: &ExecutionData) {
    eprintln!();
    if !data.columns.is_empty() {
        eprintln!("  {}", data.columns.join(" | "));
        for row in data.rows.iter().take(PREVIEW_ROWS) {
            let cells: Vec<String> = data
                .columns
                .iter()
                .map(|c| match row.get(c) {
                    Some(serde_json::Value::Null) | None => "NULL".to_string(),
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(v) => v.to_string(),
                })
                .collect();
            eprintln!("  {}", cells.join(" | "));
        }
        if data.row_count > PREVIEW_ROWS {
            eprintln!("  ... {} more rows", data.row_count - PREVIEW_ROWS);
        }
    }
    eprintln!("  ({} rows, {}ms)", data.row_count, data.execution_time);

    let icon = match data.is_correct {
        Some(true) => "✅",
        Some(false) => "❌",
        None => "ℹ️ ",
    };
    eprintln!("\n{} {}", icon, data.feedback);

    if let Some(Mismatch::Rows { missing, unexpected }) =
        data.verdict.as_ref().and_then(|v| v.mismatch.as_ref())
    {
        for r in missing.iter().take(5) {
            eprintln!("      missing:    {}", r.to_json());
        }
        for r in unexpected.iter().take(5) {
            eprintln!("      unexpected: {}", r.to_json());
        }
    }
    if let Some(e) = &data.integrity {
        eprintln!("   ⚠️  admin: {}", e);
    }
}

pub fn print_rejection(r: &Rejection) {
    eprintln!("💥 [{}] {}", r.error.code(), r.error.user_message());
    if r.error.is_admin_only() {
        eprintln!("    detail: {}", r.error);
    }
    if let crate::errors::GradeError::QueryRejected { reasons } = &r.error {
        for reason in reasons {
            eprintln!("    → {}", reason);
        }
    }
    if let Some(f) = &r.feedback {
        eprintln!("\n  {}: {}", f.title, f.explanation);
        for s in &f.suggestions {
            eprintln!("    • {}", s);
        }
        if let Some(ex) = &f.example {
            eprintln!("    e.g. {}", ex);
        }
    }
}

pub fn print_setup(report: &SetupReport) {
    eprintln!(
        "Setup applied on {} ({} statements, {}ms)",
        report.namespace, report.statements, report.elapsed_ms
    );
    for t in &report.tables {
        eprintln!("  {:<24} {:>6} rows", t.name, t.rows);
    }
}

pub fn print_generated(out: &GeneratedOutput, persisted: bool) {
    let verb = if persisted { "Stored" } else { "Generated" };
    eprintln!(
        "✅ {} expected output for {} [{}]: {} rows, fingerprint {}",
        verb,
        out.problem_id,
        out.dialect,
        out.rows,
        &out.fingerprint[..out.fingerprint.len().min(12)]
    );
}

pub fn print_audit(report: &AuditReport) {
    eprintln!("\nAuditing {} schemas...", report.entries.len());
    for e in &report.entries {
        let label = format!("{} [{}]", e.problem_id, e.dialect);
        let icon = match (e.status, e.repaired) {
            (AuditStatus::Ok, _) => "✅",
            (_, true) => "🔧",
            (AuditStatus::Stale, _) | (AuditStatus::MissingExpected, _) => "⚠️ ",
            _ => "❌",
        };
        let repaired = if e.repaired { " (repaired)" } else { "" };
        eprintln!("{} {:<32} {}{}", icon, label, e.status.as_str(), repaired);
        if let Some(msg) = &e.message {
            eprintln!("      → {}", msg);
        }
    }

    eprintln!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!(
        "Summary: {} ok, {} stale, {} missing, {} malformed, {} empty, {} setup failed, {} solution failed, {} timeout",
        report.count(AuditStatus::Ok),
        report.count(AuditStatus::Stale),
        report.count(AuditStatus::MissingExpected),
        report.count(AuditStatus::MalformedExpected),
        report.count(AuditStatus::EmptyResult),
        report.count(AuditStatus::SetupFailed),
        report.count(AuditStatus::SolutionFailed),
        report.count(AuditStatus::Timeout),
    );
}
