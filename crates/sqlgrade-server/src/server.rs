use crate::cache::CachedProblems;
use crate::config::ServerConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlgrade_core::engine::{
    ExecuteResponse, Executor, Generator, Grader, GraderSettings, SubmitRequest,
};
use sqlgrade_core::errors::GradeError;
use sqlgrade_core::guard::QueryGuard;
use sqlgrade_core::model::{Dialect, ProblemRef};
use sqlgrade_core::sandbox::SandboxPool;
use sqlgrade_core::ProblemStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;

static RID: AtomicU64 = AtomicU64::new(1);

fn next_rid() -> String {
    let n = RID.fetch_add(1, Ordering::Relaxed);
    format!("r-{n:06}")
}

const INVALID_PARAMS: i32 = -32602;
const METHOD_NOT_FOUND: i32 = -32601;
const FORBIDDEN: i32 = -32001;

#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    jsonrpc: String,
    method: String,
    params: Option<Value>,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError { code, message }),
            id,
        }
    }
}

/// Params of `setup` and `regenerate`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProblemParams {
    #[serde(default)]
    problem_id: Option<String>,
    #[serde(default)]
    problem_numeric_id: Option<i64>,
    #[serde(default)]
    dialect: Dialect,
}

impl ProblemParams {
    fn problem(&self) -> Option<ProblemRef> {
        match (&self.problem_id, self.problem_numeric_id) {
            (Some(id), _) if !id.trim().is_empty() => Some(ProblemRef::parse(id)),
            (_, Some(n)) => Some(ProblemRef::Numeric(n)),
            _ => None,
        }
    }
}

pub struct Server {
    cfg: ServerConfig,
    store: ProblemStore,
    problems: Arc<CachedProblems>,
    grader: Grader,
    generator: Generator,
}

impl Server {
    pub fn new(store: ProblemStore, cfg: ServerConfig) -> Result<Self> {
        let pool = SandboxPool::new(cfg.pool_size).context("failed to open sandbox pool")?;
        let executor = Executor::new(pool, cfg.executor());
        let problems = Arc::new(CachedProblems::new(store.clone(), cfg.cache_entries));
        let grader = Grader::new(
            executor.clone(),
            problems.clone(),
            QueryGuard::new(cfg.guard.clone()),
            GraderSettings {
                max_display_rows: cfg.max_display_rows,
                default_policy: cfg.comparison,
            },
        );
        Ok(Self {
            generator: Generator::new(executor),
            cfg,
            store,
            problems,
            grader,
        })
    }

    /// Opens the store named by the config and serves stdin until EOF.
    pub async fn run(cfg: ServerConfig) -> Result<()> {
        let store = ProblemStore::open(&cfg.db)
            .with_context(|| format!("failed to open problem store {}", cfg.db.display()))?;
        store.init_schema()?;
        let server = Self::new(store, cfg)?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();
        while let Some(line) = lines.next_line().await? {
            if let Some(resp) = server.handle_line(&line).await {
                stdout.write_all(resp.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }
        tracing::info!(event = "server_stop");
        Ok(())
    }

    /// One request line in, at most one response line out. Blank lines,
    /// unparseable JSON and notifications get no response.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let rid = next_rid();

        if line.len() > self.cfg.max_msg_bytes {
            tracing::warn!(
                event = "limit_exceeded",
                rid = %rid,
                bytes_in = line.len(),
                max = self.cfg.max_msg_bytes
            );
            let resp = JsonRpcResponse::ok(
                None,
                serde_json::json!({
                    "success": false,
                    "error": format!("message bytes={} > max={}", line.len(), self.cfg.max_msg_bytes),
                    "code": "E_LIMIT_EXCEEDED",
                }),
            );
            return serde_json::to_string(&resp).ok();
        }

        if line.trim().is_empty() {
            return None;
        }

        let req: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(event = "json_parse_error", rid = %rid, error = %e);
                return None;
            }
        };
        if req.method.starts_with("notifications/") {
            tracing::info!(event = "notification", rid = %rid, method = %req.method);
            return None;
        }

        let start = std::time::Instant::now();
        let budget = Duration::from_millis(self.cfg.request_timeout_ms);
        let resp = match timeout(budget, self.dispatch(&req, &rid)).await {
            Ok(resp) => resp,
            Err(_) => {
                tracing::warn!(
                    event = "request_timeout",
                    rid = %rid,
                    method = %req.method,
                    limit_ms = self.cfg.request_timeout_ms
                );
                JsonRpcResponse::ok(
                    req.id.clone(),
                    serde_json::json!({
                        "success": false,
                        "error": format!("Request exceeded {}ms", self.cfg.request_timeout_ms),
                        "code": "E_TIMEOUT",
                    }),
                )
            }
        };
        tracing::info!(
            event = "request_done",
            rid = %rid,
            rpc_id = ?req.id,
            method = %req.method,
            duration_ms = start.elapsed().as_millis() as u64,
            rpc_error = resp.error.is_some()
        );
        serde_json::to_string(&resp).ok()
    }

    async fn dispatch(&self, req: &JsonRpcRequest, rid: &str) -> JsonRpcResponse {
        let id = req.id.clone();
        let params = req.params.clone().unwrap_or(Value::Null);
        match req.method.as_str() {
            "initialize" => JsonRpcResponse::ok(
                id,
                serde_json::json!({
                    "serverInfo": {
                        "name": "sqlgrade-server",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "methods": self.methods(),
                }),
            ),
            "execute" => match serde_json::from_value::<SubmitRequest>(params) {
                Ok(submit) => {
                    let body = ExecuteResponse::from_result(self.grader.submit(&submit).await);
                    JsonRpcResponse::ok(id, to_value(&body))
                }
                Err(e) => JsonRpcResponse::error(id, INVALID_PARAMS, format!("invalid params: {}", e)),
            },
            "setup" => match self.problem_params(params) {
                Ok((problem, dialect)) => JsonRpcResponse::ok(id, self.setup(&problem, dialect).await),
                Err(msg) => JsonRpcResponse::error(id, INVALID_PARAMS, msg),
            },
            "regenerate" => {
                if !self.cfg.allow_admin {
                    tracing::warn!(event = "admin_denied", rid = %rid, method = "regenerate");
                    return JsonRpcResponse::error(
                        id,
                        FORBIDDEN,
                        "admin methods are disabled (set SQLGRADE_ALLOW_ADMIN=1)".to_string(),
                    );
                }
                match self.problem_params(params) {
                    Ok((problem, dialect)) => {
                        JsonRpcResponse::ok(id, self.regenerate(&problem, dialect).await)
                    }
                    Err(msg) => JsonRpcResponse::error(id, INVALID_PARAMS, msg),
                }
            }
            other => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", other)),
        }
    }

    fn methods(&self) -> Vec<&'static str> {
        let mut m = vec!["execute", "setup"];
        if self.cfg.allow_admin {
            m.push("regenerate");
        }
        m
    }

    fn problem_params(&self, params: Value) -> Result<(ProblemRef, Dialect), String> {
        let p: ProblemParams =
            serde_json::from_value(params).map_err(|e| format!("invalid params: {}", e))?;
        let problem = p
            .problem()
            .ok_or_else(|| "invalid params: problemId or problemNumericId is required".to_string())?;
        Ok((problem, p.dialect))
    }

    async fn setup(&self, problem: &ProblemRef, dialect: Dialect) -> Value {
        match self.grader.setup_problem(problem, dialect).await {
            Ok(report) => serde_json::json!({
                "success": true,
                "message": "Problem setup completed",
                "data": report,
            }),
            Err(e) => failure(&e),
        }
    }

    async fn regenerate(&self, problem: &ProblemRef, dialect: Dialect) -> Value {
        match self.generator.regenerate(&self.store, problem, dialect).await {
            Ok(out) => {
                self.problems.invalidate(&out.problem_id, out.dialect);
                serde_json::json!({
                    "success": true,
                    "message": "Expected output regenerated",
                    "data": out,
                })
            }
            Err(e) => {
                tracing::error!(event = "regenerate_failed", problem = %problem, dialect = %dialect, error = %e);
                serde_json::json!({
                    "success": false,
                    "error": e.to_string(),
                    "code": e.code(),
                })
            }
        }
    }
}

/// User-facing failure body. Admin-only details stay in the log.
fn failure(e: &GradeError) -> Value {
    if e.is_admin_only() {
        tracing::error!(event = "admin_error", code = e.code(), error = %e);
    }
    serde_json::json!({
        "success": false,
        "error": e.user_message(),
        "code": e.code(),
    })
}

fn to_value<T: Serialize>(v: &T) -> Value {
    serde_json::to_value(v).unwrap_or_else(|e| {
        serde_json::json!({ "success": false, "error": format!("serialization failed: {}", e) })
    })
}
