pub mod audit;
pub mod executor;
pub mod generator;
pub mod grader;

pub use audit::{run_audit, AuditEntry, AuditOptions, AuditReport, AuditStatus};
pub use executor::{Executor, ExecutorSettings, Session};
pub use generator::{GeneratedOutput, Generator};
pub use grader::{ExecuteResponse, ExecutionData, Grader, GraderSettings, Rejection, SubmitRequest};
