pub mod schema;
pub mod store;

pub use store::{AuditRecord, ProblemStore, StoreStats};
