pub mod catalog;
pub mod compare;
pub mod config;
pub mod engine;
pub mod errors;
pub mod expected;
pub mod feedback;
pub mod fingerprint;
pub mod guard;
pub mod model;
pub mod normalize;
pub mod report;
pub mod sandbox;
pub mod source;
pub mod storage;

pub use engine::{Executor, Generator, Grader};
pub use errors::{ConfigError, DataIntegrityError, GradeError, SetupError};
pub use storage::ProblemStore;
