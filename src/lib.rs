//! Disposable copies of MySQL and PostgreSQL databases for test runs.
//!
//! `dump` copies a database into a working database named
//! `isolator_{db_name}_{id}`; `restore` copies it back over the original and
//! drops it. Both shell out to the engine's own client tools.

pub mod cli;
pub mod config;
pub mod executor;
pub mod isolator;
pub mod ops;
pub mod platform;

pub use config::{Binaries, DatabaseConfig, Driver, IsolatorConfig};
pub use executor::{CommandLine, Executor, ExecutorError, Invocation, ProcessExecutor};
pub use isolator::registry::IsolatorRegistry;
pub use isolator::{working_database_name, DatabaseIsolator, IsolationError, IsolationId, Step};
pub use platform::OsFamily;
