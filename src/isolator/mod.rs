use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{DatabaseConfig, Driver};
use crate::executor::{CommandLine, Executor, ExecutorError};
use crate::platform::{self, OsFamily};

pub mod mysql;
pub mod postgres;
pub mod registry;

/// Prefix of every working database name.
pub const SALT: &str = "isolator";

/// Caller supplied key tying a `dump` to its `restore`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsolationId(String);

impl IsolationId {
    pub fn new(id: impl fmt::Display) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IsolationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the database holding the copy for `id`: `isolator_{db_name}_{id}`.
pub fn working_database_name(db_name: &str, id: &IsolationId) -> String {
    format!("{}_{}_{}", SALT, db_name, id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Dump,
    Restore,
    Discard,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Dump => "dump",
            Operation::Restore => "restore",
            Operation::Discard => "discard",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    VerifySource,
    DropStale,
    CreateWorking,
    CopyToWorking,
    VerifyWorking,
    TerminateConnections,
    DropOriginal,
    CreateOriginal,
    CopyToOriginal,
    DropWorking,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::VerifySource => "verify source database",
            Step::DropStale => "drop stale working database",
            Step::CreateWorking => "create working database",
            Step::CopyToWorking => "copy source into working database",
            Step::VerifyWorking => "verify working database",
            Step::TerminateConnections => "terminate open connections",
            Step::DropOriginal => "drop original database",
            Step::CreateOriginal => "create original database",
            Step::CopyToOriginal => "copy working database into original",
            Step::DropWorking => "drop working database",
        })
    }
}

#[derive(Debug, Error)]
pub enum IsolationError {
    /// A command exited unsuccessfully. Steps in `completed` already ran and
    /// their effects were not undone.
    #[error("{operation} failed at step '{step}': {source}")]
    CommandFailed {
        operation: Operation,
        step: Step,
        completed: Vec<Step>,
        #[source]
        source: ExecutorError,
    },
    #[error("no isolator supports driver '{driver}' on {os}")]
    Unsupported { driver: Driver, os: OsFamily },
    #[error("invalid database configuration for '{0}'")]
    InvalidConfiguration(String),
}

/// One command of an operation, tagged with the step it performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub step: Step,
    pub command: CommandLine,
}

impl PlannedStep {
    pub fn new(step: Step, command: impl Into<CommandLine>) -> Self {
        Self { step, command: command.into() }
    }
}

/// An engine specific way of copying a database aside and back.
///
/// Implementations only build command plans; the provided `dump`, `restore`
/// and `discard` run them in order and stop at the first failure. Callers must
/// check [`DatabaseIsolator::is_configuration_supported`] first; running a plan
/// for an unsupported configuration has no defined outcome.
pub trait DatabaseIsolator: Send + Sync {
    fn name(&self) -> &'static str;

    fn supported_os(&self) -> &'static [OsFamily];

    fn supported_drivers(&self) -> &'static [Driver];

    fn executor(&self) -> &dyn Executor;

    fn dump_plan(&self, id: &IsolationId, config: &DatabaseConfig) -> Vec<PlannedStep>;

    fn restore_plan(&self, id: &IsolationId, config: &DatabaseConfig) -> Vec<PlannedStep>;

    fn discard_plan(&self, id: &IsolationId, config: &DatabaseConfig) -> Vec<PlannedStep>;

    fn is_configuration_supported(&self, config: &DatabaseConfig) -> bool {
        is_configuration_supported(self, config, platform::current_os())
    }

    /// Copy `config.db_name` into the working database for `id`.
    fn dump(&self, id: &IsolationId, config: &DatabaseConfig) -> Result<(), IsolationError> {
        run_plan(self.executor(), Operation::Dump, self.dump_plan(id, config))?;
        info!(
            isolator = self.name(),
            source = %config.db_name,
            working = %working_database_name(&config.db_name, id),
            "dump complete"
        );
        Ok(())
    }

    /// Replace `config.db_name` with the working database for `id`, then drop
    /// the working database.
    fn restore(&self, id: &IsolationId, config: &DatabaseConfig) -> Result<(), IsolationError> {
        run_plan(self.executor(), Operation::Restore, self.restore_plan(id, config))?;
        info!(
            isolator = self.name(),
            original = %config.db_name,
            working = %working_database_name(&config.db_name, id),
            "restore complete"
        );
        Ok(())
    }

    /// Drop a leftover working database without touching the original.
    fn discard(&self, id: &IsolationId, config: &DatabaseConfig) -> Result<(), IsolationError> {
        run_plan(self.executor(), Operation::Discard, self.discard_plan(id, config))?;
        info!(
            isolator = self.name(),
            working = %working_database_name(&config.db_name, id),
            "working database discarded"
        );
        Ok(())
    }
}

/// True iff the configuration is valid and both its driver and `os` are
/// declared by the isolator.
pub fn is_configuration_supported<I>(isolator: &I, config: &DatabaseConfig, os: OsFamily) -> bool
where
    I: DatabaseIsolator + ?Sized,
{
    config.is_valid()
        && isolator.supported_drivers().contains(&config.driver)
        && isolator.supported_os().contains(&os)
}

/// Execute `plan` in order, stopping at the first failing command.
pub fn run_plan(
    executor: &dyn Executor,
    operation: Operation,
    plan: Vec<PlannedStep>,
) -> Result<(), IsolationError> {
    let mut completed = Vec::with_capacity(plan.len());
    for PlannedStep { step, command } in plan {
        debug!(%operation, %step, "running step");
        if let Err(source) = executor.execute(&command) {
            warn!(%operation, %step, error = %source, "step failed");
            return Err(IsolationError::CommandFailed { operation, step, completed, source });
        }
        completed.push(step);
    }
    Ok(())
}

/// Connection parameters after engine defaults have been applied.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct Connection {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

pub(crate) const DEFAULT_HOST: &str = "127.0.0.1";

impl Connection {
    /// Empty strings and a zero port count as unset.
    pub fn resolve(config: &DatabaseConfig, default_user: &str, default_port: u16) -> Self {
        let filled = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);
        Self {
            user: filled(&config.user).unwrap_or_else(|| default_user.to_string()),
            host: filled(&config.host).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: config.port.filter(|p| *p != 0).unwrap_or(default_port),
            password: filled(&config.password),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Invocation;
    use super::testing::RecordingExecutor;

    #[test]
    fn working_name_is_deterministic() {
        let id = IsolationId::new(42);
        let a = working_database_name("shop", &id);
        let b = working_database_name("shop", &IsolationId::new("42"));
        assert_eq!(a, "isolator_shop_42");
        assert_eq!(a, b);
        assert_ne!(a, working_database_name("shop", &IsolationId::new(43)));
        assert_ne!(a, working_database_name("shops", &id));
    }

    #[test]
    fn run_plan_stops_at_first_failure() {
        let exec = RecordingExecutor::failing_at(2);
        let plan = vec![
            PlannedStep::new(Step::VerifySource, Invocation::new("one")),
            PlannedStep::new(Step::DropStale, Invocation::new("two")),
            PlannedStep::new(Step::CreateWorking, Invocation::new("three")),
        ];

        let err = run_plan(&exec, Operation::Dump, plan).unwrap_err();
        match err {
            IsolationError::CommandFailed { operation, step, completed, .. } => {
                assert_eq!(operation, Operation::Dump);
                assert_eq!(step, Step::DropStale);
                assert_eq!(completed, vec![Step::VerifySource]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(exec.rendered(), vec!["one", "two"]);
    }

    #[test]
    fn connection_defaults_replace_empty_values() {
        let mut cfg = DatabaseConfig::new(Driver::PdoMysql, "shop");
        cfg.user = Some(String::new());
        cfg.port = Some(0);
        let conn = Connection::resolve(&cfg, "root", 3306);
        assert_eq!(conn.user, "root");
        assert_eq!(conn.host, "127.0.0.1");
        assert_eq!(conn.port, 3306);
        assert!(conn.password.is_none());
    }

    #[test]
    fn connection_keeps_explicit_values() {
        let cfg = DatabaseConfig::new(Driver::PdoPgsql, "app")
            .with_user("ci")
            .with_host("db")
            .with_port(6543)
            .with_password("pw");
        let conn = Connection::resolve(&cfg, "postgres", 5432);
        assert_eq!(conn.user, "ci");
        assert_eq!(conn.host, "db");
        assert_eq!(conn.port, 6543);
        assert_eq!(conn.password.as_deref(), Some("pw"));
    }
}
