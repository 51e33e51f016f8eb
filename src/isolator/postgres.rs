use std::sync::Arc;

use super::{working_database_name, Connection, DatabaseIsolator, IsolationId, PlannedStep, Step};
use crate::config::{Binaries, DatabaseConfig, Driver};
use crate::executor::{CommandLine, Executor, Invocation};
use crate::platform::OsFamily;

pub const DEFAULT_USER: &str = "postgres";
pub const DEFAULT_PORT: u16 = 5432;
const PASSWORD_ENV: &str = "PGPASSWORD";
const MAINTENANCE_DB: &str = "template1";

/// Isolator for PostgreSQL servers driven through `psql`, `pg_dump`,
/// `createdb` and `dropdb`.
///
/// Postgres refuses to drop a database with open sessions, so every plan
/// terminates them before a drop.
pub struct PostgresIsolator {
    executor: Arc<dyn Executor>,
    psql_bin: String,
    pg_dump_bin: String,
    createdb_bin: String,
    dropdb_bin: String,
}

impl PostgresIsolator {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self::with_binaries(executor, &Binaries::default())
    }

    pub fn with_binaries(executor: Arc<dyn Executor>, binaries: &Binaries) -> Self {
        Self {
            executor,
            psql_bin: binaries.psql.clone(),
            pg_dump_bin: binaries.pg_dump.clone(),
            createdb_bin: binaries.createdb.clone(),
            dropdb_bin: binaries.dropdb.clone(),
        }
    }

    fn connect(&self, program: &str, conn: &Connection) -> Invocation {
        self.connect_with(program, &[], conn)
    }

    /// `leading` goes before the connection flags.
    fn connect_with(&self, program: &str, leading: &[&str], conn: &Connection) -> Invocation {
        let inv = Invocation::new(program).args(leading.iter().copied()).args([
            "-U".to_string(),
            conn.user.clone(),
            "-h".to_string(),
            conn.host.clone(),
            "-p".to_string(),
            conn.port.to_string(),
        ]);
        match &conn.password {
            Some(pw) => inv.env(PASSWORD_ENV, pw),
            None => inv,
        }
    }

    fn verify(&self, conn: &Connection, db: &str) -> CommandLine {
        self.connect(&self.psql_bin, conn)
            .args(["-d", db, "-c", "SELECT 1;"])
            .into()
    }

    fn terminate_connections(&self, conn: &Connection, databases: &[&str]) -> CommandLine {
        let names: Vec<String> = databases.iter().map(|d| quote_literal(d)).collect();
        let sql = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname IN ({}) AND pid <> pg_backend_pid();",
            names.join(", ")
        );
        self.connect(&self.psql_bin, conn)
            .args(["-d", MAINTENANCE_DB, "-t", "-c"])
            .arg(sql)
            .into()
    }

    fn drop_database(&self, conn: &Connection, db: &str) -> CommandLine {
        self.connect_with(&self.dropdb_bin, &["--if-exists"], conn)
            .arg(db)
            .into()
    }

    fn create_database(&self, conn: &Connection, db: &str) -> CommandLine {
        self.connect(&self.createdb_bin, conn)
            .args(["-O", conn.user.as_str(), db])
            .into()
    }

    fn copy(&self, conn: &Connection, from: &str, to: &str) -> CommandLine {
        CommandLine::Pipe(
            self.connect(&self.pg_dump_bin, conn).args(["--no-owner", from]),
            self.connect(&self.psql_bin, conn)
                .args(["-q", "-v", "ON_ERROR_STOP=1", "-d", to]),
        )
    }
}

/// Single-quote a string literal for use inside SQL text.
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl DatabaseIsolator for PostgresIsolator {
    fn name(&self) -> &'static str { "postgres" }

    fn supported_os(&self) -> &'static [OsFamily] {
        &[OsFamily::Windows, OsFamily::Linux]
    }

    fn supported_drivers(&self) -> &'static [Driver] {
        &[Driver::PdoPgsql]
    }

    fn executor(&self) -> &dyn Executor {
        self.executor.as_ref()
    }

    fn dump_plan(&self, id: &IsolationId, config: &DatabaseConfig) -> Vec<PlannedStep> {
        let conn = Connection::resolve(config, DEFAULT_USER, DEFAULT_PORT);
        let source = config.db_name.as_str();
        let working = working_database_name(source, id);
        vec![
            PlannedStep::new(Step::VerifySource, self.verify(&conn, source)),
            PlannedStep::new(Step::TerminateConnections, self.terminate_connections(&conn, &[working.as_str()])),
            PlannedStep::new(Step::DropStale, self.drop_database(&conn, &working)),
            PlannedStep::new(Step::CreateWorking, self.create_database(&conn, &working)),
            PlannedStep::new(Step::CopyToWorking, self.copy(&conn, source, &working)),
        ]
    }

    fn restore_plan(&self, id: &IsolationId, config: &DatabaseConfig) -> Vec<PlannedStep> {
        let conn = Connection::resolve(config, DEFAULT_USER, DEFAULT_PORT);
        let original = config.db_name.as_str();
        let working = working_database_name(original, id);
        vec![
            PlannedStep::new(Step::VerifyWorking, self.verify(&conn, &working)),
            PlannedStep::new(
                Step::TerminateConnections,
                self.terminate_connections(&conn, &[working.as_str(), original]),
            ),
            PlannedStep::new(Step::DropOriginal, self.drop_database(&conn, original)),
            PlannedStep::new(Step::CreateOriginal, self.create_database(&conn, original)),
            PlannedStep::new(Step::CopyToOriginal, self.copy(&conn, &working, original)),
            PlannedStep::new(Step::DropWorking, self.drop_database(&conn, &working)),
        ]
    }

    fn discard_plan(&self, id: &IsolationId, config: &DatabaseConfig) -> Vec<PlannedStep> {
        let conn = Connection::resolve(config, DEFAULT_USER, DEFAULT_PORT);
        let working = working_database_name(&config.db_name, id);
        vec![
            PlannedStep::new(Step::TerminateConnections, self.terminate_connections(&conn, &[working.as_str()])),
            PlannedStep::new(Step::DropWorking, self.drop_database(&conn, &working)),
        ]
    }
}
