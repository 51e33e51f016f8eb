use std::sync::Arc;

use super::{working_database_name, Connection, DatabaseIsolator, IsolationId, PlannedStep, Step};
use crate::config::{Binaries, DatabaseConfig, Driver};
use crate::executor::{CommandLine, Executor, Invocation};
use crate::platform::OsFamily;

pub const DEFAULT_USER: &str = "root";
pub const DEFAULT_PORT: u16 = 3306;
const PASSWORD_ENV: &str = "MYSQL_PWD";

/// Isolator for MySQL-protocol servers driven through the `mysql` and
/// `mysqldump` clients.
pub struct MySqlIsolator {
    executor: Arc<dyn Executor>,
    mysql_bin: String,
    mysqldump_bin: String,
}

impl MySqlIsolator {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self::with_binaries(executor, &Binaries::default())
    }

    pub fn with_binaries(executor: Arc<dyn Executor>, binaries: &Binaries) -> Self {
        Self {
            executor,
            mysql_bin: binaries.mysql.clone(),
            mysqldump_bin: binaries.mysqldump.clone(),
        }
    }

    fn connect(&self, program: &str, conn: &Connection) -> Invocation {
        let inv = Invocation::new(program).args([
            "-u".to_string(),
            conn.user.clone(),
            "-h".to_string(),
            conn.host.clone(),
            "--port".to_string(),
            conn.port.to_string(),
        ]);
        match &conn.password {
            Some(pw) => inv.env(PASSWORD_ENV, pw),
            None => inv,
        }
    }

    fn query(&self, conn: &Connection, sql: String) -> CommandLine {
        self.connect(&self.mysql_bin, conn).args(["-e".to_string(), sql]).into()
    }

    fn verify(&self, conn: &Connection, db: &str) -> CommandLine {
        self.query(conn, format!("USE {};", quote_identifier(db)))
    }

    fn drop_database(&self, conn: &Connection, db: &str) -> CommandLine {
        self.query(conn, format!("DROP DATABASE IF EXISTS {};", quote_identifier(db)))
    }

    fn create_database(&self, conn: &Connection, db: &str) -> CommandLine {
        self.query(conn, format!("CREATE DATABASE {};", quote_identifier(db)))
    }

    fn copy(&self, conn: &Connection, from: &str, to: &str) -> CommandLine {
        CommandLine::Pipe(
            self.connect(&self.mysqldump_bin, conn).arg(from),
            self.connect(&self.mysql_bin, conn).arg(to),
        )
    }
}

/// Backtick-quote an identifier for use inside SQL text.
fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

impl DatabaseIsolator for MySqlIsolator {
    fn name(&self) -> &'static str { "mysql" }

    fn supported_os(&self) -> &'static [OsFamily] {
        &[OsFamily::Windows, OsFamily::Linux]
    }

    fn supported_drivers(&self) -> &'static [Driver] {
        &[Driver::PdoMysql]
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
            PlannedStep::new(Step::DropOriginal, self.drop_database(&conn, original)),
            PlannedStep::new(Step::CreateOriginal, self.create_database(&conn, original)),
            PlannedStep::new(Step::CopyToOriginal, self.copy(&conn, &working, original)),
            PlannedStep::new(Step::DropWorking, self.drop_database(&conn, &working)),
        ]
    }

    fn discard_plan(&self, id: &IsolationId, config: &DatabaseConfig) -> Vec<PlannedStep> {
        let conn = Connection::resolve(config, DEFAULT_USER, DEFAULT_PORT);
        let working = working_database_name(&config.db_name, id);
        vec![PlannedStep::new(Step::DropWorking, self.drop_database(&conn, &working))]
    }
}
