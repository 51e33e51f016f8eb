use std::fmt;
use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' exited with {}: {stderr}", exit_code_label(.code))]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("i/o error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {}", c),
        None => "a signal".to_string(),
    }
}

/// One external program call. Environment entries apply to this process only.
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new(), env: Vec::new() }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

// Environment values are credentials; only their names are shown.
impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &keys)
            .finish()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote(&self.program))?;
        for a in &self.args {
            write!(f, " {}", quote(a))?;
        }
        Ok(())
    }
}

fn quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

/// A command as handed to an [`Executor`]: a single program, or a producer
/// whose stdout streams straight into a consumer's stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    Single(Invocation),
    Pipe(Invocation, Invocation),
}

impl CommandLine {
    pub fn invocations(&self) -> Vec<&Invocation> {
        match self {
            CommandLine::Single(i) => vec![i],
            CommandLine::Pipe(p, c) => vec![p, c],
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandLine::Single(i) => write!(f, "{}", i),
            CommandLine::Pipe(p, c) => write!(f, "{} | {}", p, c),
        }
    }
}

impl From<Invocation> for CommandLine {
    fn from(inv: Invocation) -> Self {
        CommandLine::Single(inv)
    }
}

pub trait Executor: Send + Sync {
    /// Run the command to completion. Any non-zero exit is an error.
    fn execute(&self, command: &CommandLine) -> Result<(), ExecutorError>;
}

/// Runs commands as child processes of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

impl Executor for ProcessExecutor {
    fn execute(&self, command: &CommandLine) -> Result<(), ExecutorError> {
        debug!(command = %command, "executing");
        match command {
            CommandLine::Single(inv) => {
                let output = inv
                    .to_command()
                    .stdin(Stdio::null())
                    .output()
                    .map_err(|source| ExecutorError::Spawn { program: inv.program.clone(), source })?;
                check(inv, output.status, &output.stderr)
            }
            CommandLine::Pipe(producer, consumer) => run_pipe(producer, consumer),
        }
    }
}

fn run_pipe(producer: &Invocation, consumer: &Invocation) -> Result<(), ExecutorError> {
    let mut child = producer
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ExecutorError::Spawn { program: producer.program.clone(), source })?;

    let stdout = child.stdout.take().ok_or_else(|| ExecutorError::Io {
        program: producer.program.clone(),
        source: std::io::Error::other("producer stdout was not captured"),
    })?;

    // Drained concurrently; a full stderr pipe would otherwise block the
    // producer before it closes stdout and the consumer would never see EOF.
    let stderr_reader = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    });

    let consumed = consumer
        .to_command()
        .stdin(Stdio::from(stdout))
        .stdout(Stdio::null())
        .output();

    // Reap the producer even if the consumer could not be started.
    let produced = child
        .wait()
        .map_err(|source| ExecutorError::Io { program: producer.program.clone(), source })?;
    let producer_stderr = stderr_reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    let consumed = consumed
        .map_err(|source| ExecutorError::Spawn { program: consumer.program.clone(), source })?;

    // A consumer that gives up closes the pipe and the producer then dies of
    // SIGPIPE, so the consumer's failure is the one that names the cause.
    check(consumer, consumed.status, &consumed.stderr)?;
    check(producer, produced, &producer_stderr)
}

fn check(inv: &Invocation, status: ExitStatus, stderr: &[u8]) -> Result<(), ExecutorError> {
    if status.success() {
        return Ok(());
    }
    Err(ExecutorError::Exit {
        program: inv.program.clone(),
        code: status.code(),
        stderr: String::from_utf8_lossy(stderr).trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_only_when_needed() {
        let inv = Invocation::new("mysql")
            .args(["-u", "root", "-e", "USE `shop`;"])
            .env("MYSQL_PWD", "secret");
        assert_eq!(inv.to_string(), "mysql -u root -e \"USE `shop`;\"");
    }

    #[test]
    fn debug_hides_env_values() {
        let inv = Invocation::new("psql").env("PGPASSWORD", "secret");
        let out = format!("{:?}", inv);
        assert!(out.contains("PGPASSWORD"));
        assert!(!out.contains("secret"));
    }

    #[test]
    fn pipe_renders_with_bar() {
        let cmd = CommandLine::Pipe(Invocation::new("a").arg("x"), Invocation::new("b").arg("y"));
        assert_eq!(cmd.to_string(), "a x | b y");
        assert_eq!(cmd.invocations().len(), 2);
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let cmd = CommandLine::from(Invocation::new("isolator-test-no-such-binary"));
        let err = ProcessExecutor.execute(&cmd).unwrap_err();
        assert!(matches!(err, ExecutorError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_reported() {
        let cmd = CommandLine::from(Invocation::new("sh").args(["-c", "echo boom >&2; exit 3"]));
        match ProcessExecutor.execute(&cmd).unwrap_err() {
            ExecutorError::Exit { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn env_is_scoped_to_the_child() {
        let cmd = CommandLine::from(
            Invocation::new("sh")
                .args(["-c", "test \"$ISOLATOR_TEST_SECRET\" = s3cret"])
                .env("ISOLATOR_TEST_SECRET", "s3cret"),
        );
        ProcessExecutor.execute(&cmd).unwrap();
        assert!(std::env::var("ISOLATOR_TEST_SECRET").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn pipe_streams_producer_into_consumer() {
        let cmd = CommandLine::Pipe(
            Invocation::new("sh").args(["-c", "echo payload"]),
            Invocation::new("sh").args(["-c", "grep -q payload"]),
        );
        ProcessExecutor.execute(&cmd).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn failing_producer_fails_the_pipe() {
        let cmd = CommandLine::Pipe(
            Invocation::new("sh").args(["-c", "exit 1"]),
            Invocation::new("sh").args(["-c", "cat > /dev/null"]),
        );
        let err = ProcessExecutor.execute(&cmd).unwrap_err();
        assert!(matches!(err, ExecutorError::Exit { code: Some(1), .. }));
    }

    #[cfg(unix)]
    #[test]
    fn chatty_producer_does_not_stall_the_pipe() {
        let cmd = CommandLine::Pipe(
            Invocation::new("sh").args(["-c", "head -c 200000 /dev/zero | tr '\\0' x >&2; echo data"]),
            Invocation::new("sh").args(["-c", "grep -q data"]),
        );
        let (tx, rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(ProcessExecutor.execute(&cmd));
        });
        let result = rx
            .recv_timeout(std::time::Duration::from_secs(30))
            .expect("pipe did not finish within 30s");
        result.unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn missing_consumer_is_named_in_the_error() {
        let cmd = CommandLine::Pipe(
            Invocation::new("sh").args(["-c", "yes line | head -c 5000000"]),
            Invocation::new("isolator-test-no-such-consumer"),
        );
        match ProcessExecutor.execute(&cmd).unwrap_err() {
            ExecutorError::Spawn { program, .. } => assert_eq!(program, "isolator-test-no-such-consumer"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn failing_consumer_is_reported_over_broken_producer() {
        let cmd = CommandLine::Pipe(
            Invocation::new("sh").args(["-c", "yes line | head -c 5000000"]),
            Invocation::new("sh").args(["-c", "echo 'ERROR: relation exists' >&2; exit 3"]),
        );
        match ProcessExecutor.execute(&cmd).unwrap_err() {
            ExecutorError::Exit { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "ERROR: relation exists");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
