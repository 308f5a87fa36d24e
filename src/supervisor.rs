//! Runs the scraper as a child process and restarts it until it finishes cleanly.
//!
//! A run counts as failed when the child exits with a non-zero status or when any
//! line of its output contains one of the configured failure signatures. That last
//! check is a plain case-insensitive substring match: a record whose own text happens
//! to contain e.g. "timeout" would also fail the run.
//!
//! Failed runs are restarted after a fixed delay. The supervisor gives up when
//! failures cluster too densely in time (the circuit breaker) or when the restart
//! budget runs out.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::Command,
};

use crate::config::SupervisorConfig;
use crate::{Error, Result};

/// Trips once `max_failures` failures fall inside the trailing `window`.
#[derive(Debug)]
pub struct CircuitBreaker {
    max_failures: usize,
    window: TimeDelta,
    failures: VecDeque<DateTime<Local>>,
}

impl CircuitBreaker {
    pub fn new(max_failures: usize, window: TimeDelta) -> Self {
        Self {
            max_failures: max_failures.max(1),
            window,
            failures: VecDeque::new(),
        }
    }

    /// Records a failure at `at` and returns how many failures are inside the
    /// window ending at `at`, or `None` while the breaker stays closed.
    pub fn record_failure(&mut self, at: DateTime<Local>) -> Option<usize> {
        self.failures.push_back(at);
        // Aged-out failures can never count again.
        while let Some(oldest) = self.failures.front() {
            if at - *oldest > self.window {
                self.failures.pop_front();
            } else {
                break;
            }
        }

        let recent = self.failures.len();
        (recent >= self.max_failures).then_some(recent)
    }
}

/// Why a single run of the child was judged failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    ExitStatus(Option<i32>),
    Signature(String),
    Spawn(String),
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(FailureCause),
}

/// How supervision ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Succeeded,
    CircuitOpen,
    RestartsExhausted,
}

impl Verdict {
    pub fn exit_code(self) -> u8 {
        match self {
            Verdict::Succeeded => 0,
            Verdict::CircuitOpen | Verdict::RestartsExhausted => 1,
        }
    }
}

/// Finds the first configured signature contained in `line`, ignoring case.
#[derive(Debug, Clone)]
pub struct SignatureMatcher {
    patterns: Vec<(String, String)>,
}

impl SignatureMatcher {
    pub fn new(signatures: &[String]) -> Self {
        let patterns = signatures
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| (s.clone(), s.to_lowercase()))
            .collect();
        Self { patterns }
    }

    pub fn find(&self, line: &str) -> Option<&str> {
        let line = line.to_lowercase();
        self.patterns
            .iter()
            .find(|(_, lowered)| line.contains(lowered.as_str()))
            .map(|(original, _)| original.as_str())
    }
}

/// Decides the outcome of a finished run from its exit status and the first
/// signature seen in its output.
pub fn classify(status: ExitStatus, signature: Option<String>) -> AttemptOutcome {
    if let Some(signature) = signature {
        return AttemptOutcome::Failed(FailureCause::Signature(signature));
    }
    if !status.success() {
        return AttemptOutcome::Failed(FailureCause::ExitStatus(status.code()));
    }
    AttemptOutcome::Succeeded
}

/// Supervisor transcript: every line goes to the console and is appended to the log.
pub struct Transcript {
    file: File,
}

impl Transcript {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self { file })
    }

    /// Supervisor's own message, stamped with local time.
    pub async fn note(&mut self, message: &str) -> Result<()> {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        self.echo(&format!("[{stamp}] {message}")).await
    }

    /// A line passed through verbatim, used for the child's output.
    pub async fn echo(&mut self, line: &str) -> Result<()> {
        println!("{line}");
        self.file.write_all(line.as_bytes()).await?;
        self.file.write_all(b"\n").await?;
        self.file.flush().await?;
        Ok(())
    }
}

/// The command line of the supervised child.
#[derive(Debug, Clone)]
pub struct ChildCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ChildCommand {
    /// This same executable re-invoked with the `run` subcommand.
    pub fn current_exe_run(config_path: &Path) -> Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: vec![
                "--config".into(),
                config_path.as_os_str().to_owned(),
                "run".into(),
            ],
        })
    }
}

pub struct Supervisor {
    child: ChildCommand,
    config: SupervisorConfig,
    restart_delay: Duration,
    matcher: SignatureMatcher,
    breaker: CircuitBreaker,
    transcript: Transcript,
}

impl Supervisor {
    pub async fn new(child: ChildCommand, config: SupervisorConfig) -> Result<Self> {
        let transcript = Transcript::open(&config.log_file).await?;
        let breaker = CircuitBreaker::new(
            config.max_failures,
            TimeDelta::minutes(config.window_minutes),
        );
        Ok(Self {
            child,
            restart_delay: Duration::from_secs(config.restart_delay_secs),
            matcher: SignatureMatcher::new(&config.failure_signatures),
            breaker,
            transcript,
            config,
        })
    }

    /// Overrides the wait between a failed run and the next one.
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub async fn run(&mut self) -> Result<Verdict> {
        self.transcript.note("Starting supervised scraper").await?;
        let max_restarts = self.config.max_restarts;
        let mut restart_count = 0;

        while restart_count < max_restarts {
            let cause = match self.run_attempt().await {
                AttemptOutcome::Succeeded => {
                    self.transcript
                        .note("Scraper completed successfully, exiting")
                        .await?;
                    return Ok(Verdict::Succeeded);
                }
                AttemptOutcome::Failed(cause) => cause,
            };
            let message = match &cause {
                FailureCause::ExitStatus(code) => {
                    format!("Scraper failed with return code {}", fmt_code(*code))
                }
                FailureCause::Signature(signature) => {
                    format!("Scraper failed: output matched failure pattern \"{signature}\"")
                }
                FailureCause::Spawn(reason) | FailureCause::Io(reason) => {
                    format!("Error running scraper: {reason}")
                }
            };
            self.transcript.note(&message).await?;

            if let Some(recent) = self.breaker.record_failure(Local::now()) {
                self.transcript
                    .note(&format!(
                        "Failure threshold exceeded: {recent} failures in the last {} minutes",
                        self.config.window_minutes
                    ))
                    .await?;
                self.transcript
                    .note("Too many failures in a short time period. Stopping script.")
                    .await?;
                return Ok(Verdict::CircuitOpen);
            }

            restart_count += 1;
            if restart_count >= max_restarts {
                break;
            }
            self.transcript
                .note(&format!(
                    "Scraper failed, restarting in {} seconds (attempt {restart_count}/{max_restarts})",
                    self.restart_delay.as_secs()
                ))
                .await?;
            tokio::time::sleep(self.restart_delay).await;
        }

        self.transcript
            .note(&format!(
                "Maximum restart attempts ({max_restarts}) reached, giving up"
            ))
            .await?;
        Ok(Verdict::RestartsExhausted)
    }

    /// One run of the child: spawn it, stream its output until it exits, classify.
    /// Anything that goes wrong while doing so is a failed run, never an error.
    async fn run_attempt(&mut self) -> AttemptOutcome {
        let spawned = Command::new(&self.child.program)
            .args(&self.child.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let reason = Error::Spawn(e).report().replace('\n', " ");
                return AttemptOutcome::Failed(FailureCause::Spawn(reason));
            }
        };
        tracing::debug!(pid = child.id(), "scraper started");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (status, scan) = tokio::join!(
            child.wait(),
            pump_output(stdout, stderr, &mut self.transcript, &self.matcher)
        );
        let status = match status {
            Ok(status) => status,
            Err(e) => return AttemptOutcome::Failed(FailureCause::Io(Error::Io(e).report())),
        };
        match (classify(status, scan.signature), scan.error) {
            (AttemptOutcome::Succeeded, Some(error)) => {
                AttemptOutcome::Failed(FailureCause::Io(error))
            }
            (outcome, _) => outcome,
        }
    }
}

/// What the output pump saw: the first failure signature, and the first I/O error
/// hit while reading the child or writing the transcript.
#[derive(Debug, Default)]
struct OutputScan {
    signature: Option<String>,
    error: Option<String>,
}

/// Copies the child's stdout and stderr line by line into the transcript until both
/// close. One loop serves both pipes. A pipe that fails to read is closed and the
/// other keeps draining, so the child never blocks on a full pipe.
async fn pump_output<O, E>(
    stdout: Option<O>,
    stderr: Option<E>,
    transcript: &mut Transcript,
    matcher: &SignatureMatcher,
) -> OutputScan
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out_lines = stdout.map(LineReader::new);
    let mut err_lines = stderr.map(LineReader::new);
    let mut scan = OutputScan::default();

    loop {
        let read = tokio::select! {
            read = next_line(&mut out_lines), if out_lines.is_some() => read,
            read = next_line(&mut err_lines), if err_lines.is_some() => read,
            else => break,
        };
        let line = match read {
            Ok(Some(line)) => line,
            Ok(None) => continue,
            Err(e) => {
                scan.error.get_or_insert_with(|| Error::Io(e).report());
                continue;
            }
        };
        if scan.signature.is_none() {
            scan.signature = matcher.find(&line).map(String::from);
        }
        if let Err(e) = transcript.echo(&line).await {
            scan.error.get_or_insert_with(|| e.report());
        }
    }

    scan
}

/// Splits a byte stream into lines, replacing invalid UTF-8 instead of failing.
///
/// The buffer outlives each `next_line` call, so a read interrupted by `select!`
/// resumes where it stopped.
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.reader.read_until(b'\n', &mut self.buf).await?;
        if self.buf.is_empty() {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Ok(Some(line))
    }
}

/// Next line from an open stream. Closes the stream (sets it to `None`) on EOF or
/// on a read error.
async fn next_line<R>(lines: &mut Option<LineReader<R>>) -> std::io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = lines.as_mut() else {
        return Ok(None);
    };
    let line = stream.next_line().await;
    if !matches!(line, Ok(Some(_))) {
        *lines = None;
    }
    line
}

fn fmt_code(code: Option<i32>) -> String {
    code.map_or_else(|| "none (killed by signal)".to_owned(), |c| c.to_string())
}
