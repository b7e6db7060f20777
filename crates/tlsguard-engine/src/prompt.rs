//! Operator prompts.
//!
//! Reading a line with a timeout is the one blocking interaction the engine
//! has with a person. [`StdinLines`] keeps a single reader thread alive for
//! the life of the process so a prompt that timed out does not leave a
//! stranded read that swallows the next answer.

use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tlsguard_core::ClassifiedError;
use tracing::{debug, warn};

use crate::strategy::FallbackAction;

/// Result of waiting for one line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A line, without its terminator.
    Line(String),
    /// Nothing arrived in time.
    TimedOut,
    /// The input was closed.
    Closed,
    /// Reading failed.
    Failed(String),
}

/// A source of operator answers.
pub trait ConfirmationInput: Send + Sync + Debug {
    /// Waits up to `timeout` for one line.
    fn read_line(&self, timeout: Duration) -> ReadOutcome;

    /// Whether a person can plausibly answer.
    fn is_interactive(&self) -> bool {
        true
    }
}

type LineReceiver = Receiver<io::Result<String>>;

/// Lines from standard input.
#[derive(Debug, Default)]
pub struct StdinLines {
    lines: Mutex<Option<LineReceiver>>,
}

impl StdinLines {
    /// Creates the reader. The background thread starts on first read.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn_reader() -> io::Result<LineReceiver> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("tlsguard-stdin".to_string())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;
        Ok(rx)
    }
}

impl ConfirmationInput for StdinLines {
    fn read_line(&self, timeout: Duration) -> ReadOutcome {
        let mut guard = self.lines.lock();
        if guard.is_none() {
            match Self::spawn_reader() {
                Ok(rx) => *guard = Some(rx),
                Err(e) => return ReadOutcome::Failed(e.to_string()),
            }
        }
        let Some(rx) = guard.as_ref() else {
            return ReadOutcome::Closed;
        };

        // Anything typed before the question was asked is not an answer to it.
        while let Ok(stale) = rx.try_recv() {
            debug!("Discarding input received before prompt: {:?}", stale.is_ok());
        }

        match rx.recv_timeout(timeout) {
            Ok(Ok(line)) => ReadOutcome::Line(line),
            Ok(Err(e)) => ReadOutcome::Failed(e.to_string()),
            Err(RecvTimeoutError::Timeout) => ReadOutcome::TimedOut,
            Err(RecvTimeoutError::Disconnected) => ReadOutcome::Closed,
        }
    }

    fn is_interactive(&self) -> bool {
        io::stdin().is_terminal()
    }
}

/// Pre-recorded answers, for tests and non-interactive automation.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    answers: Mutex<VecDeque<ReadOutcome>>,
    reads: Mutex<usize>,
}

impl ScriptedInput {
    /// Creates an input that replays `answers` in order, then reports closed.
    #[must_use]
    pub fn new<I>(answers: I) -> Self
    where
        I: IntoIterator<Item = ReadOutcome>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            reads: Mutex::new(0),
        }
    }

    /// Creates an input that replays lines.
    #[must_use]
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(lines.into_iter().map(|l| ReadOutcome::Line(l.into())))
    }

    /// Queues another answer.
    pub fn push(&self, answer: ReadOutcome) {
        self.answers.lock().push_back(answer);
    }

    /// Number of reads performed so far.
    #[must_use]
    pub fn reads(&self) -> usize {
        *self.reads.lock()
    }
}

impl ConfirmationInput for ScriptedInput {
    fn read_line(&self, _timeout: Duration) -> ReadOutcome {
        *self.reads.lock() += 1;
        self.answers
            .lock()
            .pop_front()
            .unwrap_or(ReadOutcome::Closed)
    }
}

/// Where warnings and prompts are written. Cloning shares the sink.
#[derive(Clone)]
pub struct Console {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Console {
    /// Writes to standard error.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Writes to an arbitrary sink.
    #[must_use]
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }

    /// A console that captures output in memory.
    #[must_use]
    pub fn captured() -> (Self, CapturedOutput) {
        let buffer = CapturedOutput::default();
        (Self::new(buffer.clone()), buffer)
    }

    /// Writes `text` and flushes. Write errors are logged, not returned.
    pub fn write(&self, text: &str) {
        let mut sink = self.sink.lock();
        if let Err(e) = sink.write_all(text.as_bytes()).and_then(|()| sink.flush()) {
            warn!("Failed to write to console: {}", e);
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::stderr()
    }
}

impl Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

/// In-memory console output.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    /// Everything written so far.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Why a prompt produced no answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    /// No answer arrived in time.
    #[error("No answer within {0:?}")]
    TimedOut(Duration),

    /// Nobody can answer.
    #[error("Prompting is unavailable")]
    Unavailable,

    /// Reading the answer failed.
    #[error("Failed to read answer: {0}")]
    Input(String),
}

/// Asks an operator what to do about a failure.
pub trait DecisionPrompter: Send + Sync + Debug {
    /// Whether prompting can happen at all.
    fn is_available(&self) -> bool;

    /// Asks about `error`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError`] if no answer was obtained.
    fn prompt(
        &self,
        error: &ClassifiedError,
        timeout: Duration,
    ) -> Result<FallbackAction, PromptError>;
}

/// Prompts on a console and reads the answer from a [`ConfirmationInput`].
#[derive(Debug, Clone)]
pub struct TerminalPrompter {
    input: Arc<dyn ConfirmationInput>,
    console: Console,
}

impl TerminalPrompter {
    /// Creates a prompter.
    #[must_use]
    pub fn new(input: Arc<dyn ConfirmationInput>, console: Console) -> Self {
        Self { input, console }
    }
}

impl DecisionPrompter for TerminalPrompter {
    fn is_available(&self) -> bool {
        self.input.is_interactive()
    }

    fn prompt(
        &self,
        error: &ClassifiedError,
        timeout: Duration,
    ) -> Result<FallbackAction, PromptError> {
        let mut text = format!(
            "\nCertificate problem connecting to {}\n  {}\n",
            error.hostname,
            error.summary()
        );
        for action in &error.suggested_actions {
            text.push_str(&format!("  - {action}\n"));
        }
        text.push_str(&format!(
            "Accept this certificate for this connection? [y/N] ({}s): ",
            timeout.as_secs()
        ));
        self.console.write(&text);

        match self.input.read_line(timeout) {
            ReadOutcome::Line(answer) => {
                let answer = answer.trim().to_ascii_lowercase();
                if answer == "y" || answer == "yes" {
                    Ok(FallbackAction::Accept)
                } else {
                    Ok(FallbackAction::Deny)
                }
            }
            ReadOutcome::TimedOut => {
                self.console.write("\nNo answer, denying.\n");
                Err(PromptError::TimedOut(timeout))
            }
            ReadOutcome::Closed => Err(PromptError::Unavailable),
            ReadOutcome::Failed(reason) => Err(PromptError::Input(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlsguard_core::{CertificateFailure, ErrorClassifier};

    fn classified() -> ClassifiedError {
        ErrorClassifier::new().classify(
            &CertificateFailure::new("x509: certificate signed by unknown authority"),
            "registry.local",
        )
    }

    #[test]
    fn test_scripted_input_replays_then_closes() {
        let input = ScriptedInput::lines(["yes"]);
        input.push(ReadOutcome::TimedOut);
        assert_eq!(
            input.read_line(Duration::from_secs(1)),
            ReadOutcome::Line("yes".to_string())
        );
        assert_eq!(input.read_line(Duration::from_secs(1)), ReadOutcome::TimedOut);
        assert_eq!(input.read_line(Duration::from_secs(1)), ReadOutcome::Closed);
        assert_eq!(input.reads(), 3);
    }

    #[test]
    fn test_terminal_prompter_accepts_yes() {
        let (console, output) = Console::captured();
        let prompter = TerminalPrompter::new(Arc::new(ScriptedInput::lines([" Y "])), console);

        let answer = prompter.prompt(&classified(), Duration::from_secs(5)).unwrap();
        assert_eq!(answer, FallbackAction::Accept);
        assert!(output.contents().contains("registry.local"));
        assert!(output.contents().contains("[y/N] (5s)"));
    }

    #[test]
    fn test_terminal_prompter_denies_anything_else() {
        let prompter = TerminalPrompter::new(
            Arc::new(ScriptedInput::lines(["sure"])),
            Console::captured().0,
        );
        assert_eq!(
            prompter.prompt(&classified(), Duration::from_secs(5)),
            Ok(FallbackAction::Deny)
        );
    }

    #[test]
    fn test_terminal_prompter_timeout() {
        let prompter = TerminalPrompter::new(
            Arc::new(ScriptedInput::new([ReadOutcome::TimedOut])),
            Console::captured().0,
        );
        assert_eq!(
            prompter.prompt(&classified(), Duration::from_secs(2)),
            Err(PromptError::TimedOut(Duration::from_secs(2)))
        );
    }

    #[test]
    fn test_closed_input_is_unavailable() {
        let prompter =
            TerminalPrompter::new(Arc::new(ScriptedInput::default()), Console::captured().0);
        assert_eq!(
            prompter.prompt(&classified(), Duration::from_secs(1)),
            Err(PromptError::Unavailable)
        );
    }
}
