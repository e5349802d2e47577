//! Stepping control
//!
//! A [`StepDriver`] is the host side of the suspend/resume exchange. The
//! session emits a snapshot, hands it to [`StepDriver::observe`], then blocks in
//! [`StepDriver::wait`] until the driver answers with the source line to
//! continue from.
//!
//! Drivers provided here:
//! - [`LineDriver`]: one resume signal per input line (stdin in the binary)
//! - [`KeyDriver`]: waits for a key press on an interactive terminal
//! - [`AutoDriver`]: resumes immediately, optionally giving up after N steps
//! - [`ScriptedDriver`]: resumes with a fixed list of lines
//! - [`RecordingDriver`]: keeps every snapshot for replay, wrapping another driver

use crate::errors::{DebugError, Result};
use crate::snapshot::{Snapshot, SnapshotHistory};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::rc::Rc;
use tracing::debug;

/// Host side of the stepping protocol
pub trait StepDriver {
    /// Block until execution may resume; return the line to continue from
    fn wait(&mut self, line: u32) -> Result<u32>;

    /// Notification that execution moved to `line` without suspending
    fn line_changed(&mut self, _line: u32) {}

    /// Called with each snapshot right before [`StepDriver::wait`]
    fn observe(&mut self, _snapshot: &Snapshot) -> Result<()> {
        Ok(())
    }
}

impl<D: StepDriver + ?Sized> StepDriver for Box<D> {
    fn wait(&mut self, line: u32) -> Result<u32> {
        (**self).wait(line)
    }

    fn line_changed(&mut self, line: u32) {
        (**self).line_changed(line)
    }

    fn observe(&mut self, snapshot: &Snapshot) -> Result<()> {
        (**self).observe(snapshot)
    }
}

/// Parse one resume signal: blank means "same line", otherwise a line number
pub fn parse_resume(input: &str, current: u32) -> Result<u32> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(current);
    }
    trimmed
        .parse::<u32>()
        .map_err(|_| DebugError::MalformedResume {
            input: trimmed.to_string(),
        })
}

/// Reads one resume signal per line; EOF or `q` closes the session
pub struct LineDriver<R> {
    input: R,
}

impl<R: BufRead> LineDriver<R> {
    pub fn new(input: R) -> Self {
        LineDriver { input }
    }
}

impl<R: BufRead> StepDriver for LineDriver<R> {
    fn wait(&mut self, line: u32) -> Result<u32> {
        let mut buffer = String::new();
        if self.input.read_line(&mut buffer)? == 0 {
            return Err(DebugError::DriverClosed { line });
        }
        if buffer.trim() == "q" {
            return Err(DebugError::DriverClosed { line });
        }
        parse_resume(&buffer, line)
    }
}

/// Resumes on Enter, Space or `n`; stops on `q`, Esc or Ctrl-C
#[derive(Debug, Default)]
pub struct KeyDriver;

impl KeyDriver {
    pub fn new() -> Self {
        KeyDriver
    }

    fn read_key(&self, line: u32) -> Result<u32> {
        loop {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Enter | KeyCode::Char(' ') | KeyCode::Char('n') => return Ok(line),
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        return Err(DebugError::DriverClosed { line })
                    }
                    KeyCode::Char('q') | KeyCode::Esc => {
                        return Err(DebugError::DriverClosed { line })
                    }
                    _ => {}
                }
            }
        }
    }
}

impl StepDriver for KeyDriver {
    fn wait(&mut self, line: u32) -> Result<u32> {
        let mut stderr = std::io::stderr();
        write!(stderr, "-- line {} [enter: step, q: quit] ", line)?;
        stderr.flush()?;

        terminal::enable_raw_mode()?;
        let result = self.read_key(line);
        terminal::disable_raw_mode()?;

        writeln!(stderr)?;
        result
    }
}

/// Resumes immediately with the suspended line
#[derive(Debug, Default)]
pub struct AutoDriver {
    steps: u64,
    max_steps: Option<u64>,
}

impl AutoDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up with [`DebugError::DriverClosed`] after `max` resumes
    pub fn with_max_steps(max: u64) -> Self {
        AutoDriver {
            steps: 0,
            max_steps: Some(max),
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }
}

impl StepDriver for AutoDriver {
    fn wait(&mut self, line: u32) -> Result<u32> {
        if self.max_steps.is_some_and(|max| self.steps >= max) {
            debug!(steps = self.steps, "step budget exhausted");
            return Err(DebugError::DriverClosed { line });
        }
        self.steps += 1;
        Ok(line)
    }
}

/// Resumes with a fixed sequence of lines, then with the suspended line
#[derive(Debug, Default)]
pub struct ScriptedDriver {
    script: VecDeque<u32>,
    waits: Vec<u32>,
    changes: Vec<u32>,
}

impl ScriptedDriver {
    pub fn new(script: impl IntoIterator<Item = u32>) -> Self {
        ScriptedDriver {
            script: script.into_iter().collect(),
            waits: Vec::new(),
            changes: Vec::new(),
        }
    }

    /// Lines execution suspended at, in order
    pub fn waits(&self) -> &[u32] {
        &self.waits
    }

    /// Lines reported through [`StepDriver::line_changed`]
    pub fn changes(&self) -> &[u32] {
        &self.changes
    }
}

impl StepDriver for ScriptedDriver {
    fn wait(&mut self, line: u32) -> Result<u32> {
        self.waits.push(line);
        Ok(self.script.pop_front().unwrap_or(line))
    }

    fn line_changed(&mut self, line: u32) {
        self.changes.push(line);
    }
}

/// Shared handle to the history a [`RecordingDriver`] fills
pub type HistoryHandle = Rc<RefCell<SnapshotHistory>>;

/// Records every snapshot, then defers to the wrapped driver
pub struct RecordingDriver<D> {
    inner: D,
    history: HistoryHandle,
}

impl<D: StepDriver> RecordingDriver<D> {
    pub fn new(inner: D, limit_bytes: usize) -> Self {
        RecordingDriver {
            inner,
            history: Rc::new(RefCell::new(SnapshotHistory::new(limit_bytes))),
        }
    }

    /// Handle that stays readable after the driver is moved into a session
    pub fn history(&self) -> HistoryHandle {
        Rc::clone(&self.history)
    }
}

impl<D: StepDriver> StepDriver for RecordingDriver<D> {
    fn wait(&mut self, line: u32) -> Result<u32> {
        self.inner.wait(line)
    }

    fn line_changed(&mut self, line: u32) {
        self.inner.line_changed(line)
    }

    fn observe(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.history.borrow_mut().push(snapshot.clone())?;
        self.inner.observe(snapshot)
    }
}
