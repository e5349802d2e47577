//! Error types for the instrumentation core
//!
//! Three classes of failure exist:
//! - tolerated: freeing an address with no heap record. Never surfaces here.
//! - bounded: heap enrichment past the depth cap. Silently skipped.
//! - fatal: everything in [`DebugError`]. The observed program has no recovery
//!   path, so [`fatal`] prints a diagnostic and terminates the process.
//!
//! Library calls return [`Result`] so hosts and tests can inspect failures;
//! [`OrAbort`] applies the fail-fast policy at the call site.

use crate::constants::ERROR_PREFIX;
use std::fmt;
use std::io::{self, Write};
use thiserror::Error;

/// Errors raised by the instrumentation core
#[derive(Debug, Error)]
pub enum DebugError {
    /// A query such as `top` or `first` was made on an empty structure
    #[error("{op}() called on an empty {what}")]
    EmptyCollection {
        what: &'static str,
        op: &'static str,
    },

    /// A null pointer was dereferenced
    #[error("null pointer dereference")]
    NullDereference,

    /// A traced value is currently mutably borrowed by the observed program
    #[error("value of '{name}' is already borrowed")]
    BorrowConflict { name: String },

    /// The step driver went away while the program was suspended
    #[error("step driver closed while suspended at line {line}")]
    DriverClosed { line: u32 },

    /// The driver sent a resume signal that is not a line number
    #[error("malformed resume signal: {input:?}")]
    MalformedResume { input: String },

    /// Protocol text could not be decoded
    #[error("malformed snapshot at line {line}: {message}")]
    MalformedSnapshot { line: usize, message: String },

    /// Recorded history would exceed its byte budget
    #[error("snapshot history limit exceeded: {current} + {incoming} > {limit}")]
    SnapshotLimitExceeded {
        current: usize,
        incoming: usize,
        limit: usize,
    },

    /// Writing protocol output or reading driver input failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, DebugError>;

/// Print `[!ERROR] <message>` to stdout and terminate with status 1
pub fn fatal(message: impl fmt::Display) -> ! {
    let mut stdout = io::stdout().lock();
    // The process is going down either way
    let _ = writeln!(stdout, "{} {}", ERROR_PREFIX, message);
    let _ = stdout.flush();
    std::process::exit(1);
}

/// Fail-fast conversion for results produced by the core
pub trait OrAbort<T> {
    /// Return the value, or print a diagnostic and abort the process
    fn or_abort(self) -> T;
}

impl<T> OrAbort<T> for Result<T> {
    fn or_abort(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(error = %err, "aborting observed program");
                fatal(err)
            }
        }
    }
}
