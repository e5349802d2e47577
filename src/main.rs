// stepview: run a bundled practice program under the instrumentation core

mod programs;

use std::io;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use stepview::constants::DEFAULT_ENRICH_DEPTH_LIMIT;
use stepview::driver::{AutoDriver, KeyDriver, LineDriver, RecordingDriver, StepDriver};
use stepview::errors::{fatal, DebugError};
use stepview::{DebugSession, SessionConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Program {
    /// A leaked int and a two-node linked list
    Heap,
    /// Recursive string reversal with self-checks
    Recursion,
    /// By-value parameters versus reference aliases
    References,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DriverKind {
    /// One resume signal per stdin line: blank to continue, a number to jump
    Stdin,
    /// Resume immediately after every snapshot
    Auto,
    /// Wait for a key press on the terminal
    Keys,
}

#[derive(Debug, Parser)]
#[command(name = "stepview", version, about = "Step through a program, one snapshot at a time")]
struct Cli {
    /// Program to run
    #[arg(value_enum)]
    program: Program,

    /// How execution is resumed after each snapshot
    #[arg(long, value_enum, default_value_t = DriverKind::Stdin)]
    driver: DriverKind,

    /// Stop after this many steps (auto driver only)
    #[arg(long)]
    max_steps: Option<u64>,

    /// Maximum nesting of heap enrichment
    #[arg(long, default_value_t = DEFAULT_ENRICH_DEPTH_LIMIT)]
    depth_limit: usize,

    /// Record every snapshot and print this step again once the run ends
    #[arg(long, value_name = "STEP")]
    replay: Option<usize>,
}

fn base_driver(cli: &Cli) -> Box<dyn StepDriver> {
    match cli.driver {
        DriverKind::Stdin => Box::new(LineDriver::new(io::stdin().lock())),
        DriverKind::Auto => match cli.max_steps {
            Some(max) => Box::new(AutoDriver::with_max_steps(max)),
            None => Box::new(AutoDriver::new()),
        },
        DriverKind::Keys => Box::new(KeyDriver::new()),
    }
}

fn main() {
    // Logs go to stderr so they never interleave with protocol output
    let filter = EnvFilter::try_from_env("STEPVIEW_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = SessionConfig::new().with_enrich_depth_limit(cli.depth_limit);
    let (driver, history) = match cli.replay {
        Some(_) => {
            let recorder = RecordingDriver::new(base_driver(&cli), config.history_limit_bytes);
            let history = recorder.history();
            (Box::new(recorder) as Box<dyn StepDriver>, Some(history))
        }
        None => (base_driver(&cli), None),
    };
    let session = DebugSession::new(config, driver, io::stdout());

    let result = match cli.program {
        Program::Heap => programs::heap(&session),
        Program::Recursion => programs::recursion(&session),
        Program::References => programs::references(&session),
    };

    let leaked = session.teardown();

    match result {
        Ok(()) => {
            eprintln!("Execution completed after {} steps.", session.steps());
        }
        Err(DebugError::DriverClosed { line }) => {
            eprintln!("Stopped at line {} after {} steps.", line, session.steps());
        }
        Err(err) => fatal(err),
    }

    if let (Some(step), Some(history)) = (cli.replay, history) {
        let history = history.borrow();
        match history.get(step) {
            Some(snapshot) => print!("{}", snapshot),
            None => eprintln!("No step {} recorded ({} available).", step, history.len()),
        }
    }

    if !leaked.is_empty() {
        eprintln!("{} heap block(s) were never freed:", leaked.len());
        for record in &leaked {
            eprintln!("  {} {} = {}", record.name(), record.type_tag, record.value);
        }
    }
}
