//! # Introduction
//!
//! stepview is the instrumentation core linked into a program so that an
//! external step debugger can watch it run. At every step boundary it freezes
//! the live variables, the tracked heap and the call stack into a textual
//! snapshot, then blocks until the driver says where to continue.
//!
//! ## Execution model
//!
//! ```text
//! observed program ──trace/enter/alloc──▶ DebugSession ──snapshot──▶ driver
//!        ▲                                                              │
//!        └────────────────────────── resume(line) ◀─────────────────────┘
//! ```
//!
//! 1. [`memory`]: the bookkeeping. Value rendering, the tracked heap, the call
//!    stack and the registry of observed variables.
//! 2. [`snapshot`]: the snapshot model and its pipe-delimited wire format.
//! 3. [`driver`]: the suspend/resume contract and stock drivers.
//! 4. [`session`]: ties the above together for one observed program.
//! 5. [`errors`]: the error type and the fail-fast abort helper.
//!
//! ## Wire format
//!
//! ```text
//! [DEBUG:VARS:START]
//! x|i32|0x55d0c8a4e2b0|5|0|main|
//! p|ptr|0x55d0c8a4e310|0x55d0c8a4e350|0x55d0c8a4e350|main|42
//! *0x55d0c8a4e350|i32|0x55d0c8a4e350|42|0|heap|42
//! [DEBUG:VARS:END]
//! [DEBUG:STACK:START]
//! main
//! [DEBUG:STACK:END]
//! ```
//!
//! Fields: name, type, address, value, target address, frame, dereferenced value.

pub mod check;
pub mod config;
pub mod constants;
pub mod driver;
pub mod errors;
pub mod memory;
pub mod session;
pub mod snapshot;

pub use config::SessionConfig;
pub use errors::{DebugError, OrAbort, Result};
pub use memory::heap::HeapPtr;
pub use memory::value::{DebugRender, Render};
pub use session::{DebugSession, FrameGuard, RunState, Traced};
pub use snapshot::Snapshot;
