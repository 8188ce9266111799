//! Hardened execution of short user-authored scripts.
//!
//! User code runs in a separate OS worker process with its own heap. The
//! host writes one job message to the worker's stdin and reads one result
//! message from its stdout; it holds nothing but an opaque handle with
//! `recv(deadline)` and `terminate()`. Inside the worker, the source runs
//! in a purpose-built interpreter whose environment exposes only frozen
//! copies of the job data, a write-only `output` object, a buffered
//! `console` and pure builtins. There is no filesystem, network, process or
//! import surface because the interpreter has no such operations.
//!
//! Resource limits are enforced twice: the interpreter carries operation
//! and allocation budgets plus a wall-clock check, and the host kills the
//! worker outright once the deadline (plus a small grace period) expires.

pub mod ast;
pub mod builtins;
pub mod host;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod protocol;
pub mod scan;
pub mod token;
pub mod value;
pub mod worker;

pub use host::{SandboxHost, WorkerHandle};
pub use protocol::{run_job, SandboxJob, SandboxOutcome, SandboxStatus};
pub use scan::referenced_secret_names;
pub use worker::{worker_main, WORKER_ARG};

/// Grace added to the host-side deadline before the worker is killed.
pub const DEADLINE_GRACE_MS: u64 = 500;
/// Interpreter operation budget (CPU bound independent of wall clock).
pub const OP_BUDGET: u64 = 8_000_000;
/// Interpreter allocation budget in bytes (memory cap equivalent).
pub const ALLOC_BUDGET: usize = 64 * 1024 * 1024;
/// Maximum buffered console lines.
pub const MAX_CONSOLE_LINES: usize = 100;
/// Maximum named output values surfaced to the caller.
pub const MAX_OUTPUTS: usize = 5;
