//! Worker-process entry point.
//!
//! The worker reads one job line from stdin, runs it, writes one result
//! line to stdout and exits. A watchdog thread hard-exits the process if
//! the deadline (plus grace) passes, independently of the interpreter's own
//! checks; this covers any host-code path that might block.

use crate::protocol::{run_job, SandboxJob, SandboxOutcome};
use crate::DEADLINE_GRACE_MS;
use std::io::{BufRead, Write};
use std::time::Duration;

/// Argv marker that selects worker mode in the shared binary.
pub const WORKER_ARG: &str = "sandbox-worker";

/// Exit code used by the in-worker watchdog.
pub const WATCHDOG_EXIT_CODE: i32 = 86;

pub fn worker_main() -> i32 {
    let stdin = std::io::stdin();
    let mut line = String::new();
    if stdin.lock().read_line(&mut line).is_err() || line.trim().is_empty() {
        emit(&SandboxOutcome::error("no job received", Vec::new(), 0));
        return 1;
    }

    let job: SandboxJob = match serde_json::from_str(line.trim()) {
        Ok(job) => job,
        Err(e) => {
            emit(&SandboxOutcome::error(
                format!("malformed job: {}", e),
                Vec::new(),
                0,
            ));
            return 1;
        }
    };

    let watchdog_ms = job.deadline_ms + DEADLINE_GRACE_MS;
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(watchdog_ms));
        // The interpreter missed its own deadline; abandon ship.
        std::process::exit(WATCHDOG_EXIT_CODE);
    });

    let outcome = run_job(&job);
    emit(&outcome);
    0
}

fn emit(outcome: &SandboxOutcome) {
    let line = serde_json::to_string(outcome)
        .unwrap_or_else(|_| r#"{"status":"error","outputs":[],"console":[],"error":"serialization failure","duration_ms":0}"#.to_string());
    let mut stdout = std::io::stdout();
    let _ = writeln!(stdout, "{}", line);
    let _ = stdout.flush();
}
