//! Standalone sandbox worker binary. The server binary embeds the same
//! entry point behind the `sandbox-worker` argv marker; this target exists
//! so the sandbox crate is testable end-to-end on its own.

fn main() {
    std::process::exit(codeflow_sandbox::worker_main());
}
