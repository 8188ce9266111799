//! The host/worker wire protocol and the in-worker job runner.
//!
//! One job message in, one result message out; both are single JSON lines.

use crate::interp::{Flow, Interp};
use crate::parser;
use crate::value::Value;
use crate::{builtins, ALLOC_BUDGET, MAX_OUTPUTS, OP_BUDGET};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::time::{Duration, Instant};

/// Everything the worker receives. Secrets are only the plaintexts the
/// source actually references; the host resolves them before spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxJob {
    pub source: String,
    #[serde(default)]
    pub inputs: JsonValue,
    #[serde(default)]
    pub secrets: Map<String, JsonValue>,
    #[serde(default)]
    pub context: JsonValue,
    pub deadline_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Success,
    Error,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxOutcome {
    pub status: SandboxStatus,
    /// Ordered (name, stringified value) pairs, at most [`MAX_OUTPUTS`].
    pub outputs: Vec<(String, String)>,
    pub console: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl SandboxOutcome {
    pub fn success(outputs: Vec<(String, String)>, console: Vec<String>, duration_ms: u64) -> Self {
        Self {
            status: SandboxStatus::Success,
            outputs,
            console,
            error: None,
            duration_ms,
        }
    }

    pub fn error(message: impl Into<String>, console: Vec<String>, duration_ms: u64) -> Self {
        Self {
            status: SandboxStatus::Error,
            outputs: Vec::new(),
            console,
            error: Some(message.into()),
            duration_ms,
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self {
            status: SandboxStatus::Timeout,
            outputs: Vec::new(),
            console: Vec::new(),
            error: Some("execution deadline exceeded".to_string()),
            duration_ms,
        }
    }
}

/// Run a job to completion inside the current process. This is the whole of
/// what the worker does; the host's isolation guarantees come from running
/// it in a separate OS process.
pub fn run_job(job: &SandboxJob) -> SandboxOutcome {
    let started = Instant::now();
    let deadline = started + Duration::from_millis(job.deadline_ms);

    let program = match parser::parse(&job.source) {
        Ok(p) => p,
        Err(e) => {
            return SandboxOutcome::error(e.to_string(), Vec::new(), elapsed_ms(started));
        }
    };

    let mut interp = Interp::new(OP_BUDGET, ALLOC_BUDGET, deadline);
    builtins::install_globals(&mut interp, &job.inputs, &job.secrets, &job.context);

    let result = interp.run(&program);

    let result = result.and_then(|v| {
        drain_timers(&mut interp, started, deadline)?;
        Ok(v)
    });

    let mut console = std::mem::take(&mut interp.console);
    if interp.console_truncated {
        console.push("(console output truncated)".to_string());
    }

    match result {
        Ok(value) => {
            let outputs = shape_outputs(&interp, &value);
            SandboxOutcome::success(outputs, console, elapsed_ms(started))
        }
        Err(Flow::Timeout) => SandboxOutcome {
            console,
            ..SandboxOutcome::timeout(elapsed_ms(started))
        },
        Err(Flow::Throw(v)) => SandboxOutcome::error(v.to_display(), console, elapsed_ms(started)),
        Err(Flow::Budget(message)) => SandboxOutcome::error(message, console, elapsed_ms(started)),
        Err(Flow::Return(_)) | Err(Flow::Break) | Err(Flow::Continue) => {
            SandboxOutcome::error("invalid control flow", console, elapsed_ms(started))
        }
    }
}

/// Run pending timers in delay order. Timers whose target lies beyond the
/// deadline are force-cancelled, like all timers on exit.
fn drain_timers(interp: &mut Interp, started: Instant, deadline: Instant) -> Result<(), Flow> {
    let mut timers = std::mem::take(&mut interp.timers);
    let cancelled = std::mem::take(&mut interp.cancelled_timers);
    timers.sort_by(|a, b| a.delay_ms.total_cmp(&b.delay_ms));

    for timer in timers {
        if cancelled.contains(&timer.id) {
            continue;
        }
        let target = started + Duration::from_millis(timer.delay_ms as u64);
        if target > deadline {
            continue;
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(Flow::Timeout);
        }
        if target > now {
            std::thread::sleep(target - now);
        }
        interp.call_function(timer.callback, Vec::new())?;
    }
    Ok(())
}

/// Map the script's result onto at most [`MAX_OUTPUTS`] named values:
/// an object return contributes its first properties in insertion order, a
/// non-object return becomes a single value, and otherwise the `output`
/// object is used.
fn shape_outputs(interp: &Interp, result: &Value) -> Vec<(String, String)> {
    match result {
        Value::Object(data) => data
            .borrow()
            .entries
            .iter()
            .take(MAX_OUTPUTS)
            .map(|(k, v)| (k.clone(), v.to_display()))
            .collect(),
        Value::Undefined => match interp.lookup("output") {
            Some(Value::Object(data)) => data
                .borrow()
                .entries
                .iter()
                .take(MAX_OUTPUTS)
                .map(|(k, v)| (k.clone(), v.to_display()))
                .collect(),
            _ => Vec::new(),
        },
        other => vec![("result".to_string(), other.to_display())],
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(source: &str, inputs: JsonValue) -> SandboxJob {
        SandboxJob {
            source: source.to_string(),
            inputs,
            secrets: Map::new(),
            context: json!({}),
            deadline_ms: 3_000,
        }
    }

    #[test]
    fn output_object_shapes_positionally() {
        let outcome = run_job(&job(
            "output.n = (inputs.a|0) + (inputs.b|0);",
            json!({"a": "2", "b": "3"}),
        ));
        assert_eq!(outcome.status, SandboxStatus::Success);
        assert_eq!(outcome.outputs, vec![("n".to_string(), "5".to_string())]);
    }

    #[test]
    fn object_return_takes_first_five() {
        let outcome = run_job(&job(
            "return {a: 1, b: 2, c: 3, d: 4, e: 5, f: 6};",
            json!({}),
        ));
        assert_eq!(outcome.outputs.len(), 5);
        assert_eq!(outcome.outputs[0], ("a".to_string(), "1".to_string()));
        assert_eq!(outcome.outputs[4], ("e".to_string(), "5".to_string()));
    }

    #[test]
    fn non_object_return_is_single_output() {
        let outcome = run_job(&job("return 2 + 3;", json!({})));
        assert_eq!(outcome.outputs, vec![("result".to_string(), "5".to_string())]);
    }

    #[test]
    fn infinite_loop_times_out() {
        let mut j = job("while (true) {}", json!({}));
        j.deadline_ms = 200;
        let started = Instant::now();
        let outcome = run_job(&j);
        assert_eq!(outcome.status, SandboxStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn throw_is_error_with_message() {
        let outcome = run_job(&job("throw 'user boom';", json!({})));
        assert_eq!(outcome.status, SandboxStatus::Error);
        assert_eq!(outcome.error.as_deref(), Some("user boom"));
    }

    #[test]
    fn console_is_captured_and_capped() {
        let outcome = run_job(&job(
            "for (let i = 0; i < 150; i++) { console.log('line', i); }",
            json!({}),
        ));
        assert_eq!(outcome.status, SandboxStatus::Success);
        assert_eq!(outcome.console.len(), crate::MAX_CONSOLE_LINES + 1);
        assert_eq!(outcome.console[0], "line 0");
    }

    #[test]
    fn secrets_are_visible_to_the_script() {
        let mut secrets = Map::new();
        secrets.insert("API_KEY".to_string(), json!("plain-text"));
        let outcome = run_job(&SandboxJob {
            source: "output.k = secrets.API_KEY;".to_string(),
            inputs: json!({}),
            secrets,
            context: json!({}),
            deadline_ms: 1_000,
        });
        assert_eq!(outcome.outputs[0].1, "plain-text");
    }

    #[test]
    fn timers_run_before_shaping() {
        let outcome = run_job(&job(
            "setTimeout(() => { output.late = 'yes'; }, 10);",
            json!({}),
        ));
        assert_eq!(outcome.status, SandboxStatus::Success);
        assert_eq!(outcome.outputs, vec![("late".to_string(), "yes".to_string())]);
    }

    #[test]
    fn cleared_and_overlong_timers_do_not_run() {
        let outcome = run_job(&job(
            "let id = setTimeout(() => { output.a = 1; }, 5);\n\
             clearTimeout(id);\n\
             setTimeout(() => { output.b = 1; }, 999999);",
            json!({}),
        ));
        assert_eq!(outcome.status, SandboxStatus::Success);
        assert!(outcome.outputs.is_empty());
    }

    #[test]
    fn regexp_is_available_to_scripts() {
        let outcome = run_job(&job(
            "output.digits = inputs.text.match(new RegExp('[0-9]+', 'g')).join('-');",
            json!({"text": "a1b22c333"}),
        ));
        assert_eq!(outcome.status, SandboxStatus::Success);
        assert_eq!(
            outcome.outputs,
            vec![("digits".to_string(), "1-22-333".to_string())]
        );
    }

    #[test]
    fn parse_error_is_reported() {
        let outcome = run_job(&job("let = ;", json!({})));
        assert_eq!(outcome.status, SandboxStatus::Error);
        assert!(outcome.error.unwrap().contains("syntax error"));
    }

    #[test]
    fn wire_roundtrip() {
        let outcome = SandboxOutcome::success(
            vec![("n".to_string(), "5".to_string())],
            vec!["hi".to_string()],
            12,
        );
        let line = serde_json::to_string(&outcome).unwrap();
        let parsed: SandboxOutcome = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.status, SandboxStatus::Success);
        assert_eq!(parsed.outputs.len(), 1);
    }
}
