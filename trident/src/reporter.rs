//! User-facing output funnels through this interface exclusively: no component writes to the process's output
//! streams directly. `ReporterEvent` is a small serializable log-entry
//! shape; `TextReporter`/`JsonReporter` split a human-readable stream from
//! a machine-readable one.

use serde::Serialize;

/// One event emitted by an orchestrator step. `step` increases
/// monotonically across a single operation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReporterEvent {
    Step { step: u64, name: String },
    Message { step: u64, text: String },
    Warning { step: u64, text: String },
    Error { step: u64, text: String },
    Complete { step: u64, summary: String },
}

/// The four channels every orchestrator step reports through.
/// No component may write to stdout/stderr directly; every diagnostic
/// passes through a `Reporter`.
pub trait Reporter: Send {
    fn step(&mut self, name: &str);
    fn message(&mut self, text: &str);
    fn warning(&mut self, text: &str);
    fn error(&mut self, text: &str);
    fn complete(&mut self, summary: &str);
}

/// Human-readable renderer: steps and completion go to stdout, diagnostics
/// to stderr.
pub struct TextReporter {
    step_count: u64,
    verbose: bool,
}

impl TextReporter {
    pub fn new(verbose: bool) -> Self {
        TextReporter {
            step_count: 0,
            verbose,
        }
    }
}

impl Reporter for TextReporter {
    fn step(&mut self, name: &str) {
        self.step_count += 1;
        println!("==> [{}] {name}", self.step_count);
    }

    fn message(&mut self, text: &str) {
        if self.verbose {
            eprintln!("    {text}");
        }
    }

    fn warning(&mut self, text: &str) {
        eprintln!("  ! {text}");
    }

    fn error(&mut self, text: &str) {
        eprintln!("  x {text}");
    }

    fn complete(&mut self, summary: &str) {
        println!("done: {summary}");
    }
}

/// Newline-delimited JSON renderer for `--json` mode.
pub struct JsonReporter {
    step_count: u64,
}

impl JsonReporter {
    pub fn new() -> Self {
        JsonReporter { step_count: 0 }
    }

    fn emit(&self, event: ReporterEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            println!("{line}");
        }
    }
}

impl Default for JsonReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for JsonReporter {
    fn step(&mut self, name: &str) {
        self.step_count += 1;
        self.emit(ReporterEvent::Step {
            step: self.step_count,
            name: name.to_string(),
        });
    }

    fn message(&mut self, text: &str) {
        self.emit(ReporterEvent::Message {
            step: self.step_count,
            text: text.to_string(),
        });
    }

    fn warning(&mut self, text: &str) {
        self.emit(ReporterEvent::Warning {
            step: self.step_count,
            text: text.to_string(),
        });
    }

    fn error(&mut self, text: &str) {
        self.emit(ReporterEvent::Error {
            step: self.step_count,
            text: text.to_string(),
        });
    }

    fn complete(&mut self, summary: &str) {
        self.emit(ReporterEvent::Complete {
            step: self.step_count,
            summary: summary.to_string(),
        });
    }
}

/// Swallows everything; used by tests that exercise orchestrator logic
/// without caring about user-facing output.
#[derive(Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn step(&mut self, _name: &str) {}
    fn message(&mut self, _text: &str) {}
    fn warning(&mut self, _text: &str) {}
    fn error(&mut self, _text: &str) {}
    fn complete(&mut self, _summary: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_reporter_steps_increase_monotonically() {
        let mut events = Vec::new();
        struct Capture<'a>(&'a mut Vec<ReporterEvent>);
        impl Reporter for Capture<'_> {
            fn step(&mut self, name: &str) {
                let n = self.0.iter().filter(|e| matches!(e, ReporterEvent::Step { .. })).count() as u64 + 1;
                self.0.push(ReporterEvent::Step { step: n, name: name.to_string() });
            }
            fn message(&mut self, _text: &str) {}
            fn warning(&mut self, _text: &str) {}
            fn error(&mut self, _text: &str) {}
            fn complete(&mut self, _summary: &str) {}
        }
        let mut reporter = Capture(&mut events);
        reporter.step("one");
        reporter.step("two");
        let steps: Vec<u64> = events
            .iter()
            .map(|e| match e {
                ReporterEvent::Step { step, .. } => *step,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(steps, vec![1, 2]);
    }

    #[test]
    fn null_reporter_never_panics() {
        let mut reporter = NullReporter;
        reporter.step("x");
        reporter.message("x");
        reporter.warning("x");
        reporter.error("x");
        reporter.complete("x");
    }
}
