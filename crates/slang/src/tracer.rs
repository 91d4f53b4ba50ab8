//! Step tracing.
//!
//! The machine reports each control pop to a [`StepTracer`]. The default
//! [`NoopTracer`] compiles away; [`RecordingTracer`] captures the tag
//! sequence (two machines are conformant when they produce identical traces
//! on identical programs); [`StderrTracer`] is a debugging aid.

/// One control pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEvent {
    /// Machine step counter at the pop.
    pub step: u64,
    /// `"node"` or `"instr"`.
    pub category: &'static str,
    /// Node kind or instruction tag name.
    pub tag: &'static str,
}

/// Observer for machine execution.
pub trait StepTracer {
    fn on_step(&mut self, event: TraceEvent) {
        let _ = event;
    }

    /// Called once when the machine stops, with the total step count.
    fn on_halt(&mut self, steps: u64) {
        let _ = steps;
    }
}

/// Tracer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl StepTracer for NoopTracer {}

/// Tracer that records every event.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The tag sequence, for conformance comparison.
    #[must_use]
    pub fn tags(&self) -> Vec<&'static str> {
        self.events.iter().map(|e| e.tag).collect()
    }
}

impl StepTracer for RecordingTracer {
    fn on_step(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}

/// Tracer that prints each step to stderr.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl StepTracer for StderrTracer {
    fn on_step(&mut self, event: TraceEvent) {
        eprintln!("step {:>6} {} {}", event.step, event.category, event.tag);
    }

    fn on_halt(&mut self, steps: u64) {
        eprintln!("halted after {steps} steps");
    }
}
