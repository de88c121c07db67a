//! Tool-step policy and telemetry.
//!
//! The generation loop consults [`StepPolicy`]/[`StepState`] before each
//! model call: whether tools are attached at all, whether this step is forced
//! into tool use, and whether the step ceiling has been reached. State is
//! carried explicitly as running counters — nothing is recomputed from the
//! transcript.

use lq_domain::config::SteppingConfig;
use lq_domain::error::Error;
use lq_domain::stream::FinishReason;
use lq_providers::ToolChoice;

/// Per-request stepping policy, fixed at request start.
#[derive(Debug, Clone, Copy)]
pub struct StepPolicy {
    /// Tools attached at all (model supports them and a catalog exists).
    pub tools_enabled: bool,
    /// Force step 0 into tool use (set when a repository reference was
    /// detected and research is expected).
    pub force_first: bool,
    /// Hard ceiling on steps; reaching it forces completion.
    pub max_steps: u32,
    /// Steps 1..=window are forced while cumulative tool calls stay below
    /// `min_tool_calls`.
    pub forced_step_window: u32,
    pub min_tool_calls: u32,
}

impl StepPolicy {
    pub fn new(config: &SteppingConfig, tools_enabled: bool, force_first: bool) -> Self {
        Self {
            tools_enabled,
            force_first,
            max_steps: config.max_steps,
            forced_step_window: config.forced_step_window,
            min_tool_calls: config.min_tool_calls,
        }
    }

    /// A policy with tools off entirely; every step is a plain model turn.
    pub fn disabled(config: &SteppingConfig) -> Self {
        Self::new(config, false, false)
    }
}

/// Running counters for one request's model↔tool loop.
#[derive(Debug, Default)]
pub struct StepState {
    step: u32,
    tool_calls_made: u32,
}

impl StepState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn tool_calls_made(&self) -> u32 {
        self.tool_calls_made
    }

    /// Whether another step may run.
    pub fn can_continue(&self, policy: &StepPolicy) -> bool {
        self.step < policy.max_steps
    }

    /// Tool choice for the upcoming step.
    pub fn tool_choice(&self, policy: &StepPolicy) -> ToolChoice {
        if !policy.tools_enabled {
            return ToolChoice::None;
        }
        if self.step == 0 && policy.force_first {
            return ToolChoice::Required;
        }
        if (1..=policy.forced_step_window).contains(&self.step)
            && self.tool_calls_made < policy.min_tool_calls
        {
            return ToolChoice::Required;
        }
        ToolChoice::Auto
    }

    /// Record a completed step and the tool calls it made.
    pub fn record_step(&mut self, tool_calls: u32) {
        self.step += 1;
        self.tool_calls_made += tool_calls;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Telemetry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One step's telemetry.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: u32,
    pub tool_calls: u32,
    pub tool_results: u32,
    pub finish_reason: FinishReason,
}

/// Observer hook for step telemetry. Observations never alter control flow.
pub trait StepObserver: Send + Sync {
    fn on_step(&self, report: &StepReport);
    fn on_error(&self, step: u32, error: &Error);
}

/// Default observer: structured logs.
pub struct TracingObserver;

impl StepObserver for TracingObserver {
    fn on_step(&self, report: &StepReport) {
        tracing::info!(
            step = report.step,
            tool_calls = report.tool_calls,
            tool_results = report.tool_results,
            finish_reason = ?report.finish_reason,
            "generation step"
        );
    }

    fn on_error(&self, step: u32, error: &Error) {
        tracing::error!(step, error = %error, "generation step failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(tools_enabled: bool, force_first: bool) -> StepPolicy {
        StepPolicy::new(&SteppingConfig::default(), tools_enabled, force_first)
    }

    #[test]
    fn tools_disabled_never_forces() {
        let policy = policy(false, true);
        let state = StepState::new();
        assert_eq!(state.tool_choice(&policy), ToolChoice::None);
    }

    #[test]
    fn force_first_applies_to_step_zero_only_when_requested() {
        let state = StepState::new();
        assert_eq!(state.tool_choice(&policy(true, true)), ToolChoice::Required);
        assert_eq!(state.tool_choice(&policy(true, false)), ToolChoice::Auto);
    }

    #[test]
    fn early_steps_forced_until_enough_tool_calls() {
        let policy = policy(true, false);
        let mut state = StepState::new();
        state.record_step(2); // step 0 made 2 calls

        // Steps 1..=4 with fewer than 5 cumulative calls stay forced.
        assert_eq!(state.step(), 1);
        assert_eq!(state.tool_choice(&policy), ToolChoice::Required);

        state.record_step(3); // cumulative now 5
        assert_eq!(state.step(), 2);
        assert_eq!(state.tool_choice(&policy), ToolChoice::Auto);
    }

    #[test]
    fn forcing_stops_after_the_window() {
        let policy = policy(true, false);
        let mut state = StepState::new();
        for _ in 0..5 {
            state.record_step(0); // no tool calls at all
        }
        // Step 5 is past the forced window even with zero cumulative calls.
        assert_eq!(state.step(), 5);
        assert_eq!(state.tool_choice(&policy), ToolChoice::Auto);
    }

    #[test]
    fn ceiling_stops_the_loop() {
        let policy = policy(true, false);
        let mut state = StepState::new();
        for _ in 0..20 {
            assert!(state.can_continue(&policy));
            state.record_step(1);
        }
        assert!(!state.can_continue(&policy));
    }
}
