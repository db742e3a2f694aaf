//! Error-behavior state machine.
//!
//! Decides after every action whether the batch continues. The only state carried
//! across a run is whether any action has succeeded so far; `SkipIfSuccessful`
//! failures are forgiven until that first success and fatal afterwards.

use tracing::debug;

use crate::config::{ErrorBehavior, GlobalErrorBehavior};

/// Behavior actually applied to an action once `Inherit` is resolved.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EffectiveBehavior {
    Ignore,
    Halt,
    SkipIfSuccessful,
}

impl EffectiveBehavior {
    pub fn resolve(action: ErrorBehavior, global: GlobalErrorBehavior) -> Self {
        match action {
            ErrorBehavior::Ignore => Self::Ignore,
            ErrorBehavior::Halt => Self::Halt,
            ErrorBehavior::SkipIfSuccessful => Self::SkipIfSuccessful,
            ErrorBehavior::Inherit => match global {
                GlobalErrorBehavior::Ignore => Self::Ignore,
                GlobalErrorBehavior::Halt => Self::Halt,
            },
        }
    }
}

/// Outcome of evaluating one action.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Keep going.
    Continue,
    /// The action failed but the failure is not fatal.
    Tolerated,
    /// Stop the batch; nothing after this action runs.
    Halt,
}

impl Verdict {
    pub fn is_halt(self) -> bool {
        matches!(self, Verdict::Halt)
    }
}

/// Per-run policy state.
#[derive(Debug, Clone)]
pub struct ErrorPolicy {
    global: GlobalErrorBehavior,
    any_success: bool,
}

impl ErrorPolicy {
    pub fn new(global: GlobalErrorBehavior) -> Self {
        Self {
            global,
            any_success: false,
        }
    }

    pub fn any_success(&self) -> bool {
        self.any_success
    }

    /// Record one outcome and return the verdict for it.
    pub fn evaluate(&mut self, behavior: ErrorBehavior, succeeded: bool) -> Verdict {
        if succeeded {
            self.any_success = true;
            return Verdict::Continue;
        }

        let effective = EffectiveBehavior::resolve(behavior, self.global);
        let verdict = match effective {
            EffectiveBehavior::Ignore => Verdict::Tolerated,
            EffectiveBehavior::Halt => Verdict::Halt,
            EffectiveBehavior::SkipIfSuccessful if self.any_success => Verdict::Halt,
            EffectiveBehavior::SkipIfSuccessful => Verdict::Tolerated,
        };
        debug!(
            target: "curly::policy",
            ?effective, ?verdict, any_success = self.any_success,
            "Evaluated failed action"
        );
        verdict
    }
}
