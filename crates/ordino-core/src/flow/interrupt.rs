//! Intent interruption resolution.
//!
//! The NLU layer (outside this crate) classifies out-of-band intents and
//! stages them in context as `_intent_interrupt` + `_current_intent`.
//! The engine checks that marker at the top of every turn, before entry
//! actions, and resolves it here: cancel-class intents force a transition,
//! help-class intents set a flag, anything else is recorded as a pending
//! flow switch for the calling service.

use tracing::debug;

use ordino_types::context::ExecutionContext;
use ordino_types::flow::{FlowDefinition, StateDefinition};
use ordino_types::intent::{InterruptDisposition, InterruptIntent};
use ordino_types::turn::events;

/// How an interrupt check resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// No interrupt flagged.
    None,
    /// A cancel-class intent forces a transition to `target`.
    Cancelled { target: String, intent: String },
    /// A cancel-class intent with nowhere to go; the turn continues.
    CancelUnroutable { intent: String },
    /// Help or flow-switch recorded in context; the turn continues.
    Noted { intent: String },
}

/// Resolve a pending intent interrupt before state execution.
///
/// Clears the interrupt flag in every handled case. Cancel targets
/// resolve in precedence order: the state's own `cancel` transition,
/// then the flow's `settings.cancel_state`, then the first declared
/// final state.
pub fn check_interrupt(
    flow: &FlowDefinition,
    state: &StateDefinition,
    context: &mut ExecutionContext,
) -> InterruptOutcome {
    if !context.intent_interrupt() {
        return InterruptOutcome::None;
    }

    let Some(raw) = context.current_intent().map(str::to_string) else {
        // Flag without an intent is a stale marker, drop it
        debug!("interrupt flag set without an intent, clearing");
        context.clear_intent_interrupt();
        return InterruptOutcome::None;
    };

    let intent = InterruptIntent::parse(&raw);
    context.clear_intent_interrupt();

    match intent.disposition() {
        InterruptDisposition::CancelFlow => {
            let target = state
                .transition(events::CANCEL)
                .map(str::to_string)
                .or_else(|| flow.settings.cancel_state.clone())
                .or_else(|| flow.first_final_state().map(str::to_string));
            match target {
                Some(target) => InterruptOutcome::Cancelled {
                    target,
                    intent: raw,
                },
                None => InterruptOutcome::CancelUnroutable { intent: raw },
            }
        }
        InterruptDisposition::HelpRequested => {
            context.set_help_requested();
            InterruptOutcome::Noted { intent: raw }
        }
        InterruptDisposition::SwitchFlow(flow_id) => {
            context.set_pending_flow_switch(flow_id);
            InterruptOutcome::Noted { intent: raw }
        }
    }
}
