//! Interrupt intent classification.
//!
//! The NLU layer flags a turn as an interrupt and stores the classified
//! intent string in the context; the engine parses that string into an
//! `InterruptIntent` and acts on its disposition. Unknown intents are
//! treated as requests to switch to the flow of that name.

/// A classified interrupt intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptIntent {
    Cancel,
    Stop,
    Reset,
    Help,
    Menu,
    MainMenu,
    /// Any other intent: the name of a flow the user wants instead.
    FlowSwitch(String),
}

impl InterruptIntent {
    /// Parse an intent string. Case-insensitive; never fails.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cancel" => InterruptIntent::Cancel,
            "stop" => InterruptIntent::Stop,
            "reset" => InterruptIntent::Reset,
            "help" => InterruptIntent::Help,
            "menu" => InterruptIntent::Menu,
            "main_menu" => InterruptIntent::MainMenu,
            _ => InterruptIntent::FlowSwitch(raw.trim().to_string()),
        }
    }

    /// How the engine should treat this intent.
    pub fn disposition(&self) -> InterruptDisposition {
        match self {
            InterruptIntent::Cancel | InterruptIntent::Stop | InterruptIntent::Reset => {
                InterruptDisposition::CancelFlow
            }
            InterruptIntent::Help | InterruptIntent::Menu | InterruptIntent::MainMenu => {
                InterruptDisposition::HelpRequested
            }
            InterruptIntent::FlowSwitch(target) => InterruptDisposition::SwitchFlow(target.clone()),
        }
    }
}

/// What the engine does with an interrupt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptDisposition {
    /// Force a transition out of the flow (cancel / stop / reset).
    CancelFlow,
    /// Record the help flag and continue the turn normally.
    HelpRequested,
    /// Record the requested flow for the caller and continue normally.
    SwitchFlow(String),
}
