//! Plugin lifecycle state machine
//!
//! ```text
//! Unloaded -> Loaded -> Initialized -> Activated <-> Deactivated -> Terminated
//! ```
//!
//! The table here only decides whether a transition is legal and what it leads
//! to; [`PluginInstance`](crate::PluginInstance) performs the plugin calls and
//! commits the new state only when they succeed.

use crate::error::{Error, Result};

/// Lifecycle state of a plugin instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// No component exists
    Unloaded,
    /// Component created and initialized against the host
    Loaded,
    /// Processing set up and buses negotiated
    Initialized,
    /// Processing running
    Activated,
    /// Processing stopped, may be activated again
    Deactivated,
    /// Torn down; terminal
    Terminated,
}

impl LifecycleState {
    /// Whether processing has been set up
    pub fn is_initialized(self) -> bool {
        matches!(
            self,
            LifecycleState::Initialized | LifecycleState::Activated | LifecycleState::Deactivated
        )
    }

    /// Whether the process call is legal
    pub fn is_active(self) -> bool {
        self == LifecycleState::Activated
    }

    /// Whether a component exists and has not been terminated
    pub fn is_loaded(self) -> bool {
        !matches!(self, LifecycleState::Unloaded | LifecycleState::Terminated)
    }
}

/// A requested lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Set up processing
    Initialize,
    /// Start processing
    Activate,
    /// Stop processing
    Deactivate,
    /// Tear down
    Terminate,
    /// Render a block (no state change)
    Process,
}

/// What an instance has to do for a legal transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Perform the plugin calls, then enter the given state
    Enter(LifecycleState),
    /// Nothing to do, report success
    Stay,
}

/// Decide a transition from `state`
pub fn plan(state: LifecycleState, transition: Transition) -> Result<Step> {
    use LifecycleState::*;

    match (transition, state) {
        (Transition::Initialize, Loaded) => Ok(Step::Enter(Initialized)),
        (Transition::Initialize, Initialized | Activated) => Err(Error::Unsupported(
            "plugin is already initialized; reload it to change sample rate or block size"
                .to_string(),
        )),
        (Transition::Initialize, Deactivated) => Err(Error::Unsupported(
            "re-initializing a deactivated plugin is not supported; reload it".to_string(),
        )),

        (Transition::Activate, Initialized | Deactivated) => Ok(Step::Enter(Activated)),
        (Transition::Activate, Activated) => Ok(Step::Stay),
        (Transition::Activate, Loaded) => Err(Error::NotInitialized(
            "initialize the plugin before activating it".to_string(),
        )),

        (Transition::Deactivate, Activated) => Ok(Step::Enter(Deactivated)),
        (Transition::Deactivate, _) => Ok(Step::Stay),

        (Transition::Terminate, Terminated) => Ok(Step::Stay),
        (Transition::Terminate, _) => Ok(Step::Enter(Terminated)),

        (Transition::Process, Activated) => Ok(Step::Stay),
        (Transition::Process, _) => Err(Error::NotActive),

        (_, Terminated) => Err(Error::NotInitialized(
            "plugin has been terminated".to_string(),
        )),
        (_, Unloaded) => Err(Error::NotInitialized("plugin is not loaded".to_string())),
    }
}
