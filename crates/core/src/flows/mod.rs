pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, IvrFlow};
pub use states::{CallAction, CallCategory, CallEvent, CallState, TransitionOutcome};
