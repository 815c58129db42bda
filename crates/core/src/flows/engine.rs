use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{CallAction, CallCategory, CallEvent, CallState, TransitionOutcome};

pub trait FlowDefinition {
    fn name(&self) -> &'static str;
    fn initial_state(&self) -> CallState;
    fn transition(
        &self,
        current: &CallState,
        event: &CallEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Phone menu: `menu -> recording -> processing -> (recording | completed)`.
#[derive(Clone, Debug, Default)]
pub struct IvrFlow;

impl FlowDefinition for IvrFlow {
    fn name(&self) -> &'static str {
        "ivr"
    }

    fn initial_state(&self) -> CallState {
        CallState::Menu
    }

    fn transition(
        &self,
        current: &CallState,
        event: &CallEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_ivr(current, event)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn name(&self) -> &'static str {
        self.flow.name()
    }

    pub fn initial_state(&self) -> CallState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &CallState,
        event: &CallEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &CallState,
        event: &CallEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                let mut audit_event = AuditEvent::from_context(
                    audit,
                    "flow.transition_applied",
                    AuditCategory::Flow,
                    AuditOutcome::Success,
                )
                .with_metadata("flow", self.name())
                .with_metadata("from", outcome.from.as_str())
                .with_metadata("to", outcome.to.as_str())
                .with_metadata("event", format!("{:?}", outcome.event));
                if let Some(category) = outcome.category {
                    audit_event = audit_event.with_metadata("category", category.digit());
                }
                sink.emit(audit_event);
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("flow", self.name())
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<IvrFlow> {
    fn default() -> Self {
        Self::new(IvrFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("call already completed; event {event:?} ignored")]
    TerminalState { event: CallEvent },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: CallState, event: CallEvent },
}

fn transition_ivr(
    current: &CallState,
    event: &CallEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use CallAction::{
        AnnounceCategory, AnnounceInvalidSelection, AskForMoreDetails, ProcessRecording,
        PromptFollowUp, ReportCallDuration, StartRecording, ThankAndHangUp,
    };
    use CallEvent::{DigitsEntered, GatherTimedOut, RecordingFinished};
    use CallState::{Completed, Menu, Processing, Recording};

    let (to, category, actions) = match (current, event) {
        (Completed, _) => {
            return Err(FlowTransitionError::TerminalState { event: event.clone() });
        }
        (Menu, DigitsEntered(digits)) => match CallCategory::from_digits(digits) {
            Some(category) => (Recording, Some(category), vec![AnnounceCategory(category), StartRecording]),
            None => (Recording, Some(CallCategory::DEFAULT), vec![AnnounceInvalidSelection, StartRecording]),
        },
        (Menu, GatherTimedOut) => (
            Recording,
            Some(CallCategory::DEFAULT),
            vec![AnnounceCategory(CallCategory::DEFAULT), StartRecording],
        ),
        (Recording, RecordingFinished) => (Processing, None, vec![ProcessRecording, PromptFollowUp]),
        (Processing, DigitsEntered(digits)) if digits.trim() == "1" => {
            (Recording, None, vec![AskForMoreDetails, StartRecording])
        }
        (Processing, DigitsEntered(_)) | (Processing, GatherTimedOut) => {
            (Completed, None, vec![ThankAndHangUp, ReportCallDuration])
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone(), category, actions })
}
