use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Menu,
    Recording,
    Processing,
    Completed,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Menu => "menu",
            Self::Recording => "recording",
            Self::Processing => "processing",
            Self::Completed => "completed",
        }
    }
}

/// Phone-menu category picked with the keypad.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallCategory {
    TechnicalSupport,
    AccountIssues,
    GeneralInquiries,
}

impl CallCategory {
    pub const DEFAULT: CallCategory = CallCategory::TechnicalSupport;

    pub fn from_digits(digits: &str) -> Option<Self> {
        match digits.trim() {
            "1" => Some(Self::TechnicalSupport),
            "2" => Some(Self::AccountIssues),
            "3" => Some(Self::GeneralInquiries),
            _ => None,
        }
    }

    pub fn digit(&self) -> &'static str {
        match self {
            Self::TechnicalSupport => "1",
            Self::AccountIssues => "2",
            Self::GeneralInquiries => "3",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::TechnicalSupport => "technical support",
            Self::AccountIssues => "account issues",
            Self::GeneralInquiries => "general inquiries",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallEvent {
    DigitsEntered(String),
    GatherTimedOut,
    RecordingFinished,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallAction {
    AnnounceCategory(CallCategory),
    AnnounceInvalidSelection,
    StartRecording,
    ProcessRecording,
    PromptFollowUp,
    AskForMoreDetails,
    ThankAndHangUp,
    ReportCallDuration,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: CallState,
    pub to: CallState,
    pub event: CallEvent,
    pub category: Option<CallCategory>,
    pub actions: Vec<CallAction>,
}
