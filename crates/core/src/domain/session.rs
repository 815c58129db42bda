use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ticket::Intent;
use crate::flows::states::{CallCategory, CallState};

/// Channel-qualified session identifier, e.g. `call:CA123` or `whatsapp:+15551234`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn call(call_sid: &str) -> Self {
        Self(format!("call:{call_sid}"))
    }

    pub fn chat(transport: &str, user_id: &str) -> Self {
        let user_id = user_id.strip_prefix(&format!("{transport}:")).unwrap_or(user_id);
        Self(format!("{transport}:{user_id}"))
    }

    pub fn channel(&self) -> SessionChannel {
        if self.0.starts_with("call:") {
            SessionChannel::Voice
        } else {
            SessionChannel::Chat
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionChannel {
    Voice,
    Chat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Call(CallState),
    Chat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub state: SessionState,
    pub category: Option<CallCategory>,
    pub intent: Option<Intent>,
    pub caller: Option<String>,
    pub transcript: Vec<TranscriptEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new_call(key: SessionKey, caller: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            key,
            state: SessionState::Call(CallState::Menu),
            category: None,
            intent: None,
            caller,
            transcript: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_chat(key: SessionKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            state: SessionState::Chat,
            category: None,
            intent: None,
            caller: None,
            transcript: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn channel(&self) -> SessionChannel {
        match self.state {
            SessionState::Call(_) => SessionChannel::Voice,
            SessionState::Chat => SessionChannel::Chat,
        }
    }

    pub fn call_state(&self) -> Option<CallState> {
        match self.state {
            SessionState::Call(state) => Some(state),
            SessionState::Chat => None,
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>, now: DateTime<Utc>) {
        self.push(TranscriptEntry { role: Role::User, text: text.into(), at: now, attachments: Vec::new() });
    }

    pub fn push_assistant(
        &mut self,
        text: impl Into<String>,
        attachments: Vec<String>,
        now: DateTime<Utc>,
    ) {
        self.push(TranscriptEntry { role: Role::Assistant, text: text.into(), at: now, attachments });
    }

    pub fn user_turns(&self) -> usize {
        self.transcript.iter().filter(|entry| entry.role == Role::User).count()
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    fn push(&mut self, entry: TranscriptEntry) {
        let at = entry.at;
        self.transcript.push(entry);
        self.touch(at);
    }
}
