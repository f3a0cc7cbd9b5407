use serde::{Deserialize, Serialize};

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

/// One line of a session's conversation, as projected by its watcher.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub role: String,
    pub text: String,
}

impl DigestEntry {
    pub fn new(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(ROLE_USER, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(ROLE_ASSISTANT, text)
    }

    pub fn is_user(&self) -> bool {
        self.role == ROLE_USER
    }
}

/// Render a digest as newline-joined `role: text` lines.
pub fn transcript(entries: &[DigestEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}: {}", e.role, e.text))
        .collect::<Vec<_>>()
        .join("\n")
}
