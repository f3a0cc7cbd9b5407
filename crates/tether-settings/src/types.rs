//! Settings schema. Every section falls back to its defaults per field, so a
//! partial user file is always valid.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    pub service: ServiceSettings,
    pub presence: PresenceSettings,
    pub title: TitleSettings,
    pub llm: LlmSettings,
    pub auth: AuthSettings,
    pub logging: LoggingSettings,
}

/// Identity of this device and the API the agent manager talks to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceSettings {
    pub device_id: String,
    pub api_url: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            api_url: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceSettings {
    /// Durable-session proxy. Presence writes are skipped when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

/// Model used for session titles. The token cap is fixed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TitleSettings {
    pub model: String,
}

impl Default for TitleSettings {
    fn default() -> Self {
        Self {
            model: "claude-haiku-4-5-20251001".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmSettings {
    pub base_url: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Where OAuth credentials are persisted. Empty means `~/.tether/auth.json`.
    pub auth_file: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = TetherSettings::default();
        assert_eq!(s.title.model, "claude-haiku-4-5-20251001");
        assert!(s.auth.auth_file.is_empty());
        assert!(s.presence.proxy_url.is_none());
        assert_eq!(s.logging.level, "info");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: TetherSettings =
            serde_json::from_str(r#"{"service": {"deviceId": "laptop"}}"#).unwrap();
        assert_eq!(s.service.device_id, "laptop");
        assert_eq!(s.service.api_url, ServiceSettings::default().api_url);
        assert_eq!(s.title, TitleSettings::default());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(TetherSettings::default()).unwrap();
        assert!(json["service"].get("apiUrl").is_some());
        assert!(json["auth"].get("authFile").is_some());
    }
}
