use serde::Deserialize;
use std::path::Path;

use super::SettingsError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// service:
///   region: "westus"
///   endpoint: "wss://westus.stt.speech.microsoft.com/speech/recognition/interactive/cognitiveservices/v1"
///   endpoint_type: "speech"
///   recognition_mode: "interactive"
///   language: "en-US"
///   output_format: "simple"
///
/// auth:
///   subscription_key: "your-key"
///   # or
///   auth_token: "bearer-token"
///
/// transport:
///   connect_timeout_secs: 30
///   write_timeout_secs: 5
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub service: Option<ServiceYaml>,
    pub auth: Option<AuthYaml>,
    pub transport: Option<TransportYaml>,
}

/// Service routing from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServiceYaml {
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub endpoint_type: Option<String>,
    pub recognition_mode: Option<String>,
    pub language: Option<String>,
    pub output_format: Option<String>,
}

/// Credentials from YAML
#[derive(Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthYaml {
    pub subscription_key: Option<String>,
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for AuthYaml {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthYaml")
            .field("subscription_key", &self.subscription_key.as_ref().map(|_| "<redacted>"))
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Transport knobs from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TransportYaml {
    pub connect_timeout_secs: Option<u64>,
    pub write_timeout_secs: Option<u64>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path).map_err(|e| SettingsError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        serde_yaml::from_str(&contents).map_err(|e| SettingsError::Parse(e.to_string()))
    }
}
