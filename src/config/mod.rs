//! Configuration module for the USP client
//!
//! Settings are loaded from environment variables (after `.env` has been
//! loaded by the binary) and optionally from a YAML file.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use usp_client::config::UspSettings;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Environment only
//! let settings = UspSettings::from_env()?;
//!
//! // YAML file on top of the environment
//! let settings = UspSettings::from_file(Path::new("usp.yaml"))?;
//! let config = settings.to_config()?;
//! println!("Connecting to {}", config.resolve().url);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use zeroize::Zeroizing;

mod yaml;

pub use yaml::{AuthYaml, ServiceYaml, TransportYaml, YamlConfig};

use crate::core::usp::{
    AuthenticationType, DEFAULT_CONNECT_TIMEOUT, DEFAULT_WRITE_TIMEOUT, EndpointType,
    OutputFormat, RecognitionMode, UspConfig, UspError,
};

/// Errors raised while loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("Failed to parse YAML config: {0}")]
    Parse(String),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("No credentials configured; set USP_SUBSCRIPTION_KEY or USP_AUTH_TOKEN")]
    MissingCredentials,
    #[error(transparent)]
    Config(#[from] UspError),
}

/// Loaded client settings
///
/// Credentials are wiped from memory when the settings are dropped.
#[derive(Clone)]
pub struct UspSettings {
    pub subscription_key: Option<Zeroizing<String>>,
    pub auth_token: Option<Zeroizing<String>>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub endpoint_type: EndpointType,
    pub recognition_mode: RecognitionMode,
    pub language: Option<String>,
    pub output_format: OutputFormat,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for UspSettings {
    fn default() -> Self {
        Self {
            subscription_key: None,
            auth_token: None,
            region: None,
            endpoint: None,
            endpoint_type: EndpointType::default(),
            recognition_mode: RecognitionMode::default(),
            language: None,
            output_format: OutputFormat::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for UspSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UspSettings")
            .field("subscription_key", &self.subscription_key.as_ref().map(|_| "<redacted>"))
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("endpoint_type", &self.endpoint_type)
            .field("recognition_mode", &self.recognition_mode)
            .field("language", &self.language)
            .field("output_format", &self.output_format)
            .field("connect_timeout", &self.connect_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl UspSettings {
    /// Load settings from environment variables
    ///
    /// # Errors
    /// Returns an error if a variable holds a value that cannot be parsed.
    pub fn from_env() -> Result<Self, SettingsError> {
        let mut settings = Self {
            subscription_key: env_string("USP_SUBSCRIPTION_KEY").map(Zeroizing::new),
            auth_token: env_string("USP_AUTH_TOKEN").map(Zeroizing::new),
            region: env_string("USP_REGION"),
            endpoint: env_string("USP_ENDPOINT"),
            language: env_string("USP_LANGUAGE"),
            ..Self::default()
        };

        if let Some(v) = env_string("USP_ENDPOINT_TYPE") {
            settings.endpoint_type = parse_value("USP_ENDPOINT_TYPE", &v)?;
        }
        if let Some(v) = env_string("USP_RECOGNITION_MODE") {
            settings.recognition_mode = parse_value("USP_RECOGNITION_MODE", &v)?;
        }
        if let Some(v) = env_string("USP_OUTPUT_FORMAT") {
            settings.output_format = parse_value("USP_OUTPUT_FORMAT", &v)?;
        }
        if let Some(v) = env_string("USP_CONNECT_TIMEOUT_SECS") {
            settings.connect_timeout =
                Duration::from_secs(parse_value("USP_CONNECT_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = env_string("USP_WRITE_TIMEOUT_SECS") {
            settings.write_timeout = Duration::from_secs(parse_value("USP_WRITE_TIMEOUT_SECS", &v)?);
        }

        Ok(settings)
    }

    /// Load settings from the environment, then apply a YAML file on top
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let yaml = YamlConfig::from_file(path)?;
        let mut settings = Self::from_env()?;
        settings.apply_yaml(yaml)?;
        Ok(settings)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) -> Result<(), SettingsError> {
        if let Some(service) = yaml.service {
            if service.region.is_some() {
                self.region = service.region;
            }
            if service.endpoint.is_some() {
                self.endpoint = service.endpoint;
            }
            if service.language.is_some() {
                self.language = service.language;
            }
            if let Some(v) = service.endpoint_type {
                self.endpoint_type = parse_value("service.endpoint_type", &v)?;
            }
            if let Some(v) = service.recognition_mode {
                self.recognition_mode = parse_value("service.recognition_mode", &v)?;
            }
            if let Some(v) = service.output_format {
                self.output_format = parse_value("service.output_format", &v)?;
            }
        }

        if let Some(auth) = yaml.auth {
            if let Some(key) = auth.subscription_key {
                self.subscription_key = Some(Zeroizing::new(key));
            }
            if let Some(token) = auth.auth_token {
                self.auth_token = Some(Zeroizing::new(token));
            }
        }

        if let Some(transport) = yaml.transport {
            if let Some(secs) = transport.connect_timeout_secs {
                self.connect_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = transport.write_timeout_secs {
                self.write_timeout = Duration::from_secs(secs);
            }
        }

        Ok(())
    }

    /// Build a validated client configuration
    ///
    /// A subscription key is preferred over an authorization token when both
    /// are present.
    pub fn to_config(&self) -> Result<UspConfig, SettingsError> {
        let (kind, credential) = match (&self.subscription_key, &self.auth_token) {
            (Some(key), _) => (AuthenticationType::SubscriptionKey, key.as_str()),
            (None, Some(token)) => (AuthenticationType::AuthorizationToken, token.as_str()),
            (None, None) => return Err(SettingsError::MissingCredentials),
        };

        let mut builder = UspConfig::builder()
            .authentication(kind, credential)
            .endpoint_type(self.endpoint_type)
            .recognition_mode(self.recognition_mode)
            .output_format(self.output_format)
            .connect_timeout(self.connect_timeout)
            .write_timeout(self.write_timeout);

        if let Some(region) = &self.region {
            builder = builder.region(region);
        }
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if let Some(language) = &self.language {
            builder = builder.language(language);
        }

        Ok(builder.build()?)
    }
}
