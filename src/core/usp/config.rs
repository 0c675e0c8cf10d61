//! USP client configuration.
//!
//! This module defines the immutable [`UspConfig`] and the builder that
//! produces it. All defaults are applied and all validation happens once, in
//! [`UspConfigBuilder::build`], so a built configuration is always usable.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;
use url::form_urlencoded;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::errors::UspError;
use crate::utils::url_validation::validate_endpoint_url;

// =============================================================================
// Constants
// =============================================================================

/// Region used when the caller supplies none.
pub const DEFAULT_REGION: &str = "westus";

/// Recognition language used when the caller supplies none.
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Upper bound for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for queueing one audio chunk when the send queue is full.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of audio chunks buffered between the writer and the socket task.
pub const DEFAULT_AUDIO_QUEUE_DEPTH: usize = 32;

// =============================================================================
// Endpoint Type
// =============================================================================

/// Category of service a connection targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointType {
    /// Speech recognition.
    #[default]
    Speech,
    /// Speech recognition with intent understanding.
    Intent,
    /// Speech translation.
    Translation,
}

impl EndpointType {
    /// Hostname label used for region-derived routing.
    pub fn host_label(&self) -> &'static str {
        match self {
            Self::Speech => "stt",
            Self::Intent => "sr",
            Self::Translation => "s2s",
        }
    }

    /// Infer the service an explicit endpoint URL points at.
    pub fn from_url(url: &Url) -> Option<Self> {
        let path = url.path();
        if path.contains("/speech/translation") {
            return Some(Self::Translation);
        }
        let host = url.host_str().unwrap_or_default();
        if host.contains(".sr.speech.") {
            return Some(Self::Intent);
        }
        if path.contains("/speech/recognition") || host.contains(".stt.speech.") {
            return Some(Self::Speech);
        }
        None
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Speech => "speech",
            Self::Intent => "intent",
            Self::Translation => "translation",
        }
    }
}

impl std::fmt::Display for EndpointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EndpointType {
    type Err = UspError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "speech" => Ok(Self::Speech),
            "intent" => Ok(Self::Intent),
            "translation" => Ok(Self::Translation),
            _ => Err(UspError::Configuration(format!(
                "Unsupported endpoint type: {s}. Supported types: speech, intent, translation"
            ))),
        }
    }
}

// =============================================================================
// Recognition Mode
// =============================================================================

/// Session-level recognition behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionMode {
    /// Short utterances, one turn per request.
    #[default]
    Interactive,
    /// Longer conversational speech.
    Conversation,
    /// Continuous dictation.
    Dictation,
}

impl RecognitionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Conversation => "conversation",
            Self::Dictation => "dictation",
        }
    }
}

impl std::fmt::Display for RecognitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RecognitionMode {
    type Err = UspError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "interactive" => Ok(Self::Interactive),
            "conversation" => Ok(Self::Conversation),
            "dictation" => Ok(Self::Dictation),
            _ => Err(UspError::Configuration(format!(
                "Unsupported recognition mode: {s}. Supported modes: interactive, conversation, dictation"
            ))),
        }
    }
}

// =============================================================================
// Output Format
// =============================================================================

/// Detail level of recognition results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Simple,
    Detailed,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Detailed => "detailed",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = UspError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "detailed" => Ok(Self::Detailed),
            _ => Err(UspError::Configuration(format!(
                "Unsupported output format: {s}. Supported formats: simple, detailed"
            ))),
        }
    }
}

// =============================================================================
// Authentication
// =============================================================================

/// How the credential is presented to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticationType {
    /// `Ocp-Apim-Subscription-Key` header.
    SubscriptionKey,
    /// `Authorization: Bearer <token>` header.
    AuthorizationToken,
}

/// Credential material. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Authentication {
    #[zeroize(skip)]
    kind: AuthenticationType,
    credential: String,
}

impl Authentication {
    pub fn new(kind: AuthenticationType, credential: impl Into<String>) -> Self {
        Self {
            kind,
            credential: credential.into(),
        }
    }

    pub fn kind(&self) -> AuthenticationType {
        self.kind
    }

    /// Header name and value to attach to the upgrade request. The value is
    /// wiped when dropped.
    pub fn header(&self) -> (&'static str, Zeroizing<String>) {
        match self.kind {
            AuthenticationType::SubscriptionKey => (
                "Ocp-Apim-Subscription-Key",
                Zeroizing::new(self.credential.clone()),
            ),
            AuthenticationType::AuthorizationToken => (
                "Authorization",
                Zeroizing::new(format!("Bearer {}", self.credential)),
            ),
        }
    }

    fn is_empty(&self) -> bool {
        self.credential.trim().is_empty()
    }
}

impl std::fmt::Debug for Authentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authentication")
            .field("kind", &self.kind)
            .field("credential", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Resolved Endpoint
// =============================================================================

/// Final connection target after routing resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub url: Url,
    pub endpoint_type: EndpointType,
}

// =============================================================================
// UspConfig
// =============================================================================

/// Immutable connection configuration.
///
/// Built once with [`UspConfig::builder`]; every connection created from it
/// sees the same values.
#[derive(Debug, Clone)]
pub struct UspConfig {
    recognition_mode: RecognitionMode,
    region: String,
    endpoint_url: Option<Url>,
    authentication: Authentication,
    language: String,
    output_format: OutputFormat,
    connect_timeout: Duration,
    write_timeout: Duration,
    audio_queue_depth: usize,
    resolved: ResolvedEndpoint,
}

impl UspConfig {
    pub fn builder() -> UspConfigBuilder {
        UspConfigBuilder::default()
    }

    /// Endpoint type the session uses. An explicit URL decides it, so this
    /// may differ from the value passed to the builder.
    pub fn endpoint_type(&self) -> EndpointType {
        self.resolved.endpoint_type
    }

    pub fn recognition_mode(&self) -> RecognitionMode {
        self.recognition_mode
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn endpoint_url(&self) -> Option<&Url> {
        self.endpoint_url.as_ref()
    }

    pub fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    pub fn audio_queue_depth(&self) -> usize {
        self.audio_queue_depth
    }

    /// Resolve the connection target.
    ///
    /// An explicit endpoint URL wins over region routing and is used as-is;
    /// the endpoint type then follows what the URL implies, defaulting to
    /// [`EndpointType::Speech`].
    pub fn resolve(&self) -> ResolvedEndpoint {
        self.resolved.clone()
    }
}

fn region_url(
    region: &str,
    endpoint_type: EndpointType,
    mode: RecognitionMode,
    language: &str,
    format: OutputFormat,
) -> Result<Url, UspError> {
    let host = format!("{region}.{}.speech.microsoft.com", endpoint_type.host_label());
    let path = match endpoint_type {
        EndpointType::Translation => "/speech/translation/cognitiveservices/v1".to_string(),
        _ => format!("/speech/recognition/{}/cognitiveservices/v1", mode.as_str()),
    };

    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("language", language)
        .append_pair("format", format.as_str())
        .finish();

    Url::parse(&format!("wss://{host}{path}?{query}"))
        .map_err(|e| UspError::Configuration(format!("Invalid region endpoint: {e}")))
}

// =============================================================================
// Builder
// =============================================================================

/// Collects configuration before producing an immutable [`UspConfig`].
#[derive(Debug, Clone, Default)]
pub struct UspConfigBuilder {
    endpoint_type: EndpointType,
    recognition_mode: RecognitionMode,
    region: Option<String>,
    endpoint_url: Option<String>,
    authentication: Option<Authentication>,
    language: Option<String>,
    output_format: OutputFormat,
    connect_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    audio_queue_depth: Option<usize>,
}

impl UspConfigBuilder {
    pub fn endpoint_type(mut self, endpoint_type: EndpointType) -> Self {
        self.endpoint_type = endpoint_type;
        self
    }

    pub fn recognition_mode(mut self, mode: RecognitionMode) -> Self {
        self.recognition_mode = mode;
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn authentication(mut self, kind: AuthenticationType, credential: impl Into<String>) -> Self {
        self.authentication = Some(Authentication::new(kind, credential));
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    pub fn audio_queue_depth(mut self, depth: usize) -> Self {
        self.audio_queue_depth = Some(depth);
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<UspConfig, UspError> {
        let authentication = self.authentication.ok_or_else(|| {
            UspError::Configuration("Authentication is required".to_string())
        })?;
        if authentication.is_empty() {
            return Err(UspError::Configuration(
                "Authentication credential must not be empty".to_string(),
            ));
        }

        let region = match self.region.as_deref().map(str::trim) {
            Some(r) if !r.is_empty() => r.to_lowercase(),
            _ => DEFAULT_REGION.to_string(),
        };
        if !region.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(UspError::Configuration(format!("Invalid region: {region}")));
        }

        let endpoint_url = match self.endpoint_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Some(
                validate_endpoint_url(url)
                    .map_err(|e| UspError::Configuration(format!("Invalid endpoint URL: {e}")))?,
            ),
            _ => None,
        };

        let language = match self.language {
            Some(l) if !l.trim().is_empty() => l.trim().to_string(),
            _ => DEFAULT_LANGUAGE.to_string(),
        };

        let audio_queue_depth = self.audio_queue_depth.unwrap_or(DEFAULT_AUDIO_QUEUE_DEPTH);
        if audio_queue_depth == 0 {
            return Err(UspError::Configuration(
                "Audio queue depth must be at least 1".to_string(),
            ));
        }

        let resolved = match &endpoint_url {
            Some(url) => ResolvedEndpoint {
                url: url.clone(),
                endpoint_type: EndpointType::from_url(url).unwrap_or(EndpointType::Speech),
            },
            None => ResolvedEndpoint {
                url: region_url(
                    &region,
                    self.endpoint_type,
                    self.recognition_mode,
                    &language,
                    self.output_format,
                )?,
                endpoint_type: self.endpoint_type,
            },
        };

        Ok(UspConfig {
            resolved,
            recognition_mode: self.recognition_mode,
            region,
            endpoint_url,
            authentication,
            language,
            output_format: self.output_format,
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            write_timeout: self.write_timeout.unwrap_or(DEFAULT_WRITE_TIMEOUT),
            audio_queue_depth,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
