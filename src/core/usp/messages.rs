//! USP wire framing.
//!
//! The service speaks two frame shapes over one WebSocket:
//!
//! - **Text frames** carry `Name:Value\r\n` headers, a blank line, then a body
//!   (usually JSON). Every frame has a `Path` header naming the message.
//! - **Binary frames** carry audio: a 2-byte big-endian header length, the
//!   same header block, then raw audio bytes. A frame with an empty payload
//!   marks the end of the audio stream for the current turn.
//!
//! # Example
//!
//! ```rust
//! use usp_client::core::usp::messages::{UspMessage, paths};
//!
//! let frame = "X-RequestId:ABC\r\nPath:speech.phrase\r\nContent-Type:application/json\r\n\r\n\
//!     {\"RecognitionStatus\":\"Success\",\"DisplayText\":\"Hello.\",\"Offset\":0,\"Duration\":100}";
//! let msg = UspMessage::parse(frame).unwrap();
//! assert_eq!(msg.path(), paths::SPEECH_PHRASE);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::config::UspConfig;
use super::events::RecognitionStatus;

/// Message paths used on the wire.
pub mod paths {
    pub const SPEECH_CONFIG: &str = "speech.config";
    pub const AUDIO: &str = "audio";
    pub const TURN_START: &str = "turn.start";
    pub const TURN_END: &str = "turn.end";
    pub const SPEECH_START_DETECTED: &str = "speech.startDetected";
    pub const SPEECH_END_DETECTED: &str = "speech.endDetected";
    pub const SPEECH_HYPOTHESIS: &str = "speech.hypothesis";
    pub const SPEECH_FRAGMENT: &str = "speech.fragment";
    pub const SPEECH_PHRASE: &str = "speech.phrase";
    pub const RESPONSE: &str = "response";
}

/// Header names used on the wire.
pub mod headers {
    pub const PATH: &str = "Path";
    pub const REQUEST_ID: &str = "X-RequestId";
    pub const TIMESTAMP: &str = "X-Timestamp";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const CONNECTION_ID: &str = "X-ConnectionId";
}

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const AUDIO_CONTENT_TYPE: &str = "audio/x-wav";

// =============================================================================
// Errors
// =============================================================================

/// Framing and parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UspMessageError {
    #[error("missing header/body separator")]
    MissingSeparator,
    #[error("missing Path header")]
    MissingPath,
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    #[error("binary frame too short: {0} bytes")]
    TruncatedFrame(usize),
    #[error("header block is not valid UTF-8")]
    InvalidHeaderEncoding,
    #[error("invalid JSON body for {path}: {reason}")]
    InvalidBody { path: String, reason: String },
}

// =============================================================================
// Encoding
// =============================================================================

/// Generate a dash-free request identifier.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string().to_uppercase()
}

fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

fn write_headers(out: &mut String, path: &str, request_id: &str, content_type: &str) {
    let ts = timestamp();
    for (name, value) in [
        (headers::PATH, path),
        (headers::REQUEST_ID, request_id),
        (headers::TIMESTAMP, ts.as_str()),
        (headers::CONTENT_TYPE, content_type),
    ] {
        out.push_str(name);
        out.push(':');
        out.push_str(value);
        out.push_str("\r\n");
    }
}

/// Build a text frame.
pub fn encode_text_message(path: &str, request_id: &str, body: &str) -> String {
    let mut out = String::with_capacity(128 + body.len());
    write_headers(&mut out, path, request_id, JSON_CONTENT_TYPE);
    out.push_str("\r\n");
    out.push_str(body);
    out
}

/// Build a binary audio frame. An empty `payload` encodes end-of-audio.
pub fn encode_audio_message(request_id: &str, payload: &[u8]) -> Bytes {
    let mut header = String::with_capacity(128);
    write_headers(&mut header, paths::AUDIO, request_id, AUDIO_CONTENT_TYPE);

    let mut buf = BytesMut::with_capacity(2 + header.len() + payload.len());
    // Header blocks are a few hundred bytes at most.
    buf.put_u16(header.len() as u16);
    buf.put_slice(header.as_bytes());
    buf.put_slice(payload);
    buf.freeze()
}

/// A decoded binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub headers: Vec<(String, String)>,
    pub payload: Bytes,
}

impl AudioFrame {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// True for the terminating frame of a turn.
    pub fn is_end_of_audio(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Split a binary frame into headers and payload.
pub fn decode_audio_message(frame: &[u8]) -> Result<AudioFrame, UspMessageError> {
    if frame.len() < 2 {
        return Err(UspMessageError::TruncatedFrame(frame.len()));
    }
    let header_len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    if frame.len() < 2 + header_len {
        return Err(UspMessageError::TruncatedFrame(frame.len()));
    }

    let header_block = std::str::from_utf8(&frame[2..2 + header_len])
        .map_err(|_| UspMessageError::InvalidHeaderEncoding)?;

    Ok(AudioFrame {
        headers: parse_header_block(header_block)?,
        payload: Bytes::copy_from_slice(&frame[2 + header_len..]),
    })
}

/// JSON body of the `speech.config` message sent after the handshake.
pub fn speech_config_payload(config: &UspConfig, connection_id: &str) -> String {
    json!({
        "context": {
            "system": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "os": {
                "platform": std::env::consts::OS,
                "name": std::env::consts::FAMILY,
            },
            "connection": {
                "id": connection_id,
            },
        },
        "recognition": {
            "mode": config.recognition_mode().as_str(),
            "language": config.language(),
            "format": config.output_format().as_str(),
        },
    })
    .to_string()
}

// =============================================================================
// Header parsing
// =============================================================================

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn parse_header_block(block: &str) -> Result<Vec<(String, String)>, UspMessageError> {
    block
        .split("\r\n")
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.split_once(':')
                .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| UspMessageError::MalformedHeader(line.to_string()))
        })
        .collect()
}

fn split_text_frame(text: &str) -> Result<(Vec<(String, String)>, &str), UspMessageError> {
    let (block, body) = text
        .split_once("\r\n\r\n")
        .or_else(|| text.split_once("\n\n"))
        .ok_or(UspMessageError::MissingSeparator)?;
    let block = block.replace("\r\n", "\n").replace('\n', "\r\n");
    Ok((parse_header_block(&block)?, body))
}

// =============================================================================
// Service message bodies
// =============================================================================

/// Body of `speech.startDetected` and `speech.endDetected`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpeechBoundary {
    #[serde(default)]
    pub offset: u64,
}

/// Body of `speech.hypothesis` and `speech.fragment`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpeechHypothesis {
    pub text: String,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NBestEntry {
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub display: String,
}

/// Body of `speech.phrase`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpeechPhrase {
    pub recognition_status: String,
    #[serde(default)]
    pub display_text: Option<String>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub duration: u64,
    #[serde(default, rename = "NBest")]
    pub nbest: Option<Vec<NBestEntry>>,
}

impl SpeechPhrase {
    /// Best available text: simple format first, then the top detailed entry.
    pub fn text(&self) -> String {
        if let Some(text) = &self.display_text {
            return text.clone();
        }
        self.nbest
            .as_ref()
            .and_then(|n| n.first())
            .map(|first| first.display.clone())
            .unwrap_or_default()
    }

    /// Map the raw wire status onto the client's result status.
    pub fn status(&self) -> RecognitionStatus {
        match self.recognition_status.as_str() {
            "Success" => RecognitionStatus::Recognized,
            "NoMatch" | "InitialSilenceTimeout" | "BabbleTimeout" => RecognitionStatus::NoMatch,
            _ => RecognitionStatus::Canceled,
        }
    }

    /// The service reported a recognition failure.
    pub fn is_service_error(&self) -> bool {
        self.recognition_status == "Error"
    }
}

// =============================================================================
// Main message enum
// =============================================================================

/// A parsed text frame from the service.
#[derive(Debug, Clone, PartialEq)]
pub enum UspMessage {
    TurnStart { request_id: Option<String> },
    SpeechStartDetected(SpeechBoundary),
    SpeechHypothesis(SpeechHypothesis),
    SpeechFragment(SpeechHypothesis),
    SpeechPhrase(SpeechPhrase),
    SpeechEndDetected(SpeechBoundary),
    TurnEnd { request_id: Option<String> },
    /// Result from a non-speech recognizer (intent, translation).
    Response(String),
    /// Path this client does not interpret.
    Unknown { path: String },
}

impl UspMessage {
    /// Parse a header-prefixed text frame.
    pub fn parse(text: &str) -> Result<Self, UspMessageError> {
        let (fields, body) = split_text_frame(text)?;
        let path = find_header(&fields, headers::PATH).ok_or(UspMessageError::MissingPath)?;
        let request_id = find_header(&fields, headers::REQUEST_ID).map(str::to_string);
        Self::parse_with_path(path, body, request_id)
    }

    fn parse_with_path(
        path: &str,
        body: &str,
        request_id: Option<String>,
    ) -> Result<Self, UspMessageError> {
        fn body_of<T: for<'de> Deserialize<'de>>(path: &str, body: &str) -> Result<T, UspMessageError> {
            serde_json::from_str(body).map_err(|e| UspMessageError::InvalidBody {
                path: path.to_string(),
                reason: e.to_string(),
            })
        }

        match path {
            paths::TURN_START => Ok(Self::TurnStart { request_id }),
            paths::TURN_END => Ok(Self::TurnEnd { request_id }),
            paths::SPEECH_START_DETECTED => Ok(Self::SpeechStartDetected(body_of(path, body)?)),
            paths::SPEECH_END_DETECTED => Ok(Self::SpeechEndDetected(body_of(path, body)?)),
            paths::SPEECH_HYPOTHESIS => Ok(Self::SpeechHypothesis(body_of(path, body)?)),
            paths::SPEECH_FRAGMENT => Ok(Self::SpeechFragment(body_of(path, body)?)),
            paths::SPEECH_PHRASE => Ok(Self::SpeechPhrase(body_of(path, body)?)),
            paths::RESPONSE => Ok(Self::Response(body.trim().to_string())),
            other => Ok(Self::Unknown {
                path: other.to_string(),
            }),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::TurnStart { .. } => paths::TURN_START,
            Self::SpeechStartDetected(_) => paths::SPEECH_START_DETECTED,
            Self::SpeechHypothesis(_) => paths::SPEECH_HYPOTHESIS,
            Self::SpeechFragment(_) => paths::SPEECH_FRAGMENT,
            Self::SpeechPhrase(_) => paths::SPEECH_PHRASE,
            Self::SpeechEndDetected(_) => paths::SPEECH_END_DETECTED,
            Self::TurnEnd { .. } => paths::TURN_END,
            Self::Response(_) => paths::RESPONSE,
            Self::Unknown { path } => path,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(path: &str, body: &str) -> String {
        format!("X-RequestId:REQ1\r\nPath:{path}\r\nContent-Type:application/json\r\n\r\n{body}")
    }

    #[test]
    fn test_text_message_layout() {
        let msg = encode_text_message(paths::SPEECH_CONFIG, "REQ1", "{}");
        let (head, body) = msg.split_once("\r\n\r\n").unwrap();
        assert_eq!(body, "{}");
        assert!(head.starts_with("Path:speech.config\r\n"));
        assert!(head.contains("X-RequestId:REQ1"));
        assert!(head.contains("X-Timestamp:"));
        assert!(head.contains("Content-Type:application/json"));
    }

    #[test]
    fn test_audio_frame_header_prefix() {
        let frame = encode_audio_message("REQ1", b"RIFF");
        let header_len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
        let header = std::str::from_utf8(&frame[2..2 + header_len]).unwrap();
        assert!(header.contains("Path:audio"));
        assert_eq!(&frame[2 + header_len..], b"RIFF");

        let decoded = decode_audio_message(&frame).unwrap();
        assert_eq!(decoded.header("x-requestid"), Some("REQ1"));
        assert!(!decoded.is_end_of_audio());
    }

    #[test]
    fn test_end_of_audio_frame() {
        let frame = encode_audio_message("REQ1", &[]);
        assert!(decode_audio_message(&frame).unwrap().is_end_of_audio());
    }

    #[test]
    fn test_truncated_binary_frame() {
        assert_eq!(
            decode_audio_message(&[0x00]),
            Err(UspMessageError::TruncatedFrame(1))
        );
        assert!(matches!(
            decode_audio_message(&[0x00, 0x10, b'P']),
            Err(UspMessageError::TruncatedFrame(3))
        ));
    }

    #[test]
    fn test_parse_turn_messages() {
        let msg = UspMessage::parse(&frame("turn.start", "{}")).unwrap();
        assert_eq!(
            msg,
            UspMessage::TurnStart {
                request_id: Some("REQ1".to_string())
            }
        );
        assert!(matches!(
            UspMessage::parse(&frame("turn.end", "")).unwrap(),
            UspMessage::TurnEnd { .. }
        ));
    }

    #[test]
    fn test_parse_phrase_simple() {
        let body = r#"{"RecognitionStatus":"Success","DisplayText":"Hello world.","Offset":500000,"Duration":12000000}"#;
        let UspMessage::SpeechPhrase(phrase) = UspMessage::parse(&frame("speech.phrase", body)).unwrap() else {
            panic!("expected phrase");
        };
        assert_eq!(phrase.text(), "Hello world.");
        assert_eq!(phrase.status(), RecognitionStatus::Recognized);
        assert_eq!(phrase.offset, 500000);
    }

    #[test]
    fn test_parse_phrase_detailed() {
        let body = r#"{"RecognitionStatus":"Success","Offset":0,"Duration":1,"NBest":[{"Confidence":0.9,"Display":"Top."},{"Confidence":0.1,"Display":"Other."}]}"#;
        let UspMessage::SpeechPhrase(phrase) = UspMessage::parse(&frame("speech.phrase", body)).unwrap() else {
            panic!("expected phrase");
        };
        assert_eq!(phrase.text(), "Top.");
    }

    #[test]
    fn test_phrase_status_mapping() {
        let phrase = |status: &str| SpeechPhrase {
            recognition_status: status.to_string(),
            display_text: None,
            offset: 0,
            duration: 0,
            nbest: None,
        };
        assert_eq!(phrase("NoMatch").status(), RecognitionStatus::NoMatch);
        assert_eq!(phrase("InitialSilenceTimeout").status(), RecognitionStatus::NoMatch);
        assert_eq!(phrase("EndOfDictation").status(), RecognitionStatus::Canceled);
        assert_eq!(phrase("Error").status(), RecognitionStatus::Canceled);
        assert!(phrase("Error").is_service_error());
    }

    #[test]
    fn test_parse_hypothesis_and_fragment() {
        let body = r#"{"Text":"hel","Offset":1,"Duration":2}"#;
        assert!(matches!(
            UspMessage::parse(&frame("speech.hypothesis", body)).unwrap(),
            UspMessage::SpeechHypothesis(h) if h.text == "hel"
        ));
        assert!(matches!(
            UspMessage::parse(&frame("speech.fragment", body)).unwrap(),
            UspMessage::SpeechFragment(_)
        ));
    }

    #[test]
    fn test_parse_unknown_path() {
        let msg = UspMessage::parse(&frame("speech.keyword", "{}")).unwrap();
        assert_eq!(msg.path(), "speech.keyword");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            UspMessage::parse("Path:turn.start"),
            Err(UspMessageError::MissingSeparator)
        );
        assert_eq!(
            UspMessage::parse("X-RequestId:1\r\n\r\n{}"),
            Err(UspMessageError::MissingPath)
        );
        assert!(matches!(
            UspMessage::parse(&frame("speech.phrase", "not json")),
            Err(UspMessageError::InvalidBody { .. })
        ));
    }

    #[test]
    fn test_request_id_is_dash_free() {
        let id = new_request_id();
        assert_eq!(id.len(), 32);
        assert!(!id.contains('-'));
        assert_ne!(id, new_request_id());
    }
}
