//! USP streaming recognition client.
//!
//! USP is the upload/recognition protocol spoken over a persistent WebSocket
//! to a speech recognition service. A connection streams audio upstream and
//! receives turn, speech-boundary and recognition messages downstream.
//!
//! # Components
//!
//! - [`UspConfig`]: immutable configuration built once with a builder
//! - [`ThreadService`]: shared runtime wrapper that tracks every session
//! - [`Client`] / [`Connection`]: one logical session to an endpoint
//! - [`UspEvent`] / [`Callbacks`]: asynchronous errors and results
//!
//! # Routing
//!
//! Without an explicit endpoint URL the target is derived from the region:
//!
//! | Endpoint type | Host |
//! |---------------|------|
//! | `Speech` | `{region}.stt.speech.microsoft.com` |
//! | `Intent` | `{region}.sr.speech.microsoft.com` |
//! | `Translation` | `{region}.s2s.speech.microsoft.com` |
//!
//! An explicit endpoint URL always wins and is used unchanged.
//!
//! # Error delivery
//!
//! Handshake and socket failures never surface as `Err` from the caller
//! surface. They arrive as [`ErrorEvent`]s with `is_transport` set; only
//! lifecycle misuse (writing after `term()`, connecting on a stopped
//! service) is returned synchronously.

mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod messages;
pub mod service;


pub use client::{Client, Connection, ConnectionStats};
pub use config::{
    Authentication, AuthenticationType, DEFAULT_AUDIO_QUEUE_DEPTH, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_LANGUAGE, DEFAULT_REGION, DEFAULT_WRITE_TIMEOUT, EndpointType, OutputFormat,
    RecognitionMode, ResolvedEndpoint, UspConfig, UspConfigBuilder,
};
pub use errors::{ErrorCode, UsageError, UspError};
pub use events::{
    Callbacks, ErrorEvent, EventReceiver, RecognitionEvent, RecognitionResult, RecognitionStatus,
    UspEvent,
};
pub use service::{ConnectionState, SessionHandle, ThreadService};
