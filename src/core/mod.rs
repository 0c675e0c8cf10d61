pub mod usp;

// Re-export commonly used types for convenience
pub use usp::{
    AuthenticationType, Callbacks, Client, Connection, ConnectionState, ConnectionStats,
    EndpointType, ErrorCode, ErrorEvent, EventReceiver, OutputFormat, RecognitionEvent,
    RecognitionMode, RecognitionResult, RecognitionStatus, ThreadService, UsageError, UspConfig,
    UspConfigBuilder, UspError, UspEvent,
};
