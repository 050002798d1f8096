pub mod session;
pub mod soniox;
pub mod transcript;

// Re-export commonly used types for convenience
pub use session::{RotationPolicy, SessionError, SessionResult, SessionRotator};

pub use soniox::{
    BaseConnection, ConnectionState, CredentialProvider, ReconnectPolicy, SessionCredential,
    SessionStats, SonioxClient, SonioxConfig, StaticCredentialProvider, StreamError, Token,
    TranslationConfig, TranslationStatus,
};

pub use transcript::{TranscriptAssembler, TranscriptTrack, TranscriptUpdate};
