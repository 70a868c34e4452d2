use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("text exceeds maximum size: {len} bytes (limit: {limit} bytes)")]
    InputTooLarge { len: usize, limit: usize },

    #[error("nothing to synthesize")]
    EmptyInput,
}
