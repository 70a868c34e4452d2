//! Speech synthesis for the Vocalis assistant.
//!
//! [`TtsService`] shells out to a local engine (Piper or espeak-ng) and
//! returns WAV bytes ready for the browser. The [`SentenceSegmenter`] decides
//! where streamed text is cut into synthesis segments.

pub mod error;
pub mod segment;
pub mod tts;
pub mod wav;

pub use error::VoiceError;
pub use segment::{clean_for_speech, SentenceSegmenter};
pub use tts::{Synthesizer, TtsService, MAX_TTS_INPUT_BYTES};
