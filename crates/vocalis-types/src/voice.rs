//! Voice synthesis settings.
//!
//! A `VoiceSettings` selects the synthesis engine, the voice within it and the
//! speaking rate. It is process-wide configuration, handed to the synthesis
//! adapter on every call.

use serde::{Deserialize, Serialize};

/// Slowest speaking rate accepted.
pub const MIN_SPEED: f32 = 0.5;
/// Fastest speaking rate accepted.
pub const MAX_SPEED: f32 = 2.0;

/// Supported synthesis engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceModel {
    /// Piper TTS (ONNX-based, fast, local).
    #[default]
    Piper,
    /// espeak-ng, available on most systems.
    System,
}

/// Voice configuration for synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// The synthesis engine.
    pub model: VoiceModel,
    /// Voice name. For Piper this is the model file stem inside the voices
    /// directory; for espeak-ng it is passed to `-v`.
    pub voice: String,
    /// Speech speed multiplier (1.0 is normal).
    pub speed: f32,
    /// Speaker ID within a multi-speaker model (0-indexed).
    pub speaker_id: Option<u32>,
}

impl VoiceSettings {
    /// Returns the speed clamped into the supported range.
    pub fn clamped_speed(&self) -> f32 {
        if self.speed.is_nan() {
            return 1.0;
        }
        self.speed.clamp(MIN_SPEED, MAX_SPEED)
    }
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            model: VoiceModel::Piper,
            voice: "es_ES-davefx-medium".to_string(),
            speed: 1.1,
            speaker_id: None,
        }
    }
}
