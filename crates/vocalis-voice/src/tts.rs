use crate::error::VoiceError;
use crate::wav;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use vocalis_types::{VoiceModel, VoiceSettings};

/// Maximum text input size for TTS (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
pub const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Default timeout for one TTS process.
const DEFAULT_TTS_TIMEOUT: Duration = Duration::from_secs(30);

/// espeak-ng words per minute at speed 1.0.
const ESPEAK_BASE_WPM: f32 = 175.0;

/// Text in, audio bytes out.
///
/// Implementations keep no state between calls beyond a possibly cached
/// model handle; buffering across segments is the caller's business.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesizes one segment into a complete WAV file.
    async fn synthesize(&self, text: &str, voice: &VoiceSettings) -> Result<Vec<u8>, VoiceError>;

    /// Whether the engine and voice are available.
    fn is_ready(&self, voice: &VoiceSettings) -> bool;
}

/// Service for generating speech from text with a local engine process.
#[derive(Debug, Clone)]
pub struct TtsService {
    voices_dir: PathBuf,
    piper_binary: PathBuf,
    espeak_binary: PathBuf,
    sample_rate: u32,
    timeout: Duration,
}

impl TtsService {
    /// Creates a new `TtsService` with the given voices directory and piper
    /// binary path.
    pub fn new(voices_dir: impl AsRef<Path>, piper_binary: impl AsRef<Path>) -> Self {
        Self {
            voices_dir: voices_dir.as_ref().to_path_buf(),
            piper_binary: piper_binary.as_ref().to_path_buf(),
            espeak_binary: PathBuf::from("espeak-ng"),
            sample_rate: 22_050,
            timeout: DEFAULT_TTS_TIMEOUT,
        }
    }

    /// Sample rate of the raw PCM Piper emits for the configured voices.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_espeak_binary(mut self, binary: impl AsRef<Path>) -> Self {
        self.espeak_binary = binary.as_ref().to_path_buf();
        self
    }

    /// Path of the ONNX model for a Piper voice.
    pub fn piper_model_path(&self, voice: &str) -> PathBuf {
        let file = if voice.ends_with(".onnx") {
            voice.to_string()
        } else {
            format!("{}.onnx", voice)
        };
        if Path::new(&file).is_absolute() {
            PathBuf::from(file)
        } else {
            self.voices_dir.join(file)
        }
    }

    async fn synthesize_piper(
        &self,
        text: &str,
        voice: &VoiceSettings,
    ) -> Result<Vec<u8>, VoiceError> {
        let model_path = self.piper_model_path(&voice.voice);
        if !model_path.exists() {
            return Err(VoiceError::Tts(format!(
                "Model file not found: {:?}",
                model_path
            )));
        }

        let mut command = Command::new(&self.piper_binary);
        command
            .arg("--model")
            .arg(&model_path)
            .arg("--output_raw")
            // Length scale is the inverse of speed: faster speech is shorter.
            .arg("--length_scale")
            .arg((1.0 / voice.clamped_speed()).to_string());

        if let Some(speaker) = voice.speaker_id {
            command.arg("--speaker").arg(speaker.to_string());
        }

        let pcm = self.run(command, text, "piper").await?;
        Ok(wav::wrap_pcm_s16le(&pcm, self.sample_rate))
    }

    /// espeak-ng writes a complete WAV to stdout with `--stdout`.
    async fn synthesize_system(
        &self,
        text: &str,
        voice: &VoiceSettings,
    ) -> Result<Vec<u8>, VoiceError> {
        let wpm = (ESPEAK_BASE_WPM * voice.clamped_speed()).round() as u32;
        let mut command = Command::new(&self.espeak_binary);
        command
            .arg("-v")
            .arg(&voice.voice)
            .arg("-s")
            .arg(wpm.to_string())
            .arg("--stdout")
            .arg("--stdin");

        let out = self.run(command, text, "espeak-ng").await?;
        if !wav::is_wav(&out) {
            return Err(VoiceError::Tts("espeak-ng did not produce WAV output".to_string()));
        }
        Ok(out)
    }

    /// Runs an engine process, feeding `text` on stdin and collecting stdout.
    async fn run(&self, mut command: Command, text: &str, label: &str) -> Result<Vec<u8>, VoiceError> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Tts(format!("Failed to spawn {}: {}", label, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Tts("Failed to open stdin".to_string()))?;
        let text_owned = text.to_string();

        // Write from a separate task so a full stdout pipe cannot deadlock us.
        let write_task = tokio::spawn(async move {
            stdin.write_all(text_owned.as_bytes()).await?;
            stdin.shutdown().await
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                VoiceError::Tts(format!(
                    "{} timed out after {} ms",
                    label,
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| VoiceError::Tts(format!("Failed to wait for {}: {}", label, e)))?;

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(VoiceError::Tts(format!(
                    "Failed to write to {} stdin: {}",
                    label, e
                )))
            }
            Err(e) => return Err(VoiceError::Tts(format!("Stdin task failed: {}", e))),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Tts(format!("{} failed: {}", label, stderr.trim())));
        }
        if output.stdout.is_empty() {
            return Err(VoiceError::Tts(format!("{} produced no audio", label)));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Synthesizer for TtsService {
    async fn synthesize(&self, text: &str, voice: &VoiceSettings) -> Result<Vec<u8>, VoiceError> {
        if text.trim().is_empty() {
            return Err(VoiceError::EmptyInput);
        }
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::InputTooLarge {
                len: text.len(),
                limit: MAX_TTS_INPUT_BYTES,
            });
        }

        let started = std::time::Instant::now();
        let result = match voice.model {
            VoiceModel::Piper => self.synthesize_piper(text, voice).await,
            VoiceModel::System => self.synthesize_system(text, voice).await,
        };
        match &result {
            Ok(audio) => tracing::debug!(
                bytes = audio.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "synthesized segment"
            ),
            Err(e) => tracing::warn!(error = %e, "synthesis failed"),
        }
        result
    }

    fn is_ready(&self, voice: &VoiceSettings) -> bool {
        match voice.model {
            VoiceModel::Piper => {
                binary_available(&self.piper_binary)
                    && self.piper_model_path(&voice.voice).exists()
            }
            VoiceModel::System => binary_available(&self.espeak_binary),
        }
    }
}

/// A bare name is looked up on `PATH`; anything with a separator must exist.
fn binary_available(binary: &Path) -> bool {
    if binary.components().count() > 1 {
        return binary.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_path_resolution() {
        let tts = TtsService::new("/opt/voices", "piper");
        assert_eq!(
            tts.piper_model_path("es_ES-davefx-medium"),
            PathBuf::from("/opt/voices/es_ES-davefx-medium.onnx")
        );
        assert_eq!(
            tts.piper_model_path("/models/x.onnx"),
            PathBuf::from("/models/x.onnx")
        );
    }

    #[test]
    fn not_ready_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let tts = TtsService::new(dir.path(), dir.path().join("piper"));
        assert!(!tts.is_ready(&VoiceSettings::default()));
    }

    #[tokio::test]
    async fn oversized_and_empty_input_rejected_before_spawning() {
        let tts = TtsService::new("/nonexistent", "/nonexistent/piper");
        let voice = VoiceSettings::default();
        let big = "a".repeat(MAX_TTS_INPUT_BYTES + 1);
        assert!(matches!(
            tts.synthesize(&big, &voice).await,
            Err(VoiceError::InputTooLarge { .. })
        ));
        assert!(matches!(
            tts.synthesize("   ", &voice).await,
            Err(VoiceError::EmptyInput)
        ));
    }

    #[tokio::test]
    async fn missing_model_is_an_error() {
        let tts = TtsService::new("/nonexistent", "/nonexistent/piper");
        let err = tts
            .synthesize("Hola.", &VoiceSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::Tts(m) if m.contains("Model file not found")));
    }
}
