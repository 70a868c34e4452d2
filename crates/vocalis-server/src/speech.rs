//! Per-turn synthesis queue.
//!
//! Sentences are synthesized one at a time, in the order they were cut, on a
//! task separate from the session loop. The `done` frame goes through the
//! same queue so it always follows the turn's last audio frame.

use crate::api_ws::{frame, OutgoingMessage};
use axum::extract::ws::Message as AxumMessage;
use base64::Engine as _;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use vocalis_types::VoiceSettings;
use vocalis_voice::{clean_for_speech, Synthesizer};

enum SpeechJob {
    Segment(String),
    Finish,
}

pub(crate) struct SpeechPipeline {
    jobs: mpsc::UnboundedSender<SpeechJob>,
    task: JoinHandle<()>,
    speaks: bool,
}

impl SpeechPipeline {
    /// With no synthesizer only the `done` frame is produced.
    pub(crate) fn start(
        synthesizer: Option<Arc<dyn Synthesizer>>,
        voice: VoiceSettings,
        out: mpsc::Sender<AxumMessage>,
    ) -> Self {
        let speaks = synthesizer.is_some();
        let (jobs, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let message = match job {
                    SpeechJob::Segment(text) => match &synthesizer {
                        Some(synth) => synthesize(synth.as_ref(), &text, &voice).await,
                        None => continue,
                    },
                    SpeechJob::Finish => {
                        if let Some(done) = frame(&OutgoingMessage::Done) {
                            let _ = out.send(done).await;
                        }
                        break;
                    }
                };
                let Some(message) = frame(&message) else {
                    continue;
                };
                if out.send(message).await.is_err() {
                    break;
                }
            }
        });
        Self { jobs, task, speaks }
    }

    /// Queues a sentence. Text with nothing speakable left after cleaning is
    /// dropped.
    pub(crate) fn speak(&self, sentence: &str) {
        if !self.speaks {
            return;
        }
        let text = clean_for_speech(sentence);
        if text.is_empty() {
            return;
        }
        let _ = self.jobs.send(SpeechJob::Segment(text));
    }

    /// Queues the end of the turn.
    pub(crate) fn finish(&self) {
        let _ = self.jobs.send(SpeechJob::Finish);
    }

    /// True once the queue has drained and `done` was sent.
    pub(crate) fn is_idle(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SpeechPipeline {
    fn drop(&mut self) {
        // Aborting drops the engine process handle, which kills it.
        self.task.abort();
    }
}

async fn synthesize(synth: &dyn Synthesizer, text: &str, voice: &VoiceSettings) -> OutgoingMessage {
    match synth.synthesize(text, voice).await {
        Ok(audio) => OutgoingMessage::Audio {
            content: base64::engine::general_purpose::STANDARD.encode(audio),
        },
        Err(e) => {
            tracing::warn!(error = %e, chars = text.chars().count(), "segment synthesis failed");
            OutgoingMessage::AudioError {
                content: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::Engine as _;
    use vocalis_voice::VoiceError;

    struct Echo;

    #[async_trait]
    impl Synthesizer for Echo {
        async fn synthesize(&self, text: &str, _: &VoiceSettings) -> Result<Vec<u8>, VoiceError> {
            if text.contains("fail") {
                return Err(VoiceError::Tts("engine crashed".to_string()));
            }
            Ok(text.as_bytes().to_vec())
        }

        fn is_ready(&self, _: &VoiceSettings) -> bool {
            true
        }
    }

    fn text_of(message: AxumMessage) -> serde_json::Value {
        match message {
            AxumMessage::Text(t) => serde_json::from_str(t.as_str()).unwrap(),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[tokio::test]
    async fn audio_in_order_then_done() {
        let (out, mut rx) = mpsc::channel(16);
        let synth: Arc<dyn Synthesizer> = Arc::new(Echo);
        let pipeline = SpeechPipeline::start(Some(synth), VoiceSettings::default(), out);
        pipeline.speak("**Uno.**");
        pipeline.speak("fail here");
        pipeline.speak("[ ]");
        pipeline.speak("Dos.");
        pipeline.finish();

        let first = text_of(rx.recv().await.unwrap());
        assert_eq!(first["type"], "audio");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(first["content"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, b"Uno.");
        assert_eq!(text_of(rx.recv().await.unwrap())["type"], "audio_error");
        assert_eq!(text_of(rx.recv().await.unwrap())["type"], "audio");
        assert_eq!(text_of(rx.recv().await.unwrap())["type"], "done");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn without_synthesizer_only_done_is_sent() {
        let (out, mut rx) = mpsc::channel(4);
        let pipeline = SpeechPipeline::start(None, VoiceSettings::default(), out);
        pipeline.speak("Hola.");
        pipeline.finish();
        assert_eq!(text_of(rx.recv().await.unwrap())["type"], "done");
        assert!(rx.recv().await.is_none());
    }
}
