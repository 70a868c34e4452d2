#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vocalis_types::{VoiceModel, VoiceSettings};
use vocalis_voice::wav::{is_wav, WAV_HEADER_LEN};
use vocalis_voice::{Synthesizer, TtsService, VoiceError};

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod");
    path
}

// One test: writing executables while other threads spawn processes can
// fail with ETXTBSY, so every script is created before anything runs.
#[tokio::test]
async fn engine_processes() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("es_ES-test.onnx"), b"model").expect("model");

    // Echoes its arguments into the PCM stream so the test can inspect them.
    let piper = script(dir.path(), "piper", "cat > /dev/null\nprintf '%s ' \"$@\"");
    let failing = script(dir.path(), "piper-fail", "cat > /dev/null\necho boom >&2\nexit 3");
    let slow = script(dir.path(), "piper-slow", "sleep 5");
    let espeak = script(
        dir.path(),
        "espeak-ng",
        "cat > /dev/null\nprintf 'RIFF\\000\\000\\000\\000WAVEdata'",
    );

    let voice = VoiceSettings {
        model: VoiceModel::Piper,
        voice: "es_ES-test".to_string(),
        speed: 2.0,
        speaker_id: Some(3),
    };

    let tts = TtsService::new(dir.path(), &piper).with_sample_rate(16_000);
    assert!(tts.is_ready(&voice));
    let audio = tts.synthesize("Hola.", &voice).await.expect("synthesis");
    assert!(is_wav(&audio));
    let args = String::from_utf8_lossy(&audio[WAV_HEADER_LEN..]).to_string();
    assert!(args.contains("--output_raw"), "{args}");
    assert!(args.contains("--length_scale 0.5"), "{args}");
    assert!(args.contains("--speaker 3"), "{args}");

    let tts = TtsService::new(dir.path(), &failing);
    let err = tts.synthesize("Hola.", &voice).await.unwrap_err();
    assert!(matches!(err, VoiceError::Tts(ref m) if m.contains("boom")), "{err}");

    let tts = TtsService::new(dir.path(), &slow).with_timeout(Duration::from_millis(200));
    let err = tts.synthesize("Hola.", &voice).await.unwrap_err();
    assert!(matches!(err, VoiceError::Tts(ref m) if m.contains("timed out")), "{err}");

    let system = VoiceSettings {
        model: VoiceModel::System,
        voice: "es".to_string(),
        ..VoiceSettings::default()
    };
    let tts = TtsService::new(dir.path(), &piper).with_espeak_binary(&espeak);
    assert!(tts.is_ready(&system));
    let audio = tts.synthesize("Hola.", &system).await.expect("espeak synthesis");
    assert!(is_wav(&audio));
}
