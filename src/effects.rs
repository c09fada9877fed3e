use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Triangle,
}

/// Sound and speech cues. Both are fire-and-forget.
pub trait Effects: Send + Sync {
    fn play_tone(&self, frequency_hz: f32, waveform: Waveform, duration_ms: u32);

    fn speak(&self, text: &str, locale: &str);
}

/// Writes cues to the log instead of a speaker.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEffects;

impl Effects for LogEffects {
    fn play_tone(&self, frequency_hz: f32, waveform: Waveform, duration_ms: u32) {
        log::debug!(
            "[SOUND] tone freq:{}Hz wave:{:?} duration:{}ms",
            frequency_hz,
            waveform,
            duration_ms
        );
    }

    fn speak(&self, text: &str, locale: &str) {
        log::debug!("[SOUND] speak locale:{} text:{}", locale, text);
    }
}

#[cfg(test)]
pub mod testing {
    use super::{Effects, Waveform};
    use std::sync::Mutex;

    #[derive(Clone, Debug, PartialEq)]
    pub enum Cue {
        Tone(f32, Waveform, u32),
        Speech(String, String),
    }

    #[derive(Debug, Default)]
    pub struct RecordingEffects {
        pub cues: Mutex<Vec<Cue>>,
    }

    impl RecordingEffects {
        pub fn cues(&self) -> Vec<Cue> {
            self.cues.lock().unwrap().clone()
        }
    }

    impl Effects for RecordingEffects {
        fn play_tone(&self, frequency_hz: f32, waveform: Waveform, duration_ms: u32) {
            self.cues
                .lock()
                .unwrap()
                .push(Cue::Tone(frequency_hz, waveform, duration_ms));
        }

        fn speak(&self, text: &str, locale: &str) {
            self.cues
                .lock()
                .unwrap()
                .push(Cue::Speech(text.into(), locale.into()));
        }
    }
}
