//! Energy-based voice activity detection on 16-bit PCM.

/// Frame duration the detector is tuned for.
pub const FRAME_MS: u32 = 20;

/// Speech boundary reported by [`VoiceActivityDetector::process_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStarted,
    /// Sustained silence after speech: the utterance is complete.
    SpeechEnded,
}

/// RMS threshold detector with a silence hangover.
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    threshold: f64,
    min_silent_frames: usize,
    speech_active: bool,
    silent_count: usize,
}

impl VoiceActivityDetector {
    pub fn new(threshold: f64, min_silent_frames: usize) -> Self {
        Self {
            threshold,
            min_silent_frames,
            speech_active: false,
            silent_count: 0,
        }
    }

    /// Defaults for 20 ms frames: ends an utterance after ~600 ms of silence.
    pub fn conversational() -> Self {
        Self::new(300.0, 30)
    }

    /// Samples per detector frame at the given sample rate.
    pub fn frame_size(sample_rate: u32) -> usize {
        (sample_rate * FRAME_MS / 1000) as usize
    }

    pub fn rms(samples: &[i16]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    pub fn process_frame(&mut self, pcm: &[i16]) -> Option<VadEvent> {
        let is_speech = Self::rms(pcm) > self.threshold;

        if is_speech {
            self.silent_count = 0;
            if !self.speech_active {
                self.speech_active = true;
                return Some(VadEvent::SpeechStarted);
            }
        } else if self.speech_active {
            self.silent_count += 1;
            if self.silent_count >= self.min_silent_frames {
                self.speech_active = false;
                self.silent_count = 0;
                return Some(VadEvent::SpeechEnded);
            }
        }

        None
    }

    pub fn is_active(&self) -> bool {
        self.speech_active
    }

    pub fn reset(&mut self) {
        self.speech_active = false;
        self.silent_count = 0;
    }
}
