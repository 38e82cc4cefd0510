//! Utterance buffering for speech recognition.

use tracing::debug;

use crate::vad::{VadEvent, VoiceActivityDetector};

/// Silence kept ahead of detected speech so its onset is not clipped.
const PRE_ROLL_FRAMES: usize = 10;

/// Longest utterance buffered before the session is ended regardless of VAD.
pub const MAX_UTTERANCE_MS: u64 = 30_000;

/// A completed utterance ready for transcription.
#[derive(Debug)]
pub struct Utterance {
    /// Raw 16-bit mono PCM.
    pub pcm: Vec<i16>,
    pub duration_ms: u64,
}

/// Accumulates inbound PCM bytes and optionally watches for end of speech.
///
/// Chunks may split a sample; the odd byte is carried to the next push.
/// With VAD, silence before the first speech frame is trimmed to a short
/// pre-roll and a silence-only utterance is never handed out.
pub struct UtteranceBuffer {
    pcm: Vec<i16>,
    carry: Option<u8>,
    vad: Option<VoiceActivityDetector>,
    vad_cursor: usize,
    heard_speech: bool,
    frame_size: usize,
    max_samples: usize,
    sample_rate: u32,
}

impl UtteranceBuffer {
    pub fn new(sample_rate: u32, vad: bool) -> Self {
        Self {
            pcm: Vec::new(),
            carry: None,
            vad: vad.then(VoiceActivityDetector::conversational),
            vad_cursor: 0,
            heard_speech: false,
            frame_size: VoiceActivityDetector::frame_size(sample_rate).max(1),
            max_samples: (u64::from(sample_rate) * MAX_UTTERANCE_MS / 1000).max(1) as usize,
            sample_rate,
        }
    }

    /// Append raw little-endian bytes.
    ///
    /// Returns `true` when the utterance is over: VAD saw speech end, or the
    /// buffer reached [`MAX_UTTERANCE_MS`].
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        let mut bytes = bytes;
        if let Some(low) = self.carry.take() {
            match bytes.split_first() {
                Some((&high, rest)) => {
                    self.pcm.push(i16::from_le_bytes([low, high]));
                    bytes = rest;
                }
                None => {
                    self.carry = Some(low);
                    return false;
                }
            }
        }

        let chunks = bytes.chunks_exact(2);
        if let [odd] = chunks.remainder() {
            self.carry = Some(*odd);
        }
        self.pcm
            .extend(chunks.map(|pair| i16::from_le_bytes([pair[0], pair[1]])));

        let ended = self.run_vad();
        if !ended && self.pcm.len() >= self.max_samples {
            debug!(samples = self.pcm.len(), "Utterance reached maximum length");
            return true;
        }
        ended
    }

    fn run_vad(&mut self) -> bool {
        let Some(vad) = self.vad.as_mut() else {
            return false;
        };

        let mut ended = false;
        while self.pcm.len() - self.vad_cursor >= self.frame_size {
            let frame = &self.pcm[self.vad_cursor..self.vad_cursor + self.frame_size];
            self.vad_cursor += self.frame_size;
            match vad.process_frame(frame) {
                Some(VadEvent::SpeechEnded) => {
                    debug!(samples = self.vad_cursor, "VAD detected end of speech");
                    ended = true;
                }
                Some(VadEvent::SpeechStarted) => {
                    debug!("VAD detected speech");
                    self.heard_speech = true;
                }
                None => {}
            }
        }

        if !self.heard_speech {
            let keep_from = self
                .vad_cursor
                .saturating_sub(PRE_ROLL_FRAMES * self.frame_size);
            if keep_from > 0 {
                self.pcm.drain(..keep_from);
                self.vad_cursor -= keep_from;
            }
        }
        ended
    }

    /// Buffered samples.
    pub fn len(&self) -> usize {
        self.pcm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    /// Take everything buffered so far, resetting the detector.
    ///
    /// With VAD, an utterance in which no speech was detected is discarded.
    pub fn take(&mut self) -> Option<Utterance> {
        self.carry = None;
        self.vad_cursor = 0;
        let heard_speech = std::mem::take(&mut self.heard_speech);
        if let Some(vad) = self.vad.as_mut() {
            vad.reset();
            if !heard_speech {
                self.pcm.clear();
            }
        }
        if self.pcm.is_empty() {
            return None;
        }

        let pcm = std::mem::take(&mut self.pcm);
        let duration_ms = (pcm.len() as u64 * 1000) / u64::from(self.sample_rate.max(1));
        Some(Utterance { pcm, duration_ms })
    }

    pub fn clear(&mut self) {
        let _ = self.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_of(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_accumulates_and_flushes() {
        let mut buffer = UtteranceBuffer::new(16_000, false);
        assert!(!buffer.push(&bytes_of(&[100; 320])));

        let utterance = buffer.take().unwrap();
        assert_eq!(utterance.pcm.len(), 320);
        assert_eq!(utterance.duration_ms, 20);
        assert!(buffer.take().is_none());
    }

    #[test]
    fn test_odd_byte_is_carried() {
        let mut buffer = UtteranceBuffer::new(16_000, false);
        let bytes = bytes_of(&[0x1234, -2]);
        buffer.push(&bytes[..1]);
        buffer.push(&bytes[1..3]);
        buffer.push(&bytes[3..]);
        assert_eq!(buffer.take().unwrap().pcm, vec![0x1234, -2]);
    }

    #[test]
    fn test_vad_reports_end_of_speech() {
        let mut buffer = UtteranceBuffer::new(16_000, true);
        assert!(!buffer.push(&bytes_of(&[2000; 320 * 5])));
        // 30 silent frames of hangover.
        assert!(buffer.push(&bytes_of(&[0; 320 * 30])));
        assert_eq!(buffer.take().unwrap().pcm.len(), 320 * 35);
    }

    #[test]
    fn test_vad_trims_leading_silence_to_pre_roll() {
        let mut buffer = UtteranceBuffer::new(16_000, true);
        // Ten seconds of silence never starts an utterance.
        for _ in 0..50 {
            assert!(!buffer.push(&bytes_of(&[0; 320 * 10])));
        }
        assert!(buffer.pcm.len() <= PRE_ROLL_FRAMES * 320);

        assert!(!buffer.push(&bytes_of(&[2000; 320 * 5])));
        let utterance = buffer.take().unwrap();
        assert_eq!(utterance.pcm.len(), PRE_ROLL_FRAMES * 320 + 320 * 5);
    }

    #[test]
    fn test_vad_discards_silence_only_utterance() {
        let mut buffer = UtteranceBuffer::new(16_000, true);
        buffer.push(&bytes_of(&[0; 320 * 40]));
        assert!(buffer.take().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_maximum_length_ends_utterance() {
        let mut buffer = UtteranceBuffer::new(16_000, false);
        let second = bytes_of(&[100; 16_000]);
        let seconds = (MAX_UTTERANCE_MS / 1000) as usize;
        for _ in 1..seconds {
            assert!(!buffer.push(&second));
        }
        assert!(buffer.push(&second));
        assert_eq!(buffer.take().unwrap().duration_ms, MAX_UTTERANCE_MS);
    }

    #[test]
    fn test_clear() {
        let mut buffer = UtteranceBuffer::new(16_000, false);
        buffer.push(&[1, 2, 3]);
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.take().is_none());
    }
}
