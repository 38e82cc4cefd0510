//! Sentence segmentation of a streamed reply.

/// Reasoning delimiters some models emit as standalone fragments.
const CONTROL_MARKERS: [&str; 4] = ["<think>", "</think>", "<thinking>", "</thinking>"];

/// CJK and Latin sentence terminators, plus newline.
const TERMINATORS: [char; 9] = ['，', ',', '。', '！', '？', '.', '!', '?', '\n'];

/// Outcome of feeding one fragment to the segmenter.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Segment {
    /// The fragment to display, unless it was filtered.
    pub display: Option<String>,
    /// A sentence completed by this fragment.
    pub sentence: Option<String>,
}

/// Groups displayed fragments into sentences on punctuation boundaries.
///
/// Boundary detection is presence-based: a fragment containing any
/// terminator closes the current sentence, including whatever text follows
/// the terminator inside that same fragment.
#[derive(Debug, Default)]
pub struct TokenSegmenter {
    buffer: String,
}

pub fn is_noise(fragment: &str) -> bool {
    fragment.trim().is_empty() || CONTROL_MARKERS.contains(&fragment)
}

impl TokenSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consume(&mut self, fragment: &str) -> Segment {
        if is_noise(fragment) {
            return Segment::default();
        }

        self.buffer.push_str(fragment);
        let sentence = if fragment.contains(TERMINATORS) {
            self.take_sentence()
        } else {
            None
        };

        Segment {
            display: Some(fragment.to_string()),
            sentence,
        }
    }

    /// Emit whatever is buffered as a final sentence.
    pub fn flush(&mut self) -> Option<String> {
        self.take_sentence()
    }

    /// Forget the current turn's partial sentence.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn take_sentence(&mut self) -> Option<String> {
        let sentence = self.buffer.trim().to_string();
        self.buffer.clear();
        (!sentence.is_empty()).then_some(sentence)
    }
}
