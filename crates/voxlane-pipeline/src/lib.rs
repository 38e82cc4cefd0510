//! Per-connection session pipeline.
//!
//! A [`SessionPipeline`] turns user text into a streamed reply: the language
//! model's fragments flow through the char-stream queue to the
//! [`TokenSegmenter`], completed sentences flow through the sentence queue to
//! the [`SentenceSynthesizer`], and every outbound event is pushed onto an
//! [`EventSink`] as a [`ServerFrame`].

use tokio::sync::mpsc;

use voxlane_core::protocol::ServerFrame;

pub mod consumer;
pub mod interrupt;
pub mod pool;
pub mod queue;
pub mod segmenter;
pub mod session;
pub mod synthesizer;
pub mod turn;

#[cfg(test)]
mod testing;

pub use pool::WorkerPool;
pub use queue::{WorkItem, WorkQueue};
pub use segmenter::{Segment, TokenSegmenter};
pub use session::{GenerationTask, Session, TurnOutcome, TurnState};
pub use synthesizer::{AudioFrame, SentenceSynthesizer, frame_audio};
pub use turn::SessionPipeline;

/// Outbound events of one connection.
pub type EventSink = mpsc::UnboundedSender<ServerFrame>;
