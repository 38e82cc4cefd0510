//! Connection-lifetime consumer loops for the two session queues.
//!
//! Both loops run until `shutdown` is cancelled. Work for an interrupted
//! turn is abandoned through the session's turn token.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use voxlane_core::protocol::ServerFrame;

use crate::EventSink;
use crate::session::Session;
use crate::synthesizer::SentenceSynthesizer;

/// Display fragments and assemble sentences.
pub async fn run_char_consumer(
    session: Arc<Session>,
    events: EventSink,
    shutdown: CancellationToken,
) {
    debug!(session = %session.id, "Char consumer started");
    loop {
        let fragment = tokio::select! {
            _ = shutdown.cancelled() => break,
            item = session.char_queue.recv() => item,
        };
        if session.turn_token().is_cancelled() {
            trace!("Dropping fragment of interrupted turn");
            continue;
        }

        let segment = session.segmenter().consume(&fragment);
        if let Some(display) = segment.display {
            let _ = events.send(ServerFrame::Text { data: display });
        }
        if let Some(sentence) = segment.sentence {
            debug!(sentence_len = sentence.len(), "Sentence complete");
            session.sentence_queue.put(sentence);
        }
    }
    debug!(session = %session.id, "Char consumer stopped");
}

/// Translate, synthesize and frame each sentence in order.
pub async fn run_sentence_consumer(
    session: Arc<Session>,
    synthesizer: Arc<SentenceSynthesizer>,
    events: EventSink,
    shutdown: CancellationToken,
) {
    debug!(session = %session.id, "Sentence consumer started");
    loop {
        let sentence = tokio::select! {
            _ = shutdown.cancelled() => break,
            item = session.sentence_queue.recv() => item,
        };

        let turn = session.turn_token();
        let frames = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = turn.cancelled() => {
                debug!(sentence_len = sentence.len(), "Sentence abandoned by interrupt");
                continue;
            }
            frames = synthesizer.synthesize(&sentence) => frames,
        };

        for frame in frames {
            let _ = events.send(frame.into_server_frame());
        }
    }
    debug!(session = %session.id, "Sentence consumer stopped");
}
