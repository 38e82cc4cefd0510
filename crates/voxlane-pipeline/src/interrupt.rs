//! Mid-turn interruption.

use tracing::{debug, error, info};

use voxlane_core::protocol::ServerFrame;

use crate::session::TurnState;
use crate::turn::SessionPipeline;

impl SessionPipeline {
    /// Stop the in-flight turn, retire both queues and send one `end`.
    ///
    /// Generation is confirmed stopped before the char queue is drained, and
    /// the char consumer is confirmed idle before the sentence queue is
    /// drained, so no late enqueue can slip past the drain.
    pub async fn interrupt(&self) {
        let session = &self.session;
        session.set_state(TurnState::Interrupting);
        session.turn_token().cancel();

        if let Some(task) = session.take_task() {
            task.cancel.cancel();
            let turn = task.turn;
            match task.handle.await {
                Ok(outcome) => debug!(turn, ?outcome, "Generation task stopped"),
                Err(e) if e.is_cancelled() => debug!(turn, "Generation task aborted"),
                Err(e) => error!(turn, error = %e, "Generation task failed while stopping"),
            }
        }

        let fragments = session.char_queue.drain();
        session.char_queue.join().await;
        let sentences = session.sentence_queue.drain();
        session.sentence_queue.join().await;

        session.segmenter().reset();
        session.renew_turn_token();
        session.set_state(TurnState::Idle);

        let _ = self.events.send(ServerFrame::End);
        info!(session = %session.id, fragments, sentences, "Turn interrupted");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::pool::WorkerPool;
    use crate::session::Session;
    use crate::synthesizer::SentenceSynthesizer;
    use crate::testing::{FakeModel, FakeTranslator, FakeTts};

    fn idle_pipeline() -> (SessionPipeline, mpsc::UnboundedReceiver<ServerFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let synthesizer = SentenceSynthesizer::new(
            Arc::new(FakeTranslator::prefix("")),
            Arc::new(FakeTts::new()),
            WorkerPool::new(1),
            6,
        );
        let pipeline = SessionPipeline::new(
            Arc::new(Session::new("idle")),
            Arc::new(FakeModel::new(&[])),
            Arc::new(synthesizer),
            tx,
        );
        (pipeline, rx)
    }

    #[tokio::test]
    async fn test_interrupt_when_idle_sends_one_end() {
        let (pipeline, mut rx) = idle_pipeline();
        pipeline.interrupt().await;

        assert_eq!(rx.try_recv().unwrap(), ServerFrame::End);
        assert!(rx.try_recv().is_err());
        assert_eq!(pipeline.session().state(), TurnState::Idle);
        assert_eq!(pipeline.session().context_len(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_drains_unconsumed_queues() {
        let (pipeline, mut rx) = idle_pipeline();
        let session = pipeline.session();
        session.char_queue.put("left".into());
        session.char_queue.put("over".into());
        session.sentence_queue.put("Stale sentence.".into());

        pipeline.interrupt().await;

        assert_eq!(session.char_queue.pending(), 0);
        assert_eq!(session.sentence_queue.pending(), 0);
        assert_eq!(rx.try_recv().unwrap(), ServerFrame::End);
        assert!(!session.turn_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_segmenter_is_reset() {
        let (pipeline, _rx) = idle_pipeline();
        pipeline.session().segmenter().consume("dangling");
        pipeline.interrupt().await;
        assert_eq!(pipeline.session().segmenter().flush(), None);
    }
}
