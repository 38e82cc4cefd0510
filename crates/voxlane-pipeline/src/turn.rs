//! Turn orchestration: one user utterance in, one streamed reply out.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voxlane_core::protocol::ServerFrame;
use voxlane_core::types::ContextEntry;
use voxlane_providers::LanguageModel;

use crate::EventSink;
use crate::consumer::{run_char_consumer, run_sentence_consumer};
use crate::queue::WorkQueue;
use crate::session::{GenerationTask, Session, TurnOutcome, TurnState};
use crate::synthesizer::SentenceSynthesizer;

/// Drives one session: owns its consumers and its generation task.
pub struct SessionPipeline {
    pub(crate) session: Arc<Session>,
    model: Arc<dyn LanguageModel>,
    synthesizer: Arc<SentenceSynthesizer>,
    pub(crate) events: EventSink,
    shutdown: CancellationToken,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionPipeline {
    pub fn new(
        session: Arc<Session>,
        model: Arc<dyn LanguageModel>,
        synthesizer: Arc<SentenceSynthesizer>,
        events: EventSink,
    ) -> Self {
        Self {
            session,
            model,
            synthesizer,
            events,
            shutdown: CancellationToken::new(),
            consumers: Mutex::new(Vec::new()),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Spawn the char-stream and sentence consumers for the connection.
    pub fn start_consumers(&self) {
        let chars = tokio::spawn(run_char_consumer(
            Arc::clone(&self.session),
            self.events.clone(),
            self.shutdown.clone(),
        ));
        let sentences = tokio::spawn(run_sentence_consumer(
            Arc::clone(&self.session),
            Arc::clone(&self.synthesizer),
            self.events.clone(),
            self.shutdown.clone(),
        ));
        self.consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([chars, sentences]);
    }

    /// Begin a turn for `user_text`.
    ///
    /// Returns once the generation task is running. A turn still in
    /// progress is interrupted first, so its `end` precedes this turn's
    /// `start`.
    pub async fn start_turn(&self, user_text: impl Into<String>) {
        let user_text = user_text.into();
        if self.session.state() == TurnState::Generating {
            info!(session = %self.session.id, "Turn requested while generating; interrupting");
            self.interrupt().await;
        } else if let Some(finished) = self.session.take_task() {
            let _ = finished.handle.await;
        }

        let turn = self.session.next_turn();
        let _ = self.events.send(ServerFrame::Start);
        info!(session = %self.session.id, turn, chars = user_text.chars().count(), "Turn started");

        self.session.push_context(ContextEntry::user(user_text));
        self.session.set_state(TurnState::Generating);

        let cancel = self.session.turn_token();
        let handle = tokio::spawn(run_generation(
            Arc::clone(&self.session),
            Arc::clone(&self.model),
            self.events.clone(),
            cancel.clone(),
            turn,
        ));
        self.session.install_task(GenerationTask {
            handle,
            cancel,
            turn,
        });
    }

    /// Stop everything for a closing connection.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.session.turn_token().cancel();
        if let Some(task) = self.session.take_task() {
            task.cancel.cancel();
            let _ = task.handle.await;
        }

        let consumers =
            std::mem::take(&mut *self.consumers.lock().unwrap_or_else(PoisonError::into_inner));
        for consumer in consumers {
            if let Err(e) = consumer.await {
                warn!(error = %e, "Consumer task ended abnormally");
            }
        }
        debug!(session = %self.session.id, "Session pipeline shut down");
    }
}

/// Stream the reply into the char queue, collecting it into `reply`.
///
/// Model errors become part of the reply text instead of ending the turn.
async fn stream_reply(
    model: &dyn LanguageModel,
    context: &[ContextEntry],
    queue: &WorkQueue<String>,
    reply: &mut String,
) {
    let mut stream = match model.generate(context).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Language model request failed");
            let text = format!("Error: {e}");
            reply.push_str(&text);
            queue.put(text);
            return;
        }
    };

    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => {
                reply.push_str(&fragment);
                queue.put(fragment);
            }
            Err(e) => {
                warn!(error = %e, "Language model stream failed");
                let text = format!("Error: {e}");
                reply.push_str(&text);
                queue.put(text);
                break;
            }
        }
    }
}

/// Wait for both queues to retire this turn's work.
async fn drain_turn(session: &Session) {
    session.char_queue.join().await;
    let rest = session.segmenter().flush();
    if let Some(sentence) = rest {
        debug!(sentence_len = sentence.len(), "Flushing unterminated sentence");
        session.sentence_queue.put(sentence);
    }
    session.sentence_queue.join().await;
}

async fn run_generation(
    session: Arc<Session>,
    model: Arc<dyn LanguageModel>,
    events: EventSink,
    cancel: CancellationToken,
    turn: u64,
) -> TurnOutcome {
    let context = session.context();
    let mut reply = String::new();

    let streamed = tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = stream_reply(model.as_ref(), &context, &session.char_queue, &mut reply) => true,
    };

    let reply_chars = reply.chars().count();
    session.push_context(ContextEntry::assistant(reply));
    if !streamed {
        info!(session = %session.id, turn, reply_chars, "Generation cancelled");
        return TurnOutcome::Cancelled;
    }

    let drained = tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = drain_turn(&session) => true,
    };
    if !drained {
        info!(session = %session.id, turn, "Turn cancelled while draining");
        return TurnOutcome::Cancelled;
    }

    session.transition(TurnState::Generating, TurnState::Idle);
    // `end` is the task's last side effect: only the outcome follows it.
    let _ = events.send(ServerFrame::End);
    info!(session = %session.id, turn, reply_chars, "Turn complete");
    TurnOutcome::Completed
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use tokio::sync::mpsc;

    use super::*;
    use crate::pool::WorkerPool;
    use crate::testing::{FakeModel, FakeTranslator, FakeTts};
    use voxlane_core::types::Role;

    fn pipeline(
        model: FakeModel,
        translator: FakeTranslator,
        tts: FakeTts,
    ) -> (SessionPipeline, mpsc::UnboundedReceiver<ServerFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let synthesizer = SentenceSynthesizer::new(
            Arc::new(translator),
            Arc::new(tts),
            WorkerPool::new(2),
            4,
        );
        let pipeline = SessionPipeline::new(
            Arc::new(Session::new("test")),
            Arc::new(model),
            Arc::new(synthesizer),
            tx,
        );
        pipeline.start_consumers();
        (pipeline, rx)
    }

    async fn until_end(rx: &mut mpsc::UnboundedReceiver<ServerFrame>) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for end")
                .expect("event channel closed");
            let done = frame == ServerFrame::End;
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }

    /// Decoded audio per sentence, split on `is_final`.
    fn sentences_of(frames: &[ServerFrame]) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut current = Vec::new();
        for frame in frames {
            if let ServerFrame::Audio { data, is_final } = frame {
                current.extend(STANDARD.decode(data).unwrap());
                if *is_final {
                    sentences.push(String::from_utf8(std::mem::take(&mut current)).unwrap());
                }
            }
        }
        assert!(current.is_empty(), "audio frames without a final frame");
        sentences
    }

    fn texts_of(frames: &[ServerFrame]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|f| match f {
                ServerFrame::Text { data } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_turn_streams_text_and_audio_then_ends() {
        let model = FakeModel::new(&["Hi", ",", " I'm", " fine", "."]);
        let contexts = model.contexts.clone();
        let (pipeline, mut rx) = pipeline(model, FakeTranslator::prefix("ja:"), FakeTts::new());

        pipeline.start_turn("Hi, how are you?").await;
        let frames = until_end(&mut rx).await;

        assert_eq!(frames.first(), Some(&ServerFrame::Start));
        assert_eq!(frames.iter().filter(|f| **f == ServerFrame::End).count(), 1);
        assert_eq!(texts_of(&frames), vec!["Hi", ",", " I'm", " fine", "."]);
        assert_eq!(sentences_of(&frames), vec!["ja:Hi,", "ja:I'm fine."]);

        let context = pipeline.session().context();
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].role, Role::User);
        assert_eq!(context[1].role, Role::Assistant);
        assert_eq!(context[1].content, "Hi, I'm fine.");
        assert_eq!(contexts.lock().unwrap()[0].len(), 1);

        assert_eq!(pipeline.session().state(), TurnState::Idle);
        assert_eq!(pipeline.session().char_queue.pending(), 0);
        assert_eq!(pipeline.session().sentence_queue.pending(), 0);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_turn_work_precedes_end() {
        let (pipeline, mut rx) = pipeline(
            FakeModel::new(&["Done", "."]),
            FakeTranslator::prefix(""),
            FakeTts::new(),
        );

        pipeline.start_turn("finish up").await;
        until_end(&mut rx).await;

        let session = Arc::clone(pipeline.session());
        assert_eq!(session.state(), TurnState::Idle);
        assert_eq!(session.context_len(), 2);
        tokio::time::timeout(Duration::from_secs(1), async {
            while session.has_running_task() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("generation task should terminate right after end");
        assert!(rx.try_recv().is_err());
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_interrupt_discards_queued_sentences() {
        let tts = FakeTts::slow(Duration::from_secs(2));
        let calls = tts.calls();
        let (pipeline, mut rx) = pipeline(
            FakeModel::new(&["One.", "Two.", "Three."]),
            FakeTranslator::prefix(""),
            tts,
        );

        pipeline.start_turn("count").await;
        let session = Arc::clone(pipeline.session());
        tokio::time::timeout(Duration::from_secs(2), async {
            while calls.lock().unwrap().len() < 1 || session.sentence_queue.len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("first sentence should be mid-synthesis");

        pipeline.interrupt().await;
        let frames = until_end(&mut rx).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(calls.lock().unwrap().as_slice(), ["One."]);
        assert!(sentences_of(&frames).is_empty());
        assert!(rx.try_recv().is_err(), "exactly one end frame expected");
        assert_eq!(session.state(), TurnState::Idle);
        assert_eq!(session.sentence_queue.pending(), 0);
        assert_eq!(session.char_queue.pending(), 0);
        assert!(!session.has_running_task());
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_model_error_becomes_reply_text() {
        let (pipeline, mut rx) = pipeline(
            FakeModel::failing_after(&["Hello"], "boom"),
            FakeTranslator::prefix(""),
            FakeTts::new(),
        );

        pipeline.start_turn("Hi").await;
        let frames = until_end(&mut rx).await;

        assert_eq!(texts_of(&frames), vec!["Hello", "Error: boom"]);
        assert_eq!(sentences_of(&frames), vec!["HelloError: boom"]);
        assert_eq!(pipeline.session().context()[1].content, "HelloError: boom");
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_overlapping_turn_interrupts_previous() {
        let model = FakeModel::new(&["Slow", " reply", "."]).with_delay(Duration::from_millis(200));
        let (pipeline, mut rx) = pipeline(model, FakeTranslator::prefix(""), FakeTts::new());

        pipeline.start_turn("first").await;
        pipeline.start_turn("second").await;

        let first = until_end(&mut rx).await;
        assert_eq!(first, vec![ServerFrame::Start, ServerFrame::End]);
        let second = until_end(&mut rx).await;
        assert_eq!(second.first(), Some(&ServerFrame::Start));
        assert_eq!(texts_of(&second), vec!["Slow", " reply", "."]);

        let roles: Vec<Role> = pipeline.session().context().iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_synthesis_still_ends_turn() {
        let (pipeline, mut rx) = pipeline(
            FakeModel::new(&["Fine", "."]),
            FakeTranslator::failing(),
            FakeTts::new(),
        );

        pipeline.start_turn("How are you?").await;
        let frames = until_end(&mut rx).await;
        assert!(sentences_of(&frames).is_empty());
        assert!(frames.iter().all(|f| !matches!(f, ServerFrame::Error { .. })));
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_consumers_and_generation() {
        let model = FakeModel::new(&["never", " ends"]).with_delay(Duration::from_secs(10));
        let (pipeline, _rx) = pipeline(model, FakeTranslator::prefix(""), FakeTts::new());
        pipeline.start_turn("hi").await;

        tokio::time::timeout(Duration::from_secs(2), pipeline.shutdown())
            .await
            .expect("shutdown should not wait for the model");
        assert!(pipeline.consumers.lock().unwrap().is_empty());
    }
}
