//! The dispatch pipeline.
//!
//! One inbound message flows through rate limiting, session selection,
//! prompt assembly, the backend exchange, stream reassembly, and finally a
//! durable append of the completed exchange. Backend failures park the
//! owning session on standby and defer the message to the retry queue
//! rather than surfacing an error to the user.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use backend_client::{BackendError, StreamEvent};
use conversation_store::{
    ConversationStore, DurableMap, PromptError, PromptWindowBuilder, StoreError,
};
use relay_core::{ChunkFrame, InboundMessage, RelayConfig, RelayError, Result};
use stream_assembler::{FlushPolicy, StreamFailure, StreamReassembler};

use crate::pool::BotPool;
use crate::rate_limit::RateLimiter;
use crate::retry::{PendingQuestion, RetryQueue};
use crate::session::BackendSession;
use crate::user_session::{ContactKind, UserSessionTracker};

/// Reply sent when the message alone blows the prompt budget.
const TOO_LONG_REPLY: &str = "Your message is too long, please shorten it and try again.";

/// How often the drain loop re-polls the reassembler while the backend is
/// quiet, so a debounced boundary still flushes without a new delta.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Terminal state of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The exchange streamed to the user and was persisted.
    Completed,
    /// No healthy session, or the backend failed mid-exchange; the message
    /// sits in the retry queue.
    Deferred,
    /// The message can never succeed (too large); a reply was sent and the
    /// message is dropped.
    Rejected,
}

pub struct Dispatcher<S: DurableMap> {
    store: Arc<ConversationStore<S>>,
    pool: BotPool,
    prompts: PromptWindowBuilder,
    limiter: RateLimiter,
    retry: RetryQueue,
    users: UserSessionTracker,
    flush: FlushPolicy,
}

fn store_fault(e: StoreError) -> RelayError {
    match e {
        StoreError::Integrity(reason) => RelayError::DataIntegrityFault(reason),
        other => RelayError::Storage(other.to_string()),
    }
}

impl<S: DurableMap> Dispatcher<S> {
    pub fn new(store: Arc<ConversationStore<S>>, pool: BotPool, config: &RelayConfig) -> Self {
        Self {
            store,
            pool,
            prompts: PromptWindowBuilder::new(config.prompt_budget),
            limiter: RateLimiter::new(
                config.rate_limit_size,
                Duration::from_secs(config.rate_limit_window_secs),
            ),
            retry: RetryQueue::new(),
            users: UserSessionTracker::default(),
            flush: FlushPolicy::new(&config.flush_boundary, Duration::from_millis(config.flush_debounce_ms)),
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore<S>> {
        &self.store
    }

    pub fn pool(&self) -> &BotPool {
        &self.pool
    }

    pub fn pending_count(&self) -> usize {
        self.retry.len()
    }

    /// Dispatch one inbound message, streaming reply frames on `tx`.
    pub async fn dispatch(
        &self,
        message: &InboundMessage,
        tx: &mpsc::Sender<ChunkFrame>,
    ) -> Result<DispatchOutcome> {
        if let Err(retry_after) = self.limiter.check(&message.conversation_id) {
            return Err(RelayError::RateLimitExceeded { retry_after });
        }
        self.try_dispatch(message, tx).await
    }

    /// The pipeline past the rate limiter; retries re-enter here so a
    /// deferred message is not double-counted against the window.
    async fn try_dispatch(
        &self,
        message: &InboundMessage,
        tx: &mpsc::Sender<ChunkFrame>,
    ) -> Result<DispatchOutcome> {
        let contact = self
            .users
            .contact(&message.user_id, &message.conversation_id);
        if contact == ContactKind::Revived {
            // A returning user starts a fresh thread.
            self.store
                .clear_last_message_id(&message.conversation_id)
                .await
                .map_err(store_fault)?;
        }

        let Some(session) = self.pool.choose(&message.user_id) else {
            info!(user_id = %message.user_id, "no healthy session, deferring message");
            self.retry.save(PendingQuestion {
                conversation_id: message.conversation_id.clone(),
                user_id: message.user_id.clone(),
                text: message.text.clone(),
            });
            return Ok(DispatchOutcome::Deferred);
        };
        session.assign_user(&message.user_id);

        // Held across prompt-build, the backend call, stream drain and the
        // final append, so exchanges on one session never interleave.
        let _exchange = session.begin_exchange().await;

        let prompt = match self
            .prompts
            .build(&self.store, &message.conversation_id, &message.text)
            .await
        {
            Ok(prompt) => prompt,
            Err(PromptError::TooLarge) => {
                let _ = tx.send(ChunkFrame::Begin).await;
                let _ = tx.send(ChunkFrame::Text(TOO_LONG_REPLY.to_string())).await;
                let _ = tx.send(ChunkFrame::End).await;
                return Ok(DispatchOutcome::Rejected);
            }
            Err(PromptError::Store(e)) => return Err(store_fault(e)),
        };

        match self.run_exchange(&session, &prompt, tx).await {
            Ok(completion) => {
                self.store
                    .append(&message.conversation_id, &message.text, &completion)
                    .await
                    .map_err(store_fault)?;
                session.reset_idle();
                Ok(DispatchOutcome::Completed)
            }
            Err(failure) => {
                warn!(
                    session = session.id(),
                    error = %failure,
                    "exchange failed, session on standby"
                );
                session.mark_standby();
                self.retry.save(PendingQuestion {
                    conversation_id: message.conversation_id.clone(),
                    user_id: message.user_id.clone(),
                    text: message.text.clone(),
                });
                Ok(DispatchOutcome::Deferred)
            }
        }
    }

    /// Run one exchange on `session`: submit the prompt, drain the event
    /// stream through the reassembler, and return the full completion.
    async fn run_exchange(
        &self,
        session: &Arc<BackendSession>,
        prompt: &[relay_core::PromptMessage],
        tx: &mpsc::Sender<ChunkFrame>,
    ) -> std::result::Result<String, StreamFailure> {
        let mut stream = session
            .backend()
            .submit(prompt)
            .await
            .map_err(backend_failure)?;

        let _ = tx.send(ChunkFrame::Begin).await;
        let mut reassembler = StreamReassembler::new(self.flush.clone());
        let mut poll = tokio::time::interval(DRAIN_POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = stream.next() => match event {
                    Some(Ok(StreamEvent::Delta(bytes))) => {
                        reassembler.push_bytes(&bytes)?;
                        if let Some(chunk) = reassembler.poll_chunk() {
                            let _ = tx.send(ChunkFrame::Text(chunk)).await;
                        }
                    }
                    Some(Ok(StreamEvent::Done)) | None => break,
                    Some(Err(e)) => {
                        let failure = backend_failure(e);
                        reassembler.fail(failure.clone());
                        return Err(failure);
                    }
                },
                _ = poll.tick() => {
                    if let Some(chunk) = reassembler.poll_chunk() {
                        let _ = tx.send(ChunkFrame::Text(chunk)).await;
                    }
                }
            }
        }

        if let Some(chunk) = reassembler.finish() {
            let _ = tx.send(ChunkFrame::Text(chunk)).await;
        }
        let _ = tx.send(ChunkFrame::End).await;
        debug!(
            session = session.id(),
            chars = reassembler.completion().len(),
            "exchange complete"
        );
        Ok(reassembler.completion().to_string())
    }

    /// Snapshot of the messages waiting for retry.
    pub fn pending(&self) -> Vec<PendingQuestion> {
        self.retry.snapshot()
    }

    /// Re-attempt one pending message, streaming reply frames on `tx`.
    /// A completed or rejected attempt clears the queue entry; a deferral
    /// leaves it for the next sweep.
    pub async fn retry_question(
        &self,
        question: &PendingQuestion,
        tx: &mpsc::Sender<ChunkFrame>,
    ) {
        let message = InboundMessage {
            conversation_id: question.conversation_id.clone(),
            user_id: question.user_id.clone(),
            text: question.text.clone(),
        };
        match self.try_dispatch(&message, tx).await {
            Ok(DispatchOutcome::Completed) | Ok(DispatchOutcome::Rejected) => {
                self.retry.remove_if_current(question);
            }
            Ok(DispatchOutcome::Deferred) => {}
            Err(e @ RelayError::DataIntegrityFault(_)) => {
                // Retrying cannot repair a corrupt chain.
                error!(user_id = %question.user_id, error = %e, "dropping unretryable message");
                self.retry.remove_if_current(question);
            }
            Err(e) => {
                warn!(user_id = %question.user_id, error = %e, "retry failed, keeping message");
            }
        }
    }

    /// One retry sweep (expected every fifteen seconds) over a snapshot of
    /// the queue.
    pub async fn retry_pending(&self, tx: &mpsc::Sender<ChunkFrame>) {
        for question in self.pending() {
            self.retry_question(&question, tx).await;
        }
    }

    /// One expiry sweep (expected every second): archive idle users,
    /// release their pool assignments and forget their thread pointers.
    pub async fn sweep_expired_users(&self) {
        for expired in self.users.sweep() {
            info!(user_id = %expired.user_id, "user session expired");
            self.pool.release_user(&expired.user_id);
            if let Err(e) = self
                .store
                .clear_last_message_id(&expired.conversation_id)
                .await
            {
                warn!(error = %e, "failed to reset expired conversation");
            }
        }
    }

    /// One keepalive tick (expected every second).
    pub async fn keepalive_tick(&self) {
        self.pool.keepalive_tick().await;
    }
}

fn backend_failure(e: BackendError) -> StreamFailure {
    match e {
        BackendError::RateLimited => StreamFailure::RateLimited,
        BackendError::Unavailable(reason) => StreamFailure::BackendUnavailable(reason),
        BackendError::Malformed(reason) => StreamFailure::ProtocolError(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use conversation_store::MemoryKvStore;
    use relay_core::DEFAULT_SYSTEM_ROLE;

    use backend_client::{EventStream, LlmBackend, Result as BackendResult};

    /// Scripted backend: streams a fixed reply, or fails while `failing`.
    struct MockBackend {
        id: String,
        reply: String,
        failing: AtomicBool,
        submissions: AtomicUsize,
    }

    impl MockBackend {
        fn new(id: &str, reply: &str) -> Self {
            Self {
                id: id.to_string(),
                reply: reply.to_string(),
                failing: AtomicBool::new(false),
                submissions: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for MockBackend {
        fn id(&self) -> &str {
            &self.id
        }

        async fn submit(&self, _prompt: &[relay_core::PromptMessage]) -> BackendResult<EventStream> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(BackendError::Unavailable("scripted outage".to_string()));
            }
            let events = vec![
                Ok(StreamEvent::Delta(Bytes::from(self.reply.clone()))),
                Ok(StreamEvent::Done),
            ];
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    fn dispatcher_with(
        backends: Vec<Arc<dyn LlmBackend>>,
    ) -> Dispatcher<MemoryKvStore> {
        let store = Arc::new(ConversationStore::new(
            MemoryKvStore::new(),
            DEFAULT_SYSTEM_ROLE,
        ));
        Dispatcher::new(store, BotPool::from_backends(backends), &RelayConfig::default())
    }

    fn inbound(text: &str) -> InboundMessage {
        InboundMessage {
            conversation_id: "conv".to_string(),
            user_id: "alice".to_string(),
            text: text.to_string(),
        }
    }

    async fn drain(rx: &mut mpsc::Receiver<ChunkFrame>) -> Vec<ChunkFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn completed_exchange_is_framed_and_persisted() {
        let backend = Arc::new(MockBackend::new("bot-0", "the answer"));
        let dispatcher = dispatcher_with(vec![backend]);
        let (tx, mut rx) = mpsc::channel(16);

        let outcome = dispatcher.dispatch(&inbound("question"), &tx).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Completed);

        let frames = drain(&mut rx).await;
        assert_eq!(frames.first(), Some(&ChunkFrame::Begin));
        assert_eq!(frames.last(), Some(&ChunkFrame::End));
        let text: String = frames
            .iter()
            .filter_map(|f| match f {
                ChunkFrame::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "the answer");

        let head = dispatcher.store().last_message_id("conv").await.unwrap();
        let exchange = dispatcher
            .store()
            .get("conv", head.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exchange.message, "question");
        assert_eq!(exchange.completion, "the answer");
    }

    #[tokio::test]
    async fn rate_limit_is_enforced_per_conversation() {
        let backend = Arc::new(MockBackend::new("bot-0", "ok"));
        let dispatcher = dispatcher_with(vec![backend]);
        let (tx, _rx) = mpsc::channel(64);

        for _ in 0..5 {
            dispatcher.dispatch(&inbound("q"), &tx).await.unwrap();
        }
        let err = dispatcher.dispatch(&inbound("q"), &tx).await.unwrap_err();
        assert!(matches!(err, RelayError::RateLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn empty_pool_defers_the_message() {
        let dispatcher = dispatcher_with(vec![]);
        let (tx, mut rx) = mpsc::channel(16);

        let outcome = dispatcher.dispatch(&inbound("q"), &tx).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Deferred);
        assert_eq!(dispatcher.pending_count(), 1);
        // A deferred message produces no frames.
        assert!(drain(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn backend_failure_defers_and_parks_the_session() {
        let backend = Arc::new(MockBackend::new("bot-0", "ok"));
        backend.failing.store(true, Ordering::SeqCst);
        let dispatcher = dispatcher_with(vec![backend]);
        let (tx, _rx) = mpsc::channel(64);

        let outcome = dispatcher.dispatch(&inbound("q"), &tx).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Deferred);
        assert_eq!(dispatcher.pending_count(), 1);

        // The only session is on standby now, so another attempt defers too.
        let outcome = dispatcher.dispatch(&inbound("again"), &tx).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Deferred);
        // Last write wins: still one pending entry for alice.
        assert_eq!(dispatcher.pending_count(), 1);
    }

    #[tokio::test]
    async fn retry_sweep_completes_deferred_message_after_recovery() {
        let backend = Arc::new(MockBackend::new("bot-0", "recovered"));
        backend.failing.store(true, Ordering::SeqCst);
        let dispatcher = dispatcher_with(vec![Arc::clone(&backend) as Arc<dyn LlmBackend>]);
        let (tx, mut rx) = mpsc::channel(64);

        dispatcher.dispatch(&inbound("q"), &tx).await.unwrap();
        assert_eq!(dispatcher.pending_count(), 1);

        // Backend heals and its session comes off standby.
        backend.failing.store(false, Ordering::SeqCst);
        dispatcher.pool.sessions()[0].clear_standby();

        dispatcher.retry_pending(&tx).await;
        assert_eq!(dispatcher.pending_count(), 0);

        let frames = drain(&mut rx).await;
        assert!(frames.contains(&ChunkFrame::Text("recovered".to_string())));
    }

    #[tokio::test]
    async fn oversized_message_gets_a_reply_and_is_dropped() {
        let backend = Arc::new(MockBackend::new("bot-0", "ok"));
        let dispatcher = dispatcher_with(vec![Arc::clone(&backend) as Arc<dyn LlmBackend>]);
        let (tx, mut rx) = mpsc::channel(16);

        // Seed history so prompt assembly actually measures the budget.
        dispatcher
            .store()
            .append("conv", "q", "a")
            .await
            .unwrap();

        let outcome = dispatcher
            .dispatch(&inbound(&"word ".repeat(5000)), &tx)
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Rejected);
        assert_eq!(dispatcher.pending_count(), 0);

        let frames = drain(&mut rx).await;
        assert_eq!(
            frames,
            vec![
                ChunkFrame::Begin,
                ChunkFrame::Text(TOO_LONG_REPLY.to_string()),
                ChunkFrame::End,
            ]
        );
        // Nothing was submitted to the backend.
        assert_eq!(backend.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_user_restarts_their_thread() {
        let backend = Arc::new(MockBackend::new("bot-0", "ok"));
        let dispatcher = dispatcher_with(vec![backend]);
        let (tx, _rx) = mpsc::channel(64);

        dispatcher.dispatch(&inbound("q1"), &tx).await.unwrap();
        assert!(dispatcher
            .store()
            .last_message_id("conv")
            .await
            .unwrap()
            .is_some());

        tokio::time::advance(Duration::from_secs(60 * 15 + 1)).await;
        dispatcher.sweep_expired_users().await;

        assert!(dispatcher
            .store()
            .last_message_id("conv")
            .await
            .unwrap()
            .is_none());
        assert!(!dispatcher.pool.sessions()[0].has_user("alice"));
    }
}
