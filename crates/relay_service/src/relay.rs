//! The relay facade and service run loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use conversation_store::{DurableMap, StoreError};
use relay_core::config::OperatorChannel;
use relay_core::{ChunkFrame, InboundMessage, RelayError};
use relay_dispatch::Dispatcher;

use crate::commands::{self, Command};
use crate::greetings;
use crate::transport::MessagingTransport;

const RETRY_SWEEP_INTERVAL: Duration = Duration::from_secs(15);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);

const INTERNAL_FAULT_REPLY: &str = "Something went wrong on our side. Please try again later.";

fn store_fault(e: StoreError) -> RelayError {
    match e {
        StoreError::Integrity(reason) => RelayError::DataIntegrityFault(reason),
        other => RelayError::Storage(other.to_string()),
    }
}

async fn send_reply(tx: &mpsc::Sender<ChunkFrame>, text: &str) {
    let _ = tx.send(ChunkFrame::Begin).await;
    let _ = tx.send(ChunkFrame::Text(text.to_string())).await;
    let _ = tx.send(ChunkFrame::End).await;
}

/// The transport-facing surface of the relay.
///
/// Wraps the dispatcher with chat commands, greeting shortcuts, the
/// empty-message filter and user-facing error replies, and owns the run
/// loop that ties a [`MessagingTransport`] to all background sweeps.
pub struct Relay<S: DurableMap> {
    dispatcher: Arc<Dispatcher<S>>,
    operator: Option<OperatorChannel>,
    faults_tx: mpsc::Sender<String>,
    faults_rx: Mutex<mpsc::Receiver<String>>,
}

impl<S: DurableMap + 'static> Relay<S> {
    pub fn new(dispatcher: Arc<Dispatcher<S>>, operator: Option<OperatorChannel>) -> Self {
        let (faults_tx, faults_rx) = mpsc::channel(64);
        Self {
            dispatcher,
            operator,
            faults_tx,
            faults_rx: Mutex::new(faults_rx),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<S>> {
        &self.dispatcher
    }

    /// Handle one inbound message.
    ///
    /// Returns `None` for messages that are ignored outright (empty text).
    /// Otherwise the returned stream frames the reply as `Begin`, text
    /// chunks, `End` - except for a deferred message, whose stream ends
    /// without frames and whose answer arrives via a later retry sweep.
    pub async fn handle_inbound(&self, message: InboundMessage) -> Option<ReceiverStream<ChunkFrame>> {
        let text = message.text.trim();
        if text.is_empty() {
            return None;
        }
        let (tx, rx) = mpsc::channel(32);

        if let Some(command) = commands::parse(text) {
            let reply = self.execute_command(&message.conversation_id, command).await;
            send_reply(&tx, &reply).await;
            return Some(ReceiverStream::new(rx));
        }
        if let Some(greeting) = greetings::reply_to(text) {
            send_reply(&tx, &greeting).await;
            return Some(ReceiverStream::new(rx));
        }

        let message = InboundMessage {
            text: text.to_string(),
            ..message
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let faults = self.faults_tx.clone();
        tokio::spawn(async move {
            match dispatcher.dispatch(&message, &tx).await {
                Ok(outcome) => {
                    debug!(conversation_id = %message.conversation_id, ?outcome, "dispatched");
                }
                Err(RelayError::RateLimitExceeded { retry_after }) => {
                    let wait = retry_after.as_secs().max(1);
                    send_reply(
                        &tx,
                        &format!("Too many requests. Please wait {wait} seconds and try again."),
                    )
                    .await;
                }
                Err(e) => {
                    error!(conversation_id = %message.conversation_id, error = %e, "dispatch failed");
                    let _ = faults.try_send(format!(
                        "relay fault in conversation {}: {e}",
                        message.conversation_id
                    ));
                    send_reply(&tx, INTERNAL_FAULT_REPLY).await;
                }
            }
        });
        Some(ReceiverStream::new(rx))
    }

    /// Forget a conversation's context chain.
    pub async fn reset(&self, conversation_id: &str) -> relay_core::Result<()> {
        self.dispatcher
            .store()
            .clear_last_message_id(conversation_id)
            .await
            .map_err(store_fault)
    }

    /// Set a conversation's persona; returns whether it changed.
    pub async fn set_persona(&self, conversation_id: &str, role: &str) -> relay_core::Result<bool> {
        self.dispatcher
            .store()
            .set_role(conversation_id, role)
            .await
            .map_err(store_fault)
    }

    async fn execute_command(&self, conversation_id: &str, command: Command) -> String {
        let store = self.dispatcher.store();
        let result = match command {
            Command::SetRole(role) => {
                store.set_role(conversation_id, &role).await.map(|changed| {
                    if changed {
                        "Persona updated, context cleared.".to_string()
                    } else {
                        "That is already the current persona.".to_string()
                    }
                })
            }
            Command::QueryRole => store
                .role(conversation_id)
                .await
                .map(|role| format!("Current persona: {role}")),
            Command::ResetRole => store
                .reset_role(conversation_id)
                .await
                .map(|_| "Persona reset to the default.".to_string()),
            Command::Reset => store
                .clear_last_message_id(conversation_id)
                .await
                .map(|_| "Context cleared, the conversation starts fresh.".to_string()),
        };
        match result {
            Ok(reply) => reply,
            Err(e) => {
                error!(conversation_id, error = %e, "command failed");
                let _ = self
                    .faults_tx
                    .try_send(format!("command fault in conversation {conversation_id}: {e}"));
                INTERNAL_FAULT_REPLY.to_string()
            }
        }
    }

    /// Pump the transport until it closes or shutdown is requested, running
    /// the retry, expiry and keepalive sweeps alongside. The store is
    /// flushed before returning.
    pub async fn run(
        self: Arc<Self>,
        transport: Arc<dyn MessagingTransport>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let mut retry_tick = tokio::time::interval(RETRY_SWEEP_INTERVAL);
        let mut maintenance_tick = tokio::time::interval(MAINTENANCE_INTERVAL);
        info!("relay running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                inbound = transport.receive() => {
                    let Some(message) = inbound else {
                        info!("transport closed");
                        break;
                    };
                    if let Err(e) = transport.acknowledge(&message).await {
                        warn!(error = %e, "failed to acknowledge message");
                    }
                    let conversation_id = message.conversation_id.clone();
                    if let Some(mut frames) = self.handle_inbound(message).await {
                        let transport = Arc::clone(&transport);
                        tokio::spawn(async move {
                            while let Some(frame) = frames.next().await {
                                if let Err(e) =
                                    transport.send(&conversation_id, frame.render()).await
                                {
                                    warn!(error = %e, "failed to deliver frame");
                                    break;
                                }
                            }
                        });
                    }
                }
                _ = retry_tick.tick() => {
                    let relay = Arc::clone(&self);
                    let transport = Arc::clone(&transport);
                    tokio::spawn(async move {
                        relay.retry_sweep(transport).await;
                    });
                }
                _ = maintenance_tick.tick() => {
                    let relay = Arc::clone(&self);
                    tokio::spawn(async move {
                        relay.dispatcher.sweep_expired_users().await;
                        relay.dispatcher.keepalive_tick().await;
                    });
                }
                report = async { self.faults_rx.lock().await.recv().await } => {
                    let Some(report) = report else { continue };
                    let Some(operator) = &self.operator else { continue };
                    if let Err(e) = transport
                        .send(&operator.conversation_id, &report)
                        .await
                    {
                        warn!(error = %e, "failed to reach operator channel");
                    }
                }
            }
        }

        // Last writes must reach disk before the process exits.
        self.dispatcher.store().close().await?;
        Ok(())
    }

    /// Re-attempt every pending message, routing reply frames back to the
    /// conversation each one came from.
    async fn retry_sweep(&self, transport: Arc<dyn MessagingTransport>) {
        for question in self.dispatcher.pending() {
            let (tx, mut rx) = mpsc::channel::<ChunkFrame>(32);
            let conversation_id = question.conversation_id.clone();
            let transport = Arc::clone(&transport);
            let forward = tokio::spawn(async move {
                while let Some(frame) = rx.recv().await {
                    if let Err(e) = transport.send(&conversation_id, frame.render()).await {
                        warn!(error = %e, "failed to deliver retried frame");
                        break;
                    }
                }
            });
            self.dispatcher.retry_question(&question, &tx).await;
            drop(tx);
            let _ = forward.await;
        }
    }
}
