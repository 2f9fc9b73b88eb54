//! Stdin/stdout transport, mainly for local runs and smoke testing.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tokio::sync::Mutex;
use tracing::warn;

use relay_core::InboundMessage;

use crate::transport::MessagingTransport;

const LOCAL_ID: &str = "local";

/// One line in = one message from the `local` user; replies go to stdout.
pub struct StdioTransport {
    lines: Mutex<Lines<BufReader<Stdin>>>,
    stdout: Mutex<Stdout>,
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }
}

#[async_trait]
impl MessagingTransport for StdioTransport {
    async fn receive(&self) -> Option<InboundMessage> {
        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(Some(text)) => Some(InboundMessage {
                conversation_id: LOCAL_ID.to_string(),
                user_id: LOCAL_ID.to_string(),
                text,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "failed to read from stdin");
                None
            }
        }
    }

    async fn send(&self, _conversation_id: &str, text: &str) -> anyhow::Result<()> {
        let mut stdout = self.stdout.lock().await;
        stdout.write_all(text.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }
}
