use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use backend_client::{LlmBackend, OpenAiBackend};
use conversation_store::{ConversationStore, FileKvStore};
use relay_core::RelayConfig;
use relay_dispatch::{BotPool, Dispatcher};
use relay_service::{Relay, StdioTransport};

#[derive(Parser)]
#[command(name = "chat_relay", about = "Relay between a messaging transport and LLM backends")]
struct Args {
    /// Path to the YAML config file; falls back to defaults plus
    /// environment overrides when omitted.
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(true)
                .with_file(false),
        )
        .init();

    if let Err(e) = run(Args::parse()).await {
        tracing::error!("relay exited with error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::from_env(),
    };
    if config.api_keys.is_empty() {
        anyhow::bail!("no backend API keys configured (set RELAY_API_KEYS or api_keys in the config file)");
    }

    let store = Arc::new(ConversationStore::new(
        FileKvStore::new(&config.data_dir),
        config.default_role.clone(),
    ));

    let backends: Vec<Arc<dyn LlmBackend>> = config
        .api_keys
        .iter()
        .enumerate()
        .map(|(i, key)| {
            Arc::new(OpenAiBackend::new(
                format!("backend-{i}"),
                key.clone(),
                config.api_base.clone(),
                config.model.clone(),
            )) as Arc<dyn LlmBackend>
        })
        .collect();
    tracing::info!(sessions = backends.len(), model = %config.model, "backend pool ready");

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store),
        BotPool::from_backends(backends),
        &config,
    ));
    let relay = Arc::new(Relay::new(dispatcher, config.operator.clone()));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            signal.cancel();
        }
    });

    relay.run(Arc::new(StdioTransport::new()), shutdown).await
}
