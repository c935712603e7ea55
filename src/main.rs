use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_warden::challenge::ChallengeMachine;
use chat_warden::config::{ConfigCache, FileConfigSource, RuntimeSettings};
use chat_warden::deferred::DeferredQueue;
use chat_warden::dispatch::Dispatcher;
use chat_warden::effects::TelegramInterpreter;
use chat_warden::escalation::EscalationMachine;
use chat_warden::gate::IdempotencyGate;
use chat_warden::pipeline::Pipeline;
use chat_warden::server::{AppState, build_router};
use chat_warden::store::{FileQueueStore, FileRowStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_warden=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = match RuntimeSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "invalid settings");
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&settings.data_dir) {
        tracing::error!(path = %settings.data_dir.display(), error = %e,
            "could not create data directory");
        std::process::exit(1);
    }

    let config_source = FileConfigSource::new(settings.data_dir.join("moderation.json"));
    if let Err(e) = config_source.ensure_exists() {
        tracing::error!(error = %e, "could not seed config file");
        std::process::exit(1);
    }

    let dispatcher = Dispatcher::new(
        TelegramInterpreter::new(&settings.bot_token),
        ConfigCache::with_default_ttl(Box::new(config_source)),
        IdempotencyGate::with_default_window(),
        Pipeline::new(settings.bot_user),
        ChallengeMachine::new(),
        EscalationMachine::new(Box::new(FileRowStore::new(
            settings.data_dir.join("levels.json"),
        ))),
        DeferredQueue::new(Box::new(FileQueueStore::new(
            settings.data_dir.join("queue.json"),
        ))),
    );

    let state = AppState::new(dispatcher, settings.webhook_secret.clone());
    let shutdown = CancellationToken::new();

    // The periodic driver for the deferred queue.
    let sweep_state = state.clone();
    let sweep_token = shutdown.clone();
    let sweep_interval = settings.sweep_interval;
    let sweeper = tokio::spawn(async move {
        let mut tick = tokio::time::interval(sweep_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = sweep_token.cancelled() => break,
                _ = tick.tick() => {
                    sweep_state.dispatcher().run_sweep().await;
                }
            }
        }
    });

    let app = build_router(state);
    tracing::info!(addr = %settings.listen_addr, "listening");

    let listener = match tokio::net::TcpListener::bind(settings.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %settings.listen_addr, error = %e, "bind failed");
            std::process::exit(1);
        }
    };

    let serve_token = shutdown.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = serve_token.cancelled() => {}
            }
        })
        .await;

    shutdown.cancel();
    let _ = sweeper.await;

    if let Err(e) = result {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
