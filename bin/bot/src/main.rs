use chrono::Utc;
use pitchside_bot::{
    actions::BotActions,
    config::BotConfig,
    context::AppContext,
    db::{
        ChallengeRepository, ConversationRepository, DerivedStateHooks, OccurrenceRepository,
        QuoteBook, RosterRepository,
    },
    error::StartupError,
    router::Router,
    telegram::TelegramClient,
};
use pitchside_conversation::{ConversationEngine, ConversationStore};
use pitchside_scheduler::{SchedulerContext, StockChallenges, TickDriver};
use rootcause::prelude::Report;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pitchside=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "bot stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<StartupError>> {
    // Load configuration from environment
    let config = BotConfig::from_env().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    let offset = config.scheduler.offset().ok_or_else(|| StartupError::Config {
        details: format!("invalid SCHEDULER__UTC_OFFSET '{}'", config.scheduler.utc_offset),
    })?;
    let ttl = config.conversation.ttl().ok_or_else(|| StartupError::Config {
        details: format!(
            "invalid CONVERSATION__TTL_HOURS {}",
            config.conversation.ttl_hours
        ),
    })?;
    tracing::info!(%offset, ttl_hours = ttl.num_hours(), "Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .map_err(|e| StartupError::Database {
            details: e.to_string(),
        })?;

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| StartupError::Migration {
            details: e.to_string(),
        })?;

    let conversations = Arc::new(ConversationRepository::new(db_pool.clone()));
    let engine = ConversationEngine::new(
        conversations.clone(),
        Arc::new(DerivedStateHooks::new(db_pool.clone())),
    );
    let telegram = Arc::new(TelegramClient::new(
        &config.telegram.api_base,
        &config.telegram.token,
        Duration::from_secs(config.telegram.poll_timeout_seconds),
    ));
    let roster = RosterRepository::new(db_pool.clone());

    // Prune expired conversations on startup, then periodically
    prune_expired(conversations.as_ref(), "startup").await;
    let cleanup_interval_secs = config.conversation.cleanup_interval_seconds;
    let cleanup_store = conversations.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cleanup_interval_secs));
        loop {
            interval.tick().await;
            prune_expired(cleanup_store.as_ref(), "periodic").await;
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Scheduler
    let actions = BotActions::new(
        Arc::new(roster.clone()),
        telegram.clone(),
        engine.clone(),
        Arc::new(ChallengeRepository::new(db_pool.clone())),
        Arc::new(StockChallenges::default()),
        ttl,
    );
    let driver = TickDriver::new(SchedulerContext {
        roster: Arc::new(roster.clone()),
        schedules: Arc::new(roster.clone()),
        occurrences: Arc::new(OccurrenceRepository::new(db_pool.clone(), offset)),
        notices: Arc::new(QuoteBook::new(db_pool.clone())),
        delivery: telegram.clone(),
        actions: Arc::new(actions),
        offset,
    });
    let cadence = config.scheduler.cadence();
    let scheduler = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { driver.run(cadence, shutdown).await }
    });

    // Stop on Ctrl-C
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let router = Router::new(AppContext {
        telegram: telegram.clone(),
        roster,
        engine,
        conversation_ttl: ttl,
    });
    poll_updates(&telegram, router, shutdown_rx).await;

    if let Err(e) = scheduler.await {
        tracing::warn!(error = %e, "scheduler task ended abnormally");
    }
    tracing::info!("Stopped");
    Ok(())
}

async fn prune_expired(store: &dyn ConversationStore, phase: &str) {
    match store.delete_expired(Utc::now()).await {
        Ok(count) if count > 0 => {
            tracing::info!(deleted_conversations = count, phase, "Pruned expired conversations");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, phase, "Failed to prune expired conversations");
        }
    }
}

/// Long-polls Telegram until shutdown, handling each update on its own task.
async fn poll_updates(telegram: &TelegramClient, router: Router, mut shutdown: watch::Receiver<bool>) {
    let mut offset = 0;
    tracing::info!("Polling Telegram for updates");

    while !*shutdown.borrow() {
        let updates = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            result = telegram.get_updates(offset) => result,
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(error = %e, "getUpdates failed; backing off");
                tokio::time::sleep(Duration::from_secs(3)).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let router = router.clone();
            tokio::spawn(async move {
                let id = update.update_id;
                if let Err(e) = router.handle(update).await {
                    tracing::warn!(update = id, error = %e, "update handling failed");
                }
            });
        }
    }
}
