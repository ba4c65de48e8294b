//! `colonyd` — headless daemon running the scheduler and agent runtime.
//!
//! Boots the store, event bus, services, and the recurring job engine, then
//! waits for ctrl-c.  The AI provider router and platform channel adapters are
//! external collaborators; without them the daemon still runs the read-only
//! action handlers and serves as the persistence/scheduling core.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use colony::agent::loop_::AgentReasoningLoop;
use colony::ai::router::{AiRouter, Result as AiResult};
use colony::ai::types::{AiRequest, AiResponse};
use colony::channels::{ChannelManager, LoggingChannel};
use colony::config::{self, RuntimeConfig};
use colony::event_bus::{AppEvent, EventBus, TokioBroadcastBus};
use colony::memory::SqliteMemoryStore;
use colony::scheduler::{ActionHandlers, Scheduler};
use colony::services::{
    ApprovalService, CostTracker, MasterNotificationService, ReflectionService,
};
use colony::store::Store;
use colony::tools::ToolRegistry;

#[derive(Parser, Debug)]
#[command(name = "colonyd", about = "Autonomous multi-agent orchestration daemon")]
struct Args {
    /// Path to config.toml (defaults to ~/.colony/config.toml or COLONY_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the SQLite database path.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Directory for rolling log files; stderr-only when omitted.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

/// Placeholder router used until a provider router is wired in.  Every
/// request fails fast with a clear message; schedule firings that delegate to
/// the reasoning loop surface it in `job_history`.
struct UnconfiguredRouter;

#[async_trait]
impl AiRouter for UnconfiguredRouter {
    async fn process(&self, _request: AiRequest) -> AiResult<AiResponse> {
        Err("All providers failed. Last error: no AI provider router configured".to_string())
    }

    fn router_name(&self) -> &str {
        "unconfigured"
    }
}

fn init_tracing(log_dir: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,colony=debug"));
    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "colonyd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

fn resolve_db_path(config: &RuntimeConfig, override_path: Option<&PathBuf>) -> String {
    if let Some(path) = override_path {
        return path.to_string_lossy().to_string();
    }
    if !config.store.db_path.is_empty() {
        return config.store.db_path.clone();
    }
    dirs::home_dir()
        .map(|home| home.join(".colony").join("colony.db"))
        .map(|path| path.to_string_lossy().to_string())
        .unwrap_or_else(|| "colony.db".to_string())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let _log_guard = init_tracing(args.log_dir.as_ref());

    let config = match &args.config {
        Some(path) => match config::load_config(path) {
            Ok(config) => config,
            Err(e) => {
                error!("config load failed: {e}");
                std::process::exit(1);
            }
        },
        None => config::load_default_config(),
    };

    let db_path = resolve_db_path(&config, args.db.as_ref());
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let store = match Store::open(&db_path) {
        Ok(store) => store,
        Err(e) => {
            error!("store open failed at {db_path}: {e}");
            std::process::exit(1);
        }
    };
    let memory_path = format!("{db_path}.memory");
    let memory = match SqliteMemoryStore::open(&memory_path) {
        Ok(memory) => Arc::new(memory),
        Err(e) => {
            error!("memory store open failed: {e}");
            std::process::exit(1);
        }
    };
    info!("store ready at {db_path}");

    let bus: Arc<dyn EventBus> = Arc::new(TokioBroadcastBus::new());
    let mut channels = ChannelManager::new();
    channels.register(Arc::new(LoggingChannel::new("email")));
    channels.register(Arc::new(LoggingChannel::new("whatsapp")));
    channels.register(Arc::new(LoggingChannel::new("telegram")));
    let channels = Arc::new(channels);

    let notifier = Arc::new(MasterNotificationService::new(
        store.clone(),
        channels,
        Some(Arc::clone(&bus)),
    ));
    let approvals = ApprovalService::new(store.clone(), Arc::clone(&notifier), Some(Arc::clone(&bus)));
    let reflection = ReflectionService::new(store.clone(), memory.clone());
    let cost = CostTracker::new(
        store.clone(),
        Arc::clone(&notifier),
        Some(Arc::clone(&bus)),
        config.budget.clone(),
    );

    let registry = Arc::new(ToolRegistry::new());
    let ai: Arc<dyn AiRouter> = Arc::new(UnconfiguredRouter);
    let loop_ = Arc::new(
        AgentReasoningLoop::new(
            store.clone(),
            memory,
            ai,
            registry,
            approvals,
            reflection,
            cost,
            config.loop_.clone(),
        )
        .with_bus(Arc::clone(&bus)),
    );

    let handlers = ActionHandlers::new(store.clone(), loop_, Arc::clone(&notifier));
    let scheduler = Scheduler::new(
        store,
        handlers,
        Some(Arc::clone(&bus)),
        config.scheduler.clone(),
    );
    scheduler.start().await;
    let _ = bus.publish(AppEvent::SystemReady);
    info!("colonyd running; press ctrl-c to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("signal handler failed: {e}");
    }
    info!("shutting down");
    scheduler.stop();
}
