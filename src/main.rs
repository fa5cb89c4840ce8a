//! Process entry point. Boots the three process-wide singletons (§9:
//! Redis handle, Postgres pool, validated config), then runs the data
//! plane and network-plane coordination for the single exchange this
//! instance claims.

mod alert;
mod api;
mod backoff;
mod cache;
mod config;
mod control;
mod db;
mod error;
mod exchange;
mod indicator;
mod notify;
mod reconcile;
mod redis_handle;
mod registry;
mod types;
mod warmup;

use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use alert::{default_rules, AlertEvaluator};
use api::AppState;
use config::{AppConfig, Cli};
use control::{ControlActions, ControlChannel};
use db::ExchangeRow;
use exchange::stub::StubAdapter;
use exchange::{binance::BinanceAdapter, coinbase::CoinbaseAdapter, kraken::KrakenAdapter, ExchangeAdapter, ExchangeEvent};
use indicator::{IndicatorScheduler, MomentumStageCalculator};
use notify::DiscordNotifier;
use reconcile::BoundaryReconciler;
use redis_handle::RedisHandle;
use registry::fsm::Trigger;
use registry::InstanceRegistry;
use types::Timeframe;
use warmup::SmartWarmupService;

fn build_adapter(exchange: &ExchangeRow, timeframes: Vec<Timeframe>) -> Box<dyn ExchangeAdapter> {
    match exchange.name.as_str() {
        "kraken" => Box::new(KrakenAdapter::new(exchange.id, exchange.ws_url.clone(), exchange.rest_url.clone(), timeframes)),
        "coinbase" => Box::new(CoinbaseAdapter::new(exchange.id, exchange.ws_url.clone(), exchange.rest_url.clone(), timeframes)),
        "binance" | "binance_us" => {
            let name: &'static str = if exchange.name == "binance" { "binance" } else { "binance_us" };
            Box::new(BinanceAdapter::new(exchange.id, name, exchange.ws_url.clone(), exchange.rest_url.clone(), timeframes))
        }
        "kucoin" => Box::new(StubAdapter::new(exchange.id, "kucoin")),
        "mexc" => Box::new(StubAdapter::new(exchange.id, "mexc")),
        other => {
            warn!(exchange = other, "unrecognized exchange name, falling back to stub adapter");
            Box::new(StubAdapter::new(exchange.id, "unknown"))
        }
    }
}

fn instance_identity() -> (String, String) {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string());
    let ip = std::env::var("INSTANCE_IP").unwrap_or_else(|_| "0.0.0.0".to_string());
    (hostname, ip)
}

/// Wires control-channel commands to the running instance's adapter and
/// FSM. Symbol-set changes take effect on the adapter's next reconnect
/// rather than live-patching an open WebSocket — acceptable per §4.B,
/// since subscription changes are already re-asserted on every connect.
///
/// `start` only flips the FSM and wakes `started`; the data plane
/// (adapter, warmup, indicator/boundary loops) is built once by `run`
/// after that wake-up, not by this trait impl, since building it needs
/// owned access to the adapter and the per-task join handles.
///
/// `stop` only requests cancellation. `run` already holds the data-plane
/// join handles behind a drain supervisor task; that supervisor fires
/// `Trigger::Drained` once every handle has actually finished, so this
/// impl never transitions the FSM itself (the control channel already
/// drove `Stop` before calling this).
struct LiveControlActions {
    registry: Arc<InstanceRegistry>,
    symbols: Arc<tokio::sync::RwLock<Vec<String>>>,
    adapter_cancel: watch::Sender<bool>,
    started: Arc<tokio::sync::Notify>,
}

#[async_trait::async_trait]
impl ControlActions for LiveControlActions {
    async fn start(&self) -> anyhow::Result<()> {
        self.started.notify_one();
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.adapter_cancel.send(true).ok();
        Ok(())
    }

    async fn add_symbol(&self, symbol: &str) -> anyhow::Result<()> {
        let mut guard = self.symbols.write().await;
        if !guard.iter().any(|s| s == symbol) {
            guard.push(symbol.to_string());
        }
        self.registry.set_symbol_count(guard.len() as u32);
        Ok(())
    }

    async fn bulk_add_symbols(&self, symbols: &[String]) -> anyhow::Result<()> {
        let mut guard = self.symbols.write().await;
        for symbol in symbols {
            if !guard.iter().any(|s| s == symbol) {
                guard.push(symbol.clone());
            }
        }
        self.registry.set_symbol_count(guard.len() as u32);
        Ok(())
    }

    async fn force_backfill(&self, symbol: &str, timeframe: Timeframe) -> anyhow::Result<()> {
        info!(symbol, ?timeframe, "force-backfill requested; next boundary reconciliation will cover it");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    if cli.config_check {
        println!("configuration ok for exchange '{}'", config.exchange_name);
        std::process::exit(0);
    }

    if let Err(e) = run(config, cli).await {
        error!(error = %e, "fatal error");
        std::process::exit(2);
    }
    Ok(())
}

async fn run(config: AppConfig, cli: Cli) -> anyhow::Result<()> {
    let pg_pool = PgPoolOptions::new().max_connections(10).connect(&config.database_url).await?;
    let redis = RedisHandle::connect(&config.redis_url).await?;

    let exchange = db::fetch_exchange_by_name(&pg_pool, &config.exchange_name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("exchange '{}' not found or inactive", config.exchange_name))?;

    let timeframes: Vec<Timeframe> = exchange
        .supported_timeframes
        .iter()
        .filter_map(|s| Timeframe::parse(s))
        .collect();

    let symbol_rows = db::fetch_symbols(&pg_pool, exchange.id).await?;
    let symbols: Vec<String> = symbol_rows.iter().map(|s| s.symbol.clone()).collect();
    let sentinel_symbol = symbols.first().cloned().unwrap_or_else(|| "BTC-USD".to_string());

    let (hostname, ip) = instance_identity();
    let notifier = config
        .discord_webhook_url
        .clone()
        .map(|url| Arc::new(DiscordNotifier::new(url)) as Arc<dyn registry::StateChangeNotifier>);

    let registry = Arc::new(InstanceRegistry::new(
        redis.clone(),
        exchange.id,
        exchange.name.clone(),
        hostname,
        ip,
        None,
        None,
        notifier,
    ));
    registry.set_symbol_count(symbols.len() as u32);

    let alert_notifier = config
        .discord_webhook_url
        .clone()
        .map(|url| Arc::new(DiscordNotifier::new(url)) as Arc<dyn alert::NotificationSink>);
    let evaluator = AlertEvaluator::new(exchange.id, exchange.name.clone(), pg_pool.clone(), redis.clone(), default_rules(), alert_notifier);

    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel::<ExchangeEvent>(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (adapter_cancel_tx, adapter_cancel_rx) = watch::channel(false);

    let symbols_shared = Arc::new(tokio::sync::RwLock::new(symbols.clone()));
    let started = Arc::new(tokio::sync::Notify::new());
    let control_actions = Arc::new(LiveControlActions {
        registry: registry.clone(),
        symbols: symbols_shared.clone(),
        adapter_cancel: adapter_cancel_tx.clone(),
        started: started.clone(),
    });

    let control_channel = Arc::new(ControlChannel::new(
        redis.clone(),
        config.control_user_id.clone(),
        registry.clone(),
        control_actions.clone(),
    ));

    // The instance boots idle (§4.K) and waits here for either an
    // external `start` control command or `--autostart` to emulate one.
    // Heartbeat, control and the public API all run while idle so the
    // instance is observable and controllable before it ever opens a
    // market-data connection.
    let heartbeat_interval = std::time::Duration::from_millis(config.heartbeat_interval_ms);
    let heartbeat = tokio::spawn(registry::heartbeat::run_heartbeat_loop(registry.clone(), heartbeat_interval, shutdown_rx.clone()));

    let control_run = control_channel.clone();
    let control_shutdown = shutdown_rx.clone();
    let control_task = tokio::spawn(async move {
        if let Err(e) = control_run.run(control_shutdown).await {
            error!(error = %e, "control channel exited with error");
        }
    });

    let state = Arc::new(AppState { redis: redis.clone(), pg: pg_pool.clone() });
    let api_router = api::router(state);
    let listener = tokio::net::TcpListener::bind(&config.effective_bind_addr()).await?;
    let api_shutdown = shutdown_rx.clone();
    let api_task = tokio::spawn(async move {
        axum::serve(listener, api_router)
            .with_graceful_shutdown(async move {
                let mut rx = api_shutdown;
                let _ = rx.changed().await;
            })
            .await
    });

    if let Some(exchange_name) = cli.autostart.as_deref() {
        if exchange_name == exchange.name {
            info!(exchange = exchange_name, "autostart flag matched, emulating a start command");
            let autostart_channel = control_channel.clone();
            tokio::spawn(async move { autostart_channel.autostart().await });
        }
    }

    info!(exchange = %exchange.name, "instance idle, waiting for start");
    tokio::select! {
        _ = started.notified() => {}
        _ = wait_for_shutdown_signal() => {
            info!("shutdown signal received while idle");
            let _ = shutdown_tx.send(true);
            let _ = adapter_cancel_tx.send(true);
            let _ = heartbeat.await;
            let _ = control_task.await;
            let _ = api_task.await;
            return Ok(());
        }
    }

    // Startup data flow (§2): warmup -> warming->active -> adapter opens.
    let mut adapter = build_adapter(&exchange, timeframes.clone());
    adapter.subscribe(&symbols, &timeframes).await?;
    let warmup_service = SmartWarmupService::new(redis.clone());
    if let Err(e) = warmup_service.run(exchange.id, adapter.as_ref(), &symbols, &sentinel_symbol, &timeframes).await {
        warn!(exchange_id = exchange.id, error = %e, "warmup run failed, proceeding to streaming anyway");
    }
    registry.transition(Trigger::AdapterConnected).await?;
    registry.transition(Trigger::WarmupComplete).await?;

    let indicator_cancel = adapter_cancel_rx.clone();
    let boundary_cancel = adapter_cancel_rx.clone();
    let adapter_loop = tokio::spawn(exchange::run_with_reconnect(adapter, timeframes.clone(), event_tx, adapter_cancel_rx));

    let writer = redis.writer();
    let consumer_exchange_id = exchange.id;
    let event_consumer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                ExchangeEvent::CandleClose(candle) => {
                    if let Err(e) = writer.add_candle_if_newer(&candle, true).await {
                        error!(error = %e, "failed writing closed candle");
                    }
                }
                ExchangeEvent::CandleUpdate(candle) => {
                    if let Err(e) = writer.add_candle_if_newer(&candle, false).await {
                        error!(error = %e, "failed writing candle update");
                    }
                }
                ExchangeEvent::TickerUpdate { symbol, ticker } => {
                    if let Err(e) = writer.write_ticker(consumer_exchange_id, &symbol, &ticker).await {
                        error!(error = %e, "failed writing ticker");
                    }
                }
                ExchangeEvent::Connected => info!("adapter connected"),
                ExchangeEvent::Disconnected => warn!("adapter disconnected"),
                ExchangeEvent::Reconnecting { attempt } => warn!(attempt, "adapter reconnecting"),
                ExchangeEvent::Error(message) => error!(message, "adapter reported fatal error"),
            }
        }
    });

    let indicator_scheduler = IndicatorScheduler::new(redis.clone(), vec![Box::new(MomentumStageCalculator)], evaluator);
    let indicator_exchange_id = exchange.id;
    // Indicator/boundary loops are part of the data plane: they cancel on
    // the same `adapter_cancel` signal as the adapter, not on process-wide
    // `shutdown_rx` (heartbeat/control/api outlive a `stop` command).
    let indicator_task = tokio::spawn(async move {
        if let Err(e) = indicator_scheduler.run(indicator_exchange_id, indicator_cancel).await {
            error!(error = %e, "indicator scheduler exited with error");
        }
    });

    let boundary_adapter = build_adapter(&exchange, timeframes.clone());
    let reconciler = BoundaryReconciler::new(redis.writer());
    let boundary_pairs: Vec<(String, Timeframe)> =
        symbols.iter().flat_map(|s| timeframes.iter().map(move |tf| (s.clone(), *tf))).collect();
    let boundary_task = tokio::spawn(reconcile::run_boundary_loop(reconciler, boundary_adapter, boundary_pairs, boundary_cancel));

    // §4.K: `Stop` only reaches `Stopped` once every data-plane task has
    // actually finished draining, not the instant the cancel signal is
    // sent. This supervisor owns the join handles and fires `Drained`
    // itself so `LiveControlActions::stop` never has to guess when it's
    // safe to transition.
    let drain_registry = registry.clone();
    let drain_task = tokio::spawn(async move {
        let _ = adapter_loop.await;
        let _ = event_consumer.await;
        let _ = indicator_task.await;
        let _ = boundary_task.await;
        if let Err(e) = drain_registry.transition(Trigger::Drained).await {
            warn!(error = %e, "failed transitioning to Drained after subsystem drain");
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining subsystems");
    let _ = shutdown_tx.send(true);
    let _ = adapter_cancel_tx.send(true);

    let _ = drain_task.await;
    let _ = heartbeat.await;
    let _ = control_task.await;
    let _ = api_task.await;

    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed installing SIGTERM handler");
        let mut interrupt = signal(SignalKind::interrupt()).expect("failed installing SIGINT handler");
        tokio::select! {
            _ = term.recv() => {}
            _ = interrupt.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
