use anyhow::{Context, Result, bail};
use env_logger::{Builder, Env, Target};
use log::{debug, error, info};
use netchange::{
    config::AppConfig,
    services::{
        monitor::Monitor,
        pending::PendingQueue,
        prober::{Prober, SystemPing},
        responder::CommandResponder,
        wifi::WifiSwitcher,
    },
    telegram_client::TelegramClient,
};
use std::{io::Write, sync::Arc};
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    initialize();

    let config = AppConfig::get().context("failed to load configuration")?;

    log_startup(config);

    let channel =
        TelegramClient::new(config.telegram.clone()).context("failed to create telegram client")?;
    let prober = Prober::new(SystemPing::new(&config.probe));
    let switcher = WifiSwitcher::for_platform(&config.wifi);
    let queue = Arc::new(PendingQueue::new(config.pending.capacity));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let responder = CommandResponder::new(
        channel.clone(),
        prober.clone(),
        switcher.clone(),
        config.probe.status_samples,
        config.probe.max_failures,
    );
    let responder_task = tokio::spawn(responder.run(shutdown_rx.clone()));

    let monitor = Monitor::new(channel, prober, switcher, queue, config);
    let mut monitor_task = tokio::spawn(monitor.run(shutdown_rx));

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = sigterm.recv();
    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("monitor stopped by user");
        }
        _ = terminate => {
            info!("received SIGTERM");
        }
        result = &mut monitor_task => {
            // the monitor only returns after a shutdown request
            bail!("monitor task ended unexpectedly: {result:?}");
        }
    }

    shutdown_tx.send_replace(true);

    if let Err(e) = monitor_task.await {
        error!("monitor task failed: {e}");
    }

    if let Err(e) = responder_task.await {
        error!("command handler task failed: {e}");
    }

    debug!("shutdown complete");

    Ok(())
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();
}

fn log_startup(config: &AppConfig) {
    let [primary, secondary, fallback] = config.wifi.priority_list();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));
    info!("monitoring connection to {}", config.probe.host);
    info!("wifi priority: 1. {primary} 2. {secondary} 3. {fallback}");
    info!(
        "check interval: {}s, retry primary every {}h",
        config.monitor.check_interval.as_secs(),
        config.monitor.retry_primary_interval.as_secs() / 3600
    );
    info!(
        "ping strategy: {} pings, fail if {}+ fail",
        config.probe.samples, config.probe.max_failures
    );

    info!(
        "telegram bot: {}, {} chat(s) configured",
        if config.telegram.bot_token.is_some() {
            "token loaded"
        } else {
            "no token"
        },
        config.telegram.chat_ids.len()
    );
}
