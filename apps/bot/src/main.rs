use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use bot_core::{
    command::logout, spawn_welcome_broadcast, AdaptiveSender, EventRouter, GroupCrypto,
    MessagingTransport, Reporter, RouterConfig, RunExit, StartEpoch,
};
use clap::Parser;
use matrix_client::{
    connect, initial_sync, sign_in, spawn_sync, MatrixGroupCrypto, MatrixTransport, SessionStore,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod settings;

use settings::load_settings;

const EVENT_QUEUE_CAPACITY: usize = 256;
const QUIT_TOKEN: &str = "quit";

#[derive(Parser, Debug)]
#[command(about = "Chat-room bot that answers commands from its commander")]
struct Args {
    /// TOML or JSON settings file.
    #[arg(long, default_value = "bot.toml")]
    config: PathBuf,
    /// Overrides `log_level` from the settings file.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Events stamped before this instant are never acted upon.
    let start = StartEpoch::now();
    let args = Args::parse();
    let mut settings = load_settings(&args.config)?;
    if let Some(level) = args.log_level {
        settings.log_level = level;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    std::fs::create_dir_all(&settings.store_path).with_context(|| {
        format!("failed to create store directory {}", settings.store_path.display())
    })?;
    let sessions = SessionStore::new(&settings.store_path);
    let client = connect(&settings.homeserver, sessions.dir())
        .await
        .context("failed to create matrix client")?;
    let session = sign_in(
        &client,
        &sessions,
        &settings.username,
        &settings.password,
        &settings.device_name,
    )
    .await
    .with_context(|| format!("failed to sign in as {}", settings.username))?;
    initial_sync(&client).await.context("initial sync failed")?;

    let matrix = Arc::new(MatrixTransport::new(client.clone(), sessions));
    let bot_name = match matrix.own_display_name().await {
        Ok(name) => name,
        Err(err) => {
            warn!(%err, "display name lookup failed, using localpart");
            session.user_id.localpart().to_string()
        }
    };
    info!(user_id = %session.user_id, device_id = %session.device_id, %bot_name, "bot online");

    let reporter = Reporter::default();
    let transport: Arc<dyn MessagingTransport> = matrix;
    let crypto: Arc<dyn GroupCrypto> = Arc::new(MatrixGroupCrypto::new(Arc::new(client.clone())));
    let sender = Arc::new(AdaptiveSender::new(
        Arc::clone(&transport),
        Arc::clone(&crypto),
        reporter.clone(),
    ));

    if let Some(text) = settings.welcome_text() {
        spawn_welcome_broadcast(
            Arc::clone(&transport),
            Arc::clone(&sender),
            text.to_string(),
            reporter.clone(),
        );
    }

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let sync_task = spawn_sync(
        client,
        events_tx,
        Duration::from_millis(settings.sync_timeout_ms),
    );

    let router = EventRouter::new(
        RouterConfig {
            start,
            bot_name,
            own_user: Some(session.user_id.clone()),
            commander: settings.commander.clone(),
            encrypted_commands: settings.encrypted_commands,
        },
        Arc::clone(&transport),
        crypto,
        sender,
        reporter.clone(),
    );

    tokio::select! {
        exit = router.run(events_rx) => match exit {
            RunExit::Shutdown => info!("logout command received, shutting down"),
            RunExit::StreamClosed => warn!("sync stopped delivering events, shutting down"),
        },
        () = wait_for_quit() => {
            info!("quit requested on stdin");
            logout(transport.as_ref(), &reporter).await;
        }
    }

    sync_task.abort();
    Ok(())
}

fn is_quit(line: &str) -> bool {
    line.trim() == QUIT_TOKEN
}

/// Resolves once the operator types `quit`. A closed stdin never resolves,
/// so the bot keeps running detached from a terminal.
async fn wait_for_quit() {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_quit(&line) => return,
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(err) => {
                warn!(%err, "failed to read stdin");
                break;
            }
        }
    }
    std::future::pending::<()>().await;
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
