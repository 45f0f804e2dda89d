// lobbynotes entry point.
//
// Startup sequence:
// 1. Load config
// 2. Initialize tracing (log to file, not terminal)
// 3. Install the fatal panic hook
// 4. Open database
// 5. Create mpsc channels
// 6. Spawn reader task
// 7. Spawn dispatcher task
// 8. Console loop (view updates out, commands in) until quit or Ctrl+C
// 9. Cleanup on exit

mod commands;
mod view;

use std::sync::Arc;

use anyhow::Context;
use lobbynotes_core::config::{self, Config};
use lobbynotes_core::db::Database;
use lobbynotes_core::dispatcher::{self, DispatcherState};
use lobbynotes_core::protocol::{UserCommand, ViewUpdate};
use lobbynotes_core::reader::{self, TungsteniteListener};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// How long the dispatcher gets to flush and exit after Ctrl+C.
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = config::load_config().context("failed to load configuration")?;

    // 2. Initialize tracing
    init_tracing(&config)?;
    info!("lobbynotes starting up");

    // 3. Panics escaping every task boundary are logged before the default hook runs.
    install_panic_hook();

    // 4. Open database
    let db = Database::open(&config.database.path).context("failed to open database")?;
    info!("Database opened at {}", config.database.path);

    // 5. Create channels
    let (reader_tx, reader_rx) = mpsc::channel(256);
    let (worker_tx, worker_rx) = mpsc::channel(256);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (ui_tx, mut ui_rx) = mpsc::channel(256);

    let state = DispatcherState::new(&config, Arc::new(db), worker_tx);

    // 6. Spawn reader task
    let port = config.reader.port;
    let reader_handle = tokio::spawn(async move {
        match TungsteniteListener::bind(port).await {
            Ok(listener) => {
                if let Err(e) = reader::run(listener, reader_tx).await {
                    error!("Reader error: {e:#}");
                }
            }
            Err(e) => error!("Failed to bind reader on port {port}: {e:#}"),
        }
    });

    // 7. Spawn dispatcher task
    let dispatcher_handle = tokio::spawn(async move {
        if let Err(e) = dispatcher::run(reader_rx, worker_rx, cmd_rx, ui_tx, state).await {
            error!("Dispatcher loop error: {e:#}");
        }
    });

    // 8. Console loop
    info!("Ready. Waiting for the loader on 127.0.0.1:{port}");
    println!("lobbynotes listening on 127.0.0.1:{port} (type `help` for commands)");

    let stdin_handle = tokio::spawn(read_commands(cmd_tx.clone()));
    let mut view = view::ViewState::new(config.roster.team_size);
    console_loop(
        &mut ui_rx,
        &mut view,
        tokio::signal::ctrl_c(),
        cmd_tx.clone(),
        |line| println!("{line}"),
    )
    .await;

    // 9. Cleanup
    dispatcher_handle.abort();
    stdin_handle.abort();
    reader_handle.abort();

    info!("lobbynotes shut down cleanly");
    Ok(())
}

/// Print view updates until the dispatcher drops its sender. Once `shutdown`
/// resolves, a quit is requested and updates keep draining for up to
/// [`SHUTDOWN_GRACE`] so the dispatcher never blocks on a full view channel
/// while flushing.
async fn console_loop<S>(
    ui_rx: &mut mpsc::Receiver<ViewUpdate>,
    view: &mut view::ViewState,
    shutdown: S,
    cmd_tx: mpsc::Sender<UserCommand>,
    mut print: impl FnMut(String),
) where
    S: std::future::Future,
{
    tokio::pin!(shutdown);
    let grace = tokio::time::sleep(SHUTDOWN_GRACE);
    tokio::pin!(grace);
    let mut quitting = false;

    loop {
        tokio::select! {
            update = ui_rx.recv() => match update {
                Some(update) => {
                    if let Some(line) = view.apply(update) {
                        print(line);
                    }
                }
                None => break,
            },
            _ = &mut shutdown, if !quitting => {
                info!("Shutdown requested");
                quitting = true;
                grace.as_mut().reset(tokio::time::Instant::now() + SHUTDOWN_GRACE);
                let tx = cmd_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(UserCommand::Quit).await;
                });
            }
            _ = &mut grace, if quitting => {
                warn!("Dispatcher did not stop within {SHUTDOWN_GRACE:?}");
                break;
            }
        }
    }
}

/// Forward parsed console lines to the dispatcher until stdin closes.
async fn read_commands(cmd_tx: mpsc::Sender<UserCommand>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {e}");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "help" {
            println!("{}", commands::HELP);
            continue;
        }
        match commands::parse_command(trimmed) {
            Some(cmd) => {
                if cmd_tx.send(cmd).await.is_err() {
                    break;
                }
            }
            None => println!("unrecognised command; type `help`"),
        }
    }
}

/// Initialize tracing to log to a file.
fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("lobbynotes.log"))?;

    let default_filter = format!("{},warn", config.logging.filter_directive());
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!(fatal = true, "Unhandled panic: {info}");
        default_hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobbynotes_core::protocol::ConnectionStatus;

    /// Stands in for the dispatcher: on quit it floods the view channel past
    /// its capacity, then exits.
    fn flooding_dispatcher(
        mut cmd_rx: mpsc::Receiver<UserCommand>,
        ui_tx: mpsc::Sender<ViewUpdate>,
        updates: usize,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                if cmd == UserCommand::Quit {
                    for _ in 0..updates {
                        let update = ViewUpdate::Notice("flushing".into());
                        if ui_tx.send(update).await.is_err() {
                            return;
                        }
                    }
                    return;
                }
            }
        })
    }

    #[tokio::test]
    async fn shutdown_keeps_draining_until_dispatcher_exits() {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let (ui_tx, mut ui_rx) = mpsc::channel(4);
        let dispatcher = flooding_dispatcher(cmd_rx, ui_tx, 20);
        let mut view = view::ViewState::new(1);
        let mut printed = 0;

        console_loop(&mut ui_rx, &mut view, async {}, cmd_tx, |_| printed += 1).await;

        assert_eq!(printed, 20);
        dispatcher.await.unwrap();
    }

    #[tokio::test]
    async fn updates_before_shutdown_are_printed() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        let (ui_tx, mut ui_rx) = mpsc::channel(4);
        ui_tx
            .send(ViewUpdate::ConnectionStatus(ConnectionStatus::Connected))
            .await
            .unwrap();
        drop(ui_tx);
        let mut view = view::ViewState::new(1);
        let mut lines = Vec::new();

        console_loop(
            &mut ui_rx,
            &mut view,
            std::future::pending::<()>(),
            cmd_tx,
            |line| lines.push(line),
        )
        .await;

        assert_eq!(lines, vec!["Loader connected".to_string()]);
        assert!(cmd_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_dispatcher_is_abandoned_after_grace() {
        let (cmd_tx, _cmd_rx) = mpsc::channel(4);
        let (_ui_tx, mut ui_rx) = mpsc::channel::<ViewUpdate>(4);
        let mut view = view::ViewState::new(1);
        let started = tokio::time::Instant::now();

        console_loop(&mut ui_rx, &mut view, async {}, cmd_tx, |_| {}).await;

        assert!(started.elapsed() >= SHUTDOWN_GRACE);
    }
}
