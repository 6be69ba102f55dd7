use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::sync::{Notify, RwLock};
use tracing::{error, info};

use procsup::control::Registry;
use procsup::logger::{level_from_env, logs_tracing, FlushGuard};
use procsup::observer::{pump, ConsoleSink, EventSink, TracingSink};
use procsup::parse::load_or_create;
use procsup::paths::{system_data_dir, user_data_dir, CONFIG_FILE};
use procsup::shell::{run_shell, ShellCommand, Target, HELP};

const USAGE: &str = "usage: procsup [--service] [CONFIG]";

struct Args {
    service: bool,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        service: false,
        config: None,
    };
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--service" => args.service = true,
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            flag if flag.starts_with('-') => anyhow::bail!("unknown flag `{flag}`\n{USAGE}"),
            path if args.config.is_none() => args.config = Some(PathBuf::from(path)),
            _ => anyhow::bail!("{USAGE}"),
        }
    }
    Ok(args)
}

struct App {
    config_path: PathBuf,
    data_dir: PathBuf,
    service: bool,
    registry: RwLock<Registry>,
    sinks: Vec<Arc<dyn EventSink>>,
}

/*
    @@@
    @build_registry();
    . Loads (or creates) the config file, resolves outputs against the data directory and builds a Registry.
    . In service mode every program also starts inside the data directory.
    . Spawns the pump that feeds the registry's events into the sinks.
*/
fn build_registry(
    config_path: &Path,
    data_dir: &Path,
    service: bool,
    sinks: &[Arc<dyn EventSink>],
) -> Result<Registry> {
    let cfg = load_or_create(config_path)?;
    let specs = if service {
        cfg.resolve_in_data_dir(data_dir)?
    } else {
        cfg.resolve(data_dir)?
    };
    let (registry, rx) = Registry::new(specs, cfg.timing())?;
    tokio::spawn(pump(rx, sinks.to_vec()));
    Ok(registry)
}

impl App {
    /// A config that fails to load leaves the current programs untouched.
    async fn reload(&self) -> Result<()> {
        let fresh = build_registry(&self.config_path, &self.data_dir, self.service, &self.sinks)
            .context("reload aborted")?;
        let mut registry = self.registry.write().await;
        registry.shutdown().await;
        *registry = fresh;
        info!(config = %self.config_path.display(), "configuration reloaded");
        Ok(())
    }

    async fn handle(&self, cmd: ShellCommand) {
        match cmd {
            ShellCommand::Status => {
                for (name, phase) in self.registry.read().await.statuses().await {
                    println!("{name:<24} {phase:?}");
                }
            }
            ShellCommand::Start(Target::All) => {
                let started = self.registry.read().await.start_all().await;
                println!("Started {started} program(s)");
            }
            ShellCommand::Start(Target::Name(name)) => {
                if !self.registry.read().await.start(&name).await {
                    println!("`{name}` is unknown or already running");
                }
            }
            ShellCommand::Stop(Target::All) => self.registry.read().await.stop_all().await,
            ShellCommand::Stop(Target::Name(name)) => {
                if !self.registry.read().await.stop(&name).await {
                    println!("`{name}` is not running or did not stop in time");
                }
            }
            ShellCommand::Reload => match self.reload().await {
                Ok(()) => println!("Configuration reloaded."),
                Err(e) => println!("Error: {e:#}"),
            },
            ShellCommand::Help => println!("{HELP}"),
            ShellCommand::Unknown(other) => println!("Unknown command: {other}"),
            ShellCommand::Exit | ShellCommand::Empty => {}
        }
    }
}

/*
    @@@
    @handle_signals();
    . SIGHUP reloads the configuration.
    . SIGTERM/SIGINT stop every program; the service loop is woken through `quit`,
      the interactive shell (blocked in readline) exits the process directly after flushing the log file.
*/
async fn handle_signals(
    mut signals: Signals,
    app: Arc<App>,
    quit: Arc<Notify>,
    interactive: bool,
    log_guard: FlushGuard,
) {
    while let Some(signal) = signals.next().await {
        match signal {
            SIGHUP => {
                if let Err(e) = app.reload().await {
                    error!(error = %format!("{e:#}"), "reload failed");
                }
            }
            SIGTERM | SIGINT => {
                info!(signal, "shutdown requested");
                if interactive {
                    app.registry.read().await.shutdown().await;
                    info!("procsup stopped");
                    log_guard.flush();
                    std::process::exit(0);
                }
                quit.notify_one();
                break;
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    let data_dir = if args.service { system_data_dir() } else { user_data_dir() };
    let data_dir = data_dir.context("cannot prepare data directory")?;
    let log_guard = FlushGuard::new(logs_tracing(&data_dir.join("logs"), level_from_env())?);
    let config_path = args.config.unwrap_or_else(|| data_dir.join(CONFIG_FILE));
    info!(
        config = %config_path.display(),
        data_dir = %data_dir.display(),
        service = args.service,
        "procsup starting"
    );

    let sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(TracingSink), Arc::new(ConsoleSink::stdout())];
    let registry = build_registry(&config_path, &data_dir, args.service, &sinks)?;
    let app = Arc::new(App {
        config_path,
        data_dir,
        service: args.service,
        registry: RwLock::new(registry),
        sinks,
    });

    let signals = Signals::new([SIGTERM, SIGINT, SIGHUP]).context("cannot register signal handlers")?;
    let signals_handle = signals.handle();
    let quit = Arc::new(Notify::new());
    let signal_task = tokio::spawn(handle_signals(
        signals,
        Arc::clone(&app),
        Arc::clone(&quit),
        !args.service,
        log_guard.clone(),
    ));

    if args.service {
        let started = app.registry.read().await.start_all().await;
        info!(started, "all programs started");
        quit.notified().await;
    } else {
        println!("procsup control shell. Type 'help'.");
        let names = app.registry.read().await.names().map(String::from).collect();
        let history = app.data_dir.join("history.txt");
        let shell_app = Arc::clone(&app);
        run_shell(&history, names, move |cmd| {
            let app = Arc::clone(&shell_app);
            async move { app.handle(cmd).await }
        })
        .await?;
    }

    app.registry.read().await.shutdown().await;
    signals_handle.close();
    let _ = signal_task.await;
    info!("procsup stopped");
    log_guard.flush();
    Ok(())
}
