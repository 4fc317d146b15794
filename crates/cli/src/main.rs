use clap::Parser;
use config::Config;
use enforcer::{
    DryRunControl, Enforcer, MemoryStore, ProcessControl, ProcfsSource, Services, SessionEvent,
    SessionHandle, SessionManager, SessionRequest, SessionStore, SignalControl, SqliteStore,
    SystemClock,
};
use flume::bounded;
use lockin::{
    cli::{Cli, Command, StartArgs, format_clock},
    signals::{SignalEvent, wait_for_signal},
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // NOTE: The verbosity flag takes precedence over the environment variable
    // for log control. `LOCKIN_LOG` can only adjust levels per crate, e.g.
    // `LOCKIN_LOG=enforcer=debug lockin start ...`.
    let env_filter = EnvFilter::builder()
        .with_default_directive("sqlx=warn".parse()?)
        .with_env_var("LOCKIN_LOG")
        .from_env()?
        .add_directive(cli.verbosity.log_level_filter().as_str().parse()?);

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();

    // load config
    let config = match &cli.conffile {
        Some(path) => Config::extract([path])?,
        _ => {
            let mut candidates = glob::glob("/etc/lockin/config.d/*.toml")?
                .filter_map(Result::ok)
                .collect::<Vec<_>>();
            candidates.insert(0, "/etc/lockin/config.toml".into());
            if let Some(dir) = dirs::config_dir() {
                candidates.push(dir.join("lockin").join("config.toml"));
            }
            trace!(?candidates, "config file candidates");
            Config::extract(candidates)?
        }
    };
    debug!(?config, ?cli);

    match &cli.command {
        Command::Start(args) => start(&cli, config, args).await,
        Command::Apps { all } => apps(config, *all).await,
        Command::History { limit } => history(cli.database_path(&config), *limit).await,
        Command::Config => {
            write!(std::io::stdout(), "{}", config.to_toml()?)?;
            Ok(())
        }
    }
}

async fn open_store(path: Option<PathBuf>) -> anyhow::Result<Arc<dyn SessionStore>> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "opening session database");
            Ok(Arc::new(SqliteStore::new(path).await?))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

async fn start(cli: &Cli, config: Config, args: &StartArgs) -> anyhow::Result<()> {
    if !args.dry_run && !nix::unistd::geteuid().is_root() {
        warn!("not running as root, apps of other users cannot be closed");
    }

    let store = open_store(cli.database_path(&config)).await?;
    let control: Box<dyn ProcessControl> = if args.dry_run {
        Box::new(DryRunControl)
    } else {
        Box::new(SignalControl)
    };
    let enforcer = Enforcer::new(&config.enforcement, Box::new(ProcfsSource), control);
    let mut manager = SessionManager::new(
        &config,
        Services {
            enforcer,
            store,
            clock: Arc::new(SystemClock),
        },
    );
    let mut events = manager.subscribe();

    let (handle, control_rx) = SessionHandle::channel();
    let cancel = CancellationToken::new();
    let mut runner = tokio::spawn({
        let cancel = cancel.clone();
        async move { manager.run_until(cancel, control_rx).await }
    });

    // install signal handlers
    let (signals_tx, signals_rx) = bounded(8);
    let mut signal_handle = tokio::spawn(async move { wait_for_signal(signals_tx).await });

    let request = SessionRequest {
        name: args.name.clone(),
        duration_minutes: args
            .duration
            .unwrap_or(config.session.default_duration_minutes),
        whitelist: args.allow.clone(),
        description: args.description.clone(),
    };
    let id = handle.setup(request).await?;
    handle.start().await?;
    info!(id, "session running");

    let mut out = std::io::stdout();
    loop {
        tokio::select! {
            // bubble up any errors from the signal handlers
            res = &mut signal_handle => {
                res??;
                anyhow::bail!("signal handler stopped");
            }

            // the runner only returns once cancelled
            res = &mut runner => {
                res??;
                anyhow::bail!("session runner stopped");
            }

            event_res = signals_rx.recv_async() => {
                let event = event_res?;
                debug!(?event, "Received signal event");

                match event {
                    SignalEvent::EmergencyExit => {
                        warn!("emergency exit requested");
                        match handle.end(true).await {
                            Ok(()) => {}
                            // Already over; nothing left to wait for.
                            Err(err) if err.is_invalid_transition() => break,
                            // The session still ended; its event follows.
                            Err(err) => error!("error happened while ending session: {}", err),
                        }
                    }
                    SignalEvent::DumpSessionInfo => {
                        let info = handle.info().await?;
                        info!(?info, "session info");
                    }
                }
            }

            event = events.recv() => match event {
                Ok(SessionEvent::Ended { id, emergency_exit }) => {
                    if emergency_exit {
                        writeln!(out, "session {id} ended (emergency exit)")?;
                    } else {
                        writeln!(out, "session {id} completed")?;
                    }
                    break;
                }
                Ok(event) => print_event(&mut out, &event)?,
                Err(RecvError::Lagged(missed)) => warn!(missed, "session events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    signal_handle.abort();
    cancel.cancel();
    runner.await??;
    Ok(())
}

fn print_event(out: &mut impl Write, event: &SessionEvent) -> std::io::Result<()> {
    match event {
        SessionEvent::Started { id } => writeln!(out, "session {id} started"),
        SessionEvent::Updated { remaining, .. } if remaining.as_secs() % 60 == 0 => {
            writeln!(out, "{} remaining", format_clock(*remaining))
        }
        SessionEvent::AppBlocked { name, exe } => match exe {
            Some(exe) => writeln!(out, "blocked {name} ({})", exe.display()),
            None => writeln!(out, "blocked {name}"),
        },
        SessionEvent::Error(message) => {
            error!("{}", message);
            Ok(())
        }
        other => {
            trace!(?other, "session event");
            Ok(())
        }
    }
}

async fn apps(config: Config, all: bool) -> anyhow::Result<()> {
    let enforcer = Enforcer::new(
        &config.enforcement,
        Box::new(ProcfsSource),
        Box::new(DryRunControl),
    );
    let apps = tokio::task::spawn_blocking(move || enforcer.running_apps(all)).await??;

    let mut out = std::io::stdout().lock();
    for app in apps {
        match app.exe {
            Some(exe) => writeln!(out, "{:<24} {}", app.name, exe.display())?,
            None => writeln!(out, "{}", app.name)?,
        }
    }
    Ok(())
}

async fn history(database: Option<PathBuf>, limit: u32) -> anyhow::Result<()> {
    let Some(path) = database else {
        anyhow::bail!("no session database; history is not kept with --no-persist");
    };
    let store = open_store(Some(path)).await?;
    let sessions = store.recent_sessions(limit).await?;

    let mut out = std::io::stdout().lock();
    for session in sessions {
        let locked_in = session.time_locked_in.map(format_clock);
        writeln!(
            out,
            "{:>5}  {:<24} {:<15} {:>8} / {:<8} blocked {}",
            session.id,
            session.name,
            session.status.as_str(),
            locked_in.as_deref().unwrap_or("-"),
            format_clock(session.duration),
            session.apps_blocked_count,
        )?;
    }
    Ok(())
}
