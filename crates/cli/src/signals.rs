use flume::Sender;
use tokio::signal::unix::{SignalKind, signal};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGINT, SIGTERM or SIGHUP: end the running session right away.
    EmergencyExit,
    /// SIGUSR1: log the current session.
    DumpSessionInfo,
}

/// Forward process signals as [`SignalEvent`]s until the receiver goes away.
pub async fn wait_for_signal(tx: Sender<SignalEvent>) -> anyhow::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    // The controlling terminal went away.
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;

    loop {
        let event = tokio::select! {
            _ = sigint.recv() => SignalEvent::EmergencyExit,
            _ = sigterm.recv() => SignalEvent::EmergencyExit,
            _ = sighup.recv() => SignalEvent::EmergencyExit,
            _ = sigusr1.recv() => SignalEvent::DumpSessionInfo,
        };
        debug!(?event, "signal received");
        tx.send_async(event).await?;
    }
}
