#![forbid(unsafe_code)]

#[cfg(unix)]
mod unix {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    use std::fs;
    use std::io;
    use std::path::Path;
    use std::process::{Child, Command, Output, Stdio};
    use std::thread::sleep;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    #[test]
    fn signals_dump_info_and_end_session_early() -> io::Result<()> {
        let output = run_session(&[Signal::SIGUSR1, Signal::SIGINT])?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        assert!(output.status.success(), "stderr: {stderr}");
        assert!(stdout.contains("started"), "stdout: {stdout}");
        assert!(stdout.contains("ended (emergency exit)"), "stdout: {stdout}");
        assert!(stderr.contains("session info"), "stderr: {stderr}");

        Ok(())
    }

    #[test]
    fn hangup_ends_session_as_emergency_exit() -> io::Result<()> {
        let output = run_session(&[Signal::SIGHUP])?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(
            output.status.success(),
            "stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        assert!(stdout.contains("ended (emergency exit)"), "stdout: {stdout}");

        Ok(())
    }

    /// Start a dry-run session, deliver `signals` one after another and
    /// collect the output once the process exits.
    fn run_session(signals: &[Signal]) -> io::Result<Output> {
        let dir = tempdir()?;
        let config_path = dir.path().join("config.toml");
        write_config(&config_path)?;

        let child = Command::new(env!("CARGO_BIN_EXE_lockin"))
            .arg("--conffile")
            .arg(&config_path)
            .arg("--no-persist")
            .args(["start", "--name", "signals", "--duration", "1", "--dry-run"])
            .env("LOCKIN_LOG", "lockin=info")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let pid = Pid::from_raw(child.id() as i32);
        sleep(Duration::from_millis(1000));

        for signal in signals {
            kill(pid, *signal).ok();
            sleep(Duration::from_millis(400));
        }
        wait_for_output(child)
    }

    fn write_config(path: &Path) -> io::Result<()> {
        let contents = "[enforcement]\n\
scan_interval = 3600\n\
termination_grace = 0\n\n\
[session]\n\
update_interval = 1\n";
        fs::write(path, contents)
    }

    fn wait_for_output(mut child: Child) -> io::Result<Output> {
        let start = Instant::now();
        loop {
            if child.try_wait()?.is_some() {
                break;
            }
            if start.elapsed() > Duration::from_secs(10) {
                let _ = child.kill();
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "lockin process did not exit",
                ));
            }
            sleep(Duration::from_millis(50));
        }
        child.wait_with_output()
    }
}

#[cfg(not(unix))]
#[test]
fn signals_dump_info_and_end_session_early() {
    // Signals are only supported in the Unix build.
}
