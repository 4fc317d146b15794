#![forbid(unsafe_code)]

use config::Enforcement;
use enforcer::error::Error;
use enforcer::{
    BlockedProcess, ControlError, EnforcementLoop, Enforcer, EnforcerEvent, ProcessControl,
    ProcessRecord, ProcessSource, Whitelist,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct World {
    processes: Vec<ProcessRecord>,
    terminated: Vec<u32>,
    killed: Vec<u32>,
    /// The pretend host process chain.
    protected: Vec<u32>,
    fail_snapshots: bool,
}

/// A process table that both lists and obeys signals.
#[derive(Debug, Default, Clone)]
struct FakeSystem(Arc<Mutex<World>>);

impl FakeSystem {
    fn with(processes: Vec<ProcessRecord>) -> Self {
        let fake = Self::default();
        fake.0.lock().unwrap().processes = processes;
        fake
    }

    fn spawn(&self, process: ProcessRecord) {
        self.0.lock().unwrap().processes.push(process);
    }

    fn exit(&self, pid: u32) {
        self.0.lock().unwrap().processes.retain(|p| p.pid != pid);
    }

    fn terminated(&self) -> Vec<u32> {
        self.0.lock().unwrap().terminated.clone()
    }

    fn protect(&self, pids: &[u32]) {
        self.0.lock().unwrap().protected = pids.to_vec();
    }

    fn fail_snapshots(&self, fail: bool) {
        self.0.lock().unwrap().fail_snapshots = fail;
    }
}

impl ProcessSource for FakeSystem {
    fn snapshot(&self) -> Result<Vec<ProcessRecord>, Error> {
        let world = self.0.lock().unwrap();
        if world.fail_snapshots {
            return Err(Error::Io(std::io::Error::other("proc unavailable")));
        }
        Ok(world.processes.clone())
    }

    fn protected_pids(&self) -> Result<Vec<u32>, Error> {
        Ok(self.0.lock().unwrap().protected.clone())
    }
}

impl ProcessControl for FakeSystem {
    fn terminate(&self, pid: u32) -> Result<(), ControlError> {
        let mut world = self.0.lock().unwrap();
        if !world.processes.iter().any(|p| p.pid == pid) {
            return Err(ControlError::NoSuchProcess);
        }
        world.terminated.push(pid);
        world.processes.retain(|p| p.pid != pid);
        Ok(())
    }

    fn wait_for_exit(&self, pid: u32, _timeout: Duration) -> Result<bool, ControlError> {
        Ok(!self.0.lock().unwrap().processes.iter().any(|p| p.pid == pid))
    }

    fn kill(&self, pid: u32) -> Result<(), ControlError> {
        let mut world = self.0.lock().unwrap();
        world.killed.push(pid);
        world.processes.retain(|p| p.pid != pid);
        Ok(())
    }
}

fn enforcer(fake: &FakeSystem) -> Enforcer {
    Enforcer::new(
        &Enforcement::default(),
        Box::new(fake.clone()),
        Box::new(fake.clone()),
    )
}

fn notepad() -> ProcessRecord {
    ProcessRecord::new(1, "notepad.exe", "/bin/notepad.exe")
}

fn calc() -> ProcessRecord {
    ProcessRecord::new(2, "calc.exe", "/bin/calc.exe")
}

#[test]
fn process_launched_during_session_is_blocked_on_next_scan() {
    let fake = FakeSystem::with(vec![notepad()]);
    let mut enforcer = enforcer(&fake);
    enforcer.configure(["notepad.exe"]).unwrap();
    enforcer.start().unwrap();
    assert!(enforcer.is_whitelisted_pid(1));

    fake.spawn(calc());
    let report = enforcer.scan().unwrap();

    assert_eq!(fake.terminated(), vec![2]);
    assert_eq!(
        report.blocked,
        vec![BlockedProcess {
            pid: 2,
            name: "calc.exe".into(),
            exe: Some(PathBuf::from("/bin/calc.exe")),
        }]
    );
    assert!(enforcer.is_known_pid(2));
    assert!(enforcer.is_whitelisted_pid(1));
}

#[test]
fn processes_present_at_start_are_left_alone() {
    let fake = FakeSystem::with(vec![notepad(), calc()]);
    let mut enforcer = enforcer(&fake);
    enforcer.configure(["notepad.exe"]).unwrap();
    enforcer.start().unwrap();

    assert!(enforcer.is_whitelisted_pid(1));
    assert!(!enforcer.is_whitelisted_pid(2));
    assert!(enforcer.is_known_pid(2));

    for _ in 0..3 {
        assert!(enforcer.scan().unwrap().blocked.is_empty());
    }
    assert!(fake.terminated().is_empty());
}

#[test]
fn session_start_sweep_closes_everything_not_allowed() {
    let fake = FakeSystem::with(vec![
        notepad(),
        calc(),
        ProcessRecord::new(3, "systemd", "/usr/lib/systemd/systemd"),
        ProcessRecord::without_exe(4, ""),
    ]);
    let mut enforcer = enforcer(&fake);
    enforcer.configure(["notepad.exe"]).unwrap();

    let sweep = enforcer.close_all_non_whitelisted().unwrap();

    assert_eq!(sweep.terminated, 1);
    assert_eq!(fake.terminated(), vec![2]);
    assert!(enforcer.is_whitelisted_pid(1));
    assert!(enforcer.is_whitelisted_pid(3));
    assert!(!enforcer.is_running());
}

#[test]
fn systemd_survives_any_number_of_scans() {
    let fake = FakeSystem::default();
    let mut enforcer = enforcer(&fake);
    enforcer.configure(Vec::<String>::new()).unwrap();
    enforcer.start().unwrap();

    fake.spawn(ProcessRecord::new(
        1,
        "systemd",
        "/usr/lib/systemd/systemd",
    ));
    for _ in 0..10 {
        enforcer.scan().unwrap();
    }
    enforcer.close_all_non_whitelisted().unwrap();

    assert!(fake.terminated().is_empty());
    assert!(enforcer.is_whitelisted_pid(1));
}

#[test]
fn exited_pids_are_forgotten() {
    let fake = FakeSystem::with(vec![notepad(), calc()]);
    let mut enforcer = enforcer(&fake);
    enforcer.configure(["notepad.exe"]).unwrap();
    enforcer.start().unwrap();

    fake.exit(1);
    fake.exit(2);
    let report = enforcer.scan().unwrap();

    assert_eq!(report.reaped, 2);
    assert!(!enforcer.is_known_pid(1));
    assert!(!enforcer.is_whitelisted_pid(1));
    assert!(!enforcer.is_known_pid(2));
    assert_eq!(enforcer.status().known, 0);
    assert_eq!(enforcer.status().whitelisted, 0);
}

#[test]
fn reused_pid_is_classified_again() {
    let fake = FakeSystem::with(vec![notepad()]);
    let mut enforcer = enforcer(&fake);
    enforcer.configure(["notepad.exe"]).unwrap();
    enforcer.start().unwrap();

    fake.exit(1);
    enforcer.scan().unwrap();
    fake.spawn(ProcessRecord::new(1, "steam", "/usr/games/steam"));
    let report = enforcer.scan().unwrap();

    assert_eq!(report.blocked.len(), 1);
    assert_eq!(fake.terminated(), vec![1]);
}

#[test]
fn baseline_whitelisted_pids_are_not_reclassified() {
    let fake = FakeSystem::with(vec![notepad()]);
    let mut enforcer = enforcer(&fake);
    enforcer.configure(["notepad.exe"]).unwrap();
    enforcer.start().unwrap();

    // Same PID, different identity: the first classification stands.
    fake.exit(1);
    fake.spawn(ProcessRecord::new(1, "steam", "/usr/games/steam"));
    enforcer.scan().unwrap();

    assert!(fake.terminated().is_empty());
}

#[test]
fn sweep_never_terminates_allowed_processes() {
    let entries = ["code", "/opt/zotero/zotero"];
    let whitelist = Whitelist::new(entries);
    let processes = vec![
        ProcessRecord::new(10, "code", "/usr/share/code/code"),
        ProcessRecord::new(11, "zotero", "/opt/zotero/zotero"),
        ProcessRecord::new(12, "steam", "/usr/games/steam"),
        ProcessRecord::new(13, "discord", "/opt/discord/Discord"),
        ProcessRecord::new(14, "Xwayland", "/usr/bin/Xwayland"),
        ProcessRecord::without_exe(15, "bash"),
    ];
    let allowed: HashSet<u32> = processes
        .iter()
        .filter(|p| whitelist.is_allowed(&p.name, p.exe()))
        .map(|p| p.pid)
        .collect();

    let fake = FakeSystem::with(processes);
    let mut enforcer = enforcer(&fake);
    enforcer.configure(entries).unwrap();
    enforcer.close_all_non_whitelisted().unwrap();

    let terminated: HashSet<u32> = fake.terminated().into_iter().collect();
    assert!(terminated.is_disjoint(&allowed));
    assert_eq!(terminated, HashSet::from([12, 13]));
}

#[test]
fn host_process_chain_survives_sweep_and_scans() {
    let terminal = ProcessRecord::new(
        20,
        "gnome-terminal-server",
        "/usr/libexec/gnome-terminal-server",
    );
    let sudo = ProcessRecord::new(21, "sudo", "/usr/bin/sudo");
    let fake = FakeSystem::with(vec![terminal, sudo, calc()]);
    fake.protect(&[21, 20]);
    let mut enforcer = enforcer(&fake);
    enforcer.configure(Vec::<String>::new()).unwrap();

    let sweep = enforcer.close_all_non_whitelisted().unwrap();
    assert_eq!(sweep.terminated, 1);
    assert_eq!(fake.terminated(), vec![2]);
    assert!(enforcer.is_protected_pid(20));
    assert!(enforcer.is_whitelisted_pid(21));

    enforcer.start().unwrap();
    assert!(enforcer.is_whitelisted_pid(20));
    assert!(enforcer.is_whitelisted_pid(21));

    // A protected PID the baseline missed is still spared.
    fake.protect(&[21, 20, 30]);
    enforcer.stop();
    enforcer.start().unwrap();
    fake.spawn(ProcessRecord::new(30, "tmux: server", "/usr/bin/tmux"));
    fake.spawn(ProcessRecord::new(31, "steam", "/usr/games/steam"));
    let report = enforcer.scan().unwrap();

    assert_eq!(report.blocked.len(), 1);
    assert_eq!(report.blocked[0].pid, 31);
    assert_eq!(fake.terminated(), vec![2, 31]);
}

#[tokio::test]
async fn worker_reports_blocks_and_scan_failures() {
    let fake = FakeSystem::with(vec![notepad()]);
    let mut inner = enforcer(&fake);
    inner.configure(["notepad.exe"]).unwrap();
    let (mut worker, mut events) = EnforcementLoop::new(inner, Duration::from_millis(10));

    worker.start().await.unwrap();
    assert!(worker.is_running());
    fake.spawn(calc());

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        EnforcerEvent::Blocked(process) => assert_eq!(process.pid, 2),
        other => panic!("unexpected event {other:?}"),
    }

    fake.fail_snapshots(true);
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, EnforcerEvent::ScanFailed(_)));

    // Still scanning after the failure.
    fake.fail_snapshots(false);
    fake.spawn(ProcessRecord::new(3, "steam", "/usr/games/steam"));
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        if let EnforcerEvent::Blocked(process) = event {
            assert_eq!(process.pid, 3);
            break;
        }
    }

    worker.stop().await.unwrap();
    assert!(!worker.is_running());
    assert!(!worker.status().await.unwrap().running);
}

#[tokio::test]
async fn worker_refuses_configure_while_running() {
    let fake = FakeSystem::default();
    let (mut worker, _events) = EnforcementLoop::new(enforcer(&fake), Duration::from_secs(3600));

    worker.start().await.unwrap();
    assert!(matches!(
        worker.configure(vec!["vim".into()]).await,
        Err(Error::EnforcementRunning)
    ));
    worker.stop().await.unwrap();
    worker.configure(vec!["vim".into()]).await.unwrap();
}
