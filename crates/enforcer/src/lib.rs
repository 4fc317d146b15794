#![forbid(unsafe_code)]

pub mod clock;
pub mod enforcement;
pub mod error;
pub mod persistence;
pub mod policy;
pub mod process;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use enforcement::{
    BlockedProcess, EnforcementLoop, Enforcer, EnforcerEvent, EnforcerStatus, RunningApp,
    ScanReport, SweepReport,
};
pub use error::Error;
pub use persistence::{
    BlockedAppRecord, MemoryStore, NewSession, SessionRecord, SessionStatus, SessionStore,
    SessionUpdate, SqliteStore,
};
pub use policy::{AllowReason, Verdict, Whitelist, is_allowed, is_system_process};
pub use process::{
    ControlError, DryRunControl, ProcessControl, ProcessRecord, ProcessSource, ProcfsSource,
    SignalControl,
};
pub use session::{
    ControlEvent, Services, SessionEvent, SessionHandle, SessionInfo, SessionManager,
    SessionRequest, SessionState, Stopwatch,
};
