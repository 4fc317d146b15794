#![forbid(unsafe_code)]

mod enforcer;
mod worker;

pub use enforcer::{
    BlockedProcess, Enforcer, EnforcerStatus, RunningApp, ScanReport, SweepReport,
};
pub use worker::{EnforcementLoop, EnforcerEvent};
