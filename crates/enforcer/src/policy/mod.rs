#![forbid(unsafe_code)]

mod builtin;
mod whitelist;

pub use builtin::{
    CRITICAL_PROCESSES, SYSTEM_WHITELIST, is_critical, is_system_process, is_system_whitelisted,
};
pub use whitelist::{AllowReason, Verdict, Whitelist, is_allowed};
