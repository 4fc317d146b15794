#![forbid(unsafe_code)]

mod events;
mod manager;
mod state;

pub use events::SessionEvent;
pub use manager::{
    ControlEvent, Services, SessionHandle, SessionInfo, SessionManager, SessionRequest,
};
pub use state::{SessionState, Stopwatch};
