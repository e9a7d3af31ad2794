//! tidal-core: shared types, wire format, pacing and timeout policy.
//! All other Tidal crates depend on this one.

pub mod config;
pub mod format;
pub mod pacing;
pub mod session;
pub mod supervisor;
pub mod wav;
pub mod wire;

pub use format::{AudioFormat, FormatError};
pub use pacing::Pacing;
pub use session::{Session, SessionState, StreamError, WaitPoint};
pub use supervisor::{StallClock, Supervisor};
