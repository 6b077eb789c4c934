//! Session handling and connection management

mod manager;
mod session;
mod stats;

pub use manager::ConnectionManager;
pub use session::{handle_session, spawn_session, SessionContext, SessionResult};
pub use stats::{ConnectionStats, StatsSnapshot};
