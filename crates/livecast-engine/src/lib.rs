pub mod outbox;
pub mod relay;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use outbox::Outbox;
pub use relay::{AppendOutcome, RelayConfig, RelayEngine, ReplayOutcome, StartOutcome, StopOutcome};
pub use session::{Session, SessionState, SessionSummary};
pub use store::SessionStore;
