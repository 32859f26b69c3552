//! Engine plumbing independent of the document model: events, undo
//! history, background workers and reload bookkeeping.

pub mod event_bus;
pub mod history;
pub mod reload;
pub mod workers;

pub use event_bus::EventBus;
pub use history::{Edit, History};
pub use reload::{ReloadTicket, ReloadTracker};
pub use workers::Workers;
