//! strata - layered raster document engine
//!
//! Layer groups, smart objects with smart filters, cached compositing,
//! per-composition undo and background reload of linked content.

// Engine services (events, history, workers, reloads)
pub mod core;

pub mod cli;
pub mod config;
pub mod entities;
pub mod paths;

pub use core::event_bus::{BoxedEvent, EventBus, downcast_event};
pub use entities::{CompId, Composition, Frame, HolderId, Layer, LayerId, Project};
