//! Document events.
//!
//! Emitted on the project's [`EventBus`](crate::core::event_bus::EventBus)
//! so views (layer panel, canvas, filter list) can refresh without the model
//! knowing about them. All events carry ids only.

use std::path::PathBuf;

use super::ids::{CompId, HolderId, LayerId};

/// A layer moved within its holder.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerOrderChangedEvent {
    pub comp: CompId,
    pub holder: HolderId,
    pub old_index: usize,
    pub new_index: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LayerAddedEvent {
    pub comp: CompId,
    pub holder: HolderId,
    pub layer: LayerId,
    pub index: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LayerRemovedEvent {
    pub comp: CompId,
    pub holder: HolderId,
    pub layer: LayerId,
    pub index: usize,
}

/// The active layer of a composition changed. `reason` is the user-facing
/// action name when the change came from a selection command.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveLayerChangedEvent {
    pub comp: CompId,
    pub layer: Option<LayerId>,
    pub reason: Option<&'static str>,
}

/// A layer's thumbnail should be redrawn.
#[derive(Clone, Debug, PartialEq)]
pub struct IconInvalidatedEvent(pub LayerId);

/// A composition's rendered image changed.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositionUpdatedEvent(pub CompId);

/// Content of a smart object inside this composition changed.
/// `linked` is true when the change came from an external file, which does
/// not make the composition itself dirty.
#[derive(Clone, Debug, PartialEq)]
pub struct SmartObjectChangedEvent {
    pub comp: CompId,
    pub linked: bool,
}

/// A smart object's filter list or filter visibility changed.
#[derive(Clone, Debug, PartialEq)]
pub struct SmartFilterChangedEvent(pub LayerId);

/// Linked content was reloaded and swapped in.
#[derive(Clone, Debug, PartialEq)]
pub struct ContentReloadedEvent {
    pub layer: LayerId,
    pub content: CompId,
}

/// Loading linked content failed; the old content was kept.
#[derive(Clone, Debug, PartialEq)]
pub struct ReloadFailedEvent {
    pub layer: LayerId,
    pub path: PathBuf,
    pub message: String,
}
