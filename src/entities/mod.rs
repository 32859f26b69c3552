//! Document model: layers, groups, smart objects and the compositions that
//! hold them, all owned by a [`Project`] arena.

pub mod attrs;
pub mod cache;
pub mod comp_events;
pub mod composition;
pub mod compositor;
pub mod edit_error;
pub mod effects;
pub mod frame;
pub mod group;
pub mod holder;
pub mod ids;
pub mod layer;
pub mod project;
pub mod project_io;
pub mod smart_object;
pub mod traits;

pub use attrs::{AttrValue, Attrs};
pub use composition::{Composition, MaskViewMode};
pub use compositor::BlendMode;
pub use edit_error::EditError;
pub use effects::{Effect, EffectType};
pub use frame::{Frame, FrameError};
pub use group::LayerGroup;
pub use holder::{LayerAdder, LayerHolder, LayerMoveAction};
pub use ids::{CompId, HolderId, LayerId};
pub use layer::{Layer, LayerKind, Mask};
pub use project::{Project, PurgeStats};
pub use project_io::{CompDesc, JsonCompLoader, LayerDesc, LayerKindDesc, RasterSource};
pub use smart_object::{LinkedContent, SmartObject};
pub use traits::{AcceptDialog, AutoPrompter, CancelDialog, CompLoader, Filter, FilterDialog, Prompter};
