use std::fmt;

use super::ids::LayerId;

/// Rejected user-facing edit. The document is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    /// The operation's guard (e.g. `can_merge_down`) is false.
    PreconditionNotMet(&'static str),
    /// Deleting would leave a composition without layers.
    LastLayer,
    UnknownLayer(LayerId),
    IndexOutOfRange { index: usize, len: usize },
    NoSmartFilter,
    NotASmartObject(LayerId),
    NotAGroup(LayerId),
}

impl fmt::Display for EditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditError::PreconditionNotMet(what) => write!(f, "cannot {what}"),
            EditError::LastLayer => write!(f, "cannot delete the last layer of a composition"),
            EditError::UnknownLayer(id) => write!(f, "layer {id} is not in the document"),
            EditError::IndexOutOfRange { index, len } => {
                write!(f, "layer index {index} out of range (holder has {len} layers)")
            }
            EditError::NoSmartFilter => write!(f, "no smart filter"),
            EditError::NotASmartObject(id) => write!(f, "layer {id} is not a smart object"),
            EditError::NotAGroup(id) => write!(f, "layer {id} is not a layer group"),
        }
    }
}

impl std::error::Error for EditError {}
