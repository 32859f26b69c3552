//! Stable identifiers for arena entries.
//!
//! Layers and compositions never hold references to each other. Every
//! back-reference (`layer.holder`, `layer.comp`, `content.owners`) is one of
//! these `Copy` handles resolved through [`Project`](super::project::Project).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a layer in the project arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.simple().to_string();
        write!(f, "L{}", &s[..8])
    }
}

/// Identifier of a composition in the project arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompId(Uuid);

impl CompId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CompId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CompId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.simple().to_string();
        write!(f, "C{}", &s[..8])
    }
}

/// Anything that owns an ordered list of layers: a composition root or a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HolderId {
    Comp(CompId),
    Group(LayerId),
}

impl HolderId {
    pub fn is_comp(&self) -> bool {
        matches!(self, HolderId::Comp(_))
    }

    /// Group layer id, if this holder is a group.
    pub fn group(&self) -> Option<LayerId> {
        match self {
            HolderId::Group(id) => Some(*id),
            HolderId::Comp(_) => None,
        }
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HolderId::Comp(c) => write!(f, "comp {c}"),
            HolderId::Group(g) => write!(f, "group {g}"),
        }
    }
}
