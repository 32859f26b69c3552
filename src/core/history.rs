//! Per-composition undo/redo.
//!
//! Every structural edit records an [`Edit`] holding ids and indices only.
//! Layers referenced by an edit stay in the project arena (see
//! [`Project::purge_unreachable`]), so undo can put them back as they were.

use std::collections::VecDeque;

use log::debug;

use crate::config::MAX_UNDO_HISTORY_LEN;
use crate::entities::composition::MaskViewMode;
use crate::entities::frame::Frame;
use crate::entities::holder::LayerAdder;
use crate::entities::ids::{CompId, HolderId, LayerId};
use crate::entities::project::Project;

#[derive(Debug, Clone)]
pub enum Edit {
    LayerOrderChange {
        label: String,
        holder: HolderId,
        old_index: usize,
        new_index: usize,
    },
    NewLayer {
        label: String,
        holder: HolderId,
        layer: LayerId,
        index: usize,
        active_before: Option<LayerId>,
    },
    DeleteLayer {
        holder: HolderId,
        layer: LayerId,
        index: usize,
    },
    MergeDown {
        holder: HolderId,
        merged: LayerId,
        below: LayerId,
        image_before: Frame,
        mask_view_mode_before: MaskViewMode,
        layer_index: usize,
    },
    /// `grouping == true` records "convert to group", false records "ungroup".
    /// `indices` are the child positions in the holder outside the group,
    /// `group_index` is where the group itself sits.
    Grouping {
        holder: HolderId,
        group: LayerId,
        group_index: usize,
        indices: Vec<usize>,
        grouping: bool,
    },
    ReplaceLayer {
        label: String,
        holder: HolderId,
        before: LayerId,
        after: LayerId,
    },
}

impl Edit {
    pub fn name(&self) -> &str {
        match self {
            Edit::LayerOrderChange { label, .. } => label,
            Edit::NewLayer { label, .. } => label,
            Edit::DeleteLayer { .. } => "Delete Layer",
            Edit::MergeDown { .. } => "Merge Down",
            Edit::Grouping { grouping: true, .. } => "Convert to Group",
            Edit::Grouping { grouping: false, .. } => "Ungroup",
            Edit::ReplaceLayer { label, .. } => label,
        }
    }

    /// Layers this edit may bring back.
    pub fn kept_layers(&self) -> Vec<LayerId> {
        match self {
            Edit::LayerOrderChange { .. } => Vec::new(),
            Edit::NewLayer { layer, .. } | Edit::DeleteLayer { layer, .. } => vec![*layer],
            Edit::MergeDown { merged, below, .. } => vec![*merged, *below],
            Edit::Grouping { group, .. } => vec![*group],
            Edit::ReplaceLayer { before, after, .. } => vec![*before, *after],
        }
    }
}

#[derive(Debug)]
pub struct History {
    undo: VecDeque<Edit>,
    redo: Vec<Edit>,
    max_len: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(MAX_UNDO_HISTORY_LEN)
    }
}

impl History {
    pub fn new(max_len: usize) -> Self {
        Self { undo: VecDeque::new(), redo: Vec::new(), max_len: max_len.max(1) }
    }

    /// Record a new edit. Clears redo, drops the oldest edit when full.
    pub fn add(&mut self, edit: Edit) {
        debug!("History: {}", edit.name());
        self.redo.clear();
        self.undo.push_back(edit);
        if self.undo.len() > self.max_len {
            self.undo.pop_front();
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_name(&self) -> Option<&str> {
        self.undo.back().map(Edit::name)
    }

    pub fn redo_name(&self) -> Option<&str> {
        self.redo.last().map(Edit::name)
    }

    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// All recorded edits, undo stack first.
    pub fn edits(&self) -> impl Iterator<Item = &Edit> {
        self.undo.iter().chain(self.redo.iter())
    }

    fn pop_undo(&mut self) -> Option<Edit> {
        self.undo.pop_back()
    }

    fn pop_redo(&mut self) -> Option<Edit> {
        self.redo.pop()
    }
}

impl Project {
    pub(crate) fn add_history(&mut self, comp: CompId, edit: Edit) {
        self.comp_mut(comp).history.add(edit);
    }

    /// Undo the last edit of `comp`. Returns false when there is nothing to undo.
    pub fn undo(&mut self, comp: CompId) -> bool {
        let Some(edit) = self.comp_mut(comp).history.pop_undo() else {
            return false;
        };
        debug!("Undo: {}", edit.name());
        self.undo_edit(&edit);
        self.comp_mut(comp).history.redo.push(edit);
        true
    }

    pub fn redo(&mut self, comp: CompId) -> bool {
        let Some(edit) = self.comp_mut(comp).history.pop_redo() else {
            return false;
        };
        debug!("Redo: {}", edit.name());
        self.redo_edit(&edit);
        self.comp_mut(comp).history.undo.push_back(edit);
        true
    }

    fn undo_edit(&mut self, edit: &Edit) {
        match edit {
            Edit::LayerOrderChange { holder, old_index, new_index, .. } => {
                self.change_layer_order(*holder, *new_index, *old_index, None);
            }
            Edit::NewLayer { holder, layer, active_before, .. } => {
                self.remove_added_layer(*holder, *layer, *active_before);
            }
            Edit::DeleteLayer { holder, layer, index } => {
                self.restore_layer(*holder, *layer, *index);
            }
            Edit::MergeDown { holder, merged, below, image_before, mask_view_mode_before, layer_index } => {
                self.set_layer_image(*below, image_before.clone());
                let comp = self.comp_of_holder(*holder);
                self.comp_mut(comp).mask_view_mode = *mask_view_mode_before;
                self.restore_layer(*holder, *merged, *layer_index);
            }
            Edit::Grouping { group, indices, grouping: true, .. } => {
                self.replace_with_ungrouped(*group, Some(indices.as_slice()), false);
            }
            Edit::Grouping { holder, group, group_index, indices, grouping: false } => {
                self.convert_to_group_unchecked(*holder, indices, Some((*group, *group_index)), false);
            }
            Edit::ReplaceLayer { before, after, .. } => {
                self.replace_layer(*after, *before);
            }
        }
    }

    fn redo_edit(&mut self, edit: &Edit) {
        match edit {
            Edit::LayerOrderChange { holder, old_index, new_index, .. } => {
                self.change_layer_order(*holder, *old_index, *new_index, None);
            }
            Edit::NewLayer { holder, layer, index, .. } => {
                LayerAdder::new(*holder).at_index(*index).add(self, *layer);
            }
            Edit::DeleteLayer { layer, .. } => {
                self.delete_layer_unchecked(*layer);
            }
            Edit::MergeDown { merged, .. } => {
                self.merge_down_unchecked(*merged, false);
            }
            Edit::Grouping { holder, group, group_index, indices, grouping: true } => {
                self.convert_to_group_unchecked(*holder, indices, Some((*group, *group_index)), false);
            }
            Edit::Grouping { group, indices, grouping: false, .. } => {
                self.replace_with_ungrouped(*group, Some(indices.as_slice()), false);
            }
            Edit::ReplaceLayer { before, after, .. } => {
                self.replace_layer(*before, *after);
            }
        }
    }
}
