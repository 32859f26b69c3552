//! Layer holders and the structural edits they support.
//!
//! Compositions and groups both own an ordered list of layer ids (index 0 is
//! the bottom). [`LayerHolder`] is the shared list contract; the operations
//! that also touch other arena entries (reordering, selection, merging,
//! grouping, deletion, replacement, cache invalidation) are implemented on
//! [`Project`] and take the [`HolderId`] they act on.

use std::collections::HashSet;

use log::{debug, trace, warn};

use crate::core::history::Edit;

use super::comp_events::{
    ActiveLayerChangedEvent, CompositionUpdatedEvent, IconInvalidatedEvent, LayerAddedEvent,
    LayerOrderChangedEvent, LayerRemovedEvent, SmartObjectChangedEvent,
};
use super::edit_error::EditError;
use super::frame::Frame;
use super::ids::{CompId, HolderId, LayerId};
use super::layer::LayerKind;
use super::project::Project;

pub trait LayerHolder {
    fn layers(&self) -> &[LayerId];
    fn layers_mut(&mut self) -> &mut Vec<LayerId>;

    /// Groups may be empty, compositions may not.
    fn allow_zero_layers(&self) -> bool;

    fn num_layers(&self) -> usize {
        self.layers().len()
    }

    fn index_of(&self, layer: LayerId) -> Option<usize> {
        self.layers().iter().position(|&l| l == layer)
    }

    fn layer_at(&self, index: usize) -> Option<LayerId> {
        self.layers().get(index).copied()
    }

    fn contains_layer(&self, layer: LayerId) -> bool {
        self.layers().contains(&layer)
    }

    /// Whether one layer may be removed without breaking the minimum count.
    fn can_delete(&self) -> bool {
        let n = self.num_layers();
        if self.allow_zero_layers() { n >= 1 } else { n >= 2 }
    }
}

/// Named layer-order and selection commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerMoveAction {
    RaiseLayer,
    LowerLayer,
    LayerToTop,
    LayerToBottom,
    RaiseSelection,
    LowerSelection,
}

impl LayerMoveAction {
    pub fn name(&self) -> &'static str {
        match self {
            LayerMoveAction::RaiseLayer => "Raise Layer",
            LayerMoveAction::LowerLayer => "Lower Layer",
            LayerMoveAction::LayerToTop => "Layer to Top",
            LayerMoveAction::LayerToBottom => "Layer to Bottom",
            LayerMoveAction::RaiseSelection => "Raise Layer Selection",
            LayerMoveAction::LowerSelection => "Lower Layer Selection",
        }
    }
}

/// Inserts a layer into a holder and makes it active.
///
/// Defaults to the position just above the active layer (or the top when
/// the active layer lives elsewhere) and records no history.
#[derive(Debug, Clone)]
pub struct LayerAdder {
    holder: HolderId,
    index: Option<usize>,
    history: Option<String>,
    init_mode: bool,
}

impl LayerAdder {
    pub fn new(holder: HolderId) -> Self {
        Self { holder, index: None, history: None, init_mode: false }
    }

    pub fn at_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_history(mut self, label: impl Into<String>) -> Self {
        self.history = Some(label.into());
        self
    }

    /// While a composition is being built: no rendering update.
    pub fn init_mode(mut self) -> Self {
        self.init_mode = true;
        self
    }

    pub fn add(self, project: &mut Project, layer: LayerId) -> usize {
        let holder = self.holder;
        let comp = project.comp_of_holder(holder);
        let active_before = project.comp_ref(comp).active;
        let h = project.holder(holder);
        let index = self
            .index
            .or_else(|| active_before.and_then(|a| h.index_of(a)).map(|i| i + 1))
            .unwrap_or(h.num_layers())
            .min(h.num_layers());

        project.insert_layer(holder, layer, index, !self.init_mode);
        project.set_active_internal(comp, Some(layer), None);
        if let Some(label) = self.history {
            project.add_history(comp, Edit::NewLayer { label, holder, layer, index, active_before });
        }
        debug!("Added layer {} to {} at {}", layer, holder, index);
        index
    }
}

impl Project {
    pub(crate) fn holder(&self, holder: HolderId) -> &dyn LayerHolder {
        match holder {
            HolderId::Comp(c) => self.comp_ref(c),
            HolderId::Group(g) => self.group_ref(g),
        }
    }

    pub(crate) fn holder_mut(&mut self, holder: HolderId) -> &mut dyn LayerHolder {
        match holder {
            HolderId::Comp(c) => self.comp_mut(c),
            HolderId::Group(g) => self
                .layer_mut(g)
                .as_group_mut()
                .unwrap_or_else(|| panic!("holder {g} is not a group")),
        }
    }

    /// Layer ids of a holder, bottom first.
    pub fn holder_layers(&self, holder: HolderId) -> &[LayerId] {
        self.holder(holder).layers()
    }

    pub fn comp_of_holder(&self, holder: HolderId) -> CompId {
        match holder {
            HolderId::Comp(c) => c,
            HolderId::Group(g) => self.layer_ref(g).comp,
        }
    }

    /// Holder that contains the composition's active layer.
    pub fn active_holder(&self, comp: CompId) -> HolderId {
        self.comp_ref(comp)
            .active
            .map(|a| self.layer_ref(a).holder)
            .unwrap_or(HolderId::Comp(comp))
    }

    pub fn is_holder_of_active_layer(&self, holder: HolderId) -> bool {
        let comp = self.comp_of_holder(holder);
        self.comp_ref(comp).active.is_some_and(|a| self.holder(holder).contains_layer(a))
    }

    fn active_index_in(&self, holder: HolderId) -> Option<(CompId, usize)> {
        let comp = self.comp_of_holder(holder);
        let active = self.comp_ref(comp).active?;
        let index = self.holder(holder).index_of(active);
        if index.is_none() {
            debug!("Active layer {active} is not in {holder}");
        }
        Some((comp, index?))
    }

    /// `ancestor` is `target` or a group that (transitively) contains it.
    pub fn contains_layer_deep(&self, ancestor: LayerId, target: LayerId) -> bool {
        if ancestor == target {
            return true;
        }
        let mut holder = match self.layers.get(&target) {
            Some(l) => l.holder,
            None => return false,
        };
        while let HolderId::Group(g) = holder {
            if g == ancestor {
                return true;
            }
            holder = self.layer_ref(g).holder;
        }
        false
    }

    /// Whether `layer` is currently reachable from its composition's root list.
    pub fn is_attached(&self, layer: LayerId) -> bool {
        let mut current = layer;
        loop {
            let Some(l) = self.layers.get(&current) else {
                return false;
            };
            if !self.holder(l.holder).contains_layer(current) {
                return false;
            }
            match l.holder {
                HolderId::Comp(_) => return true,
                HolderId::Group(g) => current = g,
            }
        }
    }

    pub(crate) fn set_active_internal(&mut self, comp: CompId, layer: Option<LayerId>, reason: Option<&'static str>) {
        let c = self.comp_mut(comp);
        if c.active == layer {
            return;
        }
        c.active = layer;
        trace!("Active layer of {} is now {:?}", comp, layer);
        self.events.emit(ActiveLayerChangedEvent { comp, layer, reason });
    }

    /// Select a layer of `comp`. Groups can be selected too.
    pub fn set_active_layer(&mut self, comp: CompId, layer: LayerId) -> Result<(), EditError> {
        if self.layers.get(&layer).is_none_or(|l| l.comp != comp) || !self.is_attached(layer) {
            return Err(EditError::UnknownLayer(layer));
        }
        self.set_active_internal(comp, Some(layer), None);
        Ok(())
    }

    /// Fix the holder and composition back-references of a layer subtree.
    pub(crate) fn set_layer_home(&mut self, layer: LayerId, holder: HolderId, comp: CompId) {
        self.layer_mut(layer).holder = holder;
        self.set_layer_comp(layer, comp);
    }

    fn set_layer_comp(&mut self, layer: LayerId, comp: CompId) {
        let l = self.layer_mut(layer);
        if l.comp == comp {
            return;
        }
        l.comp = comp;
        let children = l.as_group().map(|g| g.layers.clone()).unwrap_or_default();
        for child in children {
            self.set_layer_comp(child, comp);
        }
    }

    /// Insert a detached layer at `index` (clamped to the list length).
    pub fn insert_layer(&mut self, holder: HolderId, layer: LayerId, index: usize, update: bool) {
        let comp = self.comp_of_holder(holder);
        self.set_layer_home(layer, holder, comp);
        let list = self.holder_mut(holder).layers_mut();
        let index = index.min(list.len());
        list.insert(index, layer);
        self.events.emit(LayerAddedEvent { comp, holder, layer, index });
        if update {
            self.update(holder);
        }
    }

    /// Move the layer at `old_index` to `new_index`. Out-of-range or equal
    /// indices are ignored. `history` names the undoable edit to record.
    pub fn change_layer_order(&mut self, holder: HolderId, old_index: usize, new_index: usize, history: Option<&str>) {
        let n = self.holder(holder).num_layers();
        if new_index >= n || old_index >= n || old_index == new_index {
            return;
        }
        let list = self.holder_mut(holder).layers_mut();
        let layer = list.remove(old_index);
        list.insert(new_index, layer);

        let comp = self.comp_of_holder(holder);
        debug!("Moved {} in {} from {} to {}", layer, holder, old_index, new_index);
        self.events.emit(LayerOrderChangedEvent { comp, holder, old_index, new_index });
        self.update(holder);

        if let Some(label) = history {
            let edit = Edit::LayerOrderChange { label: label.to_string(), holder, old_index, new_index };
            self.add_history(comp, edit);
        }
    }

    /// Raise or lower the active layer by one; the holder must contain it.
    pub fn move_active_layer(&mut self, holder: HolderId, up: bool) {
        debug_assert!(self.is_holder_of_active_layer(holder));
        let Some((_, index)) = self.active_index_in(holder) else {
            return;
        };
        let (new_index, action) = if up {
            (index + 1, LayerMoveAction::RaiseLayer)
        } else {
            let Some(below) = index.checked_sub(1) else {
                return;
            };
            (below, LayerMoveAction::LowerLayer)
        };
        self.change_layer_order(holder, index, new_index, Some(action.name()));
    }

    pub fn move_active_layer_to_top(&mut self, holder: HolderId) {
        debug_assert!(self.is_holder_of_active_layer(holder));
        let Some((_, index)) = self.active_index_in(holder) else {
            return;
        };
        let top = self.holder(holder).num_layers() - 1;
        self.change_layer_order(holder, index, top, Some(LayerMoveAction::LayerToTop.name()));
    }

    pub fn move_active_layer_to_bottom(&mut self, holder: HolderId) {
        debug_assert!(self.is_holder_of_active_layer(holder));
        let Some((_, index)) = self.active_index_in(holder) else {
            return;
        };
        self.change_layer_order(holder, index, 0, Some(LayerMoveAction::LayerToBottom.name()));
    }

    /// Select the layer above the active one. At the top of a group the
    /// group itself gets selected; at the top of a composition nothing happens.
    pub fn raise_layer_selection(&mut self, holder: HolderId) {
        let Some((comp, index)) = self.active_index_in(holder) else {
            return;
        };
        let target = match self.holder(holder).layer_at(index + 1) {
            Some(above) => above,
            None => match holder {
                HolderId::Comp(_) => return,
                HolderId::Group(g) => g,
            },
        };
        self.set_active_internal(comp, Some(target), Some(LayerMoveAction::RaiseSelection.name()));
    }

    pub fn lower_layer_selection(&mut self, holder: HolderId) {
        let Some((comp, index)) = self.active_index_in(holder) else {
            return;
        };
        let Some(below) = index.checked_sub(1).and_then(|i| self.holder(holder).layer_at(i)) else {
            return;
        };
        self.set_active_internal(comp, Some(below), Some(LayerMoveAction::LowerSelection.name()));
    }

    /// True when `layer` is visible, not at the bottom, and sits directly on
    /// a visible plain image layer. Smart objects below do not qualify.
    pub fn can_merge_down(&self, layer: LayerId) -> bool {
        let Some(l) = self.layers.get(&layer) else {
            return false;
        };
        let h = self.holder(l.holder);
        match h.index_of(layer) {
            Some(index) if index > 0 && l.visible => {
                let below = self.layer_ref(h.layers()[index - 1]);
                below.is_image() && below.visible
            }
            _ => false,
        }
    }

    /// Flatten `layer` into the image layer below it, as one undoable edit.
    pub fn merge_down(&mut self, layer: LayerId) -> Result<(), EditError> {
        if !self.can_merge_down(layer) {
            return Err(EditError::PreconditionNotMet("merge down"));
        }
        self.merge_down_unchecked(layer, true);
        Ok(())
    }

    pub(crate) fn merge_down_unchecked(&mut self, layer: LayerId, add_history: bool) {
        debug_assert!(self.can_merge_down(layer));
        let holder = self.layer_ref(layer).holder;
        let Some(layer_index) = self.holder(holder).index_of(layer).filter(|&i| i > 0) else {
            warn!("Cannot merge {layer} down: not above another layer");
            return;
        };
        let below = self.holder(holder).layers()[layer_index - 1];
        let comp = self.comp_of_holder(holder);
        let mask_view_mode_before = self.comp_ref(comp).mask_view_mode;

        let below_layer = self.layer_ref(below);
        let origin = (below_layer.tx, below_layer.ty);
        let Some(image_before) = below_layer.as_image().map(|img| img.image.clone()) else {
            warn!("Cannot merge {layer} down: {below} is not an image layer");
            return;
        };

        let mut merged = image_before.clone();
        self.apply_layer(layer, &mut merged, origin);
        self.set_layer_image(below, merged);

        let was_active = self.comp_ref(comp).active.is_some_and(|a| self.contains_layer_deep(layer, a));
        self.delete_layer_unchecked(layer);
        if was_active {
            self.set_active_internal(comp, Some(below), None);
        }

        if add_history {
            self.add_history(
                comp,
                Edit::MergeDown { holder, merged: layer, below, image_before, mask_view_mode_before, layer_index },
            );
        }
        debug!("Merged {} down into {}", layer, below);
    }

    /// Replace the pixels of an image layer.
    pub fn set_layer_image(&mut self, layer: LayerId, image: Frame) {
        let l = self.layer_mut(layer);
        match &mut l.kind {
            LayerKind::Image(img) => img.image = image,
            other => {
                warn!("Layer {} is a {}, not an image layer", l.name, other.type_name());
                return;
            }
        }
        let holder = l.holder;
        self.events.emit(IconInvalidatedEvent(layer));
        self.update(holder);
    }

    /// Group all visible layers of `holder`. `None` when nothing is visible.
    pub fn convert_visible_layers_to_group(&mut self, holder: HolderId) -> Option<LayerId> {
        let indices: Vec<usize> = self
            .holder(holder)
            .layers()
            .iter()
            .enumerate()
            .filter(|(_, id)| self.layer_ref(**id).visible)
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return None;
        }
        Some(self.convert_to_group_unchecked(holder, &indices, None, true))
    }

    /// Move the layers at `indices` (strictly ascending) into a new group
    /// placed where the topmost of them was. Recorded in history.
    pub fn convert_to_group(&mut self, holder: HolderId, indices: &[usize]) -> Result<LayerId, EditError> {
        let len = self.holder(holder).num_layers();
        let Some(&last) = indices.last() else {
            return Err(EditError::PreconditionNotMet("group an empty selection"));
        };
        if last >= len {
            return Err(EditError::IndexOutOfRange { index: last, len });
        }
        if indices.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EditError::PreconditionNotMet("group unordered layer indices"));
        }
        Ok(self.convert_to_group_unchecked(holder, indices, None, true))
    }

    /// Grouping core. `target` reuses an existing (detached) group and puts
    /// it back at the given index, which is how undoing an ungroup restores
    /// the very same group.
    pub(crate) fn convert_to_group_unchecked(
        &mut self,
        holder: HolderId,
        indices: &[usize],
        target: Option<(LayerId, usize)>,
        add_history: bool,
    ) -> LayerId {
        let comp = self.comp_of_holder(holder);
        let moved: Vec<LayerId> = indices.iter().map(|&i| self.holder(holder).layers()[i]).collect();
        for &layer in &moved {
            self.delete_temporarily(layer);
        }

        let group = match target {
            Some((group, _)) => {
                debug_assert!(!add_history);
                let g = self
                    .layer_mut(group)
                    .as_group_mut()
                    .unwrap_or_else(|| panic!("layer {group} is not a group"));
                g.layers = moved.clone();
                g.clear_caches();
                for &child in &moved {
                    self.set_layer_home(child, HolderId::Group(group), comp);
                }
                group
            }
            None => self.create_group(comp, "Layer Group", moved.clone()),
        };

        let new_index = match (target, indices.last()) {
            (Some((_, at)), _) => at,
            (None, Some(&last)) => last + 1 - indices.len(),
            (None, None) => self.holder(holder).num_layers(),
        };
        LayerAdder::new(holder).at_index(new_index).add(self, group);

        if add_history {
            self.add_history(
                comp,
                Edit::Grouping { holder, group, group_index: new_index, indices: indices.to_vec(), grouping: true },
            );
        }
        debug!("Grouped {} layers of {} into {}", moved.len(), holder, group);
        group
    }

    /// New empty group above the active layer, with history.
    pub fn add_empty_group(&mut self, holder: HolderId) -> LayerId {
        let comp = self.comp_of_holder(holder);
        let group = self.create_group(comp, "Layer Group", Vec::new());
        LayerAdder::new(holder).with_history("New Layer Group").add(self, group);
        group
    }

    /// User-facing deletion.
    ///
    /// Fails with [`EditError::LastLayer`] when the holder cannot lose a
    /// layer. If the active layer goes away, the layer now at the deleted
    /// index becomes active, else the bottom one, else (empty group) the
    /// group itself.
    pub fn delete_layer(&mut self, layer: LayerId, add_to_history: bool) -> Result<(), EditError> {
        let holder = self.layers.get(&layer).ok_or(EditError::UnknownLayer(layer))?.holder;
        let h = self.holder(holder);
        let index = h.index_of(layer).ok_or(EditError::UnknownLayer(layer))?;
        if !h.can_delete() {
            return Err(EditError::LastLayer);
        }
        if add_to_history {
            let comp = self.comp_of_holder(holder);
            self.add_history(comp, Edit::DeleteLayer { holder, layer, index });
        }
        self.delete_layer_unchecked(layer);
        Ok(())
    }

    pub(crate) fn delete_layer_unchecked(&mut self, layer: LayerId) {
        let holder = self.layer_ref(layer).holder;
        let comp = self.comp_of_holder(holder);
        let was_active = self.comp_ref(comp).active.is_some_and(|a| self.contains_layer_deep(layer, a));
        let Some(index) = self.delete_temporarily(layer) else {
            warn!("Layer {layer} is not in {holder}, nothing to delete");
            return;
        };
        if was_active {
            let next = self.fallback_active(holder, index);
            self.set_active_internal(comp, next, None);
        }
        self.update(holder);
    }

    fn fallback_active(&self, holder: HolderId, index: usize) -> Option<LayerId> {
        let h = self.holder(holder);
        h.layer_at(index).or_else(|| h.layer_at(0)).or(holder.group())
    }

    /// Remove a layer from its holder's list without any checks, selection
    /// change or rendering update. The caller re-homes it right away.
    pub fn delete_temporarily(&mut self, layer: LayerId) -> Option<usize> {
        let holder = self.layer_ref(layer).holder;
        let index = self.holder(holder).index_of(layer)?;
        self.holder_mut(holder).layers_mut().remove(index);
        let comp = self.comp_of_holder(holder);
        self.events.emit(LayerRemovedEvent { comp, holder, layer, index });
        Some(index)
    }

    /// Put back a layer removed by an edit, and select it.
    pub(crate) fn restore_layer(&mut self, holder: HolderId, layer: LayerId, index: usize) {
        self.insert_layer(holder, layer, index, true);
        let comp = self.comp_of_holder(holder);
        self.set_active_internal(comp, Some(layer), None);
    }

    /// Reverse of [`LayerAdder::add`].
    pub(crate) fn remove_added_layer(&mut self, holder: HolderId, layer: LayerId, active_before: Option<LayerId>) {
        let comp = self.comp_of_holder(holder);
        let was_active = self.comp_ref(comp).active.is_some_and(|a| self.contains_layer_deep(layer, a));
        let Some(index) = self.delete_temporarily(layer) else {
            return;
        };
        if was_active {
            let next = active_before
                .filter(|&a| self.is_attached(a))
                .or_else(|| self.fallback_active(holder, index));
            self.set_active_internal(comp, next, None);
        }
        self.update(holder);
    }

    /// Swap `before` for `after` at the same position. The mask moves over,
    /// and `after` becomes active if `before` contained the active layer.
    pub fn replace_layer(&mut self, before: LayerId, after: LayerId) {
        let holder = self.layer_ref(before).holder;
        let comp = self.comp_of_holder(holder);
        let Some(index) = self.holder(holder).index_of(before) else {
            warn!("Cannot replace {before}: not in {holder}");
            return;
        };
        let was_active = self.comp_ref(comp).active.is_some_and(|a| self.contains_layer_deep(before, a));

        if let Some(mask) = self.layer_mut(before).mask.take() {
            self.layer_mut(after).mask = Some(mask);
        }
        self.holder_mut(holder).layers_mut()[index] = after;
        self.set_layer_home(after, holder, comp);
        self.events.emit(LayerRemovedEvent { comp, holder, layer: before, index });
        self.events.emit(LayerAddedEvent { comp, holder, layer: after, index });

        if was_active {
            self.set_active_internal(comp, Some(after), None);
        }
        self.update(holder);
        if cfg!(debug_assertions) {
            self.check_invariants(comp);
        }
    }

    /// Dissolve a group into its holder, with history.
    pub fn un_group(&mut self, group: LayerId) -> Result<(), EditError> {
        let l = self.layers.get(&group).ok_or(EditError::UnknownLayer(group))?;
        let g = l.as_group().ok_or(EditError::NotAGroup(group))?;
        if g.layers.is_empty() && !self.holder(l.holder).can_delete() {
            return Err(EditError::LastLayer);
        }
        self.replace_with_ungrouped(group, None, true);
        Ok(())
    }

    /// Ungroup core. With `prev_indices`, children go back to those
    /// positions (undo of a grouping); otherwise they take the group's place.
    pub(crate) fn replace_with_ungrouped(&mut self, group: LayerId, prev_indices: Option<&[usize]>, add_history: bool) {
        let holder = self.layer_ref(group).holder;
        let comp = self.comp_of_holder(holder);
        let active_before = self.comp_ref(comp).active;

        let Some(group_index) = self.delete_temporarily(group) else {
            warn!("Cannot ungroup {group}: not in {holder}");
            return;
        };
        let children = match self.layer_mut(group).as_group_mut() {
            Some(g) => {
                g.clear_caches();
                std::mem::take(&mut g.layers)
            }
            None => panic!("layer {group} is not a group"),
        };

        let mut index_in_parent = group_index;
        let mut insert_indices = Vec::with_capacity(children.len());
        for (i, &child) in children.iter().enumerate() {
            let at = prev_indices.and_then(|p| p.get(i).copied()).unwrap_or(index_in_parent);
            LayerAdder::new(holder).at_index(at).add(self, child);
            insert_indices.push(at);
            index_in_parent += 1;
        }

        if active_before == Some(group) {
            let next = self.fallback_active(holder, group_index);
            self.set_active_internal(comp, next, None);
        } else if active_before.is_some_and(|a| self.is_attached(a)) {
            self.set_active_internal(comp, active_before, None);
        }
        debug_assert_ne!(self.comp_ref(comp).active, Some(group));
        self.update(holder);

        if add_history {
            self.add_history(
                comp,
                Edit::Grouping { holder, group, group_index, indices: insert_indices, grouping: false },
            );
        }
        debug!("Ungrouped {} ({} children)", group, children.len());
    }

    /// Something inside `holder` changed: drop caches up to the composition,
    /// mark it dirty and notify views. Smart objects showing this
    /// composition are told to refresh.
    pub fn update(&mut self, holder: HolderId) {
        self.invalidate_image_cache(holder);
        let comp = self.comp_of_holder(holder);
        let c = self.comp_mut(comp);
        c.dirty = true;
        let owners = c.owners.clone();
        self.events.emit(CompositionUpdatedEvent(comp));
        for owner in owners {
            self.propagate_changes(owner, comp, false);
        }
    }

    /// Drop cached images of `holder` and every enclosing holder.
    pub fn invalidate_image_cache(&self, holder: HolderId) {
        let mut current = holder;
        loop {
            match current {
                HolderId::Group(g) => {
                    let layer = self.layer_ref(g);
                    if let Some(group) = layer.as_group() {
                        group.clear_caches();
                    }
                    current = layer.holder;
                }
                HolderId::Comp(c) => {
                    self.comp_ref(c).composite.invalidate();
                    trace!("Invalidated caches up to {}", c);
                    return;
                }
            }
        }
    }

    /// A smart object inside `holder` changed its image. Clears caches up
    /// the chain, and when the composition is itself smart-object content,
    /// continues into the documents that embed it.
    pub(crate) fn smart_object_changed(&mut self, holder: HolderId, linked: bool) {
        let mut visited = HashSet::new();
        self.smart_object_changed_inner(holder, linked, &mut visited);
    }

    fn smart_object_changed_inner(&mut self, holder: HolderId, linked: bool, visited: &mut HashSet<CompId>) {
        self.invalidate_image_cache(holder);
        let comp = self.comp_of_holder(holder);
        if !visited.insert(comp) {
            return;
        }
        let c = self.comp_mut(comp);
        if !linked {
            c.dirty = true;
        }
        let owners = c.owners.clone();
        self.events.emit(SmartObjectChangedEvent { comp, linked });

        for owner in owners {
            let Some(l) = self.layers.get(&owner) else {
                continue;
            };
            let Some(so) = l.as_smart_object() else {
                continue;
            };
            so.needs_refresh.set(true);
            let owner_linked = so.linked.is_some();
            let owner_holder = l.holder;
            self.events.emit(IconInvalidatedEvent(owner));
            self.smart_object_changed_inner(owner_holder, linked || owner_linked, visited);
        }
    }

    /// Panic if back-references of `comp`'s layer tree are inconsistent:
    /// wrong holder or composition, an active layer outside the tree, or a
    /// smart object whose content does not list it as owner.
    pub fn check_invariants(&self, comp: CompId) {
        let mut visited = HashSet::new();
        self.check_comp(comp, &mut visited);
    }

    fn check_comp(&self, comp: CompId, visited: &mut HashSet<CompId>) {
        if !visited.insert(comp) {
            return;
        }
        let c = self.comp_ref(comp);
        for &id in &c.layers {
            self.check_layer(id, HolderId::Comp(comp), comp, visited);
        }
        if let Some(active) = c.active {
            let ok = self.layers.get(&active).is_some_and(|l| l.comp == comp) && self.is_attached(active);
            assert!(ok, "active layer {active} of {} is not in its layer tree", c.name);
        }
    }

    fn check_layer(&self, id: LayerId, holder: HolderId, comp: CompId, visited: &mut HashSet<CompId>) {
        let l = self.layer_ref(id);
        assert!(l.holder == holder, "layer {} has holder {} but is listed in {}", l.name, l.holder, holder);
        assert!(l.comp == comp, "layer {} belongs to {} but sits in {}", l.name, l.comp, comp);
        match &l.kind {
            LayerKind::Group(g) => {
                for &child in &g.layers {
                    self.check_layer(child, HolderId::Group(id), comp, visited);
                }
            }
            LayerKind::SmartObject(so) => {
                self.check_content_invariant(id);
                self.check_comp(so.content, visited);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::comp_events::LayerOrderChangedEvent;
    use crate::entities::effects::{Effect, EffectType};

    fn doc(n: usize) -> (Project, CompId, Vec<LayerId>) {
        let mut p = Project::new();
        let comp = p.new_composition("doc", 4, 4);
        let ids = (0..n)
            .map(|i| p.add_image_layer(HolderId::Comp(comp), &format!("l{i}"), Frame::filled(4, 4, [i as u8 * 10, 0, 0, 255])))
            .collect();
        (p, comp, ids)
    }

    #[test]
    fn test_change_layer_order_and_undo() {
        let (mut p, comp, ids) = doc(3);
        let root = HolderId::Comp(comp);
        p.events().poll();

        p.change_layer_order(root, 0, 2, Some("Layer to Top"));
        assert_eq!(p.holder_layers(root), &[ids[1], ids[2], ids[0]]);
        let moved = p.events().take::<LayerOrderChangedEvent>();
        assert_eq!(moved.len(), 1);
        assert_eq!((moved[0].old_index, moved[0].new_index), (0, 2));

        assert!(p.undo(comp));
        assert_eq!(p.holder_layers(root), &ids[..]);
        assert!(p.redo(comp));
        assert_eq!(p.holder_layers(root), &[ids[1], ids[2], ids[0]]);

        // Out of range and no-op moves are ignored.
        p.change_layer_order(root, 1, 3, Some("x"));
        p.change_layer_order(root, 1, 1, Some("x"));
        assert_eq!(p.composition(comp).unwrap().history().len(), 1);
    }

    #[test]
    fn test_move_active_layer_boundaries() {
        let (mut p, comp, ids) = doc(3);
        let root = HolderId::Comp(comp);
        p.set_active_layer(comp, ids[0]).unwrap();

        p.move_active_layer(root, false);
        assert_eq!(p.holder_layers(root)[0], ids[0]);

        p.move_active_layer(root, true);
        assert_eq!(p.holder_layers(root)[1], ids[0]);
        p.move_active_layer_to_top(root);
        assert_eq!(p.holder_layers(root)[2], ids[0]);
        assert_eq!(p.composition(comp).unwrap().history().undo_name(), Some("Layer to Top"));
        p.move_active_layer_to_bottom(root);
        assert_eq!(p.holder_layers(root)[0], ids[0]);
    }

    #[test]
    fn test_selection_walks_and_climbs_out_of_group() {
        let (mut p, comp, ids) = doc(3);
        let root = HolderId::Comp(comp);
        let g = p.convert_to_group(root, &[1, 2]).unwrap();
        let inner = HolderId::Group(g);
        p.set_active_layer(comp, ids[1]).unwrap();

        p.raise_layer_selection(inner);
        assert_eq!(p.composition(comp).unwrap().active_layer(), Some(ids[2]));
        p.raise_layer_selection(inner);
        assert_eq!(p.composition(comp).unwrap().active_layer(), Some(g));

        // Top of the composition: no-op.
        p.raise_layer_selection(root);
        assert_eq!(p.composition(comp).unwrap().active_layer(), Some(g));

        p.lower_layer_selection(root);
        assert_eq!(p.composition(comp).unwrap().active_layer(), Some(ids[0]));
        p.lower_layer_selection(root);
        assert_eq!(p.composition(comp).unwrap().active_layer(), Some(ids[0]));
    }

    #[test]
    fn test_can_merge_down_matrix() {
        let (mut p, comp, ids) = doc(2);
        let root = HolderId::Comp(comp);
        assert!(p.can_merge_down(ids[1]));
        assert!(!p.can_merge_down(ids[0]));

        p.set_visible(ids[0], false);
        assert!(!p.can_merge_down(ids[1]));
        p.set_visible(ids[0], true);
        p.set_visible(ids[1], false);
        assert!(!p.can_merge_down(ids[1]));
        p.set_visible(ids[1], true);

        // A smart object below does not qualify, even though it is raster-like.
        let so = p.convert_to_smart_object(ids[0]).unwrap();
        assert_eq!(p.holder_layers(root)[0], so);
        assert!(!p.can_merge_down(ids[1]));

        let adj = p.create_adjustment_layer(comp, "inv", Effect::new(EffectType::Invert).boxed());
        LayerAdder::new(root).at_index(0).add(&mut p, adj);
        assert!(!p.can_merge_down(so));
        assert_eq!(p.merge_down(so), Err(EditError::PreconditionNotMet("merge down")));
    }

    #[test]
    fn test_merge_down_with_offsets_and_undo() {
        let mut p = Project::new();
        let comp = p.new_composition("doc", 4, 4);
        let root = HolderId::Comp(comp);
        let below = p.add_image_layer(root, "below", Frame::filled(2, 2, [0, 0, 255, 255]));
        let top = p.add_image_layer(root, "top", Frame::filled(1, 1, [255, 0, 0, 255]));
        p.set_translation(below, 2, 2);
        p.set_translation(top, 3, 3);
        let before = p.composite_image(comp);

        p.merge_down(top).unwrap();
        assert_eq!(p.holder_layers(root), &[below]);
        let merged = p.layer(below).unwrap().as_image().unwrap().image.clone();
        assert_eq!(merged.pixel(1, 1), [255, 0, 0, 255]);
        assert_eq!(merged.pixel(0, 0), [0, 0, 255, 255]);
        assert!(p.composite_image(comp).same_pixels(&before));
        assert_eq!(p.composition(comp).unwrap().active_layer(), Some(below));

        assert!(p.undo(comp));
        assert_eq!(p.holder_layers(root), &[below, top]);
        assert_eq!(p.layer(below).unwrap().as_image().unwrap().image.pixel(1, 1), [0, 0, 255, 255]);
        assert!(p.redo(comp));
        assert_eq!(p.holder_layers(root), &[below]);
    }

    #[test]
    fn test_group_ungroup_round_trip() {
        let (mut p, comp, ids) = doc(5);
        let root = HolderId::Comp(comp);

        let g = p.convert_to_group(root, &[1, 3]).unwrap();
        assert_eq!(p.holder_layers(root), &[ids[0], ids[2], g, ids[4]]);
        assert_eq!(p.holder_layers(HolderId::Group(g)), &[ids[1], ids[3]]);
        assert_eq!(p.layer(ids[1]).unwrap().holder(), HolderId::Group(g));
        p.check_invariants(comp);

        assert!(p.undo(comp));
        assert_eq!(p.holder_layers(root), &ids[..]);
        p.check_invariants(comp);

        assert!(p.redo(comp));
        assert_eq!(p.holder_layers(root), &[ids[0], ids[2], g, ids[4]]);

        p.un_group(g).unwrap();
        assert_eq!(p.holder_layers(root), &[ids[0], ids[2], ids[1], ids[3], ids[4]]);
        p.check_invariants(comp);
        assert!(p.undo(comp));
        assert_eq!(p.holder_layers(root), &[ids[0], ids[2], g, ids[4]]);
        assert_eq!(p.holder_layers(HolderId::Group(g)), &[ids[1], ids[3]]);
        p.check_invariants(comp);
    }

    #[test]
    fn test_convert_to_group_validates_indices() {
        let (mut p, comp, _) = doc(3);
        let root = HolderId::Comp(comp);
        assert!(matches!(p.convert_to_group(root, &[]), Err(EditError::PreconditionNotMet(_))));
        assert_eq!(p.convert_to_group(root, &[0, 5]), Err(EditError::IndexOutOfRange { index: 5, len: 3 }));
        assert!(matches!(p.convert_to_group(root, &[2, 1]), Err(EditError::PreconditionNotMet(_))));
        assert_eq!(p.holder_layers(root).len(), 3);
    }

    #[test]
    fn test_convert_visible_layers_to_group() {
        let (mut p, comp, ids) = doc(3);
        let root = HolderId::Comp(comp);
        p.set_visible(ids[1], false);
        let g = p.convert_visible_layers_to_group(root).unwrap();
        assert_eq!(p.holder_layers(HolderId::Group(g)), &[ids[0], ids[2]]);
        assert_eq!(p.holder_layers(root), &[ids[1], g]);

        for id in p.holder_layers(HolderId::Group(g)).to_vec() {
            p.set_visible(id, false);
        }
        p.set_visible(g, false);
        p.set_visible(ids[1], false);
        assert!(p.convert_visible_layers_to_group(root).is_none());
    }

    #[test]
    fn test_delete_rules_for_group_and_root() {
        let (mut p, comp, ids) = doc(1);
        let root = HolderId::Comp(comp);
        assert_eq!(p.delete_layer(ids[0], true), Err(EditError::LastLayer));

        let g = p.add_empty_group(root);
        let child = p.add_image_layer(HolderId::Group(g), "child", Frame::transparent(4, 4));
        assert_eq!(p.composition(comp).unwrap().active_layer(), Some(child));

        // A group may become empty; the group itself is then selected.
        p.delete_layer(child, true).unwrap();
        assert!(p.holder_layers(HolderId::Group(g)).is_empty());
        assert_eq!(p.composition(comp).unwrap().active_layer(), Some(g));

        assert!(p.undo(comp));
        assert_eq!(p.holder_layers(HolderId::Group(g)), &[child]);
        assert_eq!(p.composition(comp).unwrap().active_layer(), Some(child));
    }

    #[test]
    fn test_delete_picks_neighbor() {
        let (mut p, comp, ids) = doc(3);
        p.set_active_layer(comp, ids[1]).unwrap();
        p.delete_layer(ids[1], true).unwrap();
        assert_eq!(p.composition(comp).unwrap().active_layer(), Some(ids[2]));

        p.delete_layer(ids[2], true).unwrap();
        assert_eq!(p.composition(comp).unwrap().active_layer(), Some(ids[0]));
    }

    #[test]
    fn test_add_empty_group_undo() {
        let (mut p, comp, ids) = doc(2);
        let root = HolderId::Comp(comp);
        p.set_active_layer(comp, ids[0]).unwrap();
        let g = p.add_empty_group(root);
        assert_eq!(p.holder_layers(root), &[ids[0], g, ids[1]]);
        assert_eq!(p.layer(g).unwrap().name(), "Layer Group");
        assert_eq!(p.composition(comp).unwrap().history().undo_name(), Some("New Layer Group"));

        assert!(p.undo(comp));
        assert_eq!(p.holder_layers(root), &ids[..]);
        assert_eq!(p.composition(comp).unwrap().active_layer(), Some(ids[0]));
    }

    #[test]
    fn test_ungroup_empty_group_undo_redo() {
        let (mut p, comp, ids) = doc(2);
        let root = HolderId::Comp(comp);
        p.set_active_layer(comp, ids[0]).unwrap();
        let g = p.add_empty_group(root);
        assert_eq!(p.holder_layers(root), &[ids[0], g, ids[1]]);

        p.un_group(g).unwrap();
        assert_eq!(p.holder_layers(root), &ids[..]);
        assert_eq!(p.composition(comp).unwrap().active_layer(), Some(ids[1]));
        assert_eq!(p.composition(comp).unwrap().history().undo_name(), Some("Ungroup"));
        p.check_invariants(comp);

        assert!(p.undo(comp));
        assert_eq!(p.holder_layers(root), &[ids[0], g, ids[1]]);
        assert!(p.holder_layers(HolderId::Group(g)).is_empty());
        assert_eq!(p.layer(g).unwrap().holder(), root);
        p.check_invariants(comp);

        assert!(p.redo(comp));
        assert_eq!(p.holder_layers(root), &ids[..]);
        assert!(!p.is_attached(g));
        p.check_invariants(comp);
    }

    #[test]
    fn test_ungroup_only_empty_group_of_root_fails() {
        let mut p = Project::new();
        let comp = p.new_composition("doc", 4, 4);
        let root = HolderId::Comp(comp);
        let g = p.add_empty_group(root);
        assert_eq!(p.un_group(g), Err(EditError::LastLayer));
        assert_eq!(p.holder_layers(root), &[g]);
    }

    #[test]
    fn test_ungroup_keeps_inner_selection() {
        let (mut p, comp, ids) = doc(3);
        let root = HolderId::Comp(comp);
        let g = p.convert_to_group(root, &[0, 1]).unwrap();
        p.set_active_layer(comp, ids[0]).unwrap();
        p.un_group(g).unwrap();
        assert_eq!(p.composition(comp).unwrap().active_layer(), Some(ids[0]));
        assert!(!p.is_attached(g));
    }

    #[test]
    fn test_replace_layer_moves_mask_and_selection() {
        let (mut p, comp, ids) = doc(2);
        let root = HolderId::Comp(comp);
        p.set_mask(ids[1], Some(image::GrayImage::new(4, 4)));
        p.set_active_layer(comp, ids[1]).unwrap();
        let fresh = p.create_image_layer(comp, "fresh", Frame::transparent(4, 4));

        p.replace_layer(ids[1], fresh);
        assert_eq!(p.holder_layers(root), &[ids[0], fresh]);
        assert!(p.layer(fresh).unwrap().mask().is_some());
        assert!(p.layer(ids[1]).unwrap().mask().is_none());
        assert_eq!(p.composition(comp).unwrap().active_layer(), Some(fresh));
    }

    #[test]
    #[should_panic(expected = "has holder")]
    fn test_invariant_check_catches_bad_holder() {
        let (mut p, comp, ids) = doc(2);
        let g = p.add_empty_group(HolderId::Comp(comp));
        p.layer_mut(ids[0]).holder = HolderId::Group(g);
        p.check_invariants(comp);
    }

    #[test]
    fn test_pass_through_reorder_changes_rendering() {
        // An invert adjustment inside a pass-through group affects only what
        // lies below it in the parent.
        let mut p = Project::new();
        let comp = p.new_composition("doc", 1, 1);
        let root = HolderId::Comp(comp);
        p.add_image_layer(root, "base", Frame::filled(1, 1, [0, 0, 0, 255]));
        let g = p.add_empty_group(root);
        let adj = p.create_adjustment_layer(comp, "invert", Effect::new(EffectType::Invert).boxed());
        LayerAdder::new(HolderId::Group(g)).add(&mut p, adj);
        let top = p.create_image_layer(comp, "red", Frame::filled(1, 1, [255, 0, 0, 255]));
        LayerAdder::new(HolderId::Group(g)).add(&mut p, top);

        // [base, G[invert, red]]: invert sees only base.
        assert_eq!(p.composite_image(comp).pixel(0, 0), [255, 0, 0, 255]);
        let first_stats = p.composition(comp).unwrap().composite_stats();

        p.change_layer_order(HolderId::Group(g), 1, 0, None);
        // [base, G[red, invert]]: invert now also sees red.
        assert_eq!(p.composite_image(comp).pixel(0, 0), [0, 255, 255, 255]);
        assert_eq!(p.composition(comp).unwrap().composite_stats().misses, first_stats.misses + 1);
    }
}
