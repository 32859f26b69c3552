//! Smart objects.
//!
//! A smart object shows the composite of a nested composition (its
//! "content") run through a chain of smart filters. The result is cached in
//! `image` and recomputed on the next read after `needs_refresh` is set.
//! Several smart objects may share one content composition; the content's
//! `owners` list points back at them.
//!
//! Linked content comes from a file. Only the path is saved with the
//! document, and the file is reloaded on a worker thread when it changes.
//! Reload results travel back over a channel and are applied on the thread
//! that owns the [`Project`], tagged with a generation so that a newer
//! reload always wins.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant, SystemTime};

use anyhow::Context;
use log::{debug, error, info, trace, warn};

use crate::core::history::Edit;
use crate::core::reload::{ReloadOutcome, ReloadResult, ReloadTicket};

use super::comp_events::{ContentReloadedEvent, IconInvalidatedEvent, ReloadFailedEvent, SmartFilterChangedEvent};
use super::edit_error::EditError;
use super::frame::Frame;
use super::holder::LayerAdder;
use super::ids::{CompId, HolderId, LayerId};
use super::layer::{ImageLayer, Layer, LayerKind};
use super::project::Project;
use super::traits::{Filter, FilterDialog, Prompter};

/// Name prefix of smart objects converted from a layer.
pub const SMART_PREFIX: &str = "smart ";

/// Where linked content comes from and when it was last read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedContent {
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl LinkedContent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let modified = file_mtime(&path).unwrap_or(SystemTime::UNIX_EPOCH);
        Self { path, modified }
    }
}

pub(crate) fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[derive(Debug)]
pub struct SmartObject {
    pub(crate) content: CompId,
    pub(crate) filters: Vec<Box<dyn Filter>>,
    pub(crate) filters_visible: bool,
    pub(crate) linked: Option<LinkedContent>,
    pub(crate) image: RefCell<Frame>,
    pub(crate) needs_refresh: Cell<bool>,
    refresh_count: Cell<u64>,
}

impl SmartObject {
    pub(crate) fn new(content: CompId, canvas: (u32, u32)) -> Self {
        Self {
            content,
            filters: Vec::new(),
            filters_visible: true,
            linked: None,
            image: RefCell::new(Frame::transparent(canvas.0, canvas.1)),
            needs_refresh: Cell::new(true),
            refresh_count: Cell::new(0),
        }
    }

    pub fn content(&self) -> CompId {
        self.content
    }

    pub fn filters(&self) -> &[Box<dyn Filter>] {
        &self.filters
    }

    pub fn has_smart_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    pub fn smart_filters_visible(&self) -> bool {
        self.filters_visible
    }

    pub fn is_linked(&self) -> bool {
        self.linked.is_some()
    }

    pub fn linked(&self) -> Option<&LinkedContent> {
        self.linked.as_ref()
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh.get()
    }

    /// How many times the image was rebuilt from content.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.get()
    }

    /// Same content, copied filters and cached image.
    pub(crate) fn duplicate(&self) -> SmartObject {
        SmartObject {
            content: self.content,
            filters: self.filters.iter().map(|f| f.copy()).collect(),
            filters_visible: self.filters_visible,
            linked: self.linked.clone(),
            image: RefCell::new(self.image.borrow().clone()),
            needs_refresh: Cell::new(self.needs_refresh.get()),
            refresh_count: Cell::new(0),
        }
    }
}

impl Project {
    fn so_ref(&self, layer: LayerId) -> Result<&SmartObject, EditError> {
        self.layers
            .get(&layer)
            .ok_or(EditError::UnknownLayer(layer))?
            .as_smart_object()
            .ok_or(EditError::NotASmartObject(layer))
    }

    fn so_mut(&mut self, layer: LayerId) -> Result<&mut SmartObject, EditError> {
        self.layers
            .get_mut(&layer)
            .ok_or(EditError::UnknownLayer(layer))?
            .as_smart_object_mut()
            .ok_or(EditError::NotASmartObject(layer))
    }

    /// Detached smart object showing `content`, registered as its owner.
    pub fn create_smart_object(&mut self, comp: CompId, name: &str, content: CompId) -> LayerId {
        let layer = self.smart_object_layer(comp, name, content);
        self.insert_smart_object(layer)
    }

    fn smart_object_layer(&self, comp: CompId, name: &str, content: CompId) -> Layer {
        let canvas = self.comp_ref(comp).canvas_size();
        Layer::new(comp, name, LayerKind::SmartObject(SmartObject::new(content, canvas)))
    }

    fn insert_smart_object(&mut self, layer: Layer) -> LayerId {
        let content = layer.as_smart_object().map(|so| so.content);
        let id = self.insert_new(layer);
        if let Some(content) = content {
            self.comp_mut(content).owners.push(id);
        }
        id
    }

    /// Point a smart object at other content. The old content forgets it.
    pub(crate) fn set_content(&mut self, layer: LayerId, content: CompId) {
        let Some(so) = self.layer_mut(layer).as_smart_object_mut() else {
            return;
        };
        let old = so.content;
        if old == content {
            return;
        }
        so.content = content;
        if let Some(c) = self.comps.get_mut(&old) {
            c.owners.retain(|&o| o != layer);
        }
        let c = self.comp_mut(content);
        if !c.owners.contains(&layer) {
            c.owners.push(layer);
        }
    }

    /// Wrap a layer into a new smart object that takes its place (undoable).
    ///
    /// The layer's copy becomes the only layer of the new content; the mask
    /// and blending stay outside on the smart object.
    pub fn convert_to_smart_object(&mut self, layer: LayerId) -> Result<LayerId, EditError> {
        let l = self.layers.get(&layer).ok_or(EditError::UnknownLayer(layer))?;
        let (comp, holder) = (l.comp, l.holder);
        if !self.holder(holder).contains_layer(layer) {
            return Err(EditError::UnknownLayer(layer));
        }
        let name = format!("{SMART_PREFIX}{}", l.name);
        let (w, h) = self.comp_ref(comp).canvas_size();

        let content = self.new_content_comp(&name, w, h);
        let inner = self.duplicate_detached(layer, content, Some("original content"));
        let inner_layer = self.layer_mut(inner);
        inner_layer.mask = None;
        inner_layer.opacity = 1.0;
        inner_layer.blend_mode = if inner_layer.is_group() {
            inner_layer.blend_mode
        } else {
            super::compositor::BlendMode::Normal
        };
        LayerAdder::new(HolderId::Comp(content)).init_mode().add(self, inner);
        self.comp_mut(content).dirty = false;

        let mut so_layer = self.smart_object_layer(comp, &name, content);
        self.layer_ref(layer).copy_blending_to(&mut so_layer);
        let so = self.insert_smart_object(so_layer);

        self.replace_layer(layer, so);
        self.add_history(
            comp,
            Edit::ReplaceLayer { label: "Convert to Smart Object".into(), holder, before: layer, after: so },
        );
        debug!("Converted {} to smart object {}", layer, so);
        Ok(so)
    }

    /// Replace a smart object (or an isolated group) with an image layer of
    /// what it currently shows (undoable).
    pub fn rasterize(&mut self, layer: LayerId) -> Result<LayerId, EditError> {
        let l = self.layers.get(&layer).ok_or(EditError::UnknownLayer(layer))?;
        let (comp, holder) = (l.comp, l.holder);
        let (image, name, offset) = match &l.kind {
            LayerKind::SmartObject(_) => {
                let name = l.name.strip_prefix(SMART_PREFIX).unwrap_or(&l.name).to_string();
                (self.smart_object_image(layer), name, (l.tx, l.ty))
            }
            LayerKind::Group(_) if !l.blend_mode.is_pass_through() => {
                (self.isolated_group_image(layer), l.name.clone(), (0, 0))
            }
            LayerKind::Group(_) => return Err(EditError::PreconditionNotMet("rasterize a pass-through group")),
            _ => return Err(EditError::NotASmartObject(layer)),
        };

        let mut raster_layer = Layer::new(comp, name, LayerKind::Image(ImageLayer { image }));
        self.layer_ref(layer).copy_blending_to(&mut raster_layer);
        (raster_layer.tx, raster_layer.ty) = offset;
        let raster = self.insert_new(raster_layer);

        self.replace_layer(layer, raster);
        self.add_history(comp, Edit::ReplaceLayer { label: "Rasterize".into(), holder, before: layer, after: raster });
        Ok(raster)
    }

    /// Current image of a smart object, rebuilt first if stale.
    pub fn smart_object_image(&self, layer: LayerId) -> Frame {
        let so = self
            .layer_ref(layer)
            .as_smart_object()
            .unwrap_or_else(|| panic!("layer {layer} is not a smart object"));
        if so.needs_refresh.get() {
            self.recalculate_image(layer, true);
        }
        so.image.borrow().clone()
    }

    /// Content composite run through the visible filter chain.
    fn filtered_content_image(&self, so: &SmartObject, filters: &[Box<dyn Filter>]) -> Frame {
        let mut image = self.composite_image(so.content);
        if so.filters_visible {
            for filter in filters {
                image = filter.transform_image(&image);
            }
        }
        image
    }

    pub(crate) fn recalculate_image(&self, layer: LayerId, update_icon: bool) {
        let l = self.layer_ref(layer);
        let Some(so) = l.as_smart_object() else {
            return;
        };
        self.check_content_invariant(layer);
        trace!("Recalculating smart object {}", l.name);
        let image = self.filtered_content_image(so, &so.filters);
        *so.image.borrow_mut() = image;
        so.needs_refresh.set(false);
        so.refresh_count.set(so.refresh_count.get() + 1);
        if update_icon {
            self.events.emit(IconInvalidatedEvent(layer));
        }
    }

    /// Make sure everything above this smart object reflects `content`.
    /// Without `force`, nothing happens unless the content is dirty.
    pub fn propagate_changes(&mut self, layer: LayerId, content: CompId, force: bool) {
        self.set_content(layer, content);
        if !force && !self.comp_ref(content).dirty {
            return;
        }
        let l = self.layer_ref(layer);
        let Some(so) = l.as_smart_object() else {
            return;
        };
        so.needs_refresh.set(true);
        let (holder, linked) = (l.holder, so.linked.is_some());
        self.smart_object_changed(holder, linked);
    }

    /// The smart object's image changed without its content changing.
    fn smart_image_changed(&mut self, layer: LayerId) {
        let holder = self.layer_ref(layer).holder;
        self.events.emit(IconInvalidatedEvent(layer));
        self.events.emit(SmartFilterChangedEvent(layer));
        self.update(holder);
    }

    /// Append a filter to the chain and show the chain.
    pub fn add_smart_filter(&mut self, layer: LayerId, filter: Box<dyn Filter>) -> Result<(), EditError> {
        let so = self.so_mut(layer)?;
        so.filters.push(filter);
        so.filters_visible = true;
        so.needs_refresh.set(true);
        self.smart_image_changed(layer);
        Ok(())
    }

    /// Run a filter dialog on the smart object and keep the filter if the
    /// dialog is accepted. Only allowed while the chain is empty.
    pub fn run_and_add_smart_filter(
        &mut self,
        layer: LayerId,
        mut filter: Box<dyn Filter>,
        dialog: &mut dyn FilterDialog,
    ) -> Result<bool, EditError> {
        if self.so_ref(layer)?.has_smart_filters() {
            return Err(EditError::PreconditionNotMet("add a second smart filter"));
        }
        let before = self.smart_object_image(layer);
        let mut preview = before.clone();
        if !dialog.run(filter.as_mut(), &mut preview) {
            debug!("Smart filter {} cancelled", filter.name());
            return Ok(false);
        }
        let so = self.so_mut(layer)?;
        *so.image.borrow_mut() = preview;
        so.filters.push(filter);
        so.filters_visible = true;
        self.smart_image_changed(layer);
        Ok(true)
    }

    /// Re-run the filter at `index`. Cancelling restores both the image and
    /// the filter's settings from before the dialog.
    pub fn edit_smart_filter(
        &mut self,
        layer: LayerId,
        index: usize,
        dialog: &mut dyn FilterDialog,
    ) -> Result<bool, EditError> {
        let len = self.so_ref(layer)?.filters.len();
        if len == 0 {
            return Err(EditError::NoSmartFilter);
        }
        if index >= len {
            return Err(EditError::IndexOutOfRange { index, len });
        }
        let last_output = self.smart_object_image(layer);

        let so = self.so_mut(layer)?;
        let mut filter = so.filters.remove(index);
        let last_state = filter.copy_state();

        let so = self.so_ref(layer)?;
        let mut preview = {
            let mut image = self.composite_image(so.content);
            for f in &so.filters[..index] {
                image = f.transform_image(&image);
            }
            image
        };
        let accepted = dialog.run(filter.as_mut(), &mut preview);

        if accepted {
            for f in &so.filters[index..] {
                preview = f.transform_image(&preview);
            }
        }
        let so = self.so_mut(layer)?;
        if accepted {
            so.filters.insert(index, filter);
            so.filters_visible = true;
            *so.image.borrow_mut() = preview;
            so.needs_refresh.set(false);
            self.smart_image_changed(layer);
        } else {
            if let Some(state) = last_state {
                filter.set_state(&state);
            }
            so.filters.insert(index, filter);
            *so.image.borrow_mut() = last_output;
            debug!("Editing smart filter {index} cancelled, settings restored");
        }
        Ok(accepted)
    }

    /// Swap the whole chain for `filter`. Cancelling puts the old chain and
    /// image back untouched.
    pub fn replace_smart_filter(
        &mut self,
        layer: LayerId,
        mut filter: Box<dyn Filter>,
        dialog: &mut dyn FilterDialog,
    ) -> Result<bool, EditError> {
        if !self.so_ref(layer)?.has_smart_filters() {
            return Err(EditError::NoSmartFilter);
        }
        let last_output = self.smart_object_image(layer);
        let previous = std::mem::take(&mut self.so_mut(layer)?.filters);

        let mut preview = self.composite_image(self.so_ref(layer)?.content);
        let accepted = dialog.run(filter.as_mut(), &mut preview);

        let so = self.so_mut(layer)?;
        if accepted {
            so.filters.push(filter);
            so.filters_visible = true;
            *so.image.borrow_mut() = preview;
            self.smart_image_changed(layer);
        } else {
            so.filters = previous;
            *so.image.borrow_mut() = last_output;
        }
        Ok(accepted)
    }

    pub fn delete_smart_filter(&mut self, layer: LayerId) -> Result<(), EditError> {
        let so = self.so_mut(layer)?;
        if so.filters.is_empty() {
            return Err(EditError::NoSmartFilter);
        }
        so.filters.clear();
        so.needs_refresh.set(true);
        self.smart_image_changed(layer);
        Ok(())
    }

    pub fn set_smart_filter_visibility(&mut self, layer: LayerId, visible: bool) -> Result<(), EditError> {
        let so = self.so_mut(layer)?;
        if so.filters_visible == visible {
            return Ok(());
        }
        so.filters_visible = visible;
        self.recalculate_image(layer, true);
        let holder = self.layer_ref(layer).holder;
        self.events.emit(SmartFilterChangedEvent(layer));
        self.update(holder);
        Ok(())
    }

    /// Put a copy of the filter at `index` on the project clipboard.
    pub fn copy_smart_filter(&mut self, layer: LayerId, index: usize) -> Result<(), EditError> {
        let so = self.so_ref(layer)?;
        let len = so.filters.len();
        let filter = so.filters.get(index).ok_or(EditError::IndexOutOfRange { index, len })?;
        self.filter_clipboard = Some(filter.copy());
        Ok(())
    }

    pub fn has_copied_smart_filter(&self) -> bool {
        self.filter_clipboard.is_some()
    }

    /// Paste the clipboard filter. An existing chain is only replaced if
    /// the prompter agrees.
    pub fn paste_smart_filter(
        &mut self,
        layer: LayerId,
        dialog: &mut dyn FilterDialog,
        prompter: &mut dyn Prompter,
    ) -> Result<bool, EditError> {
        let incoming = self
            .filter_clipboard
            .as_ref()
            .map(|f| f.copy())
            .ok_or(EditError::PreconditionNotMet("paste: no copied smart filter"))?;
        let existing = self.so_ref(layer)?.filters.first().map(|f| f.name().to_string());
        match existing {
            Some(existing) => {
                if prompter.confirm_replace_filter(&existing, incoming.name()) {
                    self.replace_smart_filter(layer, incoming, dialog)
                } else {
                    Ok(false)
                }
            }
            None => self.run_and_add_smart_filter(layer, incoming, dialog),
        }
    }

    /// A second smart object sharing this one's content, placed above it.
    pub fn shallow_duplicate(&mut self, layer: LayerId) -> Result<LayerId, EditError> {
        let l = self.layers.get(&layer).ok_or(EditError::UnknownLayer(layer))?;
        let so = l.as_smart_object().ok_or(EditError::NotASmartObject(layer))?;
        let holder = l.holder;
        let index = self.holder(holder).index_of(layer).ok_or(EditError::UnknownLayer(layer))?;

        let mut clone = Layer::new(l.comp, format!("{} clone", l.name), LayerKind::SmartObject(so.duplicate()));
        l.copy_blending_to(&mut clone);
        clone.tx = l.tx;
        clone.ty = l.ty;
        let id = self.insert_smart_object(clone);

        LayerAdder::new(holder).at_index(index + 1).with_history("Clone").add(self, id);
        Ok(id)
    }

    /// Stop following the linked file; the content is saved with the
    /// document from now on.
    pub fn embed_linked_content(&mut self, layer: LayerId) -> Result<(), EditError> {
        let so = self.so_mut(layer)?;
        let Some(link) = so.linked.take() else {
            return Err(EditError::PreconditionNotMet("embed content that is not linked"));
        };
        info!("{} is not used anymore, content embedded", link.path.display());
        let comp = self.layer_ref(layer).comp;
        self.comp_mut(comp).dirty = true;
        Ok(())
    }

    /// Composition whose file stores this smart object's content: the
    /// linked content itself, or the nearest enclosing document.
    pub fn saving_comp(&self, layer: LayerId) -> CompId {
        let mut current = layer;
        loop {
            let l = self.layer_ref(current);
            if let Some(so) = l.as_smart_object() {
                if so.linked.is_some() {
                    return so.content;
                }
            }
            let parent = self.comp_ref(l.comp);
            match parent.owners.first() {
                // All owners live in the same composition.
                Some(&owner) => current = owner,
                None => return parent.id,
            }
        }
    }

    /// Panic unless the content of `layer` lists it as an owner.
    pub fn check_content_invariant(&self, layer: LayerId) {
        let l = self.layer_ref(layer);
        let Some(so) = l.as_smart_object() else {
            return;
        };
        let content = self
            .comps
            .get(&so.content)
            .unwrap_or_else(|| panic!("content of {} is missing", l.name));
        assert!(
            content.is_smart_object_content(),
            "content of {} ({}) is not smart object content",
            l.name,
            content.name
        );
        assert!(content.owners.contains(&layer), "content {} does not list {} as owner", content.name, l.name);
    }

    /// Add a smart object linked to a composition file, above the active layer.
    pub fn add_linked_smart_object(&mut self, holder: HolderId, path: &Path) -> anyhow::Result<LayerId> {
        let desc = self.loader.load(path)?;
        let content = self.instantiate_file(&desc, path)?;
        let comp = self.comp_of_holder(holder);
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| desc.name.clone());
        let id = self.create_smart_object(comp, &name, content);
        if let Ok(so) = self.so_mut(id) {
            so.linked = Some(LinkedContent::new(path));
        }
        LayerAdder::new(holder).with_history("Add Linked").add(self, id);
        info!("Linked {} as {}", path.display(), name);
        Ok(id)
    }

    /// Look for changed linked files in `comp` and, with the prompter's
    /// consent, reload them. Content that is not reloaded is searched
    /// for nested linked smart objects too.
    pub fn check_for_auto_reload(&mut self, comp: CompId, prompter: &mut dyn Prompter) -> Vec<ReloadTicket> {
        let mut tickets = Vec::new();
        let mut visited = HashSet::new();
        self.check_comp_for_reload(comp, prompter, &mut tickets, &mut visited);
        tickets
    }

    fn check_comp_for_reload(
        &mut self,
        comp: CompId,
        prompter: &mut dyn Prompter,
        tickets: &mut Vec<ReloadTicket>,
        visited: &mut HashSet<CompId>,
    ) {
        if !visited.insert(comp) {
            return;
        }
        for so in self.smart_objects_in(comp) {
            let mut reloaded = false;
            let mut content = None;
            if let Some(s) = self.layers.get_mut(&so).and_then(Layer::as_smart_object_mut) {
                content = Some(s.content);
                if let Some(link) = s.linked.as_mut() {
                    let newer = file_mtime(&link.path).filter(|&t| t > link.modified);
                    if let Some(t) = newer {
                        link.modified = t;
                        let path = link.path.clone();
                        if prompter.confirm_reload(&path) {
                            reloaded = true;
                        }
                    }
                }
            }
            if reloaded {
                // Fresh content replaces anything nested inside.
                tickets.extend(self.reload_linked_content(so));
            } else if let Some(content) = content {
                self.check_comp_for_reload(content, prompter, tickets, visited);
            }
        }
    }

    /// Smart objects directly in `comp` or inside its groups.
    fn smart_objects_in(&self, comp: CompId) -> Vec<LayerId> {
        let mut out = Vec::new();
        let mut stack: Vec<LayerId> = self.comp_ref(comp).layers.clone();
        while let Some(id) = stack.pop() {
            match &self.layer_ref(id).kind {
                LayerKind::SmartObject(_) => out.push(id),
                LayerKind::Group(g) => stack.extend(g.layers.iter().copied()),
                _ => {}
            }
        }
        out
    }

    /// Start loading the linked file again. The result is applied by
    /// [`Project::apply_pending_reloads`]; a later reload of the same smart
    /// object supersedes this one.
    pub fn reload_linked_content(&mut self, layer: LayerId) -> Option<ReloadTicket> {
        let path = self.so_ref(layer).ok()?.linked.as_ref()?.path.clone();
        let (generation, current) = self.reloads.begin(layer);
        let tx = self.reloads.sender();
        let loader = self.loader.clone();
        info!("Reloading {} (generation {})", path.display(), generation);

        let job = move || {
            let result = if current.load(Ordering::Acquire) != generation {
                ReloadResult::Skipped
            } else {
                match loader.load(&path) {
                    Ok(desc) => ReloadResult::Loaded(desc),
                    Err(e) => ReloadResult::Failed(e),
                }
            };
            let _ = tx.send(ReloadOutcome { layer, generation, path, result });
        };
        match self.workers() {
            Some(workers) => workers.execute(job),
            None => job(),
        }
        Some(ReloadTicket { layer, generation })
    }

    /// Apply finished reloads. Returns how many changed some content.
    pub fn apply_pending_reloads(&mut self) -> usize {
        let mut applied = 0;
        while let Some(outcome) = self.reloads.try_recv() {
            if self.apply_reload(outcome) {
                applied += 1;
            }
        }
        applied
    }

    /// Block until no reload is in flight or `timeout` passes, applying
    /// results as they arrive.
    pub fn wait_for_reloads(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut applied = self.apply_pending_reloads();
        while self.reloads.in_flight() > 0 {
            let now = Instant::now();
            if now >= deadline {
                warn!("Gave up waiting for {} reloads", self.reloads.in_flight());
                break;
            }
            if let Some(outcome) = self.reloads.recv_timeout(deadline - now) {
                if self.apply_reload(outcome) {
                    applied += 1;
                }
            }
        }
        applied
    }

    fn apply_reload(&mut self, outcome: ReloadOutcome) -> bool {
        let ReloadOutcome { layer, generation, path, result } = outcome;
        if !self.reloads.is_current(layer, generation) {
            warn!("Dropping superseded reload of {} (generation {})", path.display(), generation);
            return false;
        }
        if self.so_ref(layer).is_err() {
            debug!("Reload target {layer} is gone");
            return false;
        }
        let loaded = match result {
            ReloadResult::Skipped => return false,
            ReloadResult::Loaded(desc) => self.instantiate_file(&desc, &path),
            ReloadResult::Failed(e) => Err(e),
        };
        let content = match loaded.with_context(|| format!("Failed to reload {}", path.display())) {
            Ok(content) => content,
            Err(e) => {
                error!("{e:#}");
                self.events.emit(ReloadFailedEvent { layer, path, message: format!("{e:#}") });
                return false;
            }
        };

        self.set_content(layer, content);
        self.propagate_changes(layer, content, true);
        self.recalculate_image(layer, true);
        self.events.emit(ContentReloadedEvent { layer, content });
        info!("Reloaded {}", path.display());
        true
    }

    /// Ask the prompter about linked files that were missing on load. A
    /// found replacement is loaded; otherwise the link is dropped and the
    /// transparent content stays.
    pub fn resolve_missing_links(&mut self, prompter: &mut dyn Prompter) -> Vec<ReloadTicket> {
        let mut tickets = Vec::new();
        for layer in std::mem::take(&mut self.missing_links) {
            let Some(path) = self.so_ref(layer).ok().and_then(|so| so.linked.as_ref()).map(|l| l.path.clone())
            else {
                continue;
            };
            let replacement = prompter.resolve_missing(&path);
            let Ok(so) = self.so_mut(layer) else {
                continue;
            };
            match replacement {
                Some(found) => {
                    info!("Using {} for missing {}", found.display(), path.display());
                    so.linked = Some(LinkedContent::new(found));
                    tickets.extend(self.reload_linked_content(layer));
                }
                None => {
                    warn!("Linked file {} not found, keeping transparent content", path.display());
                    so.linked = None;
                }
            }
        }
        tickets
    }

    /// Linked smart objects still waiting for their file.
    pub fn missing_links(&self) -> &[LayerId] {
        &self.missing_links
    }
}
