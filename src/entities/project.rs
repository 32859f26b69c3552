//! Project: the per-session document arena.
//!
//! Owns every composition and layer of the session, keyed by id. Layers and
//! compositions reference each other only through ids ([`HolderId`] for the
//! holder back-reference, [`CompId`] for smart-object content), so the
//! nesting graph has no ownership cycles. Removed layers stay in the arena
//! while an undo record can bring them back; [`Project::purge_unreachable`]
//! sweeps the rest.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use image::GrayImage;
use log::{debug, info, warn};

use crate::config::Settings;
use crate::core::event_bus::EventBus;
use crate::core::reload::ReloadTracker;
use crate::core::workers::Workers;

use super::comp_events::IconInvalidatedEvent;
use super::composition::Composition;
use super::edit_error::EditError;
use super::frame::Frame;
use super::group::LayerGroup;
use super::holder::LayerAdder;
use super::ids::{CompId, HolderId, LayerId};
use super::layer::{AdjustmentLayer, ImageLayer, Layer, LayerKind, Mask};
use super::project_io::JsonCompLoader;
use super::smart_object::SmartObject;
use super::traits::{CompLoader, Filter};

pub struct Project {
    pub(crate) comps: HashMap<CompId, Composition>,
    pub(crate) layers: HashMap<LayerId, Layer>,
    /// Top-level documents, in opening order.
    pub(crate) documents: Vec<CompId>,
    pub(crate) events: EventBus,
    pub(crate) settings: Settings,
    pub(crate) loader: Arc<dyn CompLoader>,
    pub(crate) reloads: ReloadTracker,
    /// Created on first async reload.
    workers: Option<Workers>,
    pub(crate) filter_clipboard: Option<Box<dyn Filter>>,
    /// Linked smart objects whose file was not found on load.
    pub(crate) missing_links: Vec<LayerId>,
    /// Compositions being rendered right now, innermost last.
    pub(crate) compose_stack: RefCell<Vec<CompId>>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("documents", &self.documents)
            .field("comps", &self.comps.len())
            .field("layers", &self.layers.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}

/// What [`Project::purge_unreachable`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub layers: usize,
    pub comps: usize,
}

impl Project {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            comps: HashMap::new(),
            layers: HashMap::new(),
            documents: Vec::new(),
            events: EventBus::new(),
            settings,
            loader: Arc::new(JsonCompLoader),
            reloads: ReloadTracker::new(),
            workers: None,
            filter_clipboard: None,
            missing_links: Vec::new(),
            compose_stack: RefCell::new(Vec::new()),
        }
    }

    /// Replace the loader used for linked content.
    pub fn with_loader(mut self, loader: Arc<dyn CompLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn documents(&self) -> &[CompId] {
        &self.documents
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    pub fn composition(&self, id: CompId) -> Option<&Composition> {
        self.comps.get(&id)
    }

    pub fn composition_mut(&mut self, id: CompId) -> Option<&mut Composition> {
        self.comps.get_mut(&id)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn num_compositions(&self) -> usize {
        self.comps.len()
    }

    pub(crate) fn layer_ref(&self, id: LayerId) -> &Layer {
        self.layers
            .get(&id)
            .unwrap_or_else(|| panic!("layer {id} is not in the project"))
    }

    pub(crate) fn layer_mut(&mut self, id: LayerId) -> &mut Layer {
        self.layers
            .get_mut(&id)
            .unwrap_or_else(|| panic!("layer {id} is not in the project"))
    }

    pub(crate) fn comp_ref(&self, id: CompId) -> &Composition {
        self.comps
            .get(&id)
            .unwrap_or_else(|| panic!("composition {id} is not in the project"))
    }

    pub(crate) fn comp_mut(&mut self, id: CompId) -> &mut Composition {
        self.comps
            .get_mut(&id)
            .unwrap_or_else(|| panic!("composition {id} is not in the project"))
    }

    /// Worker pool, started on first use. `None` when configured for
    /// inline loading or when threads cannot be spawned.
    pub(crate) fn workers(&mut self) -> Option<&Workers> {
        if self.workers.is_none() && self.settings.worker_threads > 0 {
            match Workers::new(self.settings.worker_threads) {
                Ok(w) => self.workers = Some(w),
                Err(e) => {
                    warn!("Failed to start worker threads, loading inline: {e:#}");
                    self.settings.worker_threads = 0;
                }
            }
        }
        self.workers.as_ref()
    }

    /// New empty document.
    pub fn new_composition(&mut self, name: &str, width: u32, height: u32) -> CompId {
        let id = self.new_content_comp(name, width, height);
        self.documents.push(id);
        info!("New composition {} ({}x{})", name, width, height);
        id
    }

    /// Composition that is not a document of its own (smart-object content).
    pub(crate) fn new_content_comp(&mut self, name: &str, width: u32, height: u32) -> CompId {
        let comp = Composition::new(name, width, height, self.settings.max_undo);
        let id = comp.id;
        self.comps.insert(id, comp);
        id
    }

    /// Forget a document. Its layers stay until the next purge.
    pub fn close_document(&mut self, comp: CompId) -> bool {
        let before = self.documents.len();
        self.documents.retain(|&c| c != comp);
        before != self.documents.len()
    }

    pub(crate) fn insert_new(&mut self, layer: Layer) -> LayerId {
        let id = layer.id;
        self.layers.insert(id, layer);
        id
    }

    /// Detached image layer; place it with [`LayerAdder`].
    pub fn create_image_layer(&mut self, comp: CompId, name: &str, image: Frame) -> LayerId {
        self.insert_new(Layer::new(comp, name, LayerKind::Image(ImageLayer { image })))
    }

    pub fn create_adjustment_layer(&mut self, comp: CompId, name: &str, filter: Box<dyn Filter>) -> LayerId {
        self.insert_new(Layer::new(comp, name, LayerKind::Adjustment(AdjustmentLayer { filter })))
    }

    /// Detached pass-through group owning `children`, which must be detached too.
    pub fn create_group(&mut self, comp: CompId, name: &str, children: Vec<LayerId>) -> LayerId {
        let id = self.insert_new(Layer::new(comp, name, LayerKind::Group(LayerGroup::new(children.clone()))));
        for child in children {
            self.set_layer_home(child, HolderId::Group(id), comp);
        }
        id
    }

    /// Create an image layer and add it above the active layer, unrecorded.
    pub fn add_image_layer(&mut self, holder: HolderId, name: &str, image: Frame) -> LayerId {
        let comp = self.comp_of_holder(holder);
        let id = self.create_image_layer(comp, name, image);
        LayerAdder::new(holder).add(self, id);
        id
    }

    pub fn add_adjustment_layer(&mut self, holder: HolderId, filter: Box<dyn Filter>) -> LayerId {
        let comp = self.comp_of_holder(holder);
        let name = filter.name().to_string();
        let id = self.create_adjustment_layer(comp, &name, filter);
        LayerAdder::new(holder).with_history("New Adjustment Layer").add(self, id);
        id
    }

    /// Apply a change to a layer, then refresh its icon and everything above it.
    fn edit_layer(&mut self, layer: LayerId, f: impl FnOnce(&mut Layer)) {
        let l = self.layer_mut(layer);
        f(l);
        let holder = l.holder;
        self.events.emit(IconInvalidatedEvent(layer));
        self.update(holder);
    }

    pub fn set_visible(&mut self, layer: LayerId, visible: bool) {
        if self.layer_ref(layer).visible != visible {
            self.edit_layer(layer, |l| l.visible = visible);
        }
    }

    pub fn set_opacity(&mut self, layer: LayerId, opacity: f32) {
        let opacity = opacity.clamp(0.0, 1.0);
        self.edit_layer(layer, |l| l.opacity = opacity);
    }

    /// Groups have no offset of their own; move their children instead.
    pub fn set_translation(&mut self, layer: LayerId, tx: i32, ty: i32) {
        let l = self.layer_ref(layer);
        if l.is_group() {
            warn!("Groups cannot be translated, ignoring for {}", l.name);
            return;
        }
        self.edit_layer(layer, |l| {
            l.tx = tx;
            l.ty = ty;
        });
    }

    pub fn translate(&mut self, layer: LayerId, dx: i32, dy: i32) {
        let (tx, ty) = self.layer_ref(layer).translation();
        self.set_translation(layer, tx + dx, ty + dy);
    }

    pub fn rename(&mut self, layer: LayerId, name: &str) {
        debug!("Renaming {} to {}", self.layer_ref(layer).name, name);
        self.layer_mut(layer).name = name.to_string();
        self.events.emit(IconInvalidatedEvent(layer));
    }

    /// Set or remove the layer mask. Masks are in layer space.
    pub fn set_mask(&mut self, layer: LayerId, mask: Option<GrayImage>) {
        self.edit_layer(layer, |l| l.mask = mask.map(Mask::new));
    }

    pub fn set_mask_enabled(&mut self, layer: LayerId, enabled: bool) {
        if self.layer_ref(layer).mask.is_none() {
            warn!("Layer {} has no mask", self.layer_ref(layer).name);
            return;
        }
        self.edit_layer(layer, |l| {
            if let Some(m) = l.mask.as_mut() {
                m.enabled = enabled;
            }
        });
    }

    /// Deep copy placed just above the original, with history.
    pub fn duplicate_layer(&mut self, layer: LayerId) -> Result<LayerId, EditError> {
        let l = self.layers.get(&layer).ok_or(EditError::UnknownLayer(layer))?;
        let holder = l.holder;
        let comp = l.comp;
        let index = self.holder(holder).index_of(layer).ok_or(EditError::UnknownLayer(layer))?;
        let name = format!("{} copy", l.name);
        let copy = self.duplicate_detached(layer, comp, Some(&name));
        LayerAdder::new(holder)
            .at_index(index + 1)
            .with_history("Duplicate Layer")
            .add(self, copy);
        Ok(copy)
    }

    /// Deep copy of a layer subtree into `comp`, not placed anywhere yet.
    /// Embedded smart-object content is copied, linked content is shared.
    pub(crate) fn duplicate_detached(&mut self, layer: LayerId, comp: CompId, name: Option<&str>) -> LayerId {
        let src = self.layer_ref(layer);
        let name = name.map(str::to_string).unwrap_or_else(|| src.name.clone());

        enum Plan {
            Ready(LayerKind),
            Group(Vec<LayerId>),
            Smart(SmartObject),
        }
        let plan = match &src.kind {
            LayerKind::Image(img) => Plan::Ready(LayerKind::Image(img.clone())),
            LayerKind::Adjustment(adj) => {
                Plan::Ready(LayerKind::Adjustment(AdjustmentLayer { filter: adj.filter.copy() }))
            }
            LayerKind::Group(g) => Plan::Group(g.layers.clone()),
            LayerKind::SmartObject(so) => Plan::Smart(so.duplicate()),
        };

        let kind = match plan {
            Plan::Ready(kind) => kind,
            Plan::Group(children) => {
                let copies = children.into_iter().map(|c| self.duplicate_detached(c, comp, None)).collect();
                LayerKind::Group(LayerGroup::new(copies))
            }
            Plan::Smart(mut so) => {
                if so.linked.is_none() {
                    so.content = self.duplicate_comp(so.content);
                }
                LayerKind::SmartObject(so)
            }
        };

        let mut copy = Layer::new(comp, name, kind);
        self.layer_ref(layer).copy_blending_to(&mut copy);
        let src = self.layer_ref(layer);
        copy.tx = src.tx;
        copy.ty = src.ty;
        copy.mask = src.mask.clone();
        let id = self.insert_new(copy);

        if let Some(children) = self.layer_ref(id).as_group().map(|g| g.layers.clone()) {
            for child in children {
                self.set_layer_home(child, HolderId::Group(id), comp);
            }
        }
        if let Some(content) = self.layer_ref(id).as_smart_object().map(|so| so.content) {
            self.comp_mut(content).owners.push(id);
        }
        id
    }

    /// Deep copy of a composition as smart-object content. No history.
    pub(crate) fn duplicate_comp(&mut self, comp: CompId) -> CompId {
        let c = self.comp_ref(comp);
        let (name, (w, h)) = (c.name.clone(), c.canvas_size());
        let layers = c.layers.clone();
        let active_index = c.active.and_then(|a| layers.iter().position(|&l| l == a));

        let copy = self.new_content_comp(&name, w, h);
        for layer in layers {
            let dup = self.duplicate_detached(layer, copy, None);
            self.set_layer_home(dup, HolderId::Comp(copy), copy);
            self.comp_mut(copy).layers.push(dup);
        }
        let c = self.comp_mut(copy);
        c.active = active_index.and_then(|i| c.layers.get(i).copied()).or(c.layers.last().copied());
        copy
    }

    /// Drop layers and compositions that no document and no pending undo
    /// record can reach.
    pub fn purge_unreachable(&mut self) -> PurgeStats {
        let mut live_comps: HashSet<CompId> = HashSet::new();
        let mut live_layers: HashSet<LayerId> = HashSet::new();
        let mut comp_queue: Vec<CompId> = self.documents.clone();
        let mut layer_queue: Vec<LayerId> = Vec::new();

        while !comp_queue.is_empty() || !layer_queue.is_empty() {
            while let Some(comp) = comp_queue.pop() {
                if !live_comps.insert(comp) {
                    continue;
                }
                let Some(c) = self.comps.get(&comp) else {
                    continue;
                };
                layer_queue.extend(c.layers.iter().copied());
                layer_queue.extend(c.history.edits().flat_map(|e| e.kept_layers()));
            }
            while let Some(layer) = layer_queue.pop() {
                if !live_layers.insert(layer) {
                    continue;
                }
                let Some(l) = self.layers.get(&layer) else {
                    continue;
                };
                match &l.kind {
                    LayerKind::Group(g) => layer_queue.extend(g.layers.iter().copied()),
                    LayerKind::SmartObject(so) => comp_queue.push(so.content),
                    _ => {}
                }
                comp_queue.push(l.comp);
            }
        }

        let layers_before = self.layers.len();
        let comps_before = self.comps.len();
        self.layers.retain(|id, _| live_layers.contains(id));
        self.comps.retain(|id, _| live_comps.contains(id));
        for c in self.comps.values_mut() {
            c.owners.retain(|o| live_layers.contains(o));
        }
        self.missing_links.retain(|l| live_layers.contains(l));

        let stats = PurgeStats {
            layers: layers_before - self.layers.len(),
            comps: comps_before - self.comps.len(),
        };
        if stats != PurgeStats::default() {
            debug!("Purged {} layers and {} compositions", stats.layers, stats.comps);
        }
        stats
    }

    /// Indented outline of a composition's layer tree, top layer first.
    pub fn describe_tree(&self, comp: CompId) -> String {
        let mut out = String::new();
        let c = self.comp_ref(comp);
        let (w, h) = c.canvas_size();
        let _ = writeln!(out, "{} ({}x{})", c.name, w, h);
        self.describe_layers(&c.layers, 1, &mut out);
        out
    }

    fn describe_layers(&self, ids: &[LayerId], depth: usize, out: &mut String) {
        for &id in ids.iter().rev() {
            let l = self.layer_ref(id);
            let vis = if l.visible { ' ' } else { '-' };
            let _ = writeln!(
                out,
                "{}{}{} [{}, {}, {:.0}%]",
                "  ".repeat(depth),
                vis,
                l.name,
                l.kind.type_name(),
                l.blend_mode.display_name(),
                l.opacity * 100.0
            );
            match &l.kind {
                LayerKind::Group(g) => self.describe_layers(&g.layers, depth + 1, out),
                LayerKind::SmartObject(so) => {
                    if let Some(link) = &so.linked {
                        let _ = writeln!(out, "{}  -> {}", "  ".repeat(depth), link.path.display());
                    }
                    for filter in &so.filters {
                        let _ = writeln!(out, "{}  * {}", "  ".repeat(depth), filter.name());
                    }
                    let content = self.comp_ref(so.content);
                    self.describe_layers(&content.layers, depth + 1, out);
                }
                _ => {}
            }
        }
    }
}
