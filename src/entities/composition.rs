//! Compositions and layer rendering.
//!
//! A [`Composition`] is a document root: canvas size, top-level layers
//! (index 0 paints first), the active layer and the undo history. When it
//! serves as the content of one or more smart objects, `owners` lists them.
//!
//! Rendering walks the layer tree with `&self` and fills caches on the way:
//! the composition composite, isolated group images and smart-object images.

use std::path::{Path, PathBuf};

use log::{trace, warn};
use serde::{Deserialize, Serialize};

use crate::core::history::History;

use super::cache::{CacheStats, CachedFrame};
use super::compositor::{self, MaskRef};
use super::frame::Frame;
use super::holder::LayerHolder;
use super::ids::{CompId, LayerId};
use super::layer::LayerKind;
use super::project::Project;

/// How masks are displayed while editing. Only recorded and restored here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskViewMode {
    #[default]
    Normal,
    ShowMask,
    EditMask,
    Ruby,
}

#[derive(Debug)]
pub struct Composition {
    pub(crate) id: CompId,
    pub name: String,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) layers: Vec<LayerId>,
    pub(crate) active: Option<LayerId>,
    /// Smart objects using this composition as content.
    pub(crate) owners: Vec<LayerId>,
    pub(crate) history: History,
    pub(crate) dirty: bool,
    pub(crate) composite: CachedFrame,
    pub(crate) mask_view_mode: MaskViewMode,
    pub(crate) file: Option<PathBuf>,
}

impl Composition {
    pub(crate) fn new(name: impl Into<String>, width: u32, height: u32, max_undo: usize) -> Self {
        Self {
            id: CompId::new(),
            name: name.into(),
            width,
            height,
            layers: Vec::new(),
            active: None,
            owners: Vec::new(),
            history: History::new(max_undo),
            dirty: false,
            composite: CachedFrame::new(),
            mask_view_mode: MaskViewMode::Normal,
            file: None,
        }
    }

    pub fn id(&self) -> CompId {
        self.id
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn active_layer(&self) -> Option<LayerId> {
        self.active
    }

    pub fn owners(&self) -> &[LayerId] {
        &self.owners
    }

    pub fn is_smart_object_content(&self) -> bool {
        !self.owners.is_empty()
    }

    /// Has unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn mask_view_mode(&self) -> MaskViewMode {
        self.mask_view_mode
    }

    pub fn set_mask_view_mode(&mut self, mode: MaskViewMode) {
        self.mask_view_mode = mode;
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn composite_stats(&self) -> CacheStats {
        self.composite.stats()
    }
}

impl LayerHolder for Composition {
    fn layers(&self) -> &[LayerId] {
        &self.layers
    }

    fn layers_mut(&mut self) -> &mut Vec<LayerId> {
        &mut self.layers
    }

    fn allow_zero_layers(&self) -> bool {
        false
    }
}

impl Project {
    /// Flattened image of a composition, cached until the next change.
    pub fn composite_image(&self, comp: CompId) -> Frame {
        let c = self.comp_ref(comp);
        if self.compose_stack.borrow().contains(&comp) {
            warn!("Composition {} contains itself, rendering it empty", c.name);
            return Frame::transparent(c.width, c.height);
        }
        c.composite.get_or_compute(|| {
            trace!("Compositing {} ({} layers)", c.name, c.layers.len());
            self.compose_stack.borrow_mut().push(comp);
            let frame = self.composite_layers(&c.layers, c.canvas_size());
            self.compose_stack.borrow_mut().pop();
            frame
        })
    }

    /// Paint the visible layers of `ids`, bottom first, on a transparent canvas.
    pub(crate) fn composite_layers(&self, ids: &[LayerId], (w, h): (u32, u32)) -> Frame {
        let mut canvas = Frame::transparent(w, h);
        for &id in ids {
            if self.layer_ref(id).visible {
                self.apply_layer(id, &mut canvas, (0, 0));
            }
        }
        canvas
    }

    /// Paint one layer onto `dst`, whose top-left sits at `origin` in canvas space.
    pub(crate) fn apply_layer(&self, id: LayerId, dst: &mut Frame, origin: (i32, i32)) {
        let layer = self.layer_ref(id);
        let offset = (layer.tx - origin.0, layer.ty - origin.1);
        let mask = layer
            .mask
            .as_ref()
            .filter(|m| m.enabled)
            .map(|m| MaskRef { image: &m.image, offset });

        match &layer.kind {
            LayerKind::Image(img) => {
                compositor::blend_onto(dst, &img.image, offset, layer.opacity, layer.blend_mode, mask);
            }
            LayerKind::SmartObject(_) => {
                let image = self.smart_object_image(id);
                compositor::blend_onto(dst, &image, offset, layer.opacity, layer.blend_mode, mask);
            }
            LayerKind::Adjustment(adj) => {
                let derived = adj.filter.transform_image(dst);
                compositor::apply_derived(dst, &derived, layer.opacity, mask);
            }
            LayerKind::Group(group) => {
                if layer.blend_mode.is_pass_through() {
                    // Children blend straight into the parent, so adjustment
                    // layers inside see everything below the group.
                    for &child in group.layers() {
                        if self.layer_ref(child).visible {
                            self.apply_layer(child, dst, origin);
                        }
                    }
                } else {
                    let image = self.isolated_group_image(id);
                    let at = (-origin.0, -origin.1);
                    compositor::blend_onto(dst, &image, at, layer.opacity, layer.blend_mode, mask);
                }
            }
        }
    }
}
