//! Layer record and its variants.
//!
//! A [`Layer`] carries the attributes every layer has (name, visibility,
//! opacity, blend mode, mask, translation) plus back-references to its
//! holder and composition. What it paints is decided by [`LayerKind`].

use image::GrayImage;

use super::compositor::BlendMode;
use super::frame::Frame;
use super::group::LayerGroup;
use super::ids::{CompId, HolderId, LayerId};
use super::smart_object::SmartObject;
use super::traits::Filter;

/// Grayscale layer mask in layer space. 255 paints, 0 hides.
#[derive(Clone, Debug)]
pub struct Mask {
    pub image: GrayImage,
    pub enabled: bool,
}

impl Mask {
    pub fn new(image: GrayImage) -> Self {
        Self { image, enabled: true }
    }
}

#[derive(Debug, Clone)]
pub struct ImageLayer {
    pub image: Frame,
}

#[derive(Debug)]
pub struct AdjustmentLayer {
    pub filter: Box<dyn Filter>,
}

#[derive(Debug)]
pub enum LayerKind {
    Image(ImageLayer),
    Adjustment(AdjustmentLayer),
    Group(LayerGroup),
    SmartObject(SmartObject),
}

impl LayerKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            LayerKind::Image(_) => "image",
            LayerKind::Adjustment(_) => "adjustment",
            LayerKind::Group(_) => "group",
            LayerKind::SmartObject(_) => "smart object",
        }
    }
}

#[derive(Debug)]
pub struct Layer {
    pub(crate) id: LayerId,
    pub name: String,
    pub(crate) visible: bool,
    pub(crate) opacity: f32,
    pub(crate) blend_mode: BlendMode,
    pub(crate) mask: Option<Mask>,
    pub(crate) tx: i32,
    pub(crate) ty: i32,
    pub(crate) holder: HolderId,
    pub(crate) comp: CompId,
    pub(crate) kind: LayerKind,
}

impl Layer {
    /// Detached layer owned by `comp`; the holder is fixed up on insertion.
    pub(crate) fn new(comp: CompId, name: impl Into<String>, kind: LayerKind) -> Self {
        let blend_mode = match kind {
            LayerKind::Group(_) => BlendMode::PassThrough,
            _ => BlendMode::Normal,
        };
        Self {
            id: LayerId::new(),
            name: name.into(),
            visible: true,
            opacity: 1.0,
            blend_mode,
            mask: None,
            tx: 0,
            ty: 0,
            holder: HolderId::Comp(comp),
            comp,
            kind,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    pub fn mask(&self) -> Option<&Mask> {
        self.mask.as_ref()
    }

    pub fn translation(&self) -> (i32, i32) {
        (self.tx, self.ty)
    }

    pub fn holder(&self) -> HolderId {
        self.holder
    }

    pub fn comp(&self) -> CompId {
        self.comp
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    /// Directly inside a composition, not nested in a group.
    pub fn is_top_level(&self) -> bool {
        self.holder.is_comp()
    }

    /// Plain raster layer. Subclass-like variants (smart objects) do not count.
    pub fn is_image(&self) -> bool {
        matches!(self.kind, LayerKind::Image(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, LayerKind::Group(_))
    }

    pub fn is_smart_object(&self) -> bool {
        matches!(self.kind, LayerKind::SmartObject(_))
    }

    /// Group in pass-through mode.
    pub fn is_pass_through(&self) -> bool {
        self.is_group() && self.blend_mode.is_pass_through()
    }

    pub fn as_image(&self) -> Option<&ImageLayer> {
        match &self.kind {
            LayerKind::Image(img) => Some(img),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&LayerGroup> {
        match &self.kind {
            LayerKind::Group(g) => Some(g),
            _ => None,
        }
    }

    pub(crate) fn as_group_mut(&mut self) -> Option<&mut LayerGroup> {
        match &mut self.kind {
            LayerKind::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_smart_object(&self) -> Option<&SmartObject> {
        match &self.kind {
            LayerKind::SmartObject(so) => Some(so),
            _ => None,
        }
    }

    pub(crate) fn as_smart_object_mut(&mut self) -> Option<&mut SmartObject> {
        match &mut self.kind {
            LayerKind::SmartObject(so) => Some(so),
            _ => None,
        }
    }

    /// Copy the blending-related attributes onto `other`.
    pub(crate) fn copy_blending_to(&self, other: &mut Layer) {
        other.visible = self.visible;
        other.opacity = self.opacity;
        // Pass-through only makes sense for groups.
        if other.is_group() || !self.blend_mode.is_pass_through() {
            other.blend_mode = self.blend_mode;
        }
    }
}
