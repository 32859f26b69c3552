//! Document files.
//!
//! A document is a JSON [`CompDesc`]: canvas size plus the layer tree,
//! bottom layer first. Embedded smart-object content is nested inline;
//! linked content is stored as a path only, relative paths resolving
//! against the directory of the file that mentions them.
//!
//! ```json
//! {
//!   "name": "poster", "width": 800, "height": 600,
//!   "layers": [
//!     { "name": "bg", "type": "image", "source": { "kind": "fill", "width": 800, "height": 600, "color": [255, 255, 255, 255] } },
//!     { "name": "logo", "type": "smart_object", "linked": "logo.json", "filters": [] }
//!   ]
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use image::GrayImage;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::compositor::BlendMode;
use super::effects::Effect;
use super::frame::Frame;
use super::ids::{CompId, HolderId, LayerId};
use super::layer::{LayerKind, Mask};
use super::project::Project;
use super::smart_object::LinkedContent;
use super::traits::CompLoader;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompDesc {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Bottom first.
    #[serde(default)]
    pub layers: Vec<LayerDesc>,
}

impl CompDesc {
    pub fn new(name: &str, width: u32, height: u32) -> Self {
        Self { name: name.to_string(), width, height, layers: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerDesc {
    pub name: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    /// Kind default when absent: pass-through for groups, normal otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blend_mode: Option<BlendMode>,
    #[serde(default)]
    pub tx: i32,
    #[serde(default)]
    pub ty: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<MaskDesc>,
    #[serde(flatten)]
    pub kind: LayerKindDesc,
}

fn default_visible() -> bool {
    true
}

fn default_opacity() -> f32 {
    1.0
}

impl LayerDesc {
    pub fn new(name: &str, kind: LayerKindDesc) -> Self {
        Self {
            name: name.to_string(),
            visible: true,
            opacity: 1.0,
            blend_mode: None,
            tx: 0,
            ty: 0,
            mask: None,
            kind,
        }
    }

    /// Solid color image layer.
    pub fn fill(name: &str, width: u32, height: u32, color: [u8; 4]) -> Self {
        Self::new(name, LayerKindDesc::Image { source: RasterSource::Fill { width, height, color } })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerKindDesc {
    Image {
        source: RasterSource,
    },
    Adjustment {
        effect: Effect,
    },
    Group {
        #[serde(default)]
        layers: Vec<LayerDesc>,
    },
    SmartObject {
        /// Embedded content; absent for linked smart objects.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Box<CompDesc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        linked: Option<PathBuf>,
        #[serde(default)]
        filters: Vec<Effect>,
        #[serde(default = "default_visible")]
        filters_visible: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RasterSource {
    Fill { width: u32, height: u32, color: [u8; 4] },
    /// Any format the image crate decodes.
    File { path: PathBuf },
    /// Tightly packed RGBA8.
    Pixels { width: u32, height: u32, rgba: Vec<u8> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskDesc {
    pub width: u32,
    pub height: u32,
    pub luma: Vec<u8>,
    #[serde(default = "default_visible")]
    pub enabled: bool,
}

/// Reads [`CompDesc`] JSON files.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCompLoader;

impl CompLoader for JsonCompLoader {
    fn load(&self, path: &Path) -> anyhow::Result<CompDesc> {
        let json = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

fn resolve(base_dir: Option<&Path>, path: &Path) -> PathBuf {
    match base_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn load_raster(source: &RasterSource, base_dir: Option<&Path>) -> anyhow::Result<Frame> {
    match source {
        RasterSource::Fill { width, height, color } => {
            if *width == 0 || *height == 0 {
                bail!("fill of zero size");
            }
            Ok(Frame::filled(*width, *height, *color))
        }
        RasterSource::File { path } => Frame::load(&resolve(base_dir, path)),
        RasterSource::Pixels { width, height, rgba } => Ok(Frame::from_raw(*width, *height, rgba.clone())?),
    }
}

impl Project {
    /// Open a document file as a new top-level composition.
    pub fn open_document(&mut self, path: &Path) -> anyhow::Result<CompId> {
        let desc = self.loader.load(path)?;
        let comp = self.instantiate_file(&desc, path)?;
        self.documents.push(comp);
        self.comp_mut(comp).file = Some(path.to_path_buf());
        info!("Opened {} ({} layers)", path.display(), desc.layers.len());
        if !self.missing_links.is_empty() {
            warn!("{} linked files of {} are missing", self.missing_links.len(), path.display());
        }
        Ok(comp)
    }

    /// Write a composition to `path` and mark it clean.
    pub fn save_document(&mut self, comp: CompId, path: &Path) -> anyhow::Result<()> {
        let desc = self.to_desc(comp);
        let json = serde_json::to_string_pretty(&desc).context("Failed to serialize document")?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        let c = self.comp_mut(comp);
        c.file = Some(path.to_path_buf());
        c.dirty = false;
        info!("Saved {}", path.display());
        Ok(())
    }

    /// Build a composition (not registered as a document) from a description.
    pub(crate) fn instantiate_comp(&mut self, desc: &CompDesc, base_dir: Option<&Path>) -> anyhow::Result<CompId> {
        self.build_comp(desc, base_dir, &mut Vec::new())
    }

    /// Same as [`Project::instantiate_comp`] for a description read from
    /// `path`. Links leading back to `path` are not followed.
    pub(crate) fn instantiate_file(&mut self, desc: &CompDesc, path: &Path) -> anyhow::Result<CompId> {
        let mut chain = vec![canonical(path)];
        self.build_comp(desc, path.parent(), &mut chain)
    }

    /// `chain` holds the linked files being built, outermost first.
    fn build_comp(&mut self, desc: &CompDesc, base_dir: Option<&Path>, chain: &mut Vec<PathBuf>) -> anyhow::Result<CompId> {
        if desc.width == 0 || desc.height == 0 {
            bail!("composition {} has zero size", desc.name);
        }
        let comp = self.new_content_comp(&desc.name, desc.width, desc.height);
        for ld in &desc.layers {
            let id = self.instantiate_layer(ld, comp, base_dir, chain)?;
            self.insert_layer(HolderId::Comp(comp), id, usize::MAX, false);
        }
        let c = self.comp_mut(comp);
        c.active = c.layers.last().copied();
        c.dirty = false;
        Ok(comp)
    }

    fn instantiate_layer(
        &mut self,
        ld: &LayerDesc,
        comp: CompId,
        base_dir: Option<&Path>,
        chain: &mut Vec<PathBuf>,
    ) -> anyhow::Result<LayerId> {
        let id = match &ld.kind {
            LayerKindDesc::Image { source } => {
                let image = load_raster(source, base_dir).with_context(|| format!("Layer {}", ld.name))?;
                self.create_image_layer(comp, &ld.name, image)
            }
            LayerKindDesc::Adjustment { effect } => self.create_adjustment_layer(comp, &ld.name, effect.clone().boxed()),
            LayerKindDesc::Group { layers } => {
                let children = layers
                    .iter()
                    .map(|child| self.instantiate_layer(child, comp, base_dir, chain))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                self.create_group(comp, &ld.name, children)
            }
            LayerKindDesc::SmartObject { content, linked, filters, filters_visible } => {
                let mut missing = false;
                let (content_id, link) = match (linked, content) {
                    (Some(path), _) => {
                        let path = resolve(base_dir, path);
                        let key = canonical(&path);
                        if path.exists() && !chain.contains(&key) {
                            let desc = self.loader.load(&path)?;
                            chain.push(key);
                            let content = self.build_comp(&desc, path.parent(), chain);
                            chain.pop();
                            (content?, Some(LinkedContent::new(path)))
                        } else {
                            if path.exists() {
                                warn!("Linked file {} links back to itself, using transparent content", path.display());
                            } else {
                                warn!("Linked file {} not found, using transparent content", path.display());
                            }
                            missing = true;
                            let (w, h) = self.comp_ref(comp).canvas_size();
                            let content = self.new_content_comp(&ld.name, w, h);
                            let modified = std::time::SystemTime::UNIX_EPOCH;
                            (content, Some(LinkedContent { path, modified }))
                        }
                    }
                    (None, Some(desc)) => (self.build_comp(desc, base_dir, chain)?, None),
                    (None, None) => bail!("smart object {} has neither content nor a linked file", ld.name),
                };
                let id = self.create_smart_object(comp, &ld.name, content_id);
                if let Some(so) = self.layer_mut(id).as_smart_object_mut() {
                    so.linked = link;
                    so.filters = filters.iter().map(|f| f.clone().boxed()).collect();
                    so.filters_visible = *filters_visible;
                }
                if missing {
                    self.missing_links.push(id);
                }
                id
            }
        };

        let l = self.layer_mut(id);
        l.visible = ld.visible;
        l.opacity = ld.opacity.clamp(0.0, 1.0);
        if l.is_group() {
            if (ld.tx, ld.ty) != (0, 0) {
                warn!("Ignoring translation of group {}", ld.name);
            }
        } else {
            l.tx = ld.tx;
            l.ty = ld.ty;
        }
        if let Some(mode) = ld.blend_mode {
            if mode.is_pass_through() && !l.is_group() {
                warn!("Ignoring pass-through blend mode on non-group layer {}", ld.name);
            } else {
                l.blend_mode = mode;
            }
        }
        if let Some(m) = &ld.mask {
            let image = GrayImage::from_raw(m.width, m.height, m.luma.clone())
                .with_context(|| format!("Mask of layer {} has the wrong size", ld.name))?;
            l.mask = Some(Mask { image, enabled: m.enabled });
        }
        Ok(id)
    }

    /// Description of a composition as it would be saved.
    pub fn to_desc(&self, comp: CompId) -> CompDesc {
        let c = self.comp_ref(comp);
        let (width, height) = c.canvas_size();
        CompDesc {
            name: c.name.clone(),
            width,
            height,
            layers: c.layers.iter().filter_map(|&id| self.layer_desc(id)).collect(),
        }
    }

    /// Single-layer description holding the rendered composite.
    pub fn flattened_desc(&self, comp: CompId) -> CompDesc {
        let c = self.comp_ref(comp);
        let (width, height) = c.canvas_size();
        let rgba = self.composite_image(comp).into_image().into_raw();
        let mut desc = CompDesc::new(&c.name, width, height);
        desc.layers.push(LayerDesc::new(
            "flattened",
            LayerKindDesc::Image { source: RasterSource::Pixels { width, height, rgba } },
        ));
        desc
    }

    /// `None` for layers that cannot be saved.
    fn layer_desc(&self, id: LayerId) -> Option<LayerDesc> {
        let l = self.layer_ref(id);
        let kind = match &l.kind {
            LayerKind::Image(img) => {
                let (width, height) = img.image.resolution();
                let rgba = img.image.image().as_raw().clone();
                LayerKindDesc::Image { source: RasterSource::Pixels { width, height, rgba } }
            }
            LayerKind::Adjustment(adj) => match adj.filter.as_effect() {
                Some(effect) => LayerKindDesc::Adjustment { effect: effect.clone() },
                None => {
                    warn!("Filter {} of layer {} cannot be saved, skipping the layer", adj.filter.name(), l.name);
                    return None;
                }
            },
            LayerKind::Group(g) => LayerKindDesc::Group {
                layers: g.layers.iter().filter_map(|&child| self.layer_desc(child)).collect(),
            },
            LayerKind::SmartObject(so) => {
                let linked = so.linked.as_ref().map(|link| link.path.clone());
                let content = match linked {
                    Some(_) => None,
                    None => Some(Box::new(self.to_desc(so.content))),
                };
                let filters = so
                    .filters
                    .iter()
                    .filter_map(|f| {
                        let effect = f.as_effect().cloned();
                        if effect.is_none() {
                            warn!("Smart filter {} of {} cannot be saved", f.name(), l.name);
                        }
                        effect
                    })
                    .collect();
                LayerKindDesc::SmartObject { content, linked, filters, filters_visible: so.filters_visible }
            }
        };
        let mask = l.mask.as_ref().map(|m| MaskDesc {
            width: m.image.width(),
            height: m.image.height(),
            luma: m.image.as_raw().clone(),
            enabled: m.enabled,
        });
        Some(LayerDesc {
            name: l.name.clone(),
            visible: l.visible,
            opacity: l.opacity,
            blend_mode: Some(l.blend_mode),
            tx: l.tx,
            ty: l.ty,
            mask,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::entities::effects::EffectType;
    use crate::entities::traits::AutoPrompter;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("strata-io-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn inline_project() -> Project {
        Project::with_settings(Settings { worker_threads: 0, ..Settings::default() })
    }

    #[test]
    fn test_parse_handwritten_document() {
        let json = r#"{
            "name": "poster", "width": 4, "height": 4,
            "layers": [
                { "name": "bg", "type": "image",
                  "source": { "kind": "fill", "width": 4, "height": 4, "color": [0, 0, 0, 255] } },
                { "name": "fx", "type": "group", "blend_mode": "normal", "opacity": 0.5,
                  "layers": [
                    { "name": "dot", "type": "image", "tx": 1, "ty": 1,
                      "source": { "kind": "pixels", "width": 1, "height": 1, "rgba": [255, 255, 255, 255] } }
                  ] },
                { "name": "inv", "type": "adjustment", "visible": false,
                  "effect": { "effect_type": "Invert" } }
            ]
        }"#;
        let desc: CompDesc = serde_json::from_str(json).unwrap();
        let mut p = inline_project();
        let comp = p.instantiate_comp(&desc, None).unwrap();
        let root = HolderId::Comp(comp);
        let ids = p.holder_layers(root).to_vec();
        assert_eq!(ids.len(), 3);
        assert!(p.layer(ids[1]).unwrap().is_group());
        assert_eq!(p.layer(ids[1]).unwrap().blend_mode(), BlendMode::Normal);
        assert!(!p.layer(ids[2]).unwrap().is_visible());
        assert_eq!(p.composition(comp).unwrap().active_layer(), Some(ids[2]));
        p.check_invariants(comp);

        let img = p.composite_image(comp);
        assert_eq!(img.pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(img.pixel(1, 1), [128, 128, 128, 255]);
    }

    #[test]
    fn test_save_and_reopen_renders_the_same() {
        let dir = temp_dir();
        let mut p = inline_project();
        let comp = p.new_composition("doc", 3, 3);
        let root = HolderId::Comp(comp);
        p.add_image_layer(root, "bg", Frame::filled(3, 3, [10, 20, 30, 255]));
        let top = p.add_image_layer(root, "top", Frame::filled(2, 2, [200, 0, 0, 255]));
        p.set_translation(top, 1, 1);
        let mut mask = GrayImage::new(2, 2);
        mask.put_pixel(0, 0, image::Luma([255]));
        p.set_mask(top, Some(mask));
        let so = p.convert_to_smart_object(top).unwrap();
        p.add_smart_filter(so, Effect::new(EffectType::Invert).boxed()).unwrap();
        let g = p.convert_to_group(root, &[0]).unwrap();
        p.set_blend_mode(g, BlendMode::Multiply);
        let expected = p.composite_image(comp);

        let path = dir.join("doc.json");
        p.save_document(comp, &path).unwrap();
        assert!(!p.composition(comp).unwrap().is_dirty());

        let mut q = inline_project();
        let reopened = q.open_document(&path).unwrap();
        assert_eq!(q.documents(), &[reopened]);
        assert_eq!(q.composition(reopened).unwrap().file(), Some(path.as_path()));
        assert!(q.composite_image(reopened).same_pixels(&expected));
        q.check_invariants(reopened);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_flattened_desc_renders_the_same() {
        let mut p = inline_project();
        let comp = p.new_composition("doc", 2, 2);
        let root = HolderId::Comp(comp);
        p.add_image_layer(root, "bg", Frame::filled(2, 2, [0, 0, 0, 255]));
        let top = p.add_image_layer(root, "top", Frame::filled(1, 2, [255, 255, 255, 255]));
        p.set_opacity(top, 0.5);
        let expected = p.composite_image(comp);

        let flat = p.flattened_desc(comp);
        assert_eq!(flat.layers.len(), 1);
        let flat_comp = p.instantiate_comp(&flat, None).unwrap();
        assert!(p.composite_image(flat_comp).same_pixels(&expected));
    }

    #[test]
    fn test_linked_content_saved_as_path_only() {
        let dir = temp_dir();
        let mut content = CompDesc::new("logo", 2, 2);
        content.layers.push(LayerDesc::fill("px", 2, 2, [0, 0, 255, 255]));
        fs::write(dir.join("logo.json"), serde_json::to_string(&content).unwrap()).unwrap();

        let mut doc = CompDesc::new("doc", 2, 2);
        doc.layers.push(LayerDesc::new(
            "logo",
            LayerKindDesc::SmartObject {
                content: None,
                linked: Some(PathBuf::from("logo.json")),
                filters: Vec::new(),
                filters_visible: true,
            },
        ));
        let doc_path = dir.join("doc.json");
        fs::write(&doc_path, serde_json::to_string(&doc).unwrap()).unwrap();

        let mut p = inline_project();
        let comp = p.open_document(&doc_path).unwrap();
        assert!(p.missing_links().is_empty());
        assert_eq!(p.composite_image(comp).pixel(0, 0), [0, 0, 255, 255]);

        let desc = p.to_desc(comp);
        match &desc.layers[0].kind {
            LayerKindDesc::SmartObject { content, linked, .. } => {
                assert!(content.is_none());
                assert_eq!(linked.as_deref(), Some(dir.join("logo.json").as_path()));
            }
            other => panic!("unexpected {other:?}"),
        }
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_link_uses_placeholder_then_resolves() {
        let dir = temp_dir();
        let mut doc = CompDesc::new("doc", 2, 2);
        doc.layers.push(LayerDesc::new(
            "logo",
            LayerKindDesc::SmartObject {
                content: None,
                linked: Some(PathBuf::from("gone/logo.json")),
                filters: Vec::new(),
                filters_visible: true,
            },
        ));
        let doc_path = dir.join("doc.json");
        fs::write(&doc_path, serde_json::to_string(&doc).unwrap()).unwrap();

        let mut p = inline_project();
        let comp = p.open_document(&doc_path).unwrap();
        assert_eq!(p.missing_links().len(), 1);
        assert_eq!(p.composite_image(comp).pixel(0, 0), [0, 0, 0, 0]);

        let mut content = CompDesc::new("logo", 2, 2);
        content.layers.push(LayerDesc::fill("px", 2, 2, [0, 255, 0, 255]));
        fs::write(dir.join("logo.json"), serde_json::to_string(&content).unwrap()).unwrap();

        let mut prompter = AutoPrompter { search_dir: Some(dir.clone()), ..AutoPrompter::no() };
        let tickets = p.resolve_missing_links(&mut prompter);
        assert_eq!(tickets.len(), 1);
        assert_eq!(p.apply_pending_reloads(), 1);
        assert!(p.missing_links().is_empty());
        assert_eq!(p.composite_image(comp).pixel(0, 0), [0, 255, 0, 255]);
        let _ = fs::remove_dir_all(&dir);
    }

    fn linked_layer(name: &str, path: &str) -> LayerDesc {
        LayerDesc::new(
            name,
            LayerKindDesc::SmartObject {
                content: None,
                linked: Some(PathBuf::from(path)),
                filters: Vec::new(),
                filters_visible: true,
            },
        )
    }

    #[test]
    fn test_self_linked_document_gets_placeholder() {
        let dir = temp_dir();
        let mut doc = CompDesc::new("self", 2, 2);
        doc.layers.push(LayerDesc::fill("bg", 2, 2, [9, 9, 9, 255]));
        doc.layers.push(linked_layer("me", "self.json"));
        let doc_path = dir.join("self.json");
        fs::write(&doc_path, serde_json::to_string(&doc).unwrap()).unwrap();

        let mut p = inline_project();
        let comp = p.open_document(&doc_path).unwrap();
        assert_eq!(p.missing_links().len(), 1);
        assert_eq!(p.composite_image(comp).pixel(0, 0), [9, 9, 9, 255]);
        p.check_invariants(comp);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_link_cycle_between_two_files_stops() {
        let dir = temp_dir();
        let mut a = CompDesc::new("a", 2, 2);
        a.layers.push(LayerDesc::fill("red", 2, 2, [255, 0, 0, 255]));
        a.layers.push(linked_layer("b", "b.json"));
        let mut b = CompDesc::new("b", 2, 2);
        b.layers.push(LayerDesc::fill("blue", 2, 2, [0, 0, 255, 255]));
        b.layers.push(linked_layer("a", "a.json"));
        fs::write(dir.join("a.json"), serde_json::to_string(&a).unwrap()).unwrap();
        fs::write(dir.join("b.json"), serde_json::to_string(&b).unwrap()).unwrap();

        let mut p = inline_project();
        let comp = p.open_document(&dir.join("a.json")).unwrap();
        // Only the link from b back to a is cut.
        assert_eq!(p.missing_links().len(), 1);
        assert_eq!(p.composite_image(comp).pixel(1, 1), [0, 0, 255, 255]);
        p.check_invariants(comp);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_link_given_up_drops_link() {
        let mut doc = CompDesc::new("doc", 2, 2);
        doc.layers.push(LayerDesc::new(
            "logo",
            LayerKindDesc::SmartObject {
                content: None,
                linked: Some(PathBuf::from("/nonexistent/strata/logo.json")),
                filters: Vec::new(),
                filters_visible: true,
            },
        ));
        let mut p = inline_project();
        let comp = p.instantiate_comp(&doc, None).unwrap();
        let so = p.holder_layers(HolderId::Comp(comp))[0];
        assert!(p.resolve_missing_links(&mut AutoPrompter::no()).is_empty());
        assert!(!p.layer(so).unwrap().as_smart_object().unwrap().is_linked());
    }

    #[test]
    fn test_bad_input_is_an_error() {
        let mut p = inline_project();
        let mut doc = CompDesc::new("doc", 2, 2);
        doc.layers.push(LayerDesc::new(
            "px",
            LayerKindDesc::Image { source: RasterSource::Pixels { width: 2, height: 2, rgba: vec![0; 3] } },
        ));
        assert!(p.instantiate_comp(&doc, None).is_err());
        assert!(p.instantiate_comp(&CompDesc::new("empty", 0, 5), None).is_err());
        assert!(p.open_document(Path::new("/nonexistent/strata.json")).is_err());
    }
}
