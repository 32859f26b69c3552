//! Layer groups.
//!
//! A group is a holder nested inside another holder. In pass-through mode
//! its children paint straight into the parent; in any other blend mode the
//! children are first flattened into a canvas-sized cached image, which is
//! then blended as one layer.

use std::cell::RefCell;

use log::trace;

use crate::config::{ISOLATED_THUMB_COLOR, PASS_THROUGH_THUMB_COLOR};

use super::cache::{CacheStats, CachedFrame};
use super::comp_events::IconInvalidatedEvent;
use super::compositor::BlendMode;
use super::frame::Frame;
use super::holder::LayerHolder;
use super::ids::LayerId;
use super::project::Project;

#[derive(Debug, Default)]
pub struct LayerGroup {
    pub(crate) layers: Vec<LayerId>,
    /// Flattened children; only ever filled in isolated mode.
    pub(crate) cache: CachedFrame,
    pub(crate) thumb: RefCell<Option<Frame>>,
}

impl LayerGroup {
    pub fn new(layers: Vec<LayerId>) -> Self {
        Self { layers, ..Self::default() }
    }

    pub fn has_cached_image(&self) -> bool {
        self.cache.is_cached()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub(crate) fn clear_caches(&self) {
        self.cache.invalidate();
        self.thumb.borrow_mut().take();
    }
}

impl LayerHolder for LayerGroup {
    fn layers(&self) -> &[LayerId] {
        &self.layers
    }

    fn layers_mut(&mut self) -> &mut Vec<LayerId> {
        &mut self.layers
    }

    fn allow_zero_layers(&self) -> bool {
        true
    }
}

impl Project {
    pub(crate) fn group_ref(&self, group: LayerId) -> &LayerGroup {
        self.layer_ref(group)
            .as_group()
            .unwrap_or_else(|| panic!("layer {group} is not a group"))
    }

    /// Children flattened on a canvas-sized image, cached. Isolated groups only.
    pub(crate) fn isolated_group_image(&self, group: LayerId) -> Frame {
        let layer = self.layer_ref(group);
        let g = self.group_ref(group);
        let size = self.comp_ref(layer.comp).canvas_size();
        g.cache.get_or_compute(|| {
            trace!("Recalculating cached image of group {}", layer.name);
            self.composite_layers(&g.layers, size)
        })
    }

    /// The group's content as a single image.
    ///
    /// Pass-through groups are rendered fresh each time; isolated ones come
    /// from the cache.
    pub fn group_image(&self, group: LayerId) -> Frame {
        let layer = self.layer_ref(group);
        if layer.blend_mode.is_pass_through() {
            let size = self.comp_ref(layer.comp).canvas_size();
            self.composite_layers(&self.group_ref(group).layers, size)
        } else {
            self.isolated_group_image(group)
        }
    }

    /// Layer-panel icon.
    ///
    /// Pass-through groups show a green disc, isolated groups without a
    /// cached image a blue one, otherwise a scaled-down cached image.
    pub fn group_thumbnail(&self, group: LayerId) -> Frame {
        let layer = self.layer_ref(group);
        let g = self.group_ref(group);
        if let Some(thumb) = g.thumb.borrow().as_ref() {
            return thumb.clone();
        }
        let size = self.settings.thumb_size;
        if layer.blend_mode.is_pass_through() {
            let thumb = Frame::circle(size, PASS_THROUGH_THUMB_COLOR);
            *g.thumb.borrow_mut() = Some(thumb.clone());
            return thumb;
        }
        match g.cache.peek() {
            Some(image) => {
                let thumb = image.thumbnail(size);
                *g.thumb.borrow_mut() = Some(thumb.clone());
                thumb
            }
            // Not memoized: the real thumbnail appears once the cache exists.
            None => Frame::circle(size, ISOLATED_THUMB_COLOR),
        }
    }

    /// Change a layer's blend mode.
    ///
    /// For groups, switching between pass-through and isolated drops the
    /// cached image and thumbnail; the isolated image is rebuilt lazily.
    pub fn set_blend_mode(&mut self, layer: LayerId, mode: BlendMode) {
        let l = self.layer_mut(layer);
        if l.blend_mode == mode {
            return;
        }
        if mode.is_pass_through() && !l.is_group() {
            log::warn!("Pass-through only applies to groups, ignoring for {}", l.name);
            return;
        }
        let was_pass_through = l.blend_mode.is_pass_through();
        l.blend_mode = mode;
        let holder = l.holder;
        let regime_changed = l.is_group() && was_pass_through != mode.is_pass_through();

        if regime_changed {
            self.group_ref(layer).clear_caches();
            self.events.emit(IconInvalidatedEvent(layer));
        }
        self.update(holder);
    }
}

#[cfg(test)]
mod tests {
    use crate::entities::comp_events::IconInvalidatedEvent;
    use crate::entities::compositor::BlendMode;
    use crate::entities::frame::Frame;
    use crate::entities::ids::HolderId;
    use crate::entities::project::Project;

    #[test]
    fn test_thumbnail_follows_regime_and_cache() {
        let mut p = Project::new();
        let comp = p.new_composition("doc", 8, 8);
        let a = p.add_image_layer(HolderId::Comp(comp), "a", Frame::filled(8, 8, [255, 0, 0, 255]));
        let g = p.convert_to_group(HolderId::Comp(comp), &[0]).unwrap();
        let size = p.settings().thumb_size;
        assert!(p.layer(a).is_some());

        let pass = p.group_thumbnail(g);
        assert_eq!(pass.pixel(size / 2, size / 2), [0, 138, 0, 255]);

        p.set_blend_mode(g, BlendMode::Normal);
        assert_eq!(p.events().take::<IconInvalidatedEvent>().last(), Some(&IconInvalidatedEvent(g)));
        let placeholder = p.group_thumbnail(g);
        assert_eq!(placeholder.pixel(size / 2, size / 2), [0, 0, 203, 255]);

        p.composite_image(comp);
        let real = p.group_thumbnail(g);
        assert_eq!(real.pixel(size / 2, size / 2), [255, 0, 0, 255]);
    }

    #[test]
    fn test_regime_switch_recalculates_lazily() {
        let mut p = Project::new();
        let comp = p.new_composition("doc", 4, 4);
        p.add_image_layer(HolderId::Comp(comp), "a", Frame::filled(4, 4, [0, 0, 255, 255]));
        let g = p.convert_to_group(HolderId::Comp(comp), &[0]).unwrap();

        p.composite_image(comp);
        assert!(!p.layer(g).unwrap().as_group().unwrap().has_cached_image());

        p.set_blend_mode(g, BlendMode::Multiply);
        assert!(!p.layer(g).unwrap().as_group().unwrap().has_cached_image());
        p.composite_image(comp);
        assert!(p.layer(g).unwrap().as_group().unwrap().has_cached_image());

        // Isolated to isolated keeps the children composite.
        p.set_blend_mode(g, BlendMode::Screen);
        assert!(p.layer(g).unwrap().as_group().unwrap().has_cached_image());
    }
}
