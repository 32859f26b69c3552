//! Built-in image filters.
//!
//! An [`Effect`] is a filter type plus its parameters in [`Attrs`]. Effects
//! implement [`Filter`], so the same value can drive an adjustment layer or
//! sit in a smart object's filter chain, and they serialize as-is into
//! document files.
//!
//! | Type | Parameters |
//! |------|------------|
//! | GaussianBlur | `radius: 0..100` |
//! | BrightnessContrast | `brightness: -1..1`, `contrast: -1..1` |
//! | AdjustHSV | `hue_shift: -180..180`, `saturation: 0..2`, `value: 0..2` |
//! | Invert | none |

pub mod blur;
pub mod brightness;
pub mod hsv;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::attrs::{AttrValue, Attrs};
use crate::entities::frame::Frame;
use crate::entities::traits::Filter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectType {
    GaussianBlur,
    BrightnessContrast,
    AdjustHSV,
    Invert,
}

impl EffectType {
    pub fn display_name(&self) -> &'static str {
        match self {
            EffectType::GaussianBlur => "Gaussian Blur",
            EffectType::BrightnessContrast => "Brightness/Contrast",
            EffectType::AdjustHSV => "Adjust HSV",
            EffectType::Invert => "Invert",
        }
    }

    pub fn all() -> &'static [EffectType] {
        &[
            EffectType::GaussianBlur,
            EffectType::BrightnessContrast,
            EffectType::AdjustHSV,
            EffectType::Invert,
        ]
    }

    fn default_attrs(&self) -> Attrs {
        match self {
            EffectType::GaussianBlur => Attrs::new().with("radius", AttrValue::Float(5.0)),
            EffectType::BrightnessContrast => Attrs::new()
                .with("brightness", AttrValue::Float(0.0))
                .with("contrast", AttrValue::Float(0.0)),
            EffectType::AdjustHSV => Attrs::new()
                .with("hue_shift", AttrValue::Float(0.0))
                .with("saturation", AttrValue::Float(1.0))
                .with("value", AttrValue::Float(1.0)),
            EffectType::Invert => Attrs::new(),
        }
    }
}

/// Filter instance: type, parameters and enabled state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Effect {
    #[serde(default = "Uuid::new_v4")]
    pub uuid: Uuid,
    pub effect_type: EffectType,
    #[serde(default)]
    pub attrs: Attrs,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl Effect {
    /// New effect with default parameters.
    pub fn new(effect_type: EffectType) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            effect_type,
            attrs: effect_type.default_attrs(),
            enabled: true,
        }
    }

    pub fn with_param(mut self, key: &str, value: f32) -> Self {
        self.attrs.set(key, AttrValue::Float(value));
        self
    }

    pub fn boxed(self) -> Box<dyn Filter> {
        Box::new(self)
    }
}

/// Apply an effect, returning a new frame. Disabled effects pass through.
pub fn apply(frame: &Frame, effect: &Effect) -> Frame {
    if !effect.enabled {
        return frame.clone();
    }
    match effect.effect_type {
        EffectType::GaussianBlur => blur::apply(frame, &effect.attrs),
        EffectType::BrightnessContrast => brightness::apply(frame, &effect.attrs),
        EffectType::AdjustHSV => hsv::apply(frame, &effect.attrs),
        EffectType::Invert => invert(frame),
    }
}

fn invert(frame: &Frame) -> Frame {
    let mut out = frame.clone();
    for px in out.image_mut().pixels_mut() {
        px.0[0] = 255 - px.0[0];
        px.0[1] = 255 - px.0[1];
        px.0[2] = 255 - px.0[2];
    }
    out
}

impl Filter for Effect {
    fn name(&self) -> &str {
        self.effect_type.display_name()
    }

    fn transform_image(&self, src: &Frame) -> Frame {
        apply(src, self)
    }

    fn copy(&self) -> Box<dyn Filter> {
        Box::new(Effect { uuid: Uuid::new_v4(), ..self.clone() })
    }

    fn copy_state(&self) -> Option<Attrs> {
        Some(self.attrs.clone())
    }

    fn set_state(&mut self, state: &Attrs) {
        self.attrs = state.clone();
    }

    fn as_effect(&self) -> Option<&Effect> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invert_keeps_alpha() {
        let f = Frame::filled(2, 2, [10, 200, 0, 77]);
        let out = apply(&f, &Effect::new(EffectType::Invert));
        assert_eq!(out.pixel(1, 1), [245, 55, 255, 77]);
        assert_eq!(f.pixel(1, 1), [10, 200, 0, 77]);
    }

    #[test]
    fn test_disabled_passthrough() {
        let f = Frame::filled(2, 2, [10, 200, 0, 255]);
        let mut fx = Effect::new(EffectType::Invert);
        fx.enabled = false;
        assert!(apply(&f, &fx).same_pixels(&f));
    }

    #[test]
    fn test_state_roundtrip_through_filter_trait() {
        let mut fx = Effect::new(EffectType::GaussianBlur).with_param("radius", 3.0);
        let saved = fx.copy_state().unwrap();
        fx.attrs.set("radius", AttrValue::Float(9.0));
        fx.set_state(&saved);
        assert_eq!(fx.attrs.get_float("radius"), Some(3.0));
    }

    #[test]
    fn test_copy_is_independent() {
        let fx = Effect::new(EffectType::BrightnessContrast).with_param("brightness", 0.2);
        let copy = fx.copy();
        assert_eq!(copy.name(), "Brightness/Contrast");
        let copied = copy.as_effect().unwrap();
        assert_ne!(copied.uuid, fx.uuid);
        assert_eq!(copied.attrs, fx.attrs);
    }
}
