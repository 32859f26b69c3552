//! Typed key/value parameter storage.
//!
//! Filters expose their settings as `Attrs` so that an edit dialog can
//! snapshot them (`Filter::copy_state`) and roll back on cancel
//! (`Filter::set_state`). `hash_all()` walks keys in sorted order, which makes
//! it usable as a cheap equality check in tests and cache keys.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Generic attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Bool(bool),
    Str(String),
    Int(i32),
    UInt(u32),
    Float(f32),
    Color([u8; 4]),
}

impl Hash for AttrValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        use AttrValue::*;
        std::mem::discriminant(self).hash(state);
        match self {
            Bool(v) => v.hash(state),
            Str(v) => v.hash(state),
            Int(v) => v.hash(state),
            UInt(v) => v.hash(state),
            Float(v) => v.to_bits().hash(state),
            Color(v) => v.hash(state),
        }
    }
}

/// Attribute container: string key to typed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attrs {
    #[serde(default)]
    map: HashMap<String, AttrValue>,
}

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: AttrValue) {
        self.map.insert(key.into(), value);
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.map.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.map.get(key) {
            Some(AttrValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.map.get(key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        match self.map.get(key) {
            Some(AttrValue::UInt(v)) => Some(*v),
            _ => None,
        }
    }

    /// Float lookup. Integer values are widened so hand-written JSON like
    /// `{"radius": {"Int": 3}}` still works.
    pub fn get_float(&self, key: &str) -> Option<f32> {
        match self.map.get(key) {
            Some(AttrValue::Float(v)) => Some(*v),
            Some(AttrValue::Int(v)) => Some(*v as f32),
            Some(AttrValue::UInt(v)) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.map.get(key) {
            Some(AttrValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_color(&self, key: &str) -> Option<[u8; 4]> {
        match self.map.get(key) {
            Some(AttrValue::Color(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_float_or(&self, key: &str, default: f32) -> f32 {
        self.get_float(key).unwrap_or(default)
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.map.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.map.iter()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Hash all attributes, keys in sorted order.
    pub fn hash_all(&self) -> u64 {
        let mut keys: Vec<&String> = self.map.keys().collect();
        keys.sort_unstable();

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for key in keys {
            key.hash(&mut hasher);
            if let Some(val) = self.map.get(key) {
                val.hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters() {
        let attrs = Attrs::new()
            .with("radius", AttrValue::Float(2.5))
            .with("steps", AttrValue::Int(3))
            .with("on", AttrValue::Bool(true));

        assert_eq!(attrs.get_float("radius"), Some(2.5));
        assert_eq!(attrs.get_float("steps"), Some(3.0));
        assert_eq!(attrs.get_i32("radius"), None);
        assert!(attrs.get_bool_or("on", false));
        assert_eq!(attrs.get_float_or("missing", 7.0), 7.0);
    }

    #[test]
    fn test_hash_is_order_independent() {
        let a = Attrs::new().with("a", AttrValue::Int(1)).with("b", AttrValue::Int(2));
        let b = Attrs::new().with("b", AttrValue::Int(2)).with("a", AttrValue::Int(1));
        assert_eq!(a.hash_all(), b.hash_all());

        let c = a.clone().with("a", AttrValue::Int(5));
        assert_ne!(a.hash_all(), c.hash_all());
    }
}
