//! Validated key-value records loaded from cloud API responses
//!
//! A [`Resource`] wraps one JSON object returned by the provider (or loaded
//! from disk). Each concrete resource type is described by a [`Kind`], which
//! declares the keys that must be present, the keys that are filled with a
//! default when absent, and how the canonical string identifier is derived.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{GeoNetError, Result};
use crate::region::Region;

/// String keyed, insertion ordered record
pub type Record = Map<String, Value>;

/// Declarative schema for a resource type
pub trait Kind: Send + Sync + Sized + 'static {
    /// Type name used in error messages
    const NAME: &'static str;

    /// Keys that must be present at construction
    const REQUIRED_KEYS: &'static [&'static str] = &[];

    /// Keys injected with [`Kind::extra_default`] when absent
    const EXTRA_KEYS: &'static [&'static str] = &[];

    fn extra_default() -> Value {
        Value::Null
    }

    /// Canonical string identifier, unique within a collection
    fn identify(resource: &Resource<Self>) -> String;

    /// Named attributes usable as sort keys in addition to raw fields
    fn attribute(_resource: &Resource<Self>, _name: &str) -> Option<Value> {
        None
    }
}

/// Untyped resource with no schema; identified by its JSON text
#[derive(Debug)]
pub struct Generic;

impl Kind for Generic {
    const NAME: &'static str = "Resource";

    fn identify(resource: &Resource<Self>) -> String {
        Value::Object(resource.data.clone()).to_string()
    }
}

/// Non-owning link from a resource back to its region.
///
/// The code is kept alongside the weak handle so a resource can still be
/// serialized after its region has been dropped.
#[derive(Clone)]
pub struct RegionRef {
    code: String,
    region: Weak<Region>,
}

impl RegionRef {
    pub fn new(region: &Arc<Region>) -> Self {
        Self {
            code: region.code().to_string(),
            region: Arc::downgrade(region),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn upgrade(&self) -> Option<Arc<Region>> {
        self.region.upgrade()
    }
}

impl From<&Arc<Region>> for RegionRef {
    fn from(region: &Arc<Region>) -> Self {
        RegionRef::new(region)
    }
}

impl fmt::Debug for RegionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RegionRef").field(&self.code).finish()
    }
}

impl PartialEq for RegionRef {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

/// A validated record of kind `K`
pub struct Resource<K: Kind> {
    data: Record,
    region: Option<RegionRef>,
    // transient attributes, never serialized
    attrs: Record,
    _kind: PhantomData<fn() -> K>,
}

impl<K: Kind> Resource<K> {
    /// Build a resource from a decoded JSON value, validating it immediately
    pub fn new(data: Value, region: Option<RegionRef>) -> Result<Self> {
        match data {
            Value::Object(record) => Self::from_record(record, region),
            other => Err(GeoNetError::Validation(format!(
                "resource {} must be a mapping, got {}",
                K::NAME,
                json_type(&other)
            ))),
        }
    }

    pub fn from_record(data: Record, region: Option<RegionRef>) -> Result<Self> {
        let mut resource = Self {
            data,
            region,
            attrs: Record::new(),
            _kind: PhantomData,
        };
        resource.validate()?;
        Ok(resource)
    }

    /// Check required keys and fill in missing extra keys
    pub fn validate(&mut self) -> Result<()> {
        for key in K::REQUIRED_KEYS {
            if !self.data.contains_key(*key) {
                return Err(GeoNetError::MissingKey {
                    kind: K::NAME,
                    key: (*key).to_string(),
                });
            }
        }

        for key in K::EXTRA_KEYS {
            if !self.data.contains_key(*key) {
                self.data.insert((*key).to_string(), K::extra_default());
            }
        }

        Ok(())
    }

    /// Canonical identifier used for lookups and equality
    pub fn id(&self) -> String {
        K::identify(self)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.data.get_mut(key)
    }

    /// String value of `key`, if present and a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Integer value of `key`, accepting numbers or numeric strings
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.data.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Set `key`, returning the previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.data.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.shift_remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn iter(&self) -> serde_json::map::Iter<'_> {
        self.data.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    /// Number of keys in the record
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &Record {
        &self.data
    }

    pub fn into_data(self) -> Record {
        self.data
    }

    pub fn region(&self) -> Option<Arc<Region>> {
        self.region.as_ref().and_then(RegionRef::upgrade)
    }

    pub fn region_code(&self) -> Option<&str> {
        self.region.as_ref().map(RegionRef::code)
    }

    pub fn region_ref(&self) -> Option<&RegionRef> {
        self.region.as_ref()
    }

    pub(crate) fn set_region(&mut self, region: Option<RegionRef>) {
        self.region = region;
    }

    /// Attribute attached after construction, kept out of the record
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: Value) {
        self.attrs.insert(key.into(), value);
    }

    /// Plain copy of the record with a `Region` key added when bound to one
    pub fn serialize_map(&self) -> Record {
        let mut data = self.data.clone();
        if let Some(region) = &self.region {
            data.insert("Region".to_string(), Value::String(region.code.clone()));
        }
        data
    }

    /// Value of a declared attribute, falling back to the raw field
    pub fn sort_value(&self, key: &str) -> Option<Value> {
        K::attribute(self, key).or_else(|| self.data.get(key).cloned())
    }

    /// Value of the `Key`/`Value` pair in the `Tags` list with the given key
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.data
            .get("Tags")?
            .as_array()?
            .iter()
            .find(|tag| tag.get("Key").and_then(Value::as_str) == Some(key))
            .and_then(|tag| tag.get("Value"))
            .and_then(Value::as_str)
    }
}

impl<K: Kind> Clone for Resource<K> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            region: self.region.clone(),
            attrs: self.attrs.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: Kind> fmt::Debug for Resource<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(K::NAME)
            .field("id", &self.id())
            .field("region", &self.region_code())
            .finish()
    }
}

impl<K: Kind> fmt::Display for Resource<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// Resources compare by canonical identifier, not by their data
impl<K: Kind> PartialEq for Resource<K> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<K: Kind> Eq for Resource<K> {}

impl<K: Kind> std::ops::Index<&str> for Resource<K> {
    type Output = Value;

    fn index(&self, key: &str) -> &Value {
        self.data.get(key).unwrap_or(&Value::Null)
    }
}

impl<K: Kind> Serialize for Resource<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.serialize_map().serialize(serializer)
    }
}

impl<'a, K: Kind> IntoIterator for &'a Resource<K> {
    type Item = (&'a String, &'a Value);
    type IntoIter = serde_json::map::Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}
