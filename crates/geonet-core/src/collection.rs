//! Ordered, string-indexable groups of resources
//!
//! A [`Collection`] sits half way between a list and a map: elements keep
//! their order and can be fetched by position, or by canonical identifier
//! with a linear scan. Collections from many regions are merged with
//! [`Collection::collect`].

use std::cmp::Ordering;
use std::fmt;

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::{GeoNetError, Result};
use crate::resource::{json_type, Kind, Record, RegionRef, Resource};

pub struct Collection<K: Kind> {
    items: Vec<Resource<K>>,
    region: Option<RegionRef>,
    meta: Record,
}

impl<K: Kind> Collection<K> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            region: None,
            meta: Record::new(),
        }
    }

    /// Build a collection from a decoded list (or mapping of records).
    ///
    /// Every element is validated as a `K` resource and bound to `region`.
    /// A `null` input produces an empty collection.
    pub fn new(data: Value, region: Option<RegionRef>) -> Result<Self> {
        let rows = match data {
            Value::Array(rows) => rows,
            Value::Object(map) => map.into_iter().map(|(_, row)| row).collect(),
            Value::Null => Vec::new(),
            other => {
                return Err(GeoNetError::Validation(format!(
                    "collection of {} must be built from a list or mapping, got {}",
                    K::NAME,
                    json_type(&other)
                )))
            }
        };

        let items = rows
            .into_iter()
            .map(|row| Resource::new(row, region.clone()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            items,
            region,
            meta: Record::new(),
        })
    }

    /// Merge same-typed collections into one, preserving source order
    pub fn collect<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = Collection<K>>,
    {
        Self::collect_with(sources, Record::new())
    }

    /// [`Collection::collect`] with `meta` attached to the merged result;
    /// the sources' own meta is dropped
    pub fn collect_with<I>(sources: I, meta: Record) -> Self
    where
        I: IntoIterator<Item = Collection<K>>,
    {
        let mut merged = Self::empty();
        merged.meta = meta;
        for source in sources {
            merged.items.extend(source.items);
        }
        merged
    }

    /// Attach auxiliary metadata (e.g. an `updated` timestamp)
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn meta(&self) -> &Record {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut Record {
        &mut self.meta
    }

    pub fn region(&self) -> Option<&RegionRef> {
        self.region.as_ref()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Resource<K>> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Resource<K>> {
        self.items.iter_mut()
    }

    pub fn as_slice(&self) -> &[Resource<K>] {
        &self.items
    }

    /// Positional access
    pub fn get(&self, index: usize) -> Result<&Resource<K>> {
        let len = self.items.len();
        self.items.get(index).ok_or(GeoNetError::IndexOutOfRange {
            kind: K::NAME,
            index,
            len,
        })
    }

    /// First resource whose identifier equals `id`
    pub fn lookup(&self, id: &str) -> Result<&Resource<K>> {
        self.items
            .iter()
            .find(|item| item.id() == id)
            .ok_or_else(|| not_found::<K>(id))
    }

    pub fn lookup_mut(&mut self, id: &str) -> Result<&mut Resource<K>> {
        self.items
            .iter_mut()
            .find(|item| item.id() == id)
            .ok_or_else(|| not_found::<K>(id))
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    pub fn contains(&self, resource: &Resource<K>) -> bool {
        self.items.iter().any(|item| item == resource)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Canonical identifiers in order
    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(Resource::id).collect()
    }

    /// Coerce a raw value into `K` and append it
    pub fn push(&mut self, raw: Value) -> Result<()> {
        let resource = self.coerce(raw)?;
        self.items.push(resource);
        Ok(())
    }

    /// Append an already built resource, rebinding it to this collection's region
    pub fn push_resource(&mut self, mut resource: Resource<K>) {
        if self.region.is_some() {
            resource.set_region(self.region.clone());
        }
        self.items.push(resource);
    }

    pub fn insert(&mut self, index: usize, raw: Value) -> Result<()> {
        if index > self.items.len() {
            return Err(self.out_of_range(index));
        }
        let resource = self.coerce(raw)?;
        self.items.insert(index, resource);
        Ok(())
    }

    /// Replace the element at `index`, returning the previous one
    pub fn set(&mut self, index: usize, raw: Value) -> Result<Resource<K>> {
        if index >= self.items.len() {
            return Err(self.out_of_range(index));
        }
        let resource = self.coerce(raw)?;
        Ok(std::mem::replace(&mut self.items[index], resource))
    }

    pub fn remove(&mut self, index: usize) -> Result<Resource<K>> {
        if index >= self.items.len() {
            return Err(self.out_of_range(index));
        }
        Ok(self.items.remove(index))
    }

    pub fn retain<F>(&mut self, f: F)
    where
        F: FnMut(&Resource<K>) -> bool,
    {
        self.items.retain(f);
    }

    /// Stable in-place sort by a declared attribute or raw field
    pub fn sortby(&mut self, key: &str, reverse: bool) {
        self.items.sort_by(|a, b| {
            let ord = compare_values(a.sort_value(key).as_ref(), b.sort_value(key).as_ref());
            if reverse {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    /// Stable in-place sort with a caller supplied comparator
    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Resource<K>, &Resource<K>) -> Ordering,
    {
        self.items.sort_by(compare);
    }

    /// Serialized form: a list of serialized resources
    pub fn serialize_list(&self) -> Vec<Record> {
        self.items.iter().map(Resource::serialize_map).collect()
    }

    fn coerce(&self, raw: Value) -> Result<Resource<K>> {
        Resource::new(raw, self.region.clone())
    }

    fn out_of_range(&self, index: usize) -> GeoNetError {
        GeoNetError::IndexOutOfRange {
            kind: K::NAME,
            index,
            len: self.items.len(),
        }
    }
}

fn not_found<K: Kind>(id: &str) -> GeoNetError {
    GeoNetError::NotFound {
        kind: K::NAME,
        key: id.to_string(),
    }
}

/// Total order over JSON values used for sorting.
///
/// Missing values sort first, then null, booleans, numbers, strings; lists
/// and mappings compare by their JSON text.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(Value::Array(_)) => 5,
            Some(Value::Object(_)) => 6,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x @ Value::Array(_)), Some(y @ Value::Array(_)))
        | (Some(x @ Value::Object(_)), Some(y @ Value::Object(_))) => x.to_string().cmp(&y.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

impl<K: Kind> Default for Collection<K> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K: Kind> Clone for Collection<K> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            region: self.region.clone(),
            meta: self.meta.clone(),
        }
    }
}

impl<K: Kind> fmt::Debug for Collection<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("kind", &K::NAME)
            .field("items", &self.items)
            .field("meta", &self.meta)
            .finish()
    }
}

impl<K: Kind> std::ops::Index<usize> for Collection<K> {
    type Output = Resource<K>;

    fn index(&self, index: usize) -> &Resource<K> {
        &self.items[index]
    }
}

impl<K: Kind> FromIterator<Resource<K>> for Collection<K> {
    fn from_iter<I: IntoIterator<Item = Resource<K>>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
            region: None,
            meta: Record::new(),
        }
    }
}

impl<K: Kind> IntoIterator for Collection<K> {
    type Item = Resource<K>;
    type IntoIter = std::vec::IntoIter<Resource<K>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, K: Kind> IntoIterator for &'a Collection<K> {
    type Item = &'a Resource<K>;
    type IntoIter = std::slice::Iter<'a, Resource<K>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<K: Kind> Serialize for Collection<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.items.len()))?;
        for item in &self.items {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::tests::Mock;
    use crate::resource::Generic;
    use serde_json::json;

    struct Named;

    impl Kind for Named {
        const NAME: &'static str = "Named";
        const REQUIRED_KEYS: &'static [&'static str] = &["id"];

        fn identify(resource: &Resource<Self>) -> String {
            resource.get_str("id").unwrap_or_default().to_string()
        }

        fn attribute(resource: &Resource<Self>, name: &str) -> Option<Value> {
            match name {
                "shout" => resource.get_str("id").map(|id| json!(id.to_uppercase())),
                _ => None,
            }
        }
    }

    fn named(ids: &[&str]) -> Collection<Named> {
        let rows: Vec<Value> = ids.iter().map(|id| json!({"id": id})).collect();
        Collection::new(Value::Array(rows), None).unwrap()
    }

    #[test]
    fn test_build_from_list_validates_rows() {
        let rows = json!([{"foo": 1, "bar": "a"}, {"foo": 2, "bar": "b"}]);
        let collection = Collection::<Mock>::new(rows, None).unwrap();
        assert_eq!(collection.len(), 2);
        assert_eq!(collection[1]["zab"], 42);

        let err = Collection::<Mock>::new(json!([{"foo": 1}]), None).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_build_from_mapping_takes_values() {
        let collection =
            Collection::<Named>::new(json!({"x": {"id": "a"}, "y": {"id": "b"}}), None).unwrap();
        assert_eq!(collection.len(), 2);
        assert!(collection.contains_id("a"));
        assert!(collection.contains_id("b"));
    }

    #[test]
    fn test_build_from_null_is_empty() {
        assert!(Collection::<Generic>::new(Value::Null, None).unwrap().is_empty());
        assert!(Collection::<Generic>::new(json!("nope"), None).is_err());
    }

    #[test]
    fn test_string_and_positional_lookup() {
        let collection = named(&["a", "b", "c"]);
        assert_eq!(collection.lookup("b").unwrap().id(), "b");
        assert_eq!(collection.get(1).unwrap().id(), "b");

        let err = collection.lookup("z").unwrap_err();
        assert!(matches!(err, GeoNetError::NotFound { kind: "Named", .. }));

        let err = collection.get(7).unwrap_err();
        assert!(matches!(err, GeoNetError::IndexOutOfRange { index: 7, len: 3, .. }));
    }

    #[test]
    fn test_collect_preserves_order() {
        let c1 = named(&["a", "b"]);
        let c2 = named(&["c", "d", "e"]);
        let merged = Collection::collect(vec![c1, c2]);
        assert_eq!(merged.len(), 5);
        assert_eq!(merged.ids(), vec!["a", "b", "c", "d", "e"]);
        assert!(merged.meta().is_empty());
    }

    #[test]
    fn test_collect_with_meta() {
        let mut meta = Record::new();
        meta.insert("updated".to_string(), json!("2017-07-01"));
        let c1 = named(&["a"]).with_meta("dropped", true);

        let merged = Collection::collect_with(vec![c1, named(&["b"])], meta);
        assert_eq!(merged.ids(), vec!["a", "b"]);
        assert_eq!(merged.meta()["updated"], "2017-07-01");
        assert!(!merged.meta().contains_key("dropped"));
    }

    #[test]
    fn test_mutations_coerce_raw_values() {
        let mut collection = named(&["a", "c"]);
        collection.insert(1, json!({"id": "b"})).unwrap();
        collection.push(json!({"id": "d"})).unwrap();
        assert_eq!(collection.ids(), vec!["a", "b", "c", "d"]);

        let old = collection.set(0, json!({"id": "z"})).unwrap();
        assert_eq!(old.id(), "a");
        assert!(collection.push(json!({"nope": true})).is_err());
        assert!(collection.insert(10, json!({"id": "q"})).is_err());

        let removed = collection.remove(0).unwrap();
        assert_eq!(removed.id(), "z");
        assert_eq!(collection.len(), 3);
    }

    #[test]
    fn test_sortby_raw_field_is_stable() {
        let rows = json!([
            {"id": "a", "rank": 2},
            {"id": "b", "rank": 1},
            {"id": "c", "rank": 2},
            {"id": "d"},
        ]);
        let mut collection = Collection::<Named>::new(rows, None).unwrap();

        collection.sortby("rank", false);
        assert_eq!(collection.ids(), vec!["d", "b", "a", "c"]);

        collection.sortby("rank", true);
        assert_eq!(collection.ids(), vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn test_sortby_declared_attribute() {
        let mut collection = named(&["b", "a", "c"]);
        collection.sortby("shout", false);
        assert_eq!(collection.ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_meta_and_serialize() {
        let collection = named(&["a"]).with_meta("updated", "2018-01-01");
        assert_eq!(collection.meta()["updated"], "2018-01-01");

        let value = serde_json::to_value(&collection).unwrap();
        assert_eq!(value, json!([{"id": "a"}]));
    }
}
