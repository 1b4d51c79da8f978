//! The baggage store: an ordered set of key/value pairs carried alongside a
//! trace, distinct from the `baggage` *header codec* in
//! `propagation::baggage` which turns this type into (and out of) the W3C
//! `baggage` header's wire format. Grounded on `SPEC_FULL.md` §3's
//! description of baggage as "an ordered map with enforced size limits."

use indexmap::IndexMap;

/// Default limits, matching the values other Datadog tracers apply to the
/// W3C `baggage` header.
pub const DEFAULT_MAX_ITEMS: usize = 64;
pub const DEFAULT_MAX_BYTES: usize = 8192;

#[derive(Debug, Clone, Default)]
pub struct Baggage {
    items: IndexMap<String, String>,
}

impl Baggage {
    pub fn new() -> Self {
        Baggage::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(|s| s.as_str())
    }

    /// Inserts `key` at the end of iteration order, or updates its value in
    /// place if it already existed (matching `IndexMap::insert`'s
    /// semantics).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.items.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.items.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for Baggage {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Baggage {
            items: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order() {
        let mut baggage = Baggage::new();
        baggage.set("b", "2");
        baggage.set("a", "1");
        let keys: Vec<_> = baggage.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn set_on_existing_key_updates_value_in_place() {
        let mut baggage = Baggage::new();
        baggage.set("a", "1");
        baggage.set("b", "2");
        baggage.set("a", "3");
        assert_eq!(baggage.get("a"), Some("3"));
    }
}
