//! The fixed set of collections BondApp synchronizes
//!
//! Locally every collection lives under `<prefix><name>`; remotely it lives
//! under its bare name. Bulk push, bulk pull, export and import all iterate
//! this set and nothing else.

use serde::Deserialize;

/// Default local key prefix
pub const DEFAULT_PREFIX: &str = "bondapp_";

/// Default synchronized collections
pub const DEFAULT_COLLECTIONS: [&str; 7] = [
    "performances",
    "contracts",
    "instruments",
    "voices",
    "scores",
    "categories",
    "inventory",
];

/// Named collections plus the local key prefix
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CollectionSet {
    /// Prefix prepended to every collection name for local storage keys
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Remote collection names, in sync order
    #[serde(default = "default_names")]
    pub names: Vec<String>,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_names() -> Vec<String> {
    DEFAULT_COLLECTIONS.iter().map(|s| s.to_string()).collect()
}

impl Default for CollectionSet {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            names: default_names(),
        }
    }
}

impl CollectionSet {
    pub fn new(prefix: impl Into<String>, names: Vec<String>) -> Self {
        Self {
            prefix: prefix.into(),
            names,
        }
    }

    /// Local storage key for a collection name
    pub fn local_key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Local storage keys for every collection, in order
    pub fn local_keys(&self) -> Vec<String> {
        self.names.iter().map(|n| self.local_key(n)).collect()
    }

    /// Remote collection name for a local key (prefix stripped)
    ///
    /// Keys without the prefix are returned unchanged.
    pub fn remote_name<'a>(&self, local_key: &'a str) -> &'a str {
        local_key.strip_prefix(&self.prefix).unwrap_or(local_key)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set() {
        let set = CollectionSet::default();
        assert_eq!(set.prefix, "bondapp_");
        assert_eq!(set.len(), 7);
        assert!(set.contains("performances"));
        assert!(set.contains("inventory"));
        assert!(!set.contains("bondapp_performances"));
    }

    #[test]
    fn test_local_key_and_remote_name_are_inverse() {
        let set = CollectionSet::default();
        for name in set.iter() {
            let key = set.local_key(name);
            assert!(key.starts_with("bondapp_"));
            assert_eq!(set.remote_name(&key), name);
        }
    }

    #[test]
    fn test_remote_name_without_prefix_is_unchanged() {
        let set = CollectionSet::default();
        assert_eq!(set.remote_name("scores"), "scores");
    }

    #[test]
    fn test_deserialize_partial_uses_defaults() {
        let set: CollectionSet = toml::from_str(r#"prefix = "band_""#).unwrap();
        assert_eq!(set.prefix, "band_");
        assert_eq!(set.names.len(), 7);

        let set: CollectionSet = toml::from_str(r#"names = ["voices"]"#).unwrap();
        assert_eq!(set.prefix, "bondapp_");
        assert_eq!(set.names, vec!["voices".to_string()]);
    }
}
