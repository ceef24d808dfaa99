//! In-memory cache of the last known state of every object in the watched collection.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::object::{QualifiedName, ResourceVersion};

struct Entry<K> {
    object: Arc<K>,
    version: ResourceVersion,
}

type Entries<K> = Arc<RwLock<HashMap<QualifiedName, Entry<K>>>>;

/// Outcome of [`Writer::put`].
#[derive(Debug)]
pub enum Put<K> {
    /// The key was not present.
    Inserted(Arc<K>),
    /// The key was present with an older version.
    Replaced { old: Arc<K>, new: Arc<K> },
    /// The stored version is the same or newer; nothing changed.
    Ignored,
}

/// A difference between the cache before and after [`Writer::replace`].
#[derive(Debug)]
pub enum Delta<K> {
    Added(Arc<K>),
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Arc<K>),
}

/// The only handle that can mutate the cache.
pub struct Writer<K> {
    entries: Entries<K>,
}

impl<K> Default for Writer<K> {
    fn default() -> Self {
        Self {
            entries: Arc::default(),
        }
    }
}

impl<K> Writer<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a read-only handle that observes every later write.
    pub fn as_reader(&self) -> Store<K> {
        Store {
            entries: Arc::clone(&self.entries),
        }
    }

    pub fn version(&self, key: &QualifiedName) -> Option<ResourceVersion> {
        self.entries.read().get(key).map(|entry| entry.version)
    }

    /// Stores `object` under `key` unless the stored version is at least `version`.
    pub fn put(&mut self, key: QualifiedName, object: K, version: ResourceVersion) -> Put<K> {
        let mut entries = self.entries.write();
        let new = Arc::new(object);
        match entries.get_mut(&key) {
            Some(entry) if entry.version >= version => Put::Ignored,
            Some(entry) => {
                let old = std::mem::replace(&mut entry.object, Arc::clone(&new));
                entry.version = version;
                Put::Replaced { old, new }
            }
            None => {
                entries.insert(
                    key,
                    Entry {
                        object: Arc::clone(&new),
                        version,
                    },
                );
                Put::Inserted(new)
            }
        }
    }

    pub fn delete(&mut self, key: &QualifiedName) -> Option<Arc<K>> {
        self.entries.write().remove(key).map(|entry| entry.object)
    }

    /// Replaces the whole cache with `objects`, returning what changed.
    ///
    /// Objects whose version did not change produce no delta. Additions and
    /// updates follow the order of `objects`; deletions follow, ordered by key.
    pub fn replace(
        &mut self,
        objects: impl IntoIterator<Item = (QualifiedName, K, ResourceVersion)>,
    ) -> Vec<Delta<K>> {
        let mut entries = self.entries.write();
        let mut previous = std::mem::take(&mut *entries);
        let mut deltas = Vec::new();

        for (key, object, version) in objects {
            let object = Arc::new(object);
            match previous.remove(&key) {
                None => deltas.push(Delta::Added(Arc::clone(&object))),
                Some(old) if old.version != version => deltas.push(Delta::Updated {
                    old: old.object,
                    new: Arc::clone(&object),
                }),
                Some(_) => {}
            }
            entries.insert(key, Entry { object, version });
        }

        let mut removed: Vec<_> = previous.into_iter().collect();
        removed.sort_by(|(a, _), (b, _)| a.cmp(b));
        deltas.extend(
            removed
                .into_iter()
                .map(|(_, entry)| Delta::Deleted(entry.object)),
        );
        deltas
    }
}

/// A cloneable read-only view of the cache.
pub struct Store<K> {
    entries: Entries<K>,
}

impl<K> Clone for Store<K> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K> Store<K> {
    pub fn get(&self, key: &QualifiedName) -> Option<Arc<K>> {
        self.entries
            .read()
            .get(key)
            .map(|entry| Arc::clone(&entry.object))
    }

    /// A snapshot of every stored object, in unspecified order.
    pub fn list(&self) -> Vec<Arc<K>> {
        self.entries
            .read()
            .values()
            .map(|entry| Arc::clone(&entry.object))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> QualifiedName {
        QualifiedName::new(Some("ns"), name)
    }

    fn rv(revision: u64) -> ResourceVersion {
        ResourceVersion::new(revision)
    }

    #[test]
    fn test_put_keeps_highest_version() {
        let mut writer = Writer::new();
        let store = writer.as_reader();

        // (key, payload, version, deleted)
        let events = [
            ("a", "a@3", 3, false),
            ("b", "b@4", 4, false),
            ("a", "a@2", 2, false),
            ("a", "a@7", 7, false),
            ("b", "b@4-dup", 4, false),
            ("a", "a@5", 5, false),
            ("c", "c@8", 8, false),
            ("c", "", 9, true),
            ("b", "b@10", 10, false),
        ];
        for (name, payload, version, deleted) in events {
            if deleted {
                writer.delete(&key(name));
            } else {
                writer.put(key(name), payload.to_owned(), rv(version));
            }
        }

        assert_eq!(store.get(&key("a")).as_deref().map(String::as_str), Some("a@7"));
        assert_eq!(store.get(&key("b")).as_deref().map(String::as_str), Some("b@10"));
        assert!(store.get(&key("c")).is_none());
        assert_eq!(writer.version(&key("a")), Some(rv(7)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_out_of_order_duplicate_is_ignored() {
        let mut writer = Writer::new();
        let store = writer.as_reader();

        assert!(matches!(
            writer.put(key("x"), "v6", rv(6)),
            Put::Inserted(new) if *new == "v6"
        ));
        assert!(matches!(writer.put(key("x"), "v5", rv(5)), Put::Ignored));
        assert!(matches!(writer.put(key("x"), "v6-again", rv(6)), Put::Ignored));

        assert_eq!(store.get(&key("x")).as_deref(), Some(&"v6"));
        assert_eq!(writer.version(&key("x")), Some(rv(6)));

        match writer.put(key("x"), "v7", rv(7)) {
            Put::Replaced { old, new } => {
                assert_eq!(*old, "v6");
                assert_eq!(*new, "v7");
            }
            other => panic!("expected replacement, got {other:?}"),
        }
    }

    #[test]
    fn test_delete_missing_key_is_noop() {
        let mut writer: Writer<&str> = Writer::new();
        assert!(writer.delete(&key("ghost")).is_none());
        assert!(writer.as_reader().is_empty());
    }

    #[test]
    fn test_replace_synthesizes_minimal_deltas() {
        let mut writer = Writer::new();
        writer.put(key("a"), "a", rv(1));
        writer.put(key("c"), "c", rv(2));
        writer.put(key("d"), "d", rv(3));

        let deltas = writer.replace([
            (key("a"), "a", rv(1)),
            (key("b"), "b", rv(4)),
            (key("d"), "d2", rv(5)),
        ]);

        assert_eq!(deltas.len(), 3);
        assert!(matches!(&deltas[0], Delta::Added(b) if **b == "b"));
        assert!(matches!(
            &deltas[1],
            Delta::Updated { old, new } if **old == "d" && **new == "d2"
        ));
        assert!(matches!(&deltas[2], Delta::Deleted(c) if **c == "c"));

        let store = writer.as_reader();
        let mut names: Vec<_> = store.list().iter().map(|o| **o).collect();
        names.sort_unstable();
        assert_eq!(names, ["a", "b", "d2"]);
    }

    #[test]
    fn test_replace_with_empty_list_clears_cache() {
        let mut writer = Writer::new();
        assert!(writer.replace(Vec::<(QualifiedName, (), ResourceVersion)>::new()).is_empty());

        writer.put(key("a"), (), rv(1));
        let deltas = writer.replace(Vec::new());
        assert!(matches!(deltas.as_slice(), [Delta::Deleted(_)]));
        assert!(writer.as_reader().is_empty());
    }
}
