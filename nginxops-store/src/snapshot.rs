//! Materialized views of a namespace prefix.

use std::collections::{BTreeMap, HashMap};

use nginxops_core::keys::{self, HASH_SUFFIX};

/// One file inside a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub bytes: Vec<u8>,
    /// Lowercase hex MD5 of `bytes`, computed locally rather than trusted from the
    /// stored `.hash` sibling.
    pub md5_hex: String,
}

/// A namespace prefix materialized as `relPath → (bytes, hash)`.
///
/// Metadata siblings (`.hash`, `.meta`, `.commit`) are filtered out; only
/// content keys survive.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub files: BTreeMap<String, SnapshotFile>,
}

impl Snapshot {
    /// Build a snapshot from the raw key/value pairs of a prefix range-read.
    pub fn from_pairs(namespace_prefix: &str, pairs: &[(String, Vec<u8>)]) -> Self {
        let mut files = BTreeMap::new();
        for (key, value) in pairs {
            if keys::is_metadata_key(key) {
                continue;
            }
            let Some(rel) = keys::rel_path(key, namespace_prefix) else {
                continue;
            };
            files.insert(
                rel.to_string(),
                SnapshotFile {
                    md5_hex: keys::md5_hex(value),
                    bytes: value.clone(),
                },
            );
        }
        Self { files }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

/// Extract `relPath → stored hash` from a prefix range-read, reading only the
/// `.hash` siblings. This is the cheap view the tree API compares across
/// namespaces.
pub fn hash_index(namespace_prefix: &str, pairs: &[(String, Vec<u8>)]) -> HashMap<String, String> {
    let mut index = HashMap::new();
    for (key, value) in pairs {
        let Some(base) = key.strip_suffix(HASH_SUFFIX) else {
            continue;
        };
        let Some(rel) = keys::rel_path(base, namespace_prefix) else {
            continue;
        };
        index.insert(rel.to_string(), String::from_utf8_lossy(value).into_owned());
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(key: &str, value: &str) -> (String, Vec<u8>) {
        (key.to_string(), value.as_bytes().to_vec())
    }

    const NS: &str = "/gitops-nginx/webA/10.0.0.1/conf";

    #[test]
    fn snapshot_filters_metadata_keys() {
        let pairs = vec![
            pair(&format!("{NS}/nginx.conf"), "server {}"),
            pair(&format!("{NS}/nginx.conf.hash"), "c1b3"),
            pair(&format!("{NS}/nginx.conf.meta"), "{}"),
            pair(&format!("{NS}/nginx.conf.commit"), "abc"),
            pair(&format!("{NS}/sites/a.conf"), "upstream {}"),
        ];

        let snapshot = Snapshot::from_pairs(NS, &pairs);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.files["nginx.conf"].bytes,
            b"server {}".to_vec()
        );
        assert!(snapshot.files.contains_key("sites/a.conf"));
    }

    #[test]
    fn snapshot_hash_is_computed_from_content() {
        let pairs = vec![
            pair(&format!("{NS}/nginx.conf"), "server {}"),
            // Stale stored hash must not leak into the snapshot.
            pair(&format!("{NS}/nginx.conf.hash"), "ffffffff"),
        ];
        let snapshot = Snapshot::from_pairs(NS, &pairs);
        assert_eq!(
            snapshot.files["nginx.conf"].md5_hex,
            nginxops_core::keys::md5_hex(b"server {}")
        );
    }

    #[test]
    fn snapshot_skips_foreign_keys() {
        let pairs = vec![pair("/other-prefix/nginx.conf", "x")];
        let snapshot = Snapshot::from_pairs(NS, &pairs);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn hash_index_reads_only_hash_siblings() {
        let pairs = vec![
            pair(&format!("{NS}/nginx.conf"), "server {}"),
            pair(&format!("{NS}/nginx.conf.hash"), "aabbcc"),
            pair(&format!("{NS}/sites/a.conf.hash"), "ddeeff"),
            pair(&format!("{NS}/sites/a.conf.meta"), "{}"),
        ];
        let index = hash_index(NS, &pairs);
        assert_eq!(index.len(), 2);
        assert_eq!(index["nginx.conf"], "aabbcc");
        assert_eq!(index["sites/a.conf"], "ddeeff");
    }
}
