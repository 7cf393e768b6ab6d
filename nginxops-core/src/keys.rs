//! Store key layout.
//!
//! Every file mirrored into the coordination store lives under
//! `<prefix>/<group>/<host>/<config_dir_suffix>/<relPath>` with up to three
//! metadata siblings sharing the base key:
//!
//! ```text
//! <base>          file bytes
//! <base>.hash     lowercase hex MD5 of the bytes
//! <base>.meta     JSON document
//! <base>.commit   commit sha (git namespace only)
//! ```

pub const HASH_SUFFIX: &str = ".hash";
pub const META_SUFFIX: &str = ".meta";
pub const COMMIT_SUFFIX: &str = ".commit";

/// Namespace root for one host's subtree:
/// `<key_prefix>/<group>/<host>/<config_dir_suffix>`.
pub fn namespace_prefix(key_prefix: &str, group: &str, host: &str, suffix: &str) -> String {
    join(&[key_prefix, group, host, suffix])
}

/// Base key for a file inside a namespace.
pub fn entry_key(namespace_prefix: &str, rel_path: &str) -> String {
    join(&[namespace_prefix, rel_path])
}

/// True for `.hash`, `.meta`, and `.commit` siblings. Metadata keys are never
/// treated as file content by any consumer.
pub fn is_metadata_key(key: &str) -> bool {
    key.ends_with(HASH_SUFFIX) || key.ends_with(META_SUFFIX) || key.ends_with(COMMIT_SUFFIX)
}

/// Strip a namespace prefix and the separating slash, yielding the relPath.
/// Returns `None` when the key does not live under the prefix, including a
/// sibling namespace whose suffix merely shares a string prefix.
pub fn rel_path<'a>(key: &'a str, namespace_prefix: &str) -> Option<&'a str> {
    let tail = key.strip_prefix(namespace_prefix)?;
    let tail = tail.strip_prefix('/')?;
    (!tail.is_empty()).then_some(tail)
}

/// Join path segments with single slashes, tolerating stray separators on
/// either side of each segment.
fn join(segments: &[&str]) -> String {
    let mut out = String::new();
    for segment in segments {
        let trimmed = segment.trim_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        out.push('/');
        out.push_str(trimmed);
    }
    out
}

/// Lowercase hex MD5 of a byte slice, the content digest used everywhere a
/// store invariant mentions a hash.
pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_prefix_joins_segments() {
        assert_eq!(
            namespace_prefix("/gitops-nginx", "webA", "10.0.0.1", "conf"),
            "/gitops-nginx/webA/10.0.0.1/conf"
        );
    }

    #[test]
    fn entry_key_appends_rel_path() {
        let ns = namespace_prefix("/gitops-nginx", "webA", "10.0.0.1", "conf");
        assert_eq!(
            entry_key(&ns, "sites/a.conf"),
            "/gitops-nginx/webA/10.0.0.1/conf/sites/a.conf"
        );
    }

    #[test]
    fn metadata_suffixes_are_recognised() {
        assert!(is_metadata_key("/p/a.conf.hash"));
        assert!(is_metadata_key("/p/a.conf.meta"));
        assert!(is_metadata_key("/p/a.conf.commit"));
        assert!(!is_metadata_key("/p/a.conf"));
    }

    #[test]
    fn rel_path_strips_prefix_and_slash() {
        assert_eq!(rel_path("/p/g/h/c/nginx.conf", "/p/g/h/c"), Some("nginx.conf"));
        assert_eq!(rel_path("/p/g/h/c", "/p/g/h/c"), None);
        assert_eq!(rel_path("/other/nginx.conf", "/p/g/h/c"), None);
        // A sibling namespace sharing a string prefix is not a member.
        assert_eq!(rel_path("/p/g/h/conf2/nginx.conf", "/p/g/h/c"), None);
    }

    #[test]
    fn md5_hex_is_lowercase_hex() {
        // Well-known digest of the empty input.
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"server {}").len(), 32);
    }
}
