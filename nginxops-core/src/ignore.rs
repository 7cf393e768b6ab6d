//! Ignore rules shared by all three reconcilers.

use glob::Pattern;

/// Check whether a file path should be excluded from syncing.
///
/// Always ignored, regardless of configured patterns: anything inside a
/// `.git` directory, hidden files (basename starting with `.`), editor
/// artifacts (`*.swp`, `*~`, and vim's `4913` probe file). Configured
/// patterns are matched as globs against the basename and against every
/// `/`-delimited path component.
pub fn is_ignored(file_path: &str, patterns: &[String]) -> bool {
    let basename = file_path.rsplit('/').next().unwrap_or(file_path);

    if file_path.contains(".git/") || basename == ".git" {
        return true;
    }
    if basename.starts_with('.') {
        return true;
    }
    if basename.ends_with(".swp") || basename.ends_with('~') || basename == "4913" {
        return true;
    }

    for pattern in patterns {
        let Ok(compiled) = Pattern::new(pattern) else {
            continue;
        };
        if compiled.matches(basename) {
            return true;
        }
        if file_path.split('/').any(|component| compiled.matches(component)) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn git_directory_always_ignored() {
        assert!(is_ignored(".git/config", &[]));
        assert!(is_ignored("repo/.git/HEAD", &[]));
        assert!(is_ignored(".git", &[]));
    }

    #[test]
    fn hidden_and_editor_files_ignored() {
        assert!(is_ignored(".DS_Store", &[]));
        assert!(is_ignored("conf/.env", &[]));
        assert!(is_ignored("nginx.conf.swp", &[]));
        assert!(is_ignored("nginx.conf~", &[]));
        assert!(is_ignored("conf/4913", &[]));
    }

    #[test]
    fn plain_config_files_pass() {
        assert!(!is_ignored("nginx.conf", &[]));
        assert!(!is_ignored("sites/a.conf", &[]));
        assert!(!is_ignored("deeply/nested/dir/site.conf", &[]));
    }

    #[test]
    fn glob_pattern_matches_basename() {
        let pats = patterns(&["*.bak"]);
        assert!(is_ignored("nginx.conf.bak", &pats));
        assert!(is_ignored("sites/a.conf.bak", &pats));
        assert!(!is_ignored("nginx.conf", &pats));
    }

    #[test]
    fn pattern_matches_path_component() {
        let pats = patterns(&["backup"]);
        assert!(is_ignored("backup/nginx.conf", &pats));
        assert!(is_ignored("conf/backup/a.conf", &pats));
        assert!(!is_ignored("conf/backups.conf", &pats));
    }

    #[test]
    fn idempotent_and_order_independent() {
        let forward = patterns(&["*.bak", "backup", "*.tmp"]);
        let reverse = patterns(&["*.tmp", "backup", "*.bak"]);
        for path in ["a.bak", "backup/x", "b.tmp", "keep.conf"] {
            let first = is_ignored(path, &forward);
            assert_eq!(first, is_ignored(path, &forward), "idempotence for {path}");
            assert_eq!(first, is_ignored(path, &reverse), "order independence for {path}");
        }
    }

    #[test]
    fn invalid_pattern_is_skipped() {
        let pats = patterns(&["[unclosed"]);
        assert!(!is_ignored("nginx.conf", &pats));
    }
}
