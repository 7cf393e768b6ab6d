//! Unified-diff generation for the operator diff surface.

use similar::TextDiff;

/// A unified diff plus line-change statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResult {
    pub unified_diff: String,
    pub added_lines: usize,
    pub removed_lines: usize,
}

/// Generate a unified diff between two strings with a 3-line context.
///
/// Identical inputs yield an empty diff with zero counts. The counts cover
/// `+`/`-` lines after the two `---`/`+++` header lines.
pub fn generate_unified_diff(from: &str, to: &str, from_label: &str, to_label: &str) -> DiffResult {
    let text = TextDiff::from_lines(from, to)
        .unified_diff()
        .header(from_label, to_label)
        .context_radius(3)
        .to_string();

    let mut added_lines = 0;
    let mut removed_lines = 0;
    for line in text.lines().skip(2) {
        if line.starts_with('+') {
            added_lines += 1;
        } else if line.starts_with('-') {
            removed_lines += 1;
        }
    }

    DiffResult {
        unified_diff: text,
        added_lines,
        removed_lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_produce_empty_diff() {
        let result = generate_unified_diff("a\nb\n", "a\nb\n", "x", "y");
        assert!(result.unified_diff.is_empty());
        assert_eq!(result.added_lines, 0);
        assert_eq!(result.removed_lines, 0);
    }

    #[test]
    fn changed_line_counts_and_headers() {
        let result = generate_unified_diff(
            "server {\n  listen 80;\n}\n",
            "server {\n  listen 443;\n}\n",
            "remote",
            "Production",
        );
        assert!(result.unified_diff.contains("--- remote"));
        assert!(result.unified_diff.contains("+++ Production"));
        assert!(result.unified_diff.contains("@@"));
        assert_eq!(result.added_lines, 1);
        assert_eq!(result.removed_lines, 1);
    }

    #[test]
    fn pure_addition_counts_only_added() {
        let result = generate_unified_diff("a\n", "a\nb\nc\n", "old", "new");
        assert_eq!(result.added_lines, 2);
        assert_eq!(result.removed_lines, 0);
    }

    #[test]
    fn diff_is_symmetric_modulo_labels() {
        let a = "one\ntwo\nthree\n";
        let b = "one\n2\nthree\n";
        let forward = generate_unified_diff(a, b, "a", "b");
        let backward = generate_unified_diff(b, a, "b", "a");
        assert_eq!(forward.added_lines, backward.removed_lines);
        assert_eq!(forward.removed_lines, backward.added_lines);
    }
}
