/// An ordered set of normalized relative exclusion paths.
///
/// Each stored exclusion begins with `/`, has no trailing slash, and
/// comparisons are case-insensitive. A remote item with relative path `p`
/// is excluded iff some exclusion `e` satisfies `p == e` or `p` begins
/// with `e + "/"`.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    normalized: Vec<String>,
}

fn normalize(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

impl ExclusionSet {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized = paths
            .into_iter()
            .map(|p| normalize(p.as_ref()))
            .filter(|p| p.len() > 1 || p == "/")
            .collect();
        ExclusionSet { normalized }
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }

    /// `p` must already be normalized the same way (leading `/`, no
    /// trailing slash).
    pub fn is_excluded(&self, p: &str) -> bool {
        let p_lower = p.to_lowercase();
        self.normalized.iter().any(|e| {
            let e_lower = e.to_lowercase();
            p_lower == e_lower || p_lower.starts_with(&format!("{e_lower}/"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_descendant_excluded() {
        let set = ExclusionSet::new(["/A"]);
        assert!(set.is_excluded("/A"));
        assert!(set.is_excluded("/A/B/C"));
    }

    #[test]
    fn test_sibling_prefix_not_excluded() {
        let set = ExclusionSet::new(["/A"]);
        assert!(!set.is_excluded("/AB"));
    }

    #[test]
    fn test_case_insensitive() {
        let set = ExclusionSet::new(["/Root/Secrets"]);
        assert!(set.is_excluded("/root/secrets"));
        assert!(set.is_excluded("/ROOT/SECRETS/key.txt"));
    }

    #[test]
    fn test_normalizes_trailing_slash() {
        let set = ExclusionSet::new(["/foo/"]);
        assert!(set.is_excluded("/foo"));
        assert!(set.is_excluded("/foo/bar"));
    }
}
