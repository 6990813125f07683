use rustc_hash::FxHashMap;

/// A trie over `/`-delimited path segments, used to classify destination actor paths as
///  large-message destinations. A `*` segment in a pattern matches exactly one path segment;
///  a *trailing* `*` additionally matches the whole subtree below it, so `/user/big/*` covers
///  `/user/big/a` as well as `/user/big/a/b`.
pub struct WildcardMatcher {
    root: Node,
}

#[derive(Default)]
struct Node {
    children: FxHashMap<String, Node>,
    wildcard: Option<Box<Node>>,
    terminal: bool,
}

impl WildcardMatcher {
    pub fn new<S: AsRef<str>>(patterns: impl IntoIterator<Item = S>) -> WildcardMatcher {
        let mut root = Node::default();
        for pattern in patterns {
            let mut node = &mut root;
            for segment in pattern.as_ref().split('/').filter(|s| !s.is_empty()) {
                node = if segment == "*" {
                    node.wildcard.get_or_insert_with(Default::default)
                }
                else {
                    node.children.entry(segment.to_string()).or_default()
                };
            }
            node.terminal = true;
        }
        WildcardMatcher { root }
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty() && self.root.wildcard.is_none()
    }

    pub fn matches(&self, path: &str) -> bool {
        let segments = path.split('/')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        Self::matches_segments(&self.root, &segments)
    }

    fn matches_segments(node: &Node, segments: &[&str]) -> bool {
        let (head, rest) = match segments.split_first() {
            None => return node.terminal,
            Some(x) => x,
        };

        if let Some(child) = node.children.get(*head) {
            if Self::matches_segments(child, rest) {
                return true;
            }
        }
        if let Some(wildcard) = &node.wildcard {
            if Self::matches_segments(wildcard, rest) {
                return true;
            }
            // a trailing wildcard covers the entire subtree
            if wildcard.terminal {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::exact_match("/user/big", "/user/big", true)]
    #[case::exact_mismatch("/user/big", "/user/small", false)]
    #[case::exact_prefix_only("/user/big", "/user/big/child", false)]
    #[case::exact_shorter("/user/big", "/user", false)]
    #[case::wildcard_one_segment("/user/*/data", "/user/a/data", true)]
    #[case::wildcard_one_segment_mismatch("/user/*/data", "/user/a/b/data", false)]
    #[case::trailing_wildcard_child("/user/big/*", "/user/big/a", true)]
    #[case::trailing_wildcard_subtree("/user/big/*", "/user/big/a/b/c", true)]
    #[case::trailing_wildcard_not_self("/user/big/*", "/user/big", false)]
    #[case::trailing_slash_ignored("/user/big/", "/user/big", true)]
    #[case::empty_path("/user/big", "", false)]
    fn test_matches(#[case] pattern: &str, #[case] path: &str, #[case] expected: bool) {
        let matcher = WildcardMatcher::new([pattern]);
        assert_eq!(matcher.matches(path), expected);
    }

    #[test]
    fn test_multiple_patterns() {
        let matcher = WildcardMatcher::new(["/user/big/*", "/user/other"]);
        assert!(matcher.matches("/user/big/x"));
        assert!(matcher.matches("/user/other"));
        assert!(!matcher.matches("/user/third"));
    }

    #[test]
    fn test_is_empty() {
        assert!(WildcardMatcher::new(Vec::<String>::new()).is_empty());
        assert!(!WildcardMatcher::new(["/a"]).is_empty());
        assert!(!WildcardMatcher::new(["/*"]).is_empty());
    }
}
