//! Path trie over exact and subtree path conditions.
//!
//! Nodes branch per path segment. Exact routes sit on the node their last
//! segment reaches; subtree routes sit on the node of their prefix and are
//! collected on every visit, which gives the `/`-bounded prefix semantics.
//! Parameter segments (`:name`) share one wildcard child per node; the
//! matcher recovers the captured values from the winning route's own
//! segment list, so routes with different parameter names can share nodes.

use crate::models::route::PathSegment;
use crate::utils::path::split_segments;
use ahash::HashMap as AHashMap;
use ahash::HashMapExt;

#[derive(Debug)]
pub(crate) struct TrieNode {
    children: AHashMap<String, TrieNode>,
    param_child: Option<Box<TrieNode>>,
    exact: Vec<usize>,
    subtree: Vec<usize>,
}

impl Default for TrieNode {
    fn default() -> Self {
        Self {
            children: AHashMap::new(),
            param_child: None,
            exact: Vec::new(),
            subtree: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PathTrie {
    root: TrieNode,
}

impl PathTrie {
    pub(crate) fn insert_exact(&mut self, segments: &[PathSegment], route: usize) {
        let mut node = &mut self.root;
        for segment in segments {
            node = match segment {
                PathSegment::Literal(lit) => node.children.entry(lit.clone()).or_default(),
                PathSegment::Param(_) => {
                    &mut **node.param_child.get_or_insert_with(Default::default)
                }
            };
        }
        node.exact.push(route);
    }

    pub(crate) fn insert_subtree(&mut self, prefix: &str, route: usize) {
        let mut node = &mut self.root;
        for segment in split_segments(prefix) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.subtree.push(route);
    }

    /// Collects the route indices whose path condition covers `path`:
    /// subtree routes along the walk plus exact routes at the landing node.
    pub(crate) fn lookup(&self, path: &str, out: &mut Vec<usize>) {
        let segments = split_segments(path);
        Self::walk(&self.root, &segments, out);
    }

    fn walk(node: &TrieNode, segments: &[&str], out: &mut Vec<usize>) {
        out.extend_from_slice(&node.subtree);
        let Some((head, rest)) = segments.split_first() else {
            out.extend_from_slice(&node.exact);
            return;
        };
        if let Some(child) = node.children.get(*head) {
            Self::walk(child, rest, out);
        }
        // Parameters capture one non-empty segment.
        if let Some(param) = &node.param_child {
            if !head.is_empty() {
                Self::walk(param, rest, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(pattern: &str) -> Vec<PathSegment> {
        split_segments(pattern)
            .into_iter()
            .map(|s| match s.strip_prefix(':') {
                Some(name) => PathSegment::Param(name.to_string()),
                None => PathSegment::Literal(s.to_string()),
            })
            .collect()
    }

    fn lookup(trie: &PathTrie, path: &str) -> Vec<usize> {
        let mut out = Vec::new();
        trie.lookup(path, &mut out);
        out
    }

    #[test]
    fn exact_and_param_matches() {
        let mut trie = PathTrie::default();
        trie.insert_exact(&exact("/users"), 0);
        trie.insert_exact(&exact("/users/:id"), 1);
        trie.insert_exact(&exact("/users/:id/posts"), 2);

        assert_eq!(lookup(&trie, "/users"), vec![0]);
        assert_eq!(lookup(&trie, "/users/42"), vec![1]);
        assert_eq!(lookup(&trie, "/users/42/posts"), vec![2]);
        assert!(lookup(&trie, "/users/42/other").is_empty());
        assert!(lookup(&trie, "/other").is_empty());
    }

    #[test]
    fn literal_child_and_param_child_both_collect() {
        let mut trie = PathTrie::default();
        trie.insert_exact(&exact("/files/latest"), 0);
        trie.insert_exact(&exact("/files/:name"), 1);
        let found = lookup(&trie, "/files/latest");
        assert!(found.contains(&0));
        assert!(found.contains(&1));
    }

    #[test]
    fn subtree_is_slash_bounded() {
        let mut trie = PathTrie::default();
        trie.insert_subtree("/api", 0);
        assert_eq!(lookup(&trie, "/api"), vec![0]);
        assert_eq!(lookup(&trie, "/api/v1/users"), vec![0]);
        assert!(lookup(&trie, "/apiary").is_empty());
    }

    #[test]
    fn root_subtree_matches_everything() {
        let mut trie = PathTrie::default();
        trie.insert_subtree("/", 0);
        assert_eq!(lookup(&trie, "/"), vec![0]);
        assert_eq!(lookup(&trie, "/anything/at/all"), vec![0]);
    }

    #[test]
    fn trailing_slash_stays_distinct() {
        let mut trie = PathTrie::default();
        trie.insert_exact(&exact("/a"), 0);
        let mut trie2 = PathTrie::default();
        trie2.insert_exact(
            &[
                PathSegment::Literal("a".to_string()),
                PathSegment::Literal(String::new()),
            ],
            1,
        );
        assert_eq!(lookup(&trie, "/a"), vec![0]);
        assert!(lookup(&trie, "/a/").is_empty());
        assert_eq!(lookup(&trie2, "/a/"), vec![1]);
        assert!(lookup(&trie2, "/a").is_empty());
    }

    #[test]
    fn params_do_not_match_empty_segments() {
        let mut trie = PathTrie::default();
        trie.insert_exact(&exact("/a/:id"), 0);
        assert!(lookup(&trie, "/a/").is_empty());
    }
}
