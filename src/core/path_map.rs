//! Path-pattern routing table.
//!
//! A [`PathMap`] associates URL-path patterns with arbitrary values and picks
//! the best matching pattern for a concrete request path. Patterns are split
//! on `/` into segments, each of which is one of:
//!
//! * a literal (`webhdfs`)
//! * an in-segment glob (`*.jsp`, `report-*`), where `*` matches any run of
//!   characters inside the segment
//! * a single-segment wildcard (`*`)
//! * a trailing multi-segment wildcard (`**`), matching one or more of the
//!   remaining segments; it is only accepted as the final segment
//!
//! Resolution compares every matching pattern segment by segment from the
//! left using the specificity order `literal > glob > * > **`. The first
//! position where two candidates differ decides, so the longest literal
//! prefix always wins, an all-literal match beats any wildcard match, and `*`
//! beats `**` at the same depth. Candidates of identical specificity (only
//! reachable with globs) fall back to the most recent registration.
//!
//! The map is stored as a segment trie and searched depth-first in
//! specificity order, so most lookups stop at the first complete match.
use std::collections::HashMap;

use thiserror::Error;

/// Errors raised while registering a pattern.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PatternError {
    /// `**` used anywhere but the last segment
    #[error("multi-segment wildcard must be the final segment in pattern '{0}'")]
    MisplacedMultiWildcard(String),

    /// `**` mixed with other text inside one segment
    #[error("segment '{segment}' of pattern '{pattern}' mixes '**' with other characters")]
    InvalidSegment { pattern: String, segment: String },
}

/// Specificity of one pattern segment, least specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    MultiWildcard,
    Wildcard,
    Glob,
    Literal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Glob(String),
    Wildcard,
    MultiWildcard,
}

impl Segment {
    fn rank(&self) -> Rank {
        match self {
            Segment::Literal(_) => Rank::Literal,
            Segment::Glob(_) => Rank::Glob,
            Segment::Wildcard => Rank::Wildcard,
            Segment::MultiWildcard => Rank::MultiWildcard,
        }
    }
}

fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, PatternError> {
    let raw: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let mut segments = Vec::with_capacity(raw.len());

    for (index, part) in raw.iter().enumerate() {
        let segment = match *part {
            "*" => Segment::Wildcard,
            "**" => {
                if index + 1 != raw.len() {
                    return Err(PatternError::MisplacedMultiWildcard(pattern.to_string()));
                }
                Segment::MultiWildcard
            }
            s if s.contains("**") => {
                return Err(PatternError::InvalidSegment {
                    pattern: pattern.to_string(),
                    segment: s.to_string(),
                });
            }
            s if s.contains('*') => Segment::Glob(s.to_string()),
            s => Segment::Literal(s.to_string()),
        };
        segments.push(segment);
    }

    Ok(segments)
}

/// Split a request path into its non-empty segments, ignoring any query
/// string or fragment.
fn request_segments(path: &str) -> Vec<&str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Match one request segment against an in-segment glob.
fn glob_matches(glob: &str, text: &str) -> bool {
    let Some((head, tail)) = glob.split_once('*') else {
        return glob == text;
    };
    let (middle, last) = tail.rsplit_once('*').unwrap_or(("", tail));

    if text.len() < head.len() + last.len() || !text.starts_with(head) || !text.ends_with(last) {
        return false;
    }

    let mut rest = &text[head.len()..text.len() - last.len()];
    for part in middle.split('*').filter(|p| !p.is_empty()) {
        match rest.find(part) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }
    true
}

struct Entry<V> {
    pattern: String,
    ranks: Vec<Rank>,
    seq: u64,
    value: V,
}

impl<V> Entry<V> {
    fn specificity_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ranks
            .cmp(&other.ranks)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

struct Node<V> {
    literals: HashMap<String, Node<V>>,
    globs: Vec<(String, Node<V>)>,
    wildcard: Option<Box<Node<V>>>,
    multi: Option<Entry<V>>,
    entry: Option<Entry<V>>,
}

impl<V> Node<V> {
    fn new() -> Self {
        Self {
            literals: HashMap::new(),
            globs: Vec::new(),
            wildcard: None,
            multi: None,
            entry: None,
        }
    }

    fn find(&self, segments: &[&str]) -> Option<&Entry<V>> {
        let Some((head, rest)) = segments.split_first() else {
            return self.entry.as_ref();
        };

        if let Some(found) = self.literals.get(*head).and_then(|n| n.find(rest)) {
            return Some(found);
        }

        let best_glob = self
            .globs
            .iter()
            .filter(|(glob, _)| glob_matches(glob, head))
            .filter_map(|(_, node)| node.find(rest))
            .max_by(|a, b| a.specificity_cmp(b));
        if best_glob.is_some() {
            return best_glob;
        }

        if let Some(found) = self.wildcard.as_ref().and_then(|n| n.find(rest)) {
            return Some(found);
        }

        self.multi.as_ref()
    }

    fn locate(&self, segments: &[Segment]) -> Option<&Entry<V>> {
        let Some((head, rest)) = segments.split_first() else {
            return self.entry.as_ref();
        };
        match head {
            Segment::Literal(s) => self.literals.get(s)?.locate(rest),
            Segment::Glob(g) => self
                .globs
                .iter()
                .find(|(glob, _)| glob == g)
                .and_then(|(_, node)| node.locate(rest)),
            Segment::Wildcard => self.wildcard.as_ref()?.locate(rest),
            Segment::MultiWildcard => self.multi.as_ref(),
        }
    }

    fn locate_mut(&mut self, segments: &[Segment]) -> Option<&mut Entry<V>> {
        let Some((head, rest)) = segments.split_first() else {
            return self.entry.as_mut();
        };
        match head {
            Segment::Literal(s) => self.literals.get_mut(s)?.locate_mut(rest),
            Segment::Glob(g) => self
                .globs
                .iter_mut()
                .find(|(glob, _)| glob == g)
                .and_then(|(_, node)| node.locate_mut(rest)),
            Segment::Wildcard => self.wildcard.as_mut()?.locate_mut(rest),
            Segment::MultiWildcard => self.multi.as_mut(),
        }
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Entry<V>>) {
        out.extend(self.entry.iter());
        out.extend(self.multi.iter());
        for node in self.literals.values() {
            node.collect(out);
        }
        for (_, node) in &self.globs {
            node.collect(out);
        }
        if let Some(node) = &self.wildcard {
            node.collect(out);
        }
    }
}

/// Routing table from path pattern to value with best-match resolution.
pub struct PathMap<V> {
    root: Node<V>,
    seq: u64,
    len: usize,
}

impl<V> PathMap<V> {
    pub fn new() -> Self {
        Self {
            root: Node::new(),
            seq: 0,
            len: 0,
        }
    }

    /// Register `value` under `pattern`, returning the value previously stored
    /// under the identical pattern. Re-registering a pattern also refreshes
    /// its registration order for tie-breaking.
    pub fn put(&mut self, pattern: &str, value: V) -> Result<Option<V>, PatternError> {
        let segments = parse_pattern(pattern)?;
        self.seq += 1;
        let entry = Entry {
            pattern: pattern.to_string(),
            ranks: segments.iter().map(Segment::rank).collect(),
            seq: self.seq,
            value,
        };

        let mut node = &mut self.root;
        let mut multi = false;
        for segment in segments {
            node = match segment {
                Segment::Literal(s) => node.literals.entry(s).or_insert_with(Node::new),
                Segment::Glob(g) => {
                    let index = match node.globs.iter().position(|(glob, _)| *glob == g) {
                        Some(index) => index,
                        None => {
                            node.globs.push((g, Node::new()));
                            node.globs.len() - 1
                        }
                    };
                    &mut node.globs[index].1
                }
                Segment::Wildcard => node.wildcard.get_or_insert_with(|| Box::new(Node::new())),
                Segment::MultiWildcard => {
                    multi = true;
                    break;
                }
            };
        }

        let slot = if multi { &mut node.multi } else { &mut node.entry };
        let previous = slot.replace(entry).map(|e| e.value);
        if previous.is_none() {
            self.len += 1;
        }
        Ok(previous)
    }

    /// Exact lookup by pattern text (no wildcard resolution).
    pub fn get(&self, pattern: &str) -> Option<&V> {
        let segments = parse_pattern(pattern).ok()?;
        self.root.locate(&segments).map(|e| &e.value)
    }

    /// Mutable exact lookup by pattern text.
    pub fn get_mut(&mut self, pattern: &str) -> Option<&mut V> {
        let segments = parse_pattern(pattern).ok()?;
        self.root.locate_mut(&segments).map(|e| &mut e.value)
    }

    /// Resolve a concrete request path to the value of its best matching
    /// pattern.
    pub fn pick(&self, path: &str) -> Option<&V> {
        self.pick_entry(path).map(|(_, value)| value)
    }

    /// Like [`PathMap::pick`] but also returns the winning pattern.
    pub fn pick_entry(&self, path: &str) -> Option<(&str, &V)> {
        let segments = request_segments(path);
        self.root
            .find(&segments)
            .map(|e| (e.pattern.as_str(), &e.value))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// All registered `(pattern, value)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        let mut entries = Vec::with_capacity(self.len);
        self.root.collect(&mut entries);
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| (e.pattern.as_str(), &e.value))
    }
}

impl<V> Default for PathMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for PathMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter().map(|(p, _)| p)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(patterns: &[&str]) -> PathMap<String> {
        let mut map = PathMap::new();
        for pattern in patterns {
            map.put(pattern, pattern.to_string()).unwrap();
        }
        map
    }

    #[test]
    fn test_single_segment_wildcard() {
        let map = map_of(&["/webhdfs/*"]);
        assert_eq!(map.get("/webhdfs/*").unwrap(), "/webhdfs/*");
        assert_eq!(map.pick("/webhdfs/file").unwrap(), "/webhdfs/*");
        assert_eq!(map.pick("/webhdfs/path/").unwrap(), "/webhdfs/*");
        assert!(map.pick("/webhdfs/path/file").is_none());
        assert!(map.pick("/webhdfs/path/path/").is_none());
    }

    #[test]
    fn test_multi_segment_wildcard() {
        let map = map_of(&["/webhdfs/**"]);
        assert_eq!(map.pick("/webhdfs/file").unwrap(), "/webhdfs/**");
        assert_eq!(map.pick("/webhdfs/path/file").unwrap(), "/webhdfs/**");
        assert_eq!(map.pick("/webhdfs/path/path/").unwrap(), "/webhdfs/**");
        // one or more segments are required
        assert!(map.pick("/webhdfs").is_none());
        assert!(map.pick("/webhdfs/").is_none());
    }

    #[test]
    fn test_multi_wildcards_at_different_depths() {
        for patterns in [
            ["/webhdfs/**", "/webhdfs/v1/**"],
            ["/webhdfs/v1/**", "/webhdfs/**"],
        ] {
            let map = map_of(&patterns);
            assert_eq!(map.pick("/webhdfs/file").unwrap(), "/webhdfs/**");
            assert_eq!(map.pick("/webhdfs/v1/file").unwrap(), "/webhdfs/v1/**");
        }
    }

    #[test]
    fn test_wildcard_beats_multi_wildcard_at_same_depth() {
        for patterns in [["/webhdfs/*", "/webhdfs/**"], ["/webhdfs/**", "/webhdfs/*"]] {
            let map = map_of(&patterns);
            assert_eq!(map.pick("/webhdfs/file").unwrap(), "/webhdfs/*");
            assert_eq!(map.pick("/webhdfs/path/file").unwrap(), "/webhdfs/**");
        }
    }

    #[test]
    fn test_mixed_patterns() {
        let map = map_of(&[
            "/webhdfs",
            "/webhdfs/dfshealth.jsp",
            "/webhdfs/*.jsp",
            "/webhdfs/other.jsp",
            "/webhdfs/*",
            "/webhdfs/**",
            "/webhdfs/v1/**",
        ]);

        assert_eq!(map.pick("/webhdfs").unwrap(), "/webhdfs");
        assert_eq!(
            map.pick("/webhdfs/dfshealth.jsp").unwrap(),
            "/webhdfs/dfshealth.jsp"
        );
        assert_eq!(map.pick("/webhdfs/v1").unwrap(), "/webhdfs/*");
        assert_eq!(map.pick("/webhdfs/some.jsp").unwrap(), "/webhdfs/*.jsp");
        assert_eq!(map.pick("/webhdfs/other.jsp").unwrap(), "/webhdfs/other.jsp");
        assert_eq!(map.pick("/webhdfs/path/some.jsp").unwrap(), "/webhdfs/**");
        assert_eq!(map.pick("/webhdfs/path/to/file").unwrap(), "/webhdfs/**");
        assert_eq!(
            map.pick("/webhdfs/v1/path/to/file").unwrap(),
            "/webhdfs/v1/**"
        );
        assert_eq!(map.len(), 7);
    }

    #[test]
    fn test_matrix_param_glob() {
        let map = map_of(&["/webhdfs/**", "/webhdfs/browseDirectory.jsp;dn=*"]);
        assert_eq!(
            map.pick("/webhdfs/browseDirectory.jsp;dn=X").unwrap(),
            "/webhdfs/browseDirectory.jsp;dn=*"
        );
    }

    #[test]
    fn test_longest_literal_prefix_wins() {
        let map = map_of(&["/a/*/c", "/a/**"]);
        assert_eq!(map.pick("/a/x/c").unwrap(), "/a/*/c");
        assert_eq!(map.pick("/a/x/y/c").unwrap(), "/a/**");
        assert_eq!(map.pick("/a/x/d").unwrap(), "/a/**");
    }

    #[test]
    fn test_equal_specificity_prefers_latest_registration() {
        let map = map_of(&["/files/*.txt", "/files/report*"]);
        assert_eq!(map.pick("/files/report.txt").unwrap(), "/files/report*");

        let map = map_of(&["/files/report*", "/files/*.txt"]);
        assert_eq!(map.pick("/files/report.txt").unwrap(), "/files/*.txt");
    }

    #[test]
    fn test_glob_ties_are_decided_by_later_segments_first() {
        let map = map_of(&["/a/*.jsp/x", "/a/x*/*"]);
        assert_eq!(map.pick("/a/x.jsp/x").unwrap(), "/a/*.jsp/x");
    }

    #[test]
    fn test_put_replaces_identical_pattern() {
        let mut map = PathMap::new();
        assert_eq!(map.put("/a/*", 1).unwrap(), None);
        assert_eq!(map.put("a/*/", 2).unwrap(), Some(1));
        assert_eq!(map.len(), 1);
        assert_eq!(map.pick("/a/b"), Some(&2));
    }

    #[test]
    fn test_root_and_query_handling() {
        let map = map_of(&["/", "/api/**"]);
        assert_eq!(map.pick("/").unwrap(), "/");
        assert_eq!(map.pick("").unwrap(), "/");
        assert_eq!(map.pick("/api/v1?op=LIST#top").unwrap(), "/api/**");
        assert_eq!(map.pick("//api//v1/").unwrap(), "/api/**");
    }

    #[test]
    fn test_rejects_misplaced_multi_wildcard() {
        let mut map = PathMap::new();
        assert!(matches!(
            map.put("/webhdfs/**/middle/*.xml", ()),
            Err(PatternError::MisplacedMultiWildcard(_))
        ));
        assert!(matches!(
            map.put("/webhdfs/a**", ()),
            Err(PatternError::InvalidSegment { .. })
        ));
        assert!(map.is_empty());
    }

    #[test]
    fn test_get_mut_and_iteration_order() {
        let mut map = map_of(&["/b", "/a/**", "/c/*"]);
        map.get_mut("/a/**").unwrap().push_str("!");
        let patterns: Vec<_> = map.iter().map(|(p, v)| (p.to_string(), v.clone())).collect();
        assert_eq!(
            patterns,
            vec![
                ("/b".to_string(), "/b".to_string()),
                ("/a/**".to_string(), "/a/**!".to_string()),
                ("/c/*".to_string(), "/c/*".to_string()),
            ]
        );
    }

    #[test]
    fn test_glob_matching() {
        assert!(glob_matches("*.jsp", "some.jsp"));
        assert!(glob_matches("a*b*c", "aXXbYYc"));
        assert!(glob_matches("a*", "a"));
        assert!(!glob_matches("a*a", "a"));
        assert!(!glob_matches("*.jsp", "some.xml"));
    }
}
