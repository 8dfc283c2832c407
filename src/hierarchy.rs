//! RYM genre tree, meta-genre exclusions, and ancestor expansion.
//!
//! Two tree file layouts are accepted:
//! - nested: `{"genreHierarchy": [{"name": "Rock", "children": [...]}]}`
//! - flat:   `{"Post-Rock": ["Rock", "Experimental Rock"], "Rock": []}`
//!
//! A genre may sit under several parents; parents are kept in the order they
//! were first declared. Malformed entries are skipped with a warning.

use std::collections::VecDeque;
use std::path::Path;

use log::{debug, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::errors::{Error, Result};

// ============================================================================
// Genre Tree
// ============================================================================

/// Genre name → direct parents, in declaration order.
#[derive(Debug, Default, Clone)]
pub struct GenreTree {
    parents: FxHashMap<String, Vec<String>>,
    /// Genres in first-seen order
    genres: Vec<String>,
}

impl GenreTree {
    fn register(&mut self, genre: &str) {
        if !self.parents.contains_key(genre) {
            self.parents.insert(genre.to_string(), Vec::new());
            self.genres.push(genre.to_string());
        }
    }

    fn add_edge(&mut self, genre: &str, parent: &str) {
        self.register(genre);
        if let Some(list) = self.parents.get_mut(genre) {
            if !list.iter().any(|p| p == parent) {
                list.push(parent.to_string());
            }
        }
    }

    /// Build from `(genre, parents)` pairs. Parents that are not themselves
    /// listed as genres are dangling and dropped.
    pub fn from_edges<I, G, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (G, Vec<P>)>,
        G: AsRef<str>,
        P: AsRef<str>,
    {
        let entries: Vec<(G, Vec<P>)> = entries.into_iter().collect();
        let mut tree = GenreTree::default();
        for (genre, _) in &entries {
            tree.register(genre.as_ref());
        }
        for (genre, parents) in &entries {
            for parent in parents {
                let parent = parent.as_ref();
                if tree.parents.contains_key(parent) {
                    tree.add_edge(genre.as_ref(), parent);
                } else {
                    warn!("Skipping genre tree edge {} -> {}: unknown parent", genre.as_ref(), parent);
                }
            }
        }
        tree
    }

    /// Parse either tree layout.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(|e| Error::HierarchyLoad(e.to_string()))?;
        match value {
            Value::Object(mut map) => match map.remove("genreHierarchy") {
                Some(Value::Array(nodes)) => {
                    let mut tree = GenreTree::default();
                    tree.walk_nested(&nodes, None);
                    Ok(tree)
                }
                Some(_) => Err(Error::HierarchyLoad("genreHierarchy is not a list".to_string())),
                None => Ok(Self::from_flat(map)),
            },
            _ => Err(Error::HierarchyLoad("genre tree must be a JSON object".to_string())),
        }
    }

    fn walk_nested(&mut self, nodes: &[Value], parent: Option<&str>) {
        for node in nodes {
            let Some(name) = node.get("name").and_then(Value::as_str) else {
                warn!("Skipping genre tree node without a name under {:?}", parent);
                continue;
            };
            match parent {
                Some(parent) => self.add_edge(name, parent),
                None => self.register(name),
            }
            match node.get("children") {
                Some(Value::Array(children)) => self.walk_nested(children, Some(name)),
                None | Some(Value::Null) => {}
                Some(_) => warn!("Skipping children of '{}': not a list", name),
            }
        }
    }

    fn from_flat(map: serde_json::Map<String, Value>) -> Self {
        let mut entries: Vec<(String, Vec<String>)> = Vec::with_capacity(map.len());
        for (genre, parents) in map {
            let Value::Array(parents) = parents else {
                warn!("Skipping genre tree entry '{}': parents are not a list", genre);
                continue;
            };
            let parents: Vec<String> = parents
                .into_iter()
                .filter_map(|p| match p {
                    Value::String(s) => Some(s),
                    other => {
                        warn!("Skipping non-string parent {} of '{}'", other, genre);
                        None
                    }
                })
                .collect();
            entries.push((genre, parents));
        }
        Self::from_edges(entries)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::HierarchyLoad(format!("cannot read {}: {}", path.display(), e)))?;
        let tree = Self::from_json(&text)?;
        if tree.is_empty() {
            return Err(Error::HierarchyLoad(format!("{} contains no genres", path.display())));
        }
        info!(
            "Loaded RYM genre hierarchy: {} genres ({} with multiple parents)",
            tree.len(),
            tree.multi_parent_count()
        );
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.genres.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genres.is_empty()
    }

    pub fn contains(&self, genre: &str) -> bool {
        self.parents.contains_key(genre)
    }

    /// Direct parents, in declaration order. Unknown genres have none.
    pub fn parents(&self, genre: &str) -> &[String] {
        self.parents.get(genre).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn multi_parent_count(&self) -> usize {
        self.parents.values().filter(|p| p.len() > 1).count()
    }

    /// Split genres into (in tree, not in tree), keeping order.
    pub fn partition_known<'a>(&self, genres: &'a [String]) -> (Vec<&'a str>, Vec<&'a str>) {
        genres.iter().map(String::as_str).partition(|g| self.contains(g))
    }

    /// Every ancestor of a genre, breadth-first, without caps or exclusions.
    pub fn ancestors(&self, genre: &str) -> Vec<String> {
        let seeds = [genre.to_string()];
        expand(&seeds, &[], self, &ExclusionSet::default(), usize::MAX, usize::MAX)
    }

    /// Every root-to-genre path. Paths through a cycle stop at the repeat.
    pub fn genre_paths(&self, genre: &str) -> Vec<Vec<String>> {
        if !self.contains(genre) {
            return Vec::new();
        }
        let mut paths = Vec::new();
        let mut stack = vec![genre.to_string()];
        self.collect_paths(&mut stack, &mut paths);
        paths
    }

    // `stack` holds the path leaf-first; reversed when a root is reached.
    fn collect_paths(&self, stack: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
        let Some(current) = stack.last() else { return };
        let parents: Vec<&String> = self
            .parents(current)
            .iter()
            .filter(|p| !stack.contains(p))
            .collect();
        if parents.is_empty() {
            out.push(stack.iter().rev().cloned().collect());
            return;
        }
        for parent in parents {
            stack.push(parent.clone());
            self.collect_paths(stack, out);
            stack.pop();
        }
    }
}

// ============================================================================
// Exclusions
// ============================================================================

/// Meta-genres that are never emitted as groupings.
#[derive(Debug, Default, Clone)]
pub struct ExclusionSet {
    genres: FxHashSet<String>,
}

impl ExclusionSet {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(genres: I) -> Self {
        Self {
            genres: genres.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse `{"excluded_meta_genres": [...]}` or a bare list.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(|e| Error::HierarchyLoad(e.to_string()))?;
        let list = match &value {
            Value::Array(list) => list,
            Value::Object(map) => match map.get("excluded_meta_genres") {
                Some(Value::Array(list)) => list,
                _ => {
                    return Err(Error::HierarchyLoad(
                        "exclusion file needs an 'excluded_meta_genres' list".to_string(),
                    ))
                }
            },
            _ => return Err(Error::HierarchyLoad("exclusion file must be a list or object".to_string())),
        };
        let mut genres = FxHashSet::default();
        for entry in list {
            match entry.as_str() {
                Some(genre) => {
                    genres.insert(genre.to_string());
                }
                None => warn!("Skipping non-string excluded genre {}", entry),
            }
        }
        Ok(Self { genres })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::HierarchyLoad(format!("cannot read {}: {}", path.display(), e)))?;
        let set = Self::from_json(&text)?;
        let mut names: Vec<&str> = set.genres.iter().map(String::as_str).collect();
        names.sort_unstable();
        info!("Loaded {} excluded meta-genres: {}", names.len(), names.join(", "));
        Ok(set)
    }

    pub fn contains(&self, genre: &str) -> bool {
        self.genres.contains(genre)
    }

    pub fn len(&self) -> usize {
        self.genres.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genres.is_empty()
    }
}

// ============================================================================
// Expansion
// ============================================================================

/// Breadth-first ancestor closure.
///
/// Output order: discovery order of a single BFS seeded with every input genre
/// (so depth first, then input order, then parent declaration order). Inputs
/// and `suppressed` genres are never emitted; excluded genres are walked
/// through but never emitted. A genre is enqueued at most once, which makes
/// the walk terminate on cyclic data.
fn expand(
    genres: &[String],
    suppressed: &[String],
    tree: &GenreTree,
    exclusions: &ExclusionSet,
    max_depth: usize,
    max_count: usize,
) -> Vec<String> {
    let mut out = Vec::new();
    if max_count == 0 {
        return out;
    }

    let hidden: FxHashSet<&str> = suppressed.iter().map(String::as_str).collect();
    let mut visited: FxHashSet<&str> = FxHashSet::default();
    let mut queue: VecDeque<(&str, usize)> = VecDeque::new();
    for genre in genres {
        if visited.insert(genre.as_str()) {
            queue.push_back((genre.as_str(), 0));
        }
    }

    while let Some((genre, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for parent in tree.parents(genre) {
            if !visited.insert(parent.as_str()) {
                continue;
            }
            if !exclusions.contains(parent) && !hidden.contains(parent.as_str()) {
                out.push(parent.clone());
                if out.len() >= max_count {
                    return out;
                }
            }
            queue.push_back((parent.as_str(), depth + 1));
        }
    }
    out
}

/// Ancestor genres of `genres`, deduplicated, excluding the inputs themselves
/// and anything in `exclusions`; at most `max_depth` hops and `max_count` entries.
pub fn expand_hierarchy(
    genres: &[String],
    tree: &GenreTree,
    exclusions: &ExclusionSet,
    max_depth: usize,
    max_count: usize,
) -> Vec<String> {
    expand(genres, &[], tree, exclusions, max_depth, max_count)
}

/// Tree plus exclusions, loaded once per process and shared read-only.
#[derive(Debug, Default, Clone)]
pub struct GenreHierarchy {
    pub tree: GenreTree,
    pub exclusions: ExclusionSet,
}

impl GenreHierarchy {
    pub fn load(tree_file: &Path, excluded_genres_file: &Path) -> Result<Self> {
        Ok(Self {
            tree: GenreTree::load(tree_file)?,
            exclusions: ExclusionSet::load(excluded_genres_file)?,
        })
    }

    /// Groupings for a record: ancestors of its primary genres, never
    /// repeating a genre already present in `primary` or `secondary`.
    pub fn groupings(&self, primary: &[String], secondary: &[String], max_depth: usize, max_count: usize) -> Vec<String> {
        let (_, unknown) = self.tree.partition_known(primary);
        if !unknown.is_empty() {
            debug!("Genres not in the RYM tree: {}", unknown.join(", "));
        }
        expand(primary, secondary, &self.tree, &self.exclusions, max_depth, max_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(items: &[&str]) -> Vec<String> {
        items.iter().map(|i| i.to_string()).collect()
    }

    fn post_rock_tree() -> GenreTree {
        GenreTree::from_edges(vec![
            ("Rock", vec![]),
            ("Experimental Rock", vec!["Rock"]),
            ("Post-Rock", vec!["Rock", "Experimental Rock"]),
        ])
    }

    const NESTED: &str = r#"{
        "genreHierarchy": [
            {"name": "Regional Music", "children": [
                {"name": "European Music", "children": [
                    {"name": "Nordic Folk Music"}
                ]}
            ]},
            {"name": "Folk", "children": [
                {"name": "Nordic Folk Music"},
                {"children": []}
            ]},
            {"name": "Metal", "children": [
                {"name": "Black Metal", "children": [
                    {"name": "Black Ambient"}
                ]}
            ]},
            {"name": "Ambient", "children": [
                {"name": "Dark Ambient", "children": [
                    {"name": "Black Ambient"}
                ]}
            ]}
        ]
    }"#;

    #[test]
    fn test_post_rock_dedup() {
        let out = expand_hierarchy(&s(&["Post-Rock"]), &post_rock_tree(), &ExclusionSet::default(), 16, 30);
        assert_eq!(out, s(&["Rock", "Experimental Rock"]));
    }

    #[test]
    fn test_nested_layout_multi_parent() {
        let tree = GenreTree::from_json(NESTED).unwrap();
        assert_eq!(tree.parents("Nordic Folk Music"), s(&["European Music", "Folk"]).as_slice());
        assert_eq!(tree.parents("Black Ambient"), s(&["Black Metal", "Dark Ambient"]).as_slice());
        assert_eq!(tree.multi_parent_count(), 2);
        assert!(tree.parents("Regional Music").is_empty());
    }

    #[test]
    fn test_breadth_first_order() {
        let tree = GenreTree::from_json(NESTED).unwrap();
        let out = expand_hierarchy(&s(&["Black Ambient"]), &tree, &ExclusionSet::default(), 16, 30);
        assert_eq!(out, s(&["Black Metal", "Dark Ambient", "Metal", "Ambient"]));
    }

    #[test]
    fn test_exclusions_are_walked_but_not_emitted() {
        let tree = GenreTree::from_json(NESTED).unwrap();
        let exclusions = ExclusionSet::new(["European Music"]);
        let out = expand_hierarchy(&s(&["Nordic Folk Music"]), &tree, &exclusions, 16, 30);
        assert_eq!(out, s(&["Folk", "Regional Music"]));
        assert!(!out.iter().any(|g| exclusions.contains(g)));
    }

    #[test]
    fn test_caps() {
        let tree = GenreTree::from_json(NESTED).unwrap();
        let none = ExclusionSet::default();
        let seeds = s(&["Black Ambient"]);
        assert_eq!(expand_hierarchy(&seeds, &tree, &none, 1, 30), s(&["Black Metal", "Dark Ambient"]));
        assert_eq!(expand_hierarchy(&seeds, &tree, &none, 16, 3).len(), 3);
        assert!(expand_hierarchy(&seeds, &tree, &none, 16, 0).is_empty());
        assert!(expand_hierarchy(&seeds, &tree, &none, 0, 30).is_empty());
    }

    #[test]
    fn test_cycles_terminate() {
        let tree = GenreTree::from_edges(vec![("A", vec!["B"]), ("B", vec!["C"]), ("C", vec!["B", "A"])]);
        let out = expand_hierarchy(&s(&["A"]), &tree, &ExclusionSet::default(), 100, 100);
        assert_eq!(out, s(&["B", "C"]));
        // Paths stop at the repeated genre
        assert_eq!(tree.genre_paths("A"), vec![s(&["C", "B", "A"])]);
    }

    #[test]
    fn test_inputs_and_suppressed_not_emitted() {
        let hierarchy = GenreHierarchy {
            tree: post_rock_tree(),
            exclusions: ExclusionSet::default(),
        };
        let out = hierarchy.groupings(&s(&["Post-Rock", "Rock"]), &[], 16, 30);
        assert_eq!(out, s(&["Experimental Rock"]));
        let out = hierarchy.groupings(&s(&["Post-Rock"]), &s(&["Experimental Rock"]), 16, 30);
        assert_eq!(out, s(&["Rock"]));
    }

    #[test]
    fn test_flat_layout_skips_dangling_parent() {
        let tree = GenreTree::from_json(r#"{"Shoegaze": ["Rock", "Missing"], "Rock": [], "Bad": 3}"#).unwrap();
        assert_eq!(tree.parents("Shoegaze"), s(&["Rock"]).as_slice());
        assert!(!tree.contains("Bad"));
    }

    #[test]
    fn test_genre_paths() {
        let tree = GenreTree::from_json(NESTED).unwrap();
        assert_eq!(
            tree.genre_paths("Black Ambient"),
            vec![
                s(&["Metal", "Black Metal", "Black Ambient"]),
                s(&["Ambient", "Dark Ambient", "Black Ambient"]),
            ]
        );
        assert!(tree.genre_paths("Vaporwave").is_empty());
    }

    #[test]
    fn test_partition_known() {
        let tree = post_rock_tree();
        let genres = s(&["Rock", "Vaporwave"]);
        let (known, unknown) = tree.partition_known(&genres);
        assert_eq!(known, vec!["Rock"]);
        assert_eq!(unknown, vec!["Vaporwave"]);
    }

    #[test]
    fn test_exclusion_file_layouts() {
        let set = ExclusionSet::from_json(r#"{"excluded_meta_genres": ["Regional Music"], "description": "x"}"#).unwrap();
        assert!(set.contains("Regional Music"));
        let set = ExclusionSet::from_json(r#"["A", "B"]"#).unwrap();
        assert_eq!(set.len(), 2);
        assert!(matches!(ExclusionSet::from_json("{}"), Err(Error::HierarchyLoad(_))));
    }

    #[test]
    fn test_malformed_tree_is_load_error() {
        assert!(matches!(GenreTree::from_json("[1, 2]"), Err(Error::HierarchyLoad(_))));
        assert!(matches!(GenreTree::from_json("{"), Err(Error::HierarchyLoad(_))));
    }

    #[test]
    fn test_bundled_tree() {
        let hierarchy = GenreHierarchy {
            tree: GenreTree::from_json(include_str!("../data/rym-genre-tree.json")).unwrap(),
            exclusions: ExclusionSet::from_json(include_str!("../data/excluded-meta-genres.json")).unwrap(),
        };
        assert_eq!(hierarchy.tree.parents("Pop Rock"), ["Rock", "Pop"]);
        assert_eq!(
            hierarchy.groupings(&s(&["Post-Rock"]), &[], 16, 30),
            s(&["Experimental Rock", "Rock"])
        );
        assert_eq!(hierarchy.groupings(&s(&["Russian Rock"]), &[], 16, 30), Vec::<String>::new());
    }
}
