use anyhow::{Result, anyhow};
use log::debug;
use std::collections::HashMap;
use std::fmt;

/// Position of a snapshot in the tree, parsed from the `SnapshotName(-<n>)*`
/// key of a machine-readable listing. The unsuffixed root has an empty path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SnapshotId {
    path: Vec<u32>,
}

impl SnapshotId {
    pub fn from_key(key: &str) -> Option<Self> {
        let suffix = key.strip_prefix("SnapshotName")?;
        if suffix.is_empty() {
            return Some(Self { path: Vec::new() });
        }
        let mut path = Vec::new();
        for segment in suffix.strip_prefix('-')?.split('-') {
            path.push(segment.parse::<u32>().ok()?);
        }
        Some(Self { path })
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    fn parent_path(&self) -> Option<&[u32]> {
        self.path.split_last().map(|(_, rest)| rest)
    }

    /// Segment-wise, so `-1` contains `-1-1` but not `-10`.
    pub fn is_or_descends_from(&self, other: &SnapshotId) -> bool {
        self.path.starts_with(&other.path)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SnapshotName")?;
        for segment in &self.path {
            write!(f, "-{segment}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub name: String,
}

/// Parsed form of `VBoxManage snapshot <vm> list --machinereadable` output.
#[derive(Debug, Default)]
pub struct Listing {
    pub snapshots: Vec<Snapshot>,
    pub current: Option<SnapshotId>,
}

/// Extracts all snapshot (id, name) pairs in listing order; other lines
/// are ignored wherever they appear.
pub fn parse_listing(text: &str) -> Listing {
    let mut listing = Listing::default();
    for line in text.lines() {
        let Some((key, rest)) = line.split_once('=') else {
            continue;
        };
        let Some(value) = quoted_value(rest) else {
            continue;
        };
        if let Some(id) = SnapshotId::from_key(key.trim()) {
            listing.snapshots.push(Snapshot {
                id,
                name: value.to_string(),
            });
        } else if key.trim() == "CurrentSnapshotNode" {
            listing.current = SnapshotId::from_key(value);
        }
    }
    listing
}

// Text up to the next quote, no escape handling.
fn quoted_value(rest: &str) -> Option<&str> {
    let (value, _) = rest.trim().strip_prefix('"')?.split_once('"')?;
    Some(value)
}

/// Case-insensitive name substrings marking snapshots that must not be
/// deleted. Empty entries are dropped, so an empty argument protects nothing.
#[derive(Clone, Debug, Default)]
pub struct ProtectedNames {
    needles: Vec<String>,
}

impl ProtectedNames {
    pub fn new(entries: impl IntoIterator<Item = String>) -> Self {
        Self {
            needles: entries
                .into_iter()
                .filter(|entry| !entry.is_empty())
                .map(|entry| entry.to_lowercase())
                .collect(),
        }
    }

    pub fn parse(arg: &str) -> Self {
        Self::new(arg.split(',').map(str::to_string))
    }

    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.needles.iter().any(|needle| name.contains(needle))
    }
}

struct Node {
    snapshot: Snapshot,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// One VM's snapshot set, linked into an explicit tree. Built once per run
/// from a fresh listing and never mutated.
pub struct SnapshotTree {
    nodes: Vec<Node>,
}

/// Snapshots selected for deletion, children before their parents.
#[derive(Debug)]
pub struct CleanupPlan {
    pub doomed: Vec<Snapshot>,
    /// A protected snapshot below the requested root withholds the root
    /// itself, so the protected snapshot keeps its base image.
    pub root_blocked: bool,
}

impl SnapshotTree {
    pub fn new(snapshots: Vec<Snapshot>) -> Self {
        let mut nodes: Vec<Node> = snapshots
            .into_iter()
            .map(|snapshot| Node {
                snapshot,
                parent: None,
                children: Vec::new(),
            })
            .collect();
        let index: HashMap<Vec<u32>, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.snapshot.id.path.clone(), i))
            .collect();
        for i in 0..nodes.len() {
            let parent = nodes[i]
                .snapshot
                .id
                .parent_path()
                .and_then(|path| index.get(path).copied());
            if let Some(p) = parent {
                nodes[i].parent = Some(p);
                nodes[p].children.push(i);
            }
        }
        Self { nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Preorder walk yielding (display depth, snapshot).
    pub fn walk(&self) -> Vec<(usize, &Snapshot)> {
        let mut out = Vec::new();
        let mut stack: Vec<(usize, usize)> = self
            .nodes
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(i, _)| (0, i))
            .collect();
        while let Some((depth, i)) = stack.pop() {
            out.push((depth, &self.nodes[i].snapshot));
            for &child in self.nodes[i].children.iter().rev() {
                stack.push((depth + 1, child));
            }
        }
        out
    }

    // Case-insensitive name match, last listing occurrence wins. An empty
    // root_name selects the unsuffixed root, i.e. the whole tree.
    fn resolve_root(&self, root_name: &str) -> Result<usize> {
        if root_name.is_empty() {
            return self
                .nodes
                .iter()
                .position(|node| node.snapshot.id.is_root())
                .ok_or_else(|| anyhow!("Listing contains no root snapshot"));
        }
        let wanted = root_name.to_lowercase();
        let mut found = None;
        for (i, node) in self.nodes.iter().enumerate() {
            if node.snapshot.name.to_lowercase() == wanted {
                found = Some(i);
            }
        }
        found.ok_or_else(|| anyhow!("Failed to find root snapshot '{root_name}'"))
    }

    /// Selects the subtree rooted at `root_name` for deletion, skipping
    /// protected snapshots. Protection never extends downward; children of
    /// a protected snapshot remain selected.
    pub fn cleanup_plan(&self, root_name: &str, protected: &ProtectedNames) -> Result<CleanupPlan> {
        let root = self.resolve_root(root_name)?;
        let root_id = self.nodes[root].snapshot.id.clone();

        let mut doomed: Vec<&Snapshot> = Vec::new();
        let mut root_blocked = false;
        for node in &self.nodes {
            if !node.snapshot.id.is_or_descends_from(&root_id) {
                continue;
            }
            if protected.matches(&node.snapshot.name) {
                debug!("Skipping protected snapshot '{}'", node.snapshot.name);
                root_blocked = true;
            } else {
                doomed.push(&node.snapshot);
            }
        }
        if root_blocked {
            doomed.retain(|snapshot| snapshot.id != root_id);
        }
        // Deeper snapshots first; a child must be deleted before its parent.
        doomed.sort_by(|a, b| b.id.depth().cmp(&a.id.depth()));

        Ok(CleanupPlan {
            doomed: doomed.into_iter().cloned().collect(),
            root_blocked,
        })
    }
}
