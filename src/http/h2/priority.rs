//! Stream priority scheduler (RFC 7540 Section 5.3)
//!
//! Streams form a dependency tree under the implicit root (stream 0). The
//! scheduler only decides the order in which streams with pending DATA are
//! served: starting at the root it repeatedly steps into the heaviest child
//! whose subtree has something to send, and stops at the first stream that
//! is itself ready. Ties go to the stream registered first, so the result
//! is deterministic.
//!
//! All walks are iterative with an explicit stack; reprioritizations that
//! would form a cycle are resolved by first moving the new parent up
//! (RFC 7540 Section 5.3.3).

use std::collections::HashMap;

use tracing::trace;

use super::error::{Error, ErrorCode, Result};
use super::frames::{PrioritySpec, DEFAULT_WEIGHT};
use super::stream::StreamId;

const ROOT: StreamId = 0;

/// Default bound on tree size; PRIORITY frames for idle streams past this are ignored
pub const DEFAULT_MAX_NODES: usize = 1024;

#[derive(Debug, Clone)]
struct Node {
    parent: StreamId,
    weight: u16,
    children: Vec<StreamId>,
    /// Registration order, used for tie-breaking
    order: u64,
}

/// Weighted dependency tree
#[derive(Debug)]
pub struct PriorityTree {
    nodes: HashMap<StreamId, Node>,
    next_order: u64,
    max_nodes: usize,
}

impl Default for PriorityTree {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NODES)
    }
}

impl PriorityTree {
    pub fn new(max_nodes: usize) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT,
            Node {
                parent: ROOT,
                weight: DEFAULT_WEIGHT,
                children: Vec::new(),
                order: 0,
            },
        );
        PriorityTree {
            nodes,
            next_order: 1,
            max_nodes,
        }
    }

    pub fn contains(&self, id: StreamId) -> bool {
        id != ROOT && self.nodes.contains_key(&id)
    }

    /// Number of streams in the tree (the root is not counted)
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn weight(&self, id: StreamId) -> Option<u16> {
        self.nodes.get(&id).filter(|_| id != ROOT).map(|n| n.weight)
    }

    pub fn parent(&self, id: StreamId) -> Option<StreamId> {
        self.nodes.get(&id).filter(|_| id != ROOT).map(|n| n.parent)
    }

    pub fn children(&self, id: StreamId) -> &[StreamId] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Attach a stream, or move it if it is already in the tree
    ///
    /// A dependency on a stream that is not in the tree falls back to the
    /// default priority (root, weight 16). Depending on itself is a stream
    /// PROTOCOL_ERROR.
    pub fn register(&mut self, id: StreamId, spec: PrioritySpec) -> Result<()> {
        if id == ROOT {
            return Err(Error::protocol("priority for stream 0"));
        }
        if spec.stream_dependency == id {
            return Err(Error::stream(
                id,
                ErrorCode::ProtocolError,
                "stream depends on itself",
            ));
        }

        let spec = if self.nodes.contains_key(&spec.stream_dependency) {
            spec
        } else {
            PrioritySpec::default()
        };
        let parent = spec.stream_dependency;

        if self.nodes.contains_key(&id) {
            // Moving under one of our own descendants: lift it to our old parent first
            if self.is_descendant(parent, id) {
                let old_parent = self.nodes.get(&id).map_or(ROOT, |n| n.parent);
                self.detach(parent);
                self.attach(parent, old_parent);
            }
            self.detach(id);
            if let Some(node) = self.nodes.get_mut(&id) {
                node.weight = spec.weight;
            }
        } else {
            let order = self.next_order;
            self.next_order += 1;
            self.nodes.insert(
                id,
                Node {
                    parent,
                    weight: spec.weight,
                    children: Vec::new(),
                    order,
                },
            );
        }

        if spec.exclusive {
            let siblings = match self.nodes.get_mut(&parent) {
                Some(p) => std::mem::take(&mut p.children),
                None => Vec::new(),
            };
            for sibling in siblings {
                if sibling == id {
                    continue;
                }
                self.attach(sibling, id);
            }
        }
        self.attach(id, parent);

        trace!(
            stream_id = id,
            parent,
            weight = spec.weight,
            exclusive = spec.exclusive,
            "stream prioritized"
        );
        Ok(())
    }

    /// PRIORITY frame handling: like `register`, but new idle streams are
    /// only tracked while the tree is below its size bound
    pub fn reprioritize(&mut self, id: StreamId, spec: PrioritySpec) -> Result<()> {
        if !self.contains(id) && self.len() >= self.max_nodes {
            if spec.stream_dependency == id {
                return Err(Error::stream(
                    id,
                    ErrorCode::ProtocolError,
                    "stream depends on itself",
                ));
            }
            trace!(stream_id = id, "priority tree full, ignoring PRIORITY");
            return Ok(());
        }
        self.register(id, spec)
    }

    /// Remove a stream, handing its children to its parent
    ///
    /// The removed stream's weight is split among its children in
    /// proportion to their own weights (RFC 7540 Section 5.3.4).
    pub fn remove(&mut self, id: StreamId) {
        if id == ROOT {
            return;
        }
        let node = match self.nodes.remove(&id) {
            Some(n) => n,
            None => return,
        };
        let parent = if self.nodes.contains_key(&node.parent) {
            node.parent
        } else {
            ROOT
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|&c| c != id);
        }

        let total: u32 = node
            .children
            .iter()
            .filter_map(|c| self.nodes.get(c))
            .map(|c| u32::from(c.weight))
            .sum();

        for child in node.children {
            if let Some(c) = self.nodes.get_mut(&child) {
                if total > 0 {
                    let share = u32::from(node.weight) * u32::from(c.weight) / total;
                    c.weight = share.clamp(1, 256) as u16;
                }
                c.parent = parent;
            }
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.children.push(child);
            }
        }
    }

    /// Pick the next stream to serve among those for which `ready` holds
    pub fn next<F>(&self, ready: F) -> Option<StreamId>
    where
        F: Fn(StreamId) -> bool,
    {
        let mut current = ROOT;
        loop {
            let node = self.nodes.get(&current)?;
            let mut best: Option<(&Node, StreamId)> = None;

            for &child in &node.children {
                let candidate = match self.nodes.get(&child) {
                    Some(c) => c,
                    None => continue,
                };
                if !self.subtree_ready(child, &ready) {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((b, _)) => {
                        candidate.weight > b.weight
                            || (candidate.weight == b.weight && candidate.order < b.order)
                    }
                };
                if better {
                    best = Some((candidate, child));
                }
            }

            let (_, chosen) = best?;
            if ready(chosen) {
                return Some(chosen);
            }
            current = chosen;
        }
    }

    fn subtree_ready<F>(&self, id: StreamId, ready: &F) -> bool
    where
        F: Fn(StreamId) -> bool,
    {
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            if ready(n) {
                return true;
            }
            if let Some(node) = self.nodes.get(&n) {
                stack.extend_from_slice(&node.children);
            }
        }
        false
    }

    /// Whether `candidate` sits somewhere below `ancestor`
    fn is_descendant(&self, candidate: StreamId, ancestor: StreamId) -> bool {
        let mut current = candidate;
        // a well-formed tree has no path longer than its node count
        for _ in 0..self.nodes.len() {
            if current == ROOT {
                return false;
            }
            let parent = match self.nodes.get(&current) {
                Some(n) => n.parent,
                None => return false,
            };
            if parent == ancestor {
                return true;
            }
            current = parent;
        }
        false
    }

    fn detach(&mut self, id: StreamId) {
        let parent = match self.nodes.get(&id) {
            Some(n) => n.parent,
            None => return,
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|&c| c != id);
        }
    }

    fn attach(&mut self, id: StreamId, parent: StreamId) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.parent = parent;
        }
        if let Some(p) = self.nodes.get_mut(&parent) {
            if !p.children.contains(&id) {
                p.children.push(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(dep: StreamId, exclusive: bool, weight: u16) -> PrioritySpec {
        PrioritySpec::new(dep, exclusive, weight)
    }

    #[test]
    fn test_heavier_sibling_first() {
        let mut tree = PriorityTree::default();
        tree.register(1, spec(0, false, 10)).unwrap();
        tree.register(3, spec(0, false, 200)).unwrap();

        assert_eq!(tree.next(|_| true), Some(3));
        assert_eq!(tree.next(|id| id == 1), Some(1));
        assert_eq!(tree.next(|_| false), None);
    }

    #[test]
    fn test_tie_goes_to_first_registered() {
        let mut tree = PriorityTree::default();
        tree.register(5, spec(0, false, 16)).unwrap();
        tree.register(3, spec(0, false, 16)).unwrap();
        assert_eq!(tree.next(|_| true), Some(5));
    }

    #[test]
    fn test_ready_parent_before_children() {
        let mut tree = PriorityTree::default();
        tree.register(1, spec(0, false, 16)).unwrap();
        tree.register(3, spec(1, false, 256)).unwrap();

        assert_eq!(tree.next(|_| true), Some(1));
        assert_eq!(tree.next(|id| id == 3), Some(3));
    }

    #[test]
    fn test_exclusive_adopts_siblings() {
        let mut tree = PriorityTree::default();
        tree.register(1, spec(0, false, 16)).unwrap();
        tree.register(3, spec(0, false, 16)).unwrap();
        tree.register(5, spec(0, true, 16)).unwrap();

        assert_eq!(tree.children(0), &[5]);
        assert_eq!(tree.children(5), &[1, 3]);
        assert_eq!(tree.parent(1), Some(5));
    }

    #[test]
    fn test_unknown_parent_uses_default() {
        let mut tree = PriorityTree::default();
        tree.register(3, spec(99, false, 200)).unwrap();
        assert_eq!(tree.parent(3), Some(0));
        assert_eq!(tree.weight(3), Some(16));
    }

    #[test]
    fn test_self_dependency() {
        let mut tree = PriorityTree::default();
        let err = tree.register(7, spec(7, false, 16)).unwrap_err();
        assert_eq!(err.stream_id(), Some(7));
        assert_eq!(err.code(), ErrorCode::ProtocolError);
    }

    #[test]
    fn test_remove_reparents_children() {
        let mut tree = PriorityTree::default();
        tree.register(1, spec(0, false, 10)).unwrap();
        tree.register(3, spec(0, false, 200)).unwrap();
        tree.register(5, spec(3, false, 16)).unwrap();

        tree.remove(3);
        assert!(!tree.contains(3));
        assert_eq!(tree.parent(5), Some(0));
        // sole child inherits the removed stream's full weight
        assert_eq!(tree.weight(5), Some(200));
        assert_eq!(tree.next(|id| id == 1), Some(1));
        assert_eq!(tree.next(|_| true), Some(5));
    }

    #[test]
    fn test_remove_splits_weight() {
        let mut tree = PriorityTree::default();
        tree.register(1, spec(0, false, 100)).unwrap();
        tree.register(3, spec(1, false, 30)).unwrap();
        tree.register(5, spec(1, false, 10)).unwrap();

        tree.remove(1);
        assert_eq!(tree.weight(3), Some(75));
        assert_eq!(tree.weight(5), Some(25));
    }

    #[test]
    fn test_move_under_descendant() {
        // RFC 7540 Section 5.3.3 example: A moves under its child D
        let (a, b, c, d) = (1, 3, 5, 7);
        let mut tree = PriorityTree::default();
        tree.register(a, spec(0, false, 16)).unwrap();
        tree.register(b, spec(a, false, 16)).unwrap();
        tree.register(c, spec(a, false, 16)).unwrap();
        tree.register(d, spec(c, false, 16)).unwrap();

        tree.register(a, spec(d, false, 16)).unwrap();

        assert_eq!(tree.parent(d), Some(0));
        assert_eq!(tree.parent(a), Some(d));
        assert_eq!(tree.parent(b), Some(a));
        assert_eq!(tree.parent(c), Some(a));
    }

    #[test]
    fn test_idle_priority_flood_bounded() {
        let mut tree = PriorityTree::new(2);
        tree.reprioritize(1, spec(0, false, 16)).unwrap();
        tree.reprioritize(3, spec(0, false, 16)).unwrap();
        tree.reprioritize(5, spec(0, false, 16)).unwrap();
        assert_eq!(tree.len(), 2);
        assert!(!tree.contains(5));
    }
}
