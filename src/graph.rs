//! The node arena and the maintenance passes that run on a built graph.

use ahash::AHashMap;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::alphabet::{DnaAlphabet, StrictDna};
use crate::error::GraphError;
use crate::node::{DeBruijnEdge, DeBruijnNode, Direction, NodeId};
use crate::two_bits::{canonical, decode_kmer, encode_kmer};

/// De Bruijn graph: nodes addressed by [`NodeId`] plus the canonical k-mer -> node index.
///
/// Nodes are stored in ascending k-mer order, so ids are the same for every build of the
/// same input. Removed nodes leave an empty slot, ids are never reused.
#[derive(Debug)]
pub struct DeBruijnGraph {
    k: usize,
    fold_reverse_complement: bool,
    nodes: Vec<Option<DeBruijnNode>>,
    index: AHashMap<u64, NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub total_kmer_count: u64,
    pub self_loops: usize,
    pub max_extensions: usize,
    pub visited: usize,
}

impl fmt::Display for GraphStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} nodes, {} edges, {} k-mer occurrences, {} self-loops, max degree {}, {} visited",
            self.nodes,
            self.edges,
            self.total_kmer_count,
            self.self_loops,
            self.max_extensions,
            self.visited
        )
    }
}

impl DeBruijnGraph {
    /// Builds the arena from distinct nodes (one per k-mer value).
    pub(crate) fn from_nodes(
        k: usize,
        fold_reverse_complement: bool,
        mut nodes: Vec<DeBruijnNode>,
    ) -> Result<Self, GraphError> {
        nodes.par_sort_unstable_by_key(|node| node.kmer());
        let mut index = AHashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            let previous = index.insert(node.kmer(), NodeId::new(i)?);
            debug_assert!(previous.is_none(), "two nodes for the same k-mer");
        }
        Ok(Self {
            k,
            fold_reverse_complement,
            nodes: nodes.into_iter().map(Some).collect(),
            index,
        })
    }

    /// Builds the arena from slots that keep their position as id. Fails if two slots
    /// hold the same k-mer.
    pub(crate) fn from_slots(
        k: usize,
        fold_reverse_complement: bool,
        nodes: Vec<Option<DeBruijnNode>>,
    ) -> Result<Self, GraphError> {
        let mut index = AHashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if let Some(node) = node {
                let id = NodeId::new(i)?;
                if let Some(first) = index.insert(node.kmer(), id) {
                    return Err(GraphError::DuplicateKmer {
                        kmer: node.kmer(),
                        first,
                        second: id,
                    });
                }
            }
        }
        Ok(Self {
            k,
            fold_reverse_complement,
            nodes,
            index,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// true if a k-mer and its reverse complement share a node
    pub fn is_folded(&self) -> bool {
        self.fold_reverse_complement
    }

    pub fn node_count(&self) -> usize {
        self.index.len()
    }

    /// Number of slots in the arena, removed nodes included.
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    /// Number of adjacencies. Each one is stored twice (right on one end, left on the other)
    /// and counted once.
    pub fn edge_count(&self) -> usize {
        self.par_nodes()
            .map(|(_, node)| node.right_extensions().len())
            .sum()
    }

    pub fn total_kmer_count(&self) -> u64 {
        self.par_nodes()
            .map(|(_, node)| node.kmer_count())
            .sum()
    }

    pub fn node(&self, id: NodeId) -> Result<&DeBruijnNode, GraphError> {
        self.nodes
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(GraphError::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut DeBruijnNode, GraphError> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(GraphError::UnknownNode(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    /// Node of a packed k-mer, as produced by the extractor.
    pub fn node_id_of_kmer(&self, kmer: u64) -> Option<NodeId> {
        self.index.get(&kmer).copied()
    }

    /// Node of an ASCII k-mer, in either orientation when strands are folded.
    pub fn node_id(&self, bases: &[u8]) -> Option<NodeId> {
        if bases.len() != self.k {
            return None;
        }
        let normalised = bases
            .iter()
            .map(|symbol| StrictDna.lookup(*symbol))
            .collect::<Option<Vec<u8>>>()?;
        let forward = encode_kmer(normalised.into_iter());
        let kmer = if self.fold_reverse_complement {
            canonical(forward, self.k).0
        } else {
            forward
        };
        self.node_id_of_kmer(kmer)
    }

    pub fn kmer_string(&self, id: NodeId) -> Result<String, GraphError> {
        let node = self.node(id)?;
        Ok(String::from_utf8_lossy(&decode_kmer(node.kmer(), self.k)).into_owned())
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &DeBruijnNode)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| node.as_ref().map(|node| (NodeId::from(i as u32), node)))
    }

    pub fn par_nodes(&self) -> impl ParallelIterator<Item = (NodeId, &DeBruijnNode)> + '_ {
        self.nodes
            .par_iter()
            .enumerate()
            .filter_map(|(i, node)| node.as_ref().map(|node| (NodeId::from(i as u32), node)))
    }

    pub(crate) fn slots(&self) -> &[Option<DeBruijnNode>] {
        &self.nodes
    }

    pub fn add_right_extension(
        &self,
        node: NodeId,
        neighbour: NodeId,
        is_same_orientation: bool,
    ) -> Result<(), GraphError> {
        self.check(neighbour)?;
        self.node(node)?
            .add_right_extension(neighbour, is_same_orientation);
        Ok(())
    }

    pub fn add_left_extension(
        &self,
        node: NodeId,
        neighbour: NodeId,
        is_same_orientation: bool,
    ) -> Result<(), GraphError> {
        self.check(neighbour)?;
        self.node(node)?
            .add_left_extension(neighbour, is_same_orientation);
        Ok(())
    }

    /// Wires `from -> to`: a right extension on `from` and the mirrored left extension on `to`.
    pub fn add_edge(
        &self,
        from: NodeId,
        to: NodeId,
        is_same_orientation: bool,
    ) -> Result<(), GraphError> {
        let from_node = self.node(from)?;
        let to_node = self.node(to)?;
        from_node.add_right_extension(to, is_same_orientation);
        to_node.add_left_extension(from, is_same_orientation);
        Ok(())
    }

    /// Removes the extension to `neighbour` from `node` (right side first). Thread-safe.
    pub fn remove_extension(&self, node: NodeId, neighbour: NodeId) -> Result<bool, GraphError> {
        self.check(neighbour)?;
        Ok(self.node(node)?.remove_extension(neighbour))
    }

    /// Removes both halves of the adjacency `from -> to`. Thread-safe.
    pub fn remove_edge(&self, from: NodeId, to: NodeId) -> Result<bool, GraphError> {
        let from_node = self.node(from)?;
        let to_node = self.node(to)?;
        let right = from_node.remove_extension_in(Direction::Right, to);
        let left = to_node.remove_extension_in(Direction::Left, from);
        Ok(right || left)
    }

    pub fn mark_extension_invalid(
        &self,
        node: NodeId,
        neighbour: NodeId,
    ) -> Result<bool, GraphError> {
        self.invalidation().mark_extension(node, neighbour)
    }

    pub fn mark_edge_invalid(&self, from: NodeId, to: NodeId) -> Result<bool, GraphError> {
        self.invalidation().mark_edge(from, to)
    }

    /// Starts a marking phase. Marks can be issued from any number of threads through the
    /// returned handle; the graph cannot be purged while the handle is alive.
    pub fn invalidation(&self) -> Invalidation<'_> {
        Invalidation { graph: self }
    }

    /// Physically removes every edge marked invalid, node by node in parallel.
    /// Returns the number of map entries removed.
    pub fn purge_invalid_extensions(&mut self) -> usize {
        let removed: usize = self
            .nodes
            .par_iter_mut()
            .filter_map(Option::as_mut)
            .map(DeBruijnNode::purge_invalid_extensions)
            .sum();
        debug!("purged {} invalid extensions", removed);
        removed
    }

    pub fn mark_node_as_visited(&self, id: NodeId) -> Result<(), GraphError> {
        self.node(id)?.mark_node_as_visited();
        Ok(())
    }

    pub fn is_node_visited(&self, id: NodeId) -> Result<bool, GraphError> {
        Ok(self.node(id)?.is_node_visited())
    }

    /// Removes a node from the graph, detaching it from every neighbour first.
    pub fn remove_node(&mut self, id: NodeId) -> Result<DeBruijnNode, GraphError> {
        let node = self
            .nodes
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(GraphError::UnknownNode(id))?;
        for direction in [Direction::Left, Direction::Right] {
            for (neighbour, _) in node.neighbours(direction) {
                // self-loops went away with the node itself
                if let Some(Some(neighbour)) = self.nodes.get(neighbour.index()) {
                    neighbour.remove_extension_in(direction.opposite(), id);
                }
            }
        }
        self.index.remove(&node.kmer());
        Ok(node)
    }

    /// true if every right extension `a -> b` is mirrored by a left extension `b <- a` with
    /// the same orientation, and the other way round.
    pub fn is_symmetric(&self) -> bool {
        self.find_unmirrored_extension().is_none()
    }

    /// Some extension `(node, direction, neighbour)` whose mirrored half is missing or
    /// disagrees on orientation. Only one extension lock is held at a time.
    pub fn find_unmirrored_extension(&self) -> Option<(NodeId, Direction, NodeId)> {
        self.par_nodes().find_map_any(|(id, node)| {
            [Direction::Left, Direction::Right]
                .into_iter()
                .find_map(|direction| {
                    node.neighbours(direction)
                        .into_iter()
                        .find(|(neighbour, same_orientation)| {
                            let mirrored = self.node(*neighbour).ok().and_then(|other| {
                                other
                                    .extensions(direction.opposite())
                                    .get(&id)
                                    .map(|mirror| mirror.is_same_orientation())
                            });
                            mirrored != Some(*same_orientation)
                        })
                        .map(|(neighbour, _)| (id, direction, neighbour))
                })
        })
    }

    pub fn stats(&self) -> GraphStats {
        let (edges, self_loops, max_extensions, visited) = self
            .par_nodes()
            .map(|(id, node)| {
                let (right, self_loop) = {
                    let right = node.right_extensions();
                    (right.len(), right.contains_key(&id))
                };
                (
                    right,
                    usize::from(self_loop),
                    node.extensions_count(),
                    usize::from(node.is_node_visited()),
                )
            })
            .reduce(
                || (0, 0, 0, 0),
                |a, b| (a.0 + b.0, a.1 + b.1, a.2.max(b.2), a.3 + b.3),
            );
        GraphStats {
            nodes: self.node_count(),
            edges,
            total_kmer_count: self.total_kmer_count(),
            self_loops,
            max_extensions,
            visited,
        }
    }

    fn check(&self, id: NodeId) -> Result<(), GraphError> {
        self.node(id).map(|_| ())
    }
}

/// Marking phase of the mark-then-purge protocol.
///
/// Holds a shared borrow of the graph, so [`DeBruijnGraph::purge_invalid_extensions`]
/// (which needs `&mut`) cannot start until every handle is dropped.
#[derive(Clone, Copy)]
pub struct Invalidation<'a> {
    graph: &'a DeBruijnGraph,
}

impl<'a> Invalidation<'a> {
    /// Marks the extension of `node` towards `neighbour` (right side first).
    pub fn mark_extension(&self, node: NodeId, neighbour: NodeId) -> Result<bool, GraphError> {
        self.graph.check(neighbour)?;
        Ok(self.graph.node(node)?.mark_extension_invalid(neighbour))
    }

    /// Marks both halves of the adjacency `from -> to`.
    pub fn mark_edge(&self, from: NodeId, to: NodeId) -> Result<bool, GraphError> {
        let from_node = self.graph.node(from)?;
        let to_node = self.graph.node(to)?;
        let right = from_node.mark_extension_invalid_in(Direction::Right, to);
        let left = to_node.mark_extension_invalid_in(Direction::Left, from);
        Ok(right || left)
    }

    /// Marks many adjacencies in parallel. Returns how many were found.
    pub fn mark_edges(&self, edges: &[(NodeId, NodeId)]) -> Result<usize, GraphError> {
        edges
            .par_iter()
            .map(|(from, to)| self.mark_edge(*from, *to).map(usize::from))
            .try_reduce(|| 0, |a, b| Ok(a + b))
    }

    /// Marks every extension of `id` and the mirrored halves on its neighbours, which is
    /// what isolating a node before erosion needs.
    ///
    /// The node's own side is released before any neighbour is locked, so this can run
    /// next to the thread-safe edge mutators.
    pub fn mark_node_edges(&self, id: NodeId) -> Result<(), GraphError> {
        let node = self.graph.node(id)?;
        for direction in [Direction::Left, Direction::Right] {
            let neighbours: Vec<NodeId> = {
                let extensions = node.extensions(direction);
                extensions.values().for_each(DeBruijnEdge::mark_invalid);
                extensions.keys().copied().collect()
            };
            for neighbour in neighbours {
                if let Ok(other) = self.graph.node(neighbour) {
                    other.mark_extension_invalid_in(direction.opposite(), id);
                }
            }
        }
        Ok(())
    }
}
