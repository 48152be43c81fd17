use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use super::DumpError;
use crate::error::check_kmer_length;
use crate::graph::DeBruijnGraph;
use crate::node::{DeBruijnNode, Direction, NodeId, NodeState};
use crate::two_bits::kmer_mask;
use crate::Count;

const BUFFER_CAPACITY: usize = 9_000_000;

/// Plain-data image of a graph. Empty slots are kept so node ids survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub k: usize,
    pub fold_reverse_complement: bool,
    pub nodes: Vec<Option<NodeSnapshot>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub kmer: u64,
    pub sequence_index: usize,
    pub kmer_position: usize,
    pub count_normal: Count,
    pub count_reverse_complement: Option<Count>,
    pub state: NodeState,
    pub right: Vec<EdgeSnapshot>,
    pub left: Vec<EdgeSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    pub neighbour: NodeId,
    pub same_orientation: bool,
    pub valid: bool,
}

fn edges_of(node: &DeBruijnNode, direction: Direction) -> Vec<EdgeSnapshot> {
    let mut edges: Vec<EdgeSnapshot> = node
        .extensions(direction)
        .iter()
        .map(|(neighbour, edge)| EdgeSnapshot {
            neighbour: *neighbour,
            same_orientation: edge.is_same_orientation(),
            valid: edge.is_valid(),
        })
        .collect();
    edges.sort_unstable_by_key(|edge| edge.neighbour);
    edges
}

impl From<&DeBruijnGraph> for GraphSnapshot {
    fn from(graph: &DeBruijnGraph) -> Self {
        let nodes = graph
            .slots()
            .iter()
            .map(|slot| {
                slot.as_ref().map(|node| NodeSnapshot {
                    kmer: node.kmer(),
                    sequence_index: node.sequence_index(),
                    kmer_position: node.kmer_position(),
                    count_normal: node.count_normal_orientation(),
                    count_reverse_complement: node.count_reverse_complement(),
                    state: node.state(),
                    right: edges_of(node, Direction::Right),
                    left: edges_of(node, Direction::Left),
                })
            })
            .collect();
        Self {
            k: graph.k(),
            fold_reverse_complement: graph.is_folded(),
            nodes,
        }
    }
}

impl GraphSnapshot {
    /// Rebuilds the graph. Fails unless the snapshot describes a graph the builder could
    /// have produced: one node per k-mer, k-mers within `k` bases, counters matching the
    /// strand folding, and every extension pointing to a node that mirrors it.
    pub fn into_graph(self) -> Result<DeBruijnGraph, DumpError> {
        check_kmer_length(self.k)?;
        let mask = kmer_mask(self.k);
        let mut slots = Vec::with_capacity(self.nodes.len());
        let mut edges = Vec::with_capacity(self.nodes.len());
        for (index, snapshot) in self.nodes.into_iter().enumerate() {
            match snapshot {
                Some(snapshot) => {
                    let id = NodeId::new(index)?;
                    if snapshot.kmer & !mask != 0 {
                        return Err(DumpError::KmerOutOfRange {
                            node: id,
                            kmer: snapshot.kmer,
                            k: self.k,
                        });
                    }
                    if snapshot.count_reverse_complement.is_some() != self.fold_reverse_complement
                    {
                        return Err(DumpError::FoldMismatch { node: id });
                    }
                    let node = DeBruijnNode::with_counts(
                        snapshot.kmer,
                        self.k,
                        snapshot.sequence_index,
                        snapshot.kmer_position,
                        snapshot.count_normal,
                        snapshot.count_reverse_complement,
                    )?;
                    node.set_state(snapshot.state);
                    slots.push(Some(node));
                    edges.push((snapshot.right, snapshot.left));
                }
                None => {
                    slots.push(None);
                    edges.push((Vec::new(), Vec::new()));
                }
            }
        }

        let graph = DeBruijnGraph::from_slots(self.k, self.fold_reverse_complement, slots)?;
        for (index, (right, left)) in edges.into_iter().enumerate() {
            let id = NodeId::new(index)?;
            for (direction, edges) in [(Direction::Right, right), (Direction::Left, left)] {
                for edge in edges {
                    let node = graph.node(id)?;
                    graph.node(edge.neighbour)?;
                    node.add_extension(direction, edge.neighbour, edge.same_orientation);
                    if !edge.valid {
                        node.mark_extension_invalid_in(direction, edge.neighbour);
                    }
                }
            }
        }
        if let Some((node, direction, neighbour)) = graph.find_unmirrored_extension() {
            return Err(DumpError::UnmirroredExtension {
                node,
                direction,
                neighbour,
            });
        }
        Ok(graph)
    }
}

/// Saves a bincode snapshot of `graph` into `filename`.
pub fn save<P: AsRef<Path>>(graph: &DeBruijnGraph, filename: P) -> Result<(), DumpError> {
    let file = File::create(filename)?;
    let mut buffer = BufWriter::with_capacity(BUFFER_CAPACITY, file);
    bincode::serialize_into(&mut buffer, &GraphSnapshot::from(graph))?;
    buffer.flush()?;
    Ok(())
}

pub fn load<P: AsRef<Path>>(filename: P) -> Result<DeBruijnGraph, DumpError> {
    let file = File::open(filename)?;
    let buffer = BufReader::with_capacity(BUFFER_CAPACITY, file);
    let snapshot: GraphSnapshot = bincode::deserialize_from(buffer)?;
    snapshot.into_graph()
}
