use nohash_hasher::IntMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{RwLock, RwLockReadGuard};

use crate::error::{check_kmer_length, GraphError};
use crate::kmer_iter::KmerOccurrence;
use crate::Count;

/// Index of a node in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl nohash_hasher::IsEnabled for NodeId {}

impl NodeId {
    pub fn new(index: usize) -> Result<Self, GraphError> {
        u32::try_from(index)
            .map(NodeId)
            .map_err(|_| GraphError::TooManyNodes)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for NodeId {
    fn from(index: u32) -> Self {
        NodeId(index)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Extension edges of one side of a node, keyed by the neighbour.
pub type Extensions = IntMap<NodeId, DeBruijnEdge>;

/// Adjacency descriptor stored on each endpoint of an overlap.
///
/// `valid` is atomic so that edges can be marked from a shared borrow while other
/// threads mark other edges of the same node.
#[derive(Debug)]
pub struct DeBruijnEdge {
    same_orientation: bool,
    valid: AtomicBool,
}

impl DeBruijnEdge {
    pub fn new(is_same_orientation: bool) -> Self {
        Self {
            same_orientation: is_same_orientation,
            valid: AtomicBool::new(true),
        }
    }

    /// true if both overlapping k-mers were seen in the same orientation
    pub fn is_same_orientation(&self) -> bool {
        self.same_orientation
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }

    pub fn mark_invalid(&self) {
        self.valid.store(false, Ordering::Relaxed);
    }
}

impl Clone for DeBruijnEdge {
    fn clone(&self) -> Self {
        Self {
            same_orientation: self.same_orientation,
            valid: AtomicBool::new(self.is_valid()),
        }
    }
}

impl PartialEq for DeBruijnEdge {
    fn eq(&self, other: &Self) -> bool {
        self.same_orientation == other.same_orientation && self.is_valid() == other.is_valid()
    }
}

/// Side of a node an extension hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeState {
    Active = 0,
    Visited = 1,
}

impl From<u8> for NodeState {
    fn from(value: u8) -> Self {
        match value {
            0 => NodeState::Active,
            _ => NodeState::Visited,
        }
    }
}

/// A distinct k-mer of the graph, or a k-mer folded together with its reverse complement.
///
/// Counters and the visited state are atomics. Each side of extensions sits behind its own
/// lock: adding or removing an extension takes the write lock of that side only, marking
/// an edge invalid takes the read lock. Purging needs `&mut self`.
#[derive(Debug)]
pub struct DeBruijnNode {
    kmer: u64,
    kmer_length: u8,
    sequence_index: u32,
    kmer_position: u32,
    count_normal: AtomicU32,
    /// `None` when reverse complements are stored as distinct nodes.
    count_reverse_complement: Option<AtomicU32>,
    state: AtomicU8,
    right: RwLock<Extensions>,
    left: RwLock<Extensions>,
}

macro_rules! read_side {
    ($side:expr) => {
        $side.read().expect("extension lock poisoned")
    };
}

macro_rules! write_side {
    ($side:expr) => {
        $side.write().expect("extension lock poisoned")
    };
}

fn narrow_provenance(sequence_index: usize, position: usize) -> Result<(u32, u32), GraphError> {
    match (u32::try_from(sequence_index), u32::try_from(position)) {
        (Ok(sequence_index), Ok(position)) => Ok((sequence_index, position)),
        _ => Err(GraphError::ProvenanceOverflow {
            sequence_index,
            position,
        }),
    }
}

impl DeBruijnNode {
    /// Node for `kmer`, counting its creating occurrence once in normal orientation.
    pub fn new(
        kmer: u64,
        kmer_length: usize,
        sequence_index: usize,
        kmer_position: usize,
    ) -> Result<Self, GraphError> {
        Self::with_counts(kmer, kmer_length, sequence_index, kmer_position, 1, Some(0))
    }

    /// Node created by `occurrence`, which is counted in its own orientation.
    /// When `fold` is false the node does not track reverse complement occurrences.
    pub fn from_occurrence(
        occurrence: &KmerOccurrence,
        kmer_length: usize,
        fold: bool,
    ) -> Result<Self, GraphError> {
        let (normal, reverse_complement) = match (fold, occurrence.is_reverse_complement) {
            (false, _) => (1, None),
            (true, false) => (1, Some(0)),
            (true, true) => (0, Some(1)),
        };
        Self::with_counts(
            occurrence.kmer,
            kmer_length,
            occurrence.sequence_index,
            occurrence.position,
            normal,
            reverse_complement,
        )
    }

    pub(crate) fn with_counts(
        kmer: u64,
        kmer_length: usize,
        sequence_index: usize,
        kmer_position: usize,
        count_normal: Count,
        count_reverse_complement: Option<Count>,
    ) -> Result<Self, GraphError> {
        check_kmer_length(kmer_length)?;
        let (sequence_index, kmer_position) = narrow_provenance(sequence_index, kmer_position)?;
        Ok(Self {
            kmer,
            kmer_length: kmer_length as u8,
            sequence_index,
            kmer_position,
            count_normal: AtomicU32::new(count_normal),
            count_reverse_complement: count_reverse_complement.map(AtomicU32::new),
            state: AtomicU8::new(NodeState::Active as u8),
            right: RwLock::new(Extensions::default()),
            left: RwLock::new(Extensions::default()),
        })
    }

    /// Packed value of the k-mer this node stands for.
    pub fn kmer(&self) -> u64 {
        self.kmer
    }

    pub fn kmer_length(&self) -> usize {
        usize::from(self.kmer_length)
    }

    /// Index of the sequence of the representative occurrence.
    pub fn sequence_index(&self) -> usize {
        self.sequence_index as usize
    }

    /// Start of the representative occurrence in its sequence.
    pub fn kmer_position(&self) -> usize {
        self.kmer_position as usize
    }

    pub fn count_normal_orientation(&self) -> Count {
        self.count_normal.load(Ordering::Relaxed)
    }

    pub fn count_reverse_complement(&self) -> Option<Count> {
        self.count_reverse_complement
            .as_ref()
            .map(|count| count.load(Ordering::Relaxed))
    }

    /// Total number of occurrences, both orientations.
    pub fn kmer_count(&self) -> u64 {
        u64::from(self.count_normal_orientation())
            + u64::from(self.count_reverse_complement().unwrap_or(0))
    }

    /// Counts one more occurrence. Thread-safe.
    pub fn add_kmer_data(&self, is_reverse_complement: bool) {
        match (&self.count_reverse_complement, is_reverse_complement) {
            (Some(count), true) => {
                count.fetch_add(1, Ordering::Relaxed);
            }
            (None, true) => {
                debug_assert!(false, "reverse complement occurrence on an unfolded node");
                self.count_normal.fetch_add(1, Ordering::Relaxed);
            }
            (_, false) => {
                self.count_normal.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn extensions(&self, direction: Direction) -> RwLockReadGuard<'_, Extensions> {
        read_side!(self.side(direction))
    }

    pub fn right_extensions(&self) -> RwLockReadGuard<'_, Extensions> {
        self.extensions(Direction::Right)
    }

    pub fn left_extensions(&self) -> RwLockReadGuard<'_, Extensions> {
        self.extensions(Direction::Left)
    }

    /// Neighbours on `direction` with the orientation of each edge. The side's lock is
    /// released on return, so callers may go on to lock other nodes.
    pub fn neighbours(&self, direction: Direction) -> Vec<(NodeId, bool)> {
        self.extensions(direction)
            .iter()
            .map(|(neighbour, edge)| (*neighbour, edge.is_same_orientation()))
            .collect()
    }

    /// Number of left plus right extensions, used as the degree of the node.
    pub fn extensions_count(&self) -> usize {
        let right = self.right_extensions().len();
        right + self.left_extensions().len()
    }

    /// Adds `node` to the extensions on `direction`. An existing edge has its orientation
    /// XORed with `is_same_orientation`. The read-modify-write is done under that side's lock.
    pub fn add_extension(&self, direction: Direction, node: NodeId, is_same_orientation: bool) {
        write_side!(self.side(direction))
            .entry(node)
            .and_modify(|edge| edge.same_orientation ^= is_same_orientation)
            .or_insert_with(|| DeBruijnEdge::new(is_same_orientation));
    }

    pub fn add_left_extension(&self, node: NodeId, is_same_orientation: bool) {
        self.add_extension(Direction::Left, node, is_same_orientation);
    }

    pub fn add_right_extension(&self, node: NodeId, is_same_orientation: bool) {
        self.add_extension(Direction::Right, node, is_same_orientation);
    }

    pub fn remove_extension_in(&self, direction: Direction, node: NodeId) -> bool {
        write_side!(self.side(direction)).remove(&node).is_some()
    }

    /// Removes the edge to `node`, looking in the right extensions first, then in the left ones.
    /// Returns whether an edge was removed. Thread-safe.
    pub fn remove_extension(&self, node: NodeId) -> bool {
        self.remove_extension_in(Direction::Right, node)
            || self.remove_extension_in(Direction::Left, node)
    }

    /// Only a read lock is taken, so any number of threads may mark concurrently.
    pub fn mark_extension_invalid_in(&self, direction: Direction, node: NodeId) -> bool {
        match read_side!(self.side(direction)).get(&node) {
            Some(edge) => {
                edge.mark_invalid();
                true
            }
            None => false,
        }
    }

    /// Flags the edge to `node` as invalid (right extensions first, then left).
    /// Returns whether an edge was found.
    pub fn mark_extension_invalid(&self, node: NodeId) -> bool {
        self.mark_extension_invalid_in(Direction::Right, node)
            || self.mark_extension_invalid_in(Direction::Left, node)
    }

    /// Drops every edge flagged invalid. Returns the number of edges removed.
    pub fn purge_invalid_extensions(&mut self) -> usize {
        let mut removed = 0;
        for side in [&mut self.left, &mut self.right] {
            let extensions = side.get_mut().expect("extension lock poisoned");
            let before = extensions.len();
            extensions.retain(|_, edge| edge.is_valid());
            removed += before - extensions.len();
        }
        removed
    }

    /// Marks the node visited. Counts are left untouched and the mark cannot be cleared.
    pub fn mark_node_as_visited(&self) {
        self.state.store(NodeState::Visited as u8, Ordering::Relaxed);
    }

    pub fn is_node_visited(&self) -> bool {
        self.state() == NodeState::Visited
    }

    pub fn state(&self) -> NodeState {
        NodeState::from(self.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_state(&self, state: NodeState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    fn side(&self, direction: Direction) -> &RwLock<Extensions> {
        match direction {
            Direction::Left => &self.left,
            Direction::Right => &self.right,
        }
    }
}
