//! De Bruijn graph core: k-mer extraction, concurrent graph construction and the
//! maintenance operations used by graph simplification passes.

pub mod alphabet;
pub mod buckets;
pub mod builder;
pub mod dump;
pub mod error;
pub mod graph;
pub mod kmer_iter;
pub mod node;
pub mod reads;
pub mod two_bits;

/// Occurrence counter of a node, per orientation.
pub type Count = u32;

pub use alphabet::{DnaAlphabet, StrictDna};
pub use builder::{build_graph, BuildConfig, GraphBuilder};
pub use error::GraphError;
pub use graph::{DeBruijnGraph, GraphStats, Invalidation};
pub use kmer_iter::{AmbiguityPolicy, KmerIterator, KmerOccurrence};
pub use node::{DeBruijnEdge, DeBruijnNode, Direction, NodeId, NodeState};
