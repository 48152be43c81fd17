//! Writing a built graph out, as a readable table or as a binary snapshot.

mod bin_dump;
mod plain_text;

use thiserror::Error;

use crate::error::GraphError;
use crate::node::{Direction, NodeId};

pub use bin_dump::{load, save, EdgeSnapshot, GraphSnapshot, NodeSnapshot};
pub use plain_text::plain_text;

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode or decode the snapshot: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("inconsistent graph: {0}")]
    Graph(#[from] GraphError),
    #[error("node {node} holds k-mer {kmer:#x}, which does not fit in {k} bases")]
    KmerOutOfRange { node: NodeId, kmer: u64, k: usize },
    #[error("node {node} does not match the strand folding of the snapshot")]
    FoldMismatch { node: NodeId },
    #[error("extension {node} -> {neighbour} ({direction:?}) has no mirrored half")]
    UnmirroredExtension {
        node: NodeId,
        direction: Direction,
        neighbour: NodeId,
    },
}
