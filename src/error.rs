use thiserror::Error;

use crate::node::NodeId;
use crate::two_bits::MAX_KMER_LENGTH;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("k-mer length must be positive")]
    InvalidKmerLength,
    #[error("k-mer length {k} is too large, k-mers are packed on 64 bits (max {max})")]
    KmerLengthTooLarge { k: usize, max: usize },
    #[error("sequence {sequence_index} has the non-ACGT symbol {symbol:?} at position {position}")]
    AmbiguousSymbol {
        sequence_index: usize,
        position: usize,
        symbol: char,
    },
    #[error("node {0} is not part of the graph")]
    UnknownNode(NodeId),
    #[error("provenance ({sequence_index}, {position}) does not fit into 32 bits")]
    ProvenanceOverflow {
        sequence_index: usize,
        position: usize,
    },
    #[error("graph has more nodes than a node id can address")]
    TooManyNodes,
    #[error("k-mer {kmer:#x} is held by both node {first} and node {second}")]
    DuplicateKmer {
        kmer: u64,
        first: NodeId,
        second: NodeId,
    },
    #[error("graph construction was cancelled before every batch was processed")]
    Cancelled,
    #[error("could not start the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Fails fast on k-mer lengths that cannot be represented.
pub fn check_kmer_length(k: usize) -> Result<(), GraphError> {
    if k == 0 {
        Err(GraphError::InvalidKmerLength)
    } else if k > MAX_KMER_LENGTH {
        Err(GraphError::KmerLengthTooLarge {
            k,
            max: MAX_KMER_LENGTH,
        })
    } else {
        Ok(())
    }
}
