//! Concurrent construction of a [`DeBruijnGraph`] from a set of sequences.
//!
//! Construction runs in two stages:
//! 1. sequences are split into batches processed in parallel; every k-mer occurrence is
//!    counted into a sharded node table (one node per k-mer value) and every pair of
//!    consecutive occurrences is recorded as an adjacency;
//! 2. the table is frozen into the graph arena and the distinct adjacencies are wired.

use ahash::{AHashMap, AHashSet};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::alphabet::{DnaAlphabet, StrictDna};
use crate::buckets::Buckets;
use crate::error::{check_kmer_length, GraphError};
use crate::graph::DeBruijnGraph;
use crate::kmer_iter::{AmbiguityPolicy, KmerIterator, KmerOccurrence};
use crate::node::DeBruijnNode;

const BATCH_SIZE: usize = 100;

type NodeTable = AHashMap<u64, DeBruijnNode>;

/// (earlier k-mer, later k-mer, same orientation)
type Adjacency = (u64, u64, bool);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub k: usize,
    /// Store a k-mer and its reverse complement in the same node.
    pub fold_reverse_complement: bool,
    pub ambiguity: AmbiguityPolicy,
    /// Size of a dedicated worker pool. `None` runs on the global rayon pool.
    pub threads: Option<usize>,
    /// Number of sequences handed to a worker at once.
    pub batch_size: usize,
}

impl BuildConfig {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            fold_reverse_complement: true,
            ambiguity: AmbiguityPolicy::default(),
            threads: None,
            batch_size: BATCH_SIZE,
        }
    }
}

pub struct GraphBuilder<A: DnaAlphabet = StrictDna> {
    config: BuildConfig,
    alphabet: A,
    abort: Option<Arc<AtomicBool>>,
}

impl GraphBuilder<StrictDna> {
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config,
            alphabet: StrictDna,
            abort: None,
        }
    }
}

/// Builds a graph with the default settings for `k`.
pub fn build_graph<S: AsRef<[u8]> + Sync>(
    sequences: &[S],
    k: usize,
) -> Result<DeBruijnGraph, GraphError> {
    GraphBuilder::new(BuildConfig::new(k)).build(sequences)
}

impl<A: DnaAlphabet> GraphBuilder<A> {
    pub fn with_alphabet<B: DnaAlphabet>(self, alphabet: B) -> GraphBuilder<B> {
        GraphBuilder {
            config: self.config,
            alphabet,
            abort: self.abort,
        }
    }

    /// Once `flag` is set, batches that have not started yet are skipped and the build
    /// returns [`GraphError::Cancelled`]. Batches already running are left to finish.
    pub fn with_abort_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.abort = Some(flag);
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// `sequences[i]` is recorded as sequence index `i` in node provenance.
    pub fn build<S: AsRef<[u8]> + Sync>(
        &self,
        sequences: &[S],
    ) -> Result<DeBruijnGraph, GraphError> {
        check_kmer_length(self.config.k)?;
        match self.config.threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()?;
                pool.install(|| self.build_in_current_pool(sequences))
            }
            None => self.build_in_current_pool(sequences),
        }
    }

    fn build_in_current_pool<S: AsRef<[u8]> + Sync>(
        &self,
        sequences: &[S],
    ) -> Result<DeBruijnGraph, GraphError> {
        let k = self.config.k;
        info!(
            "building graph of {} sequences with k={} on {} threads",
            sequences.len(),
            k,
            rayon::current_num_threads()
        );

        let start_first_stage = Instant::now();
        let (table, adjacencies) = self.count_kmers(sequences)?;
        info!(
            "time first stage: {:.3}s",
            start_first_stage.elapsed().as_secs_f64()
        );

        let start_second_stage = Instant::now();
        let nodes = table
            .into_inner()
            .flat_map(|table| table.into_iter().map(|(_, node)| node))
            .collect();
        let graph = DeBruijnGraph::from_nodes(k, self.config.fold_reverse_complement, nodes)?;
        wire(&graph, adjacencies)?;
        info!(
            "time second stage: {:.3}s",
            start_second_stage.elapsed().as_secs_f64()
        );
        info!("graph: {}", graph.stats());
        Ok(graph)
    }

    fn is_aborted(&self) -> bool {
        self.abort
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// First stage: counts every occurrence into the node table and collects the distinct
    /// adjacencies.
    fn count_kmers<S: AsRef<[u8]> + Sync>(
        &self,
        sequences: &[S],
    ) -> Result<(Buckets<NodeTable>, Vec<Adjacency>), GraphError> {
        let table = Buckets::<NodeTable>::new(NodeTable::default);
        let adjacencies = Mutex::new(Vec::new());
        // error of the lowest failing sequence batch, so that the reported error does not
        // depend on scheduling
        let first_error: Mutex<Option<(usize, GraphError)>> = Mutex::new(None);
        let skipped_symbols = AtomicUsize::new(0);
        let batch_size = self.config.batch_size.max(1);

        rayon::scope(|s| {
            let table = &table;
            let adjacencies = &adjacencies;
            let first_error = &first_error;
            let skipped_symbols = &skipped_symbols;

            for (batch_id, batch) in sequences.chunks(batch_size).enumerate() {
                if self.is_aborted() {
                    break;
                }
                s.spawn(move |_| {
                    if self.is_aborted() {
                        return;
                    }
                    let first_sequence = batch_id * batch_size;
                    match self.count_batch(batch, first_sequence, table) {
                        Ok((batch_adjacencies, skipped)) => {
                            debug!(
                                "batch {}: {} adjacencies, {} skipped symbols",
                                batch_id,
                                batch_adjacencies.len(),
                                skipped
                            );
                            skipped_symbols.fetch_add(skipped, Ordering::Relaxed);
                            adjacencies
                                .lock()
                                .expect("adjacency lock poisoned")
                                .extend(batch_adjacencies);
                        }
                        Err(error) => {
                            let mut first_error =
                                first_error.lock().expect("error lock poisoned");
                            if first_error
                                .as_ref()
                                .map_or(true, |(failed_batch, _)| batch_id < *failed_batch)
                            {
                                *first_error = Some((batch_id, error));
                            }
                        }
                    }
                });
            }
        });

        if let Some((_, error)) = first_error.into_inner().expect("error lock poisoned") {
            return Err(error);
        }
        if self.is_aborted() {
            warn!("graph construction cancelled");
            return Err(GraphError::Cancelled);
        }

        let skipped_symbols = skipped_symbols.into_inner();
        if skipped_symbols > 0 {
            warn!(
                "{} symbols outside of ACGT were skipped, k-mers covering them are ignored",
                skipped_symbols
            );
        }

        let mut adjacencies = adjacencies.into_inner().expect("adjacency lock poisoned");
        adjacencies.par_sort_unstable();
        adjacencies.dedup();
        Ok((table, adjacencies))
    }

    fn count_batch<S: AsRef<[u8]>>(
        &self,
        batch: &[S],
        first_sequence: usize,
        table: &Buckets<NodeTable>,
    ) -> Result<(AHashSet<Adjacency>, usize), GraphError> {
        let k = self.config.k;
        let fold = self.config.fold_reverse_complement;
        let mut adjacencies = AHashSet::new();
        let mut skipped_symbols = 0;

        for (offset, sequence) in batch.iter().enumerate() {
            let mut kmers = KmerIterator::new(
                sequence.as_ref(),
                first_sequence + offset,
                k,
                &self.alphabet,
                self.config.ambiguity,
                fold,
            )?;
            let mut previous: Option<KmerOccurrence> = None;
            for occurrence in kmers.by_ref() {
                insert_or_count(table, &occurrence, k, fold)?;
                if let Some(previous) = previous {
                    // no adjacency across skipped symbols
                    if previous.position + 1 == occurrence.position {
                        adjacencies.insert((
                            previous.kmer,
                            occurrence.kmer,
                            previous.is_reverse_complement == occurrence.is_reverse_complement,
                        ));
                    }
                }
                previous = Some(occurrence);
            }
            skipped_symbols += kmers.skipped_symbols();
        }
        Ok((adjacencies, skipped_symbols))
    }
}

/// Counts `occurrence` on its node, creating the node if this is the first occurrence.
///
/// The hit path only takes the shard's read lock. On a miss the candidate node is built
/// before taking the write lock; if another thread inserted the same k-mer in between,
/// the candidate is dropped and the occurrence is counted on the winner.
fn insert_or_count(
    table: &Buckets<NodeTable>,
    occurrence: &KmerOccurrence,
    k: usize,
    fold: bool,
) -> Result<(), GraphError> {
    if let Some(node) = table.read_from_kmer(occurrence.kmer).get(&occurrence.kmer) {
        node.add_kmer_data(occurrence.is_reverse_complement);
        return Ok(());
    }

    let candidate = DeBruijnNode::from_occurrence(occurrence, k, fold)?;
    match table.write_from_kmer(occurrence.kmer).entry(occurrence.kmer) {
        Entry::Occupied(entry) => entry.get().add_kmer_data(occurrence.is_reverse_complement),
        Entry::Vacant(entry) => {
            entry.insert(candidate);
        }
    }
    Ok(())
}

/// Second stage: right extension on the earlier node, mirrored left extension on the later.
fn wire(graph: &DeBruijnGraph, adjacencies: Vec<Adjacency>) -> Result<(), GraphError> {
    adjacencies
        .into_par_iter()
        .filter_map(|(from, to, same_orientation)| {
            Some((
                graph.node_id_of_kmer(from)?,
                graph.node_id_of_kmer(to)?,
                same_orientation,
            ))
        })
        .try_for_each(|(from, to, same_orientation)| graph.add_edge(from, to, same_orientation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;

    #[test]
    fn test_invalid_k() {
        assert!(matches!(
            build_graph(&["ACGT"], 0),
            Err(GraphError::InvalidKmerLength)
        ));
        assert!(matches!(
            build_graph(&["ACGT"], 33),
            Err(GraphError::KmerLengthTooLarge { .. })
        ));
    }

    #[test]
    fn test_empty_input() {
        let sequences: [&str; 0] = [];
        let graph = build_graph(&sequences, 5).unwrap();
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);

        let graph = build_graph(&["ACG"], 5).unwrap();
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn test_counts_and_edges_of_a_single_read() {
        let graph = build_graph(&["ACGTTGCA"], 4).unwrap();
        // ACGT, CGTT (as AACG), GTTG (as CAAC), TTGC, TGCA
        assert_eq!(graph.node_count(), 5);
        assert_eq!(graph.total_kmer_count(), 5);
        assert_eq!(graph.edge_count(), 4);
        assert!(graph.is_symmetric());

        let acgt = graph.node_id(b"ACGT").unwrap();
        let cgtt = graph.node_id(b"CGTT").unwrap();
        let node = graph.node(acgt).unwrap();
        assert!(node.right_extensions().contains_key(&cgtt));
        assert!(node.left_extensions().is_empty());
        assert_eq!(node.sequence_index(), 0);
        assert_eq!(node.kmer_position(), 0);
    }

    #[test]
    fn test_orientation_of_wired_edges() {
        // ATG (normal) -> TGG (stored as CCA, reverse complement)
        let graph = build_graph(&["ATGG"], 3).unwrap();
        let atg = graph.node_id(b"ATG").unwrap();
        let cca = graph.node_id(b"CCA").unwrap();
        assert_eq!(graph.node_id(b"TGG"), Some(cca));
        let node = graph.node(atg).unwrap();
        assert!(!node.right_extensions()[&cca].is_same_orientation());
        assert!(!graph.node(cca).unwrap().left_extensions()[&atg].is_same_orientation());
    }

    #[test]
    fn test_repeated_adjacency_does_not_toggle_orientation() {
        let graph = build_graph(&["ACGTA", "ACGTA", "ACGTA"], 3).unwrap();
        // CGT is the reverse complement of ACG
        let acg = graph.node_id(b"ACG").unwrap();
        assert_eq!(graph.node_id(b"CGT"), Some(acg));
        let tac = graph.node_id(b"GTA").unwrap();

        let node = graph.node(acg).unwrap();
        assert!(!node.right_extensions()[&acg].is_same_orientation());
        assert!(node.right_extensions()[&tac].is_same_orientation());
        assert!(graph.is_symmetric());
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.total_kmer_count(), 9);
        assert_eq!(node.count_normal_orientation(), 3);
        assert_eq!(node.count_reverse_complement(), Some(3));
    }

    #[test]
    fn test_unfolded_graph() {
        let mut config = BuildConfig::new(3);
        config.fold_reverse_complement = false;
        let graph = GraphBuilder::new(config)
            .build(&["ATGGCG", "CGCCAT"])
            .unwrap();
        assert_eq!(graph.node_count(), 8);
        assert!(!graph.is_folded());
        for (_, node) in graph.nodes() {
            assert_eq!(node.count_reverse_complement(), None);
            assert_eq!(node.kmer_count(), 1);
        }
        assert_ne!(graph.node_id(b"CAT"), graph.node_id(b"ATG"));
    }

    #[test]
    fn test_skip_does_not_wire_across_gaps() {
        let graph = build_graph(&["AACNCCA"], 2).unwrap();
        // AA AC | CC CA
        let ac = graph.node_id(b"AC").unwrap();
        let cc = graph.node_id(b"CC").unwrap();
        assert!(!graph.node(ac).unwrap().right_extensions().contains_key(&cc));
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_reject_reports_lowest_failing_sequence() {
        let mut config = BuildConfig::new(3);
        config.ambiguity = AmbiguityPolicy::Reject;
        config.batch_size = 1;
        let sequences = ["ACGTACGT", "ACGTNACG", "ACGTACGT", "NACGT"];
        match GraphBuilder::new(config).build(&sequences) {
            Err(GraphError::AmbiguousSymbol {
                sequence_index,
                position,
                ..
            }) => {
                assert_eq!(sequence_index, 1);
                assert_eq!(position, 4);
            }
            other => panic!("expected an ambiguous symbol error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_replace_with_a() {
        let mut config = BuildConfig::new(3);
        config.ambiguity = AmbiguityPolicy::ReplaceWithA;
        let graph = GraphBuilder::new(config).build(&["ACNTT"]).unwrap();
        assert_eq!(graph.total_kmer_count(), 3);
        assert!(graph.node_id(b"CAT").is_some());
    }

    #[test]
    fn test_abort_before_start() {
        let flag = Arc::new(AtomicBool::new(true));
        let result = GraphBuilder::new(BuildConfig::new(3))
            .with_abort_flag(flag)
            .build(&["ACGTACGT"]);
        assert!(matches!(result, Err(GraphError::Cancelled)));
    }

    /// Strict DNA that raises the abort flag when it reads a `T`, counting lookups.
    struct AbortOnT {
        flag: Arc<AtomicBool>,
        lookups: Arc<AtomicUsize>,
    }

    impl DnaAlphabet for AbortOnT {
        fn lookup(&self, symbol: u8) -> Option<u8> {
            self.lookups.fetch_add(1, Ordering::Relaxed);
            if symbol == b'T' {
                self.flag.store(true, Ordering::Relaxed);
            }
            StrictDna.lookup(symbol)
        }

        fn complement(&self, base: u8) -> Option<u8> {
            StrictDna.complement(base)
        }
    }

    #[test]
    fn test_abort_during_build() {
        let flag = Arc::new(AtomicBool::new(false));
        let lookups = Arc::new(AtomicUsize::new(0));
        let mut config = BuildConfig::new(3);
        config.threads = Some(1);
        config.batch_size = 1;
        let sequences = vec!["ACGTACGTAC"; 20];

        let result = GraphBuilder::new(config)
            .with_alphabet(AbortOnT {
                flag: Arc::clone(&flag),
                lookups: Arc::clone(&lookups),
            })
            .with_abort_flag(Arc::clone(&flag))
            .build(&sequences);

        assert!(matches!(result, Err(GraphError::Cancelled)));
        let lookups = lookups.load(Ordering::Relaxed);
        // the batch that raised the flag ran to its end, the following ones never started
        assert!(lookups >= 10);
        assert_eq!(lookups % 10, 0);
        assert!(lookups < 10 * sequences.len());
    }

    #[test]
    fn test_dedicated_pool() {
        let mut config = BuildConfig::new(4);
        config.threads = Some(2);
        config.batch_size = 1;
        let reads = ["ACGTTGCATG", "TTGCATGACG", "GGGGCCCCAT"];
        let pooled = GraphBuilder::new(config).build(&reads).unwrap();
        let global = build_graph(&reads, 4).unwrap();
        assert_eq!(pooled.node_count(), global.node_count());
        assert_eq!(pooled.edge_count(), global.edge_count());
        for (id, node) in global.nodes() {
            assert_eq!(pooled.node(id).unwrap().kmer(), node.kmer());
            assert_eq!(pooled.node(id).unwrap().kmer_count(), node.kmer_count());
        }
        assert!(pooled.contains(NodeId::from(0)));
    }
}
