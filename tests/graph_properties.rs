use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use debruijn_core::dump::GraphSnapshot;
use debruijn_core::two_bits::{canonical, encode_kmer};
use debruijn_core::{
    build_graph, AmbiguityPolicy, BuildConfig, DeBruijnGraph, DeBruijnNode, Direction,
    GraphBuilder, GraphError,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn random_reads(seed: u64, number: usize) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..number)
        .map(|_| {
            let length = rng.gen_range(20..150);
            (0..length)
                .map(|_| *b"ACGT".choose(&mut rng).unwrap())
                .collect()
        })
        .collect()
}

/// Canonical k-mer -> number of occurrences, computed without the graph.
fn naive_counts(reads: &[Vec<u8>], k: usize) -> HashMap<u64, u64> {
    let mut counts = HashMap::new();
    for read in reads {
        for window in read.windows(k) {
            let (kmer, _) = canonical(encode_kmer(window.iter().copied()), k);
            *counts.entry(kmer).or_insert(0) += 1;
        }
    }
    counts
}

fn build_with_threads(reads: &[Vec<u8>], k: usize, threads: usize) -> DeBruijnGraph {
    let mut config = BuildConfig::new(k);
    config.threads = Some(threads);
    config.batch_size = 10;
    GraphBuilder::new(config).build(reads).unwrap()
}

#[test]
fn one_node_per_canonical_kmer() {
    let reads = random_reads(1, 200);
    for k in [3, 7, 21, 32] {
        let graph = build_with_threads(&reads, k, 4);
        let expected = naive_counts(&reads, k);
        assert_eq!(graph.node_count(), expected.len());
        for kmer in expected.keys() {
            assert!(graph.node_id_of_kmer(*kmer).is_some());
        }
    }
}

#[test]
fn counts_are_conserved() {
    let reads = random_reads(2, 300);
    let k = 5;
    let graph = build_with_threads(&reads, k, 4);
    let expected = naive_counts(&reads, k);
    for (_, node) in graph.nodes() {
        assert_eq!(node.kmer_count(), expected[&node.kmer()]);
    }
    assert_eq!(graph.total_kmer_count(), expected.values().sum::<u64>());
}

#[test]
fn edges_are_mirrored() {
    let reads = random_reads(3, 300);
    let graph = build_with_threads(&reads, 9, 4);
    assert!(graph.edge_count() > 0);
    for (id, node) in graph.nodes() {
        for (neighbour, same_orientation) in node.neighbours(Direction::Right) {
            let other = graph.node(neighbour).unwrap();
            let mirror = other.left_extensions()[&id].clone();
            assert_eq!(mirror.is_same_orientation(), same_orientation);
        }
    }
    assert!(graph.is_symmetric());
}

#[test]
fn purge_is_idempotent() {
    let reads = random_reads(4, 100);
    let mut graph = build_with_threads(&reads, 7, 2);
    let edges: Vec<_> = graph
        .nodes()
        .flat_map(|(id, node)| {
            node.right_extensions()
                .keys()
                .copied()
                .map(|neighbour| (id, neighbour))
                .collect::<Vec<_>>()
        })
        .step_by(3)
        .collect();
    let marked = graph.invalidation().mark_edges(&edges).unwrap();
    assert_eq!(marked, edges.len());

    let removed = graph.purge_invalid_extensions();
    assert!(removed >= edges.len());
    let once = GraphSnapshot::from(&graph);
    assert_eq!(graph.purge_invalid_extensions(), 0);
    assert_eq!(GraphSnapshot::from(&graph), once);
    assert!(graph.is_symmetric());
}

#[test]
fn visited_is_sticky() {
    let mut graph = build_graph(&["ACGTTGCAAGT"], 4).unwrap();
    let id = graph.node_id(b"GTTG").unwrap();
    let other = graph.node_id(b"TTGC").unwrap();
    graph.mark_node_as_visited(id).unwrap();
    assert!(graph.is_node_visited(id).unwrap());

    let counts = graph.node(id).unwrap().kmer_count();
    graph.add_edge(id, id, true).unwrap();
    graph.remove_edge(id, other).unwrap();
    graph.mark_edge_invalid(other, id).unwrap();
    graph.purge_invalid_extensions();
    graph.mark_node_as_visited(id).unwrap();

    assert!(graph.is_node_visited(id).unwrap());
    assert_eq!(graph.node(id).unwrap().kmer_count(), counts);
    assert!(!graph.is_node_visited(other).unwrap());
}

#[test]
fn both_strands_collapse_into_the_same_nodes() {
    let graph = build_graph(&["ATGGCG", "CGCCAT"], 3).unwrap();
    assert_eq!(graph.node_count(), 4);
    for kmer in [b"ATG", b"CCA", b"GCC", b"CGC"] {
        let node = graph.node(graph.node_id(kmer).unwrap()).unwrap();
        assert_eq!(node.count_normal_orientation(), 1);
        assert_eq!(node.count_reverse_complement(), Some(1));
        assert_eq!(node.kmer_count(), 2);
    }
    // the reverse strand names the same nodes
    assert_eq!(graph.node_id(b"CAT"), graph.node_id(b"ATG"));
    assert_eq!(graph.node_id(b"TGG"), graph.node_id(b"CCA"));
    assert!(graph.is_symmetric());
}

#[test]
fn homopolymer_gives_a_self_loop() {
    let graph = build_graph(&["AAAAA"], 2).unwrap();
    assert_eq!(graph.node_count(), 1);
    let id = graph.node_id(b"AA").unwrap();
    let node = graph.node(id).unwrap();
    assert_eq!(node.kmer_count(), 4);
    assert_eq!(node.count_normal_orientation(), 4);
    assert!(node.right_extensions()[&id].is_same_orientation());
    assert!(node.left_extensions()[&id].is_same_orientation());
    assert_eq!(node.extensions_count(), 2);
    assert_eq!(graph.edge_count(), 1);
    assert_eq!(graph.stats().self_loops, 1);
}

#[test]
fn repeated_extension_xors_orientation() {
    let x = DeBruijnNode::new(encode_kmer(b"ACG".iter().copied()), 3, 0, 0).unwrap();
    let graph = build_graph(&["ACGTT"], 3).unwrap();
    let y = graph.node_id(b"GTT").unwrap();

    x.add_right_extension(y, true);
    x.add_right_extension(y, false);
    assert_eq!(x.right_extensions().len(), 1);
    assert!(x.right_extensions()[&y].is_same_orientation());

    x.add_extension(Direction::Right, y, true);
    assert!(!x.right_extensions()[&y].is_same_orientation());
}

#[test]
fn thread_count_does_not_change_the_graph() {
    let reads = random_reads(5, 1000);
    let k = 11;
    let parallel = build_with_threads(&reads, k, 8);
    let sequential = build_with_threads(&reads, k, 1);

    assert_eq!(parallel.node_count(), sequential.node_count());
    assert_eq!(parallel.total_kmer_count(), sequential.total_kmer_count());
    assert_eq!(parallel.edge_count(), sequential.edge_count());
    for ((id_a, a), (id_b, b)) in parallel.nodes().zip(sequential.nodes()) {
        assert_eq!(id_a, id_b);
        assert_eq!(a.kmer(), b.kmer());
        assert_eq!(a.count_normal_orientation(), b.count_normal_orientation());
        assert_eq!(a.count_reverse_complement(), b.count_reverse_complement());
        assert_eq!(*a.right_extensions(), *b.right_extensions());
    }
}

#[test]
fn rejected_input_builds_nothing() {
    let mut config = BuildConfig::new(4);
    config.ambiguity = AmbiguityPolicy::Reject;
    let result = GraphBuilder::new(config).build(&["ACGTACGT", "ACGTNNAC"]);
    assert!(matches!(
        result,
        Err(GraphError::AmbiguousSymbol {
            sequence_index: 1,
            position: 4,
            symbol: 'N'
        })
    ));
}

#[test]
fn zero_k_is_refused() {
    assert!(matches!(
        build_graph(&["ACGT"], 0),
        Err(GraphError::InvalidKmerLength)
    ));
}

#[test]
fn cancelled_build_returns_no_graph() {
    let reads = random_reads(6, 50);
    let flag = Arc::new(AtomicBool::new(true));
    let result = GraphBuilder::new(BuildConfig::new(9))
        .with_abort_flag(flag)
        .build(&reads);
    assert!(matches!(result, Err(GraphError::Cancelled)));
}
