use itertools::Itertools;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::DumpError;
use crate::graph::DeBruijnGraph;
use crate::node::{DeBruijnNode, Direction};

/// Dumps one line per node into `output_file`, in node id order:
/// `kmer  count  normal  reverse-complement  right  left`.
///
/// Neighbours are written as their k-mer followed by `+` (same orientation) or `-`,
/// separated by commas. Edges marked invalid are left out. `-` stands for an empty field
/// or, in the reverse complement column, for a graph whose strands are not folded.
pub fn plain_text<P: AsRef<Path>>(graph: &DeBruijnGraph, output_file: P) -> Result<(), DumpError> {
    let file = File::create(output_file)?;
    let mut buffer = BufWriter::new(file);
    for (id, node) in graph.nodes() {
        let reverse_complement = node
            .count_reverse_complement()
            .map_or_else(|| String::from("-"), |count| count.to_string());
        writeln!(
            buffer,
            "{}\t{}\t{}\t{}\t{}\t{}",
            graph.kmer_string(id)?,
            node.kmer_count(),
            node.count_normal_orientation(),
            reverse_complement,
            neighbours(graph, node, Direction::Right)?,
            neighbours(graph, node, Direction::Left)?,
        )?;
    }
    buffer.flush()?;
    Ok(())
}

fn neighbours(
    graph: &DeBruijnGraph,
    node: &DeBruijnNode,
    direction: Direction,
) -> Result<String, DumpError> {
    let extensions = node.extensions(direction);
    if extensions.values().all(|edge| !edge.is_valid()) {
        return Ok(String::from("-"));
    }
    let mut fields = Vec::with_capacity(extensions.len());
    for (neighbour, edge) in extensions
        .iter()
        .filter(|(_, edge)| edge.is_valid())
        .sorted_by_key(|(neighbour, _)| **neighbour)
    {
        let orientation = if edge.is_same_orientation() { '+' } else { '-' };
        fields.push(format!("{}{}", graph.kmer_string(*neighbour)?, orientation));
    }
    Ok(fields.join(","))
}
