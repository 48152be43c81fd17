//! Sequences from FASTA/FASTQ files, plain or compressed.

use log::info;
use needletail::errors::ParseError;
use needletail::{parse_fastx_file, FastxReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("could not read sequences from {}: {source}", .path.display())]
pub struct ReadsError {
    path: PathBuf,
    source: ParseError,
}

/// Iterator over the sequences of a FASTX reader, headers and qualities dropped.
pub struct SequencesIter {
    data: Box<dyn FastxReader>,
}

impl SequencesIter {
    pub fn new(data: Box<dyn FastxReader>) -> Self {
        Self { data }
    }
}

impl Iterator for SequencesIter {
    type Item = Result<Vec<u8>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.data.next()?;
        Some(record.map(|record| record.seq().into_owned()))
    }
}

pub fn open<P: AsRef<Path>>(path: P) -> Result<SequencesIter, ReadsError> {
    let path = path.as_ref();
    parse_fastx_file(path)
        .map(SequencesIter::new)
        .map_err(|source| ReadsError {
            path: path.to_path_buf(),
            source,
        })
}

/// Loads every sequence of every file, in order. Sequence indices of the graph follow
/// this order.
pub fn read_sequences<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Vec<u8>>, ReadsError> {
    let mut sequences = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let before = sequences.len();
        for sequence in open(path)? {
            sequences.push(sequence.map_err(|source| ReadsError {
                path: path.to_path_buf(),
                source,
            })?);
        }
        info!(
            "read {} sequences from {}",
            sequences.len() - before,
            path.display()
        );
    }
    Ok(sequences)
}
