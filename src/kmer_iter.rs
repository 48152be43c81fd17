//! Streaming extraction of packed k-mer occurrences from a sequence.

use serde::{Deserialize, Serialize};

use crate::alphabet::DnaAlphabet;
use crate::error::{check_kmer_length, GraphError};
use crate::two_bits::{char_to_2bit, kmer_mask};

/// What to do with symbols the alphabet does not recognise (`N`, IUPAC codes, gaps...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AmbiguityPolicy {
    /// Windows covering the symbol are not emitted.
    #[default]
    Skip,
    /// The whole sequence is refused.
    Reject,
    /// The symbol is read as an `A`.
    ReplaceWithA,
}

/// One k-mer occurrence. `kmer` is the canonical packed value when strands are folded,
/// the forward packed value otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KmerOccurrence {
    pub kmer: u64,
    pub sequence_index: usize,
    pub position: usize,
    pub is_reverse_complement: bool,
}

/// Rolling k-mer iterator over one sequence.
///
/// The forward and reverse-complement encodings are updated with one shift per base.
/// Cloning the iterator before consuming it gives a fresh pass over the same occurrences.
#[derive(Clone)]
pub struct KmerIterator<'a, A: DnaAlphabet> {
    sequence: &'a [u8],
    alphabet: &'a A,
    sequence_index: usize,
    k: usize,
    mask: u64,
    fold: bool,
    replace_ambiguous: bool,
    next_symbol: usize,
    valid_run: usize,
    forward: u64,
    revcomp: u64,
    skipped_symbols: usize,
}

impl<'a, A: DnaAlphabet> KmerIterator<'a, A> {
    /// Fails on an unusable `k`, and on the first unrecognised symbol under [`AmbiguityPolicy::Reject`].
    /// A sequence shorter than `k` is not an error: it simply yields nothing.
    pub fn new(
        sequence: &'a [u8],
        sequence_index: usize,
        k: usize,
        alphabet: &'a A,
        policy: AmbiguityPolicy,
        fold: bool,
    ) -> Result<Self, GraphError> {
        check_kmer_length(k)?;
        if policy == AmbiguityPolicy::Reject {
            if let Some(position) = sequence
                .iter()
                .position(|symbol| decode_symbol(alphabet, *symbol).is_none())
            {
                return Err(GraphError::AmbiguousSymbol {
                    sequence_index,
                    position,
                    symbol: char::from(sequence[position]),
                });
            }
        }

        Ok(Self {
            sequence,
            alphabet,
            sequence_index,
            k,
            mask: kmer_mask(k),
            fold,
            replace_ambiguous: policy == AmbiguityPolicy::ReplaceWithA,
            next_symbol: 0,
            valid_run: 0,
            forward: 0,
            revcomp: 0,
            skipped_symbols: 0,
        })
    }

    /// Number of unrecognised symbols skipped so far.
    pub fn skipped_symbols(&self) -> usize {
        self.skipped_symbols
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

/// Normalised base and its complement, or `None` if the alphabet refuses the symbol.
fn decode_symbol<A: DnaAlphabet>(alphabet: &A, symbol: u8) -> Option<(u8, u8)> {
    let base = alphabet.lookup(symbol)?;
    let complement = alphabet.complement(base)?;
    Some((base, complement))
}

impl<'a, A: DnaAlphabet> Iterator for KmerIterator<'a, A> {
    type Item = KmerOccurrence;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_symbol < self.sequence.len() {
            let symbol = self.sequence[self.next_symbol];
            self.next_symbol += 1;

            let (base, complement) = match decode_symbol(self.alphabet, symbol) {
                Some(pair) => pair,
                None if self.replace_ambiguous => (b'A', b'T'),
                None => {
                    self.skipped_symbols += 1;
                    self.valid_run = 0;
                    continue;
                }
            };

            self.forward = ((self.forward << 2) | u64::from(char_to_2bit(base))) & self.mask;
            self.revcomp =
                (self.revcomp >> 2) | (u64::from(char_to_2bit(complement)) << (2 * (self.k - 1)));
            self.valid_run = (self.valid_run + 1).min(self.k);

            if self.valid_run == self.k {
                let (kmer, is_reverse_complement) = if self.fold && self.revcomp < self.forward {
                    (self.revcomp, true)
                } else {
                    (self.forward, false)
                };
                return Some(KmerOccurrence {
                    kmer,
                    sequence_index: self.sequence_index,
                    position: self.next_symbol - self.k,
                    is_reverse_complement,
                });
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.sequence.len() - self.next_symbol;
        let upper = (remaining + self.valid_run + 1).saturating_sub(self.k);
        (0, Some(upper))
    }
}
