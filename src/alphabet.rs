//! DNA alphabet used by the k-mer extractor.

const LOOKUP_TAB: [u8; 256] = {
    let mut tab = [0; 256];
    tab[b'A' as usize] = b'A';
    tab[b'C' as usize] = b'C';
    tab[b'G' as usize] = b'G';
    tab[b'T' as usize] = b'T';
    tab[b'a' as usize] = b'A';
    tab[b'c' as usize] = b'C';
    tab[b'g' as usize] = b'G';
    tab[b't' as usize] = b'T';
    tab
};

const REVCOMP_TAB: [u8; 256] = {
    let mut tab = [0; 256];
    tab[b'A' as usize] = b'T';
    tab[b'T' as usize] = b'A';
    tab[b'C' as usize] = b'G';
    tab[b'G' as usize] = b'C';
    tab
};

/// Symbol lookup and complement over a 4-letter DNA alphabet.
pub trait DnaAlphabet: Sync {
    /// Normalises `symbol` to one of `A`, `C`, `G`, `T`, or `None` if the alphabet
    /// does not recognise it as an unambiguous base.
    fn lookup(&self, symbol: u8) -> Option<u8>;

    /// Complement of a base already normalised by [`DnaAlphabet::lookup`].
    fn complement(&self, base: u8) -> Option<u8>;
}

/// `ACGT` in either case. Ambiguity codes, gaps and anything else are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictDna;

impl DnaAlphabet for StrictDna {
    fn lookup(&self, symbol: u8) -> Option<u8> {
        match LOOKUP_TAB[symbol as usize] {
            0 => None,
            base => Some(base),
        }
    }

    fn complement(&self, base: u8) -> Option<u8> {
        match REVCOMP_TAB[base as usize] {
            0 => None,
            complement => Some(complement),
        }
    }
}

pub fn reverse_complement<A: DnaAlphabet>(alphabet: &A, seq: &[u8]) -> Option<Vec<u8>> {
    seq.iter()
        .rev()
        .map(|symbol| {
            alphabet
                .lookup(*symbol)
                .and_then(|base| alphabet.complement(base))
        })
        .collect()
}
