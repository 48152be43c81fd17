//! 2-bit packing of DNA k-mers into a single `u64`.
//!
//! Bases are encoded as `A=0, C=1, T=2, G=3`, which is `(ascii >> 1) & 3` for both
//! upper and lower case. In this encoding the complement of a base is `code ^ 2`.

/// Largest k-mer that fits into a `u64`.
pub const MAX_KMER_LENGTH: usize = 32;

pub fn char_to_2bit(c: u8) -> u8 {
    (c >> 1) & 3
}

pub fn uint_to_char(c: u8) -> u8 {
    match c {
        0 => b'A',
        1 => b'C',
        2 => b'T',
        _ => b'G',
    }
}

pub fn complement_2bit(code: u8) -> u8 {
    code ^ 2
}

/// Mask selecting the `2 * k` lowest bits.
pub fn kmer_mask(k: usize) -> u64 {
    debug_assert!(k <= MAX_KMER_LENGTH);
    if k == MAX_KMER_LENGTH {
        u64::MAX
    } else {
        (1u64 << (2 * k)) - 1
    }
}

/// Packs `bases` (first base in the highest used bits). `bases` must hold at most 32 bases.
pub fn encode_kmer(bases: impl Iterator<Item = u8>) -> u64 {
    let mut encoding = 0u64;
    for base in bases {
        encoding <<= 2;
        encoding |= u64::from(char_to_2bit(base));
    }
    encoding
}

pub fn decode_kmer(kmer: u64, k: usize) -> Vec<u8> {
    (0..k)
        .map(|i| {
            let shift = 2 * (k - 1 - i);
            uint_to_char(((kmer >> shift) & 3) as u8)
        })
        .collect()
}

pub fn reverse_complement_kmer(kmer: u64, k: usize) -> u64 {
    let mut forward = kmer;
    let mut revcomp = 0u64;
    for _ in 0..k {
        revcomp <<= 2;
        revcomp |= u64::from(complement_2bit((forward & 3) as u8));
        forward >>= 2;
    }
    revcomp
}

/// Returns the canonical value of `kmer` and whether it had to be reverse-complemented.
/// Reverse-palindromes are reported in normal orientation.
pub fn canonical(kmer: u64, k: usize) -> (u64, bool) {
    let revcomp = reverse_complement_kmer(kmer, k);
    if revcomp < kmer {
        (revcomp, true)
    } else {
        (kmer, false)
    }
}
