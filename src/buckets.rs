use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use xxhash_rust::xxh3::xxh3_64;

pub const NB_BUCKETS: usize = 255;

/// Fixed set of independently locked shards. A packed k-mer always lands in the same shard,
/// so two threads only contend when their k-mers hash to the same shard.
pub struct Buckets<T> {
    data: [RwLock<T>; NB_BUCKETS],
}

impl<T> Buckets<T> {
    pub fn new<F>(function: F) -> Self
    where
        F: Fn() -> T,
    {
        let data: [RwLock<T>; NB_BUCKETS] = std::array::from_fn(|_i| RwLock::new(function()));
        Self { data }
    }

    pub fn bucket_of_kmer(kmer: u64) -> usize {
        (xxh3_64(&kmer.to_le_bytes()) % NB_BUCKETS as u64) as usize
    }

    pub fn get_from_kmer(&self, kmer: u64) -> &RwLock<T> {
        &self.data[Self::bucket_of_kmer(kmer)]
    }

    pub fn read_from_kmer(&self, kmer: u64) -> RwLockReadGuard<'_, T> {
        self.get_from_kmer(kmer)
            .read()
            .expect("could acquire read lock")
    }

    pub fn write_from_kmer(&self, kmer: u64) -> RwLockWriteGuard<'_, T> {
        self.get_from_kmer(kmer)
            .write()
            .expect("could acquire write lock")
    }

    pub fn chunks(&self) -> &[RwLock<T>; NB_BUCKETS] {
        &self.data
    }

    /// Consumes the shards, returning their content.
    pub fn into_inner(self) -> impl Iterator<Item = T> {
        self.data
            .into_iter()
            .map(|chunk| chunk.into_inner().expect("bucket lock poisoned"))
    }
}
