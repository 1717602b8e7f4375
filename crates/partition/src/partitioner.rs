//! Key to partition routing
//!
//! A [`Partitioner`] is a pure function from a routing key and an ordered list
//! of partition ids to one of those ids. It must give the same answer on
//! every client and every call, so it may not depend on process state.
//!
//! The default [`Murmur3Partitioner`] hashes the key's UTF-16 code units with
//! 32-bit MurmurHash3 (seed 0) and maps the hash onto the partition list with
//! a linear-congruential consistent-hash bucketing step. Both steps are fixed
//! bit for bit, so every client routes a key to the same partition.

use std::fmt;
use std::sync::Arc;
use tessera_core::{Error, PartitionId, Result};

/// Routes a string key to one partition id
pub trait Partitioner: Send + Sync + fmt::Debug {
    /// Choose a partition for `key` from `partition_ids`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when `partition_ids` is empty.
    fn partition(&self, key: &str, partition_ids: &[PartitionId]) -> Result<PartitionId>;
}

/// The default partitioner
pub fn default_partitioner() -> Arc<dyn Partitioner> {
    Arc::new(Murmur3Partitioner)
}

/// MurmurHash3 + consistent bucketing partitioner
#[derive(Debug, Clone, Copy, Default)]
pub struct Murmur3Partitioner;

impl Partitioner for Murmur3Partitioner {
    fn partition(&self, key: &str, partition_ids: &[PartitionId]) -> Result<PartitionId> {
        if partition_ids.is_empty() {
            return Err(Error::invalid_input("cannot partition over an empty partition list"));
        }
        let hash = murmur3_32_utf16(key);
        let bucket = consistent_hash(u64::from(hash), partition_ids.len());
        Ok(partition_ids[bucket])
    }
}

/// Partitioner backed by a closure returning an index into the id list
///
/// Out-of-range indices are reduced modulo the list length.
pub struct FnPartitioner<F> {
    name: &'static str,
    f: F,
}

impl<F> FnPartitioner<F>
where
    F: Fn(&str) -> usize + Send + Sync,
{
    /// Wrap a routing closure
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> fmt::Debug for FnPartitioner<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPartitioner")
            .field("name", &self.name)
            .finish()
    }
}

impl<F> Partitioner for FnPartitioner<F>
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn partition(&self, key: &str, partition_ids: &[PartitionId]) -> Result<PartitionId> {
        if partition_ids.is_empty() {
            return Err(Error::invalid_input("cannot partition over an empty partition list"));
        }
        Ok(partition_ids[(self.f)(key) % partition_ids.len()])
    }
}

/// 32-bit MurmurHash3 of the key's UTF-16LE encoding
pub fn murmur3_32_utf16(key: &str) -> u32 {
    let bytes: Vec<u8> = key.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect();
    murmur3_32(&bytes, 0)
}

/// 32-bit MurmurHash3 (x86 variant)
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h1 = seed;
    let chunks = data.chunks_exact(4);
    let tail = chunks.remainder();

    for chunk in chunks {
        let k1 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h1 ^= mix_k1(k1, C1, C2);
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    if !tail.is_empty() {
        let mut k1 = 0u32;
        for (i, byte) in tail.iter().enumerate() {
            k1 ^= u32::from(*byte) << (8 * i);
        }
        h1 ^= mix_k1(k1, C1, C2);
    }

    h1 ^= data.len() as u32;
    fmix32(h1)
}

#[inline]
fn mix_k1(k1: u32, c1: u32, c2: u32) -> u32 {
    k1.wrapping_mul(c1).rotate_left(15).wrapping_mul(c2)
}

#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Map `input` to a bucket in `[0, buckets)` so that growing the bucket
/// count moves only `1/buckets` of the inputs.
pub fn consistent_hash(input: u64, buckets: usize) -> usize {
    debug_assert!(buckets > 0);
    let mut state = input;
    let mut candidate: i64 = 0;
    loop {
        state = state.wrapping_mul(2_862_933_555_777_941_757).wrapping_add(1);
        let next_double = ((state >> 33) as f64 + 1.0) / (1u64 << 31) as f64;
        let next = ((candidate + 1) as f64 / next_double) as i64;
        if next >= 0 && (next as usize) < buckets {
            candidate = next;
        } else {
            return candidate as usize;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(n: u32) -> Vec<PartitionId> {
        (1..=n).map(PartitionId).collect()
    }

    #[test]
    fn test_murmur3_reference_vectors() {
        assert_eq!(murmur3_32(b"", 0), 0);
        assert_eq!(murmur3_32(b"", 1), 0x514E_28B7);
        assert_eq!(murmur3_32(b"hello", 0), 0x248B_FA47);
    }

    #[test]
    fn test_single_bucket_always_zero() {
        for input in [0u64, 1, 42, u64::from(u32::MAX)] {
            assert_eq!(consistent_hash(input, 1), 0);
        }
    }

    #[test]
    fn test_empty_partition_list_is_error() {
        let err = Murmur3Partitioner.partition("key", &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[test]
    fn test_keys_spread_across_partitions() {
        let partitions = ids(3);
        let mut counts = [0usize; 3];
        for i in 0..3000 {
            let id = Murmur3Partitioner
                .partition(&format!("key-{}", i), &partitions)
                .unwrap();
            counts[(id.0 - 1) as usize] += 1;
        }
        for count in counts {
            assert!(count > 500, "uneven spread: {:?}", counts);
        }
    }

    #[test]
    fn test_independent_instances_agree() {
        let partitions = ids(7);
        let a = default_partitioner();
        let b = Murmur3Partitioner;
        for key in ["a", "b", "orders", "日本語", ""] {
            assert_eq!(
                a.partition(key, &partitions).unwrap(),
                b.partition(key, &partitions).unwrap()
            );
        }
    }

    #[test]
    fn test_fn_partitioner_wraps_index() {
        let p = FnPartitioner::new("fixed", |key: &str| if key == "b" { 5 } else { 0 });
        let partitions = ids(3);
        assert_eq!(p.partition("a", &partitions).unwrap(), PartitionId(1));
        assert_eq!(p.partition("b", &partitions).unwrap(), PartitionId(3));
    }

    proptest! {
        #[test]
        fn prop_partition_is_deterministic(key in ".*", n in 1u32..32) {
            let partitions = ids(n);
            let first = Murmur3Partitioner.partition(&key, &partitions).unwrap();
            let second = Murmur3Partitioner.partition(&key, &partitions).unwrap();
            prop_assert_eq!(first, second);
            prop_assert!(partitions.contains(&first));
        }

        #[test]
        fn prop_growing_buckets_moves_only_to_new_bucket(input in any::<u32>(), n in 1usize..64) {
            let before = consistent_hash(u64::from(input), n);
            let after = consistent_hash(u64::from(input), n + 1);
            prop_assert!(after == before || after == n);
        }
    }
}
