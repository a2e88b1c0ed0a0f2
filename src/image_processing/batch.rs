//! Byte-budget batching for uploaded images.
//!
//! Batches bound how much image data is decoded at once: the orchestrator runs
//! batches one after the other and fans out only within a batch.

use tracing::warn;

use crate::error::PartitionError;

/// Anything with a declared size in bytes
pub trait ByteSized {
    /// Declared size used for packing
    fn byte_size(&self) -> u64;

    /// Size actually held; a mismatch with `byte_size` marks the item as malformed
    fn actual_size(&self) -> u64 {
        self.byte_size()
    }
}

/// Ordered group of items processed together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    items: Vec<T>,
    total_bytes: u64,
}

impl<T: ByteSized> Batch<T> {
    fn with_item(item: T) -> Self {
        let total_bytes = item.byte_size();
        Self {
            items: vec![item],
            total_bytes,
        }
    }

    fn push(&mut self, item: T) {
        self.total_bytes += item.byte_size();
        self.items.push(item);
    }

    fn from_items(items: Vec<T>) -> Self {
        let total_bytes = items.iter().map(ByteSized::byte_size).sum();
        Self { items, total_bytes }
    }
}

impl<T> Batch<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// True for the singleton escape hatch: one item larger than the capacity
    pub fn is_oversized(&self, capacity_bytes: u64) -> bool {
        self.items.len() == 1 && self.total_bytes > capacity_bytes
    }
}

/// First-fit-decreasing bin packing.
///
/// Items are sorted by size (largest first) and each goes into the first batch
/// with room for it. An item larger than `capacity_bytes` gets a batch of its own.
/// Greedy, not optimal: `n` items of size `S` under capacity `C` yield batches
/// of `C / S` items.
pub fn partition<T: ByteSized>(
    items: Vec<T>,
    capacity_bytes: u64,
) -> Result<Vec<Batch<T>>, PartitionError> {
    check_packable(&items, capacity_bytes)?;
    Ok(pack(items, capacity_bytes))
}

/// Split items into groups of `chunk_size`, keeping input order
pub fn fixed_chunks<T: ByteSized>(items: Vec<T>, chunk_size: usize) -> Vec<Batch<T>> {
    let chunk_size = chunk_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(chunk_size));
    let mut current = Vec::with_capacity(chunk_size);

    for item in items {
        current.push(item);
        if current.len() == chunk_size {
            batches.push(Batch::from_items(std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        batches.push(Batch::from_items(current));
    }

    batches
}

/// Bin-pack, substituting fixed chunking when packing cannot run
pub fn partition_or_chunk<T: ByteSized>(
    items: Vec<T>,
    capacity_bytes: u64,
    chunk_size: usize,
) -> Vec<Batch<T>> {
    match check_packable(&items, capacity_bytes) {
        Ok(()) => pack(items, capacity_bytes),
        Err(err) => {
            warn!(chunk_size, "{}, using fixed-size chunks", err);
            fixed_chunks(items, chunk_size)
        }
    }
}

fn check_packable<T: ByteSized>(items: &[T], capacity_bytes: u64) -> Result<(), PartitionError> {
    if capacity_bytes == 0 {
        return Err(PartitionError::ZeroCapacity);
    }

    match items
        .iter()
        .enumerate()
        .find(|(_, item)| item.byte_size() != item.actual_size())
    {
        Some((index, item)) => Err(PartitionError::MalformedItem {
            index,
            declared: item.byte_size(),
            actual: item.actual_size(),
        }),
        None => Ok(()),
    }
}

fn pack<T: ByteSized>(items: Vec<T>, capacity_bytes: u64) -> Vec<Batch<T>> {
    let mut sorted = items;
    sorted.sort_by(|a, b| b.byte_size().cmp(&a.byte_size()));

    let mut batches: Vec<Batch<T>> = Vec::new();

    for item in sorted {
        let size = item.byte_size();

        if size > capacity_bytes {
            warn!(
                size,
                capacity_bytes, "Item exceeds batch capacity, processing individually"
            );
            batches.push(Batch::with_item(item));
            continue;
        }

        match batches
            .iter_mut()
            .find(|batch| batch.total_bytes + size <= capacity_bytes)
        {
            Some(batch) => batch.push(item),
            None => batches.push(Batch::with_item(item)),
        }
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Upload {
        name: &'static str,
        declared: u64,
        actual: u64,
    }

    fn item(name: &'static str, size: u64) -> Upload {
        Upload {
            name,
            declared: size,
            actual: size,
        }
    }

    impl ByteSized for Upload {
        fn byte_size(&self) -> u64 {
            self.declared
        }

        fn actual_size(&self) -> u64 {
            self.actual
        }
    }

    #[test]
    fn test_empty_input_yields_no_batches() {
        let batches = partition(Vec::<Upload>::new(), 4 * MB).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn test_five_one_megabyte_items_under_four_megabytes() {
        let items = vec![
            item("a", MB),
            item("b", MB),
            item("c", MB),
            item("d", MB),
            item("e", MB),
        ];
        let batches = partition(items, 4 * MB).unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 4);
        assert_eq!(batches[0].total_bytes(), 4 * MB);
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[1].total_bytes(), MB);
    }

    #[test]
    fn test_identical_sizes_fill_floor_capacity_over_size() {
        let items: Vec<Upload> = (0..10).map(|_| item("x", 3)).collect();
        let batches = partition(items, 10).unwrap();

        // floor(10 / 3) = 3 per batch
        let counts: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(counts, vec![3, 3, 3, 1]);
    }

    #[test]
    fn test_counts_sum_and_capacity_respected() {
        let sizes = [7, 1, 3, 9, 2, 2, 5, 8, 4, 6, 1, 15];
        let items: Vec<Upload> = sizes.iter().map(|&s| item("x", s)).collect();
        let capacity = 10;
        let batches = partition(items, capacity).unwrap();

        let total: usize = batches.iter().map(Batch::len).sum();
        assert_eq!(total, sizes.len());

        for batch in &batches {
            if !batch.is_oversized(capacity) {
                assert!(batch.total_bytes() <= capacity);
            }
        }
    }

    #[test]
    fn test_oversized_item_gets_singleton_batch() {
        let items = vec![item("small", 2), item("huge", 50), item("medium", 5)];
        let batches = partition(items, 10).unwrap();

        assert_eq!(batches.len(), 2);
        assert!(batches[0].is_oversized(10));
        assert_eq!(batches[0].items()[0].name, "huge");
        assert_eq!(batches[1].total_bytes(), 7);
    }

    #[test]
    fn test_first_fit_places_into_earliest_batch_with_room() {
        // sorted: 6, 5, 4, 3 -> [6,4] [5,3] under capacity 10
        let items = vec![item("c", 3), item("b", 5), item("d", 4), item("a", 6)];
        let batches = partition(items, 10).unwrap();

        let names: Vec<Vec<&str>> = batches
            .iter()
            .map(|b| b.items().iter().map(|i| i.name).collect())
            .collect();
        assert_eq!(names, vec![vec!["a", "d"], vec!["b", "c"]]);
    }

    #[test]
    fn test_partition_rejects_zero_capacity_and_malformed_items() {
        assert_eq!(
            partition(vec![item("a", 1)], 0).unwrap_err(),
            PartitionError::ZeroCapacity
        );

        let malformed = Upload {
            name: "bad",
            declared: 10,
            actual: 3,
        };
        assert_eq!(
            partition(vec![item("a", 1), malformed], 100).unwrap_err(),
            PartitionError::MalformedItem {
                index: 1,
                declared: 10,
                actual: 3
            }
        );
    }

    #[test]
    fn test_fixed_chunks_keep_input_order() {
        let items = vec![item("a", 1), item("b", 9), item("c", 1), item("d", 1)];
        let batches = fixed_chunks(items, 3);

        assert_eq!(batches.len(), 2);
        let first: Vec<&str> = batches[0].items().iter().map(|i| i.name).collect();
        assert_eq!(first, vec!["a", "b", "c"]);
        assert_eq!(batches[0].total_bytes(), 11);
        assert_eq!(batches[1].items()[0].name, "d");
    }

    #[test]
    fn test_fixed_chunks_treats_zero_as_one() {
        let batches = fixed_chunks(vec![item("a", 1), item("b", 1)], 0);
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn test_partition_or_chunk_falls_back_on_malformed_input() {
        let malformed = Upload {
            name: "bad",
            declared: 1,
            actual: 2,
        };
        let items = vec![item("a", 5), malformed, item("c", 5), item("d", 5)];
        let batches = partition_or_chunk(items, 100, 3);

        // Fixed chunking, not bin packing (which would produce one batch)
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn test_partition_or_chunk_falls_back_on_zero_capacity() {
        let items: Vec<Upload> = (0..7).map(|_| item("x", 1)).collect();
        let batches = partition_or_chunk(items, 0, 3);
        let counts: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(counts, vec![3, 3, 1]);
    }

    #[test]
    fn test_partition_or_chunk_uses_bin_packing_when_possible() {
        let items = vec![item("a", MB), item("b", MB), item("c", MB), item("d", MB), item("e", MB)];
        let batches = partition_or_chunk(items, 4 * MB, 3);
        let counts: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(counts, vec![4, 1]);
    }
}
