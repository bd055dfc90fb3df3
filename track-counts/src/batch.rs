use std::fmt;
use std::num::NonZeroUsize;

use crate::error::ConfigError;

/// Identity of a batch: its position in the stream and its record count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchId {
    pub ordinal: usize,
    pub size: usize,
}

impl BatchId {
    /// Prefix shared by all artifacts of this batch.
    pub fn prefix(&self) -> String {
        format!("batch.{}.size.{}", self.ordinal, self.size)
    }

    /// Parses a file name of the form `batch.<ordinal>.size.<size><suffix>`.
    pub fn from_artifact_name(name: &str, suffix: &str) -> Option<Self> {
        let rest = name.strip_suffix(suffix)?.strip_prefix("batch.")?;
        let (ordinal, size) = rest.split_once(".size.")?;
        if !is_decimal(ordinal) || !is_decimal(size) {
            return None;
        }
        Some(Self {
            ordinal: ordinal.parse().ok()?,
            size: size.parse().ok()?,
        })
    }
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    pub id: BatchId,
    pub items: Vec<T>,
}

/// Splits a sequence into consecutive batches of `capacity` items.
///
/// Only the last batch may be shorter; an empty source yields no batch at all.
pub struct Batcher<I: Iterator> {
    source: I,
    capacity: NonZeroUsize,
    next_ordinal: usize,
}

impl<I: Iterator> Batcher<I> {
    pub fn new(source: I, capacity: usize) -> Result<Self, ConfigError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(ConfigError::ZeroBatchSize)?;
        Ok(Self {
            source,
            capacity,
            next_ordinal: 0,
        })
    }
}

impl<I: Iterator> Iterator for Batcher<I> {
    type Item = Batch<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let items: Vec<I::Item> = self.source.by_ref().take(self.capacity.get()).collect();
        if items.is_empty() {
            return None;
        }
        let id = BatchId {
            ordinal: self.next_ordinal,
            size: items.len(),
        };
        self.next_ordinal += 1;
        Some(Batch { id, items })
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchId, Batcher};
    use proptest::prelude::*;

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(Batcher::new(0..10, 0).is_err());
    }

    #[test]
    fn empty_source_yields_nothing() {
        assert_eq!(Batcher::new(0..0, 3).unwrap().count(), 0);
    }

    #[test]
    fn last_batch_is_shorter() {
        let batches: Vec<_> = Batcher::new(0..7, 3).unwrap().collect();
        let sizes: Vec<_> = batches.iter().map(|b| b.items.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(batches[2].id, BatchId { ordinal: 2, size: 1 });
        assert_eq!(batches[2].id.prefix(), "batch.2.size.1");
    }

    #[test]
    fn artifact_names() {
        assert_eq!(
            BatchId::from_artifact_name("batch.12.size.500_state_count.csv", "_state_count.csv"),
            Some(BatchId { ordinal: 12, size: 500 })
        );
        assert_eq!(
            BatchId::from_artifact_name("combined_state_count.csv", "_state_count.csv"),
            None
        );
        assert_eq!(
            BatchId::from_artifact_name("batch.1.size.5_country_count.csv", "_state_count.csv"),
            None
        );
        assert_eq!(
            BatchId::from_artifact_name("batch.x.size.5_state_count.csv", "_state_count.csv"),
            None
        );
        assert_eq!(
            BatchId::from_artifact_name("batch.+1.size.5_state_count.csv", "_state_count.csv"),
            None
        );
    }

    proptest! {
        #[test]
        fn batches_partition_the_source(n in 0usize..200, c in 1usize..50) {
            let batches: Vec<_> = Batcher::new(0..n, c).unwrap().collect();

            let expected_batches = (n + c - 1) / c;
            prop_assert_eq!(batches.len(), expected_batches);
            for (i, batch) in batches.iter().enumerate() {
                prop_assert_eq!(batch.id.ordinal, i);
                prop_assert_eq!(batch.id.size, batch.items.len());
                if i + 1 < batches.len() {
                    prop_assert_eq!(batch.items.len(), c);
                } else {
                    prop_assert!(!batch.items.is_empty() && batch.items.len() <= c);
                    if n % c != 0 {
                        prop_assert_eq!(batch.items.len(), n % c);
                    }
                }
            }

            let concatenated: Vec<usize> = batches.into_iter().flat_map(|b| b.items).collect();
            prop_assert_eq!(concatenated, (0..n).collect::<Vec<_>>());
        }
    }
}
