//! Root-side aggregation of per-participant reductions.

use crate::error::{Error, Result};
use crate::topology::RingTopology;
use crate::Rank;
use serde::Serialize;

/// One row of an [`AggregationRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregationEntry {
    /// Participant identity; equals the row index.
    pub rank: Rank,
    /// Sum of the participant's send buffer before the exchange.
    pub sent_sum: f64,
    /// Sum of the participant's receive buffer after the exchange.
    pub received_sum: f64,
    /// Seconds the participant spent in the exchange round.
    pub elapsed_secs: f64,
}

/// Table of per-participant reductions, indexed by identity.
///
/// Built once at the root from gathered columns and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationRecord {
    entries: Vec<AggregationEntry>,
}

impl AggregationRecord {
    /// Zips three gathered columns into rows. The columns must be rank-indexed
    /// and of equal, non-zero length.
    pub fn from_columns(sent: &[f64], received: &[f64], elapsed_secs: &[f64]) -> Result<Self> {
        if sent.is_empty() {
            return Err(Error::InvalidGroupSize(0));
        }
        if received.len() != sent.len() || elapsed_secs.len() != sent.len() {
            return Err(Error::Configuration(format!(
                "gathered columns disagree on group size: {} sent, {} received, {} timings",
                sent.len(),
                received.len(),
                elapsed_secs.len()
            )));
        }
        let entries = sent
            .iter()
            .zip(received)
            .zip(elapsed_secs)
            .enumerate()
            .map(|(rank, ((&sent_sum, &received_sum), &elapsed_secs))| AggregationEntry {
                rank,
                sent_sum,
                received_sum,
                elapsed_secs,
            })
            .collect();
        Ok(Self { entries })
    }

    /// Number of participants recorded.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`: a record holds at least one row.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Row for `rank`.
    #[inline]
    pub fn get(&self, rank: Rank) -> Option<&AggregationEntry> {
        self.entries.get(rank)
    }

    /// Rows in identity order.
    pub fn iter(&self) -> impl Iterator<Item = &AggregationEntry> {
        self.entries.iter()
    }

    /// Largest per-participant elapsed time.
    pub fn max_elapsed_secs(&self) -> f64 {
        self.entries
            .iter()
            .map(|e| e.elapsed_secs)
            .fold(0.0, f64::max)
    }

    /// Checks that every participant received exactly what its predecessor sent.
    ///
    /// Fails with [`Error::ShiftMismatch`] naming the first rank whose received
    /// sum differs from its predecessor's sent sum.
    pub fn verify_ring_shift(&self, topology: &RingTopology) -> Result<()> {
        if topology.size() != self.len() {
            return Err(Error::InvalidGroupSize(topology.size()));
        }
        for entry in &self.entries {
            let expected = self.entries[topology.predecessor(entry.rank)].sent_sum;
            if !same_sum(expected, entry.received_sum) {
                return Err(Error::ShiftMismatch {
                    rank: entry.rank,
                    expected,
                    actual: entry.received_sum,
                });
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a AggregationRecord {
    type Item = &'a AggregationEntry;
    type IntoIter = std::slice::Iter<'a, AggregationEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// Both sums are taken over identical element sequences in identical order,
// so they agree bit for bit unless the data differs.
#[inline]
fn same_sum(a: f64, b: f64) -> bool {
    a.to_bits() == b.to_bits()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_is_identity_ordered() {
        let record =
            AggregationRecord::from_columns(&[6.0, 12.0, 18.0], &[18.0, 6.0, 12.0], &[0.1, 0.2, 0.3])
                .unwrap();
        assert_eq!(record.len(), 3);
        let ranks: Vec<_> = record.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert_eq!(record.get(1).unwrap().received_sum, 6.0);
        assert_eq!(record.max_elapsed_secs(), 0.3);
    }

    #[test]
    fn test_ring_shift_accepts_rotation() {
        let topology = RingTopology::new(3).unwrap();
        let record =
            AggregationRecord::from_columns(&[6.0, 12.0, 18.0], &[18.0, 6.0, 12.0], &[0.0; 3])
                .unwrap();
        assert!(record.verify_ring_shift(&topology).is_ok());
    }

    #[test]
    fn test_ring_shift_reports_first_mismatch() {
        let topology = RingTopology::new(3).unwrap();
        // Rank 1 received its own data instead of rank 0's
        let record =
            AggregationRecord::from_columns(&[6.0, 12.0, 18.0], &[18.0, 12.0, 12.0], &[0.0; 3])
                .unwrap();
        assert_eq!(
            record.verify_ring_shift(&topology).unwrap_err(),
            Error::ShiftMismatch {
                rank: 1,
                expected: 6.0,
                actual: 12.0
            }
        );
    }

    #[test]
    fn test_single_participant_shifts_onto_itself() {
        let topology = RingTopology::new(1).unwrap();
        let record = AggregationRecord::from_columns(&[3.0], &[3.0], &[0.0]).unwrap();
        assert!(record.verify_ring_shift(&topology).is_ok());
    }

    #[test]
    fn test_mismatched_columns_rejected() {
        assert!(AggregationRecord::from_columns(&[1.0, 2.0], &[2.0], &[0.0, 0.0]).is_err());
        assert_eq!(
            AggregationRecord::from_columns(&[], &[], &[]).unwrap_err(),
            Error::InvalidGroupSize(0)
        );
    }
}
