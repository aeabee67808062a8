//! Non-blocking ring exchange: every participant sends its buffer to its
//! successor and receives its predecessor's, all transfers in flight at once.

use crate::config::{BufferFill, ExchangeConfig};
use crate::datatype::Element;
use crate::error::Result;
use crate::gather::AggregationRecord;
use crate::group::ParticipantGroup;
use crate::status::{Endpoint, Source, TagMatch};
use crate::Tag;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Outcome of a full exchange run, available at the root only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeReport {
    /// Elements per buffer.
    pub buffer_size: usize,
    /// Per-participant sums and timings, in identity order.
    pub record: AggregationRecord,
    /// Wall time the root spent in the exchange round, in seconds.
    pub total_elapsed_secs: f64,
}

/// Builds the send buffer of `rank`.
pub fn fill_buffer(fill: BufferFill, rank: usize, len: usize) -> Vec<f64> {
    match fill {
        BufferFill::Scaled => {
            let weight = (rank + 1) as f64;
            (1..=len).map(|i| i as f64 * weight).collect()
        }
        BufferFill::Random { seed } => {
            let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(rank as u64));
            (0..len).map(|_| rng.gen::<f64>()).collect()
        }
    }
}

/// One exchange round: issue the send to the successor, issue the receive
/// from the predecessor, then wait on both. Returns the time spent.
///
/// The receive accepts any tag, so only the source pins the match.
pub fn exchange_round<T: Element>(
    group: &ParticipantGroup,
    send: &[T],
    recv: &mut [T],
    tag: Tag,
) -> Result<Duration> {
    let start = Instant::now();
    let (successor, predecessor) = (group.successor(), group.predecessor());

    let mut tx = group.issue_send(send, Endpoint::Rank(successor), tag)?;
    let mut rx = group.issue_receive(recv, Source::Rank(predecessor), TagMatch::Any)?;
    tx.wait()?;
    let status = rx.wait()?;

    let elapsed = start.elapsed();
    debug!(
        rank = group.rank(),
        successor,
        predecessor,
        count = status.count,
        elapsed_us = elapsed.as_micros() as u64,
        "exchange round complete"
    );
    Ok(elapsed)
}

/// Runs a complete exchange with verification.
///
/// Every participant must call this. Sent sums are gathered before the
/// round; received sums and round times after it. The root then checks that
/// each participant received what its predecessor sent and returns the
/// report; the others return `None`.
pub fn run_exchange(
    group: &ParticipantGroup,
    config: &ExchangeConfig,
) -> Result<Option<ExchangeReport>> {
    config.validate()?;
    let root = config.root;

    let send = fill_buffer(config.fill, group.rank(), config.buffer_size);
    let mut recv = vec![0.0f64; config.buffer_size];
    let sent = group.gather(send.iter().sum::<f64>(), root)?;

    let elapsed = exchange_round(group, &send, &mut recv, config.tag)?;

    let received = group.gather(recv.iter().sum::<f64>(), root)?;
    let timings = group.gather(elapsed.as_secs_f64(), root)?;

    let (Some(sent), Some(received), Some(timings)) = (sent, received, timings) else {
        return Ok(None);
    };
    let record = AggregationRecord::from_columns(&sent, &received, &timings)?;
    record.verify_ring_shift(&group.topology())?;

    let report = ExchangeReport {
        buffer_size: config.buffer_size,
        record,
        total_elapsed_secs: elapsed.as_secs_f64(),
    };
    info!(
        participants = group.size(),
        buffer_size = config.buffer_size,
        total_elapsed_secs = report.total_elapsed_secs,
        "ring exchange verified"
    );
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SYNCHRONOUS_CONFIG;
    use crate::World;

    #[test]
    fn test_scaled_fill() {
        assert_eq!(fill_buffer(BufferFill::Scaled, 2, 3), vec![3.0, 6.0, 9.0]);
        assert!(fill_buffer(BufferFill::Scaled, 0, 0).is_empty());
    }

    #[test]
    fn test_random_fill_is_seeded_per_rank() {
        let fill = BufferFill::Random { seed: 11 };
        let a = fill_buffer(fill, 0, 16);
        assert_eq!(a, fill_buffer(fill, 0, 16));
        assert_ne!(a, fill_buffer(fill, 1, 16));
        assert!(a.iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn test_round_shifts_buffers() {
        let received = World::new(4)
            .unwrap()
            .run(|p| {
                let group = p.group();
                let send = [group.rank() as u32; 2];
                let mut recv = [u32::MAX; 2];
                exchange_round(group, &send, &mut recv, 0)?;
                Ok(recv)
            })
            .unwrap();
        assert_eq!(received, vec![[3, 3], [0, 0], [1, 1], [2, 2]]);
    }

    #[test]
    fn test_run_exchange_under_synchronous_sends() {
        let reports = World::with_config(3, SYNCHRONOUS_CONFIG)
            .unwrap()
            .run(|p| run_exchange(p.group(), &ExchangeConfig::new(4)))
            .unwrap();
        let report = reports[0].as_ref().unwrap();
        assert_eq!(report.record.len(), 3);
        // Scaled fill of length 4 sums to 10 * (rank + 1)
        assert_eq!(report.record.get(0).unwrap().received_sum, 30.0);
        assert!(reports[1..].iter().all(Option::is_none));
    }

    #[test]
    fn test_zero_buffer_rejected_everywhere() {
        let err = World::new(2)
            .unwrap()
            .run(|p| run_exchange(p.group(), &ExchangeConfig::new(0)))
            .unwrap_err();
        assert!(err.is_fatal_precondition());
    }
}
