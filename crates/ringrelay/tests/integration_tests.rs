use ringrelay::{
    exchange_round, fill_buffer, run_exchange, run_hybrid, BufferFill, Endpoint, Error,
    ExchangeConfig, FabricConfig, RelayConfig, RelayRole, RequestState, Source, TagMatch,
    ThreadLevel, TransferRequest, World, SYNCHRONOUS_CONFIG,
};

#[test]
fn test_five_participant_exchange_shifts_buffers() {
    const N: usize = 5;

    let received = World::new(N)
        .unwrap()
        .run(|p| {
            let group = p.group();
            let send = fill_buffer(BufferFill::Scaled, group.rank(), 3);
            let mut recv = vec![0.0; 3];
            exchange_round(group, &send, &mut recv, 0)?;
            Ok(recv)
        })
        .unwrap();

    for (rank, recv) in received.iter().enumerate() {
        let pred = (rank + N - 1) % N;
        assert_eq!(recv, &fill_buffer(BufferFill::Scaled, pred, 3));
        assert_eq!(recv.iter().sum::<f64>(), 6.0 * (pred + 1) as f64);
    }
}

#[test]
fn test_exchange_report_table() {
    let reports = World::new(5)
        .unwrap()
        .run(|p| run_exchange(p.group(), &ExchangeConfig::new(3)))
        .unwrap();

    let report = reports[0].as_ref().expect("root report");
    assert_eq!(report.buffer_size, 3);
    let sent: Vec<f64> = report.record.iter().map(|e| e.sent_sum).collect();
    let received: Vec<f64> = report.record.iter().map(|e| e.received_sum).collect();
    assert_eq!(sent, vec![6.0, 12.0, 18.0, 24.0, 30.0]);
    assert_eq!(received, vec![30.0, 6.0, 12.0, 18.0, 24.0]);
    assert!(report.record.iter().all(|e| e.elapsed_secs >= 0.0));
    assert!(reports[1..].iter().all(Option::is_none));
}

#[test]
fn test_random_exchange_verifies() {
    let config = ExchangeConfig::new(64).with_fill(BufferFill::Random { seed: 7 });
    let reports = World::with_config(4, SYNCHRONOUS_CONFIG)
        .unwrap()
        .run(|p| run_exchange(p.group(), &config))
        .unwrap();
    assert_eq!(reports[0].as_ref().unwrap().record.len(), 4);
}

#[test]
fn test_hybrid_relay_under_synchronous_sends() {
    let config = RelayConfig::default();
    let per_rank = World::with_config(4, SYNCHRONOUS_CONFIG)
        .unwrap()
        .run(|p| run_hybrid(p, Some(3), &config))
        .unwrap();

    assert_eq!(per_rank.len(), 4);
    for (rank, summaries) in per_rank.iter().enumerate() {
        assert_eq!(summaries.len(), 3);
        for summary in summaries {
            assert_eq!(summary.rank, rank);
            assert_eq!(summary.iterations, RelayConfig::DEFAULT_ITERATIONS);
            assert_eq!(summary.message, "hello there");
            assert_eq!(summary.last_source, Some((rank + 3) % 4));
            let expected = if rank == 0 {
                RelayRole::SendFirst
            } else {
                RelayRole::ReceiveFirst
            };
            assert_eq!(summary.role, expected);
        }
    }
}

#[test]
fn test_messages_do_not_cross_contexts() {
    World::new(2)
        .unwrap()
        .run(|p| {
            let first = p.group().duplicate()?;
            let second = p.group().duplicate()?;

            if p.rank() == 0 {
                first.send(&[1u8], Endpoint::Rank(1), 7)?;
            }
            p.group().barrier()?;

            if p.rank() == 1 {
                let mut buf = [0u8];
                {
                    let mut rx = second.issue_receive(&mut buf, Source::Any, TagMatch::Any)?;
                    for _ in 0..200 {
                        assert!(!rx.poll_ready()?);
                    }
                    assert_eq!(rx.state(), RequestState::Posted);
                }
                let status = first.receive(&mut buf, Source::Any, TagMatch::Any)?;
                assert_eq!(buf, [1]);
                assert_eq!(status.tag, Some(7));
            }
            p.group().barrier()?;

            // Same source, same tag, different contexts: each gets its own
            if p.rank() == 0 {
                first.send(&[10u8], Endpoint::Rank(1), 3)?;
                second.send(&[20u8], Endpoint::Rank(1), 3)?;
            } else {
                let mut buf = [0u8];
                second.receive(&mut buf, Source::Rank(0), TagMatch::Tag(3))?;
                assert_eq!(buf, [20]);
                first.receive(&mut buf, Source::Rank(0), TagMatch::Tag(3))?;
                assert_eq!(buf, [10]);
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_per_source_order_survives_backpressure() {
    const SENDS: u32 = 50;
    // Two-slot lanes force most sends to park
    let config = FabricConfig::default().with_lane_bits(1);

    World::with_config(2, config)
        .unwrap()
        .run(|p| {
            let group = p.group();
            if group.rank() == 0 {
                let mut requests = (0..SENDS)
                    .map(|i| group.issue_send(&[i], Endpoint::Rank(1), 0))
                    .collect::<ringrelay::Result<Vec<_>>>()?;
                TransferRequest::wait_all(&mut requests)?;
            } else {
                for expected in 0..SENDS {
                    let mut buf = [u32::MAX];
                    group.receive(&mut buf, Source::Rank(0), TagMatch::Tag(0))?;
                    assert_eq!(buf[0], expected);
                }
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_missing_thread_count_aborts_every_participant() {
    let err = World::new(4)
        .unwrap()
        .run(|p| run_hybrid(p, None, &RelayConfig::default()))
        .unwrap_err();
    assert!(err.is_fatal_precondition());
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_insufficient_thread_level_aborts() {
    let config = FabricConfig::default().with_thread_level(ThreadLevel::Serialized);
    let err = World::with_config(3, config)
        .unwrap()
        .run(|p| run_hybrid(p, Some(2), &RelayConfig::default()))
        .unwrap_err();
    assert_eq!(
        err,
        Error::Capability {
            required: ThreadLevel::Multiple,
            provided: ThreadLevel::Serialized
        }
    );
}

#[test]
fn test_contexts_retired_after_relay() {
    // Repeated hybrid runs in one world must not leak into each other
    let config = RelayConfig::default().with_iterations(5);
    World::new(3)
        .unwrap()
        .run(|p| {
            for _ in 0..3 {
                let summaries = run_hybrid(p, Some(2), &config)?;
                assert_eq!(summaries.len(), 2);
            }
            Ok(())
        })
        .unwrap();
}
