//! Queue routing and selector validation tests

use std::sync::mpsc;
use std::time::Duration;

use filament::{Configuration, DispatchError, Dispatcher, QueueId, QueueType};

#[test]
fn test_any_routes_to_shortest_queue() {
    let d = Dispatcher::with_threads(4, 1, false);

    // one gate future blocks every pre-filled task
    let (tx, rx) = mpsc::channel::<()>();
    let gate = d
        .post_async_io(move || {
            rx.recv().ok();
            Ok(0)
        })
        .unwrap();

    let depths = [5usize, 2, 2, 7];
    for (queue, count) in depths.iter().enumerate() {
        for _ in 0..*count {
            let g = gate.clone();
            d.post_on::<i32, _>(queue as i32, false, move |co| {
                g.wait_coro(co)?;
                Ok(0)
            })
            .unwrap();
        }
    }
    for (queue, count) in depths.iter().enumerate() {
        assert_eq!(d.size(QueueType::Coro, queue as i32).unwrap(), *count);
    }

    // ANY picks the shortest queue, lowest index on ties: queue 1
    let g = gate.clone();
    let routed = d
        .post::<i32, _>(move |co| {
            g.wait_coro(co)?;
            Ok(0)
        })
        .unwrap();
    assert_eq!(d.size(QueueType::Coro, 1).unwrap(), 3);
    assert_eq!(d.size(QueueType::Coro, 2).unwrap(), 2);

    tx.send(()).unwrap();
    routed.wait();
    assert!(d.drain(Some(Duration::from_secs(5))));
    d.terminate();
}

#[test]
fn test_any_range_restricts_routing() {
    let mut config = Configuration::with_threads(4, 1, false);
    config.coro_queue_id_range_for_any = (2, 4);
    let d = Dispatcher::new(config);

    assert_eq!(d.coro_queue_id_range_for_any(), (2, 4));

    // every ANY post must land inside [2, 4)
    for _ in 0..8 {
        d.post::<i32, _>(|_| Ok(0)).unwrap();
    }
    assert!(d.drain(Some(Duration::from_secs(5))));
    let outside = d.stats(QueueType::Coro, 0).unwrap().enqueued
        + d.stats(QueueType::Coro, 1).unwrap().enqueued;
    let inside = d.stats(QueueType::Coro, 2).unwrap().enqueued
        + d.stats(QueueType::Coro, 3).unwrap().enqueued;
    assert_eq!(outside, 0);
    assert_eq!(inside, 8);
    d.terminate();
}

#[test]
fn test_default_any_range_spans_all_queues() {
    let d = Dispatcher::with_threads(5, 1, false);
    assert_eq!(d.coro_queue_id_range_for_any(), (0, 5));
    d.terminate();
}

#[test]
fn test_invalid_any_ranges_fall_back() {
    for bad in [(1, 0), (1, 1), (10, 9), (20, 30)] {
        let mut config = Configuration::with_threads(10, 1, false);
        config.coro_queue_id_range_for_any = bad;
        let d = Dispatcher::new(config);
        assert_eq!(
            d.coro_queue_id_range_for_any(),
            (0, 10),
            "range {bad:?} should fall back"
        );
        d.terminate();
    }
}

#[test]
fn test_out_of_range_queue_id_is_domain_error() {
    let d = Dispatcher::with_threads(2, 1, false);
    assert!(matches!(
        d.post_on::<i32, _>(7, false, |_| Ok(0)),
        Err(DispatchError::InvalidQueueId(7))
    ));
    assert!(matches!(
        d.post_async_io_on::<i32, _>(7, false, || Ok(0)),
        Err(DispatchError::InvalidQueueId(7))
    ));
    d.terminate();
}

#[test]
fn test_selector_validation() {
    let d = Dispatcher::with_threads(2, 2, false);

    // QueueType::All only accepts the ALL queue id
    assert!(matches!(
        d.size(QueueType::All, 1),
        Err(DispatchError::InvalidSelector)
    ));
    assert!(matches!(
        d.stats(QueueType::All, QueueId::ANY),
        Err(DispatchError::InvalidSelector)
    ));
    assert_eq!(d.size(QueueType::All, QueueId::ALL).unwrap(), 0);

    // ANY is only meaningful for the I/O pool
    assert!(matches!(
        d.size(QueueType::Coro, QueueId::ANY),
        Err(DispatchError::InvalidQueueId(_))
    ));
    assert_eq!(d.size(QueueType::Io, QueueId::ANY).unwrap(), 0);

    assert!(d.empty(QueueType::All, QueueId::ALL).unwrap());
    d.terminate();
}

#[test]
fn test_stats_track_completion_and_reset() {
    let d = Dispatcher::with_threads(1, 1, false);
    for _ in 0..4 {
        d.post_on::<i32, _>(0, false, |_| Ok(1)).unwrap();
    }
    d.post_on::<i32, _>(0, false, |_| Err("x".into())).unwrap();
    assert!(d.drain(Some(Duration::from_secs(5))));

    let stats = d.stats(QueueType::Coro, 0).unwrap();
    assert_eq!(stats.enqueued, 5);
    assert_eq!(stats.completed, 4);
    assert_eq!(stats.errored, 1);
    assert_eq!(stats.depth, 0);
    assert!(stats.peak_depth >= 1);

    d.reset_stats();
    let cleared = d.stats(QueueType::Coro, 0).unwrap();
    assert_eq!(cleared.enqueued, 0);
    assert_eq!(cleared.completed, 0);
    assert_eq!(cleared.errored, 0);
    d.terminate();
}

#[test]
fn test_high_priority_runs_ahead() {
    let d = Dispatcher::with_threads(1, 1, false);

    // hold the worker busy long enough for both posts below to land
    d.post_on::<i32, _>(0, false, |_| {
        std::thread::sleep(Duration::from_millis(100));
        Ok(0)
    })
    .unwrap();

    let order = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let normal_order = order.clone();
    d.post_on::<i32, _>(0, false, move |_| {
        normal_order.lock().push("normal");
        Ok(0)
    })
    .unwrap();
    let high_order = order.clone();
    d.post_on::<i32, _>(0, true, move |_| {
        high_order.lock().push("high");
        Ok(0)
    })
    .unwrap();

    assert!(d.drain(Some(Duration::from_secs(5))));
    assert_eq!(*order.lock(), vec!["high", "normal"]);
    d.terminate();
}
