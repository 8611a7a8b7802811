//! Streaming buffer tests

use std::sync::Arc;
use std::time::Duration;

use filament::Dispatcher;
use parking_lot::Mutex;

#[test]
fn test_producer_consumer_stream() {
    let d = Dispatcher::with_threads(2, 1, false);

    let producer = d
        .post::<i32, _>(|ctx| {
            ctx.push(1)?;
            ctx.push(2)?;
            ctx.push(3)?;
            ctx.close_buffer()?;
            Ok(3)
        })
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let consumer_seen = seen.clone();
    let upstream = producer.clone();
    let consumer = d
        .post::<i32, _>(move |co| {
            loop {
                let (value, closed) = upstream.pull_coro(co)?;
                if let Some(v) = value {
                    consumer_seen.lock().push(v);
                }
                if closed {
                    break;
                }
            }
            Ok(0)
        })
        .unwrap();

    consumer.wait();
    assert_eq!(*seen.lock(), vec![1, 2, 3]);
    d.terminate();
}

#[test]
fn test_thread_side_pull_drains_then_reports_closed() {
    let d = Dispatcher::with_threads(1, 1, false);

    let producer = d
        .post::<i32, _>(|ctx| {
            for i in 1..=3 {
                ctx.push(i)?;
                ctx.yield_now()?;
            }
            ctx.close_buffer()?;
            Ok(0)
        })
        .unwrap();

    // pull from the posting thread: values in push order, then closed
    assert_eq!(producer.pull(), (Some(1), false));
    assert_eq!(producer.pull(), (Some(2), false));
    assert_eq!(producer.pull(), (Some(3), false));
    assert_eq!(producer.pull(), (None, true));
    d.terminate();
}

#[test]
fn test_slow_producer_parks_consumer() {
    let d = Dispatcher::with_threads(2, 1, false);

    let producer = d
        .post::<u64, _>(|ctx| {
            for i in 0..5 {
                ctx.sleep(Duration::from_millis(10))?;
                ctx.push(i)?;
            }
            ctx.close_buffer()?;
            Ok(0)
        })
        .unwrap();

    let upstream = producer.clone();
    let consumer = d
        .post::<u64, _>(move |co| {
            let mut total = 0;
            loop {
                let (value, closed) = upstream.pull_coro(co)?;
                if let Some(v) = value {
                    total += v;
                }
                if closed {
                    break;
                }
            }
            Ok(total)
        })
        .unwrap();

    assert_eq!(consumer.get().unwrap(), 10);
    d.terminate();
}

#[test]
fn test_push_after_close_is_rejected() {
    let d = Dispatcher::with_threads(1, 1, false);
    let chain = d
        .post::<i32, _>(|ctx| {
            ctx.push(1)?;
            ctx.close_buffer()?;
            // the stream is closed; a late push reports the domain error
            assert!(ctx.push(2).is_err());
            Ok(0)
        })
        .unwrap();
    chain.wait();
    assert_eq!(chain.pull(), (Some(1), false));
    assert_eq!(chain.pull(), (None, true));
    d.terminate();
}
