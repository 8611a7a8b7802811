//! Integration tests for continuation chains

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use filament::{DispatchError, Dispatcher, TaskError};
use parking_lot::Mutex;

fn dispatcher() -> Dispatcher {
    Dispatcher::with_threads(2, 1, false)
}

#[test]
fn test_linear_chain() {
    let d = dispatcher();
    let chain = d
        .post(|_| Ok(1))
        .unwrap()
        .then(|ctx| Ok(ctx.get_prev::<i32>()? + 2))
        .unwrap()
        .then(|ctx| Ok(ctx.get_prev::<i32>()? * 10))
        .unwrap()
        .end();

    assert_eq!(chain.get().unwrap(), 30);
    assert_eq!(chain.get_at::<i32>(0).unwrap(), 1);
    assert_eq!(chain.get_at::<i32>(1).unwrap(), 3);
    assert_eq!(chain.get_at::<i32>(2).unwrap(), 30);
    // negative positions count back from the tail
    assert_eq!(chain.get_at::<i32>(-1).unwrap(), 30);
    assert_eq!(chain.get_prev::<i32>().unwrap(), 3);

    d.terminate();
}

#[test]
fn test_error_path_fast_forward() {
    let d = dispatcher();
    let skipped_ran = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(Mutex::new(String::new()));

    let skipped_flag = skipped_ran.clone();
    let observed_err = observed.clone();
    let chain = d
        .post(|_| Ok(1))
        .unwrap()
        .then(|_| -> Result<i32, TaskError> { Err("E".into()) })
        .unwrap()
        .then(move |ctx| {
            skipped_flag.store(true, Ordering::SeqCst);
            Ok(ctx.get_prev::<i32>()? + 1)
        })
        .unwrap()
        .on_error(move |_, err| {
            observed_err.lock().push_str(&err.to_string());
            Ok(-1)
        })
        .unwrap()
        .finally(|_| Ok(0))
        .unwrap()
        .end();

    assert_eq!(chain.get().unwrap(), 0);
    // the final stage sees the error handler's output as its predecessor
    assert_eq!(chain.get_prev::<i32>().unwrap(), -1);
    // the skipped stage never executed, and the exception is observable there
    assert!(!skipped_ran.load(Ordering::SeqCst));
    assert_eq!(observed.lock().as_str(), "E");
    assert_eq!(chain.get_at::<i32>(2).unwrap_err().to_string(), "E");

    d.terminate();
}

#[test]
fn test_error_without_handler_reaches_final() {
    let d = dispatcher();
    let chain = d
        .post(|_| -> Result<i32, TaskError> { Err("boom".into()) })
        .unwrap()
        .then(|ctx| Ok(ctx.get_prev::<i32>()? + 1))
        .unwrap()
        .finally(|ctx| {
            // the final stage observes the exception through its predecessor
            match ctx.get_prev::<i32>() {
                Err(e) => Ok(e.to_string()),
                Ok(_) => Ok(String::from("no error")),
            }
        })
        .unwrap()
        .end();

    assert_eq!(chain.get().unwrap(), "boom");
    d.terminate();
}

#[test]
fn test_error_handler_skipped_on_success() {
    let d = dispatcher();
    let handler_ran = Arc::new(AtomicBool::new(false));
    let flag = handler_ran.clone();

    let chain = d
        .post(|_| Ok(11))
        .unwrap()
        .on_error(move |_, _| {
            flag.store(true, Ordering::SeqCst);
            Ok(-1)
        })
        .unwrap()
        .finally(|ctx| ctx.get_at::<i32>(0))
        .unwrap()
        .end();

    assert_eq!(chain.get().unwrap(), 11);
    assert!(!handler_ran.load(Ordering::SeqCst));
    d.terminate();
}

#[test]
fn test_append_after_completion() {
    let d = dispatcher();
    let head = d.post(|_| Ok(5)).unwrap();
    head.wait();
    // give the worker time to record the stage outcome
    thread::sleep(Duration::from_millis(50));

    let next = head.then(|ctx| Ok(ctx.get_prev::<i32>()? * 2)).unwrap();
    assert_eq!(next.get().unwrap(), 10);
    d.terminate();
}

#[test]
fn test_error_handler_appended_after_failure() {
    let d = dispatcher();
    let head = d
        .post(|_| -> Result<i32, TaskError> { Err("late".into()) })
        .unwrap();
    head.wait();
    thread::sleep(Duration::from_millis(50));

    let handled = head.on_error(|_, err| Ok(err.to_string())).unwrap();
    assert_eq!(handled.get().unwrap(), "late");
    d.terminate();
}

#[test]
fn test_chain_topology_validation() {
    let d = dispatcher();
    let tail = d
        .post(|_| Ok(0))
        .unwrap()
        .finally(|_| Ok(0))
        .unwrap();

    // nothing may follow a final stage
    assert!(matches!(
        tail.then(|_| Ok(0)),
        Err(DispatchError::InvalidChain(_))
    ));

    let chain = d
        .post(|_| Ok(0))
        .unwrap()
        .on_error(|_, _| Ok(0))
        .unwrap();
    // a chain holds at most one error handler
    assert!(matches!(
        chain.on_error(|_, _| Ok(0)),
        Err(DispatchError::InvalidChain(_))
    ));

    let ended = d.post(|_| Ok(0)).unwrap().end();
    assert!(matches!(
        ended.then(|_| Ok(0)),
        Err(DispatchError::InvalidChain(_))
    ));

    d.terminate();
}

#[test]
fn test_invalid_positional_access() {
    let d = dispatcher();
    let chain = d.post(|_| Ok(1)).unwrap().end();
    chain.wait();

    assert!(matches!(
        chain.get_at::<i32>(5),
        Err(TaskError::Dispatch(DispatchError::InvalidPosition(5)))
    ));
    assert!(matches!(
        chain.get_at::<String>(0),
        Err(TaskError::Dispatch(DispatchError::TypeMismatch(0)))
    ));
    d.terminate();
}

#[test]
fn test_early_set_wins_over_return_value() {
    let d = dispatcher();
    let chain = d
        .post(|ctx| {
            ctx.set(10)?;
            Ok(99)
        })
        .unwrap();
    assert_eq!(chain.get().unwrap(), 10);
    d.terminate();
}

#[test]
fn test_get_ref_borrowed_view() {
    let d = dispatcher();
    let chain = d.post(|_| Ok(String::from("borrowed"))).unwrap();
    {
        let view = chain.get_ref().unwrap();
        assert_eq!(view.as_str(), "borrowed");
    }
    d.terminate();
}

#[test]
fn test_panic_captured_as_failure() {
    let d = dispatcher();
    let chain = d
        .post(|_| -> Result<i32, TaskError> { panic!("kaboom") })
        .unwrap()
        .on_error(|_, err| Ok(err.to_string()))
        .unwrap()
        .end();
    let message = chain.get().unwrap();
    assert!(message.contains("kaboom"), "got: {message}");
    d.terminate();
}

#[test]
fn test_spawn_sub_chain_from_coroutine() {
    let d = dispatcher();
    let chain = d
        .post(move |co| {
            let sub = co.post(|_| Ok(21))?;
            let doubled = sub.get_coro(co)? * 2;
            Ok(doubled)
        })
        .unwrap();
    assert_eq!(chain.get().unwrap(), 42);
    d.terminate();
}

#[test]
fn test_yield_interleaves_chains() {
    let d = Dispatcher::with_threads(1, 1, false);
    let order = Arc::new(Mutex::new(Vec::new()));
    let go = Arc::new(AtomicBool::new(false));

    let order_a = order.clone();
    let go_a = go.clone();
    let a = d
        .post(move |co| {
            while !go_a.load(Ordering::Acquire) {
                co.yield_now()?;
            }
            for i in 0..3 {
                order_a.lock().push(format!("a{i}"));
                co.yield_now()?;
            }
            Ok(0)
        })
        .unwrap();
    let order_b = order.clone();
    let go_b = go.clone();
    let b = d
        .post(move |co| {
            while !go_b.load(Ordering::Acquire) {
                co.yield_now()?;
            }
            for i in 0..3 {
                order_b.lock().push(format!("b{i}"));
                co.yield_now()?;
            }
            Ok(0)
        })
        .unwrap();
    // both chains are queued before either starts recording
    go.store(true, Ordering::Release);

    a.wait();
    b.wait();
    let seen = order.lock().clone();
    // both chains shared the single worker; neither ran to completion first
    let first_b = seen.iter().position(|s| s.starts_with('b')).unwrap();
    let last_a = seen.iter().rposition(|s| s.starts_with('a')).unwrap();
    assert!(first_b < last_a, "interleaving expected, got {seen:?}");
    d.terminate();
}
