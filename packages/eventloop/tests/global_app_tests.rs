//! Integration test for the process-wide app.
//!
//! Kept in its own test binary so the global instance starts uninitialized.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use eventloop::{AppConfig, EventLoopError, TaskSpec};

#[tokio::test]
async fn global_app_lifecycle() {
    // Nothing works before init.
    assert!(matches!(eventloop::app(), Err(EventLoopError::NotInitialized)));
    assert!(matches!(
        eventloop::make_timer_task(Duration::from_millis(1), |_| {}),
        Err(EventLoopError::NotInitialized)
    ));
    assert!(matches!(
        eventloop::exec_app().await,
        Err(EventLoopError::NotInitialized)
    ));

    // Invalid config leaves the slot empty.
    assert!(matches!(
        eventloop::init_app(AppConfig::new(0, 1)),
        Err(EventLoopError::ZeroCapacity)
    ));
    assert!(eventloop::app().is_err());

    // First init wins, later ones are ignored.
    let created = eventloop::new_app(AppConfig::new(8, 2)).unwrap();
    assert!(created.is_some());
    assert!(eventloop::new_app(AppConfig::new(16, 1)).unwrap().is_none());
    eventloop::init_app(AppConfig::new(32, 1)).unwrap();
    assert_eq!(eventloop::app().unwrap().config().queue_capacity, 8);

    let log = Arc::new(Mutex::new(Vec::new()));
    let l = log.clone();
    let timer = eventloop::make_one_time_task(Duration::from_millis(5), move |_| {
        l.lock().unwrap().push("timer");
        let l = l.clone();
        eventloop::make_task(TaskSpec::single_result(
            || 21 * 2,
            move |v| {
                l.lock().unwrap().push(if v == 42 { "task" } else { "wrong" });
                eventloop::app().unwrap().shutdown_token().cancel();
            },
        ))
        .unwrap();
    })
    .unwrap();

    tokio::time::timeout(Duration::from_secs(5), eventloop::exec_app())
        .await
        .expect("app did not stop")
        .unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["timer", "task"]);
    assert!(!eventloop::remove_timer_task(&timer).unwrap());
    assert!(matches!(
        eventloop::exec_app().await,
        Err(EventLoopError::AlreadyRunning)
    ));
}
