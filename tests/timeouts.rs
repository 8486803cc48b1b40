//! Total and Activity timeout tests.

use std::time::Duration;

use http_lifecycle::backend::scripted::Script;
use http_lifecycle::{DispatchError, FailureReason, RequestStatus};

mod common;

use common::{completions, record_completions, scripted_manager, scripted_manager_with, test_config};

const WAIT: Duration = Duration::from_secs(5);

/// A script that keeps trickling bytes for about `steps * every`.
fn trickle(steps: usize, every: Duration) -> Script {
    let mut script = Script::new().status(200);
    for _ in 0..steps {
        script = script.wait(every).data("x");
    }
    script.complete()
}

#[test]
fn test_activity_timeout_on_stalled_transfer() {
    let (manager, factory) = scripted_manager(Script::new().status(200).stall());
    let request = manager.create_request();
    request.set_url("https://example.com/stall");
    request.set_activity_timeout(Duration::from_millis(100));
    let log = record_completions(&request);

    assert!(request.process_request());
    assert!(common::wait_for_completions(&manager, &log, 1, WAIT));

    let done = completions(&log);
    assert_eq!(done.len(), 1);
    assert!(!done[0].succeeded);
    assert_eq!(done[0].reason, FailureReason::ConnectionError);
    assert_eq!(done[0].response_code, None);
    assert!(!request.is_timed_out());
    assert!(request.elapsed() >= Duration::from_millis(100));
    assert_eq!(factory.calls().aborts(), 1);
}

#[test]
fn test_activity_deadline_moves_with_first_byte() {
    // First byte at 100ms pushes the 200ms window out to about 300ms.
    let script = Script::new()
        .wait(Duration::from_millis(100))
        .status(200)
        .data("a")
        .stall();
    let (manager, _factory) = scripted_manager(script);
    let request = manager.create_request();
    request.set_url("https://example.com/");
    request.set_activity_timeout(Duration::from_millis(200));
    let log = record_completions(&request);

    assert!(request.process_request());
    assert!(common::wait_for_completions(&manager, &log, 1, WAIT));

    assert_eq!(completions(&log)[0].reason, FailureReason::ConnectionError);
    let elapsed = request.elapsed();
    assert!(elapsed >= Duration::from_millis(280), "fired early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "fired late: {:?}", elapsed);
}

#[test]
fn test_trickling_transfer_stays_alive() {
    let (manager, _factory) = scripted_manager(trickle(8, Duration::from_millis(50)));
    let request = manager.create_request();
    request.set_url("https://example.com/trickle");
    request.set_activity_timeout(Duration::from_millis(250));
    let log = record_completions(&request);

    assert!(request.process_request());
    assert!(common::wait_for_completions(&manager, &log, 1, WAIT));

    let done = completions(&log);
    assert!(done[0].succeeded);
    assert_eq!(done[0].body.as_deref(), Some("xxxxxxxx"));
    assert!(request.elapsed() >= Duration::from_millis(250));
}

#[test]
fn test_total_timeout() {
    let (manager, factory) = scripted_manager(trickle(100, Duration::from_millis(20)));
    let request = manager.create_request();
    request.set_url("https://example.com/long");
    request.set_timeout(Duration::from_millis(150));
    request.set_activity_timeout(Duration::ZERO);
    let log = record_completions(&request);

    assert!(request.process_request());
    assert!(common::wait_for_completions(&manager, &log, 1, WAIT));

    let done = completions(&log);
    assert_eq!(done[0].reason, FailureReason::TimedOut);
    assert_eq!(done[0].response_code, Some(200), "partial response survives");
    assert!(request.is_timed_out());
    assert_eq!(factory.calls().aborts(), 1);
}

#[test]
fn test_timed_out_request_needs_timeout_reset() {
    let (manager, _factory) = scripted_manager(Script::new().stall());
    let request = manager.create_request();
    request.set_url("https://example.com/");
    request.set_timeout(Duration::from_millis(50));
    let log = record_completions(&request);

    assert!(request.process_request());
    assert!(common::wait_for_completions(&manager, &log, 1, WAIT));
    assert!(request.is_timed_out());

    assert_eq!(request.try_process_request(), Err(DispatchError::TimedOut));
    assert!(request.reset());
    assert_eq!(request.try_process_request(), Err(DispatchError::TimedOut));

    request.reset_timeout_status();
    assert!(!request.is_timed_out());
    assert!(request.process_request());
    assert!(common::wait_for_completions(&manager, &log, 2, WAIT));
    assert_eq!(completions(&log)[1].reason, FailureReason::TimedOut);
}

#[test]
fn test_total_timeout_fires_before_longer_activity_window() {
    let (manager, factory) = scripted_manager(Script::new().stall());
    let request = manager.create_request();
    request.set_url("https://example.com/");
    request.set_timeout(Duration::from_millis(100));
    request.set_activity_timeout(Duration::from_millis(400));
    let log = record_completions(&request);

    assert!(request.process_request());
    assert!(common::wait_for_completions(&manager, &log, 1, WAIT));

    assert_eq!(completions(&log)[0].reason, FailureReason::TimedOut);
    assert_eq!(factory.calls().aborts(), 1);

    // The disarmed activity timer never produces a second outcome.
    std::thread::sleep(Duration::from_millis(450));
    manager.tick();
    assert_eq!(completions(&log).len(), 1);
    assert_eq!(factory.calls().aborts(), 1);
}

#[test]
fn test_native_activity_timeout_disables_core_timer() {
    let script = Script::new()
        .status(200)
        .wait(Duration::from_millis(300))
        .data("late")
        .complete()
        .native_activity_timeout();
    let (manager, factory) = scripted_manager(script);
    let request = manager.create_request();
    request.set_url("https://example.com/");
    request.set_activity_timeout(Duration::from_millis(100));
    let log = record_completions(&request);

    assert!(request.process_request());
    assert!(common::wait_for_completions(&manager, &log, 1, WAIT));

    let done = completions(&log);
    assert!(done[0].succeeded);
    assert_eq!(done[0].body.as_deref(), Some("late"));
    assert_eq!(factory.calls().aborts(), 0);
}

#[test]
fn test_activity_timeout_from_config() {
    let mut config = test_config();
    config.timeouts.activity_secs = 0.1;
    let (manager, _factory) = scripted_manager_with(config, Script::new().stall());

    let request = manager.create_request();
    request.set_url("https://example.com/");
    assert_eq!(request.activity_timeout(), None);
    let log = record_completions(&request);

    assert!(request.process_request());
    assert!(common::wait_for_completions(&manager, &log, 1, WAIT));
    assert_eq!(completions(&log)[0].reason, FailureReason::ConnectionError);
}

#[test]
fn test_zero_override_disables_config_timeout() {
    let mut config = test_config();
    config.timeouts.activity_secs = 0.05;
    let script = Script::new()
        .wait(Duration::from_millis(200))
        .status(200)
        .complete();
    let (manager, _factory) = scripted_manager_with(config, script);

    let request = manager.create_request();
    request.set_url("https://example.com/");
    request.set_activity_timeout(Duration::ZERO);

    assert!(request.process_request_until_complete());
    assert_eq!(request.status(), RequestStatus::Succeeded);
}

#[test]
fn test_timeouts_disarmed_after_completion() {
    let (manager, factory) = scripted_manager(Script::respond(200, "quick"));
    let request = manager.create_request();
    request.set_url("https://example.com/");
    request.set_timeout(Duration::from_millis(80));
    request.set_activity_timeout(Duration::from_millis(80));
    let log = record_completions(&request);

    assert!(request.process_request());
    assert!(common::wait_for_completions(&manager, &log, 1, WAIT));

    std::thread::sleep(Duration::from_millis(200));
    manager.tick();
    assert_eq!(completions(&log).len(), 1);
    assert_eq!(request.status(), RequestStatus::Succeeded);
    assert!(!request.is_timed_out());
    assert_eq!(factory.calls().aborts(), 0);
}
