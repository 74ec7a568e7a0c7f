mod test_utils;

use log::*;
use std::time::Duration;
use test_utils::{int_table, Action, MockNode};
use voltconnect::{Client, VoltError};

fn node_script(invocation: &test_utils::Invocation) -> Action {
    match invocation.procedure.as_str() {
        "Select" => Action::Reply(vec![int_table("n", &[7])]),
        "Slow" => Action::Silent,
        "Late" => Action::ReplyAfter(Duration::from_millis(500), vec![int_table("n", &[8])]),
        other => panic!("unexpected procedure {other}"),
    }
}

#[tokio::test]
async fn test_020_timeout_backpressure() {
    let _log_handle = test_utils::init_logger();

    timeout_leaves_the_connection_healthy().await;
    late_response_is_dropped().await;
    backpressure_fail_fast().await;
    blocked_admission_times_out().await;
    cancelled_call_is_reaped().await;
}

async fn timeout_leaves_the_connection_healthy() {
    info!("a timed-out call resolves locally; the node stays in rotation");
    let node = MockNode::spawn(0, node_script).await;
    let client = test_utils::connect(&[&node]).await;

    let started = std::time::Instant::now();
    let mut handle = client
        .begin("Slow", &[], Some(Duration::from_millis(150)))
        .unwrap();
    assert!(matches!(handle.end().await, Err(VoltError::Timeout)));
    let elapsed = started.elapsed();
    // the sweep runs every 100ms, so the deadline fires within one tick
    assert!(elapsed >= Duration::from_millis(140), "too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "too late: {elapsed:?}");

    // a server that is slow is not a server that is gone
    let response = client.call("Select", &[]).await.unwrap();
    assert!(response.status().is_success());
    assert_eq!(node.connection_count(), 1);
    client.close().await;
}

async fn late_response_is_dropped() {
    info!("a response arriving after the deadline is silently discarded");
    let node = MockNode::spawn(0, node_script).await;
    let client = test_utils::connect(&[&node]).await;

    let mut handle = client
        .begin("Late", &[], Some(Duration::from_millis(100)))
        .unwrap();
    assert!(matches!(handle.end().await, Err(VoltError::Timeout)));

    // let the stale response arrive; it must not disturb the connection
    tokio::time::sleep(Duration::from_millis(600)).await;
    let response = client.call("Select", &[]).await.unwrap();
    assert!(response.status().is_success());
    assert_eq!(node.connection_count(), 1);
    client.close().await;
}

async fn backpressure_fail_fast() {
    info!("fail-fast admission beyond the inflight ceiling");
    let node = MockNode::spawn(0, node_script).await;
    let config = test_utils::test_configuration().with_max_inflight_per_node(2);
    let client = Client::open_with_configuration(test_utils::params_for(&[&node]), config)
        .await
        .unwrap();

    let timeout = Some(Duration::from_millis(400));
    let mut first = client.begin_fail_fast("Slow", &[], timeout).await.unwrap();
    let mut second = client.begin_fail_fast("Slow", &[], timeout).await.unwrap();
    match client.begin_fail_fast("Slow", &[], timeout).await {
        Err(VoltError::Backpressure) => {}
        other => panic!("unexpected: {other:?}"),
    }

    // the two admitted calls still run into their own deadlines
    assert!(matches!(first.end().await, Err(VoltError::Timeout)));
    assert!(matches!(second.end().await, Err(VoltError::Timeout)));

    // their slots are free again
    let mut third = client.begin_fail_fast("Select", &[], timeout).await.unwrap();
    assert!(third.end().await.unwrap().status().is_success());
    client.close().await;
}

async fn blocked_admission_times_out() {
    info!("blocking admission respects the deadline and never enqueues");
    let node = MockNode::spawn(0, node_script).await;
    let config = test_utils::test_configuration().with_max_inflight_per_node(1);
    let client = Client::open_with_configuration(test_utils::params_for(&[&node]), config)
        .await
        .unwrap();

    let mut occupant = client
        .begin("Slow", &[], Some(Duration::from_millis(400)))
        .unwrap();
    // give the occupant a moment to claim the only slot
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    let mut blocked = client
        .begin("Select", &[], Some(Duration::from_millis(150)))
        .unwrap();
    assert!(matches!(blocked.end().await, Err(VoltError::Timeout)));
    assert!(started.elapsed() < Duration::from_millis(350));

    assert!(matches!(occupant.end().await, Err(VoltError::Timeout)));
    // with the slot released, calls flow again
    assert!(client.call("Select", &[]).await.is_ok());
    client.close().await;
}

async fn cancelled_call_is_reaped() {
    info!("cancel drops the response and leaves the connection healthy");
    let node = MockNode::spawn(0, node_script).await;
    let client = test_utils::connect(&[&node]).await;

    let handle = client
        .begin("Late", &[], Some(Duration::from_millis(800)))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();

    // response at 500ms is dropped, the entry is reaped at its deadline
    tokio::time::sleep(Duration::from_millis(900)).await;
    let response = client.call("Select", &[]).await.unwrap();
    assert!(response.status().is_success());
    assert_eq!(node.connection_count(), 1);
    client.close().await;
}
