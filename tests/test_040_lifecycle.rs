mod test_utils;

use log::*;
use std::time::Duration;
use test_utils::{int_table, Action, MockNode};
use voltconnect::{Client, ColumnInfo, TypeTag, VoltError, VoltTable, VoltValue};

#[tokio::test]
async fn test_040_lifecycle() {
    let _log_handle = test_utils::init_logger();

    topology_discovery().await;
    graceful_close_drains().await;
    forced_close_fails_pending().await;
}

// The OVERVIEW metadata table a node reports for a peer.
fn overview_table(host_id: i32, addr: &str) -> VoltTable {
    let (ip, port) = addr.split_once(':').unwrap();
    VoltTable::new(
        vec![
            ColumnInfo::new("HOST_ID", TypeTag::INTEGER),
            ColumnInfo::new("KEY", TypeTag::STRING),
            ColumnInfo::new("VALUE", TypeTag::STRING),
        ],
        vec![
            vec![
                VoltValue::Integer(host_id),
                VoltValue::from("IPADDRESS"),
                VoltValue::from(ip),
            ],
            vec![
                VoltValue::Integer(host_id),
                VoltValue::from("CLIENTPORT"),
                VoltValue::from(port),
            ],
        ],
    )
    .unwrap()
}

async fn topology_discovery() {
    info!("the client learns the second node from the first one");
    let node_b = MockNode::spawn(1, |invocation| match invocation.procedure.as_str() {
        "Select" => Action::Reply(vec![int_table("n", &[2])]),
        other => panic!("unexpected procedure {other}"),
    })
    .await;
    let peer_table = overview_table(node_b.host_id(), node_b.addr());
    let node_a = MockNode::spawn(0, move |invocation| match invocation.procedure.as_str() {
        "@SystemInformation" => Action::Reply(vec![peer_table.clone()]),
        "Select" => Action::Reply(vec![int_table("n", &[1])]),
        other => panic!("unexpected procedure {other}"),
    })
    .await;

    // only node A is seeded; discovery is on
    let config = test_utils::test_configuration().with_auto_topology(true);
    let client = Client::open_with_configuration(test_utils::params_for(&[&node_a]), config)
        .await
        .unwrap();
    test_utils::wait_for_ready_nodes(&client, 2).await;

    let response = client
        .call_at(node_b.host_id(), "Select", &[])
        .await
        .unwrap();
    assert_eq!(
        response.tables()[0].value(0, 0),
        Some(&VoltValue::Integer(2))
    );

    let mut host_ids: Vec<i32> = client
        .server_identities()
        .iter()
        .map(voltconnect::ServerIdentity::host_id)
        .collect();
    host_ids.sort_unstable();
    assert_eq!(host_ids, vec![0, 1]);
    client.close().await;
}

async fn graceful_close_drains() {
    info!("graceful close lets the pending call finish");
    let node = MockNode::spawn(0, |invocation| match invocation.procedure.as_str() {
        "Slowish" => Action::ReplyAfter(Duration::from_millis(300), vec![int_table("n", &[9])]),
        other => panic!("unexpected procedure {other}"),
    })
    .await;
    let client = test_utils::connect(&[&node]).await;

    let mut handle = client.begin("Slowish", &[], None).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close().await;

    // the call was drained, not cut off
    let response = handle.end().await.unwrap();
    assert_eq!(
        response.tables()[0].value(0, 0),
        Some(&VoltValue::Integer(9))
    );
    assert!(!client.is_open());

    // the closed client admits nothing
    let mut rejected = client.begin("Slowish", &[], None).unwrap();
    assert!(matches!(rejected.end().await, Err(VoltError::ShutDown)));
}

async fn forced_close_fails_pending() {
    info!("forced close fails everything outstanding");
    let node = MockNode::spawn(0, |invocation| match invocation.procedure.as_str() {
        "Slow" => Action::Silent,
        other => panic!("unexpected procedure {other}"),
    })
    .await;
    let client = test_utils::connect(&[&node]).await;

    let mut handle = client.begin("Slow", &[], None).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close_forced().await;
    assert!(matches!(handle.end().await, Err(VoltError::ShutDown)));
    assert!(!client.is_open());
}
