// advisable because not all test modules use all functions of this module:
#![allow(dead_code)]

use byteorder::{BigEndian, WriteBytesExt};
use flexi_logger::{Logger, LoggerHandle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use voltconnect::{
    Client, ClientConfiguration, ColumnInfo, ConnectParams, TypeTag, VoltTable, VoltValue,
};

// Returns a logger that prints out all info, warn and error messages.
pub fn init_logger() -> LoggerHandle {
    Logger::try_with_env_or_str("info")
        .unwrap()
        .start()
        .unwrap_or_else(|e| panic!("Logger initialization failed with {e}"))
}

/// What the scripted server does with one received invocation.
pub enum Action {
    /// Answer with a success envelope carrying these tables.
    Reply(Vec<VoltTable>),
    /// Answer with the given status and error text, no tables.
    Fail(i8, String),
    /// Answer like `Reply`, but only after the delay.
    ReplyAfter(Duration, Vec<VoltTable>),
    /// Never answer.
    Silent,
    /// Close the connection.
    Hangup,
    /// Write these raw bytes instead of a well-formed frame.
    Raw(Vec<u8>),
}

/// One received invocation, as the scripted server saw it.
pub struct Invocation {
    pub procedure: String,
    pub handle: i64,
    /// 1-based position of this invocation on its connection.
    pub seq_on_conn: usize,
}

type Script = Arc<dyn Fn(&Invocation) -> Action + Send + Sync>;

/// A scripted server node: performs the login handshake, answers pings,
/// and runs the given script for every other invocation.
pub struct MockNode {
    addr: String,
    host_id: i32,
    connections: Arc<AtomicUsize>,
}

impl MockNode {
    pub async fn spawn<F>(host_id: i32, script: F) -> Self
    where
        F: Fn(&Invocation) -> Action + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let connections = Arc::new(AtomicUsize::new(0));
        let script: Script = Arc::new(script);
        {
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve_connection(stream, host_id, Arc::clone(&script)));
                }
            });
        }
        Self {
            addr,
            host_id,
            connections,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn host_id(&self) -> i32 {
        self.host_id
    }

    /// How many connections were accepted so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve_connection(mut stream: TcpStream, host_id: i32, script: Script) {
    // login: swallow the request frame, send a success response
    let Ok(_login) = read_frame(&mut stream).await else {
        return;
    };
    let login_response = login_response_payload(host_id, 0);
    if stream.write_all(&frame(&login_response)).await.is_err() {
        return;
    }

    let mut seq = 0_usize;
    loop {
        let Ok(payload) = read_frame(&mut stream).await else {
            return;
        };
        let invocation = match parse_invocation(&payload, &mut seq) {
            Some(invocation) => invocation,
            None => return,
        };
        let action = if invocation.procedure == "@Ping" {
            Action::Reply(vec![])
        } else {
            script(&invocation)
        };
        match action {
            Action::Reply(tables) => {
                let payload = response_payload(invocation.handle, 1, None, &tables);
                if stream.write_all(&frame(&payload)).await.is_err() {
                    return;
                }
            }
            Action::Fail(status, text) => {
                let payload = response_payload(invocation.handle, status, Some(&text), &[]);
                if stream.write_all(&frame(&payload)).await.is_err() {
                    return;
                }
            }
            Action::ReplyAfter(delay, tables) => {
                tokio::time::sleep(delay).await;
                let payload = response_payload(invocation.handle, 1, None, &tables);
                if stream.write_all(&frame(&payload)).await.is_err() {
                    return;
                }
            }
            Action::Silent => {}
            Action::Hangup => return,
            Action::Raw(bytes) => {
                let _ = stream.write_all(&bytes).await;
                return;
            }
        }
    }
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut len_bytes = [0_u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = i32::from_be_bytes(len_bytes);
    assert!(len > 0, "client sent a non-positive frame length");
    let mut payload = vec![0_u8; len as usize];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

fn parse_invocation(payload: &[u8], seq: &mut usize) -> Option<Invocation> {
    assert_eq!(payload[0], 0, "invocation version");
    let name_len = i32::from_be_bytes(payload[1..5].try_into().unwrap()) as usize;
    let procedure = String::from_utf8(payload[5..5 + name_len].to_vec()).unwrap();
    let handle = i64::from_be_bytes(payload[5 + name_len..13 + name_len].try_into().unwrap());
    *seq += 1;
    Some(Invocation {
        procedure,
        handle,
        seq_on_conn: *seq,
    })
}

pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + payload.len());
    WriteBytesExt::write_i32::<BigEndian>(&mut buf, payload.len() as i32).unwrap();
    buf.extend_from_slice(payload);
    buf
}

pub fn login_response_payload(host_id: i32, status: i8) -> Vec<u8> {
    let mut buf: Vec<u8> = Vec::new();
    WriteBytesExt::write_u8(&mut buf, 1).unwrap(); // server version
    WriteBytesExt::write_i8(&mut buf, status).unwrap();
    WriteBytesExt::write_i32::<BigEndian>(&mut buf, host_id).unwrap();
    WriteBytesExt::write_i64::<BigEndian>(&mut buf, 1000 + i64::from(host_id)).unwrap(); // connection id
    WriteBytesExt::write_i64::<BigEndian>(&mut buf, 1_700_000_000_000).unwrap(); // cluster start
    buf.extend_from_slice(&[127, 0, 0, 1]); // leader
    let build = b"mock-13.3";
    WriteBytesExt::write_i32::<BigEndian>(&mut buf, build.len() as i32).unwrap();
    buf.extend_from_slice(build);
    buf
}

pub fn response_payload(
    handle: i64,
    status: i8,
    status_text: Option<&str>,
    tables: &[VoltTable],
) -> Vec<u8> {
    let mut buf: Vec<u8> = Vec::new();
    WriteBytesExt::write_u8(&mut buf, 0).unwrap(); // version echo
    WriteBytesExt::write_i64::<BigEndian>(&mut buf, handle).unwrap();
    WriteBytesExt::write_u8(&mut buf, if status_text.is_some() { 0b0010_0000 } else { 0 })
        .unwrap();
    WriteBytesExt::write_i8(&mut buf, status).unwrap();
    if let Some(text) = status_text {
        WriteBytesExt::write_i32::<BigEndian>(&mut buf, text.len() as i32).unwrap();
        buf.extend_from_slice(text.as_bytes());
    }
    WriteBytesExt::write_i8(&mut buf, 0).unwrap(); // app status
    WriteBytesExt::write_i32::<BigEndian>(&mut buf, 3).unwrap(); // cluster round trip
    WriteBytesExt::write_i16::<BigEndian>(&mut buf, tables.len() as i16).unwrap();
    for table in tables {
        table.emit(&mut buf).unwrap();
    }
    buf
}

/// A single-column int table, as many scenarios need one.
pub fn int_table(column: &str, values: &[i32]) -> VoltTable {
    VoltTable::new(
        vec![ColumnInfo::new(column, TypeTag::INTEGER)],
        values
            .iter()
            .map(|value| vec![VoltValue::Integer(*value)])
            .collect(),
    )
    .unwrap()
}

pub fn params_for(nodes: &[&MockNode]) -> ConnectParams {
    let mut builder = ConnectParams::builder();
    for node in nodes {
        builder.host(node.addr());
    }
    builder.username("tester").password("sekrit").build().unwrap()
}

/// Test configuration: no topology discovery, snappy timeouts.
pub fn test_configuration() -> ClientConfiguration {
    ClientConfiguration::default()
        .with_auto_topology(false)
        .with_default_timeout(Some(Duration::from_secs(5)))
        .with_reconnect_backoff_ceiling(Duration::from_secs(1))
}

pub async fn connect(nodes: &[&MockNode]) -> Client {
    Client::open_with_configuration(params_for(nodes), test_configuration())
        .await
        .unwrap()
}

/// Polls until the client reports `count` ready nodes, up to ~5s.
pub async fn wait_for_ready_nodes(client: &Client, count: usize) {
    for _ in 0..250 {
        if client.ready_node_count() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "client did not reach {count} ready node(s), has {}",
        client.ready_node_count()
    );
}
