//! Robustness tests for the daemon sockets.
//!
//! These tests verify the server handles edge cases gracefully:
//! - Malformed packets (unknown kinds, truncated payloads, oversized headers)
//! - Rapid connect/disconnect cycles
//! - Many concurrent sessions
//! - Error replies (including out-of-range fields) that must not end the connection
//! - Event channel framing over a byte stream
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use sensor_core::{ClientId, Permission, SensorType, Situation};
use sensor_protocol::{
    status, EventChannelHello, Packet, PacketCodec, PacketHeader, PacketKind, Reply, Request,
    EVENT_CHANNEL_MAGIC, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
use sensord::context::spawn_dispatcher;
use sensord::dispatcher::ingest_channel;
use sensord::module::{SensorCatalog, SensorModule, SimulatedSensor, Waveform};
use sensord::permission::FixedPermission;
use sensord::server::SensorServer;
use sensord::situation::SituationSource;
use sensord::DaemonContext;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for server sockets to appear
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between socket existence checks
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound on any single reply, and on noticing a closed connection
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Test Helpers
// ============================================================================

struct TestServer {
    command_path: PathBuf,
    event_path: PathBuf,
    ctx: Arc<DaemonContext>,
    cancel_token: CancellationToken,
    _situation: SituationSource,
    _temp_dir: TempDir,
}

impl TestServer {
    async fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let command_path = temp_dir.path().join("sensord.sock");
        let event_path = temp_dir.path().join("sensord_event.sock");

        let (ingest, ingest_rx) = ingest_channel(64);
        let mut catalog = SensorCatalog::new();
        let accel = Waveform::default_info(SensorType::Accelerometer, "accel");
        catalog.insert(Arc::new(SimulatedSensor::new(accel, Waveform::Tilt, ingest)));

        let situation = SituationSource::new(Situation::ScreenOn);
        let ctx = Arc::new(DaemonContext::new(
            catalog,
            Box::new(FixedPermission(Permission::ALL)),
            situation.subscribe(),
        ));

        let cancel_token = CancellationToken::new();
        spawn_dispatcher(Arc::clone(&ctx), ingest_rx, cancel_token.clone());
        let server = SensorServer::new(
            command_path.clone(),
            event_path.clone(),
            Arc::clone(&ctx),
            cancel_token.clone(),
        );
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT {
            if command_path.exists() && event_path.exists() {
                break;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }
        assert!(
            command_path.exists() && event_path.exists(),
            "Server sockets did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        Self {
            command_path,
            event_path,
            ctx,
            cancel_token,
            _situation: situation,
            _temp_dir: temp_dir,
        }
    }

    async fn raw(&self) -> UnixStream {
        UnixStream::connect(&self.command_path)
            .await
            .expect("connect to command socket")
    }

    async fn framed(&self) -> Framed<UnixStream, PacketCodec> {
        Framed::new(self.raw().await, PacketCodec::new())
    }

    async fn wait_until_idle(&self) {
        let start = tokio::time::Instant::now();
        while self.ctx.registry.client_count() > 0 {
            assert!(start.elapsed() < REPLY_TIMEOUT, "daemon still holds clients");
            sleep(SOCKET_POLL_INTERVAL).await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

fn header(cmd: i32, size: u32) -> [u8; 8] {
    PacketHeader { cmd, size }.to_bytes()
}

async fn request(framed: &mut Framed<UnixStream, PacketCodec>, request: Request) -> Reply {
    framed.send(request.encode()).await.unwrap();
    let packet = timeout(REPLY_TIMEOUT, framed.next())
        .await
        .expect("reply within timeout")
        .expect("connection open")
        .unwrap();
    Reply::decode(&packet).unwrap()
}

async fn get_id(framed: &mut Framed<UnixStream, PacketCodec>) -> ClientId {
    match request(
        framed,
        Request::GetId {
            pid: 4242,
            name: "robustness".to_string(),
        },
    )
    .await
    {
        Reply::GetIdDone { client_id } => client_id,
        other => panic!("unexpected reply {other:?}"),
    }
}

/// Asserts the daemon closes `stream` without replying.
async fn assert_closed(mut stream: UnixStream) {
    let mut buf = [0u8; 64];
    let read = timeout(REPLY_TIMEOUT, stream.read(&mut buf))
        .await
        .expect("server should close the connection");
    match read {
        Ok(0) | Err(_) => {}
        Ok(n) => panic!("expected close, got {n} bytes"),
    }
}

/// Asserts the server still answers a fresh connection.
async fn assert_serving(server: &TestServer) {
    let mut framed = server.framed().await;
    match request(&mut framed, Request::GetSensorList).await {
        Reply::GetSensorListDone { sensors } => assert_eq!(sensors.len(), 1),
        other => panic!("unexpected reply {other:?}"),
    }
}

// ============================================================================
// Malformed Packets
// ============================================================================

#[tokio::test]
async fn test_unknown_packet_kind_closes_connection() {
    let server = TestServer::spawn().await;

    let mut stream = server.raw().await;
    stream.write_all(&header(0x7777, 0)).await.unwrap();
    assert_closed(stream).await;

    assert_serving(&server).await;
}

#[tokio::test]
async fn test_oversized_payload_rejected() {
    let server = TestServer::spawn().await;

    let mut stream = server.raw().await;
    let size = u32::try_from(MAX_PAYLOAD_SIZE + 1).unwrap();
    stream
        .write_all(&header(PacketKind::SetAttributeStr.as_i32(), size))
        .await
        .unwrap();
    assert_closed(stream).await;

    assert_serving(&server).await;
}

#[tokio::test]
async fn test_truncated_payload_closes_connection() {
    let server = TestServer::spawn().await;

    let mut framed = server.framed().await;
    get_id(&mut framed).await;
    // HELLO needs two i32 fields.
    framed
        .send(Packet::new(PacketKind::Hello, vec![1u8, 0, 0]))
        .await
        .unwrap();
    assert_closed(framed.into_inner()).await;

    // The id issued on that connection does not outlive it.
    server.wait_until_idle().await;
    assert_serving(&server).await;
}

#[tokio::test]
async fn test_reply_kind_from_client_closes_connection() {
    let server = TestServer::spawn().await;

    let mut framed = server.framed().await;
    framed.send(Reply::ok().encode()).await.unwrap();
    assert_closed(framed.into_inner()).await;

    assert_serving(&server).await;
}

#[tokio::test]
async fn test_garbage_bytes_close_connection() {
    let server = TestServer::spawn().await;

    let mut stream = server.raw().await;
    stream.write_all(b"this is not a packet header").await.unwrap();
    assert_closed(stream).await;

    assert_serving(&server).await;
}

#[tokio::test]
async fn test_packet_split_across_writes() {
    let server = TestServer::spawn().await;

    let mut stream = server.raw().await;
    let bytes = header(PacketKind::GetSensorList.as_i32(), 0);
    stream.write_all(&bytes[..3]).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    stream.write_all(&bytes[3..]).await.unwrap();

    let mut framed = Framed::new(stream, PacketCodec::new());
    let packet = timeout(REPLY_TIMEOUT, framed.next())
        .await
        .expect("reply within timeout")
        .expect("connection open")
        .unwrap();
    assert_eq!(packet.kind, PacketKind::GetSensorListDone);
}

// ============================================================================
// Error Replies Keep The Connection
// ============================================================================

#[tokio::test]
async fn test_error_replies_do_not_break_connection() {
    let server = TestServer::spawn().await;
    let mut framed = server.framed().await;

    // No sensor bound yet.
    assert_eq!(
        request(&mut framed, Request::Start).await.status_value(),
        status::INVALID_ARGUMENT
    );
    // Nobody was issued this id.
    let stranger = request(
        &mut framed,
        Request::Hello {
            client_id: ClientId::new(9999),
            sensor: SensorType::Accelerometer,
        },
    )
    .await;
    assert_eq!(stranger.status_value(), status::INVALID_ARGUMENT);
    // Not served by this daemon.
    let client_id = get_id(&mut framed).await;
    let missing = request(
        &mut framed,
        Request::Hello {
            client_id,
            sensor: SensorType::Pressure,
        },
    )
    .await;
    assert_eq!(missing.status_value(), status::NO_DEVICE);

    let hello = request(
        &mut framed,
        Request::Hello {
            client_id,
            sensor: SensorType::Accelerometer,
        },
    )
    .await;
    assert_eq!(hello.status_value(), status::OK);
    assert_eq!(request(&mut framed, Request::ByeBye).await.status_value(), status::OK);

    server.wait_until_idle().await;
}

#[tokio::test]
async fn test_out_of_range_fields_keep_subscription() {
    let server = TestServer::spawn().await;
    let mut framed = server.framed().await;
    let client_id = get_id(&mut framed).await;

    // HELLO naming a sensor id that does not exist.
    let mut bogus_hello = client_id.as_i32().to_ne_bytes().to_vec();
    bogus_hello.extend_from_slice(&999i32.to_ne_bytes());
    framed
        .send(Packet::new(PacketKind::Hello, bogus_hello))
        .await
        .unwrap();
    let reply = timeout(REPLY_TIMEOUT, framed.next())
        .await
        .expect("reply within timeout")
        .expect("connection open")
        .unwrap();
    assert_eq!(
        Reply::decode(&reply).unwrap().status_value(),
        status::INVALID_ARGUMENT
    );

    let hello = request(
        &mut framed,
        Request::Hello {
            client_id,
            sensor: SensorType::Accelerometer,
        },
    )
    .await;
    assert_eq!(hello.status_value(), status::OK);
    assert_eq!(request(&mut framed, Request::Start).await.status_value(), status::OK);
    let accel = server.ctx.catalog.get(SensorType::Accelerometer).unwrap();
    assert!(accel.is_started());

    // SET_OPTION with a value outside the known options.
    framed
        .send(Packet::new(PacketKind::SetOption, 7i32.to_ne_bytes().to_vec()))
        .await
        .unwrap();
    let reply = timeout(REPLY_TIMEOUT, framed.next())
        .await
        .expect("reply within timeout")
        .expect("connection open")
        .unwrap();
    assert_eq!(
        Reply::decode(&reply).unwrap().status_value(),
        status::INVALID_ARGUMENT
    );

    // The live subscription is untouched and the connection still serves.
    assert!(accel.is_started());
    assert!(server.ctx.registry.contains_client(client_id));
    assert_eq!(request(&mut framed, Request::ByeBye).await.status_value(), status::OK);
    server.wait_until_idle().await;
    assert!(!accel.is_started());
}

// ============================================================================
// Connection Churn
// ============================================================================

#[tokio::test]
async fn test_rapid_connect_disconnect() {
    let server = TestServer::spawn().await;

    for _ in 0..50 {
        let stream = server.raw().await;
        drop(stream);
    }
    for _ in 0..20 {
        let mut framed = server.framed().await;
        get_id(&mut framed).await;
    }

    server.wait_until_idle().await;
    assert_serving(&server).await;
}

#[tokio::test]
async fn test_many_concurrent_sessions() {
    let server = Arc::new(TestServer::spawn().await);

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let server = Arc::clone(&server);
        tasks.push(tokio::spawn(async move {
            let mut framed = server.framed().await;
            let client_id = get_id(&mut framed).await;
            let hello = request(
                &mut framed,
                Request::Hello {
                    client_id,
                    sensor: SensorType::Accelerometer,
                },
            )
            .await;
            assert_eq!(hello.status_value(), status::OK);
            assert_eq!(request(&mut framed, Request::Start).await.status_value(), status::OK);
            assert_eq!(request(&mut framed, Request::ByeBye).await.status_value(), status::OK);
            client_id
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 16, "client ids must be unique");

    server.wait_until_idle().await;
    let accel = server.ctx.catalog.get(SensorType::Accelerometer).unwrap();
    assert!(!accel.is_started());
}

// ============================================================================
// Event Channel
// ============================================================================

#[tokio::test]
async fn test_event_channel_rejects_bad_handshake() {
    let server = TestServer::spawn().await;

    // Wrong packet kind.
    let stream = UnixStream::connect(&server.event_path).await.unwrap();
    let mut framed = Framed::new(stream, PacketCodec::new());
    framed
        .send(Request::GetSensorList.encode())
        .await
        .unwrap();
    assert_closed(framed.into_inner()).await;

    // Unknown client.
    let stream = UnixStream::connect(&server.event_path).await.unwrap();
    let mut framed = Framed::new(stream, PacketCodec::new());
    framed
        .send(
            EventChannelHello {
                client_id: ClientId::new(31337),
            }
            .encode(),
        )
        .await
        .unwrap();
    assert_closed(framed.into_inner()).await;

    assert_serving(&server).await;
}

#[tokio::test]
async fn test_event_channel_is_a_framed_byte_stream() {
    let server = TestServer::spawn().await;
    let mut command = server.framed().await;
    let client_id = get_id(&mut command).await;

    // Header and payload in separate writes: the daemon reassembles by length.
    let mut stream = UnixStream::connect(&server.event_path).await.unwrap();
    stream
        .write_all(&header(PacketKind::EventChannelHello.as_i32(), 4))
        .await
        .unwrap();
    sleep(SOCKET_POLL_INTERVAL).await;
    stream
        .write_all(&client_id.as_i32().to_ne_bytes())
        .await
        .unwrap();

    let mut raw_header = [0u8; HEADER_SIZE];
    timeout(REPLY_TIMEOUT, stream.read_exact(&mut raw_header))
        .await
        .expect("ready header within timeout")
        .unwrap();
    let ready = PacketHeader::from_bytes(raw_header);
    assert_eq!(ready.cmd, PacketKind::EventChannelReady.as_i32());
    assert_eq!(ready.size, 8);

    let mut payload = [0u8; 8];
    stream.read_exact(&mut payload).await.unwrap();
    let [m0, m1, m2, m3, c0, c1, c2, c3] = payload;
    assert_eq!(u32::from_ne_bytes([m0, m1, m2, m3]), EVENT_CHANNEL_MAGIC);
    assert_eq!(i32::from_ne_bytes([c0, c1, c2, c3]), client_id.as_i32());
}
