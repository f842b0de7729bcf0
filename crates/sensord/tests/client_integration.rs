//! End-to-end tests: `sensor_client::SensorSession` against a real daemon.
//!
//! The daemon serves a simulated accelerometer (with a gravity sensor derived
//! from it) and a gyroscope that requires `BIO`, so events travel the whole
//! path: module poller → ingestion queue → dispatcher → event channel →
//! client listener → callback.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use sensor_client::{ClientConfig, ClientError, EventCallback, EventRequest, SensorSession};
use sensor_core::{EventType, Permission, SensorOption, SensorType, Situation};
use sensord::context::spawn_dispatcher;
use sensord::dispatcher::ingest_channel;
use sensord::module::{SensorCatalog, SensorModule, SimulatedSensor, Waveform};
use sensord::permission::FixedPermission;
use sensord::server::SensorServer;
use sensord::situation::SituationSource;
use sensord::virtual_sensor::GravitySensor;
use sensord::DaemonContext;

const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(3);

const RAW: EventType = EventType::ACCELEROMETER_RAW_DATA;

// ============================================================================
// Test Helpers
// ============================================================================

struct TestDaemon {
    dir: PathBuf,
    ctx: Arc<DaemonContext>,
    situation: SituationSource,
    cancel_token: CancellationToken,
    _temp_dir: TempDir,
}

impl TestDaemon {
    async fn spawn(permission: Permission) -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let dir = temp_dir.path().to_path_buf();
        let config = ClientConfig::with_socket_dir(&dir);

        let (ingest, ingest_rx) = ingest_channel(256);
        let mut catalog = SensorCatalog::new();
        let mut accel = Waveform::default_info(SensorType::Accelerometer, "accel");
        accel.min_interval_us = 1_000;
        catalog.insert(Arc::new(SimulatedSensor::new(accel, Waveform::Tilt, ingest.clone())));
        let mut gyro = Waveform::default_info(SensorType::Gyroscope, "gyro");
        gyro.permission = Permission::BIO;
        catalog.insert(Arc::new(SimulatedSensor::new(gyro, Waveform::Spin, ingest.clone())));
        catalog
            .insert_virtual(Box::new(GravitySensor::new()))
            .expect("accelerometer present");

        let situation = SituationSource::new(Situation::ScreenOn);
        let ctx = Arc::new(DaemonContext::new(
            catalog,
            Box::new(FixedPermission(permission)),
            situation.subscribe(),
        ));

        let cancel_token = CancellationToken::new();
        spawn_dispatcher(Arc::clone(&ctx), ingest_rx, cancel_token.clone());
        let server = SensorServer::new(
            config.command_socket.clone(),
            config.event_socket.clone(),
            Arc::clone(&ctx),
            cancel_token.clone(),
        );
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT {
            if config.command_socket.exists() && config.event_socket.exists() {
                break;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }
        assert!(config.event_socket.exists(), "daemon sockets did not appear");

        Self {
            dir,
            ctx,
            situation,
            cancel_token,
            _temp_dir: temp_dir,
        }
    }

    fn session(&self) -> SensorSession {
        SensorSession::new(ClientConfig::with_socket_dir(&self.dir))
    }

    async fn wait_until_idle(&self) {
        let start = tokio::time::Instant::now();
        while self.ctx.registry.client_count() > 0 {
            assert!(start.elapsed() < DELIVERY_TIMEOUT, "daemon still holds clients");
            sleep(SOCKET_POLL_INTERVAL).await;
        }
    }

    fn module_started(&self, sensor: SensorType) -> bool {
        self.ctx.catalog.get(sensor).unwrap().is_started()
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

fn counting(counter: &Arc<AtomicUsize>) -> EventCallback {
    let counter = counter.clone();
    Arc::new(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

async fn wait_for_count(counter: &AtomicUsize, at_least: usize) {
    let start = tokio::time::Instant::now();
    while counter.load(Ordering::SeqCst) < at_least {
        assert!(
            start.elapsed() < DELIVERY_TIMEOUT,
            "only {} events delivered",
            counter.load(Ordering::SeqCst)
        );
        sleep(SOCKET_POLL_INTERVAL).await;
    }
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn test_events_reach_callback() {
    let daemon = TestDaemon::spawn(Permission::ALL).await;
    let session = daemon.session();
    let hits = Arc::new(AtomicUsize::new(0));

    let handle = session.connect(SensorType::Accelerometer).await.unwrap();
    session
        .register_event(handle, RAW, EventRequest::interval(10_000), counting(&hits))
        .await
        .unwrap();
    session.start(handle, SensorOption::Default).await.unwrap();
    assert!(daemon.module_started(SensorType::Accelerometer));

    wait_for_count(&hits, 3).await;

    session.disconnect(handle).await.unwrap();
    daemon.wait_until_idle().await;
    assert!(!daemon.module_started(SensorType::Accelerometer));
}

#[tokio::test]
async fn test_timestamps_do_not_go_backwards() {
    let daemon = TestDaemon::spawn(Permission::ALL).await;
    let session = daemon.session();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let handle = session.connect(SensorType::Accelerometer).await.unwrap();
    let sink = seen.clone();
    session
        .register_event(
            handle,
            RAW,
            EventRequest::interval(5_000),
            Arc::new(move |_, event| sink.lock().push(event.timestamp())),
        )
        .await
        .unwrap();
    session.start(handle, SensorOption::AlwaysOn).await.unwrap();

    let start = tokio::time::Instant::now();
    while seen.lock().len() < 5 {
        assert!(start.elapsed() < DELIVERY_TIMEOUT);
        sleep(SOCKET_POLL_INTERVAL).await;
    }
    let timestamps = seen.lock().clone();
    assert!(timestamps.windows(2).all(|w| w[0] <= w[1]), "{timestamps:?}");

    session.shutdown().await;
}

#[tokio::test]
async fn test_virtual_sensor_events() {
    let daemon = TestDaemon::spawn(Permission::ALL).await;
    let session = daemon.session();
    let hits = Arc::new(AtomicUsize::new(0));

    let handle = session.connect(SensorType::Gravity).await.unwrap();
    session
        .register_event(
            handle,
            EventType::GRAVITY_RAW_DATA,
            EventRequest::interval(10_000),
            counting(&hits),
        )
        .await
        .unwrap();
    session.start(handle, SensorOption::Default).await.unwrap();

    // Starting the virtual sensor powers its input.
    assert!(daemon.module_started(SensorType::Accelerometer));
    wait_for_count(&hits, 2).await;

    session.disconnect(handle).await.unwrap();
    daemon.wait_until_idle().await;
    assert!(!daemon.module_started(SensorType::Accelerometer));
}

#[tokio::test]
async fn test_screen_off_gates_default_listeners() {
    let daemon = TestDaemon::spawn(Permission::ALL).await;
    let gated_session = daemon.session();
    let open_session = daemon.session();
    let gated = Arc::new(AtomicUsize::new(0));
    let ungated = Arc::new(AtomicUsize::new(0));

    for (session, counter, option) in [
        (&gated_session, &gated, SensorOption::Default),
        (&open_session, &ungated, SensorOption::AlwaysOn),
    ] {
        let handle = session.connect(SensorType::Accelerometer).await.unwrap();
        session
            .register_event(handle, RAW, EventRequest::interval(10_000), counting(counter))
            .await
            .unwrap();
        session.start(handle, option).await.unwrap();
    }
    wait_for_count(&gated, 1).await;

    daemon.situation.set(Situation::ScreenOff);
    sleep(Duration::from_millis(100)).await;
    let gated_before = gated.load(Ordering::SeqCst);
    let ungated_before = ungated.load(Ordering::SeqCst);
    wait_for_count(&ungated, ungated_before + 3).await;
    assert_eq!(gated.load(Ordering::SeqCst), gated_before);

    // Delivery resumes without any client call.
    daemon.situation.set(Situation::ScreenOn);
    wait_for_count(&gated, gated_before + 1).await;

    gated_session.shutdown().await;
    open_session.shutdown().await;
    daemon.wait_until_idle().await;
}

// ============================================================================
// Control plane
// ============================================================================

#[tokio::test]
async fn test_get_data_after_start() {
    let daemon = TestDaemon::spawn(Permission::ALL).await;
    let session = daemon.session();

    let handle = session.connect(SensorType::Accelerometer).await.unwrap();
    session
        .register_event(handle, RAW, EventRequest::interval(20_000), Arc::new(|_, _| {}))
        .await
        .unwrap();
    session.start(handle, SensorOption::Default).await.unwrap();

    let data = session.get_data(handle).await.unwrap();
    assert!(data.is_valid());
    assert_eq!(data.values.len(), 3);

    session.shutdown().await;
}

#[tokio::test]
async fn test_permission_denied_for_restricted_sensor() {
    let daemon = TestDaemon::spawn(Permission::STANDARD).await;
    let session = daemon.session();

    assert!(matches!(
        session.connect(SensorType::Gyroscope).await,
        Err(ClientError::PermissionDenied(SensorType::Gyroscope))
    ));
    assert!(matches!(
        session.connect(SensorType::Pressure).await,
        Err(ClientError::UnsupportedSensor(SensorType::Pressure))
    ));
    daemon.wait_until_idle().await;

    // Unrestricted sensors are still available.
    let handle = session.connect(SensorType::Accelerometer).await.unwrap();
    session.disconnect(handle).await.unwrap();
}

#[tokio::test]
async fn test_dropped_session_is_cleaned_up() {
    let daemon = TestDaemon::spawn(Permission::ALL).await;
    let hits = Arc::new(AtomicUsize::new(0));
    {
        let session = daemon.session();
        let handle = session.connect(SensorType::Accelerometer).await.unwrap();
        session
            .register_event(handle, RAW, EventRequest::interval(10_000), counting(&hits))
            .await
            .unwrap();
        session.start(handle, SensorOption::Default).await.unwrap();
        wait_for_count(&hits, 1).await;
    }

    daemon.wait_until_idle().await;
    let start = tokio::time::Instant::now();
    while daemon.module_started(SensorType::Accelerometer) {
        assert!(start.elapsed() < DELIVERY_TIMEOUT, "module left running");
        sleep(SOCKET_POLL_INTERVAL).await;
    }
}
