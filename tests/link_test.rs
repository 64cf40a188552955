//! Integration tests for the link manager and reconnect supervisor,
//! exercised against an in-memory transport.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use relaylink::bluetooth::{
    CapabilityProbe, DeviceInfo, LinkError, LinkManager, LinkReader, LinkWriter,
    ReconnectSupervisor, Transport,
};
use relaylink::events::LinkEvent;
use relaylink::state::{LinkState, LinkStatus};
use relaylink::storage::Registry;

const BOARD_ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

#[derive(Clone, Copy, PartialEq)]
enum ConnectOutcome {
    Succeed,
    /// Succeeds after a 100ms dial, long enough to race a second caller.
    SucceedSlowly,
    TimedOut,
    Refused,
    /// Never completes; only an abort ends the attempt.
    Hang,
}

struct FakeTransport {
    outcome: StdMutex<ConnectOutcome>,
    attempts: AtomicU32,
    open_sessions: Arc<AtomicI32>,
    peak_sessions: AtomicI32,
    inbound: StdMutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    written: Arc<StdMutex<Vec<u8>>>,
    fail_writes: Arc<AtomicBool>,
}

impl FakeTransport {
    fn new(outcome: ConnectOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome: StdMutex::new(outcome),
            attempts: AtomicU32::new(0),
            open_sessions: Arc::new(AtomicI32::new(0)),
            peak_sessions: AtomicI32::new(0),
            inbound: StdMutex::new(None),
            written: Arc::new(StdMutex::new(Vec::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
        })
    }

    fn set_outcome(&self, outcome: ConnectOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn open_sessions(&self) -> i32 {
        self.open_sessions.load(Ordering::SeqCst)
    }

    fn peak_sessions(&self) -> i32 {
        self.peak_sessions.load(Ordering::SeqCst)
    }

    fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    /// Feed bytes to the current session's read half.
    fn inject(&self, bytes: &[u8]) {
        let guard = self.inbound.lock().unwrap();
        let tx = guard.as_ref().expect("no session to inject into");
        tx.send(bytes.to_vec()).unwrap();
    }

    /// Simulate the peer closing the link (EOF on the read half).
    fn close_remote(&self) {
        self.inbound.lock().unwrap().take();
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        _address: &str,
    ) -> Result<(Box<dyn LinkReader>, Box<dyn LinkWriter>), LinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = *self.outcome.lock().unwrap();
        match outcome {
            ConnectOutcome::Hang => std::future::pending().await,
            ConnectOutcome::TimedOut => Err(LinkError::TimedOut),
            ConnectOutcome::Refused => Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
            ConnectOutcome::Succeed | ConnectOutcome::SucceedSlowly => {
                if outcome == ConnectOutcome::SucceedSlowly {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                let (tx, rx) = mpsc::unbounded_channel();
                *self.inbound.lock().unwrap() = Some(tx);
                let open = self.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_sessions.fetch_max(open, Ordering::SeqCst);
                Ok((
                    Box::new(FakeReader { rx }),
                    Box::new(FakeWriter {
                        written: Arc::clone(&self.written),
                        fail_writes: Arc::clone(&self.fail_writes),
                        open_sessions: Arc::clone(&self.open_sessions),
                        closed: false,
                    }),
                ))
            }
        }
    }
}

struct FakeReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl LinkReader for FakeReader {
    async fn read_chunk(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self.rx.recv().await)
    }
}

struct FakeWriter {
    written: Arc<StdMutex<Vec<u8>>>,
    fail_writes: Arc<AtomicBool>,
    open_sessions: Arc<AtomicI32>,
    closed: bool,
}

#[async_trait]
impl LinkWriter for FakeWriter {
    async fn write_byte(&mut self, byte: u8) -> std::io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            ));
        }
        self.written.lock().unwrap().push(byte);
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

// A dropped socket closes like the real thing.
impl Drop for FakeWriter {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct FakeCapability {
    permission: AtomicBool,
    enabled: AtomicBool,
    bonded: StdMutex<Vec<DeviceInfo>>,
}

impl FakeCapability {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            permission: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
            bonded: StdMutex::new(vec![DeviceInfo {
                address: BOARD_ADDRESS.into(),
                name: Some("Relay Board".into()),
            }]),
        })
    }
}

#[async_trait]
impl CapabilityProbe for FakeCapability {
    async fn has_permission(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    async fn is_adapter_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn bonded_devices(&self) -> Vec<DeviceInfo> {
        self.bonded.lock().unwrap().clone()
    }
}

struct Harness {
    manager: LinkManager,
    transport: Arc<FakeTransport>,
    capability: Arc<FakeCapability>,
    registry: Registry,
    state: Arc<LinkState>,
    events: mpsc::Receiver<LinkEvent>,
}

fn harness(outcome: ConnectOutcome) -> Harness {
    let transport = FakeTransport::new(outcome);
    let capability = FakeCapability::new();
    let registry = Registry::open_in_memory().unwrap();
    let state = LinkState::new();
    let (event_tx, events) = mpsc::channel(64);
    let manager = LinkManager::new(
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::clone(&capability) as Arc<dyn CapabilityProbe>,
        registry.clone(),
        state.clone(),
        event_tx,
    );
    Harness {
        manager,
        transport,
        capability,
        registry,
        state,
        events,
    }
}

fn board() -> DeviceInfo {
    DeviceInfo {
        address: BOARD_ADDRESS.into(),
        name: Some("Relay Board".into()),
    }
}

/// Polls until `check` passes or the deadline hits.
async fn wait_for(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_connect_publishes_state_and_name() {
    let h = harness(ConnectOutcome::Succeed);
    h.manager.connect_to_device(&board()).await;

    assert!(h.state.is_connected());
    assert_eq!(h.state.device_name().as_deref(), Some("Relay Board"));
    assert_eq!(h.transport.open_sessions(), 1);
}

#[tokio::test]
async fn test_connect_falls_back_to_address_tail_without_name() {
    let h = harness(ConnectOutcome::Succeed);
    let unnamed = DeviceInfo {
        address: BOARD_ADDRESS.into(),
        name: None,
    };
    h.manager.connect_to_device(&unnamed).await;
    assert_eq!(h.state.device_name().as_deref(), Some("Device EE:FF"));
}

#[tokio::test]
async fn test_connect_without_permission_reports_and_skips_transport() {
    let h = harness(ConnectOutcome::Succeed);
    h.capability.permission.store(false, Ordering::SeqCst);

    h.manager.connect_to_device(&board()).await;

    assert!(!h.state.is_connected());
    assert_eq!(
        h.state.last_error().as_deref(),
        Some("Cannot connect - Bluetooth permission not granted")
    );
    assert_eq!(h.transport.attempts(), 0);
}

#[tokio::test]
async fn test_connect_timeout_publishes_error() {
    let h = harness(ConnectOutcome::TimedOut);
    h.manager.connect_to_device(&board()).await;

    assert_eq!(h.state.status(), LinkStatus::Disconnected);
    assert_eq!(h.state.last_error().as_deref(), Some("Connection timed out"));
}

#[tokio::test]
async fn test_connect_refused_hints_out_of_range() {
    let h = harness(ConnectOutcome::Refused);
    h.manager.connect_to_device(&board()).await;

    assert_eq!(
        h.state.last_error().as_deref(),
        Some("Device may be powered off or out of range")
    );
}

#[tokio::test]
async fn test_reconnect_closes_previous_session() {
    let h = harness(ConnectOutcome::Succeed);
    h.manager.connect_to_device(&board()).await;
    h.manager.connect_to_device(&board()).await;

    assert_eq!(h.transport.attempts(), 2);
    // The first session was closed before the second opened.
    assert_eq!(h.transport.open_sessions(), 1);
    assert!(h.state.is_connected());
}

#[tokio::test]
async fn test_spawn_connect_supersedes_inflight_attempt() {
    let h = harness(ConnectOutcome::Hang);
    h.manager.spawn_connect(board()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Second request aborts the hung attempt and succeeds.
    h.transport.set_outcome(ConnectOutcome::Succeed);
    h.manager.spawn_connect(board()).await;

    wait_for(|| h.state.is_connected()).await;
    assert_eq!(h.transport.open_sessions(), 1);
}

#[tokio::test]
async fn test_competing_dials_never_overlap_sessions() {
    let h = harness(ConnectOutcome::SucceedSlowly);

    // Background dial is mid-flight when a direct call comes in.
    h.manager.spawn_connect(board()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.manager.connect_to_device(&board()).await;

    assert!(h.state.is_connected());
    assert_eq!(h.transport.attempts(), 2);
    assert_eq!(h.transport.peak_sessions(), 1);
    assert_eq!(h.transport.open_sessions(), 1);
}

#[tokio::test]
async fn test_close_connection_is_idempotent() {
    let h = harness(ConnectOutcome::Succeed);
    h.manager.connect_to_device(&board()).await;
    assert!(h.state.is_connected());

    h.manager.close_connection().await;
    assert!(!h.state.is_connected());
    assert_eq!(h.state.device_name(), None);
    assert_eq!(h.transport.open_sessions(), 0);

    // Safe to call again, and from a never-connected state.
    h.manager.close_connection().await;
    assert!(!h.state.is_connected());
    assert_eq!(h.transport.open_sessions(), 0);
}

#[tokio::test]
async fn test_inbound_byte_updates_registry() {
    let mut h = harness(ConnectOutcome::Succeed);
    h.manager.connect_to_device(&board()).await;

    let before_ms = chrono::Local::now().timestamp_millis();
    h.transport.inject(b"c");

    let registry = h.registry.clone();
    wait_for(move || registry.appliance_is_on(3).unwrap()).await;

    assert!(h.registry.start_time(3).unwrap() >= before_ms);
    assert_eq!(h.registry.display_time(3).unwrap(), "00:00:00");

    // Events carry the same report.
    loop {
        match h.events.recv().await.expect("event stream ended") {
            LinkEvent::ApplianceChanged { id, is_on } => {
                assert_eq!((id, is_on), (3, true));
                break;
            }
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_inbound_chunk_applies_every_byte() {
    let h = harness(ConnectOutcome::Succeed);
    h.manager.connect_to_device(&board()).await;

    h.transport.inject(b"aB\r\nh");

    let registry = h.registry.clone();
    wait_for(move || registry.appliance_is_on(8).unwrap()).await;

    assert!(h.registry.appliance_is_on(1).unwrap());
    assert!(!h.registry.appliance_is_on(2).unwrap());
    assert!(h.registry.appliance_is_on(8).unwrap());
}

#[tokio::test]
async fn test_device_reported_off_zeroes_timer() {
    let h = harness(ConnectOutcome::Succeed);
    h.manager.connect_to_device(&board()).await;

    h.transport.inject(b"c");
    let registry = h.registry.clone();
    wait_for(move || registry.appliance_is_on(3).unwrap()).await;
    assert!(h.registry.start_time(3).unwrap() > 0);

    h.transport.inject(b"C");
    let registry = h.registry.clone();
    wait_for(move || !registry.appliance_is_on(3).unwrap()).await;
    assert_eq!(h.registry.start_time(3).unwrap(), 0);
}

#[tokio::test]
async fn test_peer_close_tears_down_session() {
    let h = harness(ConnectOutcome::Succeed);
    h.manager.connect_to_device(&board()).await;

    h.transport.close_remote();

    let state = h.state.clone();
    wait_for(move || !state.is_connected()).await;
    assert_eq!(h.transport.open_sessions(), 0);
    assert_eq!(
        h.state.last_error().as_deref(),
        Some("Connection closed by device")
    );
}

#[tokio::test]
async fn test_write_failure_tears_down_session() {
    let h = harness(ConnectOutcome::Succeed);
    h.manager.connect_to_device(&board()).await;

    h.transport.fail_writes.store(true, Ordering::SeqCst);
    h.manager.send_command(b'a').await;

    assert!(!h.state.is_connected());
    assert_eq!(h.transport.open_sessions(), 0);
    assert!(h
        .state
        .last_error()
        .unwrap()
        .starts_with("Connection lost"));
}

#[tokio::test]
async fn test_set_appliance_sends_and_records() {
    let h = harness(ConnectOutcome::Succeed);
    h.manager.connect_to_device(&board()).await;

    h.manager.set_appliance(3, true).await;
    assert_eq!(h.transport.written(), vec![b'c']);
    assert!(h.registry.appliance_is_on(3).unwrap());
    assert!(h.registry.start_time(3).unwrap() > 0);

    h.manager.set_appliance(3, false).await;
    assert_eq!(h.transport.written(), vec![b'c', b'C']);
    assert!(!h.registry.appliance_is_on(3).unwrap());
    assert_eq!(h.registry.start_time(3).unwrap(), 0);
}

#[tokio::test]
async fn test_set_appliance_out_of_range_is_noop() {
    let h = harness(ConnectOutcome::Succeed);
    h.manager.connect_to_device(&board()).await;

    h.manager.set_appliance(0, true).await;
    h.manager.set_appliance(9, true).await;
    assert!(h.transport.written().is_empty());
}

#[tokio::test]
async fn test_trusted_device_resolution() {
    let h = harness(ConnectOutcome::Succeed);
    assert!(h.manager.trusted_device().await.is_none());

    h.manager.set_trusted_device(Some(&board())).await;
    let trusted = h.manager.trusted_device().await.unwrap();
    assert_eq!(trusted.address, BOARD_ADDRESS);

    // An address no longer in the bonded list does not resolve.
    h.capability.bonded.lock().unwrap().clear();
    assert!(h.manager.trusted_device().await.is_none());

    h.manager.set_trusted_device(None).await;
    assert_eq!(h.registry.trusted_device_address().unwrap(), "");
}

#[tokio::test]
async fn test_initialize_reports_disabled_adapter() {
    let h = harness(ConnectOutcome::Succeed);
    h.capability.enabled.store(false, Ordering::SeqCst);

    h.manager.initialize().await;

    assert_eq!(
        h.state.last_error().as_deref(),
        Some("Bluetooth is not enabled")
    );
    assert!(h.state.available_devices().is_empty());
}

#[tokio::test]
async fn test_initialize_seeds_trusted_name_and_device_list() {
    let h = harness(ConnectOutcome::Succeed);
    h.registry
        .set_trusted_device_address(BOARD_ADDRESS)
        .unwrap();

    h.manager.initialize().await;

    assert_eq!(h.state.device_name().as_deref(), Some("Relay Board"));
    assert_eq!(h.state.available_devices().len(), 1);
    assert_eq!(h.state.last_error(), None);
}

#[tokio::test]
async fn test_supervisor_connects_to_trusted_device() {
    let h = harness(ConnectOutcome::Succeed);
    h.registry
        .set_trusted_device_address(BOARD_ADDRESS)
        .unwrap();

    let supervisor = ReconnectSupervisor::new();
    supervisor.start(h.manager.clone()).await;

    let state = h.state.clone();
    wait_for(move || state.is_connected()).await;
    assert_eq!(h.transport.attempts(), 1);

    // Connected iterations reset nothing and dial nothing.
    h.transport.inject(b"c");
    let registry = h.registry.clone();
    wait_for(move || registry.appliance_is_on(3).unwrap()).await;
    assert!(h.registry.start_time(3).unwrap() > 0);

    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_backs_off_and_enters_degraded_mode() {
    let mut h = harness(ConnectOutcome::TimedOut);
    h.registry
        .set_trusted_device_address(BOARD_ADDRESS)
        .unwrap();

    let supervisor = ReconnectSupervisor::new();
    supervisor.start(h.manager.clone()).await;

    // Attempts land at t = 0, 5, 14, 31, 62, 73, 84s (settle + doubling
    // backoff, then the 10s degraded-mode penalty per attempt). 90s sits
    // mid-penalty, well clear of any attempt boundary.
    tokio::time::sleep(Duration::from_secs(90)).await;

    assert!(h.transport.attempts() >= 5);
    assert_eq!(
        h.state.last_error().as_deref(),
        Some("Device may be out of range. Reducing reconnection attempts.")
    );

    // Event subscribers see the degraded-mode error too.
    let mut saw_degraded_event = false;
    while let Ok(event) = h.events.try_recv() {
        if let LinkEvent::Error(message) = event {
            if message == "Device may be out of range. Reducing reconnection attempts." {
                saw_degraded_event = true;
            }
        }
    }
    assert!(saw_degraded_event);

    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_skips_attempts_without_preconditions() {
    let h = harness(ConnectOutcome::Succeed);
    h.registry
        .set_trusted_device_address(BOARD_ADDRESS)
        .unwrap();
    h.capability.enabled.store(false, Ordering::SeqCst);

    let supervisor = ReconnectSupervisor::new();
    supervisor.start(h.manager.clone()).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.transport.attempts(), 0);

    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_idles_without_trusted_device() {
    let h = harness(ConnectOutcome::Succeed);

    let supervisor = ReconnectSupervisor::new();
    supervisor.start(h.manager.clone()).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.transport.attempts(), 0);

    supervisor.stop().await;
}

#[tokio::test]
async fn test_restarting_supervisor_supersedes_previous_loop() {
    let h = harness(ConnectOutcome::Succeed);
    h.registry
        .set_trusted_device_address(BOARD_ADDRESS)
        .unwrap();

    let supervisor = ReconnectSupervisor::new();
    supervisor.start(h.manager.clone()).await;
    supervisor.start(h.manager.clone()).await;

    let state = h.state.clone();
    wait_for(move || state.is_connected()).await;

    // Only one loop dialed; the superseded one was aborted.
    assert_eq!(h.transport.open_sessions(), 1);
    supervisor.stop().await;
}
