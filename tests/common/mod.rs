//! Scripted transport shared by the link tests

use std::collections::VecDeque;
use std::future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use candyscale::transport::{DeviceFilter, Transport};
use candyscale::{ConnectionState, ScaleClient, TransportError};
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDevice {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSession {
    pub id: usize,
}

#[derive(Default)]
struct MockState {
    device_name: String,
    scan_failures: VecDeque<TransportError>,
    hang_scans: bool,
    scan_times: Vec<Instant>,
    connect_failures: VecDeque<TransportError>,
    hang_connects: bool,
    subscribe_failures: VecDeque<TransportError>,
    connects: usize,
    disconnects: usize,
    writes: Vec<Vec<u8>>,
    fail_writes_after: Option<(usize, TransportError)>,
    inbound: Option<mpsc::Sender<Vec<u8>>>,
}

/// A transport whose radio is a handful of counters and a channel the test feeds
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self::with_device_name("ACAIA-TEST")
    }

    pub fn with_device_name(name: &str) -> Self {
        let state = MockState { device_name: name.to_string(), ..MockState::default() };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// The next scan fails with `err`
    pub fn fail_next_scan(&self, err: TransportError) {
        self.lock().scan_failures.push_back(err);
    }

    /// Every scan from now on never finds anything
    pub fn hang_scans(&self) {
        self.lock().hang_scans = true;
    }

    /// The next connect fails with `err`
    pub fn fail_next_connect(&self, err: TransportError) {
        self.lock().connect_failures.push_back(err);
    }

    /// Every connect from now on never completes
    pub fn hang_connects(&self) {
        self.lock().hang_connects = true;
    }

    /// The next subscribe fails with `err`
    pub fn fail_next_subscribe(&self, err: TransportError) {
        self.lock().subscribe_failures.push_back(err);
    }

    /// Writes are rejected once `n` writes have succeeded
    pub fn fail_writes_after(&self, n: usize) {
        self.fail_writes_after_with(n, TransportError::Other("write rejected".to_string()));
    }

    /// Writes fail with `err` once `n` writes have succeeded
    pub fn fail_writes_after_with(&self, n: usize, err: TransportError) {
        self.lock().fail_writes_after = Some((n, err));
    }

    pub fn scans(&self) -> usize {
        self.lock().scan_times.len()
    }

    pub fn scan_times(&self) -> Vec<Instant> {
        self.lock().scan_times.clone()
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Deliver one notification to the link
    pub async fn push(&self, bytes: &[u8]) {
        let inbound = self.lock().inbound.clone().expect("nobody is subscribed");
        inbound.send(bytes.to_vec()).await.expect("the link dropped its receiver");
    }

    /// Simulate the radio link going away
    pub fn drop_link(&self) {
        self.lock().inbound = None;
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Device = MockDevice;
    type Session = MockSession;

    async fn wait_available(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn scan(&self, filter: &DeviceFilter) -> Result<MockDevice, TransportError> {
        let (failure, hang, name) = {
            let mut state = self.lock();
            state.scan_times.push(Instant::now());
            (state.scan_failures.pop_front(), state.hang_scans, state.device_name.clone())
        };
        if let Some(err) = failure {
            return Err(err);
        }
        if hang {
            return future::pending().await;
        }
        if filter.matches(&name) {
            Ok(MockDevice { name })
        } else {
            Err(TransportError::NotFound)
        }
    }

    async fn connect(&self, _device: MockDevice) -> Result<MockSession, TransportError> {
        let (failure, hang, id) = {
            let mut state = self.lock();
            state.connects += 1;
            (state.connect_failures.pop_front(), state.hang_connects, state.connects)
        };
        if let Some(err) = failure {
            return Err(err);
        }
        if hang {
            return future::pending().await;
        }
        Ok(MockSession { id })
    }

    async fn disconnect(&self, _session: &MockSession) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.disconnects += 1;
        state.inbound = None;
        Ok(())
    }

    async fn write(&self, _session: &MockSession, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock();
        if let Some((n, err)) = &state.fail_writes_after {
            if state.writes.len() >= *n {
                return Err(err.clone());
            }
        }
        state.writes.push(bytes.to_vec());
        Ok(())
    }

    async fn subscribe(
        &self,
        _session: &MockSession,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        let mut state = self.lock();
        if let Some(err) = state.subscribe_failures.pop_front() {
            return Err(err);
        }
        let (tx, rx) = mpsc::channel(64);
        state.inbound = Some(tx);
        Ok(rx)
    }
}

/// Wait until the link reports `state`, failing the test instead of hanging
#[allow(dead_code)]
pub async fn wait_for_state(client: &ScaleClient, state: ConnectionState) {
    let mut watch = client.watch_state();
    tokio::time::timeout(Duration::from_secs(300), watch.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("link never reached {state}"))
        .expect("link task stopped");
}

/// Poll `condition` while letting the link task run
#[allow(dead_code)]
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never became true");
}
