//! The link to the scale.
//!
//! A single task owns the connection: its state, the receive buffer, the transport session,
//! the heartbeat timer and whichever asynchronous step of the connection sequence is in
//! flight. Requests from [`ScaleClient`](crate::ScaleClient) handles, inbound notifications,
//! heartbeat ticks and step completions are all handled one at a time by [`Link::run`], so
//! a heartbeat write can never interleave with a decode pass.
//!
//! Connection sequence:
//!
//! ```text
//! Disconnected -> Scanning -> Connecting -> Handshaking -> Connected
//!                    ^                                        |
//!                    +--------- Reconnecting <----------------+ unexpected drop
//! ```
//!
//! Timers and in-flight steps are plain values owned by the task. Dropping them cancels
//! them, which is what `disconnect()` does before it touches the transport.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ScaleConfig;
use crate::diagnostics::DiagnosticsRecorder;
use crate::error::{ScaleError, TransportError};
use crate::frame::{self, Command, ReceiveBuffer};
use crate::message::{self, Event};
use crate::scale_client::ScaleEvent;
use crate::scale_state::{BatteryLevel, ConnectionState, WeightSample};
use crate::transport::{DeviceFilter, Transport};

/// Sent by client handles to the link task
pub(crate) enum Request {
    Connect(oneshot::Sender<Result<(), ScaleError>>),
    Disconnect(oneshot::Sender<()>),
    Tare(oneshot::Sender<Result<(), ScaleError>>),
}

/// Channels through which the link publishes its state
pub(crate) struct Published {
    pub state: watch::Sender<ConnectionState>,
    pub weight: watch::Sender<Option<WeightSample>>,
    pub battery: watch::Sender<Option<BatteryLevel>>,
    pub last_error: watch::Sender<Option<ScaleError>>,
    pub events: broadcast::Sender<ScaleEvent>,
    pub diagnostics: Arc<DiagnosticsRecorder>,
}

/// Completion of one asynchronous step of the connection sequence
enum Step<T: Transport> {
    Scanned(Result<T::Device, TransportError>),
    Connected(Result<T::Session, TransportError>),
    Subscribed(T::Session, Result<mpsc::Receiver<Vec<u8>>, TransportError>),
    Handshaken(Result<(), TransportError>),
    BackoffElapsed,
}

/// Whatever woke the link task up
enum Wake<T: Transport> {
    Request(Option<Request>),
    Heartbeat,
    Step(Step<T>),
    Chunk(Option<Vec<u8>>),
}

pub(crate) struct Link<T: Transport> {
    transport: Arc<T>,
    config: ScaleConfig,
    requests: mpsc::Receiver<Request>,
    published: Published,
    state: ConnectionState,
    auto_reconnect: bool,
    /// The current attempt was started by an unexpected drop, not by the caller
    reconnecting: bool,
    session: Option<T::Session>,
    inbound: Option<mpsc::Receiver<Vec<u8>>>,
    buffer: ReceiveBuffer,
    heartbeat: Option<Interval>,
    /// Heartbeat writes that failed in a row
    heartbeat_failures: u32,
    step: Option<BoxFuture<'static, Step<T>>>,
    connect_reply: Option<oneshot::Sender<Result<(), ScaleError>>>,
}

impl<T: Transport> Link<T> {
    /// Failed heartbeats after which the link is considered lost
    const MAX_HEARTBEAT_FAILURES: u32 = 3;

    pub(crate) fn new(
        transport: T,
        config: ScaleConfig,
        requests: mpsc::Receiver<Request>,
        published: Published,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            auto_reconnect: config.auto_reconnect,
            config,
            requests,
            published,
            state: ConnectionState::Disconnected,
            reconnecting: false,
            session: None,
            inbound: None,
            buffer: ReceiveBuffer::new(),
            heartbeat: None,
            heartbeat_failures: 0,
            step: None,
            connect_reply: None,
        }
    }

    /// Serve requests until every client handle has been dropped
    pub(crate) async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                biased;
                request = self.requests.recv() => Wake::Request(request),
                _ = next_heartbeat(&mut self.heartbeat) => Wake::Heartbeat,
                step = next_step(&mut self.step) => Wake::Step(step),
                chunk = next_chunk(&mut self.inbound) => Wake::Chunk(chunk),
            };

            match wake {
                Wake::Request(Some(request)) => self.handle_request(request).await,
                Wake::Request(None) => {
                    debug!("All scale client handles dropped");
                    self.disconnect().await;
                    break;
                }
                Wake::Heartbeat => self.send_heartbeat().await,
                Wake::Step(step) => self.handle_step(step).await,
                Wake::Chunk(Some(chunk)) => self.handle_chunk(&chunk),
                Wake::Chunk(None) => self.handle_link_lost().await,
            }
        }
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect(reply) => match self.state {
                ConnectionState::Disconnected => {
                    self.auto_reconnect = self.config.auto_reconnect;
                    self.reconnecting = false;
                    self.connect_reply = Some(reply);
                    self.start_scan();
                }
                ConnectionState::Connected => {
                    let _ = reply.send(Ok(()));
                }
                other => {
                    let _ = reply.send(Err(ScaleError::InvalidState(other)));
                }
            },
            Request::Disconnect(reply) => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Request::Tare(reply) => {
                let result = self.tare().await;
                let _ = reply.send(result);
            }
        }
    }

    async fn handle_step(&mut self, step: Step<T>) {
        match step {
            Step::Scanned(Ok(device)) => {
                self.set_state(ConnectionState::Connecting);
                let transport = self.transport.clone();
                let connect_timeout = self.config.scan_timeout;
                self.step = Some(
                    async move {
                        let connected = time::timeout(connect_timeout, transport.connect(device))
                            .await
                            .unwrap_or(Err(TransportError::Timeout(connect_timeout)));
                        Step::<T>::Connected(connected)
                    }
                    .boxed(),
                );
            }
            Step::Scanned(Err(err)) => self.fail_attempt(ScaleError::from_scan(err)).await,
            Step::Connected(Ok(session)) => {
                self.session = Some(session.clone());
                let transport = self.transport.clone();
                self.step = Some(
                    async move {
                        let subscribed = transport.subscribe(&session).await;
                        Step::<T>::Subscribed(session, subscribed)
                    }
                    .boxed(),
                );
            }
            Step::Connected(Err(err)) => {
                self.fail_attempt(ScaleError::ConnectFailed(err.to_string())).await
            }
            Step::Subscribed(session, Ok(inbound)) => {
                self.inbound = Some(inbound);
                self.buffer.clear();
                self.set_state(ConnectionState::Handshaking);
                self.step = Some(
                    handshake(
                        self.transport.clone(),
                        session,
                        self.published.diagnostics.clone(),
                        self.config.handshake_step_delay,
                        self.config.write_timeout,
                    )
                    .map(Step::<T>::Handshaken)
                    .boxed(),
                );
            }
            Step::Subscribed(_, Err(err)) => {
                self.fail_attempt(ScaleError::ConnectFailed(err.to_string())).await
            }
            Step::Handshaken(Ok(())) => self.enter_connected(),
            Step::Handshaken(Err(err)) => {
                self.fail_attempt(ScaleError::HandshakeFailed(err.to_string())).await
            }
            Step::BackoffElapsed => {
                info!("Reconnecting to the scale");
                self.start_scan();
            }
        }
    }

    fn start_scan(&mut self) {
        self.buffer.clear();
        self.published.diagnostics.begin_attempt();
        self.set_state(ConnectionState::Scanning);
        self.step = Some(
            find_device(
                self.transport.clone(),
                self.config.device_filter(),
                self.config.scan_timeout,
            )
            .map(Step::<T>::Scanned)
            .boxed(),
        );
    }

    fn enter_connected(&mut self) {
        // interval_at panics on a zero period
        let period = self.config.heartbeat_interval.max(Duration::from_millis(1));
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);
        self.heartbeat_failures = 0;
        self.reconnecting = false;
        self.set_state(ConnectionState::Connected);
        self.published.last_error.send_replace(None);
        if let Some(reply) = self.connect_reply.take() {
            let _ = reply.send(Ok(()));
        }
    }

    /// Report a failed connection attempt. Never retried from here.
    async fn fail_attempt(&mut self, err: ScaleError) {
        warn!("Connection attempt failed: {err}");
        self.teardown().await;
        if self.reconnecting {
            info!("Reconnection failed, automatic reconnection disabled");
            self.auto_reconnect = false;
            self.reconnecting = false;
        }
        self.set_state(ConnectionState::Disconnected);
        self.published.last_error.send_replace(Some(err.clone()));
        if let Some(reply) = self.connect_reply.take() {
            let _ = reply.send(Err(err));
        }
    }

    async fn handle_link_lost(&mut self) {
        match self.state {
            ConnectionState::Connected => {
                warn!("Lost the connection to the scale");
                self.published.diagnostics.record_unexpected_disconnect();
                self.teardown().await;
                if self.auto_reconnect {
                    self.reconnecting = true;
                    self.set_state(ConnectionState::Reconnecting);
                    let backoff = self.config.reconnect_backoff;
                    self.step = Some(
                        async move {
                            time::sleep(backoff).await;
                            Step::<T>::BackoffElapsed
                        }
                        .boxed(),
                    );
                } else {
                    self.set_state(ConnectionState::Disconnected);
                }
            }
            ConnectionState::Handshaking => {
                self.fail_attempt(ScaleError::HandshakeFailed(
                    "connection lost during handshake".to_string(),
                ))
                .await
            }
            _ => self.inbound = None,
        }
    }

    /// Explicit disconnect. Valid from any state, always ends in `Disconnected`.
    async fn disconnect(&mut self) {
        self.auto_reconnect = false;
        self.reconnecting = false;
        if !self.state.is_active() {
            return;
        }
        info!("Disconnecting from the scale");
        self.teardown().await;
        if let Some(reply) = self.connect_reply.take() {
            let _ = reply.send(Err(ScaleError::Cancelled));
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Cancel every timer and step, drop the receive buffer and close the session.
    async fn teardown(&mut self) {
        self.step = None;
        self.heartbeat = None;
        self.inbound = None;
        self.buffer.clear();
        if let Some(session) = self.session.take() {
            let timeout = self.config.write_timeout;
            match time::timeout(timeout, self.transport.disconnect(&session)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("Failed to disconnect from the scale: {err}"),
                Err(_) => warn!("Timed out disconnecting from the scale"),
            }
        }
    }

    fn set_state(&mut self, next: ConnectionState) {
        let previous = std::mem::replace(&mut self.state, next);
        if previous == next {
            return;
        }
        if previous == ConnectionState::Connected {
            self.published.diagnostics.session_ended();
        }
        if next == ConnectionState::Connected {
            self.published.diagnostics.session_started();
        }
        info!("Scale link {previous} -> {next}");
        self.published.state.send_replace(next);
    }

    async fn tare(&mut self) -> Result<(), ScaleError> {
        if self.state != ConnectionState::Connected {
            return Err(ScaleError::NotConnected);
        }
        let session = self.session.as_ref().ok_or(ScaleError::NotConnected)?;
        write_command(
            self.transport.as_ref(),
            session,
            Command::Tare,
            self.config.write_timeout,
            &self.published.diagnostics,
        )
        .await
        .map_err(|err| ScaleError::WriteFailed(err.to_string()))
    }

    async fn send_heartbeat(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let result = write_command(
            self.transport.as_ref(),
            session,
            Command::Heartbeat,
            self.config.write_timeout,
            &self.published.diagnostics,
        )
        .await;
        match result {
            Ok(()) => {
                self.heartbeat_failures = 0;
                self.published.diagnostics.record_heartbeat();
            }
            Err(err) => {
                self.heartbeat_failures += 1;
                warn!("Heartbeat failed ({} in a row): {err}", self.heartbeat_failures);
                // The notify stream does not always close when the device goes away
                let gone = matches!(err, TransportError::NotConnected | TransportError::Timeout(_));
                if gone || self.heartbeat_failures >= Self::MAX_HEARTBEAT_FAILURES {
                    self.handle_link_lost().await;
                }
            }
        }
    }

    fn handle_chunk(&mut self, chunk: &[u8]) {
        debug!("RX: {}", hex::encode(chunk));
        let diagnostics = &self.published.diagnostics;
        diagnostics.record_notification();
        self.buffer.extend(chunk);
        let drained = self.buffer.drain_frames();
        diagnostics.record_drain(&drained);
        for frame in &drained.frames {
            self.apply(message::interpret(frame));
        }
    }

    fn apply(&self, event: Event) {
        let published = &self.published;
        match event {
            Event::Weight(sample) => self.publish_weight(sample),
            Event::Battery(level) => {
                published.battery.send_replace(Some(level));
                let _ = published.events.send(ScaleEvent::Battery(level));
            }
            Event::Button(button, weight) => {
                debug!("Button pressed on the scale: {button:?}");
                let _ = published.events.send(ScaleEvent::Button(button));
                if let Some(sample) = weight {
                    self.publish_weight(sample);
                }
            }
            Event::Ignored(reason) => {
                debug!("Ignored frame: {reason:?}");
                published.diagnostics.record_ignored(reason);
            }
        }
    }

    fn publish_weight(&self, sample: WeightSample) {
        self.published.weight.send_replace(Some(sample));
        let _ = self.published.events.send(ScaleEvent::Weight(sample));
    }
}

async fn find_device<T: Transport>(
    transport: Arc<T>,
    filter: DeviceFilter,
    scan_timeout: Duration,
) -> Result<T::Device, TransportError> {
    time::timeout(scan_timeout, transport.wait_available())
        .await
        .map_err(|_| TransportError::Unavailable("the adapter did not become ready".to_string()))??;
    time::timeout(scan_timeout, transport.scan(&filter))
        .await
        .map_err(|_| TransportError::Timeout(scan_timeout))?
}

/// Identify, subscribe to notifications and send the first heartbeat, pausing between
/// writes so the scale keeps up.
async fn handshake<T: Transport>(
    transport: Arc<T>,
    session: T::Session,
    diagnostics: Arc<DiagnosticsRecorder>,
    step_delay: Duration,
    write_timeout: Duration,
) -> Result<(), TransportError> {
    let sequence = [Command::Identify, Command::NotificationRequest, Command::Heartbeat];
    for (i, command) in sequence.into_iter().enumerate() {
        if i > 0 {
            time::sleep(step_delay).await;
        }
        write_command(transport.as_ref(), &session, command, write_timeout, &diagnostics).await?;
    }
    diagnostics.record_heartbeat();
    Ok(())
}

async fn write_command<T: Transport>(
    transport: &T,
    session: &T::Session,
    command: Command,
    write_timeout: Duration,
    diagnostics: &DiagnosticsRecorder,
) -> Result<(), TransportError> {
    let bytes = frame::encode(command);
    debug!("TX {command:?}: {}", hex::encode(&bytes));
    time::timeout(write_timeout, transport.write(session, &bytes))
        .await
        .map_err(|_| TransportError::Timeout(write_timeout))??;
    diagnostics.record_write();
    Ok(())
}

async fn next_step<S>(step: &mut Option<BoxFuture<'static, S>>) -> S {
    match step {
        Some(in_flight) => {
            let output = in_flight.await;
            *step = None;
            output
        }
        None => future::pending().await,
    }
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn next_chunk(inbound: &mut Option<mpsc::Receiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match inbound {
        Some(receiver) => receiver.recv().await,
        None => future::pending().await,
    }
}
