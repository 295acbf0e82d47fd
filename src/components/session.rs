//! Device Session Component
//!
//! This module implements the lifecycle of one sensor: the connection state
//! machine, the reception worker that reads from the transport, and the
//! decode → validate → buffer → smooth → aggregate pipeline that turns each
//! line into updated device state.
//!
//! The reception worker is the only writer of a session's state. Readers take
//! snapshots under the same lock, so they never observe a half-applied line.
use crate::api::controller::{Transport, TransportProvider};
use crate::components::transport::LineAssembler;
use crate::math::{metrics::Metrics, validation::Validated};
use crate::model::{
    device::{ConnectionStatus, DeviceState},
    reading::Reading,
};
use anyhow::{anyhow, Result};
use log::{debug, error, trace, warn};
use rust_fsm::*;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

state_machine! {
    #[derive(Debug)]
    device_link(Disconnected)

    Disconnected => {
        Connect => Connecting,
        Disconnect => Disconnected
    },
    Connecting => {
        Opened => Connected,
        OpenFailed => Error,
        TransportFailed => Error,
        Disconnect => Disconnected
    },
    Connected => {
        Data => Receiving,
        NoFinger => NoFinger,
        TransportFailed => Error,
        Disconnect => Disconnected
    },
    Receiving => {
        Data => Receiving,
        NoFinger => NoFinger,
        TransportFailed => Error,
        Disconnect => Disconnected
    },
    NoFinger => {
        Data => Receiving,
        NoFinger => NoFinger,
        TransportFailed => Error,
        Disconnect => Disconnected
    },
    Error => {
        Connect => Connecting,
        TransportFailed => Error,
        Disconnect => Disconnected
    }
}

use device_link::Input;

/// What happened to a single line handed to the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineOutcome {
    /// The line was decoded and its valid values were admitted.
    Processed,
    /// The line carried `STATUS:NO_FINGER`; no buffer was touched.
    NoFinger,
    /// The line could not be decoded or belonged to another device.
    Dropped,
    /// The session is not receiving; the line was ignored.
    Ignored,
}

/// State machine plus the data it guards.
struct SessionCore {
    machine: device_link::StateMachine,
    state: DeviceState,
    /// Bumped on every connect and disconnect; an open that finishes under a
    /// different epoch belongs to an abandoned attempt.
    epoch: u64,
}

impl SessionCore {
    fn new(device_id: u8) -> Self {
        Self {
            machine: device_link::StateMachine::new(),
            state: DeviceState::new(device_id),
            epoch: 0,
        }
    }

    fn status(&self) -> ConnectionStatus {
        match self.machine.state() {
            device_link::State::Disconnected => ConnectionStatus::Disconnected,
            device_link::State::Connecting => ConnectionStatus::Connecting,
            device_link::State::Connected => ConnectionStatus::Connected,
            device_link::State::Receiving => ConnectionStatus::Receiving,
            device_link::State::NoFinger => ConnectionStatus::NoFinger,
            device_link::State::Error => ConnectionStatus::Error,
        }
    }

    /// Feeds `input` to the state machine and mirrors the result into the
    /// device state. Returns `false` if the transition is not allowed.
    fn transition(&mut self, input: Input) -> bool {
        let before = self.status();
        if self.machine.consume(&input).is_err() {
            trace!(
                "device {}: input {:?} ignored in state {}",
                self.state.device_id,
                input,
                before
            );
            return false;
        }
        let after = self.status();
        self.state.connection_status = after;
        if before != after {
            debug!(
                "device {}: {} -> {} on {:?}",
                self.state.device_id, before, after, input
            );
        }
        true
    }

    fn fail(&mut self, reason: String) {
        warn!("device {}: transport failure: {}", self.state.device_id, reason);
        if self.transition(Input::TransportFailed) {
            self.state.discard_values();
            self.state.last_error = Some(reason);
        }
    }

    /// Counts partial lines the framer discarded for exceeding the length cap.
    fn count_overflows(&mut self, overflows: u64) {
        if overflows > 0 && self.accepts_data() {
            trace!(
                "device {}: discarded {} overlong line(s)",
                self.state.device_id,
                overflows
            );
            self.state.diagnostics.decode_errors += overflows;
        }
    }

    fn accepts_data(&self) -> bool {
        matches!(
            self.machine.state(),
            device_link::State::Connected
                | device_link::State::Receiving
                | device_link::State::NoFinger
        )
    }

    /// Runs one raw line through the pipeline.
    fn ingest(&mut self, line: &[u8], received_at: OffsetDateTime) -> LineOutcome {
        if !self.accepts_data() {
            return LineOutcome::Ignored;
        }
        let device_id = self.state.device_id;
        self.state.diagnostics.lines += 1;

        let reading = match Reading::decode_bytes(line, received_at) {
            Ok(reading) => reading,
            Err(e) => {
                trace!("device {}: dropping line: {}", device_id, e);
                self.state.diagnostics.decode_errors += 1;
                return LineOutcome::Dropped;
            }
        };
        if reading.device_id != device_id {
            trace!(
                "device {}: dropping line addressed to device {}",
                device_id,
                reading.device_id
            );
            self.state.diagnostics.decode_errors += 1;
            return LineOutcome::Dropped;
        }

        if reading.is_no_finger() {
            self.transition(Input::NoFinger);
            self.state.latest = Some(reading);
            return LineOutcome::NoFinger;
        }

        self.transition(Input::Data);
        let validated = Validated::from_reading(&reading);
        if reading.heart_rate.is_some() && validated.heart_rate.is_none() {
            self.state.diagnostics.hr_rejected += 1;
        }
        if reading.spo2.is_some() && validated.spo2.is_none() {
            self.state.diagnostics.spo2_rejected += 1;
        }

        let state = &mut self.state;
        if let Some(hr) = validated.heart_rate {
            state.hr_buffer.push(hr as f64);
            state.history.push(hr as f64, reading.device_timestamp);
            state.smoothed_hr = state.hr_buffer.median();
            state.metrics = Metrics::from_history(&state.history);
        }
        if let Some(spo2) = validated.spo2 {
            state.spo2_buffer.push(spo2 as f64);
            state.smoothed_spo2 = state.spo2_buffer.mean();
        }
        state.latest = Some(reading);
        LineOutcome::Processed
    }
}

/// Handle to a connection attempt and, once the transport is open, its
/// reception worker.
struct Worker {
    cancel: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

/// One physical sensor: its connection lifecycle, pipeline, and state.
pub struct DeviceSession {
    device_id: u8,
    core: Arc<RwLock<SessionCore>>,
    worker: Mutex<Option<Worker>>,
    idle: Duration,
}

impl DeviceSession {
    /// Creates a disconnected session.
    ///
    /// # Arguments
    /// - `device_id`: Id of the sensor, `1..=3`.
    /// - `idle`: Pause between reads that returned no data.
    pub fn new(device_id: u8, idle: Duration) -> Self {
        Self {
            device_id,
            core: Arc::new(RwLock::new(SessionCore::new(device_id))),
            worker: Mutex::new(None),
            idle,
        }
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    /// Returns an owned copy of the current state.
    pub async fn snapshot(&self) -> DeviceState {
        self.core.read().await.state.clone()
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.core.read().await.status()
    }

    /// Opens the transport named by `descriptor` and starts receiving.
    ///
    /// # Returns
    /// The status after the attempt: `Connected` on success, `Error` if the
    /// transport could not be opened.
    ///
    /// # Errors
    /// Fails if the session is already connecting or connected.
    pub async fn connect(
        &self,
        provider: &dyn TransportProvider,
        descriptor: &str,
    ) -> Result<ConnectionStatus> {
        let (cancel, mut cancel_rx) = watch::channel(false);
        let epoch = {
            let mut worker = self.worker.lock().await;
            let epoch = {
                let mut core = self.core.write().await;
                if !core.transition(Input::Connect) {
                    return Err(anyhow!(
                        "device {} is already {}",
                        self.device_id,
                        core.status()
                    ));
                }
                core.epoch += 1;
                core.state.clear_data();
                core.state.descriptor = Some(descriptor.to_string());
                core.state.last_error = None;
                core.epoch
            };
            // A worker that stopped on a transport failure is still parked here.
            if let Some(stale) = worker.replace(Worker {
                cancel,
                handle: None,
            }) {
                Self::join(self.device_id, stale).await;
            }
            epoch
        };

        // The worker lock is released while opening so `disconnect` can cancel.
        let opened = tokio::select! {
            biased;
            _ = cancel_rx.changed() => {
                debug!("device {}: open of {} cancelled", self.device_id, descriptor);
                // The canceller holds the worker lock until its transition is done.
                let _worker = self.worker.lock().await;
                return Ok(self.status().await);
            }
            opened = provider.open(descriptor) => opened,
        };

        let mut worker = self.worker.lock().await;
        let mut core = self.core.write().await;
        if core.epoch != epoch {
            debug!(
                "device {}: dropping transport of abandoned attempt on {}",
                self.device_id, descriptor
            );
            return Ok(core.status());
        }
        match opened {
            Ok(transport) => {
                core.transition(Input::Opened);
                drop(core);
                let handle = tokio::spawn(Self::receive(
                    self.core.clone(),
                    transport,
                    cancel_rx,
                    self.idle,
                ));
                if let Some(attempt) = worker.as_mut() {
                    attempt.handle = Some(handle);
                }
                debug!("device {}: receiving from {}", self.device_id, descriptor);
                Ok(ConnectionStatus::Connected)
            }
            Err(e) => {
                warn!(
                    "device {}: could not open {}: {}",
                    self.device_id, descriptor, e
                );
                core.transition(Input::OpenFailed);
                core.state.last_error = Some(e.to_string());
                Ok(core.status())
            }
        }
    }

    /// Stops the reception worker or a pending open, waits for the worker to
    /// exit, then discards all buffered data.
    pub async fn disconnect(&self) {
        let mut worker = self.worker.lock().await;
        if let Some(running) = worker.take() {
            Self::join(self.device_id, running).await;
        }
        let mut core = self.core.write().await;
        core.epoch += 1;
        core.transition(Input::Disconnect);
        core.state.clear_data();
        core.state.descriptor = None;
        core.state.last_error = None;
    }

    /// Clears buffers, history and metrics while staying connected.
    pub async fn reset(&self) {
        self.core.write().await.state.clear_data();
        debug!("device {}: data reset", self.device_id);
    }

    /// Pushes one line through the pipeline as if it had been received.
    ///
    /// Lines arriving while the session is not connected are ignored.
    #[cfg(test)]
    async fn ingest_line(&self, line: &str) -> LineOutcome {
        self.core
            .write()
            .await
            .ingest(line.as_bytes(), OffsetDateTime::now_utc())
    }

    async fn join(device_id: u8, worker: Worker) {
        // The receiver may already be gone if the worker exited on its own.
        let _ = worker.cancel.send(true);
        if let Some(handle) = worker.handle {
            if let Err(e) = handle.await {
                error!("device {}: reception worker panicked: {}", device_id, e);
            }
        }
    }

    /// Reception loop; runs until cancelled or the transport fails.
    async fn receive(
        core: Arc<RwLock<SessionCore>>,
        mut transport: Box<dyn Transport>,
        mut cancel: watch::Receiver<bool>,
        idle: Duration,
    ) {
        let mut assembler = LineAssembler::default();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.changed() => break,
                chunk = transport.read() => chunk,
            };
            match chunk {
                Ok(Some(bytes)) if bytes.is_empty() => {
                    tokio::select! {
                        biased;
                        _ = cancel.changed() => break,
                        _ = tokio::time::sleep(idle) => {}
                    }
                }
                Ok(Some(bytes)) => {
                    let lines = assembler.push(&bytes);
                    let overflows = assembler.take_overflows();
                    if lines.is_empty() && overflows == 0 {
                        continue;
                    }
                    let received_at = OffsetDateTime::now_utc();
                    let mut core = core.write().await;
                    if *cancel.borrow() {
                        break;
                    }
                    core.count_overflows(overflows);
                    for line in lines {
                        core.ingest(&line, received_at);
                    }
                }
                Ok(None) => {
                    core.write()
                        .await
                        .fail("transport closed unexpectedly".to_string());
                    break;
                }
                Err(e) => {
                    core.write().await.fail(e.to_string());
                    break;
                }
            }
        }
        trace!("reception worker finished");
    }
}

impl Drop for DeviceSession {
    /// Aborts a worker that was never joined.
    fn drop(&mut self) {
        if let Some(handle) = self.worker.get_mut().take().and_then(|w| w.handle) {
            handle.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::constants::{HISTORY_CAPACITY, SMOOTHING_CAPACITY};
    use async_trait::async_trait;
    use mockall::mock;
    use tokio::sync::mpsc;

    /// Transport fed from a channel; dropping the sender closes the stream.
    pub(crate) struct ScriptedTransport {
        rx: mpsc::UnboundedReceiver<Result<Vec<u8>>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn read(&mut self) -> Result<Option<Vec<u8>>> {
            match self.rx.recv().await {
                Some(Ok(bytes)) => Ok(Some(bytes)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        }
    }

    /// Provider that hands out one scripted transport per `open`.
    pub(crate) struct ScriptedProvider {
        transports: std::sync::Mutex<Vec<ScriptedTransport>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(count: usize) -> (Self, Vec<mpsc::UnboundedSender<Result<Vec<u8>>>>) {
            let (senders, transports) = (0..count)
                .map(|_| {
                    let (tx, rx) = mpsc::unbounded_channel();
                    (tx, ScriptedTransport { rx })
                })
                .unzip::<_, _, Vec<_>, Vec<_>>();
            (
                Self {
                    transports: std::sync::Mutex::new(transports),
                },
                senders,
            )
        }
    }

    #[async_trait]
    impl TransportProvider for ScriptedProvider {
        async fn open(&self, _descriptor: &str) -> Result<Box<dyn Transport>> {
            let mut transports = self.transports.lock().unwrap();
            if transports.is_empty() {
                return Err(anyhow!("no transport left"));
            }
            Ok(Box::new(transports.remove(0)))
        }
    }

    mock! {
        Provider {}

        #[async_trait]
        impl TransportProvider for Provider {
            async fn open(&self, descriptor: &str) -> Result<Box<dyn Transport>>;
        }
    }

    /// Polls until `check` holds on a snapshot, failing after a second.
    pub(crate) async fn wait_for<F: Fn(&DeviceState) -> bool>(
        session: &DeviceSession,
        check: F,
    ) -> DeviceState {
        for _ in 0..200 {
            let state = session.snapshot().await;
            if check(&state) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached: {:?}", session.snapshot().await);
    }

    fn line(hr: i64, spo2: i64, ts: i64) -> String {
        format!(
            "DEV:1,HR:{},HR_VALID:1,SPO2:{},SPO2_VALID:1,IR_AVG:100000,IR_RANGE:50,TIMESTAMP:{}",
            hr, spo2, ts
        )
    }

    async fn connected_session() -> DeviceSession {
        let session = DeviceSession::new(1, Duration::from_millis(1));
        let mut provider = MockProvider::new();
        provider.expect_open().returning(|_| {
            let (tx, rx) = mpsc::unbounded_channel();
            // Keep the stream open for the lifetime of the test.
            std::mem::forget(tx);
            Ok(Box::new(ScriptedTransport { rx }))
        });
        assert_eq!(
            session.connect(&provider, "mock").await.unwrap(),
            ConnectionStatus::Connected
        );
        session
    }

    #[tokio::test]
    async fn test_new_session_is_disconnected() {
        let session = DeviceSession::new(2, Duration::from_millis(1));
        let state = session.snapshot().await;
        assert_eq!(state.device_id, 2);
        assert_eq!(state.connection_status, ConnectionStatus::Disconnected);
        assert_eq!(session.ingest_line(&line(70, 98, 0)).await, LineOutcome::Ignored);
        assert!(session.snapshot().await.hr_buffer.is_empty());
    }

    #[tokio::test]
    async fn test_open_failure_moves_to_error() {
        let session = DeviceSession::new(1, Duration::from_millis(1));
        let mut provider = MockProvider::new();
        provider
            .expect_open()
            .times(1)
            .returning(|_| Err(anyhow!("no such device")));
        let status = session.connect(&provider, "tcp://nowhere:1").await.unwrap();
        assert_eq!(status, ConnectionStatus::Error);
        let state = session.snapshot().await;
        assert_eq!(state.last_error.as_deref(), Some("no such device"));
        assert_eq!(state.display_hr(), "--");
    }

    #[tokio::test]
    async fn test_retry_after_open_failure() {
        let session = DeviceSession::new(1, Duration::from_millis(1));
        let mut provider = MockProvider::new();
        provider
            .expect_open()
            .times(1)
            .returning(|_| Err(anyhow!("busy")));
        session.connect(&provider, "a").await.unwrap();

        let (scripted, _senders) = ScriptedProvider::new(1);
        let status = session.connect(&scripted, "a").await.unwrap();
        assert_eq!(status, ConnectionStatus::Connected);
        assert_eq!(session.snapshot().await.last_error, None);
    }

    #[tokio::test]
    async fn test_double_connect_rejected() {
        let session = connected_session().await;
        let (scripted, _senders) = ScriptedProvider::new(1);
        assert!(session.connect(&scripted, "again").await.is_err());
        assert_eq!(session.status().await, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_pipeline_updates_state() {
        let session = connected_session().await;
        for (i, hr) in [72, 75, 73, 76, 74].iter().enumerate() {
            let outcome = session.ingest_line(&line(*hr, 97, i as i64 * 1000)).await;
            assert_eq!(outcome, LineOutcome::Processed);
        }
        let state = session.snapshot().await;
        assert_eq!(state.connection_status, ConnectionStatus::Receiving);
        assert_eq!(state.smoothed_hr, Some(74.0));
        assert_eq!(state.smoothed_spo2, Some(97.0));
        assert_eq!(state.metrics.bpm, Some(74.0));
        assert_eq!(state.metrics.ipm, Some(74.0));
        assert!((state.metrics.rmssd.unwrap() - 6.5f64.sqrt()).abs() < 1e-9);
        assert_eq!(state.history.timestamps(), vec![0, 1000, 2000, 3000, 4000]);
        assert_eq!(state.latest.unwrap().heart_rate, Some(74));
    }

    #[tokio::test]
    async fn test_invalid_values_never_reach_buffers() {
        let session = connected_session().await;
        let rejected = [
            "DEV:1,HR:39,HR_VALID:1,SPO2:69,SPO2_VALID:1",
            "DEV:1,HR:201,HR_VALID:1,SPO2:101,SPO2_VALID:1",
            "DEV:1,HR:80,HR_VALID:0,SPO2:98,SPO2_VALID:0",
            "DEV:1,HR:-1,HR_VALID:1",
        ];
        for l in rejected {
            assert_eq!(session.ingest_line(l).await, LineOutcome::Processed);
        }
        let state = session.snapshot().await;
        assert!(state.hr_buffer.is_empty());
        assert!(state.spo2_buffer.is_empty());
        assert!(state.history.is_empty());
        assert!(!state.metrics.is_available());
        assert_eq!(state.diagnostics.hr_rejected, 4);
        assert_eq!(state.diagnostics.spo2_rejected, 3);
    }

    #[tokio::test]
    async fn test_decode_failures_are_swallowed() {
        let session = connected_session().await;
        session.ingest_line(&line(70, 98, 0)).await;
        assert_eq!(session.ingest_line("HR:70").await, LineOutcome::Dropped);
        assert_eq!(session.ingest_line("DEV:1,HR:x").await, LineOutcome::Dropped);
        assert_eq!(session.ingest_line("DEV:2,HR:70").await, LineOutcome::Dropped);
        let state = session.snapshot().await;
        assert_eq!(state.connection_status, ConnectionStatus::Receiving);
        assert_eq!(state.diagnostics.decode_errors, 3);
        assert_eq!(state.diagnostics.lines, 4);
        assert_eq!(state.hr_buffer.len(), 1);
    }

    #[tokio::test]
    async fn test_identical_lines_are_not_deduplicated() {
        let session = connected_session().await;
        let l = line(70, 98, 5);
        session.ingest_line(&l).await;
        session.ingest_line(&l).await;
        let state = session.snapshot().await;
        assert_eq!(state.hr_buffer.len(), 2);
        assert_eq!(state.spo2_buffer.len(), 2);
        assert_eq!(state.history.len(), 2);
    }

    #[tokio::test]
    async fn test_no_finger_keeps_buffers() {
        let session = connected_session().await;
        for hr in [70, 71, 72] {
            session.ingest_line(&line(hr, 98, 0)).await;
        }
        let before = session.snapshot().await;
        let outcome = session
            .ingest_line("DEV:1,STATUS:NO_FINGER,HR:150,HR_VALID:1,IR_AVG:900")
            .await;
        assert_eq!(outcome, LineOutcome::NoFinger);
        let after = session.snapshot().await;
        assert_eq!(after.connection_status, ConnectionStatus::NoFinger);
        assert_eq!(after.hr_buffer, before.hr_buffer);
        assert_eq!(after.spo2_buffer, before.spo2_buffer);
        assert_eq!(after.history, before.history);
        assert_eq!(after.smoothed_hr, before.smoothed_hr);

        session.ingest_line(&line(73, 98, 0)).await;
        let resumed = session.snapshot().await;
        assert_eq!(resumed.connection_status, ConnectionStatus::Receiving);
        assert_eq!(resumed.hr_buffer.values(), vec![70.0, 71.0, 72.0, 73.0]);
    }

    #[tokio::test]
    async fn test_buffer_capacities() {
        let session = connected_session().await;
        for i in 0..(HISTORY_CAPACITY + 10) {
            session.ingest_line(&line(60 + (i % 50) as i64, 98, i as i64)).await;
        }
        let state = session.snapshot().await;
        assert_eq!(state.hr_buffer.len(), SMOOTHING_CAPACITY);
        assert_eq!(state.spo2_buffer.len(), SMOOTHING_CAPACITY);
        assert_eq!(state.history.len(), HISTORY_CAPACITY);
        assert_eq!(state.history.timestamps().len(), HISTORY_CAPACITY);
    }

    #[tokio::test]
    async fn test_worker_processes_stream() {
        let session = DeviceSession::new(1, Duration::from_millis(1));
        let (provider, senders) = ScriptedProvider::new(1);
        session.connect(&provider, "scripted").await.unwrap();

        let tx = &senders[0];
        tx.send(Ok(b"DEV:1,HR:70,HR_VALID:1\nDEV:1,HR:".to_vec())).unwrap();
        tx.send(Ok(Vec::new())).unwrap();
        tx.send(Ok(b"71,HR_VALID:1\nDEV:1,HR:72,HR_VALID:1\n".to_vec()))
            .unwrap();

        let state = wait_for(&session, |s| s.history.len() == 3).await;
        assert_eq!(state.connection_status, ConnectionStatus::Receiving);
        assert_eq!(state.smoothed_hr, Some(71.0));
    }

    #[tokio::test]
    async fn test_transport_error_moves_to_error() {
        let session = DeviceSession::new(1, Duration::from_millis(1));
        let (provider, senders) = ScriptedProvider::new(1);
        session.connect(&provider, "scripted").await.unwrap();
        senders[0]
            .send(Ok(b"DEV:1,HR:70,HR_VALID:1\n".to_vec()))
            .unwrap();
        senders[0].send(Err(anyhow!("link lost"))).unwrap();

        let state = wait_for(&session, |s| s.connection_status == ConnectionStatus::Error).await;
        assert_eq!(state.last_error.as_deref(), Some("link lost"));
        assert_eq!(state.display_hr(), "--");
        assert!(state.history.is_empty());
        assert_eq!(
            session.ingest_line("DEV:1,HR:70,HR_VALID:1").await,
            LineOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_error_state_discards_values() {
        let session = DeviceSession::new(1, Duration::from_millis(1));
        let (provider, senders) = ScriptedProvider::new(1);
        session.connect(&provider, "scripted").await.unwrap();
        let batch: String = [line(70, 97, 0), line(72, 98, 1000), line(74, 99, 2000)]
            .iter()
            .map(|l| format!("{}\n", l))
            .collect();
        senders[0].send(Ok(batch.into_bytes())).unwrap();
        let live = wait_for(&session, |s| s.history.len() == 3).await;
        assert_eq!(live.smoothed_hr, Some(72.0));
        assert!(live.metrics.is_available());

        senders[0].send(Err(anyhow!("link lost"))).unwrap();
        let state = wait_for(&session, |s| s.connection_status == ConnectionStatus::Error).await;
        assert_eq!(state.smoothed_hr, None);
        assert_eq!(state.smoothed_spo2, None);
        assert_eq!(state.metrics.bpm, None);
        assert_eq!(state.metrics.ipm, None);
        assert_eq!(state.metrics.hrstd, None);
        assert_eq!(state.metrics.rmssd, None);
        assert!(state.latest.is_none());
        assert!(state.hr_buffer.is_empty());
        assert!(state.spo2_buffer.is_empty());
        assert!(state.history.is_empty());
        assert!(state.trend().is_empty());
        // Counters survive so the failure can still be diagnosed.
        assert_eq!(state.diagnostics.lines, 3);
    }

    #[tokio::test]
    async fn test_overlong_line_counted_as_decode_error() {
        let session = DeviceSession::new(1, Duration::from_millis(1));
        let (provider, senders) = ScriptedProvider::new(1);
        session.connect(&provider, "scripted").await.unwrap();
        senders[0].send(Ok(vec![b'x'; 5000])).unwrap();
        senders[0]
            .send(Ok(b"\nDEV:1,HR:70,HR_VALID:1\n".to_vec()))
            .unwrap();

        let state = wait_for(&session, |s| s.history.len() == 1).await;
        assert_eq!(state.diagnostics.decode_errors, 1);
        assert_eq!(state.diagnostics.lines, 1);
        assert_eq!(state.connection_status, ConnectionStatus::Receiving);
    }

    /// Provider whose `open` never completes, like a stalled TCP handshake.
    struct HangingProvider;

    #[async_trait]
    impl TransportProvider for HangingProvider {
        async fn open(&self, _descriptor: &str) -> Result<Box<dyn Transport>> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_open() {
        let session = Arc::new(DeviceSession::new(1, Duration::from_millis(1)));
        let connecting = {
            let session = session.clone();
            tokio::spawn(async move { session.connect(&HangingProvider, "tcp://stalled:1").await })
        };
        wait_for(&session, |s| s.connection_status == ConnectionStatus::Connecting).await;

        tokio::time::timeout(Duration::from_secs(2), session.disconnect())
            .await
            .expect("disconnect blocked by a pending open");
        assert_eq!(session.status().await, ConnectionStatus::Disconnected);

        let status = tokio::time::timeout(Duration::from_secs(2), connecting)
            .await
            .expect("connect did not return after cancellation")
            .unwrap()
            .unwrap();
        assert_eq!(status, ConnectionStatus::Disconnected);

        // The abandoned attempt leaves nothing behind that blocks a new one.
        let (provider, _senders) = ScriptedProvider::new(1);
        assert_eq!(
            session.connect(&provider, "scripted").await.unwrap(),
            ConnectionStatus::Connected
        );
    }

    #[tokio::test]
    async fn test_transport_eof_moves_to_error() {
        let session = DeviceSession::new(1, Duration::from_millis(1));
        let (provider, mut senders) = ScriptedProvider::new(1);
        session.connect(&provider, "scripted").await.unwrap();
        senders.clear();
        let state = wait_for(&session, |s| s.connection_status == ConnectionStatus::Error).await;
        assert!(state.last_error.is_some());
    }

    #[tokio::test]
    async fn test_disconnect_stops_worker_and_clears() {
        let session = DeviceSession::new(1, Duration::from_millis(1));
        let (provider, senders) = ScriptedProvider::new(1);
        session.connect(&provider, "scripted").await.unwrap();
        senders[0]
            .send(Ok(b"DEV:1,HR:70,HR_VALID:1\nDEV:1,HR:71,HR_VALID:1\n".to_vec()))
            .unwrap();
        wait_for(&session, |s| s.history.len() == 2).await;

        session.disconnect().await;
        let state = session.snapshot().await;
        assert_eq!(state.connection_status, ConnectionStatus::Disconnected);
        assert!(state.history.is_empty());
        assert!(state.hr_buffer.is_empty());
        assert_eq!(state.descriptor, None);

        // The worker is gone: its transport was dropped and nothing mutates state.
        assert!(senders[0]
            .send(Ok(b"DEV:1,HR:90,HR_VALID:1\n".to_vec()))
            .is_err());
        assert_eq!(
            session.ingest_line("DEV:1,HR:90,HR_VALID:1").await,
            LineOutcome::Ignored
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        let state = session.snapshot().await;
        assert!(state.history.is_empty());
        assert_eq!(state.diagnostics.lines, 0);
    }

    #[tokio::test]
    async fn test_reconnect_starts_fresh() {
        let session = DeviceSession::new(1, Duration::from_millis(1));
        let (provider, senders) = ScriptedProvider::new(2);
        session.connect(&provider, "first").await.unwrap();
        senders[0]
            .send(Ok(b"DEV:1,HR:70,HR_VALID:1\n".to_vec()))
            .unwrap();
        wait_for(&session, |s| s.history.len() == 1).await;
        session.disconnect().await;

        session.connect(&provider, "second").await.unwrap();
        let state = session.snapshot().await;
        assert_eq!(state.connection_status, ConnectionStatus::Connected);
        assert!(state.history.is_empty());
        assert_eq!(state.descriptor.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_reset_keeps_connection() {
        let session = connected_session().await;
        session.ingest_line(&line(70, 98, 0)).await;
        session.reset().await;
        let state = session.snapshot().await;
        assert_eq!(state.connection_status, ConnectionStatus::Receiving);
        assert!(state.history.is_empty());
        assert!(state.latest.is_none());
    }
}
