//! Per-job status connection manager.
//!
//! [`ConnectionManager::start`] spawns one task that owns the WebSocket,
//! the heartbeat interval, the reconnect timer and the
//! [`ConnectionState`]. The task turns socket and timer activity into
//! [`ConnectionEvent`]s, runs them through the state machine and performs
//! the resulting [`Action`]s. Status frames are folded into the job
//! snapshot, which is published through a [`tokio::sync::watch`] channel
//! together with the connection state.
//!
//! [`ConnectionManager::stop`] cancels the task and waits for it to exit,
//! so nothing from a stopped manager touches shared state afterwards.

use std::collections::VecDeque;
use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use vimax_core::error::CoreError;
use vimax_core::types::{validate_job_id, JobId};

use crate::client::{ClientError, StatusClient, StatusStream};
use crate::config::SyncConfig;
use crate::events::SyncEvent;
use crate::job::Job;
use crate::messages::{decode, encode, ControlFrame, Frame, JobUpdate};
use crate::state::{Action, ConnectionEvent, ConnectionState, Phase};

/// Broadcast channel capacity for lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long [`ConnectionManager::stop`] waits for the task before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the live status connection for one job.
///
/// [`stop`](Self::stop) is the disposal path: it closes the socket with a
/// closing handshake and returns once the timers are gone. Dropping the
/// manager without stopping aborts the task, which drops the socket and
/// the timers without a closing handshake.
pub struct ConnectionManager {
    job_id: JobId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    state_rx: watch::Receiver<ConnectionState>,
    job_rx: watch::Receiver<Job>,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl ConnectionManager {
    /// Start tracking `job_id` with an empty snapshot.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &SyncConfig, job_id: impl Into<JobId>) -> Result<Self, CoreError> {
        Self::start_from(config, Job::new(job_id))
    }

    /// Start tracking a job whose snapshot is already known (e.g. fetched
    /// over REST). Live updates are merged on top of it.
    pub fn start_from(config: &SyncConfig, job: Job) -> Result<Self, CoreError> {
        validate_job_id(&job.job_id)?;

        let job_id = job.job_id.clone();
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let (job_tx, job_rx) = watch::channel(job);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let driver = Driver {
            client: StatusClient::new(job_id.clone(), config.job_url(&job_id)),
            config: config.clone(),
            state: ConnectionState::default(),
            socket: None,
            heartbeat: None,
            reconnect: None,
            state_tx,
            job_tx,
            event_tx: event_tx.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(driver.run());

        Ok(Self {
            job_id,
            cancel,
            task: Some(task),
            state_rx,
            job_rx,
            event_tx,
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Current job snapshot.
    pub fn job(&self) -> Job {
        self.job_rx.borrow().clone()
    }

    /// Receiver that observes every connection state change.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Receiver that observes every job snapshot change.
    pub fn watch_job(&self) -> watch::Receiver<Job> {
        self.job_rx.clone()
    }

    /// Subscribe to lifecycle events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Whether the connection task is still alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel timers, close the socket and wait for the task to exit.
    ///
    /// Safe to call more than once.
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        let Some(mut task) = self.task.take() else {
            return;
        };

        match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
            Ok(Ok(())) => {
                tracing::debug!(job_id = %self.job_id, "Status connection stopped");
            }
            Ok(Err(e)) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Status connection task failed");
            }
            Err(_) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    "Status connection did not stop in time, aborting",
                );
                task.abort();
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

/// What woke the connection task.
enum Input {
    Cancelled,
    RetryDue,
    HeartbeatDue,
    Message(Option<Result<Message, tungstenite::Error>>),
}

/// State owned by the connection task.
struct Driver {
    client: StatusClient,
    config: SyncConfig,
    state: ConnectionState,
    socket: Option<StatusStream>,
    heartbeat: Option<Interval>,
    reconnect: Option<Pin<Box<Sleep>>>,
    state_tx: watch::Sender<ConnectionState>,
    job_tx: watch::Sender<Job>,
    event_tx: broadcast::Sender<SyncEvent>,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(mut self) {
        tracing::info!(job_id = %self.client.job_id(), "Starting status connection task");
        self.dispatch(VecDeque::from([ConnectionEvent::Start])).await;

        loop {
            let input = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Input::Cancelled,
                _ = reconnect_due(&mut self.reconnect) => Input::RetryDue,
                _ = heartbeat_due(&mut self.heartbeat) => Input::HeartbeatDue,
                msg = next_message(&mut self.socket) => Input::Message(msg),
            };

            let mut queue = VecDeque::new();
            match input {
                Input::Cancelled => {
                    self.dispatch(VecDeque::from([ConnectionEvent::Stop])).await;
                    break;
                }
                Input::RetryDue => {
                    self.reconnect = None;
                    queue.push_back(ConnectionEvent::RetryElapsed);
                }
                Input::HeartbeatDue => queue.push_back(ConnectionEvent::HeartbeatTick),
                Input::Message(msg) => self.on_message(msg, &mut queue).await,
            }
            self.dispatch(queue).await;
        }

        tracing::info!(job_id = %self.client.job_id(), "Status connection task exited");
    }

    /// Run queued events through the state machine, performing each
    /// transition's actions before the next event.
    async fn dispatch(&mut self, mut queue: VecDeque<ConnectionEvent>) {
        while let Some(event) = queue.pop_front() {
            if event != ConnectionEvent::Stop && self.cancel.is_cancelled() {
                return;
            }

            let before = self.state.clone();
            let actions = self.state.handle(event, &self.config.reconnect);
            if self.state != before {
                self.publish_state();
            }

            for action in actions {
                self.perform(action, &mut queue).await;
            }
        }
    }

    async fn perform(&mut self, action: Action, queue: &mut VecDeque<ConnectionEvent>) {
        match action {
            Action::Open => self.open(queue).await,
            Action::StartHeartbeat => {
                let period = self.config.heartbeat_interval;
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat = Some(interval);
            }
            Action::CancelHeartbeat => self.heartbeat = None,
            Action::ScheduleReconnect(delay) => {
                let attempt = self.state.reconnect_attempts();
                tracing::info!(
                    job_id = %self.client.job_id(),
                    attempt,
                    max_attempts = self.config.reconnect.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Status channel lost, scheduling reconnect",
                );
                self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
                let _ = self.event_tx.send(SyncEvent::ReconnectScheduled {
                    job_id: self.client.job_id().to_string(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });
            }
            Action::CancelReconnect => self.reconnect = None,
            Action::SendPing => self.send_control(ControlFrame::Ping, queue).await,
            Action::Close => self.close_socket().await,
        }
    }

    async fn open(&mut self, queue: &mut VecDeque<ConnectionEvent>) {
        self.socket = None;

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            result = self.client.connect() => result,
        };

        match result {
            Ok(conn) => {
                self.socket = Some(conn.ws_stream);
                queue.push_back(ConnectionEvent::Opened);
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %self.client.job_id(),
                    error = %e,
                    "Status channel connect failed",
                );
                queue.push_back(ConnectionEvent::TransportError);
                queue.push_back(ConnectionEvent::Closed { clean: false });
            }
        }
    }

    async fn on_message(
        &mut self,
        msg: Option<Result<Message, tungstenite::Error>>,
        queue: &mut VecDeque<ConnectionEvent>,
    ) {
        match msg {
            Some(Ok(Message::Text(text))) => self.on_text(&text, queue).await,
            Some(Ok(Message::Binary(_))) => {
                tracing::trace!(job_id = %self.client.job_id(), "Ignoring binary frame");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                // Transport-level keepalive, answered by tungstenite.
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(job_id = %self.client.job_id(), ?frame, "Status channel closed by server");
                self.close_socket().await;
                queue.push_back(ConnectionEvent::Closed { clean: true });
            }
            Some(Err(e)) => {
                tracing::warn!(job_id = %self.client.job_id(), error = %e, "Status channel receive error");
                self.socket = None;
                queue.push_back(ConnectionEvent::TransportError);
                queue.push_back(ConnectionEvent::Closed { clean: false });
            }
            None => {
                tracing::warn!(
                    job_id = %self.client.job_id(),
                    "Status channel ended without a closing handshake",
                );
                self.socket = None;
                queue.push_back(ConnectionEvent::Closed { clean: false });
            }
        }
    }

    async fn on_text(&mut self, text: &str, queue: &mut VecDeque<ConnectionEvent>) {
        match decode(text) {
            Frame::Ping => {
                tracing::debug!(job_id = %self.client.job_id(), "Answering server ping");
                self.send_control(ControlFrame::Pong, queue).await;
            }
            Frame::Pong => {
                tracing::trace!(job_id = %self.client.job_id(), "Heartbeat acknowledged");
            }
            Frame::StatusUpdate(update) => self.apply_update(update),
            Frame::Malformed(reason) => {
                tracing::warn!(
                    job_id = %self.client.job_id(),
                    reason = %reason,
                    raw_message = %text,
                    "Discarding malformed status frame",
                );
            }
        }
    }

    fn apply_update(&self, update: JobUpdate) {
        self.job_tx.send_modify(|job| job.apply(update));

        let job = self.job_tx.borrow();
        tracing::debug!(
            job_id = %job.job_id,
            status = %job.status,
            progress = job.progress,
            "Job status updated",
        );
        let _ = self.event_tx.send(SyncEvent::JobUpdated {
            job_id: job.job_id.clone(),
            status: job.status.clone(),
            progress: job.progress,
        });
    }

    async fn send_control(&mut self, frame: ControlFrame, queue: &mut VecDeque<ConnectionEvent>) {
        let Some(socket) = self.socket.as_mut() else {
            return;
        };

        let result = socket.send(Message::Text(encode(frame))).await;
        if let Err(e) = result.map_err(ClientError::from) {
            tracing::warn!(
                job_id = %self.client.job_id(),
                ?frame,
                error = %e,
                "Failed to send control frame",
            );
            self.socket = None;
            queue.push_back(ConnectionEvent::TransportError);
            queue.push_back(ConnectionEvent::Closed { clean: false });
        }
    }

    async fn close_socket(&mut self) {
        let Some(mut socket) = self.socket.take() else {
            return;
        };

        match tokio::time::timeout(self.config.close_timeout, socket.close(None)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(job_id = %self.client.job_id(), error = %e, "Close handshake failed");
            }
            Err(_) => {
                tracing::debug!(job_id = %self.client.job_id(), "Close handshake timed out");
            }
        }
    }

    fn publish_state(&self) {
        let state = self.state.clone();
        let job_id = self.client.job_id().to_string();

        tracing::info!(
            job_id = %job_id,
            phase = %state.phase(),
            reconnect_attempts = state.reconnect_attempts(),
            "Status connection phase changed",
        );
        self.state_tx.send_replace(state.clone());
        let _ = self.event_tx.send(SyncEvent::PhaseChanged {
            job_id: job_id.clone(),
            phase: state.phase(),
            reconnect_attempts: state.reconnect_attempts(),
        });

        if state.phase() == Phase::Failed {
            tracing::error!(
                job_id = %job_id,
                attempts = state.reconnect_attempts(),
                "Reconnect attempts exhausted, no further status updates",
            );
            let _ = self.event_tx.send(SyncEvent::ConnectionFailed {
                job_id,
                attempts: state.reconnect_attempts(),
            });
        }
    }
}

// ---- select! helpers: pending forever when the resource is absent ----

async fn next_message(
    socket: &mut Option<StatusStream>,
) -> Option<Result<Message, tungstenite::Error>> {
    match socket {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn heartbeat_due(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
