//! Mesh Handle
//!
//! The facade through which the presentation layer and the transport adapter
//! reach a running mesh. Mutations travel as commands or transport events to
//! the logic task; reads come from the views it publishes.

use std::time::Duration;

use nearmesh_core::internal::{AppEventReceiver, CommandSender};
use nearmesh_core::{
    Command, DeviceId, EventSink, LogEntry, MeshError, MeshResult, MeshStatus, PeerSnapshot,
    TransportEvent,
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::logic::{MeshViews, RuntimeStats};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to a running mesh
pub struct MeshHandle {
    device: DeviceId,
    command_sender: CommandSender,
    event_sink: EventSink,
    views: MeshViews,
    app_event_receiver: Option<AppEventReceiver>,
    logic_handle: Option<JoinHandle<MeshResult<()>>>,
    executor_handle: Option<JoinHandle<()>>,
}

impl MeshHandle {
    pub(crate) fn new(
        device: DeviceId,
        command_sender: CommandSender,
        event_sink: EventSink,
        views: MeshViews,
        app_event_receiver: AppEventReceiver,
        logic_handle: JoinHandle<MeshResult<()>>,
        executor_handle: JoinHandle<()>,
    ) -> Self {
        Self {
            device,
            command_sender,
            event_sink,
            views,
            app_event_receiver: Some(app_event_receiver),
            logic_handle: Some(logic_handle),
            executor_handle: Some(executor_handle),
        }
    }

    pub fn local_device(&self) -> &DeviceId {
        &self.device
    }

    // ---- Commands ----

    pub async fn send_command(&self, command: Command) -> MeshResult<()> {
        self.command_sender
            .send(command)
            .await
            .map_err(|_| MeshError::channel_error("Failed to send command to mesh logic"))
    }

    /// Reset the transport and start advertising and discovery; call again to retry
    pub async fn start(&self) -> MeshResult<()> {
        self.send_command(Command::Start).await
    }

    /// Originate a message; `None` uses the configured default level
    pub async fn send_local_message(
        &self,
        body: impl Into<String>,
        info_level: Option<&str>,
    ) -> MeshResult<()> {
        self.send_command(Command::SendLocalMessage {
            body: body.into(),
            info_level: info_level.map(str::to_string),
        })
        .await
    }

    pub async fn send_default(&self, body: impl Into<String>) -> MeshResult<()> {
        self.send_local_message(body, None).await
    }

    // ---- Transport Intake ----

    /// Queue a radio event for the logic task; never blocks
    pub fn on_transport_event(&self, event: TransportEvent) -> MeshResult<()> {
        self.event_sink
            .emit(event)
            .map_err(|_| MeshError::channel_error("Mesh logic is not running"))
    }

    /// Sink a transport adapter can keep for its callbacks
    pub fn event_sink(&self) -> EventSink {
        self.event_sink.clone()
    }

    // ---- Observables ----

    pub fn peers(&self) -> Vec<PeerSnapshot> {
        self.views.peers.borrow().clone()
    }

    pub fn peer_updates(&self) -> watch::Receiver<Vec<PeerSnapshot>> {
        self.views.peers.clone()
    }

    /// Log in local arrival order
    pub fn messages(&self) -> Vec<LogEntry> {
        self.views.log.borrow().clone()
    }

    pub fn message_updates(&self) -> watch::Receiver<Vec<LogEntry>> {
        self.views.log.clone()
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<LogEntry> {
        self.views.subscribe_messages()
    }

    pub fn status(&self) -> MeshStatus {
        *self.views.status.borrow()
    }

    pub fn status_updates(&self) -> watch::Receiver<MeshStatus> {
        self.views.status.clone()
    }

    pub fn stats(&self) -> RuntimeStats {
        *self.views.stats.borrow()
    }

    pub fn stats_updates(&self) -> watch::Receiver<RuntimeStats> {
        self.views.stats.clone()
    }

    /// Take the app event receiver (only once)
    pub fn take_app_events(&mut self) -> Option<AppEventReceiver> {
        self.app_event_receiver.take()
    }

    // ---- Lifecycle ----

    pub fn is_running(&self) -> bool {
        self.logic_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the logic task, reset the transport and wait for both tasks
    pub async fn shutdown(&mut self) -> MeshResult<()> {
        info!(device = %self.device, "Shutting down mesh");
        let _ = self.send_command(Command::Shutdown).await;

        let mut result = Ok(());
        if let Some(handle) = self.logic_handle.take() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(logic_result)) => result = logic_result,
                Ok(Err(e)) => {
                    result = Err(MeshError::channel_error(format!(
                        "Mesh logic task panicked: {e}"
                    )))
                }
                Err(_) => {
                    warn!("Mesh logic task did not stop in time, aborting");
                    abort.abort();
                }
            }
        }

        if let Some(handle) = self.executor_handle.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                warn!("Effect executor did not stop in time, aborting");
                abort.abort();
            }
        }

        info!(device = %self.device, "Mesh shut down");
        result
    }
}
