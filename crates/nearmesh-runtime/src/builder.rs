//! Runtime Builder API
//!
//! Wires a `MeshEngine` to a transport: creates the channels, binds the
//! transport's event sink, and spawns the logic task and the effect executor.

use std::sync::Arc;
use std::time::Duration;

use nearmesh_core::internal::{
    create_app_event_channel, create_command_channel, create_effect_channel,
    create_transport_event_channel,
};
use nearmesh_core::{
    EventSink, MeshConfig, MeshEngine, MeshError, MeshResult, SystemTimeSource, TimeSource,
    Transport,
};
use tracing::info;

use crate::executor::EffectExecutor;
use crate::handle::MeshHandle;
use crate::logic::{MeshLogicTask, MeshPublisher};

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

pub struct RuntimeBuilder {
    config: MeshConfig,
    transport: Option<Arc<dyn Transport>>,
    time_source: Arc<dyn TimeSource>,
}

impl RuntimeBuilder {
    pub fn new(config: MeshConfig) -> Self {
        Self {
            config,
            transport: None,
            time_source: Arc::new(SystemTimeSource),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Clock for message timestamps and dedup retention
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    /// Build and start the runtime
    ///
    /// The mesh stays idle until `MeshHandle::start` is called.
    pub async fn build_and_start(self) -> MeshResult<MeshHandle> {
        let transport = self
            .transport
            .ok_or_else(|| MeshError::config_error("No transport registered"))?;
        let engine = MeshEngine::new(&self.config, self.time_source)?;
        let device = engine.local_device().clone();
        info!(%device, service_id = %self.config.service_id, "Building mesh runtime");

        let channels = &self.config.channels;
        let (command_sender, command_receiver) = create_command_channel(channels);
        let (event_sender, event_receiver) = create_transport_event_channel();
        let (effect_sender, effect_receiver) = create_effect_channel();
        let (app_event_sender, app_event_receiver) = create_app_event_channel(channels);

        let event_sink = EventSink::new(event_sender);
        transport.bind_event_sink(event_sink.clone());

        let (publisher, views) = MeshPublisher::new(&engine, channels.message_log_broadcast_size);
        let logic = MeshLogicTask::new(
            engine,
            command_receiver,
            event_receiver,
            effect_sender,
            app_event_sender,
            publisher,
            Duration::from_millis(self.config.dedup.maintenance_interval_ms),
        );
        let executor = EffectExecutor::new(transport, effect_receiver, event_sink.clone());

        let logic_handle = tokio::spawn(logic.run());
        let executor_handle = tokio::spawn(executor.run());

        info!(%device, "Mesh runtime started");
        Ok(MeshHandle::new(
            device,
            command_sender,
            event_sink,
            views,
            app_event_receiver,
            logic_handle,
            executor_handle,
        ))
    }
}
