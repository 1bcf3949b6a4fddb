//! Mesh Logic Task
//!
//! Owns the `MeshEngine` and feeds it one input at a time from the command
//! channel, the transport event channel and a maintenance timer.

use std::time::Duration;

use nearmesh_core::internal::{
    AppEventSender, CommandReceiver, EffectSender, NonBlockingSend, TransportEventReceiver,
};
use nearmesh_core::{
    AppEvent, Command, Effect, MeshEngine, MeshError, MeshResult, Outcome, TransportEvent,
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace};

use super::state::{Changes, MeshPublisher};

// ----------------------------------------------------------------------------
// Mesh Logic Task
// ----------------------------------------------------------------------------

pub struct MeshLogicTask {
    engine: MeshEngine,
    command_receiver: CommandReceiver,
    event_receiver: TransportEventReceiver,
    effect_sender: EffectSender,
    app_event_sender: AppEventSender,
    publisher: MeshPublisher,
    maintenance_interval: Duration,
}

impl MeshLogicTask {
    pub fn new(
        engine: MeshEngine,
        command_receiver: CommandReceiver,
        event_receiver: TransportEventReceiver,
        effect_sender: EffectSender,
        app_event_sender: AppEventSender,
        publisher: MeshPublisher,
        maintenance_interval: Duration,
    ) -> Self {
        Self {
            engine,
            command_receiver,
            event_receiver,
            effect_sender,
            app_event_sender,
            publisher,
            maintenance_interval,
        }
    }

    /// Run until `Command::Shutdown` or until every command sender is gone
    pub async fn run(mut self) -> MeshResult<()> {
        info!(device = %self.engine.local_device(), "Mesh logic task starting");

        let mut maintenance = tokio::time::interval(self.maintenance_interval);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        maintenance.tick().await;
        let mut events_open = true;

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => match command {
                    Some(Command::Shutdown) => {
                        info!("Shutdown requested");
                        self.send_effect(Effect::ResetTransport)?;
                        break;
                    }
                    Some(command) => {
                        trace!(?command, "Processing command");
                        let outcome = self.engine.handle_command(command);
                        self.dispatch(outcome, Changes::default())?;
                    }
                    None => {
                        info!("Command channel closed, shutting down");
                        break;
                    }
                },

                event = self.event_receiver.recv(), if events_open => match event {
                    Some(event) => self.on_transport_event(event)?,
                    None => {
                        debug!("Transport event channel closed");
                        events_open = false;
                    }
                },

                _ = maintenance.tick() => {
                    let outcome = self.engine.maintain();
                    self.dispatch(outcome, Changes::default())?;
                }
            }
        }

        info!(device = %self.engine.local_device(), "Mesh logic task stopped");
        Ok(())
    }

    fn on_transport_event(&mut self, event: TransportEvent) -> MeshResult<()> {
        trace!(?event, "Processing transport event");
        // display name refreshes change the peer list without a state change
        let changes = Changes {
            peers: event.endpoint().is_some(),
            ..Changes::default()
        };
        let outcome = self.engine.handle_transport_event(event);
        self.dispatch(outcome, changes)
    }

    /// Hand effects to the executor, then publish app events and views
    fn dispatch(&mut self, outcome: Outcome, mut changes: Changes) -> MeshResult<()> {
        for effect in outcome.effects {
            self.send_effect(effect)?;
        }

        for event in outcome.app_events {
            match &event {
                AppEvent::PeerStateChanged { .. } | AppEvent::PeerRemoved { .. } => {
                    changes.peers = true;
                }
                AppEvent::MessageDelivered { entry } => {
                    changes.log = true;
                    self.publisher.appended(entry);
                }
                AppEvent::MeshStatusChanged { .. } => changes.status = true,
                AppEvent::Notice { .. } => {}
            }

            if let Err(e) = self.app_event_sender.try_send_non_blocking(event) {
                trace!(error = %e, "App event not queued");
            }
        }

        self.publisher.publish(&self.engine, changes);
        Ok(())
    }

    fn send_effect(&self, effect: Effect) -> MeshResult<()> {
        self.effect_sender.send(effect).map_err(|_| {
            error!("Effect executor stopped, shutting down mesh logic");
            MeshError::channel_error("effect executor stopped")
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
