//! Channel Utilities for CSP Communication
//!
//! Commands and app events use bounded tokio channels. Transport events and
//! effects are unbounded: radio callbacks must never block or lose a lifecycle
//! event, and the logic loop must never wait on the executor.

use tokio::sync::mpsc;

use crate::channel::communication::{AppEvent, Command, Effect, TransportEvent};
use crate::config::ChannelConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel buffer is full")]
    ChannelFull,
    #[error("Channel is closed")]
    ChannelClosed,
}

pub type CommandSender = mpsc::Sender<Command>;
pub type CommandReceiver = mpsc::Receiver<Command>;
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;
pub type EffectSender = mpsc::UnboundedSender<Effect>;
pub type EffectReceiver = mpsc::UnboundedReceiver<Effect>;
pub type AppEventSender = mpsc::Sender<AppEvent>;
pub type AppEventReceiver = mpsc::Receiver<AppEvent>;

// ----------------------------------------------------------------------------
// Channel Creation Utilities
// ----------------------------------------------------------------------------

/// Create bounded command channel (Facade → Mesh Logic)
pub fn create_command_channel(config: &ChannelConfig) -> (CommandSender, CommandReceiver) {
    mpsc::channel(config.command_buffer_size)
}

/// Create unbounded transport event channel (Transport → Mesh Logic)
pub fn create_transport_event_channel() -> (TransportEventSender, TransportEventReceiver) {
    mpsc::unbounded_channel()
}

/// Create unbounded effect channel (Mesh Logic → Effect Executor)
pub fn create_effect_channel() -> (EffectSender, EffectReceiver) {
    mpsc::unbounded_channel()
}

/// Create bounded app event channel (Mesh Logic → Presentation)
pub fn create_app_event_channel(config: &ChannelConfig) -> (AppEventSender, AppEventReceiver) {
    mpsc::channel(config.app_event_buffer_size)
}

// ----------------------------------------------------------------------------
// Non-blocking Send Utilities
// ----------------------------------------------------------------------------

/// Non-blocking send so the logic loop never stalls on a slow consumer
pub trait NonBlockingSend<T> {
    fn try_send_non_blocking(&self, message: T) -> Result<(), ChannelError>;
}

impl NonBlockingSend<AppEvent> for AppEventSender {
    fn try_send_non_blocking(&self, event: AppEvent) -> Result<(), ChannelError> {
        self.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => ChannelError::ChannelClosed,
        })
    }
}

// ----------------------------------------------------------------------------
// Event Sink
// ----------------------------------------------------------------------------

/// Handle a transport adapter uses to report radio events
///
/// Reporting never blocks and is safe from any thread or callback.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: TransportEventSender,
}

impl EventSink {
    pub fn new(sender: TransportEventSender) -> Self {
        Self { sender }
    }

    /// Queue an event; fails only once the logic task has stopped
    pub fn emit(&self, event: TransportEvent) -> Result<(), ChannelError> {
        self.sender
            .send(event)
            .map_err(|_| ChannelError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EndpointId;

    #[tokio::test]
    async fn test_event_sink_delivers_in_order() {
        let (tx, mut rx) = create_transport_event_channel();
        let sink = EventSink::new(tx);

        sink.emit(TransportEvent::EndpointLost {
            endpoint: EndpointId::from("a"),
        })
        .unwrap();
        sink.emit(TransportEvent::Disconnected {
            endpoint: EndpointId::from("b"),
        })
        .unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::EndpointLost { .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::Disconnected { .. })
        ));
    }

    #[test]
    fn test_event_sink_reports_closed_receiver() {
        let (tx, rx) = create_transport_event_channel();
        let sink = EventSink::new(tx);
        drop(rx);

        assert!(sink.is_closed());
        assert_eq!(
            sink.emit(TransportEvent::EndpointLost {
                endpoint: EndpointId::from("a"),
            }),
            Err(ChannelError::ChannelClosed)
        );
    }

    #[test]
    fn test_app_event_try_send_full() {
        let config = ChannelConfig {
            app_event_buffer_size: 1,
            ..ChannelConfig::default()
        };
        let (tx, _rx) = create_app_event_channel(&config);
        let event = AppEvent::PeerRemoved {
            endpoint: EndpointId::from("a"),
        };

        assert!(tx.try_send_non_blocking(event.clone()).is_ok());
        assert_eq!(
            tx.try_send_non_blocking(event),
            Err(ChannelError::ChannelFull)
        );
    }
}
