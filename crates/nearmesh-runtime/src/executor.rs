//! Effect Executor
//!
//! Drains the effect channel and performs each transport call in order. A
//! failed call never stops the executor. Setup, request and accept failures are
//! fed back to the logic task as transport events; send failures are only logged.

use std::sync::Arc;

use nearmesh_core::internal::EffectReceiver;
use nearmesh_core::{
    ConnectionOutcome, Effect, EndpointId, EventSink, SetupOperation, Transport, TransportError,
    TransportEvent,
};
use tracing::{debug, info, warn};

pub struct EffectExecutor {
    transport: Arc<dyn Transport>,
    effects: EffectReceiver,
    events: EventSink,
}

impl EffectExecutor {
    pub fn new(transport: Arc<dyn Transport>, effects: EffectReceiver, events: EventSink) -> Self {
        Self {
            transport,
            effects,
            events,
        }
    }

    /// Run until the logic task drops its effect sender
    pub async fn run(mut self) {
        while let Some(effect) = self.effects.recv().await {
            self.execute(effect).await;
        }
        debug!("Effect channel closed, executor stopping");
    }

    async fn execute(&self, effect: Effect) {
        match effect {
            Effect::ResetTransport => {
                if let Err(e) = self.transport.stop_all().await {
                    warn!(error = %e, "Failed to reset transport");
                }
            }
            Effect::StartAdvertising {
                local_name,
                service_id,
            } => {
                let result = self
                    .transport
                    .start_advertising(&local_name, &service_id)
                    .await;
                self.report_setup(SetupOperation::Advertising, result);
            }
            Effect::StartDiscovery { service_id } => {
                let result = self.transport.start_discovery(&service_id).await;
                self.report_setup(SetupOperation::Discovery, result);
            }
            Effect::RequestConnection {
                local_name,
                endpoint,
            } => {
                if let Err(e) = self
                    .transport
                    .request_connection(&local_name, &endpoint)
                    .await
                {
                    warn!(%endpoint, error = %e, "Connection request failed");
                    self.feed_back(TransportEvent::ConnectionRequestFailed {
                        endpoint,
                        reason: e.to_string(),
                    });
                }
            }
            Effect::AcceptConnection { endpoint } => {
                if let Err(e) = self.transport.accept_connection(&endpoint).await {
                    warn!(%endpoint, error = %e, "Accepting connection failed");
                    self.report_accept_failure(endpoint, e);
                }
            }
            Effect::SendPayload { endpoint, payload } => {
                if let Err(e) = self.transport.send(&endpoint, &payload).await {
                    warn!(%endpoint, error = %e, "Send failed");
                }
            }
        }
    }

    fn report_setup(&self, operation: SetupOperation, result: Result<(), TransportError>) {
        let event = match result {
            Ok(()) => {
                info!(%operation, "Transport setup step started");
                TransportEvent::SetupCompleted { operation }
            }
            Err(TransportError::SetupFailed { reason, .. }) => {
                TransportEvent::SetupFailed { operation, reason }
            }
            Err(e) => TransportEvent::SetupFailed {
                operation,
                reason: e.to_string(),
            },
        };
        self.feed_back(event);
    }

    fn report_accept_failure(&self, endpoint: EndpointId, error: TransportError) {
        self.feed_back(TransportEvent::ConnectionResult {
            endpoint,
            outcome: ConnectionOutcome::Failure {
                reason: error.to_string(),
            },
        });
    }

    fn feed_back(&self, event: TransportEvent) {
        if self.events.emit(event).is_err() {
            debug!("Mesh logic stopped, dropping executor feedback");
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nearmesh_core::internal::{create_effect_channel, create_transport_event_channel};
    use std::sync::Mutex;

    /// Records calls and fails the ones it was told to
    #[derive(Default)]
    struct ScriptedTransport {
        calls: Mutex<Vec<String>>,
        fail_discovery: bool,
        fail_accepts: bool,
        fail_sends_to: Option<EndpointId>,
    }

    impl ScriptedTransport {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn bind_event_sink(&self, _sink: EventSink) {}

        async fn start_advertising(&self, name: &str, service: &str) -> Result<(), TransportError> {
            self.record(format!("advertise {name} {service}"));
            Ok(())
        }

        async fn start_discovery(&self, service: &str) -> Result<(), TransportError> {
            self.record(format!("discover {service}"));
            if self.fail_discovery {
                return Err(TransportError::SetupFailed {
                    operation: SetupOperation::Discovery,
                    reason: "bluetooth off".into(),
                });
            }
            Ok(())
        }

        async fn request_connection(
            &self,
            _name: &str,
            endpoint: &EndpointId,
        ) -> Result<(), TransportError> {
            self.record(format!("request {endpoint}"));
            Err(TransportError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: "busy".into(),
            })
        }

        async fn accept_connection(&self, endpoint: &EndpointId) -> Result<(), TransportError> {
            self.record(format!("accept {endpoint}"));
            if self.fail_accepts {
                return Err(TransportError::ConnectionFailed {
                    endpoint: endpoint.to_string(),
                    reason: "negotiation gone".into(),
                });
            }
            Ok(())
        }

        async fn send(&self, endpoint: &EndpointId, _payload: &[u8]) -> Result<(), TransportError> {
            self.record(format!("send {endpoint}"));
            if self.fail_sends_to.as_ref() == Some(endpoint) {
                return Err(TransportError::SendFailed {
                    endpoint: endpoint.to_string(),
                    reason: "gone".into(),
                });
            }
            Ok(())
        }

        async fn stop_all(&self) -> Result<(), TransportError> {
            self.record("stop".into());
            Ok(())
        }
    }

    async fn run_effects(
        transport: Arc<ScriptedTransport>,
        effects: Vec<Effect>,
    ) -> Vec<TransportEvent> {
        let (effect_tx, effect_rx) = create_effect_channel();
        let (event_tx, mut event_rx) = create_transport_event_channel();
        for effect in effects {
            effect_tx.send(effect).unwrap();
        }
        drop(effect_tx);

        EffectExecutor::new(transport, effect_rx, EventSink::new(event_tx))
            .run()
            .await;

        let mut events = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_setup_results_fed_back() {
        let transport = Arc::new(ScriptedTransport {
            fail_discovery: true,
            ..Default::default()
        });
        let events = run_effects(
            transport.clone(),
            vec![
                Effect::ResetTransport,
                Effect::StartAdvertising {
                    local_name: "A".into(),
                    service_id: "svc".into(),
                },
                Effect::StartDiscovery {
                    service_id: "svc".into(),
                },
            ],
        )
        .await;

        assert_eq!(
            *transport.calls.lock().unwrap(),
            vec!["stop", "advertise A svc", "discover svc"]
        );
        assert_eq!(
            events,
            vec![
                TransportEvent::SetupCompleted {
                    operation: SetupOperation::Advertising
                },
                TransportEvent::SetupFailed {
                    operation: SetupOperation::Discovery,
                    reason: "bluetooth off".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_request_reported_as_refused_request() {
        let transport = Arc::new(ScriptedTransport::default());
        let events = run_effects(
            transport,
            vec![Effect::RequestConnection {
                local_name: "A".into(),
                endpoint: EndpointId::from("ep-b"),
            }],
        )
        .await;

        assert!(matches!(
            events.as_slice(),
            [TransportEvent::ConnectionRequestFailed { endpoint, .. }] if endpoint.as_str() == "ep-b"
        ));
    }

    #[tokio::test]
    async fn test_failed_accept_reported_as_connection_failure() {
        let transport = Arc::new(ScriptedTransport {
            fail_accepts: true,
            ..Default::default()
        });
        let events = run_effects(
            transport,
            vec![Effect::AcceptConnection {
                endpoint: EndpointId::from("ep-b"),
            }],
        )
        .await;

        assert!(matches!(
            events.as_slice(),
            [TransportEvent::ConnectionResult {
                outcome: ConnectionOutcome::Failure { .. },
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn test_send_failure_does_not_stop_fan_out() {
        let transport = Arc::new(ScriptedTransport {
            fail_sends_to: Some(EndpointId::from("ep-b")),
            ..Default::default()
        });
        let events = run_effects(
            transport.clone(),
            ["ep-b", "ep-c", "ep-d"]
                .into_iter()
                .map(|endpoint| Effect::SendPayload {
                    endpoint: EndpointId::from(endpoint),
                    payload: b"{}".to_vec(),
                })
                .collect(),
        )
        .await;

        assert!(events.is_empty());
        assert_eq!(
            *transport.calls.lock().unwrap(),
            vec!["send ep-b", "send ep-c", "send ep-d"]
        );
    }
}
