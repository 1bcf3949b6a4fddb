//! Transport abstraction for the mesh relay
//!
//! A transport binds the relay to a concrete short-range radio. Calls made on it
//! return once the request was handed to the radio; everything the radio later
//! observes (endpoints appearing, links negotiating, bytes arriving) is reported
//! asynchronously through the `EventSink` bound at build time.

use async_trait::async_trait;

use crate::channel::EventSink;
use crate::errors::TransportError;
use crate::types::EndpointId;

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

#[async_trait]
pub trait Transport: Send + Sync {
    /// Install the sink that receives this transport's events
    fn bind_event_sink(&self, sink: EventSink);

    /// Make the local device visible under `local_name` for `service_id`
    async fn start_advertising(
        &self,
        local_name: &str,
        service_id: &str,
    ) -> Result<(), TransportError>;

    /// Start looking for endpoints advertising `service_id`
    async fn start_discovery(&self, service_id: &str) -> Result<(), TransportError>;

    async fn request_connection(
        &self,
        local_name: &str,
        endpoint: &EndpointId,
    ) -> Result<(), TransportError>;

    async fn accept_connection(&self, endpoint: &EndpointId) -> Result<(), TransportError>;

    /// Deliver one payload to a connected endpoint
    async fn send(&self, endpoint: &EndpointId, payload: &[u8]) -> Result<(), TransportError>;

    /// Drop every link and stop advertising and discovery
    async fn stop_all(&self) -> Result<(), TransportError>;
}
