// Nexus Client
// Consumes the engine's event stream and tracks one run's UI state

pub mod consumer;
pub mod http;
pub mod state;

pub use consumer::{StreamConsumer, StreamObserver, SubscriptionId};
pub use http::{EventSource, TransportError};
pub use state::StreamStatus;
