// Event Sink
// Push side of one turn's event channel

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nexus_protocol::StreamEvent;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Sends events to a single consumer. Once the consumer is gone every send is
/// a no-op; the turn keeps running so in-flight tools still finish.
#[derive(Clone)]
pub struct EventSink {
  tx: mpsc::Sender<StreamEvent>,
  connected: Arc<AtomicBool>,
}

impl EventSink {
  pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
    Self {
      tx,
      connected: Arc::new(AtomicBool::new(true)),
    }
  }

  pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Self::new(tx), rx)
  }

  /// Returns `false` when the consumer has disconnected.
  pub async fn send(&self, event: StreamEvent) -> bool {
    if !self.is_connected() {
      debug!(event = event.event_type(), "dropping event for disconnected consumer");
      return false;
    }
    if self.tx.send(event).await.is_err() {
      if self.connected.swap(false, Ordering::SeqCst) {
        warn!("event consumer disconnected");
      }
      return false;
    }
    true
  }

  pub fn is_connected(&self) -> bool {
    self.connected.load(Ordering::SeqCst) && !self.tx.is_closed()
  }
}
