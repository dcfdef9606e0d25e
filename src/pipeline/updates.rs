//! Latest-value multicast subscription to location updates

use crate::core::LocationUpdate;
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::watch;

/// Observer handle on a pipeline's published location state.
///
/// Every handle sees the latest update on attach and then each newer one.
/// Observers never apply back-pressure: a slow handle skips intermediate
/// values and resumes at the newest.
#[derive(Debug, Clone)]
pub struct LocationUpdates {
    receiver: watch::Receiver<LocationUpdate>,
}

impl LocationUpdates {
    pub(crate) fn new(receiver: watch::Receiver<LocationUpdate>) -> Self {
        Self { receiver }
    }

    /// Most recently published update
    pub fn current(&self) -> LocationUpdate {
        self.receiver.borrow().clone()
    }

    /// Whether an update newer than the last one seen by this handle is available
    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    /// Wait for the next update. `None` once the publishing pipeline is gone.
    pub async fn changed(&mut self) -> Option<LocationUpdate> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Stream starting with the current value, followed by every newer one
    pub fn into_stream(mut self) -> impl Stream<Item = LocationUpdate> {
        let current = self.receiver.borrow_and_update().clone();
        let rest = stream::unfold(self, |mut updates| async move {
            let next = updates.changed().await?;
            Some((next, updates))
        });
        stream::once(async move { current }).chain(rest)
    }
}
