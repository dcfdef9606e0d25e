//! In-process observation source for testing and replay

use crate::core::ScanBatch;
use crate::scanner::{
    AnchorRegistry, BatchStream, ObservationSource, ScanError, ScanResult, Sighting,
};
use futures::StreamExt;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Default capacity of the batch broadcast channel
pub const DEFAULT_BATCH_CAPACITY: usize = 64;

/// Counters describing how a mock scanner has been driven
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScannerStatus {
    pub scanning: bool,
    pub released: bool,
    /// Transitions from stopped to scanning
    pub start_count: u32,
    /// Transitions from scanning to stopped
    pub stop_count: u32,
    pub release_count: u32,
    pub batches_emitted: u32,
    /// Batches offered while scanning was disabled
    pub batches_dropped: u32,
}

#[derive(Debug, Default)]
struct MockState {
    status: ScannerStatus,
    fail_next_start: Option<String>,
}

/// Broadcast-backed observation source
///
/// Batches pushed while scanning is enabled are multicast to every
/// subscriber; batches pushed while stopped are dropped, as a radio that is
/// switched off would never see them.
pub struct MockScanner {
    sender: Mutex<Option<broadcast::Sender<ScanResult<ScanBatch>>>>,
    state: Mutex<MockState>,
    registry: AnchorRegistry,
}

impl Default for MockScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockScanner {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BATCH_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
            state: Mutex::new(MockState::default()),
            registry: AnchorRegistry::default(),
        }
    }

    /// Attach a registry used by [`MockScanner::push_sightings`]
    pub fn with_registry(mut self, registry: AnchorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn status(&self) -> ScannerStatus {
        self.state().status
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender()
            .as_ref()
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Emit a batch. Returns `false` when scanning is disabled or the source is closed.
    pub fn push_batch(&self, batch: ScanBatch) -> bool {
        {
            let mut state = self.state();
            if !state.status.scanning {
                state.status.batches_dropped += 1;
                debug!(beacons = batch.len(), "Scanner stopped, dropping batch");
                return false;
            }
        }

        if !self.emit(Ok(batch)) {
            return false;
        }
        self.state().status.batches_emitted += 1;
        true
    }

    /// Resolve raw sightings through the registry and emit them as one batch
    pub fn push_sightings(&self, timestamp_ms: u64, sightings: &[Sighting]) -> bool {
        let batch = self.registry.resolve_batch(timestamp_ms, sightings);
        self.push_batch(batch)
    }

    /// Emit an upstream failure to every subscriber
    pub fn fail(&self, error: ScanError) -> bool {
        warn!(error = %error, "Injecting scanner failure");
        self.emit(Err(error))
    }

    /// Make the next `start_scanning` call fail
    pub fn fail_next_start(&self, reason: impl Into<String>) {
        self.state().fail_next_start = Some(reason.into());
    }

    /// End every subscriber's stream
    pub fn close(&self) {
        if self.sender().take().is_some() {
            debug!("Mock scanner closed");
        }
    }

    fn emit(&self, item: ScanResult<ScanBatch>) -> bool {
        match self.sender().as_ref() {
            // a send error only means nobody is subscribed yet
            Some(sender) => sender.send(item).is_ok(),
            None => false,
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<broadcast::Sender<ScanResult<ScanBatch>>>> {
        self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ObservationSource for MockScanner {
    fn observations(&self) -> BatchStream {
        match self.sender().as_ref() {
            Some(sender) => receiver_stream(sender.subscribe()),
            None => futures::stream::empty().boxed(),
        }
    }

    fn start_scanning(&self) -> ScanResult<()> {
        let mut state = self.state();
        if state.status.released {
            return Err(ScanError::Released);
        }
        if let Some(reason) = state.fail_next_start.take() {
            return Err(ScanError::ScanFailed { reason });
        }
        if !state.status.scanning {
            state.status.scanning = true;
            state.status.start_count += 1;
        }
        Ok(())
    }

    fn stop_scanning(&self) -> ScanResult<()> {
        let mut state = self.state();
        if state.status.released {
            return Err(ScanError::Released);
        }
        if state.status.scanning {
            state.status.scanning = false;
            state.status.stop_count += 1;
        }
        Ok(())
    }

    fn release(&self) {
        {
            let mut state = self.state();
            state.status.scanning = false;
            state.status.released = true;
            state.status.release_count += 1;
        }
        self.close();
    }
}

fn receiver_stream(receiver: broadcast::Receiver<ScanResult<ScanBatch>>) -> BatchStream {
    futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(item) => return Some((item, receiver)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Observation subscriber lagged, skipping to newest batches");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BeaconId, BeaconObservation};
    use crate::scanner::AnchorEntry;
    use uuid::Uuid;

    fn batch(timestamp_ms: u64) -> ScanBatch {
        let id = BeaconId::new(Uuid::nil(), 1, 1);
        ScanBatch::new(timestamp_ms, vec![BeaconObservation::new(id, -60, Some(1.0), 0.0, 0.0)])
    }

    #[tokio::test]
    async fn test_batches_dropped_while_stopped() {
        let scanner = MockScanner::new();
        let mut stream = scanner.observations();

        assert!(!scanner.push_batch(batch(1)));
        scanner.start_scanning().unwrap();
        assert!(scanner.push_batch(batch(2)));

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.timestamp_ms, 2);

        let status = scanner.status();
        assert_eq!(status.batches_dropped, 1);
        assert_eq!(status.batches_emitted, 1);
    }

    #[tokio::test]
    async fn test_multicast_to_every_subscriber() {
        let scanner = MockScanner::new();
        let mut first = scanner.observations();
        let mut second = scanner.observations();
        assert_eq!(scanner.subscriber_count(), 2);

        scanner.start_scanning().unwrap();
        scanner.push_batch(batch(10));

        assert_eq!(first.next().await.unwrap().unwrap().timestamp_ms, 10);
        assert_eq!(second.next().await.unwrap().unwrap().timestamp_ms, 10);
    }

    #[test]
    fn test_start_stop_count_transitions_only() {
        let scanner = MockScanner::new();
        scanner.start_scanning().unwrap();
        scanner.start_scanning().unwrap();
        scanner.stop_scanning().unwrap();
        scanner.stop_scanning().unwrap();

        let status = scanner.status();
        assert_eq!(status.start_count, 1);
        assert_eq!(status.stop_count, 1);
        assert!(!status.scanning);
    }

    #[test]
    fn test_fail_next_start() {
        let scanner = MockScanner::new();
        scanner.fail_next_start("radio off");

        assert_eq!(
            scanner.start_scanning(),
            Err(ScanError::ScanFailed { reason: "radio off".to_string() })
        );
        assert!(!scanner.status().scanning);
        assert!(scanner.start_scanning().is_ok());
    }

    #[tokio::test]
    async fn test_failure_then_resume() {
        let scanner = MockScanner::new();
        let mut stream = scanner.observations();
        scanner.start_scanning().unwrap();

        scanner.fail(ScanError::NotAvailable);
        scanner.push_batch(batch(3));

        assert_eq!(stream.next().await.unwrap(), Err(ScanError::NotAvailable));
        assert_eq!(stream.next().await.unwrap().unwrap().timestamp_ms, 3);
    }

    #[tokio::test]
    async fn test_release_ends_stream() {
        let scanner = MockScanner::new();
        let mut stream = scanner.observations();

        scanner.release();

        assert!(stream.next().await.is_none());
        assert_eq!(scanner.start_scanning(), Err(ScanError::Released));
        assert_eq!(scanner.status().release_count, 1);
        assert!(scanner.observations().next().await.is_none());
    }

    #[tokio::test]
    async fn test_push_sightings_uses_registry() {
        let id = BeaconId::new(Uuid::nil(), 2, 9);
        let mut registry = AnchorRegistry::default();
        registry
            .register(id, AnchorEntry { latitude: 1.0, longitude: 2.0, measured_power: None })
            .unwrap();

        let scanner = MockScanner::new().with_registry(registry);
        let mut stream = scanner.observations();
        scanner.start_scanning().unwrap();

        scanner.push_sightings(4, &[Sighting { id, rssi: -65, distance: Some(3.0) }]);

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.beacons[0].latitude, 1.0);
        assert_eq!(received.beacons[0].longitude, 2.0);
    }
}
