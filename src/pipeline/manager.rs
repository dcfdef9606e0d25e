//! Location pipeline: observation stream to published location state
//!
//! One pipeline exists per positioning session. Construction subscribes to
//! the observation source and spawns a single processing task that handles
//! batches strictly one at a time:
//!
//! ```text
//! ObservationSource ──batches──► processing task ──► PositionCalculator
//!                                      │
//!                                      └──► watch slot ──► LocationUpdates (any number)
//! ```
//!
//! A calculation failure is published as data on that cycle's update and the
//! task moves on to the next batch. An upstream failure publishes one error
//! update; the task keeps polling in case the source resumes, and ends when
//! the source stream ends or the pipeline is cleaned up.

use crate::algorithms::{CalculationError, PositionCalculator};
use crate::core::{LocationUpdate, ScanBatch};
use crate::pipeline::{LocationUpdates, PipelineError};
use crate::scanner::{BatchStream, ObservationSource, ScanResult};
use crate::utils::config::PipelineConfig;
use futures::StreamExt;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

enum Lifecycle<S> {
    Stopped(Arc<S>),
    Scanning(Arc<S>),
    Closed,
}

/// Orchestrates one positioning session over an observation source
pub struct LocationPipeline<S: ObservationSource> {
    lifecycle: Mutex<Lifecycle<S>>,
    calculator: PositionCalculator,
    publisher: Arc<Publisher>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Published location slot shared by a pipeline and its processing task
struct Publisher {
    updates: watch::Sender<LocationUpdate>,
    shutdown_token: CancellationToken,
    /// Held across the cancellation check and the publish, and across `close`
    gate: Mutex<()>,
}

impl Publisher {
    fn new() -> Self {
        let (updates, _) = watch::channel(LocationUpdate::initial());
        Self {
            updates,
            shutdown_token: CancellationToken::new(),
            gate: Mutex::new(()),
        }
    }

    /// Publish unless closed. Returns `false` when the update was discarded.
    fn publish(&self, update: LocationUpdate) -> bool {
        let _gate = self.gate();
        if self.shutdown_token.is_cancelled() {
            return false;
        }
        self.updates.send_replace(update);
        true
    }

    /// Once this returns, no further update is published
    fn close(&self) {
        let _gate = self.gate();
        self.shutdown_token.cancel();
    }

    fn gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S: ObservationSource> LocationPipeline<S> {
    /// Create a pipeline using the configured calculator.
    ///
    /// Must be called from within a tokio runtime: the processing task is
    /// spawned immediately. Scanning stays disabled until [`start`](Self::start).
    pub fn new(source: Arc<S>, config: &PipelineConfig) -> Self {
        Self::with_calculator(source, config.calculator())
    }

    /// Create a pipeline from a fallible source constructor.
    ///
    /// A failing constructor is logged and returned; no inert pipeline is built.
    pub fn try_new<F>(factory: F, config: &PipelineConfig) -> Result<Self, PipelineError>
    where
        F: FnOnce() -> ScanResult<S>,
    {
        let source = factory().map_err(|e| {
            error!(error = %e, "Failed to initialize beacon scanner");
            e
        })?;
        Ok(Self::new(Arc::new(source), config))
    }

    pub fn with_calculator(source: Arc<S>, calculator: PositionCalculator) -> Self {
        let publisher = Arc::new(Publisher::new());

        let batches = source.observations();
        let task = tokio::spawn(process_batches(batches, calculator.clone(), Arc::clone(&publisher)));

        info!(calculator = ?calculator.kind(), "Location pipeline created");

        Self {
            lifecycle: Mutex::new(Lifecycle::Stopped(source)),
            calculator,
            publisher,
            task: Mutex::new(Some(task)),
        }
    }

    /// Enable the observation source. No-op when already started.
    pub fn start(&self) -> Result<(), PipelineError> {
        let mut lifecycle = self.lifecycle();
        let source = match &*lifecycle {
            Lifecycle::Closed => return Err(PipelineError::Closed),
            Lifecycle::Scanning(_) => {
                debug!("Location updates already started");
                return Ok(());
            }
            Lifecycle::Stopped(source) => Arc::clone(source),
        };

        source.start_scanning().map_err(|e| {
            warn!(error = %e, "Failed to start beacon scanning");
            e
        })?;
        *lifecycle = Lifecycle::Scanning(source);
        info!("Location updates started");
        Ok(())
    }

    /// Disable the observation source. Published state and observers are kept.
    pub fn stop(&self) -> Result<(), PipelineError> {
        let mut lifecycle = self.lifecycle();
        let source = match &*lifecycle {
            Lifecycle::Closed => return Err(PipelineError::Closed),
            Lifecycle::Stopped(_) => {
                debug!("Location updates already stopped");
                return Ok(());
            }
            Lifecycle::Scanning(source) => Arc::clone(source),
        };

        source.stop_scanning()?;
        *lifecycle = Lifecycle::Stopped(source);
        info!("Location updates stopped");
        Ok(())
    }

    /// Tear the session down: cancel processing and release the source.
    ///
    /// Idempotent. Afterwards no update is ever published and `start` fails
    /// with [`PipelineError::Closed`].
    pub fn cleanup(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle(), Lifecycle::Closed);
        let source = match previous {
            Lifecycle::Closed => return,
            Lifecycle::Stopped(source) | Lifecycle::Scanning(source) => source,
        };

        self.publisher.close();
        source.release();
        info!("Location pipeline cleaned up");
    }

    /// Wait for the processing task to finish (after `cleanup` or when the source ends)
    pub async fn closed(&self) {
        let handle = self.task_handle().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Location processing task did not finish cleanly");
            }
        }
    }

    /// Attach an observer. It sees the latest update now and every later one.
    pub fn location_updates(&self) -> LocationUpdates {
        LocationUpdates::new(self.publisher.updates.subscribe())
    }

    /// Most recently published update
    pub fn latest(&self) -> LocationUpdate {
        self.publisher.updates.borrow().clone()
    }

    pub fn calculator(&self) -> &PositionCalculator {
        &self.calculator
    }

    pub fn is_scanning(&self) -> bool {
        matches!(&*self.lifecycle(), Lifecycle::Scanning(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(&*self.lifecycle(), Lifecycle::Closed)
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle<S>> {
        self.lifecycle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn task_handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S: ObservationSource> Drop for LocationPipeline<S> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

async fn process_batches(
    mut batches: BatchStream,
    calculator: PositionCalculator,
    publisher: Arc<Publisher>,
) {
    debug!("Location processing task started");

    loop {
        let next = tokio::select! {
            biased;
            _ = publisher.shutdown_token.cancelled() => break,
            next = batches.next() => next,
        };

        let update = match next {
            Some(Ok(batch)) => process_batch(&calculator, batch),
            Some(Err(e)) => {
                error!(error = %e, "Error in location updates");
                LocationUpdate::failed(Vec::new(), format!("Error processing beacons: {e}"))
            }
            None => {
                info!("Observation source ended");
                break;
            }
        };

        // a cycle that finishes after cleanup is not published
        if !publisher.publish(update) {
            break;
        }
    }

    debug!("Location processing task stopped");
}

/// Run one calculation cycle, converting any failure into the update's `error`
pub(crate) fn process_batch(calculator: &PositionCalculator, batch: ScanBatch) -> LocationUpdate {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| calculator.compute(&batch)))
        .unwrap_or_else(|payload| {
            Err(CalculationError::Panicked {
                message: panic_message(payload.as_ref()),
            })
        });

    match outcome {
        Ok(position) => {
            debug!(
                timestamp_ms = batch.timestamp_ms,
                beacons = batch.len(),
                has_position = position.is_some(),
                "Processed beacon batch"
            );
            LocationUpdate::computed(position, batch.beacons)
        }
        Err(e) => {
            warn!(
                error = %e,
                timestamp_ms = batch.timestamp_ms,
                beacons = batch.len(),
                "Error calculating position"
            );
            LocationUpdate::failed(batch.beacons, format!("Error calculating position: {e}"))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::CalculatorType;
    use crate::core::{BeaconId, BeaconObservation};
    use crate::scanner::{MockScanner, ScanError};
    use std::time::Duration;
    use uuid::Uuid;

    fn beacon(minor: u16, latitude: f64, longitude: f64, distance: Option<f64>) -> BeaconObservation {
        BeaconObservation::new(BeaconId::new(Uuid::nil(), 3, minor), -68, distance, latitude, longitude)
    }

    async fn next_update(updates: &mut LocationUpdates) -> LocationUpdate {
        tokio::time::timeout(Duration::from_secs(2), updates.changed())
            .await
            .expect("timed out waiting for update")
            .expect("pipeline gone")
    }

    #[test]
    fn test_process_batch_success() {
        let calculator = PositionCalculator::new(CalculatorType::WeightedCentroid);
        let batch = ScanBatch::new(11, vec![beacon(1, 5.0, 6.0, Some(2.0))]);

        let update = process_batch(&calculator, batch.clone());

        assert_eq!(update.beacons, batch.beacons);
        assert_eq!(update.error, None);
        let position = update.position.unwrap();
        assert_eq!((position.latitude, position.longitude), (5.0, 6.0));
        assert_eq!(position.timestamp_ms, 11);
    }

    #[test]
    fn test_process_batch_empty_is_not_an_error() {
        let update = process_batch(&PositionCalculator::default(), ScanBatch::new(0, vec![]));
        assert_eq!(update, LocationUpdate::initial());
    }

    #[test]
    fn test_process_batch_failure_keeps_beacons() {
        let batch = ScanBatch::new(0, vec![beacon(1, 5.0, 6.0, Some(-3.0))]);
        let update = process_batch(&PositionCalculator::default(), batch.clone());

        assert_eq!(update.position, None);
        assert_eq!(update.beacons, batch.beacons);
        assert!(update.error.unwrap().starts_with("Error calculating position:"));
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");

        let payload: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_publisher_discards_after_close() {
        let publisher = Publisher::new();
        let mut receiver = publisher.updates.subscribe();

        assert!(publisher.publish(LocationUpdate::failed(vec![], "before close")));
        assert!(receiver.has_changed().unwrap());
        receiver.borrow_and_update();

        publisher.close();
        assert!(!publisher.publish(LocationUpdate::failed(vec![], "after close")));
        assert!(!receiver.has_changed().unwrap());
        assert_eq!(receiver.borrow().error.as_deref(), Some("before close"));
    }

    #[test]
    fn test_close_waits_for_in_flight_publish() {
        let publisher = Arc::new(Publisher::new());

        // an in-flight publish holds the gate
        let gate = publisher.gate();
        let closer = {
            let publisher = Arc::clone(&publisher);
            std::thread::spawn(move || publisher.close())
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!publisher.shutdown_token.is_cancelled());

        drop(gate);
        closer.join().unwrap();
        assert!(publisher.shutdown_token.is_cancelled());
        assert!(!publisher.publish(LocationUpdate::initial()));
    }

    #[tokio::test]
    async fn test_initial_update_before_first_batch() {
        let pipeline = LocationPipeline::new(Arc::new(MockScanner::new()), &PipelineConfig::default());
        assert_eq!(pipeline.latest(), LocationUpdate::initial());
        assert_eq!(pipeline.location_updates().current(), LocationUpdate::initial());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let scanner = Arc::new(MockScanner::new());
        let pipeline = LocationPipeline::new(Arc::clone(&scanner), &PipelineConfig::default());

        pipeline.start().unwrap();
        pipeline.start().unwrap();
        assert!(pipeline.is_scanning());
        assert_eq!(scanner.status().start_count, 1);

        pipeline.stop().unwrap();
        pipeline.stop().unwrap();
        assert!(!pipeline.is_scanning());
        assert_eq!(scanner.status().stop_count, 1);

        // the broadcast subscriber is created once at construction
        assert_eq!(scanner.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_start_failure_leaves_pipeline_stopped() {
        let scanner = Arc::new(MockScanner::new());
        scanner.fail_next_start("bluetooth disabled");
        let pipeline = LocationPipeline::new(Arc::clone(&scanner), &PipelineConfig::default());

        let result = pipeline.start();
        assert!(matches!(result, Err(PipelineError::Scanner(ScanError::ScanFailed { .. }))));
        assert!(!pipeline.is_scanning());

        pipeline.start().unwrap();
        assert!(pipeline.is_scanning());
    }

    #[tokio::test]
    async fn test_try_new_propagates_initialization_failure() {
        let result = LocationPipeline::<MockScanner>::try_new(
            || {
                Err(ScanError::Initialization {
                    reason: "no adapter".to_string(),
                })
            },
            &PipelineConfig::default(),
        );
        assert!(matches!(
            result,
            Err(PipelineError::Scanner(ScanError::Initialization { .. }))
        ));

        let pipeline = LocationPipeline::try_new(|| Ok(MockScanner::new()), &PipelineConfig::default());
        assert!(pipeline.is_ok());
    }

    #[tokio::test]
    async fn test_batch_is_published() {
        let scanner = Arc::new(MockScanner::new());
        let pipeline = LocationPipeline::new(Arc::clone(&scanner), &PipelineConfig::default());
        let mut updates = pipeline.location_updates();
        pipeline.start().unwrap();

        scanner.push_batch(ScanBatch::new(21, vec![beacon(1, 1.0, 2.0, Some(1.5))]));

        let update = next_update(&mut updates).await;
        let position = update.position.unwrap();
        assert_eq!((position.latitude, position.longitude), (1.0, 2.0));
        assert_eq!(position.accuracy, 1.5);
        assert_eq!(update.beacons.len(), 1);
        assert_eq!(update.error, None);
    }

    #[tokio::test]
    async fn test_upstream_failure_publishes_empty_error_update() {
        let scanner = Arc::new(MockScanner::new());
        let pipeline = LocationPipeline::new(Arc::clone(&scanner), &PipelineConfig::default());
        let mut updates = pipeline.location_updates();
        pipeline.start().unwrap();

        scanner.fail(ScanError::ScanFailed {
            reason: "adapter reset".to_string(),
        });

        let update = next_update(&mut updates).await;
        assert_eq!(update.position, None);
        assert!(update.beacons.is_empty());
        assert!(update.error.unwrap().contains("adapter reset"));
    }

    #[tokio::test]
    async fn test_cleanup_releases_once_and_closes() {
        let scanner = Arc::new(MockScanner::new());
        let pipeline = LocationPipeline::new(Arc::clone(&scanner), &PipelineConfig::default());
        pipeline.start().unwrap();

        pipeline.cleanup();
        pipeline.cleanup();
        pipeline.closed().await;

        assert!(pipeline.is_closed());
        assert_eq!(scanner.status().release_count, 1);
        assert_eq!(pipeline.start(), Err(PipelineError::Closed));
        assert_eq!(pipeline.stop(), Err(PipelineError::Closed));
    }

    #[tokio::test]
    async fn test_drop_releases_source() {
        let scanner = Arc::new(MockScanner::new());
        {
            let pipeline = LocationPipeline::new(Arc::clone(&scanner), &PipelineConfig::default());
            pipeline.start().unwrap();
        }
        assert_eq!(scanner.status().release_count, 1);
    }
}
