//! Observation source boundary

use crate::core::ScanBatch;
use crate::scanner::ScanResult;
use futures::stream::BoxStream;

/// Stream of scan batches. An `Err` item is an upstream failure; the source
/// may keep producing batches afterwards. End of stream means the source is gone.
pub type BatchStream = BoxStream<'static, ScanResult<ScanBatch>>;

/// Abstraction over the radio scanning subsystem
pub trait ObservationSource: Send + Sync + 'static {
    /// Subscribe to the multicast sequence of observation batches
    fn observations(&self) -> BatchStream;

    /// Enable underlying scanning
    fn start_scanning(&self) -> ScanResult<()>;

    /// Disable underlying scanning
    fn stop_scanning(&self) -> ScanResult<()>;

    /// Release the source. Called exactly once at pipeline teardown.
    fn release(&self);
}
