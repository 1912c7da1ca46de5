use crate::metric::Accumulator;
use crate::utils::errors::MonitoringError;

/// The contract an agent uses to drive a collector: initialize once, then
/// gather on every collection cycle.
pub trait Input {
    fn name(&self) -> &'static str;

    /// Validate configuration and start any background work. Errors here mean
    /// the input never starts.
    fn init(&mut self) -> Result<(), MonitoringError>;

    /// Add this cycle's metrics to `acc`. An error loses the cycle, not the input.
    fn gather(&self, acc: &mut dyn Accumulator) -> Result<(), MonitoringError>;

    fn stop(&mut self) {}
}
