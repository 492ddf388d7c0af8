//! Progress reporting for long-running batch operations.

/// Progress callback for reporting batch status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before each unit of work. `total` is `None` when unknown.
    fn item(&self, label: &str, current: usize, total: Option<usize>);
    /// Called once the operation completes.
    fn finish(&self, message: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item(&self, _label: &str, _current: usize, _total: Option<usize>) {}
    fn finish(&self, _message: &str) {}
}
