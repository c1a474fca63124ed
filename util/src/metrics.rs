use std::time::{Duration, Instant};

/// Records the time elapsed since [`HistogramGuard::begin`] into a histogram
/// when dropped or finished.
#[must_use = "The guard is used to update the histogram when it is dropped"]
pub struct HistogramGuard {
    name: Option<&'static str>,
    started_at: Instant,
}

impl HistogramGuard {
    pub fn begin(name: &'static str) -> Self {
        Self {
            name: Some(name),
            started_at: Instant::now(),
        }
    }

    pub fn finish(mut self) -> Duration {
        let elapsed = self.started_at.elapsed();
        if let Some(name) = self.name.take() {
            metrics::histogram!(name).record(elapsed);
        }
        elapsed
    }
}

impl Drop for HistogramGuard {
    fn drop(&mut self) {
        if let Some(name) = self.name.take() {
            metrics::histogram!(name).record(self.started_at.elapsed());
        }
    }
}
