//! Teardown diagnostics
//!
//! When a controller is destroyed it reports whether everything it owned was
//! actually released. Tests install their own watcher to assert on it.

use log::{info, warn};
use serde::Serialize;

/// What was left behind when a controller was destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Pool buffers still lent out when the session ended
    pub outstanding_buffers: usize,

    /// Whether the session thread was joined
    pub session_joined: bool,

    /// Frames handed to the presenter over the controller's lifetime
    pub frames_presented: u64,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.outstanding_buffers == 0 && self.session_joined
    }
}

/// Observer notified once per destroyed controller
pub trait TeardownWatcher: Send + Sync {
    fn teardown_complete(&self, report: &TeardownReport);
}

impl<F> TeardownWatcher for F
where
    F: Fn(&TeardownReport) + Send + Sync,
{
    fn teardown_complete(&self, report: &TeardownReport) {
        self(report)
    }
}

/// Default watcher: logs the report
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTeardownWatcher;

impl TeardownWatcher for LogTeardownWatcher {
    fn teardown_complete(&self, report: &TeardownReport) {
        if report.is_clean() {
            info!("Player destroyed after {} frames", report.frames_presented);
        } else {
            warn!(
                "Player destroyed with {} outstanding buffers (session joined: {})",
                report.outstanding_buffers, report.session_joined
            );
        }
    }
}
