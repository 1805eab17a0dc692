use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Session-scoped hint that the remote store is worth trying.
///
/// Starts optimistic. A transient failure flips it off for the rest of the
/// session; only an explicit reconnect flips it back on. Last writer wins.
#[derive(Debug)]
pub struct RemoteStatus {
    reachable: AtomicBool,
}

impl Default for RemoteStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStatus {
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Relaxed)
    }

    pub fn mark_reachable(&self) {
        if !self.reachable.swap(true, Ordering::Relaxed) {
            info!("remote store reachable again");
        }
    }

    pub fn mark_unreachable(&self) {
        if self.reachable.swap(false, Ordering::Relaxed) {
            info!("remote store marked unreachable, serving from local storage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RemoteStatus;

    #[test]
    fn starts_reachable_and_flips() {
        let status = RemoteStatus::new();
        assert!(status.is_reachable());
        status.mark_unreachable();
        status.mark_unreachable();
        assert!(!status.is_reachable());
        status.mark_reachable();
        assert!(status.is_reachable());
    }

    #[test]
    fn instances_do_not_share_state() {
        let a = RemoteStatus::new();
        let b = RemoteStatus::new();
        a.mark_unreachable();
        assert!(b.is_reachable());
    }
}
