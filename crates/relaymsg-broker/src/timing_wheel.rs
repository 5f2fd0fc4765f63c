//! Low-resolution deferred actions: delayed socket close after preemption,
//! and (by the same mechanism) any other "do this N seconds from now"
//! housekeeping the handler needs. The core guarantee — "run this closure
//! no sooner than `delay`" — is cheaply satisfied by one sleeping task per
//! scheduled action rather than an actual wheel data structure.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct TimingWheel;

impl TimingWheel {
    /// Schedule `action` to run after `delay`. Returns a handle the caller
    /// may `.abort()` to cancel before it fires.
    pub fn after<F>(delay: Duration, action: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn action_runs_after_the_delay_elapses() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let handle = TimingWheel::after(Duration::from_millis(20), async move {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(!fired.load(Ordering::SeqCst));
        handle.await.unwrap();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn aborting_before_it_fires_prevents_the_action() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let handle = TimingWheel::after(Duration::from_millis(200), async move {
            flag.store(true, Ordering::SeqCst);
        });
        handle.abort();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
