//! Ramp-up/ramp-down rate coroutine: a background task that linearly
//! steps a shared `rate` atomic between `[1, configured rate]` with a
//! 1-second step size per stage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const STEP: Duration = Duration::from_secs(1);
const RAMP_STAGES: u64 = 10;

/// Spawns the ramp coroutine, ramping `rate` up to `target` over up to
/// [`RAMP_STAGES`] one-second steps, holding there for the bulk of
/// `total_duration`, then ramping back down over the same number of
/// stages at the end.
pub fn spawn(
    rate: Arc<AtomicU64>,
    target: u64,
    total_duration: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let target = target.max(1);
        let ramp_stages = RAMP_STAGES.min(target);
        let ramp_duration = STEP * ramp_stages as u32;

        for stage in 1..=ramp_stages {
            if cancel.is_cancelled() {
                return;
            }
            let step_rate = (target * stage) / ramp_stages;
            rate.store(step_rate.max(1), Ordering::Relaxed);
            if tokio::time::timeout(STEP, cancel.cancelled()).await.is_ok() {
                return;
            }
        }
        rate.store(target, Ordering::Relaxed);

        if total_duration <= ramp_duration * 2 {
            return;
        }
        let hold = total_duration - ramp_duration * 2;
        if tokio::time::timeout(hold, cancel.cancelled()).await.is_ok() {
            return;
        }

        for stage in (0..ramp_stages).rev() {
            if cancel.is_cancelled() {
                return;
            }
            let step_rate = (target * stage) / ramp_stages;
            rate.store(step_rate.max(1), Ordering::Relaxed);
            if tokio::time::timeout(STEP, cancel.cancelled()).await.is_ok() {
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ramps_up_to_target_then_holds() {
        let rate = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();
        let handle = spawn(rate.clone(), 100, Duration::from_secs(30), cancel.clone());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(rate.load(Ordering::Relaxed), 100);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(rate.load(Ordering::Relaxed), 100);

        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn never_drops_to_zero() {
        let rate = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();
        let handle = spawn(rate.clone(), 5, Duration::from_secs(2), cancel.clone());
        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(1)).await;
            assert!(rate.load(Ordering::Relaxed) >= 1);
        }
        cancel.cancel();
        let _ = handle.await;
    }
}
