//! Scheduler module for polling inverters on a fixed cadence.

use crate::inverter::InverterHandle;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Real-world span, in seconds, that smoothing should average over.
pub const SMOOTHING_SPAN_SECS: u64 = 900;

/// Number of consecutive samples covering [`SMOOTHING_SPAN_SECS`].
///
/// Floor division: intervals longer than the span yield 0, which downstream
/// smoothing treats as "no smoothing".
pub fn smoothing_window(polling_frequency: u64) -> usize {
    SMOOTHING_SPAN_SECS
        .checked_div(polling_frequency)
        .unwrap_or(0) as usize
}

/// Drives periodic refreshes of every inverter handle.
pub struct Scheduler {
    polling_frequency: Duration,
    smoothing_window: usize,
    stop: Mutex<Option<broadcast::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler; the smoothing window is fixed from here on.
    pub fn new(polling_frequency_secs: u64) -> Self {
        Self {
            // interval() panics on a zero period
            polling_frequency: Duration::from_secs(polling_frequency_secs.max(1)),
            smoothing_window: smoothing_window(polling_frequency_secs),
            stop: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn smoothing_window(&self) -> usize {
        self.smoothing_window
    }

    /// Start polling the given handles in a background task.
    ///
    /// Does nothing if the scheduler is already running.
    pub fn start(&self, handles: Vec<Arc<dyn InverterHandle>>) {
        let mut stop = self.stop.lock().unwrap_or_else(PoisonError::into_inner);
        if stop.is_some() {
            return;
        }

        let (tx, rx) = broadcast::channel(1);
        *stop = Some(tx);

        tracing::info!(
            "Starting scheduler for {} inverters every {:?} (smoothing window {})",
            handles.len(),
            self.polling_frequency,
            self.smoothing_window
        );

        let task = tokio::spawn(run_poll_loop(handles, self.polling_frequency, rx));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Stop polling and wait for the loop to exit.
    ///
    /// Refreshes already in flight are left to finish on their own.
    pub async fn stop(&self) {
        let stop = self.stop.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tx) = stop {
            let _ = tx.send(());
        }

        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("Scheduler task ended abnormally: {}", e);
            }
            tracing::info!("Scheduler stopped");
        }
    }
}

/// Dispatch refreshes, wait one period, repeat until stopped.
async fn run_poll_loop(
    handles: Vec<Arc<dyn InverterHandle>>,
    period: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);
    // A late tick pushes the schedule back rather than bursting
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => dispatch_refreshes(&handles),
        }
    }
}

/// Fire-and-forget: the loop never waits on a refresh.
fn dispatch_refreshes(handles: &[Arc<dyn InverterHandle>]) {
    for handle in handles {
        tracing::debug!("Scheduler: refreshing {}", handle.name());
        let handle = handle.clone();
        tokio::spawn(async move {
            handle.update_inverter_data().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inverter::Accessory;
    use async_trait::async_trait;
    use tokio::time::Instant;

    /// Handle that records when each refresh was dispatched.
    struct RecordingHandle {
        name: String,
        delay: Duration,
        calls: Mutex<Vec<Instant>>,
    }

    impl RecordingHandle {
        fn new(name: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                delay,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InverterHandle for RecordingHandle {
        fn name(&self) -> &str {
            &self.name
        }

        async fn update_inverter_data(&self) {
            self.calls.lock().unwrap().push(Instant::now());
            tokio::time::sleep(self.delay).await;
        }

        fn get_accessories(&self) -> Vec<Accessory> {
            Vec::new()
        }
    }

    #[test]
    fn test_smoothing_window() {
        assert_eq!(smoothing_window(300), 3);
        assert_eq!(smoothing_window(60), 15);
        assert_eq!(smoothing_window(9), 100);
        assert_eq!(smoothing_window(900), 1);
        assert_eq!(smoothing_window(1000), 0);
        assert_eq!(smoothing_window(0), 0);

        assert_eq!(Scheduler::new(300).smoothing_window(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_every_handle_each_tick() {
        let a = RecordingHandle::new("a", Duration::ZERO);
        let b = RecordingHandle::new("b", Duration::ZERO);

        let scheduler = Scheduler::new(10);
        scheduler.start(vec![a.clone() as Arc<dyn InverterHandle>, b.clone()]);

        // Ticks at 0s, 10s, 20s, 30s
        tokio::time::sleep(Duration::from_secs(35)).await;

        assert_eq!(a.calls().len(), 4);
        assert_eq!(b.calls().len(), 4);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_refresh_does_not_delay_ticks() {
        // Each refresh outlives two polling periods
        let slow = RecordingHandle::new("slow", Duration::from_secs(25));

        let scheduler = Scheduler::new(10);
        scheduler.start(vec![slow.clone() as Arc<dyn InverterHandle>]);

        tokio::time::sleep(Duration::from_secs(45)).await;

        let calls = slow.calls();
        assert_eq!(calls.len(), 5);
        for pair in calls.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_secs(10), "gap {:?} shorter than period", gap);
            assert!(gap < Duration::from_secs(11), "gap {:?} drifted", gap);
        }

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_polling() {
        let handle = RecordingHandle::new("a", Duration::ZERO);

        let scheduler = Scheduler::new(10);
        scheduler.start(vec![handle.clone() as Arc<dyn InverterHandle>]);

        tokio::time::sleep(Duration::from_secs(15)).await;
        scheduler.stop().await;
        let before = handle.calls().len();
        assert_eq!(before, 2);

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(handle.calls().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_noop() {
        let handle = RecordingHandle::new("a", Duration::ZERO);

        let scheduler = Scheduler::new(10);
        scheduler.start(vec![handle.clone() as Arc<dyn InverterHandle>]);
        scheduler.start(vec![handle.clone() as Arc<dyn InverterHandle>]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.calls().len(), 1);

        scheduler.stop().await;
    }
}
