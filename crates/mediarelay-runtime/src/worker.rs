use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Data source plus renderer for one output
#[async_trait]
pub trait Poller: Send + 'static {
    /// Raw data from the external service
    type Data: Send + 'static;
    /// Rendered output handed to the sink
    type Output: Send + 'static;

    /// Query the external service
    async fn fetch(&mut self) -> Result<Self::Data>;

    /// Turn fetched data into output
    fn render(&self, data: Self::Data) -> Self::Output;
}

/// Where rendered output goes
#[async_trait]
pub trait Sink<T: Send>: Send + Sync + 'static {
    /// Deliver one rendered output
    async fn publish(&self, item: T) -> Result<()>;
}

/// Identity and schedule of one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    /// Slot key, also used as the log context
    pub slot: String,
    /// Delay between the end of one cycle and the start of the next
    pub interval: Duration,
}

impl WorkerSpec {
    /// Create a spec for `slot` polling every `interval`
    pub fn new(slot: impl Into<String>, interval: Duration) -> Self {
        Self {
            slot: slot.into(),
            interval,
        }
    }
}

/// Counters returned when a worker stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Cycles started
    pub cycles: u64,
    /// Cycles that ended in an error or a panic
    pub failures: u64,
}

/// fetch -> render -> publish -> sleep, until cancelled
pub struct PollingWorker<P, S> {
    spec: WorkerSpec,
    poller: P,
    sink: S,
}

impl<P, S> PollingWorker<P, S>
where
    P: Poller,
    S: Sink<P::Output>,
{
    /// Assemble a worker
    pub const fn new(spec: WorkerSpec, poller: P, sink: S) -> Self {
        Self { spec, poller, sink }
    }

    /// Spawn the worker loop on the Tokio runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<WorkerReport> {
        tokio::spawn(self.run(cancel))
    }

    /// Run cycles until `cancel` fires.
    ///
    /// Cancellation is checked before each cycle and during the sleep; a cycle
    /// that has started runs to completion.
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerReport {
        let mut report = WorkerReport::default();
        let slot = self.spec.slot.clone();
        info!(slot = %slot, interval_secs = self.spec.interval.as_secs(), "Worker started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            report.cycles += 1;
            let cycle = AssertUnwindSafe(run_cycle(&mut self.poller, &self.sink))
                .catch_unwind()
                .await;
            match cycle {
                Ok(Ok(())) => debug!(slot = %slot, cycle = report.cycles, "Worker cycle finished"),
                Ok(Err(e)) => {
                    report.failures += 1;
                    error!(slot = %slot, error = %e, "Worker cycle failed");
                }
                Err(panic) => {
                    report.failures += 1;
                    error!(slot = %slot, panic = %panic_message(&*panic), "Worker cycle panicked");
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.spec.interval) => {}
            }
        }

        info!(
            slot = %slot,
            cycles = report.cycles,
            failures = report.failures,
            "Worker stopped"
        );
        report
    }
}

async fn run_cycle<P, S>(poller: &mut P, sink: &S) -> Result<()>
where
    P: Poller,
    S: Sink<P::Output>,
{
    let data = poller.fetch().await?;
    let output = poller.render(data);
    sink.publish(output).await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    enum Behavior {
        Succeed,
        Fail,
        Panic,
    }

    struct CountingPoller {
        fetches: Arc<AtomicUsize>,
        behavior: Behavior,
    }

    #[async_trait]
    impl Poller for CountingPoller {
        type Data = usize;
        type Output = String;

        async fn fetch(&mut self) -> Result<usize> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            match self.behavior {
                Behavior::Succeed => Ok(n),
                Behavior::Fail => anyhow::bail!("simulated fetch failure"),
                Behavior::Panic => panic!("simulated panic"),
            }
        }

        fn render(&self, data: usize) -> String {
            format!("cycle {data}")
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        published: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Sink<String> for RecordingSink {
        async fn publish(&self, item: String) -> Result<()> {
            self.published.lock().await.push(item);
            Ok(())
        }
    }

    type TestWorker = PollingWorker<CountingPoller, RecordingSink>;

    fn worker(behavior: Behavior) -> (TestWorker, Arc<AtomicUsize>, RecordingSink) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let sink = RecordingSink::default();
        let worker = PollingWorker::new(
            WorkerSpec::new("streams", Duration::from_secs(60)),
            CountingPoller {
                fetches: fetches.clone(),
                behavior,
            },
            sink.clone(),
        );
        (worker, fetches, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_follow_interval() {
        let (worker, fetches, sink) = worker(Behavior::Succeed);
        let cancel = CancellationToken::new();
        let handle = worker.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
        let Ok(report) = handle.await else {
            panic!("worker task failed");
        };

        // t=0, t=60, t=120
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
        assert_eq!(report, WorkerReport { cycles: 3, failures: 0 });
        assert_eq!(
            *sink.published.lock().await,
            vec!["cycle 1", "cycle 2", "cycle 3"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_runs_nothing() {
        let (worker, fetches, _sink) = worker(Behavior::Succeed);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = worker.run(cancel).await;
        assert_eq!(report.cycles, 0);
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_loop() {
        let (worker, fetches, sink) = worker(Behavior::Fail);
        let cancel = CancellationToken::new();
        let handle = worker.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(130)).await;
        cancel.cancel();
        let Ok(report) = handle.await else {
            panic!("worker task failed");
        };

        assert_eq!(fetches.load(Ordering::SeqCst), 3);
        assert_eq!(report.failures, 3);
        assert!(sink.published.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panics_are_contained() {
        let (worker, fetches, _sink) = worker(Behavior::Panic);
        let cancel = CancellationToken::new();
        let handle = worker.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(70)).await;
        cancel.cancel();
        let Ok(report) = handle.await else {
            panic!("panic escaped the worker");
        };

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert_eq!(report, WorkerReport { cycles: 2, failures: 2 });
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }
}
