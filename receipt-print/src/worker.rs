//! Job execution
//!
//! A [`PrintWorker`] runs each submitted job on its own Tokio task and
//! reports the outcome through a oneshot channel. Clones share a single
//! busy slot: while one job is in flight, every other submit is rejected
//! with `Job("busy")` before any backend is touched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{info, info_span, warn, Instrument};

use crate::error::{PrintError, PrintResult};
use crate::job::{JobId, JobReport, PrintJob};
use crate::transport::{TransportFactory, TransportHandle};

/// Submits print jobs, one at a time
#[derive(Debug, Clone)]
pub struct PrintWorker {
    runtime: Handle,
    factory: Arc<TransportFactory>,
    busy: Arc<AtomicBool>,
}

impl PrintWorker {
    pub fn new(runtime: Handle, factory: TransportFactory) -> Self {
        Self {
            runtime,
            factory: Arc::new(factory),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Start `job` immediately.
    ///
    /// Returns `Job("busy")` without spawning anything when another job is
    /// still in flight.
    pub fn submit(&self, job: PrintJob) -> PrintResult<JobHandle> {
        let Some(guard) = BusyGuard::acquire(&self.busy) else {
            warn!(job_id = %job.id, action = %job.action, "Worker busy, job rejected");
            return Err(PrintError::busy());
        };

        let id = job.id;
        let span = info_span!("print_job", job_id = %id, action = %job.action);
        let factory = Arc::clone(&self.factory);
        let (tx, rx) = oneshot::channel();

        self.runtime.spawn(
            async move {
                let outcome = execute(job, &factory).await;
                match &outcome {
                    Ok(report) => info!(
                        backend = report.backend,
                        bytes = report.bytes_sent,
                        "Print job completed"
                    ),
                    Err(e) => warn!(kind = %e.kind(), error = %e, "Print job failed"),
                }

                // Free the slot before the submitter can observe the outcome
                drop(guard);
                let _ = tx.send(outcome);
            }
            .instrument(span),
        );

        Ok(JobHandle { id, rx })
    }
}

/// Validate, render, open, send, close.
async fn execute(job: PrintJob, factory: &TransportFactory) -> PrintResult<JobReport> {
    job.validate()?;
    let transport = factory.transport_for(&job.config)?;

    let job = Arc::new(job);
    let rendered = {
        let job = Arc::clone(&job);
        tokio::task::spawn_blocking(move || job.render()).await??
    };

    let mut handle = transport.open(&job.config).await?;
    if let Some(width) = rendered.raster_width {
        if let Some(hint) = handle.media_width() {
            hint.set_media_width(width);
        }
    }

    let sent = send_all(&mut handle, &rendered.chunks).await;
    let bytes_sent = handle.bytes_sent();
    handle.close().await;
    sent?;

    Ok(JobReport {
        job_id: job.id,
        action: job.action,
        backend: transport.name(),
        bytes_sent,
    })
}

async fn send_all(handle: &mut TransportHandle, chunks: &[Vec<u8>]) -> PrintResult<()> {
    for chunk in chunks {
        handle.send(chunk).await?;
    }
    Ok(())
}

/// Holds the worker's busy slot until dropped, including on panic.
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Pending outcome of a submitted job
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    rx: oneshot::Receiver<PrintResult<JobReport>>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub async fn wait(self) -> PrintResult<JobReport> {
        self.rx.await.unwrap_or_else(|_| Err(lost()))
    }

    /// Block the current thread until the job finishes.
    ///
    /// Must not be called from inside the runtime.
    pub fn blocking_wait(self) -> PrintResult<JobReport> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(lost()))
    }
}

fn lost() -> PrintError {
    PrintError::job("print job ended without reporting an outcome")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, TransportConfig};
    use crate::error::ErrorKind;
    use crate::transport::DryRunTransport;

    fn dry_worker() -> (PrintWorker, DryRunTransport) {
        let dry = DryRunTransport::new();
        let worker = PrintWorker::new(Handle::current(), TransportFactory::dry_run(&dry));
        (worker, dry)
    }

    fn config() -> DeviceConfig {
        DeviceConfig::new(TransportConfig::network("127.0.0.1", 9100))
    }

    #[tokio::test]
    async fn test_feed_job_reports_bytes() {
        let (worker, dry) = dry_worker();
        let handle = worker.submit(PrintJob::feed(config())).unwrap();
        let id = handle.id();

        let report = handle.wait().await.unwrap();
        assert_eq!(report.job_id, id);
        assert_eq!(report.backend, "dry_run");
        assert_eq!(report.bytes_sent, 5);
        assert_eq!(dry.total_bytes(), 5);
        assert!(!worker.is_busy());
    }

    #[tokio::test]
    async fn test_slot_released_after_failure() {
        let (worker, dry) = dry_worker();
        let job = PrintJob::new(crate::job::JobAction::Print, None, config());

        let err = worker.submit(job).unwrap().wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(!worker.is_busy());
        assert_eq!(dry.snapshot().opens, 0);

        assert!(worker.submit(PrintJob::cut(config())).unwrap().wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_sender_is_job_error() {
        let (tx, rx) = oneshot::channel::<PrintResult<JobReport>>();
        drop(tx);
        let handle = JobHandle {
            id: JobId::new(),
            rx,
        };
        let err = handle.wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Job);
    }

    #[test]
    fn test_blocking_wait_outside_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let dry = DryRunTransport::new();
        let worker = PrintWorker::new(runtime.handle().clone(), TransportFactory::dry_run(&dry));

        let report = worker
            .submit(PrintJob::cut(config()))
            .unwrap()
            .blocking_wait()
            .unwrap();
        assert_eq!(report.bytes_sent, 6);
    }

    #[test]
    fn test_busy_guard() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = BusyGuard::acquire(&flag).unwrap();
        assert!(BusyGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(BusyGuard::acquire(&flag).is_some());
    }
}
