use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Semaphore, broadcast};
use tokio::time::{Instant, sleep_until, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::jobs::client::{RemoteError, RemoteJobClient};
use crate::jobs::normalize::normalize_result;
use crate::jobs::types::{
    FailureKind, JobArguments, JobFailure, JobHandle, JobMode, JobOutcome, JobRequest, JobStatus,
    ProgressEvent, StatusReport,
};

pub const DEFAULT_PER_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_OVERALL_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_POLL_RETRIES: u32 = 3;
pub const DEFAULT_MAX_IN_FLIGHT_JOBS: usize = 8;

const PROGRESS_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    pub per_call_timeout: Duration,
    pub overall_timeout: Duration,
    pub poll_interval: Duration,
    /// Consecutive failed polls tolerated before the job is reported failed.
    pub max_poll_retries: u32,
    /// Upper bound on queued jobs being polled at the same time.
    pub max_in_flight_jobs: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            per_call_timeout: DEFAULT_PER_CALL_TIMEOUT,
            overall_timeout: DEFAULT_OVERALL_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_retries: DEFAULT_MAX_POLL_RETRIES,
            max_in_flight_jobs: DEFAULT_MAX_IN_FLIGHT_JOBS,
        }
    }
}

/// Per-call overrides of [`JobSettings`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
    pub timeout: Option<Duration>,
    pub poll_interval: Option<Duration>,
}

/// Drives remote generation jobs to exactly one [`JobOutcome`].
///
/// Fast jobs are a single `run` call under a deadline. Queued jobs go through
/// submit, a status poll loop and a single fetch, all under one deadline:
///
/// * the deadline is checked before each poll is issued; once it has passed no
///   further poll or fetch is made and the outcome is [`JobOutcome::TimedOut`];
/// * a poll already in flight is allowed to finish only if it does so before
///   the deadline;
/// * after the provider reports success the result is fetched once, and any
///   failure to collect it (including running out of time) is reported as
///   [`FailureKind::ResultUnavailable`].
pub struct JobOrchestrator {
    client: Arc<dyn RemoteJobClient>,
    settings: JobSettings,
    queue_slots: Semaphore,
    progress: broadcast::Sender<ProgressEvent>,
}

impl JobOrchestrator {
    pub fn new(client: Arc<dyn RemoteJobClient>, settings: JobSettings) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            client,
            queue_slots: Semaphore::new(settings.max_in_flight_jobs.max(1)),
            settings,
            progress,
        }
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// Streams progress of every queued job run by this orchestrator.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Number of queued jobs that could start polling right now.
    pub fn available_queue_slots(&self) -> usize {
        self.queue_slots.available_permits()
    }

    pub async fn execute(&self, request: &JobRequest, options: JobOptions) -> JobOutcome {
        match request.mode {
            JobMode::Fast => {
                let budget = options.timeout.unwrap_or(self.settings.per_call_timeout);
                self.execute_fast(&request.endpoint, &request.arguments, budget)
                    .await
            }
            JobMode::Queued => {
                let budget = options.timeout.unwrap_or(self.settings.overall_timeout);
                let interval = options.poll_interval.unwrap_or(self.settings.poll_interval);
                self.execute_queued(&request.endpoint, &request.arguments, budget, interval)
                    .await
            }
        }
    }

    pub async fn execute_fast(
        &self,
        endpoint: &str,
        arguments: &JobArguments,
        per_call_timeout: Duration,
    ) -> JobOutcome {
        if let Err(failure) = check_endpoint(endpoint)
            .and_then(|()| check_non_zero("timeout", per_call_timeout))
        {
            return JobOutcome::Failure(failure);
        }

        info!(endpoint, timeout_ms = per_call_timeout.as_millis() as u64, "running fast job");
        let started = Instant::now();
        // Dropping the in-flight call on timeout aborts the HTTP request.
        let outcome = match timeout(per_call_timeout, self.client.run(endpoint, arguments)).await {
            Ok(Ok(raw)) => settle(raw),
            Ok(Err(err)) => JobOutcome::Failure(err.into()),
            Err(_) => JobOutcome::TimedOut {
                elapsed: started.elapsed(),
            },
        };
        log_outcome(endpoint, None, &outcome);
        outcome
    }

    pub async fn execute_queued(
        &self,
        endpoint: &str,
        arguments: &JobArguments,
        overall_timeout: Duration,
        poll_interval: Duration,
    ) -> JobOutcome {
        let checked = check_endpoint(endpoint)
            .and_then(|()| check_non_zero("poll interval", poll_interval))
            .and_then(|()| {
                if overall_timeout > poll_interval {
                    Ok(())
                } else {
                    Err(JobFailure::invalid_argument(format!(
                        "timeout ({overall_timeout:?}) must exceed the poll interval ({poll_interval:?})"
                    )))
                }
            });
        if let Err(failure) = checked {
            return JobOutcome::Failure(failure);
        }

        let started = Instant::now();
        let deadline = started + overall_timeout;
        let timed_out = || JobOutcome::TimedOut {
            elapsed: started.elapsed(),
        };

        if self.queue_slots.available_permits() == 0 {
            info!(endpoint, "all queue slots busy, waiting for one to free up");
        }
        let _slot = match timeout_at(deadline, self.queue_slots.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return JobOutcome::failure(FailureKind::ProviderError, "job admission is closed");
            }
            Err(_) => {
                warn!(endpoint, "no queue slot became free before the deadline");
                return timed_out();
            }
        };

        info!(endpoint, timeout_ms = overall_timeout.as_millis() as u64, "submitting queued job");
        let handle = match timeout_at(deadline, self.client.submit(endpoint, arguments)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                let outcome = JobOutcome::Failure(err.into());
                log_outcome(endpoint, None, &outcome);
                return outcome;
            }
            Err(_) => return timed_out(),
        };
        info!(endpoint, job_id = %handle.request_id, "job submitted");

        let mut guard = CancelOnDrop::new(Arc::clone(&self.client), handle.clone());
        let outcome = self
            .poll_to_completion(&handle, &mut guard, started, deadline, poll_interval)
            .await;
        log_outcome(endpoint, Some(&handle.request_id), &outcome);
        outcome
    }

    async fn poll_to_completion(
        &self,
        handle: &JobHandle,
        guard: &mut CancelOnDrop,
        started: Instant,
        deadline: Instant,
        poll_interval: Duration,
    ) -> JobOutcome {
        let mut poll_count = 0u32;
        let mut consecutive_errors = 0u32;

        loop {
            if Instant::now() >= deadline {
                warn!(job_id = %handle.request_id, poll_count, "deadline reached, abandoning job");
                return JobOutcome::TimedOut {
                    elapsed: started.elapsed(),
                };
            }

            poll_count += 1;
            let report = match timeout_at(deadline, self.client.poll_status(handle)).await {
                Ok(Ok(report)) => report,
                Ok(Err(err)) if err.is_transient() => {
                    consecutive_errors += 1;
                    if consecutive_errors >= self.settings.max_poll_retries {
                        return JobOutcome::Failure(JobFailure::new(
                            FailureKind::TransientNetwork,
                            format!(
                                "status polling failed {consecutive_errors} times in a row: {err}"
                            ),
                        ));
                    }
                    warn!(
                        job_id = %handle.request_id,
                        poll_count,
                        consecutive_errors,
                        "status poll failed, retrying: {err}"
                    );
                    sleep_until(next_poll_at(poll_interval, deadline)).await;
                    continue;
                }
                Ok(Err(err)) => return JobOutcome::Failure(err.into()),
                Err(_) => {
                    warn!(job_id = %handle.request_id, poll_count, "status poll outlived the deadline");
                    return JobOutcome::TimedOut {
                        elapsed: started.elapsed(),
                    };
                }
            };
            consecutive_errors = 0;

            debug!(
                job_id = %handle.request_id,
                poll_count,
                status = %report.label,
                queue_position = report.queue_position,
                "job status"
            );
            // No subscribers is fine.
            let _ = self.progress.send(ProgressEvent::from_report(handle, &report));

            if report.status.is_terminal() {
                guard.disarm();
            }
            match report.status {
                JobStatus::Succeeded => return self.fetch(handle, deadline).await,
                JobStatus::Failed => return provider_job_failure(report),
                JobStatus::Cancelled => {
                    return JobOutcome::Failure(
                        JobFailure::new(
                            FailureKind::ProviderJobFailed,
                            "job was cancelled by the provider",
                        )
                        .with_logs(report.logs),
                    );
                }
                JobStatus::Queued | JobStatus::InProgress => {}
            }

            sleep_until(next_poll_at(poll_interval, deadline)).await;
        }
    }

    async fn fetch(&self, handle: &JobHandle, deadline: Instant) -> JobOutcome {
        match timeout_at(deadline, self.client.fetch_result(handle)).await {
            Ok(Ok(raw)) => settle(raw),
            Ok(Err(err)) => JobOutcome::failure(
                FailureKind::ResultUnavailable,
                format!("job finished but its result could not be collected: {err}"),
            ),
            Err(_) => JobOutcome::failure(
                FailureKind::ResultUnavailable,
                "job finished but its result was not collected before the deadline",
            ),
        }
    }
}

fn next_poll_at(poll_interval: Duration, deadline: Instant) -> Instant {
    (Instant::now() + poll_interval).min(deadline)
}

fn settle(raw: Value) -> JobOutcome {
    match normalize_result(raw) {
        Ok(payload) => JobOutcome::Success(payload),
        Err(failure) => JobOutcome::Failure(failure),
    }
}

fn provider_job_failure(report: StatusReport) -> JobOutcome {
    let message = report
        .error
        .clone()
        .or_else(|| report.logs.last().cloned())
        .unwrap_or_else(|| format!("provider reported status {}", report.label));
    JobOutcome::Failure(
        JobFailure::new(FailureKind::ProviderJobFailed, message).with_logs(report.logs),
    )
}

fn check_endpoint(endpoint: &str) -> Result<(), JobFailure> {
    if endpoint.trim().is_empty() {
        return Err(JobFailure::invalid_argument("endpoint must not be empty"));
    }
    Ok(())
}

fn check_non_zero(name: &str, value: Duration) -> Result<(), JobFailure> {
    if value.is_zero() {
        return Err(JobFailure::invalid_argument(format!(
            "{name} must be greater than zero"
        )));
    }
    Ok(())
}

fn log_outcome(endpoint: &str, job_id: Option<&str>, outcome: &JobOutcome) {
    let job_id = job_id.unwrap_or("-");
    match outcome {
        JobOutcome::Success(payload) => {
            info!(endpoint, job_id, media = payload.media.len(), "job succeeded");
        }
        JobOutcome::Failure(failure) => {
            warn!(endpoint, job_id, kind = %failure.kind, "job failed: {}", failure.message);
        }
        JobOutcome::TimedOut { elapsed } => {
            warn!(endpoint, job_id, elapsed_ms = elapsed.as_millis() as u64, "job timed out");
        }
    }
}

/// Requests provider-side cancellation of a submitted job unless disarmed.
///
/// Covers both deadline expiry and the caller dropping the job future.
struct CancelOnDrop {
    client: Arc<dyn RemoteJobClient>,
    handle: Option<JobHandle>,
}

impl CancelOnDrop {
    fn new(client: Arc<dyn RemoteJobClient>, handle: JobHandle) -> Self {
        Self {
            client,
            handle: Some(handle),
        }
    }

    fn disarm(&mut self) {
        self.handle = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = Arc::clone(&self.client);
        runtime.spawn(async move {
            match client.cancel(&handle).await {
                Ok(()) => debug!(job_id = %handle.request_id, "cancellation requested"),
                Err(RemoteError::Unsupported(_)) => {
                    debug!(job_id = %handle.request_id, "provider cannot cancel, job left running")
                }
                Err(err) => warn!(job_id = %handle.request_id, "cancellation failed: {err}"),
            }
        });
    }
}
