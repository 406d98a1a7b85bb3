use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

use crate::authz::errors::AuthzError;
use crate::authz::service::AuthzService;
use crate::settings;

pub const RELOAD_POLICIES_JOB: &str = "reload_policies";
pub const RENEW_SESSION_JOB: &str = "renew_session";
pub const PURGE_IDENTITY_CACHE_JOB: &str = "purge_identity_cache";

pub const JOB_NAMES: [&str; 3] = [
    RELOAD_POLICIES_JOB,
    RENEW_SESSION_JOB,
    PURGE_IDENTITY_CACHE_JOB,
];

/// Executions kept in memory before the oldest is dropped.
const LEDGER_CAPACITY: usize = 256;

/// One run of a background job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobExecution {
    pub id: u64,
    pub job_name: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub success: Option<bool>,
    pub error_message: Option<String>,
    pub records_processed: Option<i64>,
}

/// In-memory record of recent job executions.
#[derive(Debug, Default)]
pub struct JobLedger {
    next_id: AtomicU64,
    executions: Mutex<VecDeque<JobExecution>>,
}

impl JobLedger {
    /// Record the start of a job execution
    pub fn start_job_execution(&self, job_name: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut executions = self.executions.lock();
        if executions.len() >= LEDGER_CAPACITY {
            executions.pop_front();
        }
        executions.push_back(JobExecution {
            id,
            job_name: job_name.to_string(),
            started_at: Utc::now().timestamp(),
            completed_at: None,
            success: None,
            error_message: None,
            records_processed: None,
        });
        id
    }

    /// Record the completion of a job execution
    pub fn complete_job_execution(
        &self,
        execution_id: u64,
        success: bool,
        error_message: Option<String>,
        records_processed: Option<i64>,
    ) {
        let mut executions = self.executions.lock();
        if let Some(execution) = executions.iter_mut().find(|e| e.id == execution_id) {
            execution.completed_at = Some(Utc::now().timestamp());
            execution.success = Some(success);
            execution.error_message = error_message;
            execution.records_processed = records_processed;
        }
    }

    /// Forget an execution that turned out to be a skipped tick.
    fn discard(&self, execution_id: u64) {
        self.executions.lock().retain(|e| e.id != execution_id);
    }

    pub fn last_execution(&self, job_name: &str) -> Option<JobExecution> {
        self.executions
            .lock()
            .iter()
            .rev()
            .find(|e| e.job_name == job_name)
            .cloned()
    }

    pub fn executions(&self) -> Vec<JobExecution> {
        self.executions.lock().iter().cloned().collect()
    }
}

/// The running scheduler plus what its jobs act on.
pub struct BackgroundJobs {
    sched: JobScheduler,
    service: Arc<AuthzService>,
    ledger: Arc<JobLedger>,
    jobs: usize,
}

impl BackgroundJobs {
    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.ledger
    }

    /// Number of jobs that were scheduled (zero-interval jobs are left out).
    pub fn job_count(&self) -> usize {
        self.jobs
    }

    pub async fn trigger(&self, job_name: &str) -> Result<usize, AuthzError> {
        trigger_job_manually(&self.service, &self.ledger, job_name).await
    }

    /// Stop the timers and the scheduler. Work already running is not cut short.
    pub async fn shutdown(mut self) -> Result<(), AuthzError> {
        self.service.stop();
        self.sched
            .shutdown()
            .await
            .map_err(|e| AuthzError::Scheduler(format!("Failed to stop job scheduler: {}", e)))?;
        info!("Job scheduler stopped");
        Ok(())
    }
}

/// Initialize and start the job scheduler with all background tasks
pub async fn init_scheduler(
    service: Arc<AuthzService>,
    cfg: &settings::Authz,
) -> Result<BackgroundJobs, AuthzError> {
    let mut sched = JobScheduler::new()
        .await
        .map_err(|e| AuthzError::Scheduler(format!("Failed to create job scheduler: {}", e)))?;
    let ledger = Arc::new(JobLedger::default());

    let schedule: [(&'static str, Duration); 3] = [
        (RELOAD_POLICIES_JOB, cfg.reload_interval()),
        (RENEW_SESSION_JOB, cfg.session_renewal_interval()),
        (PURGE_IDENTITY_CACHE_JOB, cfg.identity_cache_ttl()),
    ];

    let mut jobs = 0;
    for (job_name, every) in schedule {
        if every.is_zero() {
            info!(job = job_name, "Job disabled by zero interval");
            continue;
        }

        let service_clone = service.clone();
        let ledger_clone = ledger.clone();
        let job = Job::new_repeated_async(every, move |_uuid, _l| {
            let service = service_clone.clone();
            let ledger = ledger_clone.clone();
            Box::pin(async move {
                debug!("Running {} job", job_name);
                let _ = run_job(&service, &ledger, job_name, false).await;
            })
        })
        .map_err(|e| {
            AuthzError::Scheduler(format!("Failed to create {} job: {}", job_name, e))
        })?;

        sched
            .add(job)
            .await
            .map_err(|e| AuthzError::Scheduler(format!("Failed to add {} job: {}", job_name, e)))?;
        jobs += 1;
    }

    if let Err(e) = sched.start().await {
        let _ = sched.shutdown().await;
        return Err(AuthzError::Scheduler(format!(
            "Failed to start job scheduler: {}",
            e
        )));
    }

    info!("Job scheduler started with {} jobs", jobs);

    Ok(BackgroundJobs {
        sched,
        service,
        ledger,
        jobs,
    })
}

/// Manually trigger a job by name.
///
/// Unlike a timer tick this runs even if the job's timer was stopped.
pub async fn trigger_job_manually(
    service: &AuthzService,
    ledger: &JobLedger,
    job_name: &str,
) -> Result<usize, AuthzError> {
    info!("Manually triggering job: {}", job_name);
    match run_job(service, ledger, job_name, true).await {
        Ok(count) => {
            let count = count.unwrap_or(0);
            info!(
                "Manually triggered job {} completed: {} records",
                job_name, count
            );
            Ok(count)
        }
        Err(e) => {
            error!("Manually triggered job {} failed: {}", job_name, e);
            Err(e)
        }
    }
}

/// Run one job and record it in the ledger.
///
/// Returns `Ok(None)` when a timer tick was skipped.
async fn run_job(
    service: &AuthzService,
    ledger: &JobLedger,
    job_name: &str,
    manual: bool,
) -> Result<Option<usize>, AuthzError> {
    if !JOB_NAMES.contains(&job_name) {
        return Err(AuthzError::Scheduler(format!(
            "Unknown job name: {}",
            job_name
        )));
    }

    let execution_id = ledger.start_job_execution(job_name);

    let result = match job_name {
        RELOAD_POLICIES_JOB if manual => service.reload().await.map(|o| o.tuples),
        RELOAD_POLICIES_JOB => match service.reloader().tick().await {
            Some(result) => result.map(|o| o.tuples),
            None => {
                ledger.discard(execution_id);
                return Ok(None);
            }
        },
        RENEW_SESSION_JOB => {
            if !manual && service.renewer().is_stopped() {
                ledger.discard(execution_id);
                return Ok(None);
            }
            service.renewer().renew().await.map(|_| 1)
        }
        _ => Ok(service.identities().purge_expired()),
    };

    match result {
        Ok(count) => {
            debug!("{} job finished: {} records", job_name, count);
            ledger.complete_job_execution(execution_id, true, None, Some(count as i64));
            Ok(Some(count))
        }
        Err(e) => {
            ledger.complete_job_execution(execution_id, false, Some(e.to_string()), None);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_records_start_and_completion() {
        let ledger = JobLedger::default();
        let id = ledger.start_job_execution(RELOAD_POLICIES_JOB);

        let running = ledger.last_execution(RELOAD_POLICIES_JOB).unwrap();
        assert_eq!(running.id, id);
        assert_eq!(running.success, None);
        assert_eq!(running.completed_at, None);

        ledger.complete_job_execution(id, false, Some("store down".into()), None);
        let done = ledger.last_execution(RELOAD_POLICIES_JOB).unwrap();
        assert_eq!(done.success, Some(false));
        assert_eq!(done.error_message.as_deref(), Some("store down"));
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn test_ledger_last_execution_is_per_job() {
        let ledger = JobLedger::default();
        let a = ledger.start_job_execution(RELOAD_POLICIES_JOB);
        let b = ledger.start_job_execution(RENEW_SESSION_JOB);
        let c = ledger.start_job_execution(RELOAD_POLICIES_JOB);

        assert_eq!(ledger.last_execution(RELOAD_POLICIES_JOB).unwrap().id, c);
        assert_eq!(ledger.last_execution(RENEW_SESSION_JOB).unwrap().id, b);
        assert!(a < c);
        assert!(ledger.last_execution(PURGE_IDENTITY_CACHE_JOB).is_none());
    }

    #[test]
    fn test_ledger_discard_and_capacity() {
        let ledger = JobLedger::default();
        let id = ledger.start_job_execution(RELOAD_POLICIES_JOB);
        ledger.discard(id);
        assert!(ledger.executions().is_empty());

        for _ in 0..LEDGER_CAPACITY + 10 {
            ledger.start_job_execution(PURGE_IDENTITY_CACHE_JOB);
        }
        assert_eq!(ledger.executions().len(), LEDGER_CAPACITY);
    }
}
