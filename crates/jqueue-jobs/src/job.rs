//! Job record and lifecycle state machine.

use crate::error::{JobError, JobResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Default retry budget for new jobs.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Unique job identifier, assigned by the store or by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    /// Creates a job ID from a raw value.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Job status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    #[default]
    Pending,
    /// Claimed by exactly one worker.
    Running,
    /// Handler succeeded.
    Completed,
    /// Retry budget exhausted or job abandoned.
    Failed,
    /// Cancelled by an administrator before it ran.
    Cancelled,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Returns the canonical lowercase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true for states with no outgoing transitions.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Returns true if `self -> next` is an edge of the lifecycle.
    pub const fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Pending)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| JobError::InvalidState(format!("unknown job status: {}", s)))
    }
}

/// What a failed attempt did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Budget remains; the job is back in `pending`.
    Retry,
    /// Budget exhausted; the job is terminally `failed`.
    Exhausted,
}

/// A unit of work and its current lifecycle state.
///
/// This is also the exchange format carried by the transport, so field names
/// are part of the wire contract and must stay stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Identifier; `None` until the store or producer assigns one.
    pub id: Option<JobId>,

    /// Job type name, used as the handler dispatch key.
    pub name: String,

    /// Lifecycle status.
    #[serde(default)]
    pub status: JobStatus,

    /// Higher values are selected first.
    #[serde(default)]
    pub priority: i32,

    /// Handler-interpreted payload.
    #[serde(default)]
    pub payload: Value,

    /// Outcome recorded on completion or failure.
    #[serde(default)]
    pub result: Option<Value>,

    /// Failed attempts so far.
    #[serde(default)]
    pub retries: u32,

    /// Retry budget.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Submitting owner, if tracked.
    #[serde(default)]
    pub owner: Option<String>,

    /// Creation time, used for age ordering.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Start of the current or last attempt.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// Time the job reached `completed` or `failed`.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Job {
    /// Creates a pending job with no retries consumed.
    pub fn new(name: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            id: None,
            name: name.into(),
            status: JobStatus::Pending,
            priority: 0,
            payload: payload.into(),
            result: None,
            retries: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            owner: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Sets a producer-assigned ID.
    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the owner.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Overrides the creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Assigns the ID. An ID, once set, never changes.
    pub fn assign_id(&mut self, id: JobId) -> JobResult<()> {
        match self.id {
            None => {
                self.id = Some(id);
                Ok(())
            }
            Some(existing) if existing == id => Ok(()),
            Some(existing) => Err(JobError::InvalidState(format!(
                "job {} cannot be re-assigned id {}",
                existing, id
            ))),
        }
    }

    /// Returns the ID or an error if none was assigned yet.
    pub fn require_id(&self) -> JobResult<JobId> {
        self.id
            .ok_or_else(|| JobError::InvalidState(format!("job '{}' has no id", self.name)))
    }

    /// ID for log output.
    pub fn display_id(&self) -> String {
        self.id
            .map_or_else(|| "unassigned".to_string(), |id| id.to_string())
    }

    /// Returns true once `retries` has reached the budget.
    pub fn is_exhausted(&self) -> bool {
        self.retries >= self.max_retries
    }

    /// Retries still available.
    pub fn remaining_retries(&self) -> u32 {
        self.max_retries.saturating_sub(self.retries)
    }

    /// Serializes to the exchange format.
    pub fn to_json(&self) -> JobResult<String> {
        serde_json::to_string(self).map_err(|e| JobError::Serialization(e.to_string()))
    }

    /// Deserializes from the exchange format.
    pub fn from_json(json: &str) -> JobResult<Self> {
        serde_json::from_str(json).map_err(JobError::MalformedJob)
    }

    /// Deserializes from raw exchange bytes.
    pub fn from_slice(bytes: &[u8]) -> JobResult<Self> {
        serde_json::from_slice(bytes).map_err(JobError::MalformedJob)
    }

    /// `pending -> running`.
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> JobResult<()> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// `running -> completed`.
    pub fn mark_completed(&mut self, result: Option<Value>, now: DateTime<Utc>) -> JobResult<()> {
        self.transition(JobStatus::Completed)?;
        self.result = result;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Charges one failed attempt against the budget.
    ///
    /// `running -> pending` while `retries + 1 <= max_retries`, otherwise
    /// `running -> failed`. A terminal failure leaves `retries` at the budget.
    pub fn record_failure(&mut self, detail: &str, now: DateTime<Utc>) -> JobResult<FailureOutcome> {
        self.record_failure_with(failure_result(detail), now)
    }

    /// Like [`Job::record_failure`], recording a caller-built result document.
    pub fn record_failure_with(
        &mut self,
        result: Value,
        now: DateTime<Utc>,
    ) -> JobResult<FailureOutcome> {
        if self.status != JobStatus::Running {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: JobStatus::Failed,
            });
        }

        self.result = Some(result);

        if self.retries < self.max_retries {
            self.retries += 1;
            self.status = JobStatus::Pending;
            Ok(FailureOutcome::Retry)
        } else {
            self.retries = self.max_retries;
            self.status = JobStatus::Failed;
            self.completed_at = Some(now);
            Ok(FailureOutcome::Exhausted)
        }
    }

    /// `running -> failed` without touching the retry budget.
    pub fn abandon(&mut self, detail: &str, now: DateTime<Utc>) -> JobResult<()> {
        self.transition(JobStatus::Failed)?;
        self.result = Some(failure_result(detail));
        self.completed_at = Some(now);
        Ok(())
    }

    /// `pending -> cancelled`.
    pub fn cancel(&mut self) -> JobResult<()> {
        self.transition(JobStatus::Cancelled)
    }

    fn transition(&mut self, to: JobStatus) -> JobResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Result document recorded for a failure.
pub fn failure_result(detail: &str) -> Value {
    json!({ "error": detail })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn running(max_retries: u32) -> Job {
        let mut job = Job::new("email", "x").with_id(1).with_max_retries(max_retries);
        job.mark_running(Utc::now()).unwrap();
        job
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = Job::new("email", json!({"to": "a@b.c"}));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retries, 0);
        assert_eq!(job.max_retries, DEFAULT_MAX_RETRIES);
        assert!(job.id.is_none());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_round_trip_preserves_every_field() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let job = Job {
            id: Some(JobId::new(42)),
            name: "compress".to_string(),
            status: JobStatus::Failed,
            priority: -7,
            payload: json!({"path": "/tmp/a.txt", "level": 9}),
            result: Some(json!({"error": "disk full"})),
            retries: 2,
            max_retries: 2,
            owner: Some("team-a".to_string()),
            created_at: created,
            started_at: Some(created + chrono::Duration::milliseconds(1500)),
            completed_at: Some(created + chrono::Duration::seconds(3)),
        };

        let restored = Job::from_json(&job.to_json().unwrap()).unwrap();
        assert_eq!(restored, job);
    }

    #[test]
    fn test_wire_field_names_are_stable() {
        let json = Job::new("email", "x").with_id(3).to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        for field in [
            "id", "name", "status", "priority", "payload", "result", "retries", "max_retries",
            "owner", "created_at", "started_at", "completed_at",
        ] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(value["status"], "pending");
    }

    #[test]
    fn test_decodes_minimal_producer_record() {
        let job = Job::from_json(
            r#"{"id":7,"name":"email","status":"pending","priority":1,"payload":"x","retries":0,"max_retries":3}"#,
        )
        .unwrap();

        assert_eq!(job.id, Some(JobId::new(7)));
        assert_eq!(job.payload, json!("x"));
        assert!(job.result.is_none());
    }

    #[test]
    fn test_malformed_job() {
        assert!(matches!(Job::from_json("{\"name\": 5}"), Err(JobError::MalformedJob(_))));
        assert!(matches!(Job::from_slice(b"\xff\xfe"), Err(JobError::MalformedJob(_))));
        assert!(matches!(
            Job::from_json(r#"{"name":"x","status":"sleeping"}"#),
            Err(JobError::MalformedJob(_))
        ));
    }

    #[test]
    fn test_assign_id_is_immutable() {
        let mut job = Job::new("email", "x");
        job.assign_id(JobId::new(5)).unwrap();
        job.assign_id(JobId::new(5)).unwrap();
        assert!(job.assign_id(JobId::new(6)).is_err());
        assert_eq!(job.id, Some(JobId::new(5)));
    }

    #[test]
    fn test_transition_edges() {
        use JobStatus::*;
        let allowed = [
            (Pending, Running),
            (Pending, Cancelled),
            (Running, Completed),
            (Running, Pending),
            (Running, Failed),
        ];

        for from in JobStatus::ALL {
            for to in JobStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_reject_running() {
        let mut job = running(0);
        job.mark_completed(None, Utc::now()).unwrap();
        assert!(job.status.is_terminal());
        assert!(matches!(
            job.mark_running(Utc::now()),
            Err(JobError::InvalidTransition { from: JobStatus::Completed, .. })
        ));
    }

    #[test]
    fn test_record_failure_budget_boundary() {
        let mut job = running(2);

        assert_eq!(job.record_failure("boom", Utc::now()).unwrap(), FailureOutcome::Retry);
        assert_eq!((job.status, job.retries), (JobStatus::Pending, 1));

        job.mark_running(Utc::now()).unwrap();
        assert_eq!(job.record_failure("boom", Utc::now()).unwrap(), FailureOutcome::Retry);
        assert_eq!((job.status, job.retries), (JobStatus::Pending, 2));

        job.mark_running(Utc::now()).unwrap();
        assert_eq!(job.record_failure("boom", Utc::now()).unwrap(), FailureOutcome::Exhausted);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retries, 2);
        assert_eq!(job.result, Some(json!({"error": "boom"})));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_record_failure_requires_running() {
        let mut job = Job::new("email", "x");
        assert!(job.record_failure("boom", Utc::now()).is_err());
        assert_eq!(job.retries, 0);
    }

    #[test]
    fn test_abandon_keeps_budget() {
        let mut job = running(3);
        job.abandon("no handler", Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retries, 0);
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let mut job = Job::new("email", "x");
        job.cancel().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);

        let mut job = running(1);
        assert!(job.cancel().is_err());
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("RUNNING".parse::<JobStatus>().unwrap(), JobStatus::Running);
        assert!("dead_letter".parse::<JobStatus>().is_err());
    }
}
