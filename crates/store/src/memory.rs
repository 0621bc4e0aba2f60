//! In-memory store with per-subject partitions
//!
//! Subjects are hashed onto a fixed number of shards, each behind its own
//! mutex. All state for one subject lives in one shard, so a single lock
//! makes transition + enqueue atomic while unrelated subjects proceed in
//! parallel.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use kycaml_core::{
    CascadeTask, CascadeStatus, KycError, KycResult, NewSubmission, SubjectId, Submission,
    SubmissionId, SubmissionState, TaskUpdate,
};

use crate::traits::SubmissionStore;

/// Number of subject partitions
const SHARD_COUNT: usize = 16;

#[derive(Debug, Default)]
struct SubjectRecord {
    /// Insertion order
    submissions: Vec<Submission>,
    /// Enqueue order
    tasks: Vec<CascadeTask>,
}

impl SubjectRecord {
    fn submission_mut(&mut self, id: &SubmissionId) -> KycResult<&mut Submission> {
        self.submissions
            .iter_mut()
            .find(|s| &s.submission_id == id)
            .ok_or_else(|| KycError::NotFound(format!("submission {}", id)))
    }

    fn task_index(&self, id: &SubmissionId) -> KycResult<usize> {
        self.tasks
            .iter()
            .position(|t| &t.submission_id == id)
            .ok_or_else(|| KycError::NotFound(format!("cascade task {}", id)))
    }

    fn head_active(&self) -> Option<&CascadeTask> {
        self.tasks.iter().find(|t| t.is_active())
    }
}

#[derive(Debug, Default)]
struct Shard {
    subjects: HashMap<SubjectId, SubjectRecord>,
}

/// In-memory [`SubmissionStore`]
#[derive(Debug)]
pub struct MemoryStore {
    shards: Vec<Mutex<Shard>>,
    /// submission_id -> owning subject
    index: RwLock<HashMap<SubmissionId, SubjectId>>,
    sequence: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Shard::default())).collect(),
            index: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    fn shard(&self, subject_id: &SubjectId) -> KycResult<MutexGuard<'_, Shard>> {
        let mut hasher = DefaultHasher::new();
        subject_id.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % SHARD_COUNT;
        self.shards[idx]
            .lock()
            .map_err(|_| KycError::Storage("shard lock poisoned".to_string()))
    }

    fn subject_of(&self, submission_id: &SubmissionId) -> KycResult<SubjectId> {
        let index = self
            .index
            .read()
            .map_err(|_| KycError::Storage("index lock poisoned".to_string()))?;
        index
            .get(submission_id)
            .cloned()
            .ok_or_else(|| KycError::NotFound(format!("submission {}", submission_id)))
    }

    /// Run `f` against the record owning `submission_id` under its shard lock
    fn with_record<T>(
        &self,
        submission_id: &SubmissionId,
        f: impl FnOnce(&mut SubjectRecord) -> KycResult<T>,
    ) -> KycResult<T> {
        let subject_id = self.subject_of(submission_id)?;
        let mut shard = self.shard(&subject_id)?;
        let record = shard
            .subjects
            .get_mut(&subject_id)
            .ok_or_else(|| KycError::NotFound(format!("subject {}", subject_id)))?;
        f(record)
    }

    fn with_task<T>(
        &self,
        submission_id: &SubmissionId,
        f: impl FnOnce(&mut SubjectRecord, usize) -> KycResult<T>,
    ) -> KycResult<T> {
        self.with_record(submission_id, |record| {
            let idx = record.task_index(submission_id)?;
            f(record, idx)
        })
    }

    fn all_tasks(&self) -> KycResult<Vec<CascadeTask>> {
        let mut tasks = Vec::new();
        for shard in &self.shards {
            let shard = shard
                .lock()
                .map_err(|_| KycError::Storage("shard lock poisoned".to_string()))?;
            for record in shard.subjects.values() {
                tasks.extend(record.tasks.iter().cloned());
            }
        }
        Ok(tasks)
    }
}

impl SubmissionStore for MemoryStore {
    fn create(&self, new: NewSubmission) -> KycResult<Submission> {
        let subject_id = new.subject_id.clone();
        let mut shard = self.shard(&subject_id)?;
        let record = shard.subjects.entry(subject_id.clone()).or_default();

        if let Some(active) = record.submissions.iter().find(|s| !s.is_terminal()) {
            return Err(KycError::Conflict(format!(
                "subject {} already has active submission {}",
                subject_id, active.submission_id
            )));
        }

        let submission = Submission::create(new, Utc::now());
        record.submissions.push(submission.clone());

        self.index
            .write()
            .map_err(|_| KycError::Storage("index lock poisoned".to_string()))?
            .insert(submission.submission_id.clone(), subject_id);

        tracing::debug!(
            subject_id = %submission.subject_id,
            submission_id = %submission.submission_id,
            "Submission created"
        );
        Ok(submission)
    }

    fn transition(
        &self,
        submission_id: &SubmissionId,
        expected: SubmissionState,
        next: SubmissionState,
        risk_score: Option<u32>,
        reasons: Vec<String>,
    ) -> KycResult<Submission> {
        self.with_record(submission_id, |record| {
            let now = Utc::now();
            let mut updated = record.submission_mut(submission_id)?.clone();
            updated.apply_transition(expected, next, risk_score, reasons, now)?;

            let task = if next.is_terminal() {
                let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                Some(CascadeTask::for_submission(&updated, sequence, now)?)
            } else {
                None
            };

            // Both writes happen under the shard lock.
            *record.submission_mut(submission_id)? = updated.clone();
            if let Some(task) = task {
                record.tasks.push(task);
            }
            Ok(updated)
        })
    }

    fn get(&self, submission_id: &SubmissionId) -> KycResult<Submission> {
        self.with_record(submission_id, |record| {
            record.submission_mut(submission_id).map(|s| s.clone())
        })
    }

    fn list_by_subject(&self, subject_id: &SubjectId) -> KycResult<Vec<Submission>> {
        let shard = self.shard(subject_id)?;
        Ok(shard
            .subjects
            .get(subject_id)
            .map(|r| r.submissions.clone())
            .unwrap_or_default())
    }

    fn task_for(&self, submission_id: &SubmissionId) -> KycResult<CascadeTask> {
        self.with_task(submission_id, |record, idx| Ok(record.tasks[idx].clone()))
    }

    fn tasks_by_subject(&self, subject_id: &SubjectId) -> KycResult<Vec<CascadeTask>> {
        let shard = self.shard(subject_id)?;
        Ok(shard
            .subjects
            .get(subject_id)
            .map(|r| r.tasks.clone())
            .unwrap_or_default())
    }

    fn due_tasks(&self, now: DateTime<Utc>) -> KycResult<Vec<CascadeTask>> {
        let mut due = Vec::new();
        for shard in &self.shards {
            let shard = shard
                .lock()
                .map_err(|_| KycError::Storage("shard lock poisoned".to_string()))?;
            due.extend(
                shard
                    .subjects
                    .values()
                    .filter_map(|r| r.head_active())
                    .filter(|t| t.is_due(now))
                    .cloned(),
            );
        }
        due.sort_by_key(|t| t.sequence);
        Ok(due)
    }

    fn begin_attempt(
        &self,
        submission_id: &SubmissionId,
        now: DateTime<Utc>,
    ) -> KycResult<CascadeTask> {
        self.with_task(submission_id, |record, idx| {
            if let Some(head) = record.head_active() {
                if &head.submission_id != submission_id {
                    return Err(KycError::Conflict(format!(
                        "cascade {} is queued behind {}",
                        submission_id, head.submission_id
                    )));
                }
            }
            let task = &mut record.tasks[idx];
            task.begin_attempt(now)?;
            Ok(task.clone())
        })
    }

    fn release_expired(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> KycResult<Vec<CascadeTask>> {
        let mut released = Vec::new();
        for shard in &self.shards {
            let mut shard = shard
                .lock()
                .map_err(|_| KycError::Storage("shard lock poisoned".to_string()))?;
            for record in shard.subjects.values_mut() {
                for task in record.tasks.iter_mut().filter(|t| t.lease_expired(cutoff)) {
                    task.release(now)?;
                    released.push(task.clone());
                }
            }
        }
        released.sort_by_key(|t| t.sequence);
        Ok(released)
    }

    fn complete_attempt(
        &self,
        submission_id: &SubmissionId,
        update: TaskUpdate,
    ) -> KycResult<CascadeTask> {
        self.with_task(submission_id, |record, idx| {
            let task = &mut record.tasks[idx];
            task.complete(update)?;
            Ok(task.clone())
        })
    }

    fn defer(&self, submission_id: &SubmissionId, until: DateTime<Utc>) -> KycResult<CascadeTask> {
        self.with_task(submission_id, |record, idx| {
            let task = &mut record.tasks[idx];
            task.defer(until)?;
            Ok(task.clone())
        })
    }

    fn requeue(&self, submission_id: &SubmissionId, now: DateTime<Utc>) -> KycResult<CascadeTask> {
        self.with_task(submission_id, |record, idx| {
            if idx + 1 != record.tasks.len() {
                return Err(KycError::Conflict(format!(
                    "cascade {} has been superseded by a later decision",
                    submission_id
                )));
            }
            let task = &mut record.tasks[idx];
            task.requeue(now)?;
            Ok(task.clone())
        })
    }

    fn count_failed_permanent(&self) -> KycResult<usize> {
        Ok(self
            .all_tasks()?
            .iter()
            .filter(|t| t.status == CascadeStatus::FailedPermanent)
            .count())
    }
}
