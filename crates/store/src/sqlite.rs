//! SQLite storage for submissions and cascade tasks
//!
//! Every mutating operation runs inside one SQLite transaction, which makes
//! the terminal transition and its task enqueue atomic. Timestamps are stored
//! as RFC 3339 text.

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use kycaml_core::{
    CascadeStatus, CascadeTask, KycError, KycResult, NewSubmission, SubjectId, Submission,
    SubmissionId, SubmissionState, TaskUpdate,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::traits::SubmissionStore;

const SUBMISSION_COLUMNS: &str = "submission_id, subject_id, document_type, document_reference,
     jurisdiction, state, submitted_at, decided_at, risk_score, reasons_json";

const TASK_COLUMNS: &str = "submission_id, subject_id, target_state, idempotency_key, sequence,
     status, attempt_count, created_at, last_attempt_at, next_retry_at, last_error";

/// SQLite-backed [`SubmissionStore`]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given database path
    pub fn new<P: AsRef<Path>>(path: P) -> KycResult<Self> {
        let conn = Connection::open(path).map_err(db)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> KycResult<Self> {
        let conn = Connection::open_in_memory().map_err(db)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> KycResult<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> KycResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| KycError::Storage("connection lock poisoned".to_string()))
    }

    fn update_task(
        &self,
        submission_id: &SubmissionId,
        f: impl FnOnce(&Connection, &mut CascadeTask) -> KycResult<()>,
    ) -> KycResult<CascadeTask> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db)?;
        let mut task = load_task(&tx, submission_id)?;
        f(&tx, &mut task)?;
        save_task(&tx, &task)?;
        tx.commit().map_err(db)?;
        Ok(task)
    }
}

fn init_schema(conn: &Connection) -> KycResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS submissions (
            submission_id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            document_type TEXT NOT NULL,
            document_reference TEXT NOT NULL,
            jurisdiction TEXT,
            state TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            decided_at TEXT,
            risk_score INTEGER,
            reasons_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_submissions_subject
            ON submissions(subject_id);

        CREATE UNIQUE INDEX IF NOT EXISTS idx_submissions_one_active
            ON submissions(subject_id)
            WHERE state IN ('SUBMITTED', 'UNDER_REVIEW');

        CREATE TABLE IF NOT EXISTS cascade_tasks (
            submission_id TEXT PRIMARY KEY REFERENCES submissions(submission_id),
            subject_id TEXT NOT NULL,
            target_state TEXT NOT NULL,
            idempotency_key TEXT NOT NULL,
            sequence INTEGER NOT NULL UNIQUE,
            status TEXT NOT NULL,
            attempt_count INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            last_attempt_at TEXT,
            next_retry_at TEXT NOT NULL,
            last_error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_cascade_tasks_subject
            ON cascade_tasks(subject_id, sequence);

        CREATE INDEX IF NOT EXISTS idx_cascade_tasks_status
            ON cascade_tasks(status);",
    )
    .map_err(db)
}

fn db(e: rusqlite::Error) -> KycError {
    KycError::Storage(e.to_string())
}

fn parse_time(value: &str) -> KycResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| KycError::Storage(format!("invalid timestamp {:?}: {}", value, e)))
}

fn parse_opt_time(value: Option<String>) -> KycResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_time).transpose()
}

fn parse_enum<T>(value: &str) -> KycResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e: T::Err| KycError::Storage(format!("invalid value {:?}: {}", value, e)))
}

struct SubmissionRow {
    submission_id: String,
    subject_id: String,
    document_type: String,
    document_reference: String,
    jurisdiction: Option<String>,
    state: String,
    submitted_at: String,
    decided_at: Option<String>,
    risk_score: Option<i64>,
    reasons_json: String,
}

impl SubmissionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            submission_id: row.get(0)?,
            subject_id: row.get(1)?,
            document_type: row.get(2)?,
            document_reference: row.get(3)?,
            jurisdiction: row.get(4)?,
            state: row.get(5)?,
            submitted_at: row.get(6)?,
            decided_at: row.get(7)?,
            risk_score: row.get(8)?,
            reasons_json: row.get(9)?,
        })
    }

    fn into_submission(self) -> KycResult<Submission> {
        Ok(Submission {
            submission_id: SubmissionId::from(self.submission_id),
            subject_id: SubjectId::new(self.subject_id),
            document_type: parse_enum(&self.document_type)?,
            document_reference: self.document_reference,
            jurisdiction: self.jurisdiction,
            state: parse_enum(&self.state)?,
            submitted_at: parse_time(&self.submitted_at)?,
            decided_at: parse_opt_time(self.decided_at)?,
            risk_score: self.risk_score.map(|s| s as u32),
            reasons: serde_json::from_str(&self.reasons_json)
                .map_err(|e| KycError::Storage(format!("invalid reasons: {}", e)))?,
        })
    }
}

struct TaskRow {
    submission_id: String,
    subject_id: String,
    target_state: String,
    idempotency_key: String,
    sequence: i64,
    status: String,
    attempt_count: i64,
    created_at: String,
    last_attempt_at: Option<String>,
    next_retry_at: String,
    last_error: Option<String>,
}

impl TaskRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            submission_id: row.get(0)?,
            subject_id: row.get(1)?,
            target_state: row.get(2)?,
            idempotency_key: row.get(3)?,
            sequence: row.get(4)?,
            status: row.get(5)?,
            attempt_count: row.get(6)?,
            created_at: row.get(7)?,
            last_attempt_at: row.get(8)?,
            next_retry_at: row.get(9)?,
            last_error: row.get(10)?,
        })
    }

    fn into_task(self) -> KycResult<CascadeTask> {
        Ok(CascadeTask {
            submission_id: SubmissionId::from(self.submission_id),
            subject_id: SubjectId::new(self.subject_id),
            target_state: parse_enum(&self.target_state)?,
            idempotency_key: self.idempotency_key,
            sequence: self.sequence as u64,
            status: parse_enum(&self.status)?,
            attempt_count: self.attempt_count as u32,
            created_at: parse_time(&self.created_at)?,
            last_attempt_at: parse_opt_time(self.last_attempt_at)?,
            next_retry_at: parse_time(&self.next_retry_at)?,
            last_error: self.last_error,
        })
    }
}

fn load_submission(conn: &Connection, id: &SubmissionId) -> KycResult<Submission> {
    let sql = format!("SELECT {} FROM submissions WHERE submission_id = ?1", SUBMISSION_COLUMNS);
    conn.query_row(&sql, params![id.as_str()], SubmissionRow::read)
        .optional()
        .map_err(db)?
        .ok_or_else(|| KycError::NotFound(format!("submission {}", id)))?
        .into_submission()
}

fn load_task(conn: &Connection, id: &SubmissionId) -> KycResult<CascadeTask> {
    let sql = format!("SELECT {} FROM cascade_tasks WHERE submission_id = ?1", TASK_COLUMNS);
    conn.query_row(&sql, params![id.as_str()], TaskRow::read)
        .optional()
        .map_err(db)?
        .ok_or_else(|| KycError::NotFound(format!("cascade task {}", id)))?
        .into_task()
}

fn query_tasks(conn: &Connection, filter: &str, args: &[&dyn rusqlite::ToSql]) -> KycResult<Vec<CascadeTask>> {
    let sql = format!("SELECT {} FROM cascade_tasks {} ORDER BY sequence", TASK_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql).map_err(db)?;
    let rows = stmt
        .query_map(args, TaskRow::read)
        .map_err(db)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db)?;
    rows.into_iter().map(TaskRow::into_task).collect()
}

fn save_submission(conn: &Connection, sub: &Submission) -> KycResult<()> {
    let reasons_json = serde_json::to_string(&sub.reasons)
        .map_err(|e| KycError::Storage(e.to_string()))?;
    conn.execute(
        "INSERT INTO submissions
         (submission_id, subject_id, document_type, document_reference, jurisdiction,
          state, submitted_at, decided_at, risk_score, reasons_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(submission_id) DO UPDATE SET
            state = excluded.state,
            decided_at = excluded.decided_at,
            risk_score = excluded.risk_score,
            reasons_json = excluded.reasons_json",
        params![
            sub.submission_id.as_str(),
            sub.subject_id.as_str(),
            sub.document_type.to_string(),
            sub.document_reference,
            sub.jurisdiction,
            sub.state.to_string(),
            sub.submitted_at.to_rfc3339(),
            sub.decided_at.map(|t| t.to_rfc3339()),
            sub.risk_score.map(i64::from),
            reasons_json,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref err, _) if err.code == ErrorCode::ConstraintViolation => {
            KycError::Conflict(format!("subject {} already has an active submission", sub.subject_id))
        }
        other => db(other),
    })?;
    Ok(())
}

fn save_task(conn: &Connection, task: &CascadeTask) -> KycResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO cascade_tasks
         (submission_id, subject_id, target_state, idempotency_key, sequence, status,
          attempt_count, created_at, last_attempt_at, next_retry_at, last_error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            task.submission_id.as_str(),
            task.subject_id.as_str(),
            task.target_state.to_string(),
            task.idempotency_key,
            task.sequence as i64,
            task.status.to_string(),
            i64::from(task.attempt_count),
            task.created_at.to_rfc3339(),
            task.last_attempt_at.map(|t| t.to_rfc3339()),
            task.next_retry_at.to_rfc3339(),
            task.last_error,
        ],
    )
    .map_err(db)?;
    Ok(())
}

fn active_task_filter() -> String {
    format!(
        "WHERE subject_id = ?1 AND status IN ('{}', '{}')",
        CascadeStatus::Pending,
        CascadeStatus::InFlight
    )
}

impl SubmissionStore for SqliteStore {
    fn create(&self, new: NewSubmission) -> KycResult<Submission> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db)?;

        let active: Option<String> = tx
            .query_row(
                "SELECT submission_id FROM submissions
                 WHERE subject_id = ?1 AND state IN ('SUBMITTED', 'UNDER_REVIEW')
                 LIMIT 1",
                params![new.subject_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db)?;
        if let Some(active) = active {
            return Err(KycError::Conflict(format!(
                "subject {} already has active submission {}",
                new.subject_id, active
            )));
        }

        let submission = Submission::create(new, Utc::now());
        save_submission(&tx, &submission)?;
        tx.commit().map_err(db)?;

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
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db)?;
        let now = Utc::now();

        let mut submission = load_submission(&tx, submission_id)?;
        submission.apply_transition(expected, next, risk_score, reasons, now)?;
        save_submission(&tx, &submission)?;

        if next.is_terminal() {
            let last: i64 = tx
                .query_row("SELECT COALESCE(MAX(sequence), 0) FROM cascade_tasks", [], |row| {
                    row.get(0)
                })
                .map_err(db)?;
            let task = CascadeTask::for_submission(&submission, last as u64 + 1, now)?;
            save_task(&tx, &task)?;
        }

        tx.commit().map_err(db)?;
        Ok(submission)
    }

    fn get(&self, submission_id: &SubmissionId) -> KycResult<Submission> {
        let conn = self.conn()?;
        load_submission(&conn, submission_id)
    }

    fn list_by_subject(&self, subject_id: &SubjectId) -> KycResult<Vec<Submission>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM submissions WHERE subject_id = ?1 ORDER BY rowid",
            SUBMISSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(db)?;
        let rows = stmt
            .query_map(params![subject_id.as_str()], SubmissionRow::read)
            .map_err(db)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db)?;
        rows.into_iter().map(SubmissionRow::into_submission).collect()
    }

    fn task_for(&self, submission_id: &SubmissionId) -> KycResult<CascadeTask> {
        let conn = self.conn()?;
        load_task(&conn, submission_id)
    }

    fn tasks_by_subject(&self, subject_id: &SubjectId) -> KycResult<Vec<CascadeTask>> {
        let conn = self.conn()?;
        query_tasks(&conn, "WHERE subject_id = ?1", &[&subject_id.as_str()])
    }

    fn due_tasks(&self, now: DateTime<Utc>) -> KycResult<Vec<CascadeTask>> {
        let conn = self.conn()?;
        let filter = format!(
            "WHERE status IN ('{}', '{}')",
            CascadeStatus::Pending,
            CascadeStatus::InFlight
        );
        let active = query_tasks(&conn, &filter, &[])?;

        let mut seen = std::collections::HashSet::new();
        Ok(active
            .into_iter()
            .filter(|t| seen.insert(t.subject_id.clone()))
            .filter(|t| t.is_due(now))
            .collect())
    }

    fn begin_attempt(
        &self,
        submission_id: &SubmissionId,
        now: DateTime<Utc>,
    ) -> KycResult<CascadeTask> {
        self.update_task(submission_id, |conn, task| {
            let head = query_tasks(conn, &active_task_filter(), &[&task.subject_id.as_str()])?
                .into_iter()
                .next();
            if let Some(head) = head {
                if &head.submission_id != submission_id {
                    return Err(KycError::Conflict(format!(
                        "cascade {} is queued behind {}",
                        submission_id, head.submission_id
                    )));
                }
            }
            task.begin_attempt(now)
        })
    }

    fn release_expired(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> KycResult<Vec<CascadeTask>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db)?;
        let in_flight = query_tasks(&tx, "WHERE status = ?1", &[&CascadeStatus::InFlight.to_string()])?;

        let mut released = Vec::new();
        for mut task in in_flight.into_iter().filter(|t| t.lease_expired(cutoff)) {
            task.release(now)?;
            save_task(&tx, &task)?;
            released.push(task);
        }
        tx.commit().map_err(db)?;
        Ok(released)
    }

    fn complete_attempt(
        &self,
        submission_id: &SubmissionId,
        update: TaskUpdate,
    ) -> KycResult<CascadeTask> {
        self.update_task(submission_id, |_, task| task.complete(update))
    }

    fn defer(&self, submission_id: &SubmissionId, until: DateTime<Utc>) -> KycResult<CascadeTask> {
        self.update_task(submission_id, |_, task| task.defer(until))
    }

    fn requeue(&self, submission_id: &SubmissionId, now: DateTime<Utc>) -> KycResult<CascadeTask> {
        self.update_task(submission_id, |conn, task| {
            let latest: String = conn
                .query_row(
                    "SELECT submission_id FROM cascade_tasks
                     WHERE subject_id = ?1 ORDER BY sequence DESC LIMIT 1",
                    params![task.subject_id.as_str()],
                    |row| row.get(0),
                )
                .map_err(db)?;
            if latest != submission_id.as_str() {
                return Err(KycError::Conflict(format!(
                    "cascade {} has been superseded by a later decision",
                    submission_id
                )));
            }
            task.requeue(now)
        })
    }

    fn count_failed_permanent(&self) -> KycResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM cascade_tasks WHERE status = ?1",
                params![CascadeStatus::FailedPermanent.to_string()],
                |row| row.get(0),
            )
            .map_err(db)?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;
    use kycaml_core::DocumentType;
    use tempfile::tempdir;

    #[test]
    fn test_conformance() {
        conformance::run_all(&SqliteStore::in_memory().unwrap());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kycaml.db");

        let sub = {
            let store = SqliteStore::new(&path).unwrap();
            let sub = store
                .create(NewSubmission::new("42", DocumentType::Passport, "ref"))
                .unwrap();
            store
                .transition(&sub.submission_id, SubmissionState::Submitted, SubmissionState::UnderReview, None, vec![])
                .unwrap();
            store
                .transition(
                    &sub.submission_id,
                    SubmissionState::UnderReview,
                    SubmissionState::Verified,
                    Some(10),
                    vec![],
                )
                .unwrap()
        };

        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(store.get(&sub.submission_id).unwrap(), sub);

        let task = store.task_for(&sub.submission_id).unwrap();
        assert_eq!(task.status, CascadeStatus::Pending);
        assert_eq!(task.sequence, 1);
    }

    #[test]
    fn test_in_flight_task_recovered_after_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kycaml.db");
        let started = Utc::now();

        let sub = {
            let store = SqliteStore::new(&path).unwrap();
            let sub = store
                .create(NewSubmission::new("42", DocumentType::Passport, "ref"))
                .unwrap();
            store
                .transition(&sub.submission_id, SubmissionState::Submitted, SubmissionState::UnderReview, None, vec![])
                .unwrap();
            store
                .transition(&sub.submission_id, SubmissionState::UnderReview, SubmissionState::Verified, Some(10), vec![])
                .unwrap();
            // Worker dies between the two halves of the attempt.
            store.begin_attempt(&sub.submission_id, started).unwrap();
            sub
        };

        let store = SqliteStore::new(&path).unwrap();
        let later = started + chrono::Duration::minutes(10);
        assert!(store.due_tasks(later).unwrap().is_empty());

        // A lease that has not run out yet leaves the attempt alone.
        assert!(store.release_expired(started, later).unwrap().is_empty());

        let released = store
            .release_expired(later - chrono::Duration::minutes(1), later)
            .unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].submission_id, sub.submission_id);
        assert_eq!(released[0].attempt_count, 1);

        let due = store.due_tasks(later).unwrap();
        assert_eq!(due.len(), 1);
        let task = store.begin_attempt(&sub.submission_id, later).unwrap();
        assert_eq!(task.attempt_count, 2);
    }

    #[test]
    fn test_one_active_index_backs_conflict_check() {
        let store = SqliteStore::in_memory().unwrap();
        let sub = store
            .create(NewSubmission::new("9", DocumentType::Passport, "a"))
            .unwrap();

        // Bypass the pre-check to hit the unique index directly.
        let mut dup = sub.clone();
        dup.submission_id = SubmissionId::generate();
        let conn = store.conn().unwrap();
        let err = save_submission(&conn, &dup).unwrap_err();
        assert!(matches!(err, KycError::Conflict(_)));
    }
}
