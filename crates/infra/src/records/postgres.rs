//! Postgres-backed record store.
//!
//! Status transitions read the row `FOR UPDATE`, apply the domain state
//! machine in Rust and write the result back inside one transaction, so
//! retries of the same run observe a consistent record.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use carrion_core::{
    CaseId, CaseRecord, JobRecord, JobStatus, OwnerRef, RecordKey, RecordKind, RunId, SessionId,
    SessionRecord, SessionState, Transition, UploadId, UserId, UserRecord,
};

use super::{RecordStore, RecordStoreError};

/// Postgres-backed record store over the application tables.
#[derive(Debug, Clone)]
pub struct PostgresRecordStore {
    pool: Arc<PgPool>,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the application tables for local development.
    ///
    /// In production the application database owns this schema.
    pub async fn ensure_schema(&self) -> Result<(), RecordStoreError> {
        for ddl in [
            r#"
            CREATE TABLE IF NOT EXISTS job_records (
                kind            TEXT NOT NULL,
                id              TEXT NOT NULL,
                owner_type      TEXT NOT NULL,
                owner_id        TEXT NOT NULL,
                status          TEXT NOT NULL,
                failure_reason  TEXT NULL,
                run_id          UUID NULL,
                created_at      TIMESTAMPTZ NOT NULL,
                updated_at      TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (kind, id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS cases (
                id                    TEXT PRIMARY KEY,
                recalculation_needed  BOOLEAN NOT NULL DEFAULT FALSE,
                updated_at            TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL,
                created_at  TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL,
                last_active_at  TIMESTAMPTZ NOT NULL,
                state           TEXT NOT NULL,
                delete_after    TIMESTAMPTZ NULL
            )
            "#,
        ] {
            sqlx::query(ddl)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn lock_job(
        tx: &mut Transaction<'_, Postgres>,
        key: &RecordKey,
    ) -> Result<JobRecord, RecordStoreError> {
        let row = sqlx::query(
            r#"
            SELECT kind, id, owner_type, owner_id, status, failure_reason, run_id, created_at, updated_at
            FROM job_records
            WHERE kind = $1 AND id = $2
            FOR UPDATE
            "#,
        )
        .bind(key.kind.as_str())
        .bind(&key.id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_job", e))?
        .ok_or_else(|| RecordStoreError::not_found(key))?;
        job_from_row(&row)
    }

    async fn store_job(
        tx: &mut Transaction<'_, Postgres>,
        record: &JobRecord,
    ) -> Result<(), RecordStoreError> {
        sqlx::query(
            r#"
            UPDATE job_records
            SET status = $3, failure_reason = $4, run_id = $5, updated_at = $6
            WHERE kind = $1 AND id = $2
            "#,
        )
        .bind(record.key().kind.as_str())
        .bind(&record.key().id)
        .bind(record.status().as_str())
        .bind(record.failure_reason())
        .bind(record.run_id().map(uuid::Uuid::from))
        .bind(record.updated_at())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("store_job", e))?;
        Ok(())
    }

    /// Lock a job record, apply `change` and persist it if it moved.
    async fn transition<F>(&self, key: &RecordKey, change: F) -> Result<Transition, RecordStoreError>
    where
        F: FnOnce(&mut JobRecord) -> Result<Transition, RecordStoreError> + Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("transition", e))?;

        let mut record = Self::lock_job(&mut tx, key).await?;
        let transition = change(&mut record)?;
        if transition == Transition::Applied {
            Self::store_job(&mut tx, &record).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("transition", e))?;
        Ok(transition)
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RecordStoreError {
    match err {
        sqlx::Error::Database(db_err) => RecordStoreError::Storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            RecordStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => RecordStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, RecordStoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| RecordStoreError::Storage(format!("failed to read column {name}: {e}")))
}

fn job_from_row(row: &PgRow) -> Result<JobRecord, RecordStoreError> {
    let kind: RecordKind = column::<String>(row, "kind")?.parse()?;
    let owner_id: String = column(row, "owner_id")?;
    let owner = match column::<String>(row, "owner_type")?.as_str() {
        "case" => OwnerRef::Case(CaseId::new(owner_id)?),
        "upload" => OwnerRef::Upload(UploadId::new(owner_id)?),
        "user" => OwnerRef::User(UserId::new(owner_id)?),
        other => {
            return Err(RecordStoreError::Storage(format!(
                "unknown owner type: {other}"
            )));
        }
    };
    let status: JobStatus = column::<String>(row, "status")?.parse()?;
    let run_id: Option<uuid::Uuid> = column(row, "run_id")?;

    Ok(JobRecord::from_parts(
        RecordKey {
            kind,
            id: column(row, "id")?,
        },
        owner,
        status,
        column(row, "failure_reason")?,
        run_id.map(RunId::from),
        column(row, "created_at")?,
        column(row, "updated_at")?,
    ))
}

fn owner_columns(owner: &OwnerRef) -> (&'static str, &str) {
    match owner {
        OwnerRef::Case(id) => ("case", id.as_str()),
        OwnerRef::Upload(id) => ("upload", id.as_str()),
        OwnerRef::User(id) => ("user", id.as_str()),
    }
}

fn session_from_row(row: &PgRow) -> Result<SessionRecord, RecordStoreError> {
    let state = match column::<String>(row, "state")?.as_str() {
        "active" => SessionState::Active,
        "scheduled_for_deletion" => SessionState::ScheduledForDeletion {
            delete_after: column::<Option<DateTime<Utc>>>(row, "delete_after")?.ok_or_else(
                || RecordStoreError::Storage("scheduled session without delete_after".into()),
            )?,
        },
        other => {
            return Err(RecordStoreError::Storage(format!(
                "unknown session state: {other}"
            )));
        }
    };

    Ok(SessionRecord {
        id: SessionId::new(column::<String>(row, "id")?)?,
        user_id: UserId::new(column::<String>(row, "user_id")?)?,
        last_active_at: column(row, "last_active_at")?,
        state,
    })
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    #[instrument(skip(self), fields(record_id = %key), err)]
    async fn job_record(&self, key: &RecordKey) -> Result<Option<JobRecord>, RecordStoreError> {
        let row = sqlx::query(
            r#"
            SELECT kind, id, owner_type, owner_id, status, failure_reason, run_id, created_at, updated_at
            FROM job_records
            WHERE kind = $1 AND id = $2
            "#,
        )
        .bind(key.kind.as_str())
        .bind(&key.id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("job_record", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self, record), fields(record_id = %record.key()), err)]
    async fn insert_job_record(&self, record: JobRecord) -> Result<(), RecordStoreError> {
        let (owner_type, owner_id) = owner_columns(record.owner());
        sqlx::query(
            r#"
            INSERT INTO job_records
                (kind, id, owner_type, owner_id, status, failure_reason, run_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (kind, id) DO UPDATE
            SET owner_type = EXCLUDED.owner_type,
                owner_id = EXCLUDED.owner_id,
                status = EXCLUDED.status,
                failure_reason = EXCLUDED.failure_reason,
                run_id = EXCLUDED.run_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.key().kind.as_str())
        .bind(&record.key().id)
        .bind(owner_type)
        .bind(owner_id)
        .bind(record.status().as_str())
        .bind(record.failure_reason())
        .bind(record.run_id().map(uuid::Uuid::from))
        .bind(record.created_at())
        .bind(record.updated_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job_record", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(record_id = %key), err)]
    async fn delete_job_record(&self, key: &RecordKey) -> Result<bool, RecordStoreError> {
        let result = sqlx::query("DELETE FROM job_records WHERE kind = $1 AND id = $2")
            .bind(key.kind.as_str())
            .bind(&key.id)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_job_record", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(record_id = %key, run_id = %run_id), err)]
    async fn begin_job(
        &self,
        key: &RecordKey,
        run_id: RunId,
    ) -> Result<Transition, RecordStoreError> {
        self.transition(key, |record| Ok(record.begin(run_id, Utc::now())?))
            .await
    }

    #[instrument(skip(self), fields(record_id = %key), err)]
    async fn complete_job(&self, key: &RecordKey) -> Result<Transition, RecordStoreError> {
        self.transition(key, |record| Ok(record.complete(Utc::now())?))
            .await
    }

    #[instrument(skip(self, reason), fields(record_id = %key, run_id = %run_id), err)]
    async fn fail_job(
        &self,
        key: &RecordKey,
        run_id: RunId,
        reason: &str,
    ) -> Result<Transition, RecordStoreError> {
        self.transition(key, |record| Ok(record.fail(run_id, reason, Utc::now())?))
            .await
    }

    #[instrument(skip(self), fields(case_id = %id), err)]
    async fn case(&self, id: &CaseId) -> Result<Option<CaseRecord>, RecordStoreError> {
        let row = sqlx::query("SELECT id, recalculation_needed, updated_at FROM cases WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("case", e))?;

        row.map(|row| {
            Ok(CaseRecord {
                id: CaseId::new(column::<String>(&row, "id")?)?,
                recalculation_needed: column(&row, "recalculation_needed")?,
                updated_at: column(&row, "updated_at")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self, case), fields(case_id = %case.id), err)]
    async fn upsert_case(&self, case: CaseRecord) -> Result<(), RecordStoreError> {
        sqlx::query(
            r#"
            INSERT INTO cases (id, recalculation_needed, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET recalculation_needed = EXCLUDED.recalculation_needed, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(case.id.as_str())
        .bind(case.recalculation_needed)
        .bind(case.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_case", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(case_id = %id), err)]
    async fn clear_recalculation_flag(&self, id: &CaseId) -> Result<bool, RecordStoreError> {
        let row = sqlx::query(
            r#"
            WITH prev AS (
                SELECT recalculation_needed FROM cases WHERE id = $1 FOR UPDATE
            )
            UPDATE cases
            SET recalculation_needed = FALSE,
                updated_at = CASE WHEN prev.recalculation_needed THEN $2 ELSE cases.updated_at END
            FROM prev
            WHERE cases.id = $1
            RETURNING prev.recalculation_needed AS was_needed
            "#,
        )
        .bind(id.as_str())
        .bind(Utc::now())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("clear_recalculation_flag", e))?
        .ok_or_else(|| RecordStoreError::not_found(format!("case {id}")))?;

        column(&row, "was_needed")
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn user(&self, id: &UserId) -> Result<Option<UserRecord>, RecordStoreError> {
        let row = sqlx::query("SELECT id, email, created_at FROM users WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("user", e))?;

        row.map(|row| {
            Ok(UserRecord {
                id: UserId::new(column::<String>(&row, "id")?)?,
                email: column(&row, "email")?,
                created_at: column(&row, "created_at")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn upsert_user(&self, user: UserRecord) -> Result<(), RecordStoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.email)
        .bind(user.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_user", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn delete_user(&self, id: &UserId) -> Result<u64, RecordStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;

        let sessions = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?
            .rows_affected();

        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;
        Ok(sessions)
    }

    #[instrument(skip(self), fields(session_id = %id), err)]
    async fn session(&self, id: &SessionId) -> Result<Option<SessionRecord>, RecordStoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, last_active_at, state, delete_after FROM sessions WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("session", e))?;

        row.as_ref().map(session_from_row).transpose()
    }

    #[instrument(skip(self, session), fields(session_id = %session.id), err)]
    async fn upsert_session(&self, session: SessionRecord) -> Result<(), RecordStoreError> {
        let delete_after = match session.state {
            SessionState::Active => None,
            SessionState::ScheduledForDeletion { delete_after } => Some(delete_after),
        };

        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, last_active_at, state, delete_after)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                last_active_at = EXCLUDED.last_active_at,
                state = EXCLUDED.state,
                delete_after = EXCLUDED.delete_after
            "#,
        )
        .bind(session.id.as_str())
        .bind(session.user_id.as_str())
        .bind(session.last_active_at)
        .bind(session.state.as_str())
        .bind(delete_after)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_session", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(session_id = %id), err)]
    async fn delete_session(&self, id: &SessionId) -> Result<bool, RecordStoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_session", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn idle_sessions(
        &self,
        idle_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, RecordStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, last_active_at, state, delete_after
            FROM sessions
            WHERE state = 'active' AND last_active_at <= $1
            ORDER BY last_active_at ASC
            LIMIT $2
            "#,
        )
        .bind(idle_before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("idle_sessions", e))?;

        rows.iter().map(session_from_row).collect()
    }
}
