use crate::error::{AppError, Result};
use crate::models::{ExecutionState, JobRecord};
use crate::repository::{DbPool, OPEN_STATES};
use chrono::Utc;

#[derive(Clone)]
pub struct JobRepository {
    pool: DbPool,
}

impl JobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        cluster_id: Option<i64>,
        name: &str,
        context: &str,
    ) -> Result<JobRecord> {
        let now = Utc::now().timestamp_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (cluster_id, name, context, state, attempt, created_at, updated_at)
            VALUES (?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(cluster_id)
        .bind(name)
        .bind(context)
        .bind(ExecutionState::Pending as i32)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(JobRecord {
            id: result.last_insert_rowid(),
            cluster_id,
            name: name.to_string(),
            context: context.to_string(),
            state: ExecutionState::Pending,
            attempt: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get(&self, id: i64) -> Result<JobRecord> {
        let job = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::JobNotFound(id))?;

        Ok(job)
    }

    pub async fn list_all(&self) -> Result<Vec<JobRecord>> {
        let jobs = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs ORDER BY id DESC")
            .fetch_all(&self.pool)
            .await?;

        Ok(jobs)
    }

    /// Moves the job from `from` to `to`. Returns false when another writer got there first.
    pub async fn transition(
        &self,
        id: i64,
        from: ExecutionState,
        to: ExecutionState,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE jobs SET state = ?, updated_at = ? WHERE id = ? AND state = ?")
            .bind(to as i32)
            .bind(Utc::now().timestamp_millis())
            .bind(id)
            .bind(from as i32)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Writes a terminal state unless the job already holds one.
    pub async fn finish(&self, id: i64, state: ExecutionState) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET state = ?, updated_at = ? WHERE id = ? AND state IN (?, ?)",
        )
        .bind(state as i32)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .bind(OPEN_STATES[0] as i32)
        .bind(OPEN_STATES[1] as i32)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Starts a new attempt of a failed job with the given context.
    pub async fn begin_retry(&self, id: i64, context: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, attempt = attempt + 1, context = ?, updated_at = ?
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(ExecutionState::Pending as i32)
        .bind(context)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .bind(ExecutionState::Failed as i32)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_cluster_id(&self, id: i64, cluster_id: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET cluster_id = ?, updated_at = ? WHERE id = ?")
            .bind(cluster_id)
            .bind(Utc::now().timestamp_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
