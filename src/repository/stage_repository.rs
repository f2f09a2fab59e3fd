use crate::error::{AppError, Result};
use crate::models::{ExecutionState, StageRecord};
use crate::repository::{DbPool, OPEN_STATES};
use chrono::Utc;

#[derive(Debug, Clone)]
pub struct NewStage {
    pub job_id: i64,
    pub attempt: i64,
    pub stage_order: i64,
    pub name: String,
    pub service_name: String,
    pub component_name: String,
    pub context: String,
}

#[derive(Clone)]
pub struct StageRepository {
    pool: DbPool,
}

impl StageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, stage: NewStage) -> Result<StageRecord> {
        let now = Utc::now().timestamp_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO stages (job_id, attempt, stage_order, name, service_name, component_name, context, state, message, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(stage.job_id)
        .bind(stage.attempt)
        .bind(stage.stage_order)
        .bind(&stage.name)
        .bind(&stage.service_name)
        .bind(&stage.component_name)
        .bind(&stage.context)
        .bind(ExecutionState::Pending as i32)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(StageRecord {
            id: result.last_insert_rowid(),
            job_id: stage.job_id,
            attempt: stage.attempt,
            stage_order: stage.stage_order,
            name: stage.name,
            service_name: stage.service_name,
            component_name: stage.component_name,
            context: stage.context,
            state: ExecutionState::Pending,
            message: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get(&self, id: i64) -> Result<StageRecord> {
        let stage = sqlx::query_as::<_, StageRecord>("SELECT * FROM stages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::StageNotFound(id))?;

        Ok(stage)
    }

    pub async fn list_by_job(&self, job_id: i64, attempt: i64) -> Result<Vec<StageRecord>> {
        let stages = sqlx::query_as::<_, StageRecord>(
            "SELECT * FROM stages WHERE job_id = ? AND attempt = ? ORDER BY stage_order",
        )
        .bind(job_id)
        .bind(attempt)
        .fetch_all(&self.pool)
        .await?;

        Ok(stages)
    }

    pub async fn transition(
        &self,
        id: i64,
        from: ExecutionState,
        to: ExecutionState,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE stages SET state = ?, updated_at = ? WHERE id = ? AND state = ?")
                .bind(to as i32)
                .bind(Utc::now().timestamp_millis())
                .bind(id)
                .bind(from as i32)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn finish(&self, id: i64, state: ExecutionState, message: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE stages SET state = ?, message = ?, updated_at = ? WHERE id = ? AND state IN (?, ?)",
        )
        .bind(state as i32)
        .bind(message)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .bind(OPEN_STATES[0] as i32)
        .bind(OPEN_STATES[1] as i32)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Cancels every still-pending stage of one job attempt.
    pub async fn cancel_pending(&self, job_id: i64, attempt: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE stages SET state = ?, updated_at = ? WHERE job_id = ? AND attempt = ? AND state = ?",
        )
        .bind(ExecutionState::Canceled as i32)
        .bind(Utc::now().timestamp_millis())
        .bind(job_id)
        .bind(attempt)
        .bind(ExecutionState::Pending as i32)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
