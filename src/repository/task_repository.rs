use crate::error::{AppError, Result};
use crate::models::{Command, ExecutionState, TaskRecord};
use crate::repository::{DbPool, OPEN_STATES};
use chrono::Utc;

#[derive(Debug, Clone)]
pub struct NewTask {
    pub job_id: i64,
    pub stage_id: i64,
    pub name: String,
    pub hostname: String,
    pub service_name: String,
    pub component_name: String,
    pub command: Command,
    pub custom_command: Option<String>,
    pub context: String,
}

#[derive(Clone)]
pub struct TaskRepository {
    pool: DbPool,
}

impl TaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, task: NewTask) -> Result<TaskRecord> {
        let now = Utc::now().timestamp_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (job_id, stage_id, name, hostname, service_name, component_name, command, custom_command, context, content, result, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?, ?)
            "#,
        )
        .bind(task.job_id)
        .bind(task.stage_id)
        .bind(&task.name)
        .bind(&task.hostname)
        .bind(&task.service_name)
        .bind(&task.component_name)
        .bind(task.command as i32)
        .bind(&task.custom_command)
        .bind(&task.context)
        .bind(ExecutionState::Pending as i32)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(TaskRecord {
            id: result.last_insert_rowid(),
            job_id: task.job_id,
            stage_id: task.stage_id,
            name: task.name,
            hostname: task.hostname,
            service_name: task.service_name,
            component_name: task.component_name,
            command: task.command,
            custom_command: task.custom_command,
            context: task.context,
            content: None,
            result: None,
            state: ExecutionState::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get(&self, id: i64) -> Result<TaskRecord> {
        let task = sqlx::query_as::<_, TaskRecord>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::TaskNotFound(id))?;

        Ok(task)
    }

    pub async fn list_by_stage(&self, stage_id: i64) -> Result<Vec<TaskRecord>> {
        let tasks =
            sqlx::query_as::<_, TaskRecord>("SELECT * FROM tasks WHERE stage_id = ? ORDER BY id")
                .bind(stage_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(tasks)
    }

    pub async fn transition(
        &self,
        id: i64,
        from: ExecutionState,
        to: ExecutionState,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE tasks SET state = ?, updated_at = ? WHERE id = ? AND state = ?")
                .bind(to as i32)
                .bind(Utc::now().timestamp_millis())
                .bind(id)
                .bind(from as i32)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Records the terminal state together with the request sent and the diagnostic text.
    pub async fn finish(
        &self,
        id: i64,
        state: ExecutionState,
        content: Option<&str>,
        result: Option<&str>,
    ) -> Result<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE tasks
            SET state = ?, content = ?, result = ?, updated_at = ?
            WHERE id = ? AND state IN (?, ?)
            "#,
        )
        .bind(state as i32)
        .bind(content)
        .bind(result)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .bind(OPEN_STATES[0] as i32)
        .bind(OPEN_STATES[1] as i32)
        .execute(&self.pool)
        .await?;

        Ok(outcome.rows_affected() == 1)
    }

    pub async fn cancel_pending(&self, job_id: i64, attempt: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET state = ?, updated_at = ?
            WHERE state = ? AND stage_id IN (SELECT id FROM stages WHERE job_id = ? AND attempt = ?)
            "#,
        )
        .bind(ExecutionState::Canceled as i32)
        .bind(Utc::now().timestamp_millis())
        .bind(ExecutionState::Pending as i32)
        .bind(job_id)
        .bind(attempt)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
