use crate::error::Result;
use crate::models::{HostComponentRecord, MaintainState};
use crate::repository::DbPool;
use chrono::Utc;

#[derive(Clone)]
pub struct HostComponentRepository {
    pool: DbPool,
}

impl HostComponentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts the row if missing and leaves an existing row untouched.
    pub async fn create_if_absent(
        &self,
        cluster_id: i64,
        hostname: &str,
        service_name: &str,
        component_name: &str,
        state: MaintainState,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO host_components (cluster_id, hostname, service_name, component_name, state, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(cluster_id, hostname, component_name) DO NOTHING
            "#,
        )
        .bind(cluster_id)
        .bind(hostname)
        .bind(service_name)
        .bind(component_name)
        .bind(state as i32)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert_state(
        &self,
        cluster_id: i64,
        hostname: &str,
        service_name: &str,
        component_name: &str,
        state: MaintainState,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO host_components (cluster_id, hostname, service_name, component_name, state, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(cluster_id, hostname, component_name)
            DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at
            "#,
        )
        .bind(cluster_id)
        .bind(hostname)
        .bind(service_name)
        .bind(component_name)
        .bind(state as i32)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_by_cluster(&self, cluster_id: i64) -> Result<Vec<HostComponentRecord>> {
        let rows = sqlx::query_as::<_, HostComponentRecord>(
            "SELECT * FROM host_components WHERE cluster_id = ? ORDER BY id",
        )
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn find(
        &self,
        cluster_id: i64,
        hostname: &str,
        component_name: &str,
    ) -> Result<Option<HostComponentRecord>> {
        let row = sqlx::query_as::<_, HostComponentRecord>(
            "SELECT * FROM host_components WHERE cluster_id = ? AND hostname = ? AND component_name = ?",
        )
        .bind(cluster_id)
        .bind(hostname)
        .bind(component_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}
