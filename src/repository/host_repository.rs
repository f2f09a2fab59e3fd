use crate::error::Result;
use crate::models::HostRecord;
use crate::repository::DbPool;
use chrono::Utc;

#[derive(Clone)]
pub struct HostRepository {
    pool: DbPool,
}

impl HostRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Registers a host, or refreshes its cluster and port when it already exists.
    pub async fn upsert(&self, cluster_id: Option<i64>, hostname: &str, agent_port: u16) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO hosts (cluster_id, hostname, agent_port, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(hostname) DO UPDATE SET cluster_id = excluded.cluster_id, agent_port = excluded.agent_port
            "#,
        )
        .bind(cluster_id)
        .bind(hostname)
        .bind(agent_port as i64)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_hostname(&self, hostname: &str) -> Result<Option<HostRecord>> {
        let host = sqlx::query_as::<_, HostRecord>("SELECT * FROM hosts WHERE hostname = ?")
            .bind(hostname)
            .fetch_optional(&self.pool)
            .await?;

        Ok(host)
    }

    pub async fn list_by_cluster(&self, cluster_id: i64) -> Result<Vec<HostRecord>> {
        let hosts = sqlx::query_as::<_, HostRecord>(
            "SELECT * FROM hosts WHERE cluster_id = ? ORDER BY hostname",
        )
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(hosts)
    }
}
