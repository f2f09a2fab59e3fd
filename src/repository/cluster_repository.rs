use crate::error::{AppError, Result};
use crate::models::ClusterRecord;
use crate::repository::DbPool;
use chrono::Utc;

#[derive(Debug, Clone)]
pub struct NewCluster {
    pub name: String,
    pub stack_name: String,
    pub stack_version: String,
    pub root_dir: String,
    pub user_group: String,
    pub repos: String,
}

#[derive(Clone)]
pub struct ClusterRepository {
    pool: DbPool,
}

impl ClusterRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, cluster: NewCluster) -> Result<ClusterRecord> {
        let now = Utc::now().timestamp_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO clusters (name, stack_name, stack_version, root_dir, user_group, repos, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&cluster.name)
        .bind(&cluster.stack_name)
        .bind(&cluster.stack_version)
        .bind(&cluster.root_dir)
        .bind(&cluster.user_group)
        .bind(&cluster.repos)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(ClusterRecord {
            id: result.last_insert_rowid(),
            name: cluster.name,
            stack_name: cluster.stack_name,
            stack_version: cluster.stack_version,
            root_dir: cluster.root_dir,
            user_group: cluster.user_group,
            repos: cluster.repos,
            created_at: now,
        })
    }

    pub async fn get(&self, id: i64) -> Result<ClusterRecord> {
        let cluster = sqlx::query_as::<_, ClusterRecord>("SELECT * FROM clusters WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::ClusterNotFound(id))?;

        Ok(cluster)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<ClusterRecord>> {
        let cluster = sqlx::query_as::<_, ClusterRecord>("SELECT * FROM clusters WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(cluster)
    }
}
