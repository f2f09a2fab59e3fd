use crate::repository::DbPool;
use anyhow::Result;

pub async fn establish_connection(database_url: &str) -> Result<DbPool> {
    // Ensure the database URL has the correct format
    let db_url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{}", database_url)
    };

    // Create connection with create_if_missing option
    let connection_string = format!("{}?mode=rwc", db_url);
    let pool = sqlx::SqlitePool::connect(&connection_string).await?;

    // Run migrations
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clusters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            stack_name TEXT NOT NULL,
            stack_version TEXT NOT NULL,
            root_dir TEXT NOT NULL,
            user_group TEXT NOT NULL,
            repos TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS hosts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cluster_id INTEGER,
            hostname TEXT NOT NULL UNIQUE,
            agent_port INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS host_components (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cluster_id INTEGER NOT NULL,
            hostname TEXT NOT NULL,
            service_name TEXT NOT NULL,
            component_name TEXT NOT NULL,
            state INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (cluster_id, hostname, component_name)
        );

        CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cluster_id INTEGER,
            name TEXT NOT NULL,
            context TEXT NOT NULL,
            state INTEGER NOT NULL,
            attempt INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            attempt INTEGER NOT NULL,
            stage_order INTEGER NOT NULL,
            name TEXT NOT NULL,
            service_name TEXT NOT NULL,
            component_name TEXT NOT NULL,
            context TEXT NOT NULL,
            state INTEGER NOT NULL,
            message TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            stage_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            hostname TEXT NOT NULL,
            service_name TEXT NOT NULL,
            component_name TEXT NOT NULL,
            command INTEGER NOT NULL,
            custom_command TEXT,
            context TEXT NOT NULL,
            content TEXT,
            result TEXT,
            state INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (stage_id) REFERENCES stages(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_stages_job_id ON stages(job_id, attempt);
        CREATE INDEX IF NOT EXISTS idx_tasks_stage_id ON tasks(stage_id);
        CREATE INDEX IF NOT EXISTS idx_host_components_cluster ON host_components(cluster_id);
        "#,
    )
    .execute(&pool)
    .await?;

    Ok(pool)
}
