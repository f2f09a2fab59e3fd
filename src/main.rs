use anyhow::Context;
use clap::{Parser, Subcommand};
use fleet_manager::api::create_router;
use fleet_manager::command::{CommandDto, CommandRuntime};
use fleet_manager::config::Config;
use fleet_manager::executor::{AgentSettings, CommandDispatcher, builtin_executors};
use fleet_manager::models::ExecutionState;
use fleet_manager::protocol::HttpAgentClient;
use fleet_manager::repository::establish_connection;
use fleet_manager::services::{CommandService, JobScheduler, JobService, SubmittedJob};
use fleet_manager::stack::StackMetadata;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fleet_manager", version, about = "Cluster command orchestrator and host agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the host agent that executes controller commands
    Agent,
    /// Submit a command file and wait for its job to finish
    Submit { file: PathBuf },
    /// Re-run a failed job
    Retry { job_id: i64 },
    /// Cancel a job that has not started
    Cancel { job_id: i64 },
    /// Show a job with its stages and tasks
    Show { job_id: i64 },
    /// List all jobs
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet_manager=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    tracing::debug!("Loaded config: {:?}", config);

    match cli.command {
        Commands::Agent => run_agent(&config).await,
        Commands::Submit { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read command file {}", file.display()))?;
            let dto: CommandDto = serde_json::from_str(&content)
                .with_context(|| format!("Invalid command file {}", file.display()))?;

            let (commands, jobs) = controller(&config).await?;
            let submitted = commands.command(dto).await?;
            wait_and_print(&jobs, submitted).await
        }
        Commands::Retry { job_id } => {
            let (_, jobs) = controller(&config).await?;
            let submitted = jobs.retry(job_id).await?;
            wait_and_print(&jobs, submitted).await
        }
        Commands::Cancel { job_id } => {
            let (_, jobs) = controller(&config).await?;
            print_json(&jobs.cancel(job_id).await?)
        }
        Commands::Show { job_id } => {
            let (_, jobs) = controller(&config).await?;
            print_json(&jobs.get(job_id).await?)
        }
        Commands::List => {
            let (_, jobs) = controller(&config).await?;
            print_json(&jobs.list().await?)
        }
    }
}

async fn run_agent(config: &Config) -> anyhow::Result<()> {
    let settings = AgentSettings::from_config(config)?;
    if settings.dev_mode {
        tracing::warn!("Agent running in dev mode, commands will not be executed");
    }
    let dispatcher = Arc::new(CommandDispatcher::new(builtin_executors(), settings));

    let app = create_router(dispatcher).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let addr = addr.parse::<SocketAddr>()?;
    tracing::info!("Agent listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    Ok(())
}

async fn controller(config: &Config) -> anyhow::Result<(CommandService, JobService)> {
    if let Some(path) = config.database_url.strip_prefix("sqlite:") {
        let path = std::path::Path::new(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let pool = establish_connection(&config.database_url).await?;
    tracing::info!("Database connected: {}", config.database_url);

    let stacks_dir = config.resolved_stacks_dir()?;
    let stack = StackMetadata::load(&stacks_dir)
        .with_context(|| format!("Failed to load stacks from {}", stacks_dir.display()))?;
    let agent_client = HttpAgentClient::new(config.rpc_timeout())?;

    let runtime = CommandRuntime::new(pool, Arc::new(stack), Arc::new(agent_client), config.agent_port);
    let scheduler = JobScheduler::new(runtime, config.max_concurrent_jobs);
    Ok((CommandService::new(scheduler.clone()), JobService::new(scheduler)))
}

async fn wait_and_print(jobs: &JobService, submitted: SubmittedJob) -> anyhow::Result<()> {
    let job_id = submitted.record.id;
    tracing::info!("Job {} [{}] submitted", job_id, submitted.record.name);

    let state = submitted.handle.await.context("Job runner panicked")?;
    print_json(&jobs.get(job_id).await?)?;

    if state != ExecutionState::Successful {
        anyhow::bail!("Job {} finished as {:?}", job_id, state);
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
