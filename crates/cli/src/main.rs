use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use orchestration_core::model::{EnvironmentDefinition, Node};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "netunicorn-cli", version, about = "Netunicorn orchestrator client")]
struct Cli {
    /// Control plane base URL.
    #[arg(long, env = "NETUNICORN_ENDPOINT", default_value = "http://127.0.0.1:3000")]
    endpoint: String,

    /// Basic-auth username, also the experiment owner.
    #[arg(long, env = "NETUNICORN_USERNAME")]
    username: String,

    /// Basic-auth password.
    #[arg(long, env = "NETUNICORN_PASSWORD")]
    password: String,

    /// Output format (text or JSON).
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the nodes every registered connector currently reports.
    Nodes(NodesArgs),
    /// Prepare an experiment: compile and register its deployments.
    Prepare(PrepareArgs),
    /// Start a prepared experiment's execution.
    Start(ExperimentArgs),
    /// Fetch an experiment's status and, once finished, its results.
    Status(ExperimentArgs),
    /// Cancel every unfinished executor belonging to an experiment.
    Cancel(ExperimentArgs),
    /// Cancel specific executors by ID, regardless of experiment.
    CancelExecutors(CancelExecutorsArgs),
}

#[derive(Copy, Clone, Debug, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

trait RenderText {
    fn render_text(&self) -> String;
}

fn emit_output<T>(format: OutputFormat, payload: &T) -> Result<()>
where
    T: RenderText + Serialize,
{
    match format {
        OutputFormat::Text => println!("{}", payload.render_text()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(payload)?),
    }
    Ok(())
}

#[derive(Args, Debug)]
struct NodesArgs {
    /// Look up nodes under a different user than the one authenticating.
    #[arg(long)]
    user: Option<String>,
}

#[derive(Args, Debug)]
struct ExperimentArgs {
    /// Experiment name.
    #[arg(value_name = "NAME")]
    name: String,
}

#[derive(Args, Debug)]
struct PrepareArgs {
    /// Experiment name.
    #[arg(value_name = "NAME")]
    name: String,

    /// JSON file holding an array of deployments, each shaped
    /// `{"node": ..., "graph": ..., "environment_definition": ...}`.
    #[arg(long, value_name = "PATH")]
    deployments_file: PathBuf,

    /// Seconds an executor may stay silent before the watcher declares it dead.
    #[arg(long, default_value_t = 600)]
    keep_alive_timeout_secs: i64,
}

#[derive(Args, Debug)]
struct CancelExecutorsArgs {
    /// Executor IDs to cancel.
    #[arg(value_name = "EXECUTOR_ID", required = true)]
    executor_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DeploymentSpec {
    node: Node,
    graph: Value,
    environment_definition: EnvironmentDefinition,
}

#[derive(Debug, Serialize)]
struct PrepareRequestBody {
    owner: String,
    keep_alive_timeout_secs: i64,
    deployments: Vec<DeploymentSpec>,
}

#[derive(Debug, Serialize)]
struct CancelExecutorsBody {
    owner: String,
    executor_ids: Vec<String>,
}

#[derive(Serialize)]
struct NodesResponse {
    pool: Value,
}

impl RenderText for NodesResponse {
    fn render_text(&self) -> String {
        serde_json::to_string_pretty(&self.pool).unwrap_or_else(|_| self.pool.to_string())
    }
}

#[derive(Serialize)]
struct ExperimentIdResponse {
    action: &'static str,
    experiment_id: String,
}

impl RenderText for ExperimentIdResponse {
    fn render_text(&self) -> String {
        format!("{}: {}", self.action, self.experiment_id)
    }
}

#[derive(Serialize)]
struct StatusDisplay {
    status: String,
    experiment: Option<Value>,
    results: Option<Value>,
}

impl RenderText for StatusDisplay {
    fn render_text(&self) -> String {
        let mut sections = vec![format!("status: {}", self.status)];
        if let Some(results) = &self.results {
            sections.push(format!("results:\n{}", serde_json::to_string_pretty(results).unwrap_or_default()));
        }
        sections.join("\n\n")
    }
}

#[derive(Serialize)]
struct AckResponse {
    message: String,
}

impl RenderText for AckResponse {
    fn render_text(&self) -> String {
        self.message.clone()
    }
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,netunicorn_cli=info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    let cli = Cli::parse();
    let rt = Runtime::new()?;
    rt.block_on(async move { run(cli).await })
}

async fn run(cli: Cli) -> Result<()> {
    let client = Client::builder().timeout(std::time::Duration::from_secs(30)).build()?;
    let endpoint = cli.endpoint.trim_end_matches('/').to_string();
    let ctx = ClientContext {
        client,
        endpoint,
        username: cli.username.clone(),
        password: cli.password,
    };

    match cli.command {
        Command::Nodes(args) => nodes_command(&ctx, args, cli.format).await,
        Command::Prepare(args) => prepare_command(&ctx, args, cli.format).await,
        Command::Start(args) => start_command(&ctx, args, cli.format).await,
        Command::Status(args) => status_command(&ctx, args, cli.format).await,
        Command::Cancel(args) => cancel_command(&ctx, args, cli.format).await,
        Command::CancelExecutors(args) => cancel_executors_command(&ctx, args, cli.format).await,
    }
}

struct ClientContext {
    client: Client,
    endpoint: String,
    username: String,
    password: String,
}

impl ClientContext {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client.request(method, self.url(path)).basic_auth(&self.username, Some(&self.password))
    }
}

async fn expect_ok(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("orchestrator returned {status}: {body}")
    }
}

async fn nodes_command(ctx: &ClientContext, args: NodesArgs, format: OutputFormat) -> Result<()> {
    let user = args.user.unwrap_or_else(|| ctx.username.clone());
    info!(user = %user, "listing nodes");

    let response = expect_ok(ctx.request(reqwest::Method::GET, &format!("/nodes/{user}")).send().await?).await?;
    let pool: Value = response.json().await.context("decode node pool")?;

    emit_output(format, &NodesResponse { pool })
}

async fn prepare_command(ctx: &ClientContext, args: PrepareArgs, format: OutputFormat) -> Result<()> {
    let raw = std::fs::read_to_string(&args.deployments_file)
        .with_context(|| format!("failed to read {}", args.deployments_file.display()))?;
    let deployments: Vec<DeploymentSpec> = serde_json::from_str(&raw).context("parse deployments file")?;

    info!(name = %args.name, deployments = deployments.len(), "preparing experiment");

    let body = PrepareRequestBody {
        owner: ctx.username.clone(),
        keep_alive_timeout_secs: args.keep_alive_timeout_secs,
        deployments,
    };

    let response = expect_ok(
        ctx.request(reqwest::Method::POST, &format!("/experiment/{}/prepare", args.name)).json(&body).send().await?,
    )
    .await?;
    let experiment_id = response.text().await.context("read experiment id")?;

    emit_output(format, &ExperimentIdResponse { action: "prepared", experiment_id })
}

async fn start_command(ctx: &ClientContext, args: ExperimentArgs, format: OutputFormat) -> Result<()> {
    info!(name = %args.name, "starting experiment");

    let path = format!("/experiment/{}/start?owner={}", args.name, ctx.username);
    let response = expect_ok(ctx.request(reqwest::Method::POST, &path).send().await?).await?;
    let experiment_id = response.text().await.context("read experiment id")?;

    emit_output(format, &ExperimentIdResponse { action: "started", experiment_id })
}

async fn status_command(ctx: &ClientContext, args: ExperimentArgs, format: OutputFormat) -> Result<()> {
    info!(name = %args.name, "fetching experiment status");

    let path = format!("/experiment/{}?owner={}", args.name, ctx.username);
    let response = expect_ok(ctx.request(reqwest::Method::GET, &path).send().await?).await?;
    let body: Value = response.json().await.context("decode status response")?;

    let status = body.get("status").and_then(Value::as_str).unwrap_or("unknown").to_string();
    let experiment = body.get("experiment").cloned();
    let results = body.get("results").cloned();

    emit_output(format, &StatusDisplay { status, experiment, results })
}

async fn cancel_command(ctx: &ClientContext, args: ExperimentArgs, format: OutputFormat) -> Result<()> {
    info!(name = %args.name, "cancelling experiment");

    let path = format!("/experiment/{}?owner={}", args.name, ctx.username);
    let response = expect_ok(ctx.request(reqwest::Method::DELETE, &path).send().await?).await?;
    let message = response.text().await.unwrap_or_else(|_| "cancellation requested".to_string());

    emit_output(format, &AckResponse { message })
}

async fn cancel_executors_command(ctx: &ClientContext, args: CancelExecutorsArgs, format: OutputFormat) -> Result<()> {
    info!(count = args.executor_ids.len(), "cancelling executors");

    let body = CancelExecutorsBody { owner: ctx.username.clone(), executor_ids: args.executor_ids };
    let response =
        expect_ok(ctx.request(reqwest::Method::DELETE, "/executors").json(&body).send().await?).await?;
    let message = response.text().await.unwrap_or_else(|_| "cancellation requested".to_string());

    emit_output(format, &AckResponse { message })
}
