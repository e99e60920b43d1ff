use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use calcflow::api::orchestrator::{
    CalculationResult, CalculationSummary, OrchestratorStatus, SubmitCalculationResponse,
};
use calcflow::config::{parse_executor_list, ExecutorConfig, OrchestratorConfig, StoreConfig};
use calcflow::node::{ExecutorNode, OrchestratorNode, StandaloneNode};
use calcflow::remote;
use calcflow::scheduler::ExecutorView;
use calcflow::shutdown::install_shutdown_handler;
use calcflow::store::{JobStore, MemoryJobStore, PostgresJobStore};

#[derive(Parser, Debug)]
#[command(name = "calcflow")]
#[command(version)]
#[command(about = "A distributed arithmetic job dispatcher with executor failover")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the orchestrator (client API, dispatcher, timeout reaper)
    Orchestrator(OrchestratorArgs),

    /// Run an executor
    Executor(ExecutorArgs),

    /// Run an orchestrator and in-process executors over one in-memory store
    Standalone(StandaloneArgs),

    /// Calculation commands
    Calc {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: CalcCommands,
    },

    /// Cluster inspection commands
    Cluster {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: ClusterCommands,
    },

    /// Ask an executor to stop accepting work and shut down once drained
    Drain {
        /// Executor base URL
        #[arg(long, short = 'a', default_value = "http://127.0.0.1:8081")]
        addr: String,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct StoreArgs {
    /// PostgreSQL URL. Without it an in-memory store is used.
    #[arg(long)]
    database_url: Option<String>,

    /// Maximum pooled database connections
    #[arg(long, default_value = "10")]
    max_connections: u32,
}

#[derive(Parser, Debug)]
struct OrchestratorArgs {
    /// Port for the client API
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Executors in failover order (comma-separated, http://host:port or grpc://host:port)
    /// Example: "http://127.0.0.1:8081,grpc://127.0.0.1:50052"
    #[arg(long, default_value = "")]
    executors: String,

    #[command(flatten)]
    store: StoreArgs,

    #[arg(long, default_value = "30000")]
    dispatch_interval_ms: u64,

    #[arg(long, default_value = "5")]
    batch_size: usize,

    #[arg(long, default_value = "60000")]
    reaper_interval_ms: u64,

    /// Grace period before an in-progress calculation is requeued
    #[arg(long, default_value = "180000")]
    reaper_margin_ms: u64,

    /// Wall-clock length of one unit of operator cost
    #[arg(long, default_value = "1000")]
    cost_unit_ms: u64,

    /// Timeout for each call to an executor
    #[arg(long, default_value = "10000")]
    request_timeout_ms: u64,
}

#[derive(Parser, Debug)]
struct ExecutorArgs {
    /// Name recorded on every calculation this executor claims
    #[arg(long, default_value = "executor-1")]
    name: String,

    /// Port for the HTTP surface
    #[arg(long, default_value = "8081")]
    port: u16,

    /// Port for the gRPC surface (optional)
    #[arg(long)]
    grpc_port: Option<u16>,

    /// Maximum concurrently running calculations
    #[arg(long, default_value = "5")]
    capacity: usize,

    #[command(flatten)]
    store: StoreArgs,

    #[arg(long, default_value = "1000")]
    cost_unit_ms: u64,

    #[arg(long, default_value = "1000")]
    drain_poll_ms: u64,
}

#[derive(Parser, Debug)]
struct StandaloneArgs {
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Number of in-process executors
    #[arg(long, default_value = "2")]
    executors: usize,

    /// Capacity of each executor
    #[arg(long, default_value = "5")]
    capacity: usize,

    #[arg(long, default_value = "5000")]
    dispatch_interval_ms: u64,

    #[arg(long, default_value = "1000")]
    cost_unit_ms: u64,
}

// =============================================================================
// Client Arguments (shared by calc and cluster commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Orchestrator base URL
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8080")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum CalcCommands {
    /// Submit a calculation
    Submit {
        /// Infix expression, e.g. "2+3*4"
        operation: String,

        #[arg(long, default_value = "0")]
        add: u64,

        #[arg(long, default_value = "0")]
        subtract: u64,

        #[arg(long, default_value = "0")]
        multiply: u64,

        #[arg(long, default_value = "0")]
        divide: u64,
    },
    /// Get the status and result of a calculation
    Result { id: i64 },
    /// List all calculations
    List,
    /// Delete every calculation
    Clear,
}

#[derive(clap::Subcommand, Debug)]
enum ClusterCommands {
    /// Health of every configured executor
    Servers,
    /// Whether the orchestrator is up
    Status,
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    operation: &'a str,
    add_duration: u64,
    subtract_duration: u64,
    multiply_duration: u64,
    divide_duration: u64,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn open_store(args: &StoreArgs) -> Result<Arc<dyn JobStore>, Box<dyn std::error::Error>> {
    match &args.database_url {
        Some(url) => {
            let config = StoreConfig::new(url.as_str()).with_max_connections(args.max_connections);
            let store = PostgresJobStore::connect(&config).await?;
            tracing::info!("Connected to PostgreSQL job store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("No --database-url given, using an in-memory store private to this process");
            Ok(Arc::new(MemoryJobStore::new()))
        }
    }
}

fn format_result(result: Option<f64>) -> String {
    result.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string())
}

async fn expect_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(format!("{} {}", status, body.trim()).into())
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_orchestrator(args: OrchestratorArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let mut config = OrchestratorConfig::new(listen_addr);
    config.executors = parse_executor_list(&args.executors)?;
    config.dispatch_interval_ms = args.dispatch_interval_ms;
    config.dispatch_batch_size = args.batch_size;
    config.reaper_interval_ms = args.reaper_interval_ms;
    config.reaper_margin_ms = args.reaper_margin_ms;
    config.cost_unit_ms = args.cost_unit_ms;
    config.request_timeout_ms = args.request_timeout_ms;

    if config.executors.is_empty() {
        tracing::warn!("No executors configured, calculations will stay pending");
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        executors = ?config.executors.iter().map(|e| e.url.as_str()).collect::<Vec<_>>(),
        "Starting calcflow orchestrator"
    );

    let store = open_store(&args.store).await?;
    let executors = remote::connect_all(&config.executors, config.request_timeout())?;
    let shutdown = install_shutdown_handler()?;

    OrchestratorNode::new(config, store, executors)
        .run(shutdown)
        .await?;
    Ok(())
}

async fn run_executor(args: ExecutorArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let http_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let mut config = ExecutorConfig::new(args.name, http_addr).with_capacity(args.capacity);
    if let Some(port) = args.grpc_port {
        config = config.with_grpc(format!("0.0.0.0:{}", port).parse()?);
    }
    config.cost_unit_ms = args.cost_unit_ms;
    config.drain_poll_ms = args.drain_poll_ms;

    tracing::info!(
        name = %config.name,
        http_addr = %config.http_addr,
        grpc_addr = ?config.grpc_addr,
        capacity = config.capacity,
        "Starting calcflow executor"
    );

    let store = open_store(&args.store).await?;
    let shutdown = install_shutdown_handler()?;

    ExecutorNode::new(config, store).run(shutdown).await?;
    Ok(())
}

async fn run_standalone(args: StandaloneArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());

    let executors = (1..=args.executors)
        .map(|i| ExecutorConfig {
            name: format!("local-{}", i),
            capacity: args.capacity,
            cost_unit_ms: args.cost_unit_ms,
            ..Default::default()
        })
        .collect();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let mut config = OrchestratorConfig::new(listen_addr);
    config.dispatch_interval_ms = args.dispatch_interval_ms;
    config.cost_unit_ms = args.cost_unit_ms;

    tracing::info!(
        listen_addr = %config.listen_addr,
        executors = args.executors,
        capacity = args.capacity,
        "Starting calcflow in standalone mode"
    );

    let shutdown = install_shutdown_handler()?;
    StandaloneNode::new(config, store, executors)
        .run(shutdown)
        .await?;
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_calc(
    client: &reqwest::Client,
    args: &ClientArgs,
    command: CalcCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let base = args.addr.trim_end_matches('/');
    match command {
        CalcCommands::Submit {
            operation,
            add,
            subtract,
            multiply,
            divide,
        } => {
            let body = SubmitBody {
                operation: &operation,
                add_duration: add,
                subtract_duration: subtract,
                multiply_duration: multiply,
                divide_duration: divide,
            };
            let response = client
                .post(format!("{}/submit-calculation", base))
                .json(&body)
                .send()
                .await?;
            let submitted: SubmitCalculationResponse = expect_success(response).await?.json().await?;
            match args.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&submitted)?),
                OutputFormat::Table => {
                    println!("Calculation submitted successfully!");
                    println!("ID:        {}", submitted.id);
                    println!("Operation: {}", submitted.operation);
                }
            }
        }
        CalcCommands::Result { id } => {
            let response = client
                .get(format!("{}/get-calculation-result", base))
                .query(&[("id", id)])
                .send()
                .await?;
            let result: CalculationResult = expect_success(response).await?.json().await?;
            match args.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                OutputFormat::Table => {
                    println!("ID:     {}", result.id);
                    println!("Status: {}", result.status);
                    println!("Result: {}", format_result(result.result));
                }
            }
        }
        CalcCommands::List => {
            let response = client
                .get(format!("{}/get-all-calculations", base))
                .send()
                .await?;
            let calculations: Vec<CalculationSummary> =
                expect_success(response).await?.json().await?;
            match args.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&calculations)?),
                OutputFormat::Table => {
                    if calculations.is_empty() {
                        println!("No calculations found.");
                    } else {
                        println!("{:<8} {:<12} {:<16} OPERATION", "ID", "STATUS", "RESULT");
                        println!("{}", "-".repeat(60));
                        for calc in &calculations {
                            let operation = if calc.operation.len() > 20 {
                                format!("{}...", calc.operation.chars().take(17).collect::<String>())
                            } else {
                                calc.operation.clone()
                            };
                            println!(
                                "{:<8} {:<12} {:<16} {}",
                                calc.id,
                                calc.status,
                                format_result(calc.result),
                                operation
                            );
                        }
                        println!();
                        println!("{} calculations", calculations.len());
                    }
                }
            }
        }
        CalcCommands::Clear => {
            let response = client
                .post(format!("{}/clear-all-calculations", base))
                .send()
                .await?;
            let text = expect_success(response).await?.text().await?;
            println!("{}", text.trim());
        }
    }
    Ok(())
}

async fn handle_cluster(
    client: &reqwest::Client,
    args: &ClientArgs,
    command: ClusterCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let base = args.addr.trim_end_matches('/');
    match command {
        ClusterCommands::Servers => {
            let response = client.get(format!("{}/ping-servers", base)).send().await?;
            let views: Vec<ExecutorView> = expect_success(response).await?.json().await?;
            match args.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&views)?),
                OutputFormat::Table => {
                    println!("{:<32} {:<10} {:<10} ERROR", "EXECUTOR", "STATUS", "LOAD");
                    println!("{}", "-".repeat(70));
                    for view in views {
                        let status = if view.running { "[+] up" } else { "[-] down" };
                        let load = match view.capacity {
                            Some(capacity) => format!("{}/{}", view.load, capacity),
                            None => "-".to_string(),
                        };
                        println!(
                            "{:<32} {:<10} {:<10} {}",
                            view.address,
                            status,
                            load,
                            view.error.unwrap_or_default()
                        );
                    }
                }
            }
        }
        ClusterCommands::Status => {
            let response = client
                .get(format!("{}/orchestrator-status", base))
                .send()
                .await?;
            let status: OrchestratorStatus = expect_success(response).await?.json().await?;
            match args.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
                OutputFormat::Table => println!("{}", status.message),
            }
        }
    }
    Ok(())
}

async fn handle_drain(
    client: &reqwest::Client,
    addr: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/shutdown", addr.trim_end_matches('/')))
        .send()
        .await?;
    let text = expect_success(response).await?.text().await?;
    println!("{}", text.trim());
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Orchestrator(orchestrator_args) => run_orchestrator(orchestrator_args).await?,
        Commands::Executor(executor_args) => run_executor(executor_args).await?,
        Commands::Standalone(standalone_args) => run_standalone(standalone_args).await?,
        Commands::Calc { client, command } => {
            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?;
            handle_calc(&http, &client, command).await?;
        }
        Commands::Cluster { client, command } => {
            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?;
            handle_cluster(&http, &client, command).await?;
        }
        Commands::Drain { addr } => {
            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?;
            handle_drain(&http, &addr).await?;
        }
    }

    Ok(())
}
