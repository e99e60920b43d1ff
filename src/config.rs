use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// How the orchestrator talks to an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    Grpc,
}

/// One entry of the orchestrator's ordered executor list.
///
/// Parsed from `http://host:port` or `grpc://host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorEndpoint {
    pub transport: Transport,
    /// Base URL with an `http://` scheme, as handed to the HTTP or gRPC client
    pub url: String,
}

impl ExecutorEndpoint {
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            transport: Transport::Http,
            url: url.into(),
        }
    }

    pub fn grpc(url: impl Into<String>) -> Self {
        Self {
            transport: Transport::Grpc,
            url: url.into(),
        }
    }
}

impl FromStr for ExecutorEndpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_end_matches('/');
        if let Some(rest) = s.strip_prefix("grpc://") {
            if rest.is_empty() {
                return Err(format!("missing host in executor endpoint: {}", s));
            }
            Ok(Self::grpc(format!("http://{}", rest)))
        } else if let Some(rest) = s.strip_prefix("http://") {
            if rest.is_empty() {
                return Err(format!("missing host in executor endpoint: {}", s));
            }
            Ok(Self::http(s))
        } else {
            Err(format!(
                "executor endpoint must start with http:// or grpc://, got {}",
                s
            ))
        }
    }
}

/// Parse a comma-separated executor list, keeping its order.
pub fn parse_executor_list(list: &str) -> Result<Vec<ExecutorEndpoint>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ExecutorEndpoint::from_str)
        .collect()
}

/// PostgreSQL settings shared by the orchestrator and executors.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub listen_addr: SocketAddr,
    /// Executors in failover priority order
    pub executors: Vec<ExecutorEndpoint>,
    pub dispatch_interval_ms: u64,
    pub dispatch_batch_size: usize,
    pub reaper_interval_ms: u64,
    /// Grace period added to a job's expected duration before it is requeued
    pub reaper_margin_ms: u64,
    /// Wall-clock length of one unit of operator cost
    pub cost_unit_ms: u64,
    /// Timeout for each call to an executor
    pub request_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "0.0.0.0:8080"
                .parse()
                .expect("default listen address is valid"),
            executors: Vec::new(),
            dispatch_interval_ms: 30_000,
            dispatch_batch_size: 5,
            reaper_interval_ms: 60_000,
            reaper_margin_ms: 180_000,
            cost_unit_ms: 1_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_executor(mut self, endpoint: ExecutorEndpoint) -> Self {
        self.executors.push(endpoint);
        self
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    pub fn reaper_margin(&self) -> Duration {
        Duration::from_millis(self.reaper_margin_ms)
    }

    pub fn cost_unit(&self) -> Duration {
        Duration::from_millis(self.cost_unit_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Recorded as `operation_server` on every job this executor claims
    pub name: String,
    pub http_addr: SocketAddr,
    pub grpc_addr: Option<SocketAddr>,
    /// Maximum number of concurrently running evaluations
    pub capacity: usize,
    pub cost_unit_ms: u64,
    /// Re-check period while draining
    pub drain_poll_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: "executor-1".to_string(),
            // SAFETY: This is a hardcoded valid address that will always parse
            http_addr: "0.0.0.0:8081"
                .parse()
                .expect("default executor address is valid"),
            grpc_addr: None,
            capacity: 5,
            cost_unit_ms: 1_000,
            drain_poll_ms: 1_000,
        }
    }
}

impl ExecutorConfig {
    pub fn new(name: impl Into<String>, http_addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            http_addr,
            ..Default::default()
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_grpc(mut self, grpc_addr: SocketAddr) -> Self {
        self.grpc_addr = Some(grpc_addr);
        self
    }

    pub fn cost_unit(&self) -> Duration {
        Duration::from_millis(self.cost_unit_ms)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }
}
