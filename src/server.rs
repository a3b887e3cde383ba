//! Server configuration, role management and the accept loop.
//!
//! A server runs as a master (accepting writes and replicating them) or as
//! a replica of a configured master (serving reads and applying the
//! master's stream). Configuration comes from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::connection::handle_client_connection;
use crate::keyspace::Keyspace;
use crate::replication::replica::run_replication_worker;
use crate::replication::{MasterState, ReplicaState};

/// Errors that can occur during command-line argument parsing.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum CliError {
    #[error("invalid command line flag")]
    InvalidCommandLineFlag,
    #[error("invalid port flag value")]
    InvalidPortFlagValue,
    #[error("invalid master address")]
    InvalidMasterAddress,
    #[error("invalid master port")]
    InvalidMasterPort,
    #[error("invalid replica address")]
    InvalidReplicaAddress,
    #[error("invalid replica port")]
    InvalidReplicaPort,
    #[error("--replica is only valid on a master")]
    ReplicaFlagOnReplica,
}

#[derive(Debug, PartialEq, Clone)]
pub enum ServerRole {
    /// Accepts writes from clients and replicates them to replicas.
    Master,
    /// Follows the master at the given (host, port); serves reads only.
    Replica { host: String, port: u16 },
}

impl ServerRole {
    pub fn as_string(&self) -> &str {
        match self {
            ServerRole::Master => "master",
            ServerRole::Replica { .. } => "slave",
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub role: ServerRole,
    /// Static replicas a master connects to at startup (`--replica`).
    pub seed_replicas: Vec<(String, u16)>,
    pub snapshot_path: PathBuf,
}

impl ServerConfig {
    /// Parses command-line arguments.
    ///
    /// Supported flags: `--port P`, `--replicaof HOST PORT`, and the
    /// repeatable `--replica HOST PORT` (master only).
    pub fn new<I: IntoIterator<Item = String>>(command_line_args: I) -> Result<Self, CliError> {
        let mut iter = command_line_args.into_iter().skip(1);
        let mut port: Option<u16> = None;
        let mut role: Option<ServerRole> = None;
        let mut seed_replicas: Vec<(String, u16)> = Vec::new();

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--port" => {
                    let Some(port_value) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };

                    port = Some(validate_port(&port_value, CliError::InvalidPortFlagValue)?);
                }
                "--replicaof" => {
                    let (Some(host), Some(master_port)) = (iter.next(), iter.next()) else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };

                    let host = validate_host(&host, CliError::InvalidMasterAddress)?;
                    let master_port = validate_port(&master_port, CliError::InvalidMasterPort)?;

                    role = Some(ServerRole::Replica {
                        host,
                        port: master_port,
                    });
                }
                "--replica" => {
                    let (Some(host), Some(replica_port)) = (iter.next(), iter.next()) else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };

                    let host = validate_host(&host, CliError::InvalidReplicaAddress)?;
                    let replica_port = validate_port(&replica_port, CliError::InvalidReplicaPort)?;

                    seed_replicas.push((host, replica_port));
                }
                _ => return Err(CliError::InvalidCommandLineFlag),
            }
        }

        let role = role.unwrap_or(ServerRole::Master);

        if !seed_replicas.is_empty() && role != ServerRole::Master {
            return Err(CliError::ReplicaFlagOnReplica);
        }

        Ok(ServerConfig {
            port: port.unwrap_or(6379),
            role,
            seed_replicas,
            snapshot_path: PathBuf::from("dump.rdb"),
        })
    }
}

/// Role-specific runtime state.
#[derive(Debug)]
pub enum RoleState {
    Master(Arc<MasterState>),
    Replica(Arc<ReplicaState>),
}

/// Everything a connection task needs: configuration, the keyspace and the
/// role-specific replication state.
#[derive(Debug)]
pub struct SharedServer {
    pub config: ServerConfig,
    pub keyspace: Arc<Keyspace>,
    pub role: RoleState,
}

impl SharedServer {
    pub fn new(config: ServerConfig) -> Self {
        let role = match &config.role {
            ServerRole::Master => RoleState::Master(Arc::new(MasterState::new(config.port))),
            ServerRole::Replica { host, port } => RoleState::Replica(Arc::new(
                ReplicaState::new(config.port, host.clone(), *port),
            )),
        };

        SharedServer {
            config,
            keyspace: Arc::new(Keyspace::new()),
            role,
        }
    }

    /// Binds the configured port and serves until the task is cancelled.
    pub async fn run(self: Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        info!(
            port = self.config.port,
            role = self.config.role.as_string(),
            "listening"
        );

        self.run_with_listener(listener).await
    }

    /// Serves on an already-bound listener. Spawns the replication worker
    /// (replica role) or the seed-replica handshakes (master role), then
    /// accepts connections forever.
    pub async fn run_with_listener(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        match &self.role {
            RoleState::Master(master) => {
                for (host, port) in &self.config.seed_replicas {
                    let master = Arc::clone(master);
                    let host = host.clone();
                    let port = *port;

                    tokio::spawn(async move {
                        master.add_replica(host, port).await;
                    });
                }
            }
            RoleState::Replica(state) => {
                tokio::spawn(run_replication_worker(
                    Arc::clone(&self.keyspace),
                    Arc::clone(state),
                ));
            }
        }

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let server = Arc::clone(&self);

                    tokio::spawn(async move {
                        handle_client_connection(stream, server).await;
                    });
                }
                Err(error) => {
                    error!(%error, "failed to accept connection");
                }
            }
        }
    }
}

fn validate_port(port: &str, error: CliError) -> Result<u16, CliError> {
    let port_number = port.parse::<u16>().map_err(|_| error.clone())?;

    if port_number == 0 {
        return Err(error);
    }

    Ok(port_number)
}

/// Accepts IPv4 addresses (octet-checked) and plain hostnames.
fn validate_host(host: &str, error: CliError) -> Result<String, CliError> {
    let ipv4_regex = Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})$").unwrap();
    let hostname_regex = Regex::new(r"^[a-zA-Z0-9\-\.]+$").unwrap();

    let valid = if let Some(caps) = ipv4_regex.captures(host) {
        caps.iter().skip(1).all(|octet| {
            octet
                .map(|m| m.as_str().parse::<u16>().map(|v| v <= 255).unwrap_or(false))
                .unwrap_or(false)
        })
    } else {
        hostname_regex.is_match(host)
    };

    if !valid {
        return Err(error);
    }

    Ok(host.to_string())
}
