//! Command parsing and role-based dispatch.
//!
//! A decoded RESP array becomes a `CommandHandler`; the connection layer
//! routes it through the dispatch method matching the server's role and the
//! origin of the frame, then delivers the produced reply through a
//! `ReplySink`.

use std::sync::Arc;

use crate::commands::command_error::CommandError;
use crate::commands::{
    exists_and_del, get, incr_and_decr, info, lrange, ping, psync, replconf, replica_admin,
    rpush_and_lpush, set, wait,
};
use crate::connection::ClientSession;
use crate::keyspace::Keyspace;
use crate::replication::{MasterState, ReplicaState};
use crate::resp::RespValue;
use crate::server::SharedServer;

/// Commands that mutate the keyspace and therefore propagate to replicas.
/// HSET is executed and propagated as a plain SET.
pub const WRITE_COMMANDS: &[&str] = &["SET", "DEL", "INCR", "DECR", "LPUSH", "RPUSH", "HSET"];

#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// An encoded reply to deliver through the active sink.
    Response(String),
    NoResponse,
    /// PSYNC decided on a full resync: the connection sends the header,
    /// streams the snapshot and registers the replica.
    FullResync { header: String },
    /// PSYNC decided on a partial resync: the connection sends the header
    /// and registers the replica at the offset it reported.
    PartialResync { header: String, ack_offset: u64 },
}

/// A parsed command: uppercased name plus its arguments.
#[derive(Debug, PartialEq, Clone)]
pub struct CommandHandler {
    pub name: String,
    pub arguments: Vec<String>,
}

impl CommandHandler {
    /// Parses a RESP array of bulk strings into a command.
    ///
    /// Anything else on the wire is a protocol error: commands are always
    /// arrays whose first element names the command.
    pub fn new(input: &RespValue) -> Result<Self, CommandError> {
        let RespValue::Array(elements) = input else {
            return Err(CommandError::Protocol);
        };

        let name = match elements.first() {
            Some(RespValue::BulkString(name)) => name.to_uppercase(),
            _ => return Err(CommandError::Protocol),
        };

        let mut arguments: Vec<String> = Vec::with_capacity(elements.len().saturating_sub(1));

        for element in &elements[1..] {
            let RespValue::BulkString(argument) = element else {
                return Err(CommandError::Protocol);
            };
            arguments.push(argument.clone());
        }

        Ok(Self { name, arguments })
    }

    pub fn is_write(&self) -> bool {
        WRITE_COMMANDS.contains(&self.name.as_str())
    }

    /// Full surface served on the master: the client commands plus the
    /// replication commands. A successful write is propagated to replicas
    /// after it executes.
    pub async fn handle_for_master(
        &self,
        server: &Arc<SharedServer>,
        master: &Arc<MasterState>,
        session: &mut ClientSession,
    ) -> Result<CommandResult, CommandError> {
        let keyspace = &server.keyspace;

        let result = match self.name.as_str() {
            "PING" => ping::ping(&self.arguments),
            "SET" | "HSET" => set::set(keyspace, &self.name, &self.arguments),
            "GET" => get::get(keyspace, &self.arguments),
            "EXISTS" => exists_and_del::exists(keyspace, &self.arguments),
            "DEL" => exists_and_del::del(keyspace, &self.arguments),
            "INCR" => incr_and_decr::incr(keyspace, &self.arguments),
            "DECR" => incr_and_decr::decr(keyspace, &self.arguments),
            "LPUSH" => rpush_and_lpush::lpush(keyspace, &self.arguments),
            "RPUSH" => rpush_and_lpush::rpush(keyspace, &self.arguments),
            "LRANGE" => lrange::lrange(keyspace, &self.arguments),
            "INFO" => info::info(server, &self.arguments).await,
            "REPLICA" => replica_admin::replica(master, &self.arguments).await,
            "REPLICAS" => replica_admin::replicas(master).await,
            "REPLCONF" => replconf::replconf_on_master(master, session, &self.arguments).await,
            "PSYNC" => psync::psync(master, &self.arguments).await,
            "WAIT" => wait::wait(master, &self.arguments).await,
            _ => Err(CommandError::UnknownCommand(self.name.clone())),
        }?;

        if self.is_write() {
            master.propagate(&self.name, &self.arguments).await;
        }

        Ok(result)
    }

    /// Read-only surface served to clients of a replica. Writes are
    /// rejected; PSYNC is denied (replicas do not serve resyncs).
    pub async fn handle_for_replica_client(
        &self,
        server: &Arc<SharedServer>,
        state: &Arc<ReplicaState>,
    ) -> Result<CommandResult, CommandError> {
        let keyspace = &server.keyspace;

        match self.name.as_str() {
            "PING" => ping::ping(&self.arguments),
            "GET" => get::get(keyspace, &self.arguments),
            "EXISTS" => exists_and_del::exists(keyspace, &self.arguments),
            "LRANGE" => lrange::lrange(keyspace, &self.arguments),
            "INFO" => info::info(server, &self.arguments).await,
            "REPLCONF" => replconf::replconf_on_replica(state, &self.arguments).await,
            "WAIT" => Ok(CommandResult::Response(RespValue::Integer(0).encode())),
            "PSYNC" => Err(CommandError::PsyncOnReplica),
            name if WRITE_COMMANDS.contains(&name) => Err(CommandError::ReadOnly),
            _ => Err(CommandError::UnknownCommand(self.name.clone())),
        }
    }

    /// Executes a master-originated write against the keyspace, producing
    /// the reply a client would have received; the caller routes it through
    /// the silent sink and accounts the applied offset.
    pub fn apply_write(&self, keyspace: &Keyspace) -> Result<CommandResult, CommandError> {
        match self.name.as_str() {
            "SET" | "HSET" => set::set(keyspace, &self.name, &self.arguments),
            "DEL" => exists_and_del::del(keyspace, &self.arguments),
            "INCR" => incr_and_decr::incr(keyspace, &self.arguments),
            "DECR" => incr_and_decr::decr(keyspace, &self.arguments),
            "LPUSH" => rpush_and_lpush::lpush(keyspace, &self.arguments),
            "RPUSH" => rpush_and_lpush::rpush(keyspace, &self.arguments),
            _ => Err(CommandError::UnknownCommand(self.name.clone())),
        }
    }
}
