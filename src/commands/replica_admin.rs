//! REPLICA / REPLICAS: administrative replica management on a master.

use std::sync::Arc;

use crate::commands::command_error::CommandError;
use crate::commands::command_handler::CommandResult;
use crate::replication::MasterState;
use crate::resp::RespValue;

/// REPLICA host port: registers a static replica and eagerly attempts the
/// handshake. A connection failure is not an error here; the entry stays
/// registered and is retried on the next write.
pub async fn replica(
    master: &Arc<MasterState>,
    arguments: &[String],
) -> Result<CommandResult, CommandError> {
    if arguments.len() != 2 {
        return Err(CommandError::Arity("REPLICA".to_string()));
    }

    let port = arguments[1]
        .parse::<u16>()
        .map_err(|_| CommandError::InvalidArgument("replica port"))?;

    master.add_replica(arguments[0].clone(), port).await;

    Ok(CommandResult::Response(
        RespValue::SimpleString("OK".to_string()).encode(),
    ))
}

/// REPLICAS: human-readable listing of the replica registry.
pub async fn replicas(master: &Arc<MasterState>) -> Result<CommandResult, CommandError> {
    Ok(CommandResult::Response(
        RespValue::BulkString(master.replica_summary().await).encode(),
    ))
}
