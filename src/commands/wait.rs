use std::sync::Arc;
use std::time::Duration;

use crate::commands::command_error::CommandError;
use crate::commands::command_handler::CommandResult;
use crate::replication::MasterState;
use crate::resp::RespValue;

pub struct WaitArguments {
    pub numreplicas: usize,
    pub timeout: Duration,
}

impl WaitArguments {
    pub fn parse(arguments: &[String]) -> Result<Self, CommandError> {
        if arguments.len() != 2 {
            return Err(CommandError::Arity("WAIT".to_string()));
        }

        let numreplicas = arguments[0]
            .parse::<usize>()
            .map_err(|_| CommandError::NotAnInteger)?;
        let timeout_ms = arguments[1]
            .parse::<u64>()
            .map_err(|_| CommandError::NotAnInteger)?;

        Ok(Self {
            numreplicas,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// Counts replicas that have acknowledged the current replication offset,
/// polling for up to the full timeout when the count is short.
pub async fn wait(
    master: &Arc<MasterState>,
    arguments: &[String],
) -> Result<CommandResult, CommandError> {
    let wait_arguments = WaitArguments::parse(arguments)?;

    let acked = master
        .wait_for_acked(wait_arguments.numreplicas, wait_arguments.timeout)
        .await;

    Ok(CommandResult::Response(
        RespValue::Integer(acked as i64).encode(),
    ))
}
