use std::sync::Arc;

use crate::commands::command_error::CommandError;
use crate::commands::command_handler::CommandResult;
use crate::replication::MasterState;

pub struct PsyncArguments {
    pub replid: String,
    pub offset: i64,
}

impl PsyncArguments {
    pub fn parse(arguments: &[String]) -> Result<Self, CommandError> {
        if arguments.len() != 2 {
            return Err(CommandError::Arity("PSYNC".to_string()));
        }

        let offset = arguments[1]
            .parse::<i64>()
            .map_err(|_| CommandError::InvalidArgument("PSYNC offset"))?;

        Ok(Self {
            replid: arguments[0].clone(),
            offset,
        })
    }
}

/// Decides between full and partial resync.
///
/// No backlog is kept, so CONTINUE is only safe for a replica that is
/// exactly caught up; an unknown or foreign replid, any gap, or an offset
/// from the future all get a full resync. The connection layer delivers
/// the snapshot and registers the replica once the header is on the wire.
pub async fn psync(
    master: &Arc<MasterState>,
    arguments: &[String],
) -> Result<CommandResult, CommandError> {
    let psync_arguments = PsyncArguments::parse(arguments)?;
    let current_offset = master.replication_offset().await;

    if psync_arguments.replid == master.run_id
        && psync_arguments.offset >= 0
        && psync_arguments.offset as u64 == current_offset
    {
        Ok(CommandResult::PartialResync {
            header: format!("+CONTINUE {}\r\n", master.run_id),
            ack_offset: psync_arguments.offset as u64,
        })
    } else {
        Ok(CommandResult::FullResync {
            header: format!("+FULLRESYNC {} {}\r\n", master.run_id, current_offset),
        })
    }
}
