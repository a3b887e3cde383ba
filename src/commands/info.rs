//! INFO command: exposes the replication section for either role.

use crate::commands::command_error::CommandError;
use crate::commands::command_handler::CommandResult;
use crate::resp::RespValue;
use crate::server::{RoleState, SharedServer};

enum InfoSection {
    Default,
    Replication,
}

struct InfoArguments {
    section: InfoSection,
}

impl InfoArguments {
    fn parse(arguments: &[String]) -> Result<Self, CommandError> {
        if arguments.len() > 1 {
            return Err(CommandError::Arity("INFO".to_string()));
        }

        if arguments.is_empty() {
            return Ok(InfoArguments {
                section: InfoSection::Default,
            });
        }

        match arguments[0].to_lowercase().as_str() {
            "replication" | "all" => Ok(InfoArguments {
                section: InfoSection::Replication,
            }),
            _ => Err(CommandError::InvalidArgument("INFO section")),
        }
    }
}

pub async fn info(
    server: &SharedServer,
    arguments: &[String],
) -> Result<CommandResult, CommandError> {
    let info_arguments = InfoArguments::parse(arguments)?;

    // Replication is the only section carried, so the default document and
    // the explicit section render the same text.
    let document = match info_arguments.section {
        InfoSection::Default | InfoSection::Replication => match &server.role {
            RoleState::Master(master) => master.info_section().await,
            RoleState::Replica(replica) => replica.info_section().await,
        },
    };

    Ok(CommandResult::Response(
        RespValue::BulkString(document).encode(),
    ))
}
