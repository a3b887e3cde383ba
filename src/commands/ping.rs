use crate::commands::command_error::CommandError;
use crate::commands::command_handler::CommandResult;
use crate::resp::RespValue;

pub fn ping(arguments: &[String]) -> Result<CommandResult, CommandError> {
    if !arguments.is_empty() {
        return Err(CommandError::Arity("PING".to_string()));
    }

    Ok(CommandResult::Response(
        RespValue::SimpleString("PONG".to_string()).encode(),
    ))
}
