use crate::commands::command_error::CommandError;
use crate::commands::command_handler::CommandResult;
use crate::keyspace::Keyspace;
use crate::resp::RespValue;

pub fn incr(keyspace: &Keyspace, arguments: &[String]) -> Result<CommandResult, CommandError> {
    step(keyspace, "INCR", arguments)
}

pub fn decr(keyspace: &Keyspace, arguments: &[String]) -> Result<CommandResult, CommandError> {
    step(keyspace, "DECR", arguments)
}

/// Steps the integer at the key by one in either direction. A missing key
/// is initialised to the step itself, so INCR yields 1 and DECR yields -1.
fn step(
    keyspace: &Keyspace,
    command_name: &str,
    arguments: &[String],
) -> Result<CommandResult, CommandError> {
    if arguments.len() != 1 {
        return Err(CommandError::Arity(command_name.to_string()));
    }

    let stepped = if command_name == "INCR" {
        keyspace.incr(&arguments[0])?
    } else {
        keyspace.decr(&arguments[0])?
    };

    Ok(CommandResult::Response(
        RespValue::Integer(stepped).encode(),
    ))
}
