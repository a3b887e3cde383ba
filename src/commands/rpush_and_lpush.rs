use crate::commands::command_error::CommandError;
use crate::commands::command_handler::CommandResult;
use crate::keyspace::Keyspace;
use crate::resp::RespValue;

/// RPUSH appends each value to the tail of the list, creating the list if
/// absent. Returns the new length.
pub fn rpush(keyspace: &Keyspace, arguments: &[String]) -> Result<CommandResult, CommandError> {
    push_list(keyspace, "RPUSH", arguments, false)
}

/// LPUSH prepends each value in argument order, so the final order is
/// reversed relative to the argument list. Returns the new length.
pub fn lpush(keyspace: &Keyspace, arguments: &[String]) -> Result<CommandResult, CommandError> {
    push_list(keyspace, "LPUSH", arguments, true)
}

fn push_list(
    keyspace: &Keyspace,
    command_name: &str,
    arguments: &[String],
    front: bool,
) -> Result<CommandResult, CommandError> {
    if arguments.len() < 2 {
        return Err(CommandError::Arity(command_name.to_string()));
    }

    let length = keyspace.push(&arguments[0], &arguments[1..], front)?;

    Ok(CommandResult::Response(
        RespValue::Integer(length as i64).encode(),
    ))
}
