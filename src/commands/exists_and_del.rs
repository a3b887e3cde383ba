use crate::commands::command_error::CommandError;
use crate::commands::command_handler::CommandResult;
use crate::keyspace::Keyspace;
use crate::resp::RespValue;

/// EXISTS counts how many of the given keys are present; duplicate keys
/// are counted every time they appear.
pub fn exists(keyspace: &Keyspace, arguments: &[String]) -> Result<CommandResult, CommandError> {
    if arguments.is_empty() {
        return Err(CommandError::Arity("EXISTS".to_string()));
    }

    let count = arguments
        .iter()
        .filter(|key| keyspace.exists(key.as_str()))
        .count();

    Ok(CommandResult::Response(
        RespValue::Integer(count as i64).encode(),
    ))
}

/// DEL reports how many keys were actually removed.
pub fn del(keyspace: &Keyspace, arguments: &[String]) -> Result<CommandResult, CommandError> {
    if arguments.is_empty() {
        return Err(CommandError::Arity("DEL".to_string()));
    }

    let count = arguments
        .iter()
        .filter(|key| keyspace.del(key.as_str()))
        .count();

    Ok(CommandResult::Response(
        RespValue::Integer(count as i64).encode(),
    ))
}
