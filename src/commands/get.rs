use crate::commands::command_error::CommandError;
use crate::commands::command_handler::CommandResult;
use crate::keyspace::Keyspace;
use crate::resp::RespValue;

pub fn get(keyspace: &Keyspace, arguments: &[String]) -> Result<CommandResult, CommandError> {
    if arguments.len() != 1 {
        return Err(CommandError::Arity("GET".to_string()));
    }

    let reply = match keyspace.get(&arguments[0])? {
        Some(value) => RespValue::BulkString(value),
        None => RespValue::Null,
    };

    Ok(CommandResult::Response(reply.encode()))
}
