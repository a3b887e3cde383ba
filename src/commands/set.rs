use crate::commands::command_error::CommandError;
use crate::commands::command_handler::CommandResult;
use crate::keyspace::Keyspace;
use crate::resp::RespValue;

pub struct SetArguments {
    pub key: String,
    pub value: String,
}

impl SetArguments {
    pub fn parse(command_name: &str, arguments: &[String]) -> Result<Self, CommandError> {
        if arguments.len() != 2 {
            return Err(CommandError::Arity(command_name.to_string()));
        }

        Ok(Self {
            key: arguments[0].clone(),
            value: arguments[1].clone(),
        })
    }
}

/// Stores a string value, erasing any list previously held under the key.
///
/// Also serves HSET, which the wire protocol treats as a plain SET.
pub fn set(
    keyspace: &Keyspace,
    command_name: &str,
    arguments: &[String],
) -> Result<CommandResult, CommandError> {
    let set_arguments = SetArguments::parse(command_name, arguments)?;

    keyspace.set(set_arguments.key, set_arguments.value);

    Ok(CommandResult::Response(
        RespValue::SimpleString("OK".to_string()).encode(),
    ))
}
