use crate::commands::command_error::CommandError;
use crate::commands::command_handler::CommandResult;
use crate::keyspace::Keyspace;
use crate::resp::RespValue;

pub struct LrangeArguments {
    pub key: String,
    pub start: i64,
    pub stop: i64,
}

impl LrangeArguments {
    pub fn parse(arguments: &[String]) -> Result<Self, CommandError> {
        if arguments.len() != 3 {
            return Err(CommandError::Arity("LRANGE".to_string()));
        }

        let start = arguments[1]
            .parse::<i64>()
            .map_err(|_| CommandError::NotAnInteger)?;
        let stop = arguments[2]
            .parse::<i64>()
            .map_err(|_| CommandError::NotAnInteger)?;

        Ok(Self {
            key: arguments[0].clone(),
            start,
            stop,
        })
    }
}

pub fn lrange(keyspace: &Keyspace, arguments: &[String]) -> Result<CommandResult, CommandError> {
    let lrange_arguments = LrangeArguments::parse(arguments)?;

    let range = keyspace.lrange(
        &lrange_arguments.key,
        lrange_arguments.start,
        lrange_arguments.stop,
    )?;

    Ok(CommandResult::Response(
        RespValue::encode_array_from_strings(&range),
    ))
}
