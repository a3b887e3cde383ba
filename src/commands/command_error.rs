use thiserror::Error;

use crate::keyspace::KeyspaceError;
use crate::resp::RespValue;

#[derive(Error, Debug, PartialEq)]
pub enum CommandError {
    #[error("malformed command frame")]
    Protocol,
    #[error("wrong number of arguments for '{0}' command")]
    Arity(String),
    #[error("operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("value is not an integer or out of range")]
    NotAnInteger,
    #[error("write command on a read-only replica")]
    ReadOnly,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("invalid {0}")]
    InvalidArgument(&'static str),
    #[error("PSYNC requested from a replica")]
    PsyncOnReplica,
}

impl CommandError {
    /// Renders the error as the wire reply sent back to the client.
    pub fn as_string(&self) -> String {
        match self {
            CommandError::Protocol => {
                RespValue::Error("ERR Protocol error: malformed command frame".to_string())
                    .encode()
            }
            CommandError::Arity(command) => RespValue::Error(format!(
                "ERR wrong number of arguments for '{}' command",
                command
            ))
            .encode(),
            CommandError::WrongType => RespValue::Error(
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
            )
            .encode(),
            CommandError::NotAnInteger => {
                RespValue::Error("ERR value is not an integer or out of range".to_string())
                    .encode()
            }
            CommandError::ReadOnly => RespValue::Error(
                "READONLY You can't write against a read only replica.".to_string(),
            )
            .encode(),
            CommandError::UnknownCommand(name) => {
                RespValue::Error(format!("ERR unknown command '{}'", name)).encode()
            }
            CommandError::InvalidArgument(what) => {
                RespValue::Error(format!("ERR invalid {}", what)).encode()
            }
            CommandError::PsyncOnReplica => RespValue::Error(
                "ERR Can't PSYNC with a replica. Point the replica at this server's master instead."
                    .to_string(),
            )
            .encode(),
        }
    }
}

impl From<KeyspaceError> for CommandError {
    fn from(error: KeyspaceError) -> Self {
        match error {
            KeyspaceError::WrongType => CommandError::WrongType,
            KeyspaceError::NotAnInteger => CommandError::NotAnInteger,
        }
    }
}
