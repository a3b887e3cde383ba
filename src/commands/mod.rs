mod command_error;
mod command_handler;
mod exists_and_del;
mod get;
mod incr_and_decr;
mod info;
mod lrange;
mod ping;
mod psync;
mod replconf;
mod replica_admin;
mod rpush_and_lpush;
mod set;
mod wait;

pub use command_error::CommandError;
pub use command_handler::{CommandHandler, CommandResult, WRITE_COMMANDS};
