//! REPLCONF: replication configuration exchanged during the handshake and
//! offset acknowledgments afterwards.

use std::sync::Arc;

use crate::commands::command_error::CommandError;
use crate::commands::command_handler::CommandResult;
use crate::connection::ClientSession;
use crate::replication::{MasterState, ReplicaState};
use crate::resp::RespValue;

fn ok() -> CommandResult {
    CommandResult::Response(RespValue::SimpleString("OK".to_string()).encode())
}

/// REPLCONF handling on a master.
///
/// `listening-port` is remembered on the session so a later PSYNC can
/// register the replica under its listening socket; `ACK` refreshes the
/// registered replica's acknowledged offset. Everything else (capa and
/// friends) needs no bookkeeping and is simply acknowledged.
pub async fn replconf_on_master(
    master: &Arc<MasterState>,
    session: &mut ClientSession,
    arguments: &[String],
) -> Result<CommandResult, CommandError> {
    if arguments.is_empty() {
        return Err(CommandError::Arity("REPLCONF".to_string()));
    }

    match arguments[0].to_uppercase().as_str() {
        "LISTENING-PORT" => {
            let Some(port) = arguments.get(1).and_then(|port| port.parse::<u16>().ok()) else {
                return Err(CommandError::InvalidArgument("REPLCONF listening-port"));
            };

            session.replica_listening_port = Some(port);
            Ok(ok())
        }
        "ACK" => {
            let Some(offset) = arguments.get(1).and_then(|offset| offset.parse::<u64>().ok())
            else {
                return Err(CommandError::InvalidArgument("REPLCONF ACK offset"));
            };

            if let Some((host, port)) = session.registered_replica.clone() {
                master.update_ack(&host, port, offset).await;
            }

            Ok(ok())
        }
        _ => Ok(ok()),
    }
}

/// REPLCONF handling on a replica.
///
/// `GETACK` elicits `REPLCONF ACK <applied_offset>` back on the same
/// socket; `master-runid` records the master identity announced during a
/// master-initiated handshake.
pub async fn replconf_on_replica(
    state: &Arc<ReplicaState>,
    arguments: &[String],
) -> Result<CommandResult, CommandError> {
    if arguments.is_empty() {
        return Err(CommandError::Arity("REPLCONF".to_string()));
    }

    match arguments[0].to_uppercase().as_str() {
        "GETACK" => {
            let offset = state.applied_offset().await.to_string();

            Ok(CommandResult::Response(RespValue::command(&[
                "REPLCONF", "ACK", &offset,
            ])))
        }
        "MASTER-ID" | "MASTER-RUNID" => {
            // The identity announcement pairs up as
            // `master-id <id> master-runid <run_id>`; record the run id so
            // a later PSYNC can ask this master for a partial resync.
            for pair in arguments.chunks(2) {
                if let [key, value] = pair {
                    if key.eq_ignore_ascii_case("master-runid") {
                        state.set_master_replid(value.clone()).await;
                    }
                }
            }

            Ok(ok())
        }
        _ => Ok(ok()),
    }
}
