//! Per-connection read, decode and dispatch loops.
//!
//! Each accepted socket runs in its own task: bytes accumulate in a buffer,
//! complete RESP frames are decoded incrementally and dispatched through
//! the executor, and replies flow back through a `ReplySink`. On a replica,
//! connections whose peer matches the configured master are treated as the
//! master link: their write frames are applied through the silent sink.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::commands::{CommandHandler, CommandResult};
use crate::rdb;
use crate::replication::MasterState;
use crate::resp::RespValue;
use crate::server::{RoleState, SharedServer};

/// Destination for command replies: a client socket, or nowhere (used when
/// applying master-originated writes on a replica).
pub enum ReplySink {
    Socket(Arc<RwLock<OwnedWriteHalf>>),
    Silent,
}

impl ReplySink {
    pub async fn send(&self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            ReplySink::Socket(writer) => {
                let mut writer_guard = writer.write().await;
                writer_guard.write_all(bytes).await?;
                writer_guard.flush().await
            }
            ReplySink::Silent => Ok(()),
        }
    }
}

/// Per-connection bookkeeping used by the replication commands.
#[derive(Debug, Default)]
pub struct ClientSession {
    pub peer_host: String,
    pub peer_port: u16,
    /// Port advertised via REPLCONF listening-port on this connection.
    pub replica_listening_port: Option<u16>,
    /// Set once this connection registered itself as a replica via PSYNC.
    pub registered_replica: Option<(String, u16)>,
}

impl ClientSession {
    /// The registry key for a replica announcing itself on this connection:
    /// its advertised listening port when known, else the peer port.
    fn replica_identity(&self) -> (String, u16) {
        (
            self.peer_host.clone(),
            self.replica_listening_port.unwrap_or(self.peer_port),
        )
    }
}

pub async fn handle_client_connection(stream: TcpStream, server: Arc<SharedServer>) {
    let peer_address = match stream.peer_addr() {
        Ok(address) => address,
        Err(error) => {
            warn!(%error, "failed to read peer address");
            return;
        }
    };

    let (mut reader, writer) = stream.into_split();
    let writer = Arc::new(RwLock::new(writer));
    let socket_sink = ReplySink::Socket(Arc::clone(&writer));
    let silent_sink = ReplySink::Silent;

    let mut session = ClientSession {
        peer_host: peer_address.ip().to_string(),
        peer_port: peer_address.port(),
        replica_listening_port: None,
        registered_replica: None,
    };

    let from_master = match &server.role {
        RoleState::Replica(state) => state.is_master_peer(&session.peer_host).await,
        RoleState::Master(_) => false,
    };

    let mut buffer = BytesMut::with_capacity(4096);

    'connection: loop {
        loop {
            let (frame, frame_len) = match RespValue::decode(&buffer[..]) {
                Ok(Some(decoded)) => decoded,
                Ok(None) => break,
                Err(error) => {
                    warn!(peer = %peer_address, %error, "malformed frame, closing connection");
                    let reply = RespValue::Error(format!("ERR Protocol error: {}", error)).encode();
                    let _ = socket_sink.send(reply.as_bytes()).await;
                    break 'connection;
                }
            };
            buffer.advance(frame_len);

            let processed = process_frame(
                &server,
                &mut session,
                &socket_sink,
                &silent_sink,
                &writer,
                from_master,
                frame,
                frame_len,
            )
            .await;

            if let Err(error) = processed {
                debug!(peer = %peer_address, %error, "connection write failed");
                break 'connection;
            }
        }

        match reader.read_buf(&mut buffer).await {
            Ok(0) => break,
            Ok(_) => (),
            Err(error) => {
                debug!(peer = %peer_address, %error, "read failed");
                break;
            }
        }
    }

    // A connection that registered as a replica leaves the registry entry
    // behind, marked disconnected, for the lazy-reconnect path.
    if let RoleState::Master(master) = &server.role {
        if let Some((host, port)) = session.registered_replica.clone() {
            master.mark_disconnected(&host, port).await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_frame(
    server: &Arc<SharedServer>,
    session: &mut ClientSession,
    socket_sink: &ReplySink,
    silent_sink: &ReplySink,
    writer: &Arc<RwLock<OwnedWriteHalf>>,
    from_master: bool,
    frame: RespValue,
    frame_len: usize,
) -> std::io::Result<()> {
    let handler = match CommandHandler::new(&frame) {
        Ok(handler) => handler,
        Err(error) => return socket_sink.send(error.as_string().as_bytes()).await,
    };

    match &server.role {
        RoleState::Master(master) => {
            match handler.handle_for_master(server, master, session).await {
                Ok(CommandResult::Response(response)) => {
                    socket_sink.send(response.as_bytes()).await
                }
                Ok(CommandResult::NoResponse) => Ok(()),
                Ok(CommandResult::FullResync { header }) => {
                    complete_full_resync(server, master, session, writer, header).await
                }
                Ok(CommandResult::PartialResync { header, ack_offset }) => {
                    socket_sink.send(header.as_bytes()).await?;

                    let (host, port) = session.replica_identity();
                    master
                        .register_stream_replica(host.clone(), port, Arc::clone(writer), ack_offset)
                        .await;
                    session.registered_replica = Some((host, port));
                    Ok(())
                }
                Err(error) => socket_sink.send(error.as_string().as_bytes()).await,
            }
        }
        RoleState::Replica(state) => {
            // Every master-originated frame advances the applied offset by
            // its byte length before it executes, as in the stream apply
            // loop. Writes are applied with no reply; the handshake frames
            // (PING, REPLCONF) still get acknowledged so a master-initiated
            // handshake can complete, and a GETACK answered here already
            // covers its own frame.
            if from_master {
                state.advance_applied_offset(frame_len as u64).await;

                if handler.is_write() {
                    return match handler.apply_write(&server.keyspace) {
                        Ok(CommandResult::Response(response)) => {
                            silent_sink.send(response.as_bytes()).await
                        }
                        Ok(_) => Ok(()),
                        Err(error) => silent_sink.send(error.as_string().as_bytes()).await,
                    };
                }
            }

            match handler.handle_for_replica_client(server, state).await {
                Ok(CommandResult::Response(response)) => {
                    socket_sink.send(response.as_bytes()).await
                }
                Ok(_) => Ok(()),
                Err(error) => socket_sink.send(error.as_string().as_bytes()).await,
            }
        }
    }
}

/// Delivers a full resync: the FULLRESYNC header, then the snapshot as a
/// bulk string, then registers the connection's write half as the
/// replica's fan-out channel.
async fn complete_full_resync(
    server: &Arc<SharedServer>,
    master: &Arc<MasterState>,
    session: &mut ClientSession,
    writer: &Arc<RwLock<OwnedWriteHalf>>,
    header: String,
) -> std::io::Result<()> {
    let snapshot = rdb::encode_snapshot(&server.keyspace);
    let current_offset = master.replication_offset().await;

    {
        let mut writer_guard = writer.write().await;
        writer_guard.write_all(header.as_bytes()).await?;
        writer_guard
            .write_all(format!("${}\r\n", snapshot.len()).as_bytes())
            .await?;
        writer_guard.write_all(&snapshot).await?;
        writer_guard.write_all(b"\r\n").await?;
        writer_guard.flush().await?;
    }

    let (host, port) = session.replica_identity();
    master
        .register_stream_replica(host.clone(), port, Arc::clone(writer), current_offset)
        .await;
    session.registered_replica = Some((host.clone(), port));

    info!(
        %host,
        port,
        snapshot_bytes = snapshot.len(),
        "full resync delivered"
    );
    Ok(())
}
