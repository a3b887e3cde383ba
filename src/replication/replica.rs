//! Replica-side replication client.
//!
//! A replica runs an outbound worker that connects to its master, performs
//! the handshake, ingests the full-resync snapshot when one is offered and
//! then applies the master's command stream. The applied offset advances by
//! the byte length of every frame received on the stream.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::commands::CommandHandler;
use crate::keyspace::{Keyspace, now_ms};
use crate::rdb;
use crate::resp::{RespError, RespValue};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected reply from master: {0}")]
    UnexpectedReply(String),
    #[error("malformed stream from master: {0}")]
    Resp(#[from] RespError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] rdb::SnapshotError),
}

#[derive(Debug)]
struct ReplicaSync {
    master_replid: Option<String>,
    applied_offset: u64,
    master_link_up: bool,
    last_io_ms: i64,
}

#[derive(Debug)]
pub struct ReplicaState {
    pub listening_port: u16,
    pub master_host: String,
    pub master_port: u16,
    sync: Mutex<ReplicaSync>,
}

impl ReplicaState {
    pub fn new(listening_port: u16, master_host: String, master_port: u16) -> Self {
        ReplicaState {
            listening_port,
            master_host,
            master_port,
            sync: Mutex::new(ReplicaSync {
                master_replid: None,
                applied_offset: 0,
                master_link_up: false,
                last_io_ms: now_ms(),
            }),
        }
    }

    pub async fn applied_offset(&self) -> u64 {
        self.sync.lock().await.applied_offset
    }

    pub async fn advance_applied_offset(&self, bytes: u64) {
        let mut sync = self.sync.lock().await;
        sync.applied_offset += bytes;
        sync.last_io_ms = now_ms();
    }

    pub async fn master_replid(&self) -> Option<String> {
        self.sync.lock().await.master_replid.clone()
    }

    pub async fn set_master_replid(&self, replid: String) {
        self.sync.lock().await.master_replid = Some(replid);
    }

    /// A full resync resets the applied offset to the master's.
    pub async fn begin_full_resync(&self, replid: String, offset: u64) {
        let mut sync = self.sync.lock().await;
        sync.master_replid = Some(replid);
        sync.applied_offset = offset;
        sync.last_io_ms = now_ms();
    }

    pub async fn mark_link(&self, up: bool) {
        let mut sync = self.sync.lock().await;
        sync.master_link_up = up;
        if up {
            sync.last_io_ms = now_ms();
        }
    }

    /// Best-effort master identification: the peer IP matches the
    /// configured master host or an address it resolves to.
    pub async fn is_master_peer(&self, peer_host: &str) -> bool {
        if peer_host == self.master_host {
            return true;
        }

        match tokio::net::lookup_host((self.master_host.as_str(), self.master_port)).await {
            Ok(addresses) => {
                for address in addresses {
                    if address.ip().to_string() == peer_host {
                        return true;
                    }
                }
                false
            }
            Err(_) => false,
        }
    }

    pub async fn info_section(&self) -> String {
        let sync = self.sync.lock().await;
        let last_io_seconds_ago = ((now_ms() - sync.last_io_ms) / 1_000).max(0);

        let mut info = String::from("# Replication\r\n");
        info.push_str("role:slave\r\n");
        info.push_str(&format!("master_host:{}\r\n", self.master_host));
        info.push_str(&format!("master_port:{}\r\n", self.master_port));
        info.push_str(&format!(
            "master_link_status:{}\r\n",
            if sync.master_link_up { "up" } else { "down" }
        ));
        info.push_str(&format!(
            "master_last_io_seconds_ago:{}\r\n",
            last_io_seconds_ago
        ));
        info.push_str("master_sync_in_progress:0\r\n");
        info.push_str(&format!("slave_repl_offset:{}\r\n", sync.applied_offset));
        info.push_str("slave_priority:100\r\n");
        info.push_str("slave_read_only:1\r\n");
        info.push_str("connected_slaves:0\r\n");
        info.push_str(&format!(
            "master_replid:{}\r\n",
            sync.master_replid.as_deref().unwrap_or("")
        ));
        info.push_str("master_replid2:0000000000000000000000000000000000000000\r\n");
        info.push_str(&format!("master_repl_offset:{}\r\n", sync.applied_offset));
        info.push_str("second_repl_offset:-1\r\n");
        info.push_str("repl_backlog_active:1\r\n");
        info.push_str("repl_backlog_size:1048576\r\n");
        info.push_str("repl_backlog_first_byte_offset:0\r\n");
        info.push_str(&format!("repl_backlog_histlen:{}\r\n", sync.applied_offset));

        info
    }
}

/// Outbound sync loop: connect, handshake, resync, apply; reconnect with
/// exponential backoff after any failure.
pub async fn run_replication_worker(keyspace: Arc<Keyspace>, state: Arc<ReplicaState>) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match sync_with_master(&keyspace, &state).await {
            Ok(()) => {
                info!(
                    host = %state.master_host,
                    port = state.master_port,
                    "master closed the replication link"
                );
                backoff = INITIAL_BACKOFF;
            }
            Err(error) => {
                warn!(
                    host = %state.master_host,
                    port = state.master_port,
                    %error,
                    "replication link failed"
                );
            }
        }

        state.mark_link(false).await;
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn sync_with_master(
    keyspace: &Arc<Keyspace>,
    state: &Arc<ReplicaState>,
) -> Result<(), ReplicationError> {
    let mut stream =
        TcpStream::connect((state.master_host.as_str(), state.master_port)).await?;
    info!(
        host = %state.master_host,
        port = state.master_port,
        "connected to master"
    );

    let mut buffer = BytesMut::with_capacity(4096);
    let listening_port = state.listening_port.to_string();

    send_and_expect(&mut stream, &mut buffer, &["PING"], "PONG").await?;
    send_and_expect(
        &mut stream,
        &mut buffer,
        &["REPLCONF", "listening-port", &listening_port],
        "OK",
    )
    .await?;
    send_and_expect(
        &mut stream,
        &mut buffer,
        &["REPLCONF", "capa", "eof", "capa", "psync2"],
        "OK",
    )
    .await?;

    let (replid, offset) = match state.master_replid().await {
        Some(replid) => (replid, state.applied_offset().await.to_string()),
        None => ("?".to_string(), "0".to_string()),
    };
    stream
        .write_all(RespValue::command(&["PSYNC", &replid, &offset]).as_bytes())
        .await?;
    stream.flush().await?;

    let reply = read_line(&mut stream, &mut buffer).await?;

    if let Some(rest) = reply.strip_prefix("+FULLRESYNC ") {
        let mut parts = rest.split_whitespace();
        let (Some(replid), Some(offset)) = (parts.next(), parts.next()) else {
            return Err(ReplicationError::UnexpectedReply(reply.clone()));
        };
        let offset = offset
            .parse::<u64>()
            .map_err(|_| ReplicationError::UnexpectedReply(reply.clone()))?;

        info!(replid, offset, "full resync from master");
        receive_snapshot(&mut stream, &mut buffer, keyspace).await?;
        state.begin_full_resync(replid.to_string(), offset).await;
    } else if let Some(rest) = reply.strip_prefix("+CONTINUE") {
        let replid = rest.trim();
        if !replid.is_empty() {
            state.set_master_replid(replid.to_string()).await;
        }
        info!(replid, "partial resync from master");
    } else {
        return Err(ReplicationError::UnexpectedReply(reply));
    }

    state.mark_link(true).await;

    apply_stream(&mut stream, &mut buffer, keyspace, state).await
}

/// Reads the bulk-framed snapshot, spools it to a temp file, hands it to
/// the snapshot loader and deletes the file.
async fn receive_snapshot(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    keyspace: &Arc<Keyspace>,
) -> Result<(), ReplicationError> {
    let header = read_line(stream, buffer).await?;
    let Some(length) = header
        .strip_prefix('$')
        .and_then(|digits| digits.parse::<usize>().ok())
    else {
        return Err(ReplicationError::UnexpectedReply(header));
    };

    while buffer.len() < length + 2 {
        if stream.read_buf(buffer).await? == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
    }

    let payload = buffer.split_to(length);
    let terminator = buffer.split_to(2);
    if &terminator[..] != b"\r\n" {
        return Err(ReplicationError::UnexpectedReply(
            "snapshot not terminated with CRLF".to_string(),
        ));
    }

    let temp_path =
        std::env::temp_dir().join(format!("rudis-sync-{}.rdb", std::process::id()));
    tokio::fs::write(&temp_path, &payload).await?;

    let loaded = rdb::load_snapshot(&temp_path, keyspace).await;
    let _ = tokio::fs::remove_file(&temp_path).await;
    loaded?;

    info!(bytes = length, "snapshot loaded");
    Ok(())
}

/// Applies the master's command stream through the silent sink.
///
/// The applied offset advances by each frame's byte length before the frame
/// executes, so the ACK elicited by a GETACK covers the GETACK frame
/// itself.
async fn apply_stream(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    keyspace: &Arc<Keyspace>,
    state: &Arc<ReplicaState>,
) -> Result<(), ReplicationError> {
    loop {
        loop {
            match RespValue::decode(&buffer[..])? {
                Some((frame, consumed)) => {
                    buffer.advance(consumed);
                    state.advance_applied_offset(consumed as u64).await;

                    let handler = match CommandHandler::new(&frame) {
                        Ok(handler) => handler,
                        Err(error) => {
                            debug!(%error, "ignoring unparseable frame from master");
                            continue;
                        }
                    };

                    if handler.is_write() {
                        if let Err(error) = handler.apply_write(keyspace) {
                            debug!(
                                command = %handler.name,
                                %error,
                                "failed to apply write from master"
                            );
                        }
                    } else if handler.name == "REPLCONF"
                        && handler
                            .arguments
                            .first()
                            .is_some_and(|sub| sub.eq_ignore_ascii_case("GETACK"))
                    {
                        let offset = state.applied_offset().await.to_string();
                        let ack = RespValue::command(&["REPLCONF", "ACK", &offset]);
                        stream.write_all(ack.as_bytes()).await?;
                        stream.flush().await?;
                    } else if handler.name != "PING" {
                        debug!(command = %handler.name, "unhandled command from master");
                    }
                }
                None => break,
            }
        }

        if stream.read_buf(buffer).await? == 0 {
            return Ok(());
        }
    }
}

async fn send_and_expect(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    command: &[&str],
    expected: &str,
) -> Result<(), ReplicationError> {
    stream
        .write_all(RespValue::command(command).as_bytes())
        .await?;
    stream.flush().await?;

    loop {
        match RespValue::decode(&buffer[..])? {
            Some((value, consumed)) => {
                buffer.advance(consumed);

                return if value == RespValue::SimpleString(expected.to_string()) {
                    Ok(())
                } else {
                    Err(ReplicationError::UnexpectedReply(format!("{:?}", value)))
                };
            }
            None => {
                if stream.read_buf(buffer).await? == 0 {
                    return Err(
                        std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into()
                    );
                }
            }
        }
    }
}

/// Reads one CRLF-terminated line, consuming it from the buffer.
async fn read_line(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
) -> Result<String, ReplicationError> {
    loop {
        if let Some(pos) = buffer.windows(2).position(|window| window == b"\r\n") {
            let line = buffer.split_to(pos + 2);
            let text = std::str::from_utf8(&line[..pos])
                .map_err(|_| ReplicationError::UnexpectedReply("non-UTF-8 line".to_string()))?;
            return Ok(text.to_string());
        }

        if stream.read_buf(buffer).await? == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
    }
}
