//! Master-side replication controller.
//!
//! Tracks the replica registry, performs the master-initiated handshake,
//! fans writes out to connected replicas and answers the WAIT and INFO
//! replication queries. The replication offset counts the canonical wire
//! bytes of every committed write; a replica's acknowledged offset advances
//! optimistically on every successful send and is refined by any explicit
//! `REPLCONF ACK` it reports.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::resp::RespValue;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Backlog size advertised through INFO. No in-memory backlog is kept, so
/// partial resync is only offered to replicas that are exactly caught up.
const REPL_BACKLOG_SIZE: u64 = 1_048_576;

#[derive(Debug)]
pub struct ReplicaInfo {
    pub host: String,
    pub port: u16,
    pub writer: Option<Arc<RwLock<OwnedWriteHalf>>>,
    pub connected: bool,
    pub ack_offset: u64,
}

#[derive(Debug)]
struct MasterInner {
    replication_offset: u64,
    replicas: Vec<ReplicaInfo>,
}

#[derive(Debug)]
pub struct MasterState {
    /// Immutable 40-hex-digit identity generated at startup.
    pub run_id: String,
    master_id: String,
    listening_port: u16,
    inner: Mutex<MasterInner>,
}

impl MasterState {
    pub fn new(listening_port: u16) -> Self {
        MasterState {
            run_id: generate_run_id(),
            master_id: format!("master_{}", std::process::id()),
            listening_port,
            inner: Mutex::new(MasterInner {
                replication_offset: 0,
                replicas: Vec::new(),
            }),
        }
    }

    pub async fn replication_offset(&self) -> u64 {
        self.inner.lock().await.replication_offset
    }

    /// Registers a static replica and eagerly attempts the handshake.
    ///
    /// A failed connection leaves the entry disconnected; the next write
    /// that fans out retries it lazily.
    pub async fn add_replica(self: &Arc<Self>, host: String, port: u16) {
        let mut inner = self.inner.lock().await;

        if inner
            .replicas
            .iter()
            .any(|replica| replica.host == host && replica.port == port)
        {
            debug!(%host, port, "replica already registered");
            return;
        }

        inner.replicas.push(ReplicaInfo {
            host,
            port,
            writer: None,
            connected: false,
            ack_offset: 0,
        });

        let offset = inner.replication_offset;
        let index = inner.replicas.len() - 1;
        self.try_connect(&mut inner.replicas[index], offset).await;
    }

    /// Registers or refreshes a replica that announced itself with PSYNC on
    /// an inbound connection; its write half becomes the fan-out channel.
    pub async fn register_stream_replica(
        &self,
        host: String,
        port: u16,
        writer: Arc<RwLock<OwnedWriteHalf>>,
        ack_offset: u64,
    ) {
        let mut inner = self.inner.lock().await;

        if let Some(replica) = inner
            .replicas
            .iter_mut()
            .find(|replica| replica.host == host && replica.port == port)
        {
            replica.writer = Some(writer);
            replica.connected = true;
            replica.ack_offset = ack_offset;
            info!(%host, port, "refreshed replica after resync");
        } else {
            info!(%host, port, "registered new replica");
            inner.replicas.push(ReplicaInfo {
                host,
                port,
                writer: Some(writer),
                connected: true,
                ack_offset,
            });
        }
    }

    pub async fn update_ack(&self, host: &str, port: u16, offset: u64) {
        let mut inner = self.inner.lock().await;

        if let Some(replica) = inner
            .replicas
            .iter_mut()
            .find(|replica| replica.host == host && replica.port == port)
        {
            replica.ack_offset = replica.ack_offset.max(offset);
        }
    }

    pub async fn mark_disconnected(&self, host: &str, port: u16) {
        let mut inner = self.inner.lock().await;

        if let Some(replica) = inner
            .replicas
            .iter_mut()
            .find(|replica| replica.host == host && replica.port == port)
        {
            replica.connected = false;
            replica.writer = None;
            info!(%host, port, "replica disconnected");
        }
    }

    /// Serialises a write in canonical form, advances the replication
    /// offset by its byte length, then fans it out.
    ///
    /// A disconnected replica gets one reconnect attempt; a failed send
    /// gets one reconnect-and-resend. A second failure leaves the replica
    /// disconnected and the frame is lost for it until the next resync.
    pub async fn propagate(self: &Arc<Self>, name: &str, arguments: &[String]) {
        let mut parts: Vec<&str> = Vec::with_capacity(arguments.len() + 1);
        parts.push(name);
        for argument in arguments {
            parts.push(argument);
        }
        let frame = RespValue::command(&parts);
        let frame_len = frame.len() as u64;

        let mut inner = self.inner.lock().await;
        inner.replication_offset += frame_len;
        let pre_frame_offset = inner.replication_offset - frame_len;

        for replica in &mut inner.replicas {
            if !replica.connected || replica.writer.is_none() {
                if !self.try_connect(replica, pre_frame_offset).await {
                    continue;
                }
            }

            let Some(writer) = replica.writer.clone() else {
                continue;
            };

            match send_frame(&writer, frame.as_bytes()).await {
                Ok(()) => {
                    replica.ack_offset += frame_len;
                }
                Err(error) => {
                    warn!(
                        host = %replica.host,
                        port = replica.port,
                        %error,
                        "send to replica failed, reconnecting"
                    );
                    replica.connected = false;
                    replica.writer = None;

                    if !self.try_connect(replica, pre_frame_offset).await {
                        continue;
                    }

                    let Some(writer) = replica.writer.clone() else {
                        continue;
                    };

                    match send_frame(&writer, frame.as_bytes()).await {
                        Ok(()) => {
                            replica.ack_offset += frame_len;
                        }
                        Err(error) => {
                            warn!(
                                host = %replica.host,
                                port = replica.port,
                                %error,
                                "dropping frame for replica after failed resend"
                            );
                            replica.connected = false;
                            replica.writer = None;
                        }
                    }
                }
            }
        }
    }

    async fn count_acked(&self) -> usize {
        let inner = self.inner.lock().await;

        inner
            .replicas
            .iter()
            .filter(|replica| replica.connected && replica.ack_offset >= inner.replication_offset)
            .count()
    }

    /// WAIT: polls until `numreplicas` replicas acknowledge the current
    /// offset or the full timeout elapses. A zero timeout answers with the
    /// current count immediately.
    pub async fn wait_for_acked(&self, numreplicas: usize, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let acked = self.count_acked().await;

            if acked >= numreplicas
                || timeout.is_zero()
                || tokio::time::Instant::now() >= deadline
            {
                return acked;
            }

            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    pub async fn info_section(&self) -> String {
        let inner = self.inner.lock().await;
        let connected = inner
            .replicas
            .iter()
            .filter(|replica| replica.connected)
            .count();

        let mut info = String::from("# Replication\r\n");
        info.push_str("role:master\r\n");
        info.push_str(&format!("master_replid:{}\r\n", self.run_id));
        info.push_str("master_replid2:0000000000000000000000000000000000000000\r\n");
        info.push_str(&format!(
            "master_repl_offset:{}\r\n",
            inner.replication_offset
        ));
        info.push_str("second_repl_offset:-1\r\n");
        info.push_str("repl_backlog_active:1\r\n");
        info.push_str(&format!("repl_backlog_size:{}\r\n", REPL_BACKLOG_SIZE));
        info.push_str("repl_backlog_first_byte_offset:0\r\n");
        info.push_str(&format!(
            "repl_backlog_histlen:{}\r\n",
            inner.replication_offset
        ));
        info.push_str(&format!("connected_slaves:{}\r\n", connected));

        for (index, replica) in inner
            .replicas
            .iter()
            .filter(|replica| replica.connected)
            .enumerate()
        {
            info.push_str(&format!(
                "slave{}:ip={},port={},state=online,offset={},lag=0\r\n",
                index, replica.host, replica.port, replica.ack_offset
            ));
        }

        info
    }

    /// Human-readable summary for the REPLICAS admin command.
    pub async fn replica_summary(&self) -> String {
        let inner = self.inner.lock().await;
        let connected = inner
            .replicas
            .iter()
            .filter(|replica| replica.connected)
            .count();

        let mut summary = format!("Connected replicas: {}\n", connected);
        summary.push_str(&format!(
            "id:{},runid:{},port:{},replicas:{}\n",
            self.master_id,
            self.run_id,
            self.listening_port,
            inner.replicas.len()
        ));

        for replica in &inner.replicas {
            summary.push_str(&format!("- {}:{}\n", replica.host, replica.port));
        }

        summary
    }

    /// Dials the replica's listening socket and runs the master-initiated
    /// handshake. On success the write half is stored and a reader task
    /// consumes the replica's acknowledgments.
    async fn try_connect(
        self: &Arc<Self>,
        replica: &mut ReplicaInfo,
        ack_offset: u64,
    ) -> bool {
        match self.handshake_with(&replica.host, replica.port).await {
            Ok(stream) => {
                let (reader, writer) = stream.into_split();
                let writer = Arc::new(RwLock::new(writer));

                replica.writer = Some(writer);
                replica.connected = true;
                replica.ack_offset = ack_offset;
                info!(
                    host = %replica.host,
                    port = replica.port,
                    "replica handshake completed"
                );

                tokio::spawn(Arc::clone(self).consume_replica_replies(
                    reader,
                    replica.host.clone(),
                    replica.port,
                ));

                true
            }
            Err(error) => {
                warn!(
                    host = %replica.host,
                    port = replica.port,
                    %error,
                    "failed to connect to replica"
                );
                replica.writer = None;
                replica.connected = false;
                false
            }
        }
    }

    async fn handshake_with(&self, host: &str, port: u16) -> std::io::Result<TcpStream> {
        let mut stream = TcpStream::connect((host, port)).await?;
        let mut buffer = BytesMut::with_capacity(1024);
        let listening_port = self.listening_port.to_string();

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
        send_and_expect(
            &mut stream,
            &mut buffer,
            &[
                "REPLCONF",
                "master-id",
                &self.master_id,
                "master-runid",
                &self.run_id,
            ],
            "OK",
        )
        .await?;

        Ok(stream)
    }

    /// Drains a master-initiated link: the replica may report explicit
    /// offsets via REPLCONF ACK; everything else is discarded.
    async fn consume_replica_replies(
        self: Arc<Self>,
        mut reader: OwnedReadHalf,
        host: String,
        port: u16,
    ) {
        let mut buffer = BytesMut::with_capacity(1024);

        loop {
            loop {
                match RespValue::decode(&buffer[..]) {
                    Ok(Some((value, consumed))) => {
                        buffer.advance(consumed);

                        if let Some(offset) = parse_ack(&value) {
                            self.update_ack(&host, port, offset).await;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        debug!(%host, port, %error, "discarding undecodable replica reply");
                        buffer.clear();
                        break;
                    }
                }
            }

            match reader.read_buf(&mut buffer).await {
                Ok(0) | Err(_) => {
                    self.mark_disconnected(&host, port).await;
                    return;
                }
                Ok(_) => (),
            }
        }
    }
}

async fn send_frame(writer: &Arc<RwLock<OwnedWriteHalf>>, bytes: &[u8]) -> std::io::Result<()> {
    let mut writer_guard = writer.write().await;
    writer_guard.write_all(bytes).await?;
    writer_guard.flush().await
}

async fn send_and_expect(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    command: &[&str],
    expected: &str,
) -> std::io::Result<()> {
    stream
        .write_all(RespValue::command(command).as_bytes())
        .await?;
    stream.flush().await?;

    loop {
        match RespValue::decode(&buffer[..]) {
            Ok(Some((value, consumed))) => {
                buffer.advance(consumed);

                return if value == RespValue::SimpleString(expected.to_string()) {
                    Ok(())
                } else {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("unexpected handshake reply: {:?}", value),
                    ))
                };
            }
            Ok(None) => {
                let read = stream.read_buf(buffer).await?;
                if read == 0 {
                    return Err(std::io::ErrorKind::UnexpectedEof.into());
                }
            }
            Err(error) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    error.to_string(),
                ));
            }
        }
    }
}

fn parse_ack(value: &RespValue) -> Option<u64> {
    let RespValue::Array(elements) = value else {
        return None;
    };

    let [
        RespValue::BulkString(name),
        RespValue::BulkString(subcommand),
        RespValue::BulkString(offset),
    ] = elements.as_slice()
    else {
        return None;
    };

    if !name.eq_ignore_ascii_case("REPLCONF") || !subcommand.eq_ignore_ascii_case("ACK") {
        return None;
    }

    offset.parse::<u64>().ok()
}

pub fn generate_run_id() -> String {
    const CHARSET: &[u8] = b"0123456789abcdef";
    let mut rng = rand::rng();

    (0..40)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{generate_run_id, parse_ack};
    use crate::resp::RespValue;

    #[test]
    fn test_generate_run_id_is_40_hex_digits() {
        let run_id = generate_run_id();

        assert_eq!(run_id.len(), 40);
        assert!(run_id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(run_id, generate_run_id());
    }

    #[test]
    fn test_parse_ack() {
        let ack = RespValue::Array(vec![
            RespValue::BulkString("REPLCONF".to_string()),
            RespValue::BulkString("ACK".to_string()),
            RespValue::BulkString("154".to_string()),
        ]);
        assert_eq!(parse_ack(&ack), Some(154));

        let ok = RespValue::SimpleString("OK".to_string());
        assert_eq!(parse_ack(&ok), None);

        let other = RespValue::Array(vec![
            RespValue::BulkString("REPLCONF".to_string()),
            RespValue::BulkString("listening-port".to_string()),
            RespValue::BulkString("6380".to_string()),
        ]);
        assert_eq!(parse_ack(&other), None);
    }
}
