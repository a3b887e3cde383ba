use std::sync::Arc;

use rudis::commands::{CommandError, CommandHandler, CommandResult};
use rudis::connection::ClientSession;
use rudis::resp::RespValue;
use rudis::server::{RoleState, ServerConfig, ServerRole, SharedServer};

fn master_server() -> Arc<SharedServer> {
    Arc::new(SharedServer::new(ServerConfig {
        port: 6390,
        role: ServerRole::Master,
        seed_replicas: Vec::new(),
        snapshot_path: "dump.rdb".into(),
    }))
}

fn replica_server() -> Arc<SharedServer> {
    Arc::new(SharedServer::new(ServerConfig {
        port: 6391,
        role: ServerRole::Replica {
            host: "127.0.0.1".to_string(),
            port: 6390,
        },
        seed_replicas: Vec::new(),
        snapshot_path: "dump.rdb".into(),
    }))
}

fn command(parts: &[&str]) -> CommandHandler {
    let frame = RespValue::Array(
        parts
            .iter()
            .map(|part| RespValue::BulkString(part.to_string()))
            .collect(),
    );
    CommandHandler::new(&frame).unwrap()
}

async fn exec_master(
    server: &Arc<SharedServer>,
    parts: &[&str],
) -> Result<CommandResult, CommandError> {
    let RoleState::Master(master) = &server.role else {
        panic!("expected a master server");
    };
    let mut session = ClientSession::default();

    command(parts).handle_for_master(server, master, &mut session).await
}

async fn exec_replica(
    server: &Arc<SharedServer>,
    parts: &[&str],
) -> Result<CommandResult, CommandError> {
    let RoleState::Replica(state) = &server.role else {
        panic!("expected a replica server");
    };

    command(parts).handle_for_replica_client(server, state).await
}

fn response(result: Result<CommandResult, CommandError>) -> String {
    match result {
        Ok(CommandResult::Response(response)) => response,
        other => panic!("expected a response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_set_and_get() {
    let server = master_server();

    assert_eq!(response(exec_master(&server, &["SET", "hello", "world"]).await), "+OK\r\n");
    assert_eq!(
        response(exec_master(&server, &["GET", "hello"]).await),
        "$5\r\nworld\r\n"
    );
    assert_eq!(response(exec_master(&server, &["GET", "missing"]).await), "$-1\r\n");
}

#[tokio::test]
async fn test_hset_behaves_as_set() {
    let server = master_server();

    assert_eq!(response(exec_master(&server, &["HSET", "h", "v"]).await), "+OK\r\n");
    assert_eq!(response(exec_master(&server, &["GET", "h"]).await), "$1\r\nv\r\n");
}

#[tokio::test]
async fn test_list_push_and_range() {
    let server = master_server();

    assert_eq!(
        response(exec_master(&server, &["RPUSH", "L", "a", "b", "c"]).await),
        ":3\r\n"
    );
    assert_eq!(
        response(exec_master(&server, &["LRANGE", "L", "0", "-1"]).await),
        "*3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n"
    );
    assert_eq!(
        response(exec_master(&server, &["LPUSH", "L", "x", "y"]).await),
        ":5\r\n"
    );
    assert_eq!(
        response(exec_master(&server, &["LRANGE", "L", "0", "-1"]).await),
        "*5\r\n$1\r\ny\r\n$1\r\nx\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n"
    );
    assert_eq!(
        response(exec_master(&server, &["LRANGE", "L", "-1", "-1"]).await),
        "*1\r\n$1\r\nc\r\n"
    );
}

#[tokio::test]
async fn test_type_errors() {
    let server = master_server();
    exec_master(&server, &["SET", "k", "v"]).await.unwrap();

    let result = exec_master(&server, &["LPUSH", "k", "z"]).await;
    assert_eq!(result, Err(CommandError::WrongType));
    assert_eq!(
        result.unwrap_err().as_string(),
        "-WRONGTYPE Operation against a key holding the wrong kind of value\r\n"
    );
}

#[tokio::test]
async fn test_incr_and_decr() {
    let server = master_server();

    let test_cases = vec![
        (vec!["INCR", "fresh"], Ok(":1\r\n".to_string())),
        (vec!["DECR", "negative"], Ok(":-1\r\n".to_string())),
        (vec!["SET", "minus", "-1"], Ok("+OK\r\n".to_string())),
        (vec!["INCR", "minus"], Ok(":0\r\n".to_string())),
        (vec!["SET", "word", "abc"], Ok("+OK\r\n".to_string())),
    ];

    for (parts, expected) in test_cases {
        let result = exec_master(&server, &parts).await.map(|r| match r {
            CommandResult::Response(response) => response,
            other => panic!("expected a response, got {:?}", other),
        });
        assert_eq!(result, expected, "executing {:?}", parts);
    }

    let result = exec_master(&server, &["INCR", "word"]).await;
    assert_eq!(result, Err(CommandError::NotAnInteger));
    assert_eq!(
        result.unwrap_err().as_string(),
        "-ERR value is not an integer or out of range\r\n"
    );
}

#[tokio::test]
async fn test_exists_counts_duplicates_and_del_counts_removals() {
    let server = master_server();
    exec_master(&server, &["SET", "a", "1"]).await.unwrap();
    exec_master(&server, &["RPUSH", "l", "x"]).await.unwrap();

    assert_eq!(
        response(exec_master(&server, &["EXISTS", "a", "a", "missing"]).await),
        ":2\r\n"
    );
    assert_eq!(
        response(exec_master(&server, &["DEL", "a", "l", "missing", "a"]).await),
        ":2\r\n"
    );
}

#[tokio::test]
async fn test_arity_and_unknown_command_errors() {
    let server = master_server();

    let test_cases = vec![
        (
            vec!["GET"],
            "-ERR wrong number of arguments for 'GET' command\r\n",
        ),
        (
            vec!["SET", "only-key"],
            "-ERR wrong number of arguments for 'SET' command\r\n",
        ),
        (
            vec!["LPUSH", "key"],
            "-ERR wrong number of arguments for 'LPUSH' command\r\n",
        ),
        (
            vec!["LRANGE", "key", "0"],
            "-ERR wrong number of arguments for 'LRANGE' command\r\n",
        ),
        (vec!["FLUSHALL"], "-ERR unknown command 'FLUSHALL'\r\n"),
    ];

    for (parts, expected) in test_cases {
        let error = exec_master(&server, &parts).await.unwrap_err();
        assert_eq!(error.as_string(), expected, "executing {:?}", parts);
    }
}

#[tokio::test]
async fn test_replication_offset_counts_canonical_write_bytes() {
    let server = master_server();
    let RoleState::Master(master) = &server.role else {
        panic!("expected a master server");
    };

    // Reads leave the offset untouched.
    exec_master(&server, &["GET", "missing"]).await.unwrap();
    assert_eq!(master.replication_offset().await, 0);

    // *3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n is 27 bytes.
    exec_master(&server, &["SET", "a", "1"]).await.unwrap();
    assert_eq!(master.replication_offset().await, 27);

    exec_master(&server, &["SET", "b", "2"]).await.unwrap();
    assert_eq!(master.replication_offset().await, 54);

    // *2\r\n$4\r\nINCR\r\n$1\r\na\r\n is 21 bytes.
    exec_master(&server, &["INCR", "a"]).await.unwrap();
    assert_eq!(master.replication_offset().await, 75);

    // A failed write propagates nothing.
    exec_master(&server, &["SET", "word", "abc"]).await.unwrap();
    let offset_before = master.replication_offset().await;
    assert!(exec_master(&server, &["INCR", "word"]).await.is_err());
    assert_eq!(master.replication_offset().await, offset_before);
}

#[tokio::test]
async fn test_psync_resync_decisions() {
    let server = master_server();
    let RoleState::Master(master) = &server.role else {
        panic!("expected a master server");
    };
    let run_id = master.run_id.clone();

    // A fresh replica always gets a full resync.
    match exec_master(&server, &["PSYNC", "?", "0"]).await.unwrap() {
        CommandResult::FullResync { header } => {
            assert_eq!(header, format!("+FULLRESYNC {} 0\r\n", run_id));
        }
        other => panic!("expected a full resync, got {:?}", other),
    }

    exec_master(&server, &["SET", "a", "1"]).await.unwrap();
    let offset = master.replication_offset().await;

    // Exactly caught up with the right replid: partial resync.
    match exec_master(&server, &["PSYNC", &run_id, &offset.to_string()])
        .await
        .unwrap()
    {
        CommandResult::PartialResync { header, ack_offset } => {
            assert_eq!(header, format!("+CONTINUE {}\r\n", run_id));
            assert_eq!(ack_offset, offset);
        }
        other => panic!("expected a partial resync, got {:?}", other),
    }

    // Any gap, a foreign replid, or an offset from the future: full resync.
    let full_resync_cases = vec![
        vec!["PSYNC".to_string(), run_id.clone(), "0".to_string()],
        vec![
            "PSYNC".to_string(),
            "0123456789abcdef0123456789abcdef01234567".to_string(),
            offset.to_string(),
        ],
        vec!["PSYNC".to_string(), run_id.clone(), (offset + 100).to_string()],
    ];

    for parts in full_resync_cases {
        let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
        match exec_master(&server, &parts).await.unwrap() {
            CommandResult::FullResync { .. } => (),
            other => panic!("expected a full resync for {:?}, got {:?}", parts, other),
        }
    }
}

#[tokio::test]
async fn test_wait_with_no_replicas() {
    let server = master_server();

    assert_eq!(response(exec_master(&server, &["WAIT", "0", "0"]).await), ":0\r\n");

    let started = std::time::Instant::now();
    assert_eq!(
        response(exec_master(&server, &["WAIT", "1", "150"]).await),
        ":0\r\n"
    );
    // The full timeout is honoured, not a 100 ms cap.
    assert!(started.elapsed() >= std::time::Duration::from_millis(140));
}

#[tokio::test]
async fn test_info_reports_master_replication_section() {
    let server = master_server();
    let document = response(exec_master(&server, &["INFO", "replication"]).await);

    assert!(document.contains("role:master"));
    assert!(document.contains("master_replid:"));
    assert!(document.contains("master_repl_offset:0"));
    assert!(document.contains("connected_slaves:0"));
}

#[tokio::test]
async fn test_replica_serves_reads_and_rejects_writes() {
    let server = replica_server();
    server.keyspace.set("a".to_string(), "1".to_string());
    server
        .keyspace
        .push("l", &["x".to_string(), "y".to_string()], false)
        .unwrap();

    assert_eq!(response(exec_replica(&server, &["PING"]).await), "+PONG\r\n");
    assert_eq!(response(exec_replica(&server, &["GET", "a"]).await), "$1\r\n1\r\n");
    assert_eq!(
        response(exec_replica(&server, &["LRANGE", "l", "0", "-1"]).await),
        "*2\r\n$1\r\nx\r\n$1\r\ny\r\n"
    );
    assert_eq!(
        response(exec_replica(&server, &["EXISTS", "a", "l"]).await),
        ":2\r\n"
    );

    for write in [
        vec!["SET", "a", "2"],
        vec!["DEL", "a"],
        vec!["INCR", "a"],
        vec!["DECR", "a"],
        vec!["LPUSH", "l", "z"],
        vec!["RPUSH", "l", "z"],
        vec!["HSET", "a", "2"],
    ] {
        let error = exec_replica(&server, &write).await.unwrap_err();
        assert_eq!(error, CommandError::ReadOnly, "executing {:?}", write);
        assert_eq!(
            error.as_string(),
            "-READONLY You can't write against a read only replica.\r\n"
        );
    }
}

#[tokio::test]
async fn test_replica_answers_getack_with_applied_offset() {
    let server = replica_server();

    assert_eq!(
        response(exec_replica(&server, &["REPLCONF", "GETACK", "*"]).await),
        "*3\r\n$8\r\nREPLCONF\r\n$3\r\nACK\r\n$1\r\n0\r\n"
    );

    // A client-issued GETACK reports the offset without advancing it.
    let RoleState::Replica(state) = &server.role else {
        panic!("expected a replica server");
    };
    assert_eq!(state.applied_offset().await, 0);
}

#[tokio::test]
async fn test_replica_denies_psync() {
    let server = replica_server();

    let error = exec_replica(&server, &["PSYNC", "?", "0"]).await.unwrap_err();
    assert!(error.as_string().starts_with("-ERR Can't PSYNC with a replica"));
}
