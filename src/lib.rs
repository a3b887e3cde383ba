//! An in-memory key/value store with primary/replica replication.
//!
//! This crate provides a RESP-speaking TCP server that supports:
//!
//! - String operations (GET, SET, INCR, DECR, EXISTS, DEL)
//! - List operations (LPUSH, RPUSH, LRANGE)
//! - Per-key expiration with lazy purging
//! - Binary snapshot persistence (`dump.rdb`)
//! - Master-replica replication (PSYNC full/partial resync, write
//!   propagation, WAIT, INFO replication)
//! - Read-only client service on replicas
//!
//! The server uses the Redis Serialization Protocol (RESP) for all wire
//! traffic and handles concurrent connections through async/await with
//! Tokio.

pub mod commands;
pub mod connection;
pub mod keyspace;
pub mod rdb;
pub mod replication;
pub mod resp;
pub mod server;
