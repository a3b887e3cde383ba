//! RESP wire codec.
//!
//! Every message exchanged between clients, masters and replicas is framed
//! as one of five RESP types. Decoding is incremental: the decoder consumes
//! a contiguous byte buffer and either yields one fully parsed value plus
//! the number of bytes it occupied, signals that more bytes are needed, or
//! reports the frame as malformed. It never partially consumes the caller's
//! buffer.

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RespError {
    #[error("invalid UTF-8 sequence")]
    InvalidUtf8,
    #[error("unknown RESP type prefix")]
    UnknownPrefix,
    #[error("failed to parse integer")]
    InvalidInteger,
    #[error("invalid bulk string length")]
    InvalidBulkLength,
    #[error("invalid array length")]
    InvalidArrayLength,
    #[error("frame not terminated with CRLF")]
    MissingTerminator,
}

#[derive(Debug, PartialEq, Clone)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(String),
    Null,
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Decodes one value from the front of `buffer`.
    ///
    /// Returns `Ok(Some((value, consumed)))` when a complete frame is
    /// available, `Ok(None)` when the buffer holds only a prefix of a frame
    /// (append more bytes and retry), or `Err` when the framing is
    /// malformed and the connection's framing state must be reset.
    pub fn decode(buffer: &[u8]) -> Result<Option<(RespValue, usize)>, RespError> {
        decode_at(buffer, 0)
    }

    pub fn encode(&self) -> String {
        match self {
            RespValue::SimpleString(content) => format!("+{}\r\n", content),
            RespValue::Error(content) => format!("-{}\r\n", content),
            RespValue::Integer(value) => format!(":{}\r\n", value),
            RespValue::BulkString(content) => {
                format!("${}\r\n{}\r\n", content.len(), content)
            }
            RespValue::Null => "$-1\r\n".to_string(),
            RespValue::Array(elements) => {
                let mut encoded = format!("*{}\r\n", elements.len());
                for element in elements {
                    encoded.push_str(&element.encode());
                }
                encoded
            }
        }
    }

    /// Encodes a command as an array of bulk strings.
    ///
    /// This is the canonical form used for handshake messages and for
    /// propagating writes to replicas; the replication offset advances by
    /// the byte length of exactly this encoding.
    pub fn command(args: &[&str]) -> String {
        let mut encoded = format!("*{}\r\n", args.len());
        for arg in args {
            encoded.push_str(&format!("${}\r\n{}\r\n", arg.len(), arg));
        }
        encoded
    }

    pub fn encode_array_from_strings(items: &[String]) -> String {
        let mut encoded = format!("*{}\r\n", items.len());
        for item in items {
            encoded.push_str(&format!("${}\r\n{}\r\n", item.len(), item));
        }
        encoded
    }
}

/// Reads one CRLF-terminated line starting at `pos`.
///
/// Returns `Ok(None)` when no CRLF has arrived yet.
fn read_line(buffer: &[u8], pos: usize) -> Result<Option<(&str, usize)>, RespError> {
    let Some(offset) = buffer[pos..].windows(2).position(|window| window == b"\r\n") else {
        return Ok(None);
    };

    let line =
        std::str::from_utf8(&buffer[pos..pos + offset]).map_err(|_| RespError::InvalidUtf8)?;

    Ok(Some((line, pos + offset + 2)))
}

fn decode_at(buffer: &[u8], pos: usize) -> Result<Option<(RespValue, usize)>, RespError> {
    let Some(&prefix) = buffer.get(pos) else {
        return Ok(None);
    };
    let pos = pos + 1;

    match prefix {
        b'+' => {
            let Some((line, next)) = read_line(buffer, pos)? else {
                return Ok(None);
            };
            Ok(Some((RespValue::SimpleString(line.to_string()), next)))
        }
        b'-' => {
            let Some((line, next)) = read_line(buffer, pos)? else {
                return Ok(None);
            };
            Ok(Some((RespValue::Error(line.to_string()), next)))
        }
        b':' => {
            let Some((line, next)) = read_line(buffer, pos)? else {
                return Ok(None);
            };
            let value = line.parse::<i64>().map_err(|_| RespError::InvalidInteger)?;
            Ok(Some((RespValue::Integer(value), next)))
        }
        b'$' => {
            let Some((line, next)) = read_line(buffer, pos)? else {
                return Ok(None);
            };
            let declared = line.parse::<i64>().map_err(|_| RespError::InvalidBulkLength)?;

            if declared == -1 {
                return Ok(Some((RespValue::Null, next)));
            }

            let length = usize::try_from(declared).map_err(|_| RespError::InvalidBulkLength)?;

            if buffer.len() < next + length + 2 {
                return Ok(None);
            }

            if &buffer[next + length..next + length + 2] != b"\r\n" {
                return Err(RespError::MissingTerminator);
            }

            let content = std::str::from_utf8(&buffer[next..next + length])
                .map_err(|_| RespError::InvalidUtf8)?;

            Ok(Some((
                RespValue::BulkString(content.to_string()),
                next + length + 2,
            )))
        }
        b'*' => {
            let Some((line, next)) = read_line(buffer, pos)? else {
                return Ok(None);
            };
            let count = line.parse::<i64>().map_err(|_| RespError::InvalidArrayLength)?;

            if count < 0 {
                return Err(RespError::InvalidArrayLength);
            }

            let mut elements = Vec::with_capacity(count as usize);
            let mut cursor = next;

            for _ in 0..count {
                let Some((element, end)) = decode_at(buffer, cursor)? else {
                    return Ok(None);
                };
                elements.push(element);
                cursor = end;
            }

            // An array is terminated by its final element's CRLF; it has no
            // trailing CRLF of its own.
            Ok(Some((RespValue::Array(elements), cursor)))
        }
        _ => Err(RespError::UnknownPrefix),
    }
}

#[cfg(test)]
mod tests {
    use super::{RespError, RespValue};

    #[test]
    fn test_decode_complete_frames() {
        let test_cases: Vec<(&[u8], RespValue)> = vec![
            (b"+PONG\r\n", RespValue::SimpleString("PONG".to_string())),
            (
                b"-ERR unknown command\r\n",
                RespValue::Error("ERR unknown command".to_string()),
            ),
            (b":42\r\n", RespValue::Integer(42)),
            (b":-3\r\n", RespValue::Integer(-3)),
            (b"$5\r\nhello\r\n", RespValue::BulkString("hello".to_string())),
            (b"$0\r\n\r\n", RespValue::BulkString(String::new())),
            (b"$-1\r\n", RespValue::Null),
            (
                b"*2\r\n$4\r\nPING\r\n$3\r\nhey\r\n",
                RespValue::Array(vec![
                    RespValue::BulkString("PING".to_string()),
                    RespValue::BulkString("hey".to_string()),
                ]),
            ),
            (
                b"*2\r\n*1\r\n$1\r\na\r\n:7\r\n",
                RespValue::Array(vec![
                    RespValue::Array(vec![RespValue::BulkString("a".to_string())]),
                    RespValue::Integer(7),
                ]),
            ),
            (b"*0\r\n", RespValue::Array(Vec::new())),
        ];

        for (input, expected) in test_cases {
            let decoded = RespValue::decode(input).unwrap();
            assert_eq!(
                decoded,
                Some((expected, input.len())),
                "decoding {}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn test_decode_needs_more_bytes_on_every_strict_prefix() {
        let frames: Vec<&[u8]> = vec![
            b"+PONG\r\n",
            b":1000\r\n",
            b"$5\r\nhello\r\n",
            b"*3\r\n$3\r\nSET\r\n$5\r\nhello\r\n$5\r\nworld\r\n",
        ];

        for frame in frames {
            for prefix_len in 0..frame.len() {
                let result = RespValue::decode(&frame[..prefix_len]);
                assert_eq!(
                    result,
                    Ok(None),
                    "prefix of length {} of {}",
                    prefix_len,
                    String::from_utf8_lossy(frame)
                );
            }
        }
    }

    #[test]
    fn test_decode_reports_trailing_bytes_as_unconsumed() {
        let input = b"+OK\r\n:1\r\n";
        let (value, consumed) = RespValue::decode(input).unwrap().unwrap();

        assert_eq!(value, RespValue::SimpleString("OK".to_string()));
        assert_eq!(consumed, 5);
        assert_eq!(
            RespValue::decode(&input[consumed..]).unwrap(),
            Some((RespValue::Integer(1), 4))
        );
    }

    #[test]
    fn test_decode_malformed_frames() {
        let test_cases: Vec<(&[u8], RespError)> = vec![
            (b"?what\r\n", RespError::UnknownPrefix),
            (b":twelve\r\n", RespError::InvalidInteger),
            (b"$abc\r\n", RespError::InvalidBulkLength),
            (b"$-2\r\n", RespError::InvalidBulkLength),
            (b"*-4\r\n", RespError::InvalidArrayLength),
            (b"$3\r\nabcd\r\n", RespError::MissingTerminator),
        ];

        for (input, expected) in test_cases {
            assert_eq!(
                RespValue::decode(input),
                Err(expected),
                "decoding {}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let values = vec![
            RespValue::SimpleString("OK".to_string()),
            RespValue::Integer(-100),
            RespValue::BulkString("some value".to_string()),
            RespValue::Null,
            RespValue::Array(vec![
                RespValue::BulkString("LRANGE".to_string()),
                RespValue::BulkString("list".to_string()),
                RespValue::BulkString("0".to_string()),
                RespValue::BulkString("-1".to_string()),
            ]),
        ];

        for value in values {
            let encoded = value.encode();
            let decoded = RespValue::decode(encoded.as_bytes()).unwrap();
            assert_eq!(decoded, Some((value, encoded.len())));
        }
    }

    #[test]
    fn test_command_encoding() {
        assert_eq!(
            RespValue::command(&["SET", "hello", "world"]),
            "*3\r\n$3\r\nSET\r\n$5\r\nhello\r\n$5\r\nworld\r\n"
        );
        assert_eq!(RespValue::command(&["PING"]), "*1\r\n$4\r\nPING\r\n");
    }
}
