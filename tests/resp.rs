use bytes::{Buf, BytesMut};
use rudis::resp::RespValue;

#[test]
fn test_decode_frames_arriving_in_chunks() {
    // A connection buffer accumulates bytes across reads; the decoder must
    // report NeedMore until the frame completes, then consume exactly it.
    let frame = b"*3\r\n$3\r\nSET\r\n$5\r\nhello\r\n$5\r\nworld\r\n";
    let mut buffer = BytesMut::new();

    for chunk in frame.chunks(7) {
        buffer.extend_from_slice(chunk);

        if buffer.len() < frame.len() {
            assert_eq!(RespValue::decode(&buffer[..]).unwrap(), None);
        }
    }

    let (value, consumed) = RespValue::decode(&buffer[..]).unwrap().unwrap();
    buffer.advance(consumed);

    assert_eq!(
        value,
        RespValue::Array(vec![
            RespValue::BulkString("SET".to_string()),
            RespValue::BulkString("hello".to_string()),
            RespValue::BulkString("world".to_string()),
        ])
    );
    assert!(buffer.is_empty());
}

#[test]
fn test_decode_multiple_pipelined_frames() {
    let mut buffer = BytesMut::from(
        &b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n+OK\r\n"[..],
    );
    let mut frames = Vec::new();

    while let Some((value, consumed)) = RespValue::decode(&buffer[..]).unwrap() {
        buffer.advance(consumed);
        frames.push(value);
    }

    assert_eq!(
        frames,
        vec![
            RespValue::Array(vec![RespValue::BulkString("PING".to_string())]),
            RespValue::Array(vec![
                RespValue::BulkString("GET".to_string()),
                RespValue::BulkString("k".to_string()),
            ]),
            RespValue::SimpleString("OK".to_string()),
        ]
    );
    assert!(buffer.is_empty());
}

#[test]
fn test_array_consumes_no_trailing_crlf() {
    // An array ends with its last element's CRLF; the two extra bytes here
    // belong to the next frame.
    let buffer = b"*1\r\n$1\r\na\r\n\r\n";
    let (value, consumed) = RespValue::decode(buffer).unwrap().unwrap();

    assert_eq!(
        value,
        RespValue::Array(vec![RespValue::BulkString("a".to_string())])
    );
    assert_eq!(consumed, buffer.len() - 2);
}

#[test]
fn test_null_bulk_string() {
    let (value, consumed) = RespValue::decode(b"$-1\r\n").unwrap().unwrap();
    assert_eq!(value, RespValue::Null);
    assert_eq!(consumed, 5);
    assert_eq!(RespValue::Null.encode(), "$-1\r\n");
}

#[test]
fn test_encoded_command_length_matches_consumed_length() {
    // The replication offset advances by the canonical encoding's byte
    // length, which must agree with what the decoder consumes.
    let test_cases = vec![
        vec!["SET", "a", "1"],
        vec!["INCR", "a"],
        vec!["DEL", "a", "b", "c"],
        vec!["RPUSH", "list", "value-with-longer-content"],
    ];

    for parts in test_cases {
        let encoded = RespValue::command(&parts);
        let (_, consumed) = RespValue::decode(encoded.as_bytes()).unwrap().unwrap();
        assert_eq!(consumed, encoded.len(), "encoding {:?}", parts);
    }
}
