//! Framing between the engine server and its clients.
//!
//! Request:  `[opcode u8][len u32 LE][json Request]`
//! Response: `[status u8][len u32 LE][json Reply | json error message]`

use std::io::{self, Read};

use serde::{Deserialize, Serialize};

use crate::vectordb::dql::{Dql, Predicate, ResultSet};
use crate::vectordb::engine::EngineError;
use crate::vectordb::entity::{EntityDef, IndexDef, Row};
use crate::vectordb::types::Cell;

/// Largest accepted frame body.
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

// --- OpCodes ---
const OP_PING: u8 = 0x01;
const OP_CREATE_ENTITY: u8 = 0x02;
const OP_DROP_ENTITY: u8 = 0x03;
const OP_HAS_ENTITY: u8 = 0x04;
const OP_LIST_ENTITIES: u8 = 0x05;
const OP_TRUNCATE: u8 = 0x06;
const OP_CREATE_INDEX: u8 = 0x07;
const OP_INSERT: u8 = 0x10;
const OP_UPDATE: u8 = 0x11;
const OP_DELETE: u8 = 0x12;
const OP_COUNT: u8 = 0x20;
const OP_QUERY: u8 = 0x21;
const OP_COMPACT: u8 = 0x30;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Request {
    Ping,
    CreateEntity(EntityDef),
    DropEntity(String),
    HasEntity(String),
    ListEntities,
    Truncate(String),
    CreateIndex {
        entity: String,
        index: IndexDef,
    },
    Insert {
        entity: String,
        rows: Vec<Row>,
    },
    Update {
        entity: String,
        filter: Option<Predicate>,
        assignments: Vec<(String, Option<Cell>)>,
    },
    Delete {
        entity: String,
        filter: Option<Predicate>,
    },
    Count(String),
    Query(Dql),
    Compact,
}

impl Request {
    pub fn opcode(&self) -> u8 {
        match self {
            Request::Ping => OP_PING,
            Request::CreateEntity(_) => OP_CREATE_ENTITY,
            Request::DropEntity(_) => OP_DROP_ENTITY,
            Request::HasEntity(_) => OP_HAS_ENTITY,
            Request::ListEntities => OP_LIST_ENTITIES,
            Request::Truncate(_) => OP_TRUNCATE,
            Request::CreateIndex { .. } => OP_CREATE_INDEX,
            Request::Insert { .. } => OP_INSERT,
            Request::Update { .. } => OP_UPDATE,
            Request::Delete { .. } => OP_DELETE,
            Request::Count(_) => OP_COUNT,
            Request::Query(_) => OP_QUERY,
            Request::Compact => OP_COMPACT,
        }
    }

    /// Whether the request changes stored state.
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            Request::Ping | Request::HasEntity(_) | Request::ListEntities | Request::Count(_) | Request::Query(_)
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Reply {
    Done,
    Flag(bool),
    Count(u64),
    Names(Vec<String>),
    Rows(ResultSet),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// The engine could not carry out a well-formed request.
    Failed,
    /// The request itself is malformed or does not fit the catalog.
    Invalid,
}

impl Status {
    pub fn code(&self) -> u8 {
        match self {
            Status::Ok => 0,
            Status::Failed => 1,
            Status::Invalid => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Status> {
        match code {
            0 => Some(Status::Ok),
            1 => Some(Status::Failed),
            2 => Some(Status::Invalid),
            _ => None,
        }
    }

    pub fn of(error: &EngineError) -> Status {
        match error {
            EngineError::Invalid(_) => Status::Invalid,
            _ => Status::Failed,
        }
    }
}

fn frame(head: u8, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + body.len());
    frame.push(head);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(body);
    frame
}

pub fn encode_request(request: &Request) -> io::Result<Vec<u8>> {
    let body = serde_json::to_vec(request)?;
    if body.len() > MAX_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("request of {} bytes exceeds the {MAX_FRAME} byte frame limit", body.len()),
        ));
    }
    Ok(frame(request.opcode(), &body))
}

/// Decodes a request body and checks it against the frame's opcode.
pub fn decode_request(opcode: u8, body: &[u8]) -> Result<Request, String> {
    let request: Request = serde_json::from_slice(body).map_err(|e| format!("malformed request: {e}"))?;
    if request.opcode() != opcode {
        return Err(format!(
            "opcode 0x{opcode:02X} does not match request body (0x{:02X})",
            request.opcode()
        ));
    }
    Ok(request)
}

pub fn encode_failure(status: Status, message: &str) -> Vec<u8> {
    let body = serde_json::to_vec(message).unwrap_or_default();
    frame(status.code(), &body)
}

pub fn encode_response(result: &Result<Reply, EngineError>) -> Vec<u8> {
    match result {
        Ok(reply) => match serde_json::to_vec(reply) {
            Ok(body) => frame(Status::Ok.code(), &body),
            Err(e) => encode_failure(Status::Failed, &format!("unencodable reply: {e}")),
        },
        Err(e) => encode_failure(Status::of(e), &e.to_string()),
    }
}

pub type Response = Result<Reply, (Status, String)>;

/// Reads one response frame.
pub fn read_response(reader: &mut impl Read) -> io::Result<Response> {
    let mut head = [0u8; 5];
    reader.read_exact(&mut head)?;
    let status = Status::from_code(head[0])
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("unknown status 0x{:02X}", head[0])))?;
    let mut len_buf = [0u8; 4];
    len_buf.copy_from_slice(&head[1..]);
    let length = u32::from_le_bytes(len_buf) as usize;
    if length > MAX_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("response of {length} bytes exceeds the frame limit"),
        ));
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;

    Ok(match status {
        Status::Ok => Ok(serde_json::from_slice(&body)?),
        failure => Err((failure, serde_json::from_slice(&body)?)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_request_frame_layout() {
        let request = Request::Count("media.retrievable".into());
        let bytes = encode_request(&request).unwrap();
        assert_eq!(bytes[0], OP_COUNT);
        let len = u32::from_le_bytes(bytes[1..5].try_into().unwrap()) as usize;
        assert_eq!(len, bytes.len() - 5);
        assert_eq!(decode_request(OP_COUNT, &bytes[5..]).unwrap(), request);
        assert!(decode_request(OP_QUERY, &bytes[5..]).is_err());
        assert!(decode_request(OP_COUNT, b"{not json").is_err());
    }

    #[test]
    fn test_response_statuses() {
        let ok = encode_response(&Ok(Reply::Count(3)));
        assert_eq!(read_response(&mut Cursor::new(ok)).unwrap(), Ok(Reply::Count(3)));

        let invalid = encode_response(&Err(EngineError::Invalid("bad column".into())));
        let (status, message) = read_response(&mut Cursor::new(invalid)).unwrap().unwrap_err();
        assert_eq!(status, Status::Invalid);
        assert!(message.contains("bad column"));

        let failed = encode_response(&Err(EngineError::NoSuchEntity("x".into())));
        assert_eq!(read_response(&mut Cursor::new(failed)).unwrap().unwrap_err().0, Status::Failed);
    }

    #[test]
    fn test_truncated_response_is_an_error() {
        let mut ok = encode_response(&Ok(Reply::Names(vec!["a".into(), "b".into()])));
        ok.truncate(ok.len() - 2);
        assert!(read_response(&mut Cursor::new(ok)).is_err());
    }

    #[test]
    fn test_writes_are_classified() {
        assert!(Request::Compact.is_write());
        assert!(!Request::Ping.is_write());
        assert!(Request::Truncate("e".into()).is_write());
    }
}
