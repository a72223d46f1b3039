use std::collections::HashMap;
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::vectordb::dql::{Dql, Predicate, ResultSet};
use crate::vectordb::engine::{Engine, EngineError};
use crate::vectordb::entity::{EntityDef, IndexDef, Row};
use crate::vectordb::protocol::{encode_request, read_response, Reply, Request, Response, Status};
use crate::vectordb::types::Cell;

/// Carries one request to an engine and brings back its reply.
pub trait Transport: Send + Sync {
    fn call(&self, request: Request) -> Result<Reply>;

    fn describe(&self) -> String;
}

fn failure(status: Status, message: String) -> Error {
    match status {
        Status::Invalid => Error::Unsupported(message),
        _ => Error::Rpc(message),
    }
}

/// Blocking TCP transport. The connection is opened lazily and dropped after
/// any I/O failure so the next call reconnects.
pub struct TcpTransport {
    addr: String,
    timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpTransport {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            timeout,
            stream: Mutex::new(None),
        }
    }

    fn connect(&self) -> std::io::Result<TcpStream> {
        let mut last = None;
        for addr in self.addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    stream.set_nodelay(true)?;
                    debug!(addr = %addr, "connected to vectordb");
                    return Ok(stream);
                }
                Err(e) => last = Some(e),
            }
        }
        Err(last.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("'{}' did not resolve", self.addr))
        }))
    }

    fn exchange(&self, frame: &[u8]) -> std::io::Result<Response> {
        let mut slot = self.stream.lock();
        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => self.connect()?,
        };
        let response = send(&mut stream, frame)?;
        *slot = Some(stream);
        Ok(response)
    }
}

fn send(stream: &mut TcpStream, frame: &[u8]) -> std::io::Result<Response> {
    stream.write_all(frame)?;
    stream.flush()?;
    read_response(stream)
}

impl Transport for TcpTransport {
    fn call(&self, request: Request) -> Result<Reply> {
        let frame = encode_request(&request).map_err(|e| Error::Rpc(e.to_string()))?;
        match self.exchange(&frame) {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err((status, message))) => Err(failure(status, message)),
            Err(e) => Err(Error::Rpc(format!("{}: {e}", self.addr))),
        }
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

fn open_engines() -> &'static Mutex<HashMap<PathBuf, Weak<Engine>>> {
    static ENGINES: OnceLock<Mutex<HashMap<PathBuf, Weak<Engine>>>> = OnceLock::new();
    ENGINES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// In-process transport. Every transport on the same directory shares one engine.
pub struct LocalTransport {
    engine: Arc<Engine>,
}

impl LocalTransport {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let key = path.canonicalize()?;
        let mut engines = open_engines().lock();
        if let Some(engine) = engines.get(&key).and_then(Weak::upgrade) {
            return Ok(Self { engine });
        }
        let engine = Arc::new(Engine::open(&key, true).map_err(|e| Error::Rpc(e.to_string()))?);
        engines.retain(|_, e| e.strong_count() > 0);
        engines.insert(key, Arc::downgrade(&engine));
        Ok(Self { engine })
    }

    pub fn with_engine(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}

impl Transport for LocalTransport {
    fn call(&self, request: Request) -> Result<Reply> {
        self.engine
            .execute(request)
            .map_err(|e: EngineError| failure(Status::of(&e), e.to_string()))
    }

    fn describe(&self) -> String {
        format!("local://{}", self.engine.root().display())
    }
}

/// Typed requests over a [`Transport`].
#[derive(Clone)]
pub struct EngineClient {
    transport: Arc<dyn Transport>,
}

fn unexpected(reply: Reply) -> Error {
    warn!(?reply, "unexpected reply");
    Error::Rpc(format!("unexpected reply {reply:?}"))
}

impl EngineClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    fn flag(&self, request: Request) -> Result<bool> {
        match self.transport.call(request)? {
            Reply::Flag(flag) => Ok(flag),
            other => Err(unexpected(other)),
        }
    }

    fn count_of(&self, request: Request) -> Result<u64> {
        match self.transport.call(request)? {
            Reply::Count(count) => Ok(count),
            other => Err(unexpected(other)),
        }
    }

    fn done(&self, request: Request) -> Result<()> {
        match self.transport.call(request)? {
            Reply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub fn ping(&self) -> Result<()> {
        self.done(Request::Ping)
    }

    pub fn create_entity(&self, def: EntityDef) -> Result<bool> {
        self.flag(Request::CreateEntity(def))
    }

    pub fn drop_entity(&self, name: &str) -> Result<bool> {
        self.flag(Request::DropEntity(name.to_string()))
    }

    pub fn has_entity(&self, name: &str) -> Result<bool> {
        self.flag(Request::HasEntity(name.to_string()))
    }

    pub fn list_entities(&self) -> Result<Vec<String>> {
        match self.transport.call(Request::ListEntities)? {
            Reply::Names(names) => Ok(names),
            other => Err(unexpected(other)),
        }
    }

    pub fn truncate(&self, name: &str) -> Result<()> {
        self.done(Request::Truncate(name.to_string()))
    }

    pub fn create_index(&self, entity: &str, index: IndexDef) -> Result<bool> {
        self.flag(Request::CreateIndex {
            entity: entity.to_string(),
            index,
        })
    }

    pub fn insert(&self, entity: &str, rows: Vec<Row>) -> Result<u64> {
        self.count_of(Request::Insert {
            entity: entity.to_string(),
            rows,
        })
    }

    pub fn update(&self, entity: &str, filter: Predicate, assignments: Vec<(String, Option<Cell>)>) -> Result<u64> {
        self.count_of(Request::Update {
            entity: entity.to_string(),
            filter: Some(filter),
            assignments,
        })
    }

    pub fn delete(&self, entity: &str, filter: Predicate) -> Result<u64> {
        self.count_of(Request::Delete {
            entity: entity.to_string(),
            filter: Some(filter),
        })
    }

    pub fn count(&self, entity: &str) -> Result<u64> {
        self.count_of(Request::Count(entity.to_string()))
    }

    pub fn query(&self, dql: Dql) -> Result<ResultSet> {
        match self.transport.call(Request::Query(dql))? {
            Reply::Rows(rows) => Ok(rows),
            other => Err(unexpected(other)),
        }
    }

    pub fn compact(&self) -> Result<u64> {
        self.count_of(Request::Compact)
    }
}
