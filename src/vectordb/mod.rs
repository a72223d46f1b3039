//! Embedded vector engine and the backend that talks to it.
//!
//! The engine keeps one append-only segment per entity, replays it on open and
//! answers exact kNN, filtered scans and indexed full-text matches. It can run
//! in-process (`path` parameter) or behind the TCP server (`host`/`port`).
//!
//! Entities per schema: `<schema>.retrievable`, `<schema>.relationships` and
//! `<schema>.descriptor_<field>`. There are no transactions and no foreign keys.

pub mod client;
pub mod descriptor;
pub mod dql;
pub mod engine;
pub mod entity;
pub mod filter;
pub mod fulltext;
pub mod mapping;
pub mod protocol;
pub mod retrievable;
pub mod server;
pub mod storage;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::database::registry::default_kinds;
use crate::database::{
    Connection, ConnectionCore, ConnectionProvider, DescriptorInitializer, DescriptorReader, DescriptorWriter,
    ProviderRegistry, RetrievableInitializer, RetrievableReader, RetrievableWriter, Transaction, Unsupported,
};
use crate::descriptor::DescriptorKind;
use crate::error::Result;
use crate::parameters::Parameters;
use crate::schema::Field;

pub use client::{EngineClient, LocalTransport, TcpTransport, Transport};
pub use descriptor::VectorDbDescriptorProvider;
pub use engine::{Engine, EngineError};
pub use retrievable::VectorDbRetrievables;
pub use server::EngineServer;

pub const HOST_PARAMETER: &str = "host";
pub const PORT_PARAMETER: &str = "port";
pub const TIMEOUT_PARAMETER: &str = "timeout_ms";
pub const PATH_PARAMETER: &str = "path";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 1865;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Client and schema shared by every reader and writer of one connection.
pub struct VectorDbStore {
    client: EngineClient,
    schema: String,
    retrievables: Arc<VectorDbRetrievables>,
}

impl VectorDbStore {
    pub fn new(client: EngineClient, schema: impl Into<String>) -> Self {
        let schema = schema.into();
        let retrievables = Arc::new(VectorDbRetrievables::new(client.clone(), &schema));
        Self {
            client,
            schema,
            retrievables,
        }
    }

    pub fn client(&self) -> &EngineClient {
        &self.client
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn retrievables(&self) -> &Arc<VectorDbRetrievables> {
        &self.retrievables
    }
}

pub struct VectorDbConnectionProvider {
    registry: Arc<ProviderRegistry<VectorDbStore>>,
}

impl VectorDbConnectionProvider {
    pub fn new() -> Self {
        Self::with_kinds(default_kinds())
    }

    /// A provider serving exactly `kinds`, all through the stock descriptor provider.
    pub fn with_kinds(kinds: impl IntoIterator<Item = DescriptorKind>) -> Self {
        let registry = ProviderRegistry::builder()
            .register_all(kinds, Arc::new(VectorDbDescriptorProvider))
            .build();
        Self::with_registry(registry)
    }

    pub fn with_registry(registry: ProviderRegistry<VectorDbStore>) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    fn transport(parameters: &Parameters) -> Result<Arc<dyn Transport>> {
        if let Some(path) = parameters.get(PATH_PARAMETER) {
            return Ok(Arc::new(LocalTransport::open(&PathBuf::from(path))?));
        }
        let host = parameters.get_or(HOST_PARAMETER, DEFAULT_HOST);
        let port = parameters.parse_or(PORT_PARAMETER, DEFAULT_PORT)?;
        let timeout = Duration::from_millis(parameters.parse_or(TIMEOUT_PARAMETER, DEFAULT_TIMEOUT_MS)?);
        Ok(Arc::new(TcpTransport::new(host, port, timeout)))
    }
}

impl Default for VectorDbConnectionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionProvider for VectorDbConnectionProvider {
    fn database_name(&self) -> &'static str {
        "vectordb"
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn supports(&self, kind: &DescriptorKind) -> bool {
        self.registry.supports(kind)
    }

    fn open(&self, schema_name: &str, parameters: &Parameters) -> Result<Arc<dyn Connection>> {
        let client = EngineClient::new(Self::transport(parameters)?);
        client.ping()?;
        info!(engine = %client.describe(), schema = schema_name, "opened vectordb connection");
        let store = Arc::new(VectorDbStore::new(client, schema_name));
        Ok(Arc::new(VectorDbConnection {
            core: ConnectionCore::new(store, self.registry.clone()),
            schema: schema_name.to_string(),
        }))
    }
}

pub struct VectorDbConnection {
    core: ConnectionCore<VectorDbStore>,
    schema: String,
}

impl VectorDbConnection {
    pub fn store(&self) -> &Arc<VectorDbStore> {
        self.core.context()
    }
}

impl Connection for VectorDbConnection {
    fn database_name(&self) -> &'static str {
        "vectordb"
    }

    fn schema_name(&self) -> &str {
        &self.schema
    }

    fn description(&self) -> String {
        format!("vectordb at {}", self.store().client().describe())
    }

    fn descriptor_initializer(&self, field: &Arc<Field>) -> Result<Arc<dyn DescriptorInitializer>> {
        self.core.initializer(field)
    }

    fn descriptor_reader(&self, field: &Arc<Field>) -> Result<Arc<dyn DescriptorReader>> {
        self.core.reader(field)
    }

    fn descriptor_writer(&self, field: &Arc<Field>) -> Result<Arc<dyn DescriptorWriter>> {
        self.core.writer(field)
    }

    fn retrievable_initializer(&self) -> Arc<dyn RetrievableInitializer> {
        self.store().retrievables().clone()
    }

    fn retrievable_reader(&self) -> Arc<dyn RetrievableReader> {
        self.store().retrievables().clone()
    }

    fn retrievable_writer(&self) -> Arc<dyn RetrievableWriter> {
        self.store().retrievables().clone()
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        Ok(Unsupported::begin("vectordb"))
    }
}
