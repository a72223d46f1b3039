//! PostgreSQL backend using the `pgvector` extension.
//!
//! Each schema becomes a database schema holding `retrievable`, `relationships`
//! and one `descriptor_<field>` table per field. Float vectors live in `vector(n)`
//! columns, boolean vectors in `bit(n)`; nearest-neighbour search, filters and
//! full-text ranking all run inside the database. Descriptors and relationships
//! reference their retrievables and are removed with them.

pub mod descriptor;
pub mod mapping;
pub mod retrievable;
pub mod session;
pub mod sql;
pub mod tls;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio_postgres::error::SqlState;
use tracing::info;
use uuid::Uuid;

use crate::database::registry::default_kinds;
use crate::database::{
    Connection, ConnectionCore, ConnectionProvider, DescriptorInitializer, DescriptorReader, DescriptorWriter,
    ProviderRegistry, ResultStream, RetrievableInitializer, RetrievableReader, RetrievableWriter, Transaction,
};
use crate::descriptor::DescriptorKind;
use crate::error::{Error, Result};
use crate::parameters::Parameters;
use crate::schema::Field;

pub use descriptor::PgDescriptorProvider;
pub use retrievable::PgRetrievables;
pub use session::{PgConfig, PgSession, PgTransaction};

pub const HOST_PARAMETER: &str = "host";
pub const PORT_PARAMETER: &str = "port";
pub const DATABASE_PARAMETER: &str = "database";
pub const USERNAME_PARAMETER: &str = "username";
pub const PASSWORD_PARAMETER: &str = "password";
pub const SSL_PARAMETER: &str = "ssl";
pub const CONNECT_TIMEOUT_PARAMETER: &str = "connect_timeout_ms";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_DATABASE: &str = "postgres";
const DEFAULT_USERNAME: &str = "postgres";
const DEFAULT_PASSWORD: &str = "postgres";

impl PgConfig {
    pub fn from_parameters(parameters: &Parameters) -> Result<Self> {
        let connect_timeout = parameters
            .parse::<u64>(CONNECT_TIMEOUT_PARAMETER)?
            .map(Duration::from_millis);
        Ok(Self {
            host: parameters.get_or(HOST_PARAMETER, DEFAULT_HOST).to_string(),
            port: parameters.parse_or(PORT_PARAMETER, DEFAULT_PORT)?,
            database: parameters.get_or(DATABASE_PARAMETER, DEFAULT_DATABASE).to_string(),
            username: parameters.get_or(USERNAME_PARAMETER, DEFAULT_USERNAME).to_string(),
            password: parameters.get_or(PASSWORD_PARAMETER, DEFAULT_PASSWORD).to_string(),
            ssl: parameters.parse_or(SSL_PARAMETER, false)?,
            connect_timeout,
        })
    }
}

/// Keyset pagination: yields `first`, then keeps calling `fetch` with the last
/// key seen until a short page comes back.
struct Paged<T, F> {
    buffer: VecDeque<T>,
    last: Option<Uuid>,
    exhausted: bool,
    fetch: F,
}

impl<T, F> Paged<T, F> {
    fn load(&mut self, page: Vec<(Uuid, T)>) {
        self.exhausted = page.len() < sql::PAGE_SIZE;
        if let Some((key, _)) = page.last() {
            self.last = Some(*key);
        }
        self.buffer.extend(page.into_iter().map(|(_, item)| item));
    }
}

impl<T, F> Iterator for Paged<T, F>
where
    F: FnMut(Uuid) -> Result<Vec<(Uuid, T)>>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            let last = match (self.exhausted, self.last) {
                (false, Some(last)) => last,
                _ => return None,
            };
            match (self.fetch)(last) {
                Ok(page) => self.load(page),
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

pub(crate) fn paged<T, F>(first: Vec<(Uuid, T)>, fetch: F) -> ResultStream<T>
where
    T: Send + 'static,
    F: FnMut(Uuid) -> Result<Vec<(Uuid, T)>> + Send + 'static,
{
    let mut pages = Paged {
        buffer: VecDeque::new(),
        last: None,
        exhausted: false,
        fetch,
    };
    pages.load(first);
    Box::new(pages)
}

/// Session and schema shared by every reader and writer of one connection.
pub struct PgStore {
    session: Arc<PgSession>,
    schema: String,
    retrievables: Arc<PgRetrievables>,
}

impl PgStore {
    pub fn new(session: Arc<PgSession>, schema: impl Into<String>) -> Self {
        let schema = schema.into();
        let retrievables = Arc::new(PgRetrievables::new(session.clone(), &schema));
        Self {
            session,
            schema,
            retrievables,
        }
    }

    pub fn session(&self) -> &Arc<PgSession> {
        &self.session
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn retrievables(&self) -> &Arc<PgRetrievables> {
        &self.retrievables
    }
}

pub struct PgVectorConnectionProvider {
    registry: Arc<ProviderRegistry<PgStore>>,
}

impl PgVectorConnectionProvider {
    pub fn new() -> Self {
        Self::with_kinds(default_kinds())
    }

    /// A provider serving exactly `kinds`, all through the stock descriptor provider.
    pub fn with_kinds(kinds: impl IntoIterator<Item = DescriptorKind>) -> Self {
        let registry = ProviderRegistry::builder()
            .register_all(kinds, Arc::new(PgDescriptorProvider))
            .build();
        Self::with_registry(registry)
    }

    pub fn with_registry(registry: ProviderRegistry<PgStore>) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Enables the extension and creates the schema if it is missing.
    fn prepare(session: &PgSession, schema_name: &str) -> Result<()> {
        session.batch(sql::CREATE_EXTENSION)?;
        match session.batch(&sql::create_schema(schema_name)) {
            Err(Error::Postgres { source }) if source.code() == Some(&SqlState::DUPLICATE_SCHEMA) => {
                info!(schema = schema_name, "schema already exists");
                Ok(())
            }
            other => other,
        }
    }
}

impl Default for PgVectorConnectionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionProvider for PgVectorConnectionProvider {
    fn database_name(&self) -> &'static str {
        "pgvector"
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn supports(&self, kind: &DescriptorKind) -> bool {
        self.registry.supports(kind)
    }

    fn open(&self, schema_name: &str, parameters: &Parameters) -> Result<Arc<dyn Connection>> {
        let config = PgConfig::from_parameters(parameters)?;
        let session = Arc::new(PgSession::connect(&config)?);
        Self::prepare(&session, schema_name)?;
        info!(server = %session.target(), schema = schema_name, "opened pgvector connection");
        let store = Arc::new(PgStore::new(session, schema_name));
        Ok(Arc::new(PgVectorConnection {
            core: ConnectionCore::new(store, self.registry.clone()),
            schema: schema_name.to_string(),
        }))
    }
}

pub struct PgVectorConnection {
    core: ConnectionCore<PgStore>,
    schema: String,
}

impl PgVectorConnection {
    pub fn store(&self) -> &Arc<PgStore> {
        self.core.context()
    }
}

impl Connection for PgVectorConnection {
    fn database_name(&self) -> &'static str {
        "pgvector"
    }

    fn schema_name(&self) -> &str {
        &self.schema
    }

    fn description(&self) -> String {
        format!("pgvector at {}", self.store().session().target())
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
        Ok(Box::new(self.store().session().begin()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PgConfig::from_parameters(&Parameters::new()).unwrap();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.database, "postgres");
        assert!(!config.ssl);
        assert!(config.connect_timeout.is_none());
        assert_eq!(config.target(), "postgres://postgres@127.0.0.1:5432/postgres");
    }

    #[test]
    fn test_config_rejects_malformed_values() {
        let port = Parameters::new().with(PORT_PARAMETER, "pg");
        assert!(matches!(PgConfig::from_parameters(&port), Err(Error::InvalidParameter { .. })));
        let ssl = Parameters::new().with(SSL_PARAMETER, "maybe");
        assert!(matches!(PgConfig::from_parameters(&ssl), Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn test_open_fails_without_server() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let parameters = Parameters::new()
            .with(PORT_PARAMETER, port)
            .with(CONNECT_TIMEOUT_PARAMETER, 500);
        let opened = PgVectorConnectionProvider::new().open("media", &parameters);
        assert!(matches!(opened, Err(Error::Postgres { .. })));
    }

    #[test]
    fn test_pages_until_short_page() {
        let ids: Vec<Uuid> = (0..(sql::PAGE_SIZE + 3) as u128).map(Uuid::from_u128).collect();
        let page = |after: Option<Uuid>| -> Vec<(Uuid, u128)> {
            ids.iter()
                .filter(|id| after.map_or(true, |a| **id > a))
                .take(sql::PAGE_SIZE)
                .map(|id| (*id, id.as_u128()))
                .collect()
        };
        let first = page(None);
        let rest = ids.clone();
        let mut calls = 0;
        let stream = paged(first, move |last| {
            calls += 1;
            assert!(calls <= 1, "only one follow-up page expected");
            Ok(rest
                .iter()
                .filter(|id| **id > last)
                .take(sql::PAGE_SIZE)
                .map(|id| (*id, id.as_u128()))
                .collect())
        });
        let items: Vec<u128> = stream.map(|r| r.unwrap()).collect();
        assert_eq!(items.len(), sql::PAGE_SIZE + 3);
        assert_eq!(items[sql::PAGE_SIZE + 2], (sql::PAGE_SIZE + 2) as u128);
    }

    #[test]
    fn test_page_errors_end_the_stream() {
        let first: Vec<(Uuid, u8)> = (0..sql::PAGE_SIZE as u128).map(|i| (Uuid::from_u128(i), 0)).collect();
        let mut stream = paged(first, |_| Err(Error::Rpc("gone".into())));
        for _ in 0..sql::PAGE_SIZE {
            assert!(stream.next().unwrap().is_ok());
        }
        assert!(matches!(stream.next(), Some(Err(Error::Rpc(_)))));
        assert!(stream.next().is_none());
    }
}
