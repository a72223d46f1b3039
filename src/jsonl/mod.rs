//! Flat-file backend.
//!
//! Every field is stored in `<root>/<schema>/<field>.jsonl`, one self-describing
//! record per line. Writes append a whole batch with a single write; updates and
//! deletes rewrite the file and swap it in. Queries scan the file.
//!
//! There are no transactions and no foreign keys: deleting a retrievable removes
//! its relationships but leaves descriptors that reference it, and joins drop
//! those descriptors as unresolved.

pub mod descriptor;
pub mod file;
pub mod record;
pub mod retrievable;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::database::registry::default_kinds;
use crate::database::{
    Connection, ConnectionCore, ConnectionProvider, DescriptorInitializer, DescriptorReader, DescriptorWriter,
    ProviderRegistry, RetrievableInitializer, RetrievableReader, RetrievableWriter, Transaction, Unsupported,
};
use crate::descriptor::DescriptorKind;
use crate::error::{Error, Result};
use crate::parameters::Parameters;
use crate::schema::Field;

pub use descriptor::JsonlDescriptorProvider;
pub use file::JsonlFile;
pub use retrievable::JsonlRetrievables;

pub const ROOT_PARAMETER: &str = "root";

const RESERVED: [&str; 2] = ["retrievables", "relationships"];

/// Shared state of one open schema directory. Files are handed out once per
/// path so every reader and writer of a file shares its write lock.
pub struct JsonlStore {
    root: PathBuf,
    schema: String,
    files: Mutex<HashMap<PathBuf, Arc<JsonlFile>>>,
    retrievables: Arc<JsonlRetrievables>,
}

impl JsonlStore {
    pub fn new(root: impl Into<PathBuf>, schema: impl Into<String>) -> Self {
        let root = root.into();
        let schema = schema.into();
        let mut files = HashMap::new();
        let mut file = |name: &str| {
            let path = root.join(&schema).join(format!("{name}.jsonl"));
            files.entry(path.clone()).or_insert_with(|| Arc::new(JsonlFile::new(path))).clone()
        };
        let retrievables = Arc::new(JsonlRetrievables::new(file(RESERVED[0]), file(RESERVED[1])));
        Self {
            root,
            schema,
            files: Mutex::new(files),
            retrievables,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn directory(&self) -> PathBuf {
        self.root.join(&self.schema)
    }

    pub fn retrievables(&self) -> &Arc<JsonlRetrievables> {
        &self.retrievables
    }

    pub fn field_file(&self, field: &str) -> Result<Arc<JsonlFile>> {
        if RESERVED.iter().any(|r| r.eq_ignore_ascii_case(field)) {
            return Err(Error::Unsupported(format!(
                "field name '{field}' collides with a retrievable file"
            )));
        }
        let path = self.directory().join(format!("{field}.jsonl"));
        let mut files = self.files.lock();
        Ok(files.entry(path.clone()).or_insert_with(|| Arc::new(JsonlFile::new(path))).clone())
    }
}

pub struct JsonlConnectionProvider {
    registry: Arc<ProviderRegistry<JsonlStore>>,
}

impl JsonlConnectionProvider {
    pub fn new() -> Self {
        Self::with_kinds(default_kinds())
    }

    /// A provider serving exactly `kinds`, all through the stock descriptor provider.
    pub fn with_kinds(kinds: impl IntoIterator<Item = DescriptorKind>) -> Self {
        let registry = ProviderRegistry::builder()
            .register_all(kinds, Arc::new(JsonlDescriptorProvider))
            .build();
        Self::with_registry(registry)
    }

    /// A provider serving `registry`, e.g. with additional struct kinds.
    pub fn with_registry(registry: ProviderRegistry<JsonlStore>) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}

impl Default for JsonlConnectionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionProvider for JsonlConnectionProvider {
    fn database_name(&self) -> &'static str {
        "jsonl"
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn supports(&self, kind: &DescriptorKind) -> bool {
        self.registry.supports(kind)
    }

    fn open(&self, schema_name: &str, parameters: &Parameters) -> Result<Arc<dyn Connection>> {
        let root = PathBuf::from(parameters.require(ROOT_PARAMETER)?);
        let store = Arc::new(JsonlStore::new(root, schema_name));
        std::fs::create_dir_all(store.directory())?;
        info!(directory = %store.directory().display(), "opened jsonl store");
        Ok(Arc::new(JsonlConnection {
            core: ConnectionCore::new(store, self.registry.clone()),
            schema: schema_name.to_string(),
        }))
    }
}

pub struct JsonlConnection {
    core: ConnectionCore<JsonlStore>,
    schema: String,
}

impl JsonlConnection {
    pub fn store(&self) -> &Arc<JsonlStore> {
        self.core.context()
    }
}

impl Connection for JsonlConnection {
    fn database_name(&self) -> &'static str {
        "jsonl"
    }

    fn schema_name(&self) -> &str {
        &self.schema
    }

    fn description(&self) -> String {
        format!("jsonl on '{}'", self.store().root().display())
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
        Ok(Unsupported::begin("jsonl"))
    }
}
