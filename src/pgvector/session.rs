use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use tokio::runtime::Runtime;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Config, NoTls, Row, Socket};
use tracing::{debug, error, warn};

use crate::database::Transaction;
use crate::error::{Error, Result};
use crate::pgvector::tls;

pub type Params<'a> = [&'a (dyn ToSql + Sync)];

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub ssl: bool,
    pub connect_timeout: Option<Duration>,
}

impl PgConfig {
    pub fn target(&self) -> String {
        format!("postgres://{}@{}:{}/{}", self.username, self.host, self.port, self.database)
    }

    fn driver_config(&self) -> Config {
        let mut config = Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.username)
            .password(&self.password)
            .application_name("mediastore");
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout(timeout);
        }
        config
    }
}

async fn connect<T>(config: Config, tls: T) -> std::result::Result<Client, tokio_postgres::Error>
where
    T: MakeTlsConnect<Socket> + 'static,
    T::Stream: Send + 'static,
{
    let (client, connection) = config.connect(tls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "postgres connection terminated");
        }
    });
    Ok(client)
}

/// One blocking session on top of the async driver.
///
/// Statements are issued under a reentrant lock, so a thread holding an open
/// transaction keeps issuing statements while every other thread waits.
/// Must not be called from inside another tokio runtime.
pub struct PgSession {
    runtime: Runtime,
    client: Client,
    lock: ReentrantMutex<()>,
    in_transaction: AtomicBool,
    failure: Mutex<Option<String>>,
    target: String,
}

impl PgSession {
    pub fn connect(config: &PgConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("mediastore-pg")
            .enable_all()
            .build()?;
        let driver = config.driver_config();
        let client = if config.ssl {
            let connector = tls::connector()?;
            runtime.block_on(connect(driver, connector))?
        } else {
            runtime.block_on(connect(driver, NoTls))?
        };
        debug!(server = %config.target(), ssl = config.ssl, "postgres session established");
        Ok(Self {
            runtime,
            client,
            lock: ReentrantMutex::new(()),
            in_transaction: AtomicBool::new(false),
            failure: Mutex::new(None),
            target: config.target(),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn execute(&self, sql: &str, params: &Params<'_>) -> Result<u64> {
        let _guard = self.lock.lock();
        self.observe(self.runtime.block_on(self.client.execute(sql, params)))
    }

    pub fn query(&self, sql: &str, params: &Params<'_>) -> Result<Vec<Row>> {
        let _guard = self.lock.lock();
        self.observe(self.runtime.block_on(self.client.query(sql, params)))
    }

    /// Runs one or more parameterless statements.
    pub fn batch(&self, sql: &str) -> Result<()> {
        let _guard = self.lock.lock();
        self.observe(self.runtime.block_on(self.client.batch_execute(sql)))
    }

    /// Remembers the first failure inside an open transaction. Postgres aborts
    /// the transaction on it even when the caller recovers from the error.
    fn observe<T>(&self, result: std::result::Result<T, tokio_postgres::Error>) -> Result<T> {
        result.map_err(|e| {
            if self.in_transaction.load(Ordering::Acquire) {
                self.failure.lock().get_or_insert_with(|| e.to_string());
            }
            Error::from(e)
        })
    }

    /// Runs `action` atomically: inside the caller's transaction when one is
    /// open, otherwise in a transaction of its own.
    pub fn atomically<T>(&self, action: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock();
        if self.in_transaction.load(Ordering::Acquire) {
            return action();
        }
        self.batch("BEGIN")?;
        match action() {
            Ok(value) => {
                self.batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.batch("ROLLBACK") {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    pub fn begin(&self) -> Result<PgTransaction<'_>> {
        let guard = self.lock.lock();
        if self.in_transaction.load(Ordering::Acquire) {
            return Err(Error::Unsupported("nested transactions".into()));
        }
        self.batch("BEGIN")?;
        self.failure.lock().take();
        self.in_transaction.store(true, Ordering::Release);
        Ok(PgTransaction {
            session: self,
            _guard: guard,
            open: true,
        })
    }

    fn finish(&self, statement: &str) -> Result<()> {
        let finished = self.batch(statement);
        self.in_transaction.store(false, Ordering::Release);
        finished
    }
}

/// Holds the session lock until committed, rolled back or dropped.
pub struct PgTransaction<'a> {
    session: &'a PgSession,
    _guard: ReentrantMutexGuard<'a, ()>,
    open: bool,
}

impl Transaction for PgTransaction<'_> {
    fn commit(mut self: Box<Self>) -> Result<()> {
        self.open = false;
        let failure = self.session.failure.lock().take();
        if let Some(failure) = failure {
            self.session.finish("ROLLBACK")?;
            return Err(Error::Aborted(failure));
        }
        self.session.finish("COMMIT")
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.open = false;
        self.session.finish("ROLLBACK")
    }
}

impl Drop for PgTransaction<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.session.finish("ROLLBACK") {
                warn!(server = %self.session.target, error = %e, "implicit rollback failed");
            }
        }
    }
}
