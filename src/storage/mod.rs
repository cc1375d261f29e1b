pub mod repository;

use std::path::{Path, PathBuf};

use rusqlite_migration::{Migrations, M};

use crate::error::{Error, Result};

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;\
     PRAGMA foreign_keys=ON;\
     PRAGMA busy_timeout=5000;";

const MIGRATIONS: &[M<'static>] = &[M::up(include_str!("migrations/001_initial.sql"))];

/// `~/.slackdw/slackdw.db`
pub fn default_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::Config("cannot determine home directory".into()))?;
    Ok(home.join(".slackdw").join("slackdw.db"))
}

/// The message store: a writer and a reader connection over one SQLite
/// file in WAL mode. All writes go through the writer; reads never wait
/// on it.
#[derive(Clone)]
pub struct Database {
    writer: tokio_rusqlite::Connection,
    reader: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (and create if needed) the database at [`default_path`].
    pub async fn open() -> Result<Self> {
        Self::open_at(default_path()?).await
    }

    /// Open the database at the given path, creating parent directories and
    /// applying pending migrations.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::Config(format!("{}: {e}", dir.display())))?;
        }
        log::debug!("Opening database at {}", path.display());

        let writer = tokio_rusqlite::Connection::open(&path).await?;
        Self::configure(&writer, true).await?;

        let reader = tokio_rusqlite::Connection::open(&path).await?;
        Self::configure(&reader, false).await?;

        Ok(Self { writer, reader })
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> Result<Self> {
        let writer = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::configure(&writer, true).await?;

        // In-memory DBs are per-connection, so reader and writer share one.
        Ok(Self {
            reader: writer.clone(),
            writer,
        })
    }

    fn migrations() -> Migrations<'static> {
        Migrations::from_slice(MIGRATIONS)
    }

    async fn configure(conn: &tokio_rusqlite::Connection, migrate: bool) -> Result<()> {
        conn.call(move |conn| {
            conn.execute_batch(PRAGMAS).map_err(|e| e.to_string())?;
            if migrate {
                Self::migrations()
                    .to_latest(conn)
                    .map_err(|e| e.to_string())?;
            }
            Ok::<(), String>(())
        })
        .await
        .map_err(|e| Error::Migration(e.to_string()))
    }

    pub fn writer(&self) -> &tokio_rusqlite::Connection {
        &self.writer
    }

    pub fn reader(&self) -> &tokio_rusqlite::Connection {
        &self.reader
    }
}
