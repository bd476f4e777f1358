//! Database module: stored directory fingerprints and imported files

use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::collections::HashMap;
use std::path::Path;

use crate::models::{path_key, Fingerprint, ScannedFile};
use crate::state::DirectoryHashIndex;

/// File record stored in database (minimal for fast comparison)
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: String,
    pub size: u64,
    pub mtime: i64,
}

/// Stored fingerprint of one directory
#[derive(Debug, Clone)]
pub struct DirectoryRecord {
    pub path: String,
    pub fingerprint: Fingerprint,
    pub needs_verification: bool,
    pub verified_at: Option<i64>,
    pub cover: Option<String>,
}

/// Database manager for scan results
pub struct ScanDatabase {
    conn: Connection,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl ScanDatabase {
    /// Open or create database
    pub fn open(path: &Path) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> SqliteResult<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS directories (
                path TEXT PRIMARY KEY,
                hash INTEGER NOT NULL,
                needs_verification INTEGER NOT NULL DEFAULT 0,
                verified_at INTEGER,
                cover TEXT
            );

            CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                directory TEXT NOT NULL,
                name TEXT NOT NULL,
                size INTEGER NOT NULL,
                mtime INTEGER NOT NULL,
                ctime INTEGER NOT NULL,
                extension TEXT NOT NULL,
                media_type TEXT NOT NULL,
                hash TEXT,
                is_partial_hash INTEGER DEFAULT 0,
                status TEXT DEFAULT 'new'
            );
            CREATE INDEX IF NOT EXISTS idx_files_directory ON files(directory);
            CREATE INDEX IF NOT EXISTS idx_files_hash ON files(hash);

            CREATE TABLE IF NOT EXISTS deleted_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL,
                name TEXT NOT NULL,
                size INTEGER NOT NULL,
                mtime INTEGER NOT NULL,
                ctime INTEGER NOT NULL,
                extension TEXT NOT NULL,
                media_type TEXT NOT NULL,
                hash TEXT,
                deleted_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_deleted_files_deleted_at ON deleted_files(deleted_at);
            ",
        )?;
        Ok(())
    }

    /// Load stored directory fingerprints for lookup during a scan
    pub fn load_directory_hashes(&self) -> SqliteResult<DirectoryHashIndex> {
        let mut stmt = self.conn.prepare("SELECT path, hash FROM directories")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, Fingerprint::from_i64(row.get(1)?)))
        })?;
        rows.collect()
    }

    /// Look up a single stored fingerprint
    pub fn directory_hash(&self, directory: &Path) -> SqliteResult<Option<Fingerprint>> {
        self.conn
            .query_row(
                "SELECT hash FROM directories WHERE path = ?1",
                [path_key(directory)],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map(|hash| hash.map(Fingerprint::from_i64))
    }

    /// Flag every stored directory as unconfirmed until this pass sees it
    pub fn begin_verification(&mut self) -> SqliteResult<u64> {
        let count = self
            .conn
            .execute("UPDATE directories SET needs_verification = 1", [])?;
        Ok(count as u64)
    }

    /// Insert or update a directory fingerprint and mark it verified
    pub fn upsert_directory(&mut self, directory: &Path, fingerprint: Fingerprint) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO directories (path, hash, needs_verification, verified_at)
             VALUES (?1, ?2, 0, ?3)
             ON CONFLICT(path) DO UPDATE SET
                hash = excluded.hash,
                needs_verification = 0,
                verified_at = excluded.verified_at",
            params![path_key(directory), fingerprint.to_i64(), now()],
        )?;
        Ok(())
    }

    /// Record the chosen cover image of a directory
    pub fn set_directory_cover(&mut self, directory: &Path, cover: Option<&Path>) -> SqliteResult<()> {
        self.conn.execute(
            "UPDATE directories SET cover = ?2 WHERE path = ?1",
            params![path_key(directory), cover.map(path_key)],
        )?;
        Ok(())
    }

    /// Confirm an unchanged directory
    pub fn mark_directory_verified(&mut self, directory: &Path) -> SqliteResult<()> {
        self.conn.execute(
            "UPDATE directories SET needs_verification = 0, verified_at = ?2 WHERE path = ?1",
            params![path_key(directory), now()],
        )?;
        Ok(())
    }

    /// Directories not confirmed since the last [`begin_verification`](Self::begin_verification)
    pub fn unverified_directories(&self) -> SqliteResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path FROM directories WHERE needs_verification = 1 ORDER BY path")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    /// Remove directories and move their files to deleted_files.
    /// Returns the paths of the retired files.
    pub fn purge_directories(&mut self, directories: &[String]) -> SqliteResult<Vec<String>> {
        let mut retired = Vec::new();
        for directory in directories {
            let files: Vec<String> = self
                .load_directory_files_by_key(directory)?
                .into_keys()
                .collect();
            self.move_to_deleted(&files)?;
            retired.extend(files);
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM directories WHERE path = ?1")?;
            for directory in directories {
                stmt.execute(params![directory])?;
            }
        }
        tx.commit()?;
        Ok(retired)
    }

    /// Load file records of one directory, keyed by path
    pub fn load_directory_files(&self, directory: &Path) -> SqliteResult<HashMap<String, FileRecord>> {
        self.load_directory_files_by_key(&path_key(directory))
    }

    fn load_directory_files_by_key(&self, directory: &str) -> SqliteResult<HashMap<String, FileRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, size, mtime FROM files WHERE directory = ?1")?;

        let rows = stmt.query_map([directory], |row| {
            Ok(FileRecord {
                path: row.get(0)?,
                size: row.get::<_, i64>(1)? as u64,
                mtime: row.get(2)?,
            })
        })?;

        let mut index = HashMap::new();
        for row in rows {
            let record = row?;
            index.insert(record.path.clone(), record);
        }
        Ok(index)
    }

    /// Batch insert/update files with status
    pub fn upsert_files(&mut self, files: &[ScannedFile]) -> SqliteResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO files
                 (path, directory, name, size, mtime, ctime, extension, media_type, hash, is_partial_hash, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;

            for file in files {
                stmt.execute(params![
                    file.key(),
                    path_key(&file.directory),
                    file.name,
                    file.size as i64,
                    file.mtime,
                    file.ctime,
                    file.extension,
                    file.media_type.as_str(),
                    file.hash,
                    file.is_partial_hash as i32,
                    file.status.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Move files to deleted_files table and remove from files table
    pub fn move_to_deleted(&mut self, paths: &[String]) -> SqliteResult<()> {
        if paths.is_empty() {
            return Ok(());
        }

        let deleted_at = now();
        let tx = self.conn.transaction()?;
        {
            let mut insert_stmt = tx.prepare(
                "INSERT INTO deleted_files (path, name, size, mtime, ctime, extension, media_type, hash, deleted_at)
                 SELECT path, name, size, mtime, ctime, extension, media_type, hash, ?1
                 FROM files WHERE path = ?2",
            )?;
            let mut delete_stmt = tx.prepare("DELETE FROM files WHERE path = ?1")?;

            for path in paths {
                insert_stmt.execute(params![deleted_at, path])?;
                delete_stmt.execute(params![path])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All stored directories, ordered by path
    pub fn list_directories(&self) -> SqliteResult<Vec<DirectoryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, hash, needs_verification, verified_at, cover FROM directories ORDER BY path",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DirectoryRecord {
                path: row.get(0)?,
                fingerprint: Fingerprint::from_i64(row.get(1)?),
                needs_verification: row.get::<_, i64>(2)? != 0,
                verified_at: row.get(3)?,
                cover: row.get(4)?,
            })
        })?;
        rows.collect()
    }

    /// Get file count
    pub fn file_count(&self) -> SqliteResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Clear all records from deleted_files table
    pub fn clear_deleted_files(&mut self) -> SqliteResult<u64> {
        let count = self.deleted_files_count()?;
        self.conn.execute("DELETE FROM deleted_files", [])?;
        Ok(count)
    }

    /// Get deleted files count
    pub fn deleted_files_count(&self) -> SqliteResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM deleted_files", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
