//! Campaign archive store
//!
//! A single SQLite file holding the info row plus the host, directory,
//! dataset, file and step tables. All mutation goes through an
//! [`ArchiveTx`], one per command invocation, committed once at the end.
//! Every statement is parameterized.

use anyhow::{anyhow, Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{
    params, Connection, OpenFlags, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::codec::{self, Codec, Compressed};
use crate::{timefmt, DatasetId, DirId, HostId, ARCHIVE_ID, ARCHIVE_NAME, ARCHIVE_VERSION};

/// How long a writer waits for another process holding the archive lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = "
    CREATE TABLE info (id TEXT, name TEXT, version TEXT, ctime INT);
    CREATE TABLE host (hostname TEXT PRIMARY KEY, longhostname TEXT);
    CREATE TABLE directory (hostid INT, name TEXT, PRIMARY KEY (hostid, name));
    CREATE TABLE bpdataset (
        hostid INT, dirid INT, name TEXT, ctime INT,
        PRIMARY KEY (hostid, dirid, name)
    );
    CREATE TABLE bpfile (
        bpdatasetid INT, name TEXT, compression INT, lenorig INT,
        lencompressed INT, ctime INT, data BLOB,
        PRIMARY KEY (bpdatasetid, name)
    );
    CREATE TABLE step (
        bpdatasetid INT, enginestep INT, physstep INT, phystime INT, ctime INT,
        PRIMARY KEY (bpdatasetid, enginestep)
    );
";

/// Read a creation time column. Older writers stored REAL epoch seconds
/// in these INT columns; a missing value reads as 0.
fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<i64> {
    match row.get_ref(idx)? {
        ValueRef::Integer(v) => Ok(v),
        ValueRef::Real(v) => Ok(timefmt::from_real(v)),
        ValueRef::Null => Ok(0),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            idx,
            other.data_type(),
            "not a timestamp".into(),
        )),
    }
}

/// The single `info` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub ctime: i64,
}

impl ArchiveInfo {
    pub fn is_compatible(&self) -> bool {
        self.id == ARCHIVE_ID && self.version == ARCHIVE_VERSION
    }
}

/// One write event of a dataset's producing engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepRow {
    pub engine_step: i64,
    pub phys_step: i64,
    pub phys_time: f64,
    pub ctime: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
    pub name: String,
    pub compression: i64,
    pub len_orig: u64,
    pub len_compressed: u64,
    pub ctime: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRow {
    pub id: DatasetId,
    pub name: String,
    pub ctime: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirNode {
    pub id: DirId,
    pub path: String,
    pub datasets: Vec<DatasetRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostNode {
    pub id: HostId,
    pub short_name: String,
    pub long_name: String,
    pub directories: Vec<DirNode>,
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub hosts: u64,
    pub directories: u64,
    pub datasets: u64,
    pub files: u64,
    pub steps: u64,
}

/// Open campaign archive
pub struct Archive {
    db: Connection,
    path: PathBuf,
}

impl Archive {
    /// Create a new, empty archive file. The schema is written by
    /// [`ArchiveTx::init_schema`] inside the first transaction.
    ///
    /// The file is claimed with `create_new`, so of two concurrent creators
    /// exactly one succeeds. On success the file belongs to the caller.
    pub fn create(path: &Path) -> Result<Self> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => anyhow!("Archive {:?} already exists", path),
                _ => anyhow::Error::new(e).context(format!("Cannot create archive {:?}", path)),
            })?;

        let opened = Connection::open(path)
            .with_context(|| format!("Cannot create archive {:?}", path))
            .and_then(|db| Self::configure(&db).map(|_| db));
        match opened {
            Ok(db) => {
                info!("Created archive file {:?}", path);
                Ok(Self {
                    db,
                    path: path.to_path_buf(),
                })
            }
            Err(e) => {
                let _ = fs::remove_file(path);
                Err(e)
            }
        }
    }

    /// Open an existing archive for reading and writing
    pub fn open(path: &Path) -> Result<Self> {
        let db = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Cannot open archive {:?}", path))?;
        Self::configure(&db)?;
        debug!("Opened archive {:?}", path);
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing archive without write access
    pub fn open_readonly(path: &Path) -> Result<Self> {
        let db = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Cannot open archive {:?}", path))?;
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    fn configure(db: &Connection) -> Result<()> {
        db.busy_timeout(BUSY_TIMEOUT)?;
        db.execute_batch("PRAGMA synchronous=FULL;")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start the write transaction for one command. The archive lock is
    /// taken immediately so concurrent writers serialize here.
    pub fn begin(&mut self) -> Result<ArchiveTx<'_>> {
        let tx = self
            .db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Cannot lock archive for writing")?;
        Ok(ArchiveTx { tx })
    }

    pub fn info(&self) -> Result<ArchiveInfo> {
        self.db
            .query_row("SELECT id, name, version, ctime FROM info", [], |row| {
                Ok(ArchiveInfo {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    version: row.get(2)?,
                    ctime: time_column(row, 3)?,
                })
            })
            .optional()?
            .ok_or_else(|| anyhow!("Archive {:?} has no info record", self.path))
    }

    pub fn counts(&self) -> Result<RowCounts> {
        let count = |table: &str| -> Result<u64> {
            // table names come from the fixed list below, never from input
            let n: u64 = self
                .db
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n)
        };
        Ok(RowCounts {
            hosts: count("host")?,
            directories: count("directory")?,
            datasets: count("bpdataset")?,
            files: count("bpfile")?,
            steps: count("step")?,
        })
    }

    /// Full host → directory → dataset tree, ordered by insertion
    pub fn tree(&self) -> Result<Vec<HostNode>> {
        let mut host_stmt = self
            .db
            .prepare("SELECT rowid, hostname, longhostname FROM host ORDER BY rowid")?;
        let mut dir_stmt = self
            .db
            .prepare("SELECT rowid, name FROM directory WHERE hostid = ?1 ORDER BY rowid")?;
        let mut ds_stmt = self.db.prepare(
            "SELECT rowid, name, ctime FROM bpdataset
             WHERE hostid = ?1 AND dirid = ?2 ORDER BY rowid",
        )?;

        let hosts = host_stmt
            .query_map([], |row| {
                Ok((
                    HostId(row.get(0)?),
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut tree = Vec::with_capacity(hosts.len());
        for (host_id, short_name, long_name) in hosts {
            let dirs = dir_stmt
                .query_map(params![host_id.0], |row| {
                    Ok((DirId(row.get(0)?), row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut directories = Vec::with_capacity(dirs.len());
            for (dir_id, path) in dirs {
                let datasets = ds_stmt
                    .query_map(params![host_id.0, dir_id.0], |row| {
                        Ok(DatasetRow {
                            id: DatasetId(row.get(0)?),
                            name: row.get(1)?,
                            ctime: time_column(row, 2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                directories.push(DirNode {
                    id: dir_id,
                    path,
                    datasets,
                });
            }

            tree.push(HostNode {
                id: host_id,
                short_name,
                long_name,
                directories,
            });
        }
        Ok(tree)
    }

    /// File rows of a dataset, without payloads
    pub fn files(&self, dataset: DatasetId) -> Result<Vec<FileRow>> {
        let mut stmt = self.db.prepare(
            "SELECT name, compression, lenorig, lencompressed, ctime
             FROM bpfile WHERE bpdatasetid = ?1 ORDER BY name",
        )?;
        let rows = stmt
            .query_map(params![dataset.0], |row| {
                Ok(FileRow {
                    name: row.get(0)?,
                    compression: row.get(1)?,
                    len_orig: row.get(2)?,
                    len_compressed: row.get(3)?,
                    ctime: time_column(row, 4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn steps(&self, dataset: DatasetId) -> Result<Vec<StepRow>> {
        let mut stmt = self.db.prepare(
            "SELECT enginestep, physstep, phystime, ctime
             FROM step WHERE bpdatasetid = ?1 ORDER BY enginestep",
        )?;
        let rows = stmt
            .query_map(params![dataset.0], |row| {
                Ok(StepRow {
                    engine_step: row.get(0)?,
                    phys_step: row.get(1)?,
                    phys_time: row.get(2)?,
                    ctime: time_column(row, 3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Look up a dataset id by its full key
    pub fn find_dataset(&self, host: HostId, dir: DirId, name: &str) -> Result<Option<DatasetId>> {
        find_dataset(&self.db, host, dir, name)
    }

    /// Decompressed content of a stored file, checked against its
    /// recorded original length
    pub fn read_file(&self, dataset: DatasetId, name: &str) -> Result<Vec<u8>> {
        let (flag, len_orig, data): (i64, u64, Vec<u8>) = self
            .db
            .query_row(
                "SELECT compression, lenorig, data FROM bpfile
                 WHERE bpdatasetid = ?1 AND name = ?2",
                params![dataset.0, name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?
            .ok_or_else(|| anyhow!("File {} not found in dataset {}", name, dataset.0))?;

        let content = codec::decompress(Codec::from_flag(flag)?, &data)
            .with_context(|| format!("Cannot decompress {}", name))?;

        if content.len() as u64 != len_orig {
            return Err(anyhow!(
                "Length mismatch for {}: expected {} got {}",
                name,
                len_orig,
                content.len()
            ));
        }
        Ok(content)
    }
}

fn find_dataset(db: &Connection, host: HostId, dir: DirId, name: &str) -> Result<Option<DatasetId>> {
    let id = db
        .query_row(
            "SELECT rowid FROM bpdataset WHERE hostid = ?1 AND dirid = ?2 AND name = ?3",
            params![host.0, dir.0, name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.map(DatasetId))
}

/// Write transaction over the archive. Dropping it without
/// [`ArchiveTx::commit`] rolls every change back.
pub struct ArchiveTx<'a> {
    tx: Transaction<'a>,
}

impl<'a> ArchiveTx<'a> {
    /// Create all tables and the info row of a fresh archive
    pub fn init_schema(&self, ctime: i64) -> Result<()> {
        self.tx.execute_batch(SCHEMA)?;
        self.tx.execute(
            "INSERT INTO info (id, name, version, ctime) VALUES (?1, ?2, ?3, ?4)",
            params![ARCHIVE_ID, ARCHIVE_NAME, ARCHIVE_VERSION, ctime],
        )?;
        debug!("Initialized archive schema version {}", ARCHIVE_VERSION);
        Ok(())
    }

    /// Look up a host by short name, inserting it if unknown.
    /// An existing row keeps its long name.
    pub fn resolve_host(&self, short_name: &str, long_name: &str) -> Result<HostId> {
        let existing: Option<i64> = self
            .tx
            .query_row(
                "SELECT rowid FROM host WHERE hostname = ?1",
                params![short_name],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            info!("Found host {} in archive, rowid = {}", short_name, id);
            return Ok(HostId(id));
        }

        self.tx.execute(
            "INSERT INTO host (hostname, longhostname) VALUES (?1, ?2)",
            params![short_name, long_name],
        )?;
        let id = self.tx.last_insert_rowid();
        info!("Inserted host {} into archive, rowid = {}", short_name, id);
        Ok(HostId(id))
    }

    pub fn resolve_directory(&self, host: HostId, path: &str) -> Result<DirId> {
        let existing: Option<i64> = self
            .tx
            .query_row(
                "SELECT rowid FROM directory WHERE hostid = ?1 AND name = ?2",
                params![host.0, path],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            debug!("Found directory {} (rowid {})", path, id);
            return Ok(DirId(id));
        }

        self.tx.execute(
            "INSERT INTO directory (hostid, name) VALUES (?1, ?2)",
            params![host.0, path],
        )?;
        let id = self.tx.last_insert_rowid();
        info!("Inserted directory {} into archive, rowid = {}", path, id);
        Ok(DirId(id))
    }

    /// Look up a dataset by (host, directory, name), inserting it with
    /// `ctime` if unknown. The ctime of an existing row is left alone.
    /// Returns the id and whether the row was created.
    pub fn resolve_dataset(
        &self,
        host: HostId,
        dir: DirId,
        name: &str,
        ctime: i64,
    ) -> Result<(DatasetId, bool)> {
        if let Some(id) = find_dataset(&self.tx, host, dir, name)? {
            debug!("Found dataset {} (rowid {})", name, id.0);
            return Ok((id, false));
        }

        self.tx.execute(
            "INSERT INTO bpdataset (hostid, dirid, name, ctime) VALUES (?1, ?2, ?3, ?4)",
            params![host.0, dir.0, name, ctime],
        )?;
        let id = DatasetId(self.tx.last_insert_rowid());
        debug!("Inserted dataset {} (rowid {})", name, id.0);
        Ok((id, true))
    }

    /// Insert a file row or overwrite every non-key column of the existing one
    pub fn upsert_file(
        &self,
        dataset: DatasetId,
        name: &str,
        compressed: &Compressed,
        ctime: i64,
    ) -> Result<()> {
        self.tx.execute(
            "INSERT INTO bpfile
             (bpdatasetid, name, compression, lenorig, lencompressed, ctime, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (bpdatasetid, name) DO UPDATE SET
                compression = excluded.compression,
                lenorig = excluded.lenorig,
                lencompressed = excluded.lencompressed,
                ctime = excluded.ctime,
                data = excluded.data",
            params![
                dataset.0,
                name,
                compressed.codec.flag(),
                compressed.len_orig as i64,
                compressed.len_compressed as i64,
                ctime,
                compressed.data,
            ],
        )?;
        Ok(())
    }

    /// Insert a step row or refresh physstep/phystime/ctime of the existing one
    pub fn upsert_step(&self, dataset: DatasetId, step: &StepRow) -> Result<()> {
        self.tx.execute(
            "INSERT INTO step (bpdatasetid, enginestep, physstep, phystime, ctime)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (bpdatasetid, enginestep) DO UPDATE SET
                physstep = excluded.physstep,
                phystime = excluded.phystime,
                ctime = excluded.ctime",
            params![
                dataset.0,
                step.engine_step,
                step.phys_step,
                step.phys_time,
                step.ctime,
            ],
        )?;
        Ok(())
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit().context("Cannot commit archive transaction")?;
        debug!("Committed archive transaction");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn new_test_archive(dir: &Path) -> Archive {
    let mut archive = Archive::create(&dir.join("test.aca")).unwrap();
    let tx = archive.begin().unwrap();
    tx.init_schema(1_700_000_000_000_000_000).unwrap();
    tx.commit().unwrap();
    archive
}
