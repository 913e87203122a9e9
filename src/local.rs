//! Local run records
//!
//! An instrumented run writes one small SQLite file per process into the
//! `adios-campaign/` directory of its working directory, listing the
//! datasets it touched and every step it wrote. Dataset ids inside a record
//! are only meaningful within that record.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::archive::StepRow;
use crate::{timefmt, RECORD_EXTENSION, RECORD_ID, RECORD_NAME, RECORD_VERSION};

/// Dataset entry of a local record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDataset {
    pub local_id: i64,
    pub name: String,
}

/// Step entry of a local record, still pointing at a local dataset id
#[derive(Debug, Clone, PartialEq)]
pub struct LocalStep {
    pub local_dataset_id: i64,
    pub step: StepRow,
}

/// Everything read from one local record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalRunContents {
    pub datasets: Vec<LocalDataset>,
    pub steps: Vec<LocalStep>,
}

impl LocalRunContents {
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty() && self.steps.is_empty()
    }
}

/// All `*.acr` files directly inside `dir`, sorted by path
pub fn discover_records(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut records = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Cannot list {:?}", dir))? {
        let path = entry?.path();
        let is_record = path.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION);
        if is_record {
            records.push(path);
        }
    }
    records.sort();
    debug!("Found {} local records in {:?}", records.len(), dir);
    Ok(records)
}

/// Read a local record. Any failure is reported as a warning and yields
/// empty contents, so one bad record never stops a merge.
pub fn scan(path: &Path) -> LocalRunContents {
    match try_scan(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!("Skipping local record {:?}: {:#}", path, e);
            LocalRunContents::default()
        }
    }
}

fn try_scan(path: &Path) -> Result<LocalRunContents> {
    let db = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;

    if has_table(&db, "info")? {
        let version: Option<String> = db
            .query_row("SELECT version FROM info", [], |row| row.get(0))
            .optional()?;
        if let Some(version) = version {
            if version != RECORD_VERSION {
                return Err(anyhow!(
                    "record version {} is not supported (expected {})",
                    version,
                    RECORD_VERSION
                ));
            }
        }
    }

    let mut stmt = db.prepare("SELECT rowid, name FROM bpdataset ORDER BY rowid")?;
    let datasets = stmt
        .query_map([], |row| {
            Ok(LocalDataset {
                local_id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = db.prepare(
        "SELECT bpdatasetid, enginestep, physstep, phystime, ctime FROM step ORDER BY rowid",
    )?;
    let steps = stmt
        .query_map([], |row| {
            Ok(LocalStep {
                local_dataset_id: row.get(0)?,
                step: StepRow {
                    engine_step: row.get(1)?,
                    phys_step: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    phys_time: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                    ctime: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    debug!(
        "Scanned {:?}: {} datasets, {} steps",
        path,
        datasets.len(),
        steps.len()
    );
    Ok(LocalRunContents { datasets, steps })
}

fn has_table(db: &Connection, name: &str) -> Result<bool> {
    let found: Option<i64> = db
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Writer side of a local record, used by an instrumented run
pub struct LocalRecorder {
    db: Connection,
    path: PathBuf,
}

impl LocalRecorder {
    /// Open or create the record at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path)
            .with_context(|| format!("Cannot open local record {:?}", path))?;

        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS bpdataset (name PRIMARY KEY);
             CREATE TABLE IF NOT EXISTS info (id, name, version, ctime INT);
             CREATE TABLE IF NOT EXISTS step (
                bpdatasetid INT, enginestep INT, physstep INT, phystime INT, ctime INT,
                PRIMARY KEY (bpdatasetid, enginestep)
             );",
        )?;

        let version: Option<String> = db
            .query_row("SELECT version FROM info", [], |row| row.get(0))
            .optional()?;

        match version {
            None => {
                db.execute(
                    "INSERT INTO info (id, name, version, ctime) VALUES (?1, ?2, ?3, ?4)",
                    params![RECORD_ID, RECORD_NAME, RECORD_VERSION, timefmt::now_micros()],
                )?;
                info!("Created local record {:?}", path);
            }
            Some(v) if v != RECORD_VERSION => {
                return Err(anyhow!(
                    "Old recording was found with version {} but we are now on version {}",
                    v,
                    RECORD_VERSION
                ));
            }
            Some(_) => debug!("Opened local record {:?}", path),
        }

        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a dataset, returning its local id. Re-opening a known
    /// dataset from `start_step` discards its steps from there on.
    pub fn add_dataset(&self, name: &str, start_step: i64) -> Result<i64> {
        let existing: Option<i64> = self
            .db
            .query_row(
                "SELECT rowid FROM bpdataset WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            let removed = self.db.execute(
                "DELETE FROM step WHERE bpdatasetid = ?1 AND enginestep >= ?2",
                params![id, start_step],
            )?;
            debug!("Reopened dataset {} (local id {}), dropped {} steps", name, id, removed);
            return Ok(id);
        }

        self.db
            .execute("INSERT INTO bpdataset (name) VALUES (?1)", params![name])?;
        Ok(self.db.last_insert_rowid())
    }

    pub fn add_step(&self, local_id: i64, step: &StepRow) -> Result<()> {
        self.db.execute(
            "INSERT INTO step (bpdatasetid, enginestep, physstep, phystime, ctime)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                local_id,
                step.engine_step,
                step.phys_step,
                step.phys_time,
                step.ctime
            ],
        )?;
        Ok(())
    }
}
