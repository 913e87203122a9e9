//! Merge engine
//!
//! Folds local run records into the archive inside the caller's
//! transaction. Per record, datasets are classified and resolved first,
//! building the local-id → archive-id map that steps are rewritten
//! through. Bad records, unknown datasets and unreadable files are
//! reported and skipped. Only storage errors abort the merge.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::archive::ArchiveTx;
use crate::classify::{self, DatasetKind};
use crate::codec::{self, Codec};
use crate::host::HostIdentity;
use crate::local::{self, LocalRunContents};
use crate::{DatasetId, DirId, HostId};

/// Counters for one merge pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub records: u64,
    pub datasets: u64,
    pub new_datasets: u64,
    pub skipped_datasets: u64,
    pub files: u64,
    pub unreadable_files: u64,
    pub steps: u64,
    pub dropped_steps: u64,
}

/// One merge pass over a set of local records
pub struct Merger<'t, 'a> {
    tx: &'t ArchiveTx<'a>,
    host: HostId,
    dir: DirId,
    working_dir: PathBuf,
    codec: Codec,
    /// Datasets whose files were already stored during this pass
    files_done: HashSet<DatasetId>,
    stats: MergeStats,
}

impl<'t, 'a> Merger<'t, 'a> {
    /// Resolve the host and working directory this pass merges for
    pub fn new(
        tx: &'t ArchiveTx<'a>,
        host: &HostIdentity,
        working_dir: &Path,
        codec: Codec,
    ) -> Result<Self> {
        let working_dir = fs::canonicalize(working_dir)
            .with_context(|| format!("Cannot resolve working directory {:?}", working_dir))?;

        let host_id = tx.resolve_host(&host.short_name, &host.long_name)?;
        let dir_id = tx.resolve_directory(host_id, &working_dir.to_string_lossy())?;

        Ok(Self {
            tx,
            host: host_id,
            dir: dir_id,
            working_dir,
            codec,
            files_done: HashSet::new(),
            stats: MergeStats::default(),
        })
    }

    /// Merge every record, in the order given
    pub fn merge_all(mut self, records: &[PathBuf]) -> Result<MergeStats> {
        for record in records {
            self.merge_record(record)?;
        }
        info!(
            "Merged {} records: {} datasets ({} new, {} skipped), {} files, {} steps",
            self.stats.records,
            self.stats.datasets,
            self.stats.new_datasets,
            self.stats.skipped_datasets,
            self.stats.files,
            self.stats.steps
        );
        Ok(self.stats)
    }

    /// Merge a single record
    pub fn merge_record(&mut self, record: &Path) -> Result<()> {
        info!("Merging local record {:?}", record);
        let contents = local::scan(record);
        self.merge_contents(&contents)?;
        self.stats.records += 1;
        Ok(())
    }

    fn merge_contents(&mut self, contents: &LocalRunContents) -> Result<()> {
        // scoped to this record: local ids mean nothing outside it
        let mut id_map: HashMap<i64, DatasetId> = HashMap::new();

        for entry in &contents.datasets {
            if let Some(id) = self.merge_dataset(&entry.name)? {
                id_map.insert(entry.local_id, id);
            }
        }

        let mut dropped = 0u64;
        for local_step in &contents.steps {
            match id_map.get(&local_step.local_dataset_id) {
                Some(&dataset) => {
                    self.tx.upsert_step(dataset, &local_step.step)?;
                    self.stats.steps += 1;
                }
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            warn!("Dropped {} steps of datasets that were not archived", dropped);
            self.stats.dropped_steps += dropped;
        }
        Ok(())
    }

    fn merge_dataset(&mut self, name: &str) -> Result<Option<DatasetId>> {
        let path = self.working_dir.join(name);
        let kind = classify::classify(&path);

        if !kind.is_recognized() {
            warn!("Dataset {} is not an ADIOS dataset nor an HDF5 file. Skip", name);
            self.stats.skipped_datasets += 1;
            return Ok(None);
        }

        let ctime = match ctime_micros(&path) {
            Ok(t) => t,
            Err(e) => {
                warn!("Cannot stat dataset {}: {:#}. Skip", name, e);
                self.stats.skipped_datasets += 1;
                return Ok(None);
            }
        };

        info!("Add {} {} to archive", kind.label(), name);
        let (id, created) = self.tx.resolve_dataset(self.host, self.dir, name, ctime)?;
        self.stats.datasets += 1;
        if created {
            self.stats.new_datasets += 1;
        }

        if kind == DatasetKind::Structured && self.files_done.insert(id) {
            self.merge_files(id, &path)?;
        }
        Ok(Some(id))
    }

    fn merge_files(&mut self, dataset: DatasetId, path: &Path) -> Result<()> {
        let names = match classify::metadata_files(path) {
            Ok(names) => names,
            Err(e) => {
                warn!("Cannot list metadata files of {:?}: {:#}", path, e);
                return Ok(());
            }
        };

        for name in names {
            let file = path.join(&name);
            let stored = codec::compress_file(&file, self.codec)
                .and_then(|c| Ok((c, ctime_micros(&file)?)));
            match stored {
                Ok((compressed, ctime)) => {
                    self.tx.upsert_file(dataset, &name, &compressed, ctime)?;
                    self.stats.files += 1;
                    debug!(
                        "Stored {} ({} -> {} bytes)",
                        name, compressed.len_orig, compressed.len_compressed
                    );
                }
                Err(e) => {
                    warn!("Error while reading file {:?}: {:#}. Skip", file, e);
                    self.stats.unreadable_files += 1;
                }
            }
        }
        Ok(())
    }
}

/// Status-change time of a filesystem entry in microseconds
fn ctime_micros(path: &Path) -> Result<i64> {
    let meta = fs::metadata(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Ok(meta.ctime() * 1_000_000 + meta.ctime_nsec() / 1_000)
    }
    #[cfg(not(unix))]
    {
        let modified = meta.modified()?;
        Ok(chrono::DateTime::<chrono::Utc>::from(modified).timestamp_micros())
    }
}
