//! Command orchestration: create, update, info, list, delete
//!
//! Each command checks its preconditions, opens the archive, runs at most
//! one transaction and releases the archive before returning.

use anyhow::Context;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::{Archive, DatasetRow};
use crate::classify::INDEX_FILE;
use crate::codec::Codec;
use crate::config::archive_path;
use crate::error::{CommandError, CommandResult};
use crate::header::BpHeader;
use crate::host::HostIdentity;
use crate::local;
use crate::merge::{MergeStats, Merger};
use crate::{timefmt, Settings, ARCHIVE_EXTENSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Create,
    Update,
    Delete,
    Info,
    List,
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Info => "info",
            Self::List => "list",
        }
    }
}

/// Run one command, writing user-facing output to `out`
pub fn run<W: Write>(
    command: Command,
    archive_name: Option<&str>,
    settings: &Settings,
    out: &mut W,
) -> CommandResult<()> {
    if let Some(root) = &settings.store_root {
        if !root.is_dir() {
            return Err(CommandError::StoreDirMissing(root.clone()));
        }
    }

    let archive_file = |name: Option<&str>| -> CommandResult<PathBuf> {
        let name = name.ok_or(CommandError::MissingArchiveName(command.name()))?;
        let path = archive_path(name, settings.store_root.as_deref());
        debug!("{} archive {:?}", command.name(), path);
        Ok(path)
    };

    match command {
        Command::Create => create(&archive_file(archive_name)?, settings).map(|_| ()),
        Command::Update => update(&archive_file(archive_name)?, settings).map(|_| ()),
        Command::Info => info(&archive_file(archive_name)?, settings, out),
        Command::Delete => delete(&archive_file(archive_name)?, out),
        Command::List => list(settings, out),
    }
}

/// Local records to merge, or the fatal error explaining why there are none
fn local_records(settings: &Settings) -> CommandResult<Vec<PathBuf>> {
    let dir = settings.local_campaign_dir();
    if !dir.is_dir() {
        return Err(CommandError::LocalDirMissing(dir));
    }
    let records = local::discover_records(&dir)?;
    if records.is_empty() {
        return Err(CommandError::NoLocalRecords(dir));
    }
    Ok(records)
}

fn merge_into(
    archive: &mut Archive,
    settings: &Settings,
    records: &[PathBuf],
    fresh: bool,
) -> anyhow::Result<MergeStats> {
    let host = HostIdentity::current(settings.hostname.as_deref());
    let tx = archive.begin()?;
    if fresh {
        tx.init_schema(timefmt::now_nanos())?;
    }
    let stats = Merger::new(&tx, &host, &settings.working_dir, settings.codec)?.merge_all(records)?;
    tx.commit()?;
    Ok(stats)
}

/// Create a new archive and merge the local records into it
pub fn create(path: &Path, settings: &Settings) -> CommandResult<MergeStats> {
    info!("Create archive {:?}", path);
    if path.exists() {
        return Err(CommandError::ArchiveExists(path.to_path_buf()));
    }
    let records = local_records(settings)?;
    create_from(path, settings, &records)
}

/// Claim the archive file and fill it. Only a file this call created is
/// removed again when the merge fails.
fn create_from(
    path: &Path,
    settings: &Settings,
    records: &[PathBuf],
) -> CommandResult<MergeStats> {
    let mut archive = Archive::create(path).map_err(|e| {
        if path.exists() {
            CommandError::ArchiveExists(path.to_path_buf())
        } else {
            CommandError::from(e)
        }
    })?;
    let result = merge_into(&mut archive, settings, records, true);
    drop(archive);

    result.map_err(|e| {
        if let Err(rm) = fs::remove_file(path) {
            warn!("Cannot remove incomplete archive {:?}: {}", path, rm);
        }
        e.into()
    })
}

/// Merge the local records into an existing archive
pub fn update(path: &Path, settings: &Settings) -> CommandResult<MergeStats> {
    info!("Update archive {:?}", path);
    if !path.exists() {
        return Err(CommandError::ArchiveMissing(path.to_path_buf()));
    }
    let records = local_records(settings)?;

    let mut archive = Archive::open(path)?;
    check_compatible(&archive)?;
    Ok(merge_into(&mut archive, settings, &records, false)?)
}

fn check_compatible(archive: &Archive) -> CommandResult<()> {
    let info = archive.info()?;
    if !info.is_compatible() {
        return Err(CommandError::IncompatibleArchive {
            path: archive.path().to_path_buf(),
            id: info.id,
            version: info.version,
        });
    }
    Ok(())
}

/// Print the info record and the host/directory/dataset tree
pub fn info<W: Write>(path: &Path, settings: &Settings, out: &mut W) -> CommandResult<()> {
    if !path.exists() {
        return Err(CommandError::ArchiveMissing(path.to_path_buf()));
    }
    let archive = Archive::open_readonly(path)?;
    check_compatible(&archive)?;
    write_info(&archive, settings.verbose, out)?;
    Ok(())
}

fn write_info<W: Write>(archive: &Archive, verbose: u8, out: &mut W) -> anyhow::Result<()> {
    let info = archive.info()?;
    writeln!(
        out,
        "{}, version {}, created on {}",
        info.name,
        info.version,
        timefmt::display(info.ctime)
    )?;

    for host in archive.tree()? {
        writeln!(out, "hostname = {}   longhostname = {}", host.short_name, host.long_name)?;
        for dir in &host.directories {
            writeln!(out, "    dir = {}", dir.path)?;
            for dataset in &dir.datasets {
                writeln!(
                    out,
                    "        dataset = {}     created on {}",
                    dataset.name,
                    timefmt::display(dataset.ctime)
                )?;
                if verbose > 0 {
                    write_dataset_detail(archive, dataset, out)?;
                }
            }
        }
    }
    Ok(())
}

fn write_dataset_detail<W: Write>(
    archive: &Archive,
    dataset: &DatasetRow,
    out: &mut W,
) -> anyhow::Result<()> {
    for file in archive.files(dataset.id)? {
        let codec = Codec::from_flag(file.compression).map(|c| c.name()).unwrap_or("unknown");
        writeln!(
            out,
            "            file = {}  {} {} -> {} bytes  created on {}",
            file.name,
            codec,
            file.len_orig,
            file.len_compressed,
            timefmt::display(file.ctime)
        )?;
        if file.name == INDEX_FILE {
            let header = archive
                .read_file(dataset.id, &file.name)
                .and_then(|bytes| BpHeader::parse(&bytes));
            match header {
                Ok(h) => writeln!(out, "                {}", h.summary())?,
                Err(e) => debug!("No readable header in {}: {:#}", dataset.name, e),
            }
        }
    }
    let steps = archive.steps(dataset.id)?;
    if !steps.is_empty() {
        writeln!(out, "            steps = {}", steps.len())?;
    }
    Ok(())
}

/// Print every archive under the store root, relative to it
pub fn list<W: Write>(settings: &Settings, out: &mut W) -> CommandResult<()> {
    let root = settings.store_root.as_ref().ok_or(CommandError::StoreRootUnset)?;

    let mut archives = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Cannot list {:?}", root))?;
        let is_archive = entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some(ARCHIVE_EXTENSION);
        if is_archive {
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            archives.push(rel.to_path_buf());
        }
    }

    if archives.is_empty() {
        return Err(CommandError::EmptyStore(root.clone()));
    }
    for archive in archives {
        writeln!(out, "{}", archive.display()).context("Cannot write listing")?;
    }
    Ok(())
}

/// Remove an archive file
pub fn delete<W: Write>(path: &Path, out: &mut W) -> CommandResult<()> {
    if !path.exists() {
        return Err(CommandError::ArchiveMissing(path.to_path_buf()));
    }
    fs::remove_file(path).with_context(|| format!("Cannot delete {:?}", path))?;
    writeln!(out, "Delete archive {}", path.display()).context("Cannot write output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{RowCounts, StepRow};
    use crate::local::LocalRecorder;
    use std::io;
    use tempfile::TempDir;

    struct Env {
        _tmp: TempDir,
        settings: Settings,
        store: PathBuf,
        work: PathBuf,
    }

    /// Store root plus a working directory holding one BP dataset with
    /// `md.idx`, `data.0` and a recorded step
    fn env() -> Env {
        let tmp = TempDir::new().unwrap();
        let store = tmp.path().join("store");
        let work = tmp.path().join("work");
        fs::create_dir_all(&store).unwrap();

        let ds = work.join("sim.bp");
        fs::create_dir_all(&ds).unwrap();
        fs::write(ds.join("md.idx"), crate::header::sample_header(0, 0)).unwrap();
        fs::write(ds.join("md.0"), b"metadata").unwrap();
        fs::write(ds.join("data.0"), b"data").unwrap();

        let rec = LocalRecorder::open(&work.join("adios-campaign").join("rank0.acr")).unwrap();
        let id = rec.add_dataset("sim.bp", 0).unwrap();
        rec.add_step(
            id,
            &StepRow { engine_step: 0, phys_step: 100, phys_time: 0.5, ctime: 1_700_000_000_000_000 },
        )
        .unwrap();

        let settings = Settings {
            store_root: Some(store.clone()),
            working_dir: work.clone(),
            hostname: Some("testhost".to_string()),
            ..Settings::default()
        };
        Env { _tmp: tmp, settings, store, work }
    }

    fn counts(path: &Path) -> RowCounts {
        Archive::open_readonly(path).unwrap().counts().unwrap()
    }

    fn run_to_string(command: Command, name: Option<&str>, settings: &Settings) -> (CommandResult<()>, String) {
        let mut out = Vec::new();
        let result = run(command, name, settings, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_create_fresh_archive() {
        let env = env();
        run(Command::Create, Some("demo"), &env.settings, &mut io::sink()).unwrap();

        let c = counts(&env.store.join("demo.aca"));
        assert_eq!(c.hosts, 1);
        assert_eq!(c.directories, 1);
        assert_eq!(c.datasets, 1);
        assert!(c.files >= 2);
        assert_eq!(c.steps, 1);
    }

    #[test]
    fn test_update_twice_keeps_counts() {
        let env = env();
        run(Command::Create, Some("demo"), &env.settings, &mut io::sink()).unwrap();
        let path = env.store.join("demo.aca");

        run(Command::Update, Some("demo"), &env.settings, &mut io::sink()).unwrap();
        let first = counts(&path);
        run(Command::Update, Some("demo.aca"), &env.settings, &mut io::sink()).unwrap();
        assert_eq!(counts(&path), first);
    }

    #[test]
    fn test_create_existing_archive_fails() {
        let env = env();
        run(Command::Create, Some("demo"), &env.settings, &mut io::sink()).unwrap();
        let path = env.store.join("demo.aca");
        let before = fs::read(&path).unwrap();

        let err = run(Command::Create, Some("demo"), &env.settings, &mut io::sink()).unwrap_err();
        assert!(matches!(err, CommandError::ArchiveExists(_)));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_list_without_store_root() {
        let env = env();
        let settings = Settings { store_root: None, ..env.settings.clone() };
        let err = run(Command::List, None, &settings, &mut io::sink()).unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.to_string(), "Set --campaign_store for this command");
    }

    #[test]
    fn test_list_archives() {
        let env = env();
        let (result, _) = run_to_string(Command::List, None, &env.settings);
        assert_eq!(result.unwrap_err().exit_code(), 2);

        run(Command::Create, Some("b"), &env.settings, &mut io::sink()).unwrap();
        run(Command::Create, Some("a"), &env.settings, &mut io::sink()).unwrap();
        fs::write(env.store.join("notes.txt"), b"").unwrap();

        let (result, out) = run_to_string(Command::List, None, &env.settings);
        result.unwrap();
        assert_eq!(out, "a.aca\nb.aca\n");
    }

    #[test]
    fn test_update_missing_archive() {
        let env = env();
        let err = run(Command::Update, Some("nope"), &env.settings, &mut io::sink()).unwrap_err();
        assert!(matches!(err, CommandError::ArchiveMissing(_)));
        assert_eq!(err.exit_code(), 1);
        assert!(!env.store.join("nope.aca").exists());
    }

    #[test]
    fn test_create_without_local_records() {
        let env = env();
        fs::remove_file(env.work.join("adios-campaign").join("rank0.acr")).unwrap();
        let err = run(Command::Create, Some("demo"), &env.settings, &mut io::sink()).unwrap_err();
        assert!(matches!(err, CommandError::NoLocalRecords(_)));
        assert_eq!(err.exit_code(), 2);
        assert!(!env.store.join("demo.aca").exists());

        fs::remove_dir_all(env.work.join("adios-campaign")).unwrap();
        let err = run(Command::Create, Some("demo"), &env.settings, &mut io::sink()).unwrap_err();
        assert!(matches!(err, CommandError::LocalDirMissing(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_missing_store_dir() {
        let env = env();
        let settings = Settings {
            store_root: Some(env.store.join("absent")),
            ..env.settings.clone()
        };
        let err = run(Command::Info, Some("demo"), &settings, &mut io::sink()).unwrap_err();
        assert!(matches!(err, CommandError::StoreDirMissing(_)));
    }

    #[test]
    fn test_missing_archive_name() {
        let env = env();
        let err = run(Command::Update, None, &env.settings, &mut io::sink()).unwrap_err();
        assert!(matches!(err, CommandError::MissingArchiveName("update")));
    }

    #[test]
    fn test_info_prints_tree() {
        let env = env();
        run(Command::Create, Some("demo"), &env.settings, &mut io::sink()).unwrap();

        let (result, out) = run_to_string(Command::Info, Some("demo"), &env.settings);
        result.unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].starts_with("ADIOS Campaign Archive, version 1.1, created on "));
        assert!(lines[1].starts_with("hostname = testhost   longhostname = "));
        assert!(lines[2].starts_with("    dir = "));
        assert!(lines[3].starts_with("        dataset = sim.bp     created on "));
        assert_eq!(lines.len(), 4);

        let verbose = Settings { verbose: 1, ..env.settings.clone() };
        let (result, out) = run_to_string(Command::Info, Some("demo"), &verbose);
        result.unwrap();
        assert!(out.contains("file = md.idx  zlib 64 -> "));
        assert!(out.contains("BP5 written by 2.1.0, little endian"));
        assert!(out.contains("steps = 1"));
    }

    #[test]
    fn test_incompatible_archive() {
        let env = env();
        run(Command::Create, Some("demo"), &env.settings, &mut io::sink()).unwrap();
        let path = env.store.join("demo.aca");
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute("UPDATE info SET version = '0.9'", [])
            .unwrap();

        let err = run(Command::Update, Some("demo"), &env.settings, &mut io::sink()).unwrap_err();
        assert!(matches!(err, CommandError::IncompatibleArchive { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_delete() {
        let env = env();
        run(Command::Create, Some("demo"), &env.settings, &mut io::sink()).unwrap();

        let (result, out) = run_to_string(Command::Delete, Some("demo"), &env.settings);
        result.unwrap();
        assert!(out.starts_with("Delete archive "));
        assert!(!env.store.join("demo.aca").exists());

        let err = run(Command::Delete, Some("demo"), &env.settings, &mut io::sink()).unwrap_err();
        assert!(matches!(err, CommandError::ArchiveMissing(_)));
    }

    #[test]
    fn test_zstd_setting_is_used_for_payloads() {
        let env = env();
        let settings = Settings { codec: Codec::Zstd, ..env.settings.clone() };
        run(Command::Create, Some("demo"), &settings, &mut io::sink()).unwrap();

        let archive = Archive::open_readonly(&env.store.join("demo.aca")).unwrap();
        let dataset = archive.tree().unwrap()[0].directories[0].datasets[0].id;
        let files = archive.files(dataset).unwrap();
        assert!(files.iter().all(|f| f.compression == Codec::Zstd.flag()));
        assert_eq!(archive.read_file(dataset, "md.0").unwrap(), b"metadata");
    }

    #[test]
    fn test_create_that_loses_the_race_keeps_the_other_archive() {
        let env = env();
        run(Command::Create, Some("demo"), &env.settings, &mut io::sink()).unwrap();
        let path = env.store.join("demo.aca");
        let before = fs::read(&path).unwrap();

        // a second creator that passed the existence check before the first one finished
        let records = local_records(&env.settings).unwrap();
        let err = create_from(&path, &env.settings, &records).unwrap_err();
        assert!(matches!(err, CommandError::ArchiveExists(_)));
        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(counts(&path).datasets, 1);
    }

    #[test]
    fn test_failed_create_removes_its_own_file() {
        let env = env();
        let records = local_records(&env.settings).unwrap();
        let settings = Settings {
            working_dir: env.work.join("vanished"),
            ..env.settings.clone()
        };
        let path = env.store.join("demo.aca");

        assert!(create_from(&path, &settings, &records).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_archive_with_real_ctime_is_readable() {
        let env = env();
        run(Command::Create, Some("demo"), &env.settings, &mut io::sink()).unwrap();
        let path = env.store.join("demo.aca");
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute("UPDATE info SET ctime = 1700000000.123456", [])
            .unwrap();

        let (result, out) = run_to_string(Command::Info, Some("demo"), &env.settings);
        result.unwrap();
        assert!(out.starts_with("ADIOS Campaign Archive, version 1.1, created on 2023-11-1"));

        run(Command::Update, Some("demo"), &env.settings, &mut io::sink()).unwrap();
        assert_eq!(counts(&path).datasets, 1);
    }
}
