//! Fatal command errors and their exit codes

use std::path::PathBuf;
use thiserror::Error;

/// Generic failure
pub const EXIT_FAILURE: i32 = 1;
/// Nothing to do: no local records, or an empty store
pub const EXIT_NOTHING_TO_DO: i32 = 2;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("archive {} already exists", .0.display())]
    ArchiveExists(PathBuf),

    #[error("archive {} does not exist", .0.display())]
    ArchiveMissing(PathBuf),

    #[error("archive {} is not a compatible campaign archive ({id} version {version})", .path.display())]
    IncompatibleArchive {
        path: PathBuf,
        id: String,
        version: String,
    },

    #[error("Campaign directory {} does not exist", .0.display())]
    StoreDirMissing(PathBuf),

    #[error("Local campaign data '{}' does not exist. Run this command where the code was executed.", .0.display())]
    LocalDirMissing(PathBuf),

    #[error("There are no campaign data files in {}", .0.display())]
    NoLocalRecords(PathBuf),

    #[error("Set --campaign_store for this command")]
    StoreRootUnset,

    #[error("There are no campaign archives in {}", .0.display())]
    EmptyStore(PathBuf),

    #[error("Missing campaign name for the {0} command")]
    MissingArchiveName(&'static str),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl CommandError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoLocalRecords(_) | Self::EmptyStore(_) => EXIT_NOTHING_TO_DO,
            _ => EXIT_FAILURE,
        }
    }
}

pub type CommandResult<T> = std::result::Result<T, CommandError>;
