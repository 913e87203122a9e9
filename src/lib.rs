//! Campaign Manager - consolidates local run records into a campaign archive
//!
//! Every instrumented run leaves a small record of the datasets and steps it
//! wrote. The merge pass folds any number of these records into one durable,
//! compressed SQLite archive keyed by host, directory, dataset and file/step.

use std::path::PathBuf;

pub mod archive;
pub mod classify;
pub mod codec;
pub mod commands;
pub mod config;
pub mod error;
pub mod header;
pub mod host;
pub mod local;
pub mod merge;
pub mod timefmt;

use codec::Codec;

/// Kind tag written into the archive `info` table
pub const ARCHIVE_ID: &str = "ACA";
pub const ARCHIVE_NAME: &str = "ADIOS Campaign Archive";
pub const ARCHIVE_VERSION: &str = "1.1";
pub const ARCHIVE_EXTENSION: &str = "aca";

/// Kind tag written into a local run record `info` table
pub const RECORD_ID: &str = "ACR";
pub const RECORD_NAME: &str = "ADIOS Campaign Recording";
pub const RECORD_VERSION: &str = "1.1";
pub const RECORD_EXTENSION: &str = "acr";

/// Subdirectory of the working directory that holds local run records
pub const LOCAL_CAMPAIGN_DIR: &str = "adios-campaign";

/// Row id of a host in the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(pub i64);

/// Row id of a directory in the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirId(pub i64);

/// Row id of a dataset in the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId(pub i64);

/// Runtime settings for one command invocation
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory holding archives, if any
    pub store_root: Option<PathBuf>,
    /// Directory the runs were executed from
    pub working_dir: PathBuf,
    /// Explicit short host name, bypasses host resolution
    pub hostname: Option<String>,
    /// Codec for newly stored file payloads
    pub codec: Codec,
    /// Verbosity level from the command line
    pub verbose: u8,
}

impl Settings {
    /// Directory holding the local run records
    pub fn local_campaign_dir(&self) -> PathBuf {
        self.working_dir.join(LOCAL_CAMPAIGN_DIR)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_root: None,
            working_dir: PathBuf::from("."),
            hostname: None,
            codec: Codec::default(),
            verbose: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_campaign_dir_is_under_working_dir() {
        let settings = Settings {
            working_dir: PathBuf::from("/runs/sim"),
            ..Settings::default()
        };
        assert_eq!(
            settings.local_campaign_dir(),
            PathBuf::from("/runs/sim/adios-campaign")
        );
    }
}
