//! Per-user configuration and archive path resolution
//!
//! The config file lives at `~/.config/adios2/campaign.cfg` and holds
//! whitespace separated `key value` lines:
//!
//! ```text
//! campaignstorepath ~/campaigns
//! compression zstd
//! ```

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::codec::Codec;
use crate::ARCHIVE_EXTENSION;

/// Location of the config file below the home directory
pub const CONFIG_RELATIVE_PATH: &str = ".config/adios2/campaign.cfg";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignConfig {
    /// Default root directory for archives
    pub store_path: Option<PathBuf>,
    /// Codec for new file payloads
    pub codec: Option<Codec>,
}

impl CampaignConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_RELATIVE_PATH))
    }

    /// Load the per-user config. No home directory or no file means an
    /// empty config.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {:?}", path);
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {:?}", path))?;
        Self::parse(&text, dirs::home_dir().as_deref())
            .with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn parse(text: &str, home: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        for line in text.lines() {
            let mut tokens = line.split_whitespace();
            let (Some(key), Some(value)) = (tokens.next(), tokens.next()) else {
                continue;
            };
            match key {
                "campaignstorepath" => {
                    config.store_path = Some(normalize_store(&expand_home(value, home)));
                }
                "compression" => config.codec = Some(Codec::from_name(value)?),
                k if k.starts_with('#') => {}
                other => debug!("Ignoring config key {}", other),
            }
        }
        Ok(config)
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_home(value: &str, home: Option<&Path>) -> PathBuf {
    match (value.strip_prefix('~'), home) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(value),
    }
}

/// Drop trailing slashes from a store root, keeping a bare `/`
pub fn normalize_store(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() && s.starts_with('/') {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}

/// Full path of an archive: `.aca` is appended when missing and the name
/// is placed under the store root if one is set
pub fn archive_path(name: &str, store: Option<&Path>) -> PathBuf {
    let suffix = format!(".{}", ARCHIVE_EXTENSION);
    let file_name = if name.ends_with(&suffix) {
        name.to_string()
    } else {
        format!("{}{}", name, suffix)
    };
    match store {
        Some(root) => root.join(file_name),
        None => PathBuf::from(file_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_store_path_and_codec() {
        let text = "# campaign settings\n\ncampaignstorepath /data/campaigns///\ncompression zstd\nunknown 5\n";
        let config = CampaignConfig::parse(text, None).unwrap();
        assert_eq!(config.store_path, Some(PathBuf::from("/data/campaigns")));
        assert_eq!(config.codec, Some(Codec::Zstd));
    }

    #[test]
    fn test_parse_expands_home() {
        let config =
            CampaignConfig::parse("campaignstorepath ~/campaigns", Some(Path::new("/home/u"))).unwrap();
        assert_eq!(config.store_path, Some(PathBuf::from("/home/u/campaigns")));
    }

    #[test]
    fn test_parse_rejects_bad_codec() {
        assert!(CampaignConfig::parse("compression lzma", None).is_err());
    }

    #[test]
    fn test_missing_file_is_empty_config() {
        let tmp = TempDir::new().unwrap();
        let config = CampaignConfig::load_from(&tmp.path().join("campaign.cfg")).unwrap();
        assert_eq!(config, CampaignConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("campaign.cfg");
        fs::write(&path, "campaignstorepath /store\n").unwrap();
        let config = CampaignConfig::load_from(&path).unwrap();
        assert_eq!(config.store_path, Some(PathBuf::from("/store")));
        assert_eq!(config.codec, None);
    }

    #[test]
    fn test_archive_path() {
        assert_eq!(archive_path("demo", None), PathBuf::from("demo.aca"));
        assert_eq!(archive_path("demo.aca", None), PathBuf::from("demo.aca"));
        assert_eq!(
            archive_path("proj/demo", Some(Path::new("/store"))),
            PathBuf::from("/store/proj/demo.aca")
        );
    }

    #[test]
    fn test_normalize_store_root() {
        assert_eq!(normalize_store(Path::new("/")), PathBuf::from("/"));
        assert_eq!(normalize_store(Path::new("rel/dir/")), PathBuf::from("rel/dir"));
    }
}
