//! # Utility Module
//!
//! Glue between the CLI, the configuration and the core: dissector
//! filtering, registry building and output directory checks.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Result, anyhow};
use tracing::{debug, warn};

use crate::cli::{MetadataBackend, ScanModeArg};
use crate::config::Config;
use crate::dissect::{self, DissectorRegistry};
use crate::engine::ScanMode;
use crate::metadata::MetadataBackendKind;

/// Convert CLI metadata backend to internal enum
pub fn backend_from_cli(backend: MetadataBackend) -> MetadataBackendKind {
    match backend {
        MetadataBackend::Jsonl => MetadataBackendKind::Jsonl,
        MetadataBackend::Csv => MetadataBackendKind::Csv,
    }
}

pub fn mode_from_cli(mode: ScanModeArg) -> ScanMode {
    match mode {
        ScanModeArg::Exhaustive => ScanMode::Exhaustive,
        ScanModeArg::Indexed => ScanMode::Indexed,
    }
}

/// Ensure output directory exists and is writable, warning on unsafe permissions.
pub fn ensure_output_dir(path: &Path) -> Result<()> {
    if path.exists() {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(anyhow!(
                "output path is not a directory: {}",
                path.display()
            ));
        }
    } else {
        std::fs::create_dir_all(path)?;
    }
    let metadata = std::fs::metadata(path)?;

    let probe_path = path.join(".binsift_write_probe");
    match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe_path)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe_path);
        }
        Err(err) => {
            return Err(anyhow!(
                "output directory is not writable: {} ({})",
                path.display(),
                err
            ));
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode();
        if mode & 0o002 != 0 {
            warn!("output directory is world-writable: {}", path.display());
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    Ok(())
}

/// Keep only the configured dissectors named in `allow_list`, preserving
/// configuration order. Returns allow-list entries that name no known
/// dissector.
pub fn filter_dissectors(cfg: &mut Config, allow_list: Option<&[String]>) -> Vec<String> {
    let Some(list) = allow_list else {
        return Vec::new();
    };
    let allow: BTreeSet<String> = list
        .iter()
        .map(|entry| entry.trim().to_ascii_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect();

    let known: BTreeSet<&str> = dissect::builtin_names().collect();
    let unknown: Vec<String> = allow
        .iter()
        .filter(|entry| !known.contains(entry.as_str()))
        .cloned()
        .collect();

    cfg.dissectors
        .retain(|name| allow.contains(&name.trim().to_ascii_lowercase()));
    unknown
}

pub fn build_dissector_registry(cfg: &Config) -> Result<DissectorRegistry> {
    let registry = DissectorRegistry::from_names(&cfg.dissectors)?;
    for d in registry.iter() {
        debug!(
            "dissector {} category={} priority={} grouped={}",
            d.name(),
            d.category().as_str(),
            d.priority().0,
            d.should_group_in_one_file()
        );
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::{build_dissector_registry, ensure_output_dir, filter_dissectors};
    use crate::config;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn filters_allowed_dissectors() {
        let mut cfg = config::load_config(None).expect("config").config;
        let unknown = filter_dissectors(&mut cfg, Some(&["PNG".to_string(), "pdf".to_string()]));
        assert!(unknown.is_empty());
        assert_eq!(cfg.dissectors, vec!["pdf", "png"]);
        let registry = build_dissector_registry(&cfg).expect("registry");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn reports_unknown_dissectors() {
        let mut cfg = config::load_config(None).expect("config").config;
        let unknown = filter_dissectors(&mut cfg, Some(&["pdf".to_string(), "nope".to_string()]));
        assert_eq!(unknown, vec!["nope"]);
        assert_eq!(cfg.dissectors, vec!["pdf"]);
    }

    #[test]
    fn no_list_keeps_everything() {
        let mut cfg = config::load_config(None).expect("config").config;
        assert!(filter_dissectors(&mut cfg, None).is_empty());
        assert_eq!(cfg.dissectors.len(), 4);
    }

    #[test]
    fn ensures_output_dir_is_writable() {
        let dir = tempdir().expect("tempdir");
        ensure_output_dir(dir.path()).expect("ensure output dir");
    }

    #[test]
    fn rejects_output_path_that_is_file() {
        let dir = tempdir().expect("tempdir");
        let file_path = dir.path().join("output.txt");
        let _ = File::create(&file_path).expect("create file");
        let err = ensure_output_dir(&file_path).expect_err("should fail");
        assert!(err.to_string().contains("not a directory"));
    }
}
