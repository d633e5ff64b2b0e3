//! Process-wide settings, resolved once from the command line and environment.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Result, bail};

use crate::locate::DEFAULT_WORKERS;

/// The only storage driver whose layout is understood.
pub const STORAGE_DRIVER: &str = "overlay2";

pub const DEFAULT_DOCKER_ROOT: &str = "/var/lib/docker";

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Docker's data root.
    pub docker_root: PathBuf,
    /// docker CLI binary used to query the daemon.
    pub docker_bin: String,
    /// Directory-walk pool size for file search.
    pub workers: usize,
    /// Emit JSON instead of tables: `-` for stdout, else a file path.
    pub json: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            docker_root: PathBuf::from(DEFAULT_DOCKER_ROOT),
            docker_bin: "docker".into(),
            workers: DEFAULT_WORKERS,
            json: None,
        }
    }
}

impl AppConfig {
    /// `<root>/image/overlay2/layerdb`
    pub fn layerdb_root(&self) -> PathBuf {
        self.docker_root
            .join("image")
            .join(STORAGE_DRIVER)
            .join("layerdb")
    }

    /// `<root>/overlay2`
    pub fn storage_root(&self) -> PathBuf {
        self.docker_root.join(STORAGE_DRIVER)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("--workers must be at least 1");
        }
        if self.docker_bin.trim().is_empty() {
            bail!("docker binary must not be empty");
        }
        Ok(())
    }
}

/// Options the command line can override. Environment fallbacks are applied
/// by clap before this is built.
#[derive(Debug, Default)]
pub struct CliOverrides<'a> {
    pub docker_root: Option<&'a Path>,
    pub docker_bin: Option<&'a str>,
    pub workers: Option<usize>,
    pub json: Option<&'a str>,
}

pub fn resolve(overrides: &CliOverrides<'_>) -> Result<AppConfig> {
    let mut cfg = AppConfig::default();
    if let Some(root) = overrides.docker_root {
        cfg.docker_root = root.to_path_buf();
    }
    if let Some(bin) = overrides.docker_bin {
        cfg.docker_bin = bin.to_string();
    }
    if let Some(workers) = overrides.workers {
        cfg.workers = workers;
    }
    cfg.json = overrides.json.map(str::to_string);
    cfg.validate()?;
    Ok(cfg)
}

pub fn init_from_cli(overrides: &CliOverrides<'_>) -> Result<()> {
    let cfg = resolve(overrides)?;
    if CONFIG.set(cfg).is_err() {
        bail!("configuration already initialised");
    }
    Ok(())
}

/// The configuration set by [`init_from_cli`], or defaults if it never ran.
pub fn get() -> &'static AppConfig {
    CONFIG.get_or_init(AppConfig::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_derived_paths() {
        let cfg = resolve(&CliOverrides::default()).unwrap();
        assert_eq!(cfg.docker_root, PathBuf::from("/var/lib/docker"));
        assert_eq!(
            cfg.layerdb_root(),
            PathBuf::from("/var/lib/docker/image/overlay2/layerdb")
        );
        assert_eq!(cfg.storage_root(), PathBuf::from("/var/lib/docker/overlay2"));
        assert_eq!(cfg.workers, 10);
        assert_eq!(cfg.json, None);
    }

    #[test]
    fn test_overrides_apply() {
        let cfg = resolve(&CliOverrides {
            docker_root: Some(Path::new("/srv/docker")),
            docker_bin: Some("/usr/local/bin/docker"),
            workers: Some(4),
            json: Some("-"),
        })
        .unwrap();
        assert_eq!(cfg.storage_root(), PathBuf::from("/srv/docker/overlay2"));
        assert_eq!(cfg.docker_bin, "/usr/local/bin/docker");
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.json.as_deref(), Some("-"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = resolve(&CliOverrides {
            workers: Some(0),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("workers"));
    }
}
