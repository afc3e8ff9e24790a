//! Layered configuration loading.
//!
//! Layers are merged in this order, later layers overriding earlier ones:
//!
//! 1. the embedded default TOML document,
//! 2. `<dir>/<name>.toml` and `<dir>/<name>.json` for every search directory,
//! 3. an optional leaf file given explicitly by the caller.
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use figment::{
    providers::{Format, Json, Toml},
    Figment,
};
use tracing::info;

fn merge_file(figment: Figment, path: &Path) -> Figment {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => figment.merge(Toml::file(path)),
        _ => figment.merge(Json::file(path)),
    }
}

fn merge_dir(figment: Figment, name: &str, dir: &Path) -> Figment {
    let mut figment = figment;
    for ext in ["toml", "json"] {
        let path = dir.join(format!("{name}.{ext}"));
        if path.exists() {
            info!("loading config file: {}", path.display());
            figment = merge_file(figment, &path);
        }
    }
    figment
}

fn search_load_config(
    name: &str,
    search_dirs: &[PathBuf],
    default_toml: &str,
    leaf_config: Option<&Path>,
) -> Result<Figment> {
    let mut figment = Figment::from(Toml::string(default_toml));
    for dir in search_dirs {
        figment = merge_dir(figment, name, dir);
    }
    if let Some(path) = leaf_config {
        if !path.exists() {
            bail!("config file not found: {}", path.display());
        }
        info!("loading config file: {}", path.display());
        figment = merge_file(figment, path);
    }
    Ok(figment)
}

/// Load the configuration named `name`, searching `/etc/<name>` and the
/// current directory.
pub fn load_config(name: &str, default_toml: &str, leaf_config: Option<&Path>) -> Result<Figment> {
    let dirs = [PathBuf::from(format!("/etc/{name}")), PathBuf::from(".")];
    search_load_config(name, &dirs, default_toml, leaf_config)
}
