//! # Read-Through Download Cache
//!
//! Resources are addressed by a key path under
//! ``{cache_home}/{root_cache_key}``, and downloaded on first use.

use anyhow::{Context, bail};
use burn::config::Config;
use burn::data::network::downloader;
use std::fs::{File, remove_file};
use std::io::Write;
use std::path::PathBuf;

/// On-disk location of downloaded resources.
#[derive(Config, Debug)]
pub struct DiskCacheConfig {
    /// Directory name under the cache home.
    #[config(default = "\"qresnet\".to_string()")]
    pub root_cache_key: String,

    /// Cache home; ``~/.cache`` when unset.
    #[config(default = "None")]
    pub cache_home: Option<PathBuf>,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskCacheConfig {
    /// The root of this cache; not created.
    pub fn base_cache_dir(&self) -> anyhow::Result<PathBuf> {
        let cache_home = match &self.cache_home {
            Some(path) => path.clone(),
            None => dirs::home_dir()
                .context("unable to locate the home directory")?
                .join(".cache"),
        };
        Ok(cache_home.join(&self.root_cache_key))
    }

    /// The path of a resource key under [`Self::base_cache_dir`]; not created.
    pub fn resource_to_path(
        &self,
        resource_key: &[String],
    ) -> anyhow::Result<PathBuf> {
        let base = self.base_cache_dir()?;
        Ok(resource_key.iter().fold(base, |path, part| path.join(part)))
    }

    /// Return the cached path of a resource, downloading it from `url` on a miss.
    pub fn fetch_resource(
        &self,
        url: &str,
        resource_key: &[String],
    ) -> anyhow::Result<PathBuf> {
        let path = self.resource_to_path(resource_key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating cache dir {}", parent.display()))?;
        }
        try_cache_download_to_path(url, path)
    }
}

/// Download `url` to `cache_file_path`, unless the file is already present.
pub fn try_cache_download_to_path(
    url: &str,
    cache_file_path: PathBuf,
) -> anyhow::Result<PathBuf> {
    if cache_file_path.exists() {
        tracing::info!(path = %cache_file_path.display(), "cache hit");
        return Ok(cache_file_path);
    }

    let Some(file_name) = cache_file_path.file_name() else {
        bail!("cache path has no file name: {}", cache_file_path.display());
    };
    let file_name = file_name.to_string_lossy().to_string();

    tracing::info!(url, path = %cache_file_path.display(), "downloading");
    let bytes = downloader::download_file_as_bytes(url, &file_name);

    let mut output_file = File::create(&cache_file_path)?;
    if let Err(err) = output_file.write_all(&bytes) {
        remove_file(&cache_file_path)?;
        bail!("incomplete write of {}: {err}", cache_file_path.display());
    }

    Ok(cache_file_path)
}
