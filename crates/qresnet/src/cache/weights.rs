//! # Pretrained Weight Descriptors
//!
//! A descriptor names a downloadable checkpoint. Its cache file name is
//! derived from the URL, so changing a URL never reuses a stale file.

use crate::cache::disk::DiskCacheConfig;
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

const X25: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_SDLC);

/// Cache directory, under the cache root, holding all weight files.
pub const WEIGHTS_CACHE_DIR: &str = "weights";

/// Cache file name for a URL: ``[{name}-]{crc16(url)}-{basename(url)}``.
pub fn url_to_cache_key(
    name: Option<&str>,
    url: &str,
) -> String {
    let hash = X25.checksum(url.as_bytes());
    let base_name = url.rsplit_once('/').map_or(url, |(_, base)| base);
    match name {
        Some(n) => format!("{n}-{hash}-{base_name}"),
        None => format!("{hash}-{base_name}"),
    }
}

/// `'static` form of [`PretrainedWeightsDescriptor`], for prefab tables.
#[derive(Debug)]
pub struct StaticPretrainedWeightsDescriptor<'a> {
    /// Lookup name within a prefab.
    pub name: &'a str,
    /// Free-form description.
    pub description: &'a str,
    /// License identifier of the checkpoint.
    pub license: Option<&'a str>,
    /// Project the checkpoint comes from.
    pub origin: Option<&'a str>,
    /// Download URLs; the first is used.
    pub urls: &'a [&'a str],
}

impl StaticPretrainedWeightsDescriptor<'_> {
    /// Owned copy of this descriptor.
    pub fn to_descriptor(&self) -> PretrainedWeightsDescriptor {
        PretrainedWeightsDescriptor {
            name: self.name.to_string(),
            description: self.description.to_string(),
            license: self.license.map(str::to_string),
            origin: self.origin.map(str::to_string),
            urls: self.urls.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A downloadable checkpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PretrainedWeightsDescriptor {
    /// Lookup name within a prefab.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// License identifier of the checkpoint.
    pub license: Option<String>,
    /// Project the checkpoint comes from.
    pub origin: Option<String>,
    /// Download URLs; the first is used.
    pub urls: Vec<String>,
}

impl PretrainedWeightsDescriptor {
    /// The download URL.
    pub fn url(&self) -> anyhow::Result<&str> {
        match self.urls.first() {
            Some(url) => Ok(url),
            None => bail!("No download URL for weights: {}", self.name),
        }
    }

    /// The cache file name, see [`url_to_cache_key`].
    pub fn cache_key(&self) -> anyhow::Result<String> {
        Ok(url_to_cache_key(Some(&self.name), self.url()?))
    }

    /// Local path of the checkpoint, downloaded through `disk_cache` if missing.
    pub fn fetch_weights(
        &self,
        disk_cache: &DiskCacheConfig,
    ) -> anyhow::Result<PathBuf> {
        let resource = [WEIGHTS_CACHE_DIR.to_string(), self.cache_key()?];
        disk_cache.fetch_resource(self.url()?, &resource)
    }
}

/// `'static` form of [`PretrainedWeightsMap`].
#[derive(Debug)]
pub struct StaticPretrainedWeightsMap<'a> {
    /// The descriptors.
    pub items: &'a [&'a StaticPretrainedWeightsDescriptor<'a>],
}

impl StaticPretrainedWeightsMap<'_> {
    /// Owned copy, keyed by descriptor name.
    pub fn to_map(&self) -> PretrainedWeightsMap {
        PretrainedWeightsMap {
            items: self
                .items
                .iter()
                .map(|d| (d.name.to_string(), d.to_descriptor()))
                .collect(),
        }
    }
}

/// Named [`PretrainedWeightsDescriptor`]s.
#[derive(Debug, Clone)]
pub struct PretrainedWeightsMap {
    /// Descriptors by name.
    pub items: BTreeMap<String, PretrainedWeightsDescriptor>,
}

impl PretrainedWeightsMap {
    /// Find a descriptor, or fail listing the known names.
    pub fn try_lookup_by_name(
        &self,
        name: &str,
    ) -> anyhow::Result<PretrainedWeightsDescriptor> {
        match self.items.get(name) {
            Some(d) => Ok(d.clone()),
            None => bail!(
                "Descriptor not found: {}; known: {:?}",
                name,
                self.items.keys().collect::<Vec<_>>()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_WEIGHTS: StaticPretrainedWeightsDescriptor = StaticPretrainedWeightsDescriptor {
        name: "tv_in1k",
        description: "a test checkpoint",
        urls: &["https://example.com/models/net-1234.pth", "mirror"],
        license: Some("MIT"),
        origin: Some("https://example.com"),
    };

    #[test]
    fn test_to_descriptor() {
        let desc = TEST_WEIGHTS.to_descriptor();

        assert_eq!(desc.name, "tv_in1k");
        assert_eq!(desc.license.as_deref(), Some("MIT"));
        assert_eq!(desc.urls.len(), 2);
        assert_eq!(desc.url().unwrap(), "https://example.com/models/net-1234.pth");
    }

    #[test]
    fn test_cache_key() {
        let url = "https://example.com/models/net-1234.pth";
        let hash = X25.checksum(url.as_bytes());

        assert_eq!(url_to_cache_key(Some("tv"), url), format!("tv-{hash}-net-1234.pth"));
        assert_eq!(url_to_cache_key(None, url), format!("{hash}-net-1234.pth"));
        assert_eq!(
            TEST_WEIGHTS.to_descriptor().cache_key().unwrap(),
            format!("tv_in1k-{hash}-net-1234.pth")
        );
    }

    #[test]
    fn test_descriptor_without_urls() {
        let desc = PretrainedWeightsDescriptor {
            name: "empty".to_string(),
            description: String::new(),
            license: None,
            origin: None,
            urls: vec![],
        };
        assert!(desc.url().is_err());
        assert!(desc.cache_key().is_err());
    }

    #[test]
    fn test_fetch_weights_from_cache() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let disk_cache = DiskCacheConfig::new().with_cache_home(Some(home.path().to_path_buf()));

        let desc = TEST_WEIGHTS.to_descriptor();
        let expected = home
            .path()
            .join("qresnet")
            .join(WEIGHTS_CACHE_DIR)
            .join(desc.cache_key()?);
        std::fs::create_dir_all(expected.parent().unwrap())?;
        std::fs::write(&expected, b"weights")?;

        assert_eq!(desc.fetch_weights(&disk_cache)?, expected);

        Ok(())
    }

    #[test]
    fn test_weights_map() {
        let map = StaticPretrainedWeightsMap {
            items: &[&TEST_WEIGHTS],
        }
        .to_map();

        assert_eq!(
            map.try_lookup_by_name("tv_in1k").unwrap(),
            TEST_WEIGHTS.to_descriptor()
        );

        let err = map.try_lookup_by_name("other").unwrap_err();
        assert!(err.to_string().contains("Descriptor not found: other"), "{err}");
    }
}
