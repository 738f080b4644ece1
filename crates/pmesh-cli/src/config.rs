//! `pmesh.toml` project configuration (SPEC_FULL.md §4.6/§6.3).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pmesh_cbt::CbtCapacity;
use serde::Deserialize;

fn default_triangle_size_px() -> f32 {
    8.0
}

fn default_max_depth() -> u32 {
    24
}

fn default_cbt_capacity() -> String {
    "k128".to_string()
}

fn default_cage() -> String {
    "models/planet.ccm".to_string()
}

/// Parse a `cbt_capacity` string, shared by `pmesh.toml` parsing and
/// the `bench` subcommand's own `--cbt-capacity` flag.
pub fn parse_cbt_capacity(s: &str) -> Result<CbtCapacity> {
    match s.to_lowercase().as_str() {
        "k128" => Ok(CbtCapacity::K128),
        "k256" => Ok(CbtCapacity::K256),
        "k512" => Ok(CbtCapacity::K512),
        "m1" => Ok(CbtCapacity::M1),
        other => anyhow::bail!("unknown cbt_capacity {:?}, expected one of k128/k256/k512/m1", other),
    }
}

/// The deserialized shape of `pmesh.toml`. Every field has a default,
/// matching `core-config`'s tolerance for an absent or partial file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Cage file, relative to the project directory.
    #[serde(default = "default_cage")]
    pub cage: String,
    /// Target on-screen longest-edge length, in pixels.
    #[serde(default = "default_triangle_size_px")]
    pub triangle_size_px: f32,
    /// Subdivision depth ceiling.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// One of `k128`, `k256`, `k512`, `m1` (case-insensitive).
    #[serde(default = "default_cbt_capacity")]
    pub cbt_capacity: String,
    /// LEB matrix cache depth; defaults to `max_depth` when absent.
    pub leb_cache_depth: Option<u32>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            cage: default_cage(),
            triangle_size_px: default_triangle_size_px(),
            max_depth: default_max_depth(),
            cbt_capacity: default_cbt_capacity(),
            leb_cache_depth: None,
        }
    }
}

impl ProjectConfig {
    /// Read `<project_dir>/pmesh.toml`, falling back to all defaults
    /// when the file doesn't exist.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join("pmesh.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Resolve [`ProjectConfig::cage`] against the project directory.
    pub fn cage_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.cage)
    }

    /// Parse [`ProjectConfig::cbt_capacity`] into a [`CbtCapacity`].
    pub fn cbt_capacity(&self) -> Result<CbtCapacity> {
        parse_cbt_capacity(&self.cbt_capacity)
    }

    /// Resolve [`ProjectConfig::leb_cache_depth`], defaulting to
    /// `max_depth`.
    pub fn leb_cache_depth(&self) -> u32 {
        self.leb_cache_depth.unwrap_or(self.max_depth)
    }
}
