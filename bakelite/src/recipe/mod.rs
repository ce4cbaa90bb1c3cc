//! Declarative image recipes.
//!
//! A recipe is the per-project input to the build pipeline: base image pin,
//! environment invariants, dependency file names, storage directory set, and
//! the launch declaration. Loaded from JSON in the build context and
//! validated before any stage runs.

use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Recipe file name looked up in the context when none is given.
pub const DEFAULT_RECIPE_FILE: &str = "bakelite.json";

/// Base reference that skips base provisioning entirely.
pub const SCRATCH_BASE: &str = "scratch";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecipe {
    /// Image reference the build publishes under.
    pub name: String,
    /// Pinned base image reference (`registry/repo:exact-tag` or
    /// `...@sha256:...`), or `"scratch"`.
    pub base: String,
    /// Working directory for all later stages and the launched process.
    pub workdir: String,
    /// Environment invariants baked into the image (bytecode suppression,
    /// unbuffered stdio, and the like).
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// User-local tool directory prepended to PATH.
    #[serde(default)]
    pub tool_path: Option<String>,
    pub dependencies: DependencySpec,
    /// Context paths (relative, prefix match) excluded from the workspace
    /// copy.
    #[serde(default)]
    pub exclude: Vec<String>,
    pub storage: StorageSpec,
    /// Declared TCP port the launched process binds on all interfaces.
    pub expose: u16,
    /// Foreground process argv.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Package declaration file inside the context.
    pub declaration: String,
    /// Lock artifact inside the context. Must exist: installs are frozen.
    pub lock: String,
    /// Pinned toolchain bundles installed before the locked packages
    /// (compiler, build tools, the package-management utility itself).
    #[serde(default)]
    pub toolchain: Vec<ToolchainPin>,
    /// Absolute path inside the image where locked packages are unpacked.
    #[serde(default = "default_install_root")]
    pub install_root: String,
}

fn default_install_root() -> String {
    "/opt/bakelite/packages".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainPin {
    pub name: String,
    pub version: String,
    pub url: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSpec {
    /// Storage prefix; defaults to the working directory.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Directory names created under the prefix (e.g. `uploads`,
    /// `chroma_db`).
    pub directories: Vec<String>,
}

impl ImageRecipe {
    pub fn load(path: &Path) -> BakeliteResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            BakeliteError::Config(format!("reading recipe {}: {e}", path.display()))
        })?;
        let recipe: ImageRecipe = serde_json::from_slice(&bytes)
            .map_err(|e| BakeliteError::Config(format!("parsing recipe {}: {e}", path.display())))?;
        recipe.validate()?;
        Ok(recipe)
    }

    pub fn is_scratch_base(&self) -> bool {
        self.base == SCRATCH_BASE
    }

    pub fn storage_prefix(&self) -> &str {
        self.storage.prefix.as_deref().unwrap_or(&self.workdir)
    }

    /// Absolute storage paths inside the image rootfs.
    pub fn storage_paths(&self) -> Vec<String> {
        let prefix = self.storage_prefix().trim_end_matches('/');
        self.storage
            .directories
            .iter()
            .map(|dir| format!("{prefix}/{dir}"))
            .collect()
    }

    pub fn validate(&self) -> BakeliteResult<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c))
        {
            return Err(BakeliteError::Config(format!(
                "invalid image name: {:?}",
                self.name
            )));
        }

        validate_base_pin(&self.base)?;

        if !self.workdir.starts_with('/') {
            return Err(BakeliteError::Config(format!(
                "workdir must be absolute: {:?}",
                self.workdir
            )));
        }
        if let Some(tool_path) = &self.tool_path
            && !tool_path.starts_with('/')
        {
            return Err(BakeliteError::Config(format!(
                "tool_path must be absolute: {tool_path:?}"
            )));
        }

        if self.dependencies.declaration.is_empty() || self.dependencies.lock.is_empty() {
            return Err(BakeliteError::Config(
                "dependency declaration and lock file names are required".into(),
            ));
        }
        if !self.dependencies.install_root.starts_with('/') {
            return Err(BakeliteError::Config(format!(
                "install_root must be absolute: {:?}",
                self.dependencies.install_root
            )));
        }
        for pin in &self.dependencies.toolchain {
            if pin.sha256.len() != 64 || !pin.sha256.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(BakeliteError::Config(format!(
                    "toolchain pin {} has no valid sha256",
                    pin.name
                )));
            }
        }

        if self.storage.directories.is_empty() {
            return Err(BakeliteError::Config(
                "storage.directories must not be empty".into(),
            ));
        }
        for dir in &self.storage.directories {
            if dir.is_empty() || dir.starts_with('/') || dir.contains("..") {
                return Err(BakeliteError::Config(format!(
                    "storage directory must be a relative name: {dir:?}"
                )));
            }
        }

        if self.expose == 0 {
            return Err(BakeliteError::Config("expose must be a non-zero port".into()));
        }
        if self.command.is_empty() {
            return Err(BakeliteError::Config("command must not be empty".into()));
        }

        Ok(())
    }
}

/// Reject floating base references. Reproducibility requires an exact tag or
/// a digest; `latest` (implicit or explicit) silently drifts.
fn validate_base_pin(base: &str) -> BakeliteResult<()> {
    if base == SCRATCH_BASE {
        return Ok(());
    }
    if base.contains("@sha256:") {
        return Ok(());
    }
    if !base.contains(':') {
        // No tag at all means an implicit `latest`.
        return Err(BakeliteError::Config(format!(
            "base image must be version-pinned (exact tag or digest): {base:?}"
        )));
    }
    let tag = base.rsplit(':').next().filter(|tag| !tag.contains('/'));
    match tag {
        Some("latest") | None => Err(BakeliteError::Config(format!(
            "base image must be version-pinned (exact tag or digest): {base:?}"
        ))),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ImageRecipe {
        serde_json::from_value(serde_json::json!({
            "name": "ragserver",
            "base": "docker.io/library/python:3.12-slim",
            "workdir": "/app",
            "env": {
                "PYTHONDONTWRITEBYTECODE": "1",
                "PYTHONUNBUFFERED": "1"
            },
            "tool_path": "/root/.local/bin",
            "dependencies": {
                "declaration": "manifest.json",
                "lock": "manifest.lock.json"
            },
            "storage": { "directories": ["uploads", "chroma_db"] },
            "expose": 8000,
            "command": ["uvicorn", "app.main:app", "--host", "0.0.0.0", "--port", "8000"]
        }))
        .unwrap()
    }

    #[test]
    fn sample_recipe_validates() {
        let recipe = sample();
        recipe.validate().unwrap();
        assert_eq!(
            recipe.storage_paths(),
            vec!["/app/uploads".to_string(), "/app/chroma_db".to_string()]
        );
        assert_eq!(recipe.dependencies.install_root, "/opt/bakelite/packages");
    }

    #[test]
    fn floating_base_is_rejected() {
        let mut recipe = sample();
        recipe.base = "python:latest".into();
        assert!(recipe.validate().is_err());
        recipe.base = "python".into();
        assert!(recipe.validate().is_err());
        recipe.base = "python@sha256:abcd".into();
        recipe.validate().unwrap();
        recipe.base = SCRATCH_BASE.into();
        recipe.validate().unwrap();
    }

    #[test]
    fn storage_directories_must_be_relative() {
        let mut recipe = sample();
        recipe.storage.directories = vec!["/abs".into()];
        assert!(recipe.validate().is_err());
        recipe.storage.directories = vec![];
        assert!(recipe.validate().is_err());
    }

    #[test]
    fn launch_declaration_is_required() {
        let mut recipe = sample();
        recipe.expose = 0;
        assert!(recipe.validate().is_err());

        let mut recipe = sample();
        recipe.command.clear();
        assert!(recipe.validate().is_err());
    }
}
