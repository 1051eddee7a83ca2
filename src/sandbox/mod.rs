//! Per-session sandbox directories.
//!
//! Each session gets its own directory under the sandbox root, holding a
//! minimal manifest that pins one trusted registry. [`ProvisionedSandbox`]
//! owns the directory: [`ProvisionedSandbox::teardown`] removes it, and if
//! the value is dropped without teardown (early return, panic unwinding)
//! the directory is removed synchronously in `Drop`.

pub mod installer;
pub mod manifest;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Registry written into every sandbox unless configured otherwise.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Provisioner configuration.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Parent directory for session sandboxes.
    pub root: PathBuf,
    /// The only registry the package manager may contact.
    pub registry: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: crate::config::default_sandbox_root(),
            registry: DEFAULT_REGISTRY.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to create sandbox root {path}: {source}")]
    CreateRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create sandbox directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write sandbox manifest in {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to remove sandbox {path}: {source}")]
    Teardown {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Refusing to remove {path}: not a sandbox under {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

/// Creates and destroys sandbox directories.
#[derive(Debug, Clone)]
pub struct SandboxProvisioner {
    config: SandboxConfig,
}

impl SandboxProvisioner {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn registry(&self) -> &str {
        &self.config.registry
    }

    /// Create a fresh directory for `session_id` and write its manifest.
    ///
    /// The directory name carries a random suffix, so a reused session id
    /// never lands in a previous session's directory. If the manifest cannot
    /// be written the directory is removed before returning the error.
    pub async fn provision(&self, session_id: &str) -> Result<ProvisionedSandbox, SandboxError> {
        let root = &self.config.root;
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|source| SandboxError::CreateRoot {
                path: root.clone(),
                source,
            })?;

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let path = root.join(format!("{}-{}", session_id, &suffix[..8]));

        let mut builder = tokio::fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(0o700);
        builder
            .create(&path)
            .await
            .map_err(|source| SandboxError::CreateDir {
                path: path.clone(),
                source,
            })?;

        if let Err(source) = manifest::write_initial(&path, session_id, &self.config.registry).await {
            if let Err(e) = remove_tree(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial sandbox");
            }
            return Err(SandboxError::Manifest { path, source });
        }

        tracing::debug!(session_id, path = %path.display(), "Sandbox provisioned");
        Ok(ProvisionedSandbox {
            path,
            root: root.clone(),
            torn_down: false,
        })
    }

    /// Remove a sandbox by path. A missing path is not an error.
    pub async fn teardown_path(&self, path: &Path) -> Result<(), SandboxError> {
        teardown_under(&self.config.root, path).await
    }
}

/// Scoped ownership of one sandbox directory.
#[derive(Debug)]
pub struct ProvisionedSandbox {
    path: PathBuf,
    root: PathBuf,
    torn_down: bool,
}

impl ProvisionedSandbox {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory. Runs at most once; `Drop` does nothing after.
    pub async fn teardown(mut self) -> Result<(), SandboxError> {
        self.torn_down = true;
        teardown_under(&self.root, &self.path).await
    }
}

impl Drop for ProvisionedSandbox {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Sandbox drop cleanup failed");
            }
        }
    }
}

async fn teardown_under(root: &Path, path: &Path) -> Result<(), SandboxError> {
    if path == root || !path.starts_with(root) {
        return Err(SandboxError::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        });
    }
    remove_tree(path).await.map_err(|source| SandboxError::Teardown {
        path: path.to_path_buf(),
        source,
    })
}

async fn remove_tree(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisioner(root: &Path) -> SandboxProvisioner {
        SandboxProvisioner::new(SandboxConfig {
            root: root.to_path_buf(),
            registry: DEFAULT_REGISTRY.to_string(),
        })
    }

    #[tokio::test]
    async fn test_provision_creates_unique_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let p = provisioner(tmp.path());
        let a = p.provision("same").await.unwrap();
        let b = p.provision("same").await.unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().join(manifest::MANIFEST_FILE).exists());
        assert!(a.path().starts_with(tmp.path()));
        a.teardown().await.unwrap();
        b.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_missing_path_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let p = provisioner(tmp.path());
        let sandbox = p.provision("s").await.unwrap();
        let path = sandbox.path().to_path_buf();
        sandbox.teardown().await.unwrap();
        assert!(!path.exists());
        p.teardown_path(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = {
            let sandbox = provisioner(tmp.path()).provision("s").await.unwrap();
            sandbox.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_teardown_refuses_outside_root() {
        let tmp = tempfile::tempdir().unwrap();
        let p = provisioner(&tmp.path().join("root"));
        let err = p.teardown_path(tmp.path()).await.unwrap_err();
        assert!(matches!(err, SandboxError::OutsideRoot { .. }));
        let err = p.teardown_path(&tmp.path().join("root")).await.unwrap_err();
        assert!(matches!(err, SandboxError::OutsideRoot { .. }));
    }

    #[tokio::test]
    async fn test_provision_fails_when_root_is_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let err = provisioner(&file).provision("s").await.unwrap_err();
        assert!(matches!(
            err,
            SandboxError::CreateRoot { .. } | SandboxError::CreateDir { .. }
        ));
    }
}
