//! Sandbox package manifest and package-manager settings.
//!
//! The manifest format is internal to a sandbox and not a compatibility
//! surface.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const MANIFEST_FILE: &str = "package.json";
pub const NPMRC_FILE: &str = ".npmrc";

/// Minimal `package.json`. Starts with zero dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub private: bool,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new(session_id: &str) -> Self {
        Self {
            name: format!("gg-sandbox-{}", session_id.to_ascii_lowercase()),
            version: "1.0.0".to_string(),
            private: true,
            dependencies: BTreeMap::new(),
        }
    }

    pub async fn read(dir: &Path) -> io::Result<Self> {
        let bytes = tokio::fs::read(dir.join(MANIFEST_FILE)).await?;
        serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub async fn write(&self, dir: &Path) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(dir.join(MANIFEST_FILE), json).await
    }
}

/// Package-manager config pinning a single registry and disabling audit,
/// funding, update checks and lifecycle scripts.
pub fn npmrc(registry: &str) -> String {
    format!(
        "registry={}\naudit=false\nfund=false\nupdate-notifier=false\nignore-scripts=true\n",
        registry
    )
}

/// Write the initial manifest and package-manager config into `dir`.
pub async fn write_initial(dir: &Path, session_id: &str, registry: &str) -> io::Result<()> {
    Manifest::new(session_id).write(dir).await?;
    tokio::fs::write(dir.join(NPMRC_FILE), npmrc(registry)).await
}

/// Append `(name, range)` pairs to the manifest in `dir`.
pub async fn add_dependencies(dir: &Path, deps: &[(String, String)]) -> io::Result<()> {
    let mut manifest = Manifest::read(dir).await?;
    for (name, range) in deps {
        manifest.dependencies.insert(name.clone(), range.clone());
    }
    manifest.write(dir).await
}
