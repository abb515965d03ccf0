//! Versioned artifact workspaces.
//!
//! A workspace is the on-disk layout of one component-artifact bundle
//! version under a configurable storage root. The factory only resolves and
//! validates that layout; fetching and verifying bundles is someone else's
//! job, the reconciler core consumes absolute paths.

use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

/// Remote source of artifact bundles when none is configured.
pub const DEFAULT_REPOSITORY_URL: &str = "https://artifacts.fleet-reconciler.dev/bundles";

const COMPONENT_FILE: &str = "components.yaml";
const RESOURCE_DIR: &str = "resources";
const INSTALLATION_RESOURCE_DIR: &str = "installation/resources";

/// Workspace resolution errors.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace version must not be empty")]
    EmptyVersion,

    /// The version directory exists but lacks part of the bundle layout.
    #[error("workspace for version '{version}' is incomplete: missing {missing}")]
    IncompleteBundle { version: String, missing: PathBuf },

    #[error("workspace io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolved directory layout of one bundle version.
///
/// All paths are absolute within the factory's storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub workspace_dir: PathBuf,
    pub component_file: PathBuf,
    pub resource_dir: PathBuf,
    pub installation_resource_dir: PathBuf,
}

/// Factory resolving versioned workspaces under a storage root.
#[derive(Debug, Clone, Default)]
pub struct Factory {
    /// Root for workspace artifacts; the process working directory when
    /// unset.
    pub storage_dir: Option<PathBuf>,

    /// Remote source of artifact bundles; the project-pinned URL when unset.
    pub repository_url: Option<String>,

    pub debug: bool,
}

impl Factory {
    /// The effective storage root.
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir
            .clone()
            .unwrap_or_else(Self::default_storage_dir)
    }

    /// The effective bundle source URL.
    pub fn repository_url(&self) -> &str {
        self.repository_url
            .as_deref()
            .unwrap_or(DEFAULT_REPOSITORY_URL)
    }

    /// The per-version workspace directory under the storage root.
    pub fn workspace_dir(&self, version: &str) -> PathBuf {
        self.storage_dir().join(version)
    }

    /// Resolve the workspace of a bundle version.
    ///
    /// Validates that the bundle layout is present; a missing component file
    /// or resource directory reports the first missing path.
    pub fn get(&self, version: &str) -> Result<Workspace, WorkspaceError> {
        self.validate(version)?;

        let workspace_dir = self.workspace_dir(version);
        let workspace = Workspace {
            component_file: workspace_dir.join(INSTALLATION_RESOURCE_DIR).join(COMPONENT_FILE),
            resource_dir: workspace_dir.join(RESOURCE_DIR),
            installation_resource_dir: workspace_dir.join(INSTALLATION_RESOURCE_DIR),
            workspace_dir,
        };

        for required in [
            &workspace.component_file,
            &workspace.resource_dir,
            &workspace.installation_resource_dir,
        ] {
            if !required.exists() {
                return Err(WorkspaceError::IncompleteBundle {
                    version: version.to_string(),
                    missing: required.clone(),
                });
            }
        }

        if self.debug {
            debug!(
                version = %version,
                workspace_dir = %workspace.workspace_dir.display(),
                "Resolved workspace"
            );
        }
        Ok(workspace)
    }

    /// Delete the workspace of a bundle version.
    ///
    /// Deleting a version that was never resolved is a success.
    pub fn delete(&self, version: &str) -> Result<(), WorkspaceError> {
        self.validate(version)?;

        let workspace_dir = self.workspace_dir(version);
        if !workspace_dir.exists() {
            return Ok(());
        }
        std::fs::remove_dir_all(&workspace_dir).map_err(|source| WorkspaceError::Io {
            path: workspace_dir.clone(),
            source,
        })?;

        debug!(
            version = %version,
            workspace_dir = %workspace_dir.display(),
            "Deleted workspace"
        );
        Ok(())
    }

    fn validate(&self, version: &str) -> Result<(), WorkspaceError> {
        if version.is_empty() {
            return Err(WorkspaceError::EmptyVersion);
        }
        Ok(())
    }

    fn default_storage_dir() -> PathBuf {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERSION: &str = "1.20.0";

    fn populate(root: &Path, version: &str) {
        let workspace_dir = root.join(version);
        std::fs::create_dir_all(workspace_dir.join(RESOURCE_DIR)).unwrap();
        std::fs::create_dir_all(workspace_dir.join(INSTALLATION_RESOURCE_DIR)).unwrap();
        std::fs::write(
            workspace_dir.join(INSTALLATION_RESOURCE_DIR).join(COMPONENT_FILE),
            "components: []\n",
        )
        .unwrap();
    }

    #[test]
    fn test_defaults() {
        let factory = Factory::default();
        assert_eq!(factory.repository_url(), DEFAULT_REPOSITORY_URL);
        assert_eq!(
            factory.workspace_dir(VERSION),
            factory.storage_dir().join(VERSION)
        );

        let factory = Factory {
            storage_dir: Some(PathBuf::from("/tmp")),
            ..Default::default()
        };
        assert_eq!(
            factory.workspace_dir(VERSION),
            PathBuf::from("/tmp").join(VERSION)
        );
        assert_eq!(factory.repository_url(), DEFAULT_REPOSITORY_URL);
    }

    #[test]
    fn test_get_resolves_populated_workspace() {
        let storage = tempfile::tempdir().unwrap();
        populate(storage.path(), VERSION);

        let factory = Factory {
            storage_dir: Some(storage.path().to_path_buf()),
            ..Default::default()
        };

        let workspace = factory.get(VERSION).unwrap();
        assert_eq!(workspace.workspace_dir, storage.path().join(VERSION));
        assert!(workspace.component_file.ends_with(
            PathBuf::from(INSTALLATION_RESOURCE_DIR).join(COMPONENT_FILE)
        ));
        assert!(workspace.resource_dir.is_dir());
        assert!(workspace.component_file.is_file());
    }

    #[test]
    fn test_get_reports_missing_bundle_parts() {
        let storage = tempfile::tempdir().unwrap();

        let factory = Factory {
            storage_dir: Some(storage.path().to_path_buf()),
            ..Default::default()
        };

        assert!(matches!(
            factory.get(VERSION),
            Err(WorkspaceError::IncompleteBundle { .. })
        ));
        assert!(matches!(factory.get(""), Err(WorkspaceError::EmptyVersion)));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let storage = tempfile::tempdir().unwrap();
        populate(storage.path(), VERSION);

        let factory = Factory {
            storage_dir: Some(storage.path().to_path_buf()),
            ..Default::default()
        };

        factory.delete(VERSION).unwrap();
        assert!(!storage.path().join(VERSION).exists());
        // Deleting again is fine.
        factory.delete(VERSION).unwrap();
    }
}
