//! Local credential workspace: one directory of JSON files per session.

use crate::store::SessionFiles;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("refusing credential file name '{0}'")]
    InvalidFileName(String),
}

/// Resolves and manipulates per-session credential directories.
#[derive(Debug, Clone)]
pub struct CredentialWorkspace {
    root: PathBuf,
    prefix: String,
}

impl CredentialWorkspace {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    /// Directory for one session. Callers validate `session_id` first.
    pub fn dir(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{}{session_id}", self.prefix))
    }

    pub fn ensure(&self, session_id: &str) -> Result<PathBuf, WorkspaceError> {
        let dir = self.dir(session_id);
        fs::create_dir_all(&dir).map_err(|source| WorkspaceError::Io {
            op: "create",
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.dir(session_id).is_dir()
    }

    /// Read every `*.json` file of the session. A missing directory is an
    /// empty snapshot.
    pub fn read_snapshot(&self, session_id: &str) -> Result<SessionFiles, WorkspaceError> {
        let dir = self.dir(session_id);
        let mut files = SessionFiles::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(files),
            Err(source) => {
                return Err(WorkspaceError::Io {
                    op: "list",
                    path: dir,
                    source,
                });
            }
        };

        for entry in entries {
            let entry = entry.map_err(|source| WorkspaceError::Io {
                op: "list",
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let content = fs::read_to_string(&path).map_err(|source| WorkspaceError::Io {
                op: "read",
                path: path.clone(),
                source,
            })?;
            files.insert(name.to_string(), content);
        }
        Ok(files)
    }

    /// Write each file into the session directory, overwriting existing ones.
    /// Files not present in `files` are left untouched.
    pub fn write_snapshot(&self, session_id: &str, files: &SessionFiles) -> Result<(), WorkspaceError> {
        for name in files.keys() {
            check_file_name(name)?;
        }
        let dir = self.ensure(session_id)?;
        for (name, content) in files {
            let path = dir.join(name);
            fs::write(&path, content).map_err(|source| WorkspaceError::Io {
                op: "write",
                path,
                source,
            })?;
        }
        Ok(())
    }

    pub fn remove(&self, session_id: &str) -> Result<bool, WorkspaceError> {
        let dir = self.dir(session_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(WorkspaceError::Io {
                op: "remove",
                path: dir,
                source,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn check_file_name(name: &str) -> Result<(), WorkspaceError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(WorkspaceError::InvalidFileName(name.to_string()));
    }
    Ok(())
}
