//! Turning client-supplied names into paths under the storage root.
//!
//! Client ids and file names arrive straight off the wire. Both are checked
//! before anything touches the filesystem so a client cannot write outside
//! its own directory or clobber its metadata record.

use crate::error::{SyncError, SyncResult};
use crate::protocol::metadata;
use std::path::{Component, Path, PathBuf};

fn reject(kind: &'static str, name: &str, reason: impl Into<String>) -> SyncError {
    SyncError::InvalidPath {
        kind,
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Validate a client id for use as a single directory name.
pub fn validate_client_id(id: &str) -> SyncResult<()> {
    const KIND: &str = "client id";
    if id.is_empty() {
        return Err(reject(KIND, id, "empty"));
    }
    if id.contains('\0') {
        return Err(reject(KIND, id, "contains NUL byte"));
    }
    if id.contains('/') || id.contains('\\') {
        return Err(reject(KIND, id, "contains a path separator"));
    }
    #[cfg(windows)]
    if id.contains(':') {
        return Err(reject(KIND, id, "contains a colon"));
    }
    let mut comps = Path::new(id).components();
    match (comps.next(), comps.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(reject(KIND, id, "not a plain directory name")),
    }
}

/// Resolve `name` to a destination under `client_dir`.
///
/// Relative sub-paths are allowed (`photos/a.jpg`); `.` components are
/// dropped; parent components, absolute paths and NUL bytes are rejected, as
/// is any name resolving to the metadata record.
pub fn resolve_file(client_dir: &Path, name: &str) -> SyncResult<PathBuf> {
    const KIND: &str = "file name";
    if name.contains('\0') {
        return Err(reject(KIND, name, "contains NUL byte"));
    }
    // Clients on Windows send backslash-separated names.
    let normalized = name.replace('\\', "/");

    let mut safe = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(s) => {
                #[cfg(windows)]
                if s.to_string_lossy().contains(':') {
                    return Err(reject(KIND, name, "component contains a colon"));
                }
                safe.push(s);
            }
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(reject(
                    KIND,
                    name,
                    format!("disallowed component {:?}", component),
                ));
            }
        }
    }
    if safe.as_os_str().is_empty() {
        return Err(reject(KIND, name, "empty"));
    }
    // Case-insensitive filesystems map `.PROPERTIES` onto the record too
    let reserved = safe.to_str().map_or(false, |s| {
        s.eq_ignore_ascii_case(metadata::FILE_NAME) || s.eq_ignore_ascii_case(metadata::TEMP_FILE_NAME)
    });
    if reserved {
        return Err(reject(KIND, name, "reserved for client metadata"));
    }
    Ok(client_dir.join(safe))
}

/// Create parent directory if needed
pub async fn ensure_parent_exists(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}
