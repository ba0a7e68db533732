use anyhow::{Context, Result};
use tracing::debug;

use crate::error::ActionError;
use crate::remote::{ContentApi, FolderHandle};

/// Create every segment of `path` below `parent`, parent before child, and
/// return the deepest folder. Segments are created without looking for an
/// existing folder first, so a segment that already exists fails the call.
/// Folders created before a failure are left in place.
pub fn ensure_folder<S: ContentApi + ?Sized>(
    session: &mut S,
    parent: &FolderHandle,
    path: &str,
) -> Result<FolderHandle> {
    let (head, rest) = split_head(path)?;
    let created = session
        .add_folder(parent, head)
        .with_context(|| format!("failed to create folder {head} in {}", parent.server_relative_url))?;
    debug!(folder = %created.server_relative_url, "created folder");
    match rest {
        Some(rest) => ensure_folder(session, &created, rest),
        None => Ok(created),
    }
}

/// Like [`ensure_folder`], but reuses a child folder with the same name
/// (compared case-insensitively) instead of creating it again.
pub fn ensure_folder_reusing<S: ContentApi + ?Sized>(
    session: &mut S,
    parent: &FolderHandle,
    path: &str,
) -> Result<FolderHandle> {
    let (head, rest) = split_head(path)?;
    let existing = session
        .child_folders(parent)?
        .into_iter()
        .find(|folder| folder.name.eq_ignore_ascii_case(head));
    let folder = match existing {
        Some(folder) => {
            debug!(folder = %folder.server_relative_url, "reusing folder");
            folder
        }
        None => {
            let created = session.add_folder(parent, head).with_context(|| {
                format!("failed to create folder {head} in {}", parent.server_relative_url)
            })?;
            debug!(folder = %created.server_relative_url, "created folder");
            created
        }
    };
    match rest {
        Some(rest) => ensure_folder_reusing(session, &folder, rest),
        None => Ok(folder),
    }
}

/// First non-empty segment and the remainder, if the remainder still has a
/// non-empty segment.
fn split_head(path: &str) -> Result<(&str, Option<&str>)> {
    let trimmed = path.trim_start_matches('/');
    let (head, rest) = match trimmed.split_once('/') {
        Some((head, rest)) => (head, Some(rest)),
        None => (trimmed, None),
    };
    if head.is_empty() {
        return Err(ActionError::EmptyFolderPath(path.to_string()).into());
    }
    let rest = rest.filter(|rest| rest.split('/').any(|segment| !segment.is_empty()));
    Ok((head, rest))
}
