// Utils - Path
// Confine model-supplied paths to a workspace root

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
  #[error("path `{0}` is empty after sanitization")]
  Empty(String),
  #[error("path `{0}` resolves outside the workspace")]
  Escapes(String),
  #[error("path `{0}` is a symbolic link")]
  Symlink(String),
  #[error("cannot resolve `{path}`: {message}")]
  Unresolvable { path: String, message: String },
}

/// Strips absolute prefixes and drops `.`, `..` and empty segments, returning
/// a path that is always relative. Both `/` and `\` separate segments.
pub fn sanitize_relative(raw: &str) -> Result<PathBuf, PathError> {
  let mut clean = PathBuf::new();
  for segment in raw.split(['/', '\\']) {
    let segment = segment.trim();
    if segment.is_empty() || segment == "." || segment == ".." {
      continue;
    }
    // Windows drive prefixes like `C:`.
    if segment.len() == 2 && segment.ends_with(':') {
      continue;
    }
    clean.push(segment);
  }

  if clean.as_os_str().is_empty() {
    return Err(PathError::Empty(raw.to_string()));
  }
  if clean.as_os_str() != raw {
    debug!(raw, sanitized = %clean.display(), "sanitized path");
  }
  Ok(clean)
}

/// Joins a sanitized form of `raw` onto `root`.
pub fn resolve_within(root: &Path, raw: &str) -> Result<PathBuf, PathError> {
  Ok(root.join(sanitize_relative(raw)?))
}

/// Fails unless the deepest existing ancestor of `path` (symlinks followed)
/// lies under the canonical `root`. Missing trailing segments are fine.
pub fn ensure_contained(root: &Path, path: &Path) -> Result<(), PathError> {
  let canonical_root = canonicalize(root)?;
  let mut existing = path;
  loop {
    match std::fs::symlink_metadata(existing) {
      Ok(_) => break,
      Err(err) if err.kind() == io::ErrorKind::NotFound => {
        existing = existing
          .parent()
          .ok_or_else(|| PathError::Escapes(path.display().to_string()))?;
      }
      Err(err) => return Err(unresolvable(existing, &err)),
    }
  }

  // A dangling link cannot be canonicalized; treat it as escaping.
  let resolved = std::fs::canonicalize(existing)
    .map_err(|_| PathError::Escapes(path.display().to_string()))?;
  if !resolved.starts_with(&canonical_root) {
    debug!(path = %path.display(), resolved = %resolved.display(), "path escapes workspace");
    return Err(PathError::Escapes(path.display().to_string()));
  }
  Ok(())
}

/// Fails when `path` itself is a symbolic link. A missing path passes.
pub fn ensure_not_symlink(path: &Path) -> Result<(), PathError> {
  match std::fs::symlink_metadata(path) {
    Ok(metadata) if metadata.file_type().is_symlink() => {
      Err(PathError::Symlink(path.display().to_string()))
    }
    Ok(_) => Ok(()),
    Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(err) => Err(unresolvable(path, &err)),
  }
}

/// [`resolve_within`] plus the on-disk checks: the result is contained in
/// `root` and is not itself a symbolic link.
pub fn resolve_contained(root: &Path, raw: &str) -> Result<PathBuf, PathError> {
  let path = resolve_within(root, raw)?;
  ensure_contained(root, &path)?;
  ensure_not_symlink(&path)?;
  Ok(path)
}

fn canonicalize(path: &Path) -> Result<PathBuf, PathError> {
  std::fs::canonicalize(path).map_err(|err| unresolvable(path, &err))
}

fn unresolvable(path: &Path, err: &io::Error) -> PathError {
  PathError::Unresolvable {
    path: path.display().to_string(),
    message: err.to_string(),
  }
}

/// Renders `path` relative to `root` with forward slashes, when it lies inside it.
pub fn display_relative(root: &Path, path: &Path) -> Option<String> {
  let relative = path.strip_prefix(root).ok()?;
  let parts: Vec<String> = relative
    .components()
    .map(|component| component.as_os_str().to_string_lossy().into_owned())
    .collect();
  Some(parts.join("/"))
}
