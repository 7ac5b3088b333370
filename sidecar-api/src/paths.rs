use std::path::{Component, Path, PathBuf};

use crate::error::ApiError;

/// Upload extensions refused regardless of destination.
const FORBIDDEN_EXTENSIONS: &[&str] = &[
    "exe", "dll", "sh", "bat", "cmd", "php", "phtml", "js", "jsp", "asp",
];

/// Directory the file API is confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRoot {
    root: PathBuf,
}

impl DataRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve a client supplied path against the root.
    ///
    /// Resolution is purely lexical: `.` is dropped, `..` pops the previous component and
    /// leading separators are ignored, so `/logs` and `logs` name the same entry. A `..`
    /// that would climb above the root is rejected. Symlinks are not followed.
    pub fn resolve(&self, user_path: &str) -> Result<PathBuf, ApiError> {
        let mut resolved = self.root.clone();
        let mut depth: usize = 0;

        for component in Path::new(user_path).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(ApiError::AccessDenied);
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::Prefix(_) => return Err(ApiError::AccessDenied),
            }
        }

        Ok(resolved)
    }

    pub fn is_root(&self, path: &Path) -> bool {
        path == self.root
    }
}

/// Validate the name of an uploaded file: one plain path component with an allowed extension.
pub fn check_upload_name(name: &str) -> Result<&str, ApiError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => {}
        _ => return Err(ApiError::InvalidFileName),
    }

    let forbidden = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .is_some_and(|ext| FORBIDDEN_EXTENSIONS.contains(&ext.as_str()));
    if forbidden {
        return Err(ApiError::ForbiddenFileType);
    }

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> DataRoot {
        DataRoot::new("/data")
    }

    #[test]
    fn test_resolve_inside_root() {
        let root = root();
        assert_eq!(root.resolve("").unwrap(), PathBuf::from("/data"));
        assert_eq!(root.resolve("/").unwrap(), PathBuf::from("/data"));
        assert_eq!(
            root.resolve("saves/world1").unwrap(),
            PathBuf::from("/data/saves/world1")
        );
        assert_eq!(
            root.resolve("/saves/./world1/").unwrap(),
            PathBuf::from("/data/saves/world1")
        );
        assert_eq!(
            root.resolve("saves/../config/server.properties").unwrap(),
            PathBuf::from("/data/config/server.properties")
        );
        assert_eq!(root.resolve("saves/..").unwrap(), PathBuf::from("/data"));
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let root = root();
        for path in ["..", "../etc/passwd", "/../data2", "saves/../../etc", "a/b/../../../x"] {
            assert!(
                matches!(root.resolve(path), Err(ApiError::AccessDenied)),
                "{} should be rejected",
                path
            );
        }
    }

    #[test]
    fn test_is_root() {
        let root = root();
        assert!(root.is_root(&root.resolve("/").unwrap()));
        assert!(root.is_root(&root.resolve("logs/..").unwrap()));
        assert!(!root.is_root(&root.resolve("logs").unwrap()));
    }

    #[test]
    fn test_check_upload_name() {
        assert_eq!(check_upload_name("world.zip").unwrap(), "world.zip");
        assert_eq!(check_upload_name("README").unwrap(), "README");

        for name in ["", ".", "..", "../evil.txt", "dir/file.txt", "/etc/passwd"] {
            assert!(
                matches!(check_upload_name(name), Err(ApiError::InvalidFileName)),
                "{:?} should be rejected",
                name
            );
        }

        for name in ["run.sh", "SETUP.EXE", "mod.Js", "index.phtml"] {
            assert!(
                matches!(check_upload_name(name), Err(ApiError::ForbiddenFileType)),
                "{:?} should be rejected",
                name
            );
        }
    }
}
