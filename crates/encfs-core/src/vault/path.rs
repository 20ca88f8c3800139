//! Plaintext paths inside a volume.

use relative_path::{RelativePath, RelativePathBuf};
use std::fmt;

/// User-facing path within an EncFS volume.
///
/// Volume paths use `/` as the separator regardless of the host OS. They name
/// the plaintext tree the user sees, never the encoded backend layout.
/// `.` and `..` components are kept as written and rejected when the path is
/// encoded.
///
/// # Examples
///
/// ```
/// use encfs_core::vault::VolumePath;
///
/// let path = VolumePath::new("/Documents/report.txt");
/// assert_eq!(path.file_name(), Some("report.txt"));
/// assert_eq!(path.parent().unwrap().to_string(), "/Documents");
///
/// // Leading slashes are optional
/// assert_eq!(path, VolumePath::new("Documents/report.txt"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumePath(RelativePathBuf);

impl VolumePath {
    /// The root path (empty).
    #[inline]
    pub fn root() -> Self {
        VolumePath(RelativePathBuf::new())
    }

    /// Create a volume path from a string. Leading and trailing slashes are
    /// stripped.
    pub fn new(path: impl AsRef<str>) -> Self {
        let s = path.as_ref().trim_matches('/');
        VolumePath(RelativePathBuf::from(s))
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.as_str().is_empty()
    }

    /// Path without the leading slash.
    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    #[inline]
    pub fn as_relative_path(&self) -> &RelativePath {
        &self.0
    }

    /// Join this path with another component.
    pub fn join(&self, component: impl AsRef<str>) -> Self {
        VolumePath(self.0.join(component.as_ref()))
    }

    /// Parent path; `None` for the root.
    pub fn parent(&self) -> Option<VolumePath> {
        if self.is_root() {
            return None;
        }
        self.0.parent().map(|p| VolumePath(p.to_relative_path_buf()))
    }

    /// Final component; `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name()
    }

    /// Path segments from the root down.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.components().map(|c| c.as_str())
    }

    /// Split into parent directory and final name; `None` for the root.
    pub fn split(&self) -> Option<(VolumePath, &str)> {
        let parent = self.parent()?;
        let name = self.file_name()?;
        Some((parent, name))
    }

    /// Whether `self` is `other` or lies below it.
    pub fn starts_with(&self, other: &VolumePath) -> bool {
        other.is_root() || self.0.starts_with(&other.0)
    }
}

impl AsRef<str> for VolumePath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for VolumePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl From<&str> for VolumePath {
    fn from(s: &str) -> Self {
        VolumePath::new(s)
    }
}

impl From<String> for VolumePath {
    fn from(s: String) -> Self {
        VolumePath::new(s)
    }
}
