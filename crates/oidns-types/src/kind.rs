use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of a namespace node.
///
/// A singularity is both a file (it carries content and has one name) and a
/// directory (it can hold children), so it answers `true` to both
/// [`NodeKind::is_folder`] and [`NodeKind::has_content`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Directory,
    File,
    Symlink,
    Singularity,
}

impl NodeKind {
    /// Can hold children.
    pub fn is_folder(self) -> bool {
        matches!(self, Self::Directory | Self::Singularity)
    }

    /// Carries byte content.
    pub fn has_content(self) -> bool {
        matches!(self, Self::File | Self::Singularity)
    }

    /// Link count a freshly created node of this kind starts with.
    pub fn initial_nlink(self) -> u32 {
        if self.is_folder() {
            2
        } else {
            1
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::File => "file",
            Self::Symlink => "symlink",
            Self::Singularity => "singularity",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
