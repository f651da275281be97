use oidns_store::StoreError;

/// Errors returned by namespace operations.
#[derive(Debug, thiserror::Error)]
pub enum NsError {
    /// Bad entry name, flags, or configuration.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("name too long: {len} bytes (max {max})")]
    NameTooLong { len: usize, max: usize },

    /// Symlink text exceeds the store's path limit.
    #[error("path too long: {len} bytes (max {max})")]
    PathTooLong { len: usize, max: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The object lost its canonical alias to a concurrent removal.
    #[error("owner dead: {0}")]
    OwnerDead(String),

    /// An entry moved between resolution and locking.
    #[error("child changed: {0}")]
    ChildChanged(String),

    #[error("too many levels of symbolic links (max {0})")]
    TooManyLinks(usize),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("no space: {0}")]
    NoSpace(String),

    #[error("namespace not registered: {0}")]
    NotRegistered(String),

    #[error("namespace is read-only")]
    ReadOnly,

    /// The backing store refused an operation on an indexed entry.
    #[error("not supported: {0}")]
    NotSupported(String),
}

pub type NsResult<T> = Result<T, NsError>;

impl From<StoreError> for NsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotADirectory(s) => Self::NotADirectory(s),
            StoreError::IsADirectory(s) => Self::IsADirectory(s),
            StoreError::DirectoryNotEmpty(s) => Self::DirectoryNotEmpty(s),
            StoreError::AlreadyExists(s) => Self::AlreadyExists(s),
            StoreError::NotFound(s) => Self::NotFound(s),
            StoreError::PermissionDenied(s) => Self::PermissionDenied(s),
            StoreError::NotSupported(s) => Self::NotSupported(s),
            StoreError::InvalidArgument(s) => Self::InvalidArgument(s),
            StoreError::NameTooLong { len, max } => Self::NameTooLong { len, max },
            StoreError::PathTooLong { len, max } => Self::PathTooLong { len, max },
            StoreError::ReadOnly => Self::ReadOnly,
            StoreError::Busy(s) => Self::Busy(s),
            StoreError::NoSpace(limit) => Self::NoSpace(format!("node limit {limit} reached")),
            StoreError::OutOfMemory => Self::OutOfMemory,
            StoreError::LeaseConflict(brk) => Self::Busy(format!("lease held on {brk}")),
        }
    }
}
