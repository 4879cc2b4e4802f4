// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Required tool not installed: {0}")]
    ToolNotFound(&'static str),

    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Unexpected output: {0}")]
    InvalidOutput(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl SysError {
    /// Classify an errno returned by a syscall.
    pub fn from_errno(errno: nix::errno::Errno, context: impl Into<String>) -> Self {
        use nix::errno::Errno;

        let context = context.into();
        match errno {
            Errno::EPERM | Errno::EACCES => Self::PermissionDenied(format!("{context}: {errno}")),
            Errno::ENOENT | Errno::EINVAL => Self::NotFound(format!("{context}: {errno}")),
            other => Self::OperationFailed(format!("{context}: {other}")),
        }
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;

#[cfg(test)]
mod tests {
    use super::*;
    use nix::errno::Errno;

    #[test]
    fn errno_classification_is_decided_at_the_syscall() {
        assert!(matches!(
            SysError::from_errno(Errno::EPERM, "umount /DATA"),
            SysError::PermissionDenied(_)
        ));
        assert!(matches!(
            SysError::from_errno(Errno::EINVAL, "umount /DATA"),
            SysError::NotFound(_)
        ));
        assert!(matches!(
            SysError::from_errno(Errno::EBUSY, "umount /DATA"),
            SysError::OperationFailed(_)
        ));
    }
}
