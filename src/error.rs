use thiserror::Error;

pub type Result<T, E = CovError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum CovError {
    #[error("unrecognizable object syntax")]
    BadSyntax,

    #[error("object magic not registered: {0:#010x}")]
    UnknownMagic(u32),

    #[error("object version not supported: {0:#010x}")]
    UnsupportedVersion(u32),

    #[error("object, reference or revision not found")]
    NotFound,

    #[error("prefix matches more than one object")]
    Ambiguous,

    #[error("reference already exists")]
    Exists,

    #[error("invalid reference name or revision pattern: '{0}'")]
    InvalidSpec(String),

    #[error("branch exists, but does not have any reports yet")]
    UnbornBranch,

    #[error("current branch cannot be deleted")]
    CurrentBranch,

    #[error("object cannot be cast to required type")]
    WrongObjectType,

    #[error("reference does not point to a branch")]
    NotABranch,

    #[error("path is not a worktree")]
    NotAWorktree,

    #[error("worktree is not initialized")]
    UninitializedWorktree,

    #[error("io error: '{0}'")]
    IOError(#[from] std::io::Error),

    #[error("json error: '{0}'")]
    Json(#[from] serde_json::Error),
}
