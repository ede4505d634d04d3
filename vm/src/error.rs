use questmark::ProgramError;

/// A failure while executing. Terminal for the VM that raised it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("`{native}`: operand {operand} should be a {expected}, found {found}")]
    Type {
        native: String,
        /// 1-based, in pop order.
        operand: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("`{native}`: {value} is out of range")]
    OutOfRange { native: String, value: f64 },

    #[error("jump to undefined label `{label}`")]
    UndefinedLabel { label: String },

    #[error("undefined function `{name}`")]
    UndefinedFunction { name: String },

    #[error("context has no value for `{key}`")]
    MissingContextKey { key: String },

    #[error("choice {id} is not among the offered choices")]
    UnresolvedChoice { id: usize },

    #[error("the VM is not waiting for a choice")]
    NotSuspended,

    #[error("`{native}` at offset {at} must be followed by a `{{` block")]
    UnguardedBranch { native: String, at: usize },
}

/// A failure while building a VM from a program or snapshot.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Program(#[from] ProgramError),

    #[error("program invokes undefined function `{name}`")]
    UndefinedFunction { name: String },

    #[error("malformed snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}
