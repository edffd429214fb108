use thiserror::Error;

/// Failure taxonomy shared by the serving and tuning paths.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A loaded or proposed configuration breaks an invariant. The active
    /// version is left untouched.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Not enough completed predictions to tune on.
    #[error("insufficient evidence: {have} completed records, need {need}")]
    InsufficientEvidence { have: usize, need: usize },

    /// A quality profile could not be resolved. Callers of `simulate` never
    /// see this; the calculator falls back to the neutral factor.
    #[error("unresolved input: {0}")]
    UnresolvedInput(String),

    /// Two records for the same canonical key carry different outcomes.
    #[error("duplicate fixture conflict for {key}: {detail}")]
    DuplicateFixtureConflict { key: String, detail: String },

    #[error("unknown fixture: {0}")]
    UnknownFixture(String),

    #[error("fixture already started: {0}")]
    FixtureStarted(String),

    #[error("unknown config version: {0}")]
    UnknownVersion(u64),

    /// A conditional swap found a different active version than the one
    /// its parameters were derived from.
    #[error("config moved from v{expected} to v{found}")]
    VersionConflict { expected: u64, found: u64 },

    #[error("unknown tuning proposal: {0}")]
    UnknownProposal(u64),

    #[error("persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        EngineError::InvalidConfig(msg.into())
    }
}
