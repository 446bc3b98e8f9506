use thiserror::Error;

/// Everything that can go wrong while parsing, rendering or recognizing.
///
/// During recognition `NameConflict`, `ParameterInconsistency` and `NoMatch`
/// only reject the current candidate; the search backtracks and tries the
/// next bit spec alternative. The remaining variants are not recoverable and
/// propagate to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A referenced name has no binding and no default
    #[error("name `{0}` is not assigned")]
    NameUnassigned(String),
    /// A supplied name is not a valid identifier or not a declared parameter
    #[error("invalid name `{0}`")]
    InvalidName(String),
    /// Two assignments to the same name disagree
    #[error("conflicting assignment to `{0}`")]
    NameConflict(String),
    /// Bits recovered for a parameter disagree with bits already known
    #[error("inconsistent bits for `{0}`")]
    ParameterInconsistency(String),
    /// Malformed physical consequence, e.g. a negative extent
    #[error("{0}")]
    Semantic(String),
    /// The signal is not an instance of the protocol under test
    #[error("no match: {0}")]
    NoMatch(String),
    /// The IRP source could not be parsed
    #[error("parse error: {0}")]
    Parse(String),
}

impl Error {
    /// True for failures which merely reject the current decode branch
    pub(crate) fn rejects_candidate(&self) -> bool {
        matches!(
            self,
            Error::NameConflict(_) | Error::ParameterInconsistency(_) | Error::NoMatch(_)
        )
    }
}
