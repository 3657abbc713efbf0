//! Error type shared by the distance and determinant kernels.
//!
//! Hot-path operations never return errors; only the cold paths
//! (allocation, factorization, configuration) do.

use std::fmt;

#[derive(Debug)]
pub enum QmcError {
    /// LU factorization met a zero (or non-finite) pivot at this elimination step
    SingularMatrix { pivot: usize },
    /// Buffer (re)allocation could not reserve this many elements
    Allocation { elements: usize },
    /// Got an invalid parameter value in a cold-path function
    InvalidParameter(String),
    /// Reading a configuration file failed
    Io(std::io::Error),
    /// Parsing a configuration file failed
    Yaml(serde_yaml::Error),
}

impl fmt::Display for QmcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingularMatrix { pivot } => {
                write!(f, "singular matrix: zero pivot at elimination step {pivot}")
            }
            Self::Allocation { elements } => {
                write!(f, "failed to allocate buffer of {elements} elements")
            }
            Self::InvalidParameter(e) => write!(f, "invalid parameter: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Yaml(e) => write!(f, "yaml error: {e}"),
        }
    }
}

impl std::error::Error for QmcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SingularMatrix { .. }
            | Self::Allocation { .. }
            | Self::InvalidParameter(_) => None,
            Self::Io(e) => Some(e),
            Self::Yaml(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for QmcError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<serde_yaml::Error> for QmcError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Yaml(error)
    }
}
