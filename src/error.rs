use thiserror::Error;

/// Failure classes of a reduction run.
///
/// Every kind maps to its own process exit code so that the workflow layer
/// driving `skyreduce` can tell which stage gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    #[error("load error")]
    Load,
    #[error("configuration error")]
    Config,
    #[error("catalog lookup error")]
    CatalogLookup,
    #[error("fit convergence error")]
    FitConvergence,
    #[error("estimation error")]
    Estimation,
    #[error("write error")]
    Write,
}

impl ErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Load => 2,
            ErrorKind::Config => 3,
            ErrorKind::CatalogLookup => 4,
            ErrorKind::FitConvergence => 5,
            ErrorKind::Estimation => 6,
            ErrorKind::Write => 7,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    kind: ErrorKind,
    message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn load(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Load, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn catalog(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CatalogLookup, message)
    }

    pub fn fit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FitConvergence, message)
    }

    pub fn estimation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Estimation, message)
    }

    pub fn write(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Write, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn exit_code(&self) -> u8 {
        self.kind.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_and_nonzero() {
        let kinds = [
            ErrorKind::Load,
            ErrorKind::Config,
            ErrorKind::CatalogLookup,
            ErrorKind::FitConvergence,
            ErrorKind::Estimation,
            ErrorKind::Write,
        ];
        let mut codes: Vec<u8> = kinds.iter().map(|k| k.exit_code()).collect();
        assert!(codes.iter().all(|&c| c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = AppError::fit("optimizer stalled");
        assert_eq!(err.to_string(), "fit convergence error: optimizer stalled");
        assert_eq!(err.exit_code(), 5);
    }
}
