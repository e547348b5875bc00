#[derive(Debug, thiserror::Error)]
pub enum AggError {
    #[error("[kind: io, info:{0}]")]
    Io(#[from] std::io::Error),
    #[error("[kind: invalid argument, info:{0}]")]
    InvalidArg(String),
    #[error("[kind: out of range, info:{0}]")]
    Range(String),
    #[error("[kind: erasure code, info:{0}]")]
    ErasureCode(String),
    #[error("[kind: needs refresh, info:{0}]")]
    NeedsRefresh(String),
    #[error("[kind: peer failed, info:{0}]")]
    PeerFailed(String),
    #[error("[kind: allocation failure, info:{0}]")]
    Alloc(String),
    #[error("[kind: invariant violation, info:{0}]")]
    Invariant(String),
    #[error("[kind: other, info: {0}]")]
    Other(String),
}

impl AggError {
    #[allow(dead_code)]
    pub(crate) fn invalid_arg(e: impl ToString) -> Self {
        Self::InvalidArg(e.to_string())
    }

    pub(crate) fn other(e: impl Into<String>) -> Self {
        Self::Other(e.into())
    }

    pub(crate) fn out_of_range(
        (file, line, column): (&str, u32, u32),
        valid_range: Option<std::ops::Range<u64>>,
        illegal_range: std::ops::Range<u64>,
    ) -> Self {
        let source_location = format!("{}:{}:{}", file, line, column);
        if let Some(valid_range) = valid_range {
            Self::Range(format!(
                "error: {{[{}..{}) is out of range [{}..{})}}, at: {{[{}]}}",
                illegal_range.start,
                illegal_range.end,
                valid_range.start,
                valid_range.end,
                source_location
            ))
        } else {
            Self::Range(format!(
                "error: {{[{}..{}) is out of range, at: {{[{}]}}",
                illegal_range.start, illegal_range.end, source_location
            ))
        }
    }

    pub(crate) fn erasure_code(
        source_location: (&str, u32, u32),
        errstr: impl Into<String>,
    ) -> Self {
        Self::ErasureCode(format!(
            "error: {{{}}}, at: {{{}:{}:{}}}",
            errstr.into(),
            source_location.0,
            source_location.1,
            source_location.2
        ))
    }

    pub(crate) fn invariant(
        (file, line, column): (&str, u32, u32),
        errstr: impl Into<String>,
    ) -> Self {
        Self::Invariant(format!(
            "error: {{{}}}, at: {{{}:{}:{}}}",
            errstr.into(),
            file,
            line,
            column
        ))
    }

    /// Errors for which the current stripe should be abandoned (logged, not
    /// advanced past) while the traversal continues with the next stripe.
    pub fn is_stripe_abort(&self) -> bool {
        matches!(
            self,
            Self::PeerFailed(_) | Self::ErasureCode(_) | Self::Io(_)
        )
    }

    /// Errors that should restart the whole traversal from the last safe anchor.
    pub fn is_needs_refresh(&self) -> bool {
        matches!(self, Self::NeedsRefresh(_))
    }

    /// Errors that are fatal to the whole traversal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Alloc(_) | Self::Invariant(_))
    }

    pub fn into_io_err(self) -> Option<std::io::Error> {
        if let AggError::Io(io_err) = self {
            Some(io_err)
        } else {
            None
        }
    }
}

pub type AggResult<T> = std::result::Result<T, AggError>;
