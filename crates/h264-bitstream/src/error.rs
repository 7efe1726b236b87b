use thiserror::Error;

/// A parameter buffer could not be decoded into its record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamsError {
    #[error("{what} buffer too short: expected {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("invalid slice_type {0}")]
    InvalidSliceType(u8),
}
