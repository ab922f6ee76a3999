//! Error types for the cfgconv CFG reconstruction pipeline.
//!
//! Lexical, syntactic, semantic, and I/O failures are represented here.
//! Structural validation is not: `Cfg::check` returns a status value, never
//! an `Err` — a CFG that fails flow conservation is a normal, inspectable
//! result, not a failure to load.

use thiserror::Error;

/// Main error type for cfgconv operations.
#[derive(Debug, Error)]
pub enum CfgConvError {
    /// The scanner encountered a byte sequence no token can start with.
    #[error("lexical error at offset {offset}: unexpected character {found:?}")]
    Lexical { offset: usize, found: char },

    /// The scanner hit end of input while still inside a token.
    #[error("lexical error at offset {offset}: unexpected end of input")]
    UnexpectedEof { offset: usize },

    /// A reader expected one token kind and got another.
    #[error("syntax error at offset {offset}: expected {expected}, found {found}")]
    Syntax {
        offset: usize,
        expected: String,
        found: String,
    },

    /// A structural rule independent of scanning/parsing was violated:
    /// duplicate entry/exit/halt node, duplicate block address, an illegal
    /// node-type promotion, or similar.
    #[error("semantic error: {0}")]
    Semantic(String),

    /// Range/address filter syntax on the command line was malformed.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// File I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// DCFG JSON did not have the expected shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for cfgconv operations.
pub type Result<T> = std::result::Result<T, CfgConvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CfgConvError::Semantic("duplicate entry node".to_string());
        assert_eq!(err.to_string(), "semantic error: duplicate entry node");

        let err = CfgConvError::Syntax {
            offset: 0x10,
            expected: "ADDR".to_string(),
            found: "KEYWORD".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "syntax error at offset 16: expected ADDR, found KEYWORD"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CfgConvError = io_err.into();
        assert!(matches!(err, CfgConvError::Io(_)));
    }
}
