//! Error types for the duet machine.
//!
//! Only program construction and run setup can fail. A receive timeout or a
//! mutual deadlock is a normal way for a run to end and is reported through
//! [`crate::processor::HaltReason`], never through [`DuetError`].

use thiserror::Error;

/// Main error type for the duet machine.
#[derive(Debug, Error)]
pub enum DuetError {
    // Program text errors
    #[error("Parse error on line {line} (`{text}`): {reason}")]
    Parse {
        /// 1-based line number in the program text.
        line: usize,
        text: String,
        #[source]
        reason: ParseReason,
    },

    #[error("Program contains no instructions")]
    EmptyProgram,

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Runtime errors
    #[error("Processor task failed: {message}")]
    TaskFailed { message: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

/// Why a single program line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseReason {
    #[error("unknown opcode `{0}`")]
    UnknownOpcode(String),

    #[error("`{opcode}` takes {expected} operand(s), found {found}")]
    OperandCount {
        opcode: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid operand `{0}`")]
    InvalidOperand(String),

    #[error("`{opcode}` needs a register as its first operand, found `{found}`")]
    RegisterRequired { opcode: &'static str, found: String },

    #[error("`{0}` is not part of the sound dialect")]
    NotInDialect(&'static str),

    #[error("blank line inside program")]
    BlankLine,
}

/// Result type alias for duet operations.
pub type Result<T> = std::result::Result<T, DuetError>;

impl From<std::io::Error> for DuetError {
    fn from(err: std::io::Error) -> Self {
        DuetError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<tokio::task::JoinError> for DuetError {
    fn from(err: tokio::task::JoinError) -> Self {
        DuetError::TaskFailed {
            message: err.to_string(),
        }
    }
}

impl DuetError {
    /// Create a parse error for the given 0-based line index.
    pub fn parse(index: usize, text: impl Into<String>, reason: ParseReason) -> Self {
        DuetError::Parse {
            line: index + 1,
            text: text.into(),
            reason,
        }
    }

    /// True when the caller supplied an invalid program.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, DuetError::Parse { .. } | DuetError::EmptyProgram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = DuetError::parse(2, "jmp a 1", ParseReason::UnknownOpcode("jmp".into()));
        assert_eq!(
            err.to_string(),
            "Parse error on line 3 (`jmp a 1`): unknown opcode `jmp`"
        );
    }

    #[test]
    fn test_operand_count_display() {
        let reason = ParseReason::OperandCount {
            opcode: "set",
            expected: 2,
            found: 1,
        };
        assert_eq!(reason.to_string(), "`set` takes 2 operand(s), found 1");
    }

    #[test]
    fn test_is_parse_error() {
        assert!(DuetError::EmptyProgram.is_parse_error());
        assert!(DuetError::parse(0, "x", ParseReason::BlankLine).is_parse_error());
        assert!(!DuetError::Config {
            message: "bad".into()
        }
        .is_parse_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: DuetError = io_err.into();
        assert!(matches!(err, DuetError::Io { .. }));
        assert!(err.to_string().contains("missing"));
    }
}
