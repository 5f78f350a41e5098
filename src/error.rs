use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Syntax error in '{0}'")]
    SyntaxError(String),

    #[error("Parsing shader '{0}' failed")]
    ParsingFailed(String),

    #[error("Opening shader '{0}' failed")]
    OpeningFileFailed(String, #[source] std::io::Error),

    #[error("Semantic analysis of shader '{0}' failed")]
    SemanticAnalysisFailed(String),

    #[error("Code generation for shader '{0}' failed")]
    CodeGenerationFailed(String),

    #[error("Shader '{0}' is a {1} shader, not a {2} shader")]
    WrongShaderKind(String, &'static str, &'static str),

    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),
}

pub type Result<T> = std::result::Result<T, RenderError>;

/// Codes attached to diagnostics streamed through an [`ErrorPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    SyntaxError,
    ParsingFailed,
    OpeningFileFailed,
    UnknownColorSpace,
    UnknownCoordinateSystem,
    UnknownIdentifier,
    TypeMismatch,
    StorageMismatch,
    OverloadNotFound,
    Unimplemented,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::SyntaxError => "SYNTAX_ERROR",
            ErrorCode::ParsingFailed => "PARSING_FAILED",
            ErrorCode::OpeningFileFailed => "OPENING_FILE_FAILED",
            ErrorCode::UnknownColorSpace => "UNKNOWN_COLOR_SPACE",
            ErrorCode::UnknownCoordinateSystem => "UNKNOWN_COORDINATE_SYSTEM",
            ErrorCode::UnknownIdentifier => "UNKNOWN_IDENTIFIER",
            ErrorCode::TypeMismatch => "TYPE_MISMATCH",
            ErrorCode::StorageMismatch => "STORAGE_MISMATCH",
            ErrorCode::OverloadNotFound => "OVERLOAD_NOT_FOUND",
            ErrorCode::Unimplemented => "UNIMPLEMENTED",
        };
        f.write_str(name)
    }
}

/// Sink for compile- and shade-time diagnostics. Reports arrive through
/// `&self` so a policy can be shared between invocations on different grids.
pub trait ErrorPolicy {
    fn error(&self, code: ErrorCode, message: &str);
}

/// Forwards every report to the `log` facade.
#[derive(Debug, Default)]
pub struct LogErrorPolicy;

impl ErrorPolicy for LogErrorPolicy {
    fn error(&self, code: ErrorCode, message: &str) {
        log::error!("{}: {}", code, message);
    }
}

/// Retains every report; used by tests to assert on diagnostics.
#[derive(Debug, Default)]
pub struct CollectingErrorPolicy {
    errors: Mutex<Vec<(ErrorCode, String)>>,
}

impl CollectingErrorPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<(ErrorCode, String)> {
        self.errors.lock().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().unwrap().is_empty()
    }

    pub fn contains(&self, code: ErrorCode) -> bool {
        self.errors.lock().unwrap().iter().any(|(c, _)| *c == code)
    }
}

impl ErrorPolicy for CollectingErrorPolicy {
    fn error(&self, code: ErrorCode, message: &str) {
        self.errors.lock().unwrap().push((code, message.to_string()));
    }
}
