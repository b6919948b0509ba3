use crate::token::TokenKind;

pub type BrackenResult<T> = std::result::Result<T, BrackenError>;

/// Errors raised by the token list: invalid data for a kind, or a cursor
/// protocol violation. When one of these surfaces while a directive is being
/// processed, the parser converts it into a [`SyntaxError`] carrying the
/// current line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListError {
    MissingData {
        kind: TokenKind,
    },
    ForbiddenData {
        kind: TokenKind,
    },
    InvalidData {
        kind: TokenKind,
        data: String,
    },
    UnexpectedKind {
        expected: String,
        found: TokenKind,
    },
    /// The stream ran out while a bounded collection was still looking for
    /// its end token.
    UnexpectedEnd {
        expected: String,
    },
}

impl std::fmt::Display for ListError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingData { kind } => {
                write!(f, "Token {:?} requires data", kind)
            }
            Self::ForbiddenData { kind } => {
                write!(f, "Token {:?} must not carry data", kind)
            }
            Self::InvalidData { kind, data } => {
                write!(f, "Invalid data for token {:?}: '{}'", kind, data)
            }
            Self::UnexpectedKind { expected, found } => {
                write!(f, "Expected {} token, found {:?}", expected, found)
            }
            Self::UnexpectedEnd { expected } => {
                write!(f, "Token stream ended while looking for {}", expected)
            }
        }
    }
}

impl std::error::Error for ListError {}

/// A malformed directive. Always carries the source line it was found on;
/// the message renders with the line appended, matching the template author's
/// view of the file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    pub(crate) fn new<M: Into<String>>(message: M, line: usize) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }

    /// Re-raise a token-list failure as a syntax error, preserving the
    /// message and attaching the line the directive sits on.
    pub(crate) fn from_list(error: ListError, line: usize) -> Self {
        Self {
            line,
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on line {}", self.message, self.line)
    }
}

impl std::error::Error for SyntaxError {}

/// Raised by a component's prepare hook. Recovered in two places: on reload
/// the failing component is detached, and during render the component yields
/// an empty string. Neither is fatal to the surrounding render.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentError {
    pub message: String,
}

impl ComponentError {
    pub fn new<M: Into<String>>(message: M) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ComponentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Component error: {}", self.message)
    }
}

impl std::error::Error for ComponentError {}

/// Recoverable "no usable cached copy" signal; the caller falls back to a
/// full re-parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheError {
    pub message: String,
}

impl CacheError {
    pub fn new<M: Into<String>>(message: M) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cache unavailable: {}", self.message)
    }
}

impl std::error::Error for CacheError {}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BrackenError {
    Syntax(SyntaxError),
    List(ListError),
    /// Structural failure while assembling the tree: a missing include file,
    /// an unknown component class, a malformed include composition.
    Build {
        message: String,
    },
    Cache(CacheError),
    /// Name lookup failure. Callers treat this as "absent" and may fall back
    /// to setting a plain value instead.
    NodeNotFound {
        name: String,
    },
    Component(ComponentError),
}

impl BrackenError {
    pub(crate) fn build<M: Into<String>>(message: M) -> Self {
        Self::Build {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for BrackenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax(error) => write!(f, "{}", error),
            Self::List(error) => write!(f, "{}", error),
            Self::Build { message } => write!(f, "Build error: {}", message),
            Self::Cache(error) => write!(f, "{}", error),
            Self::NodeNotFound { name } => write!(f, "No node named '{}'", name),
            Self::Component(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for BrackenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Syntax(error) => Some(error),
            Self::List(error) => Some(error),
            Self::Cache(error) => Some(error),
            Self::Component(error) => Some(error),
            Self::Build { .. } | Self::NodeNotFound { .. } => None,
        }
    }
}

impl From<SyntaxError> for BrackenError {
    fn from(error: SyntaxError) -> Self {
        Self::Syntax(error)
    }
}

impl From<ListError> for BrackenError {
    fn from(error: ListError) -> Self {
        Self::List(error)
    }
}

impl From<CacheError> for BrackenError {
    fn from(error: CacheError) -> Self {
        Self::Cache(error)
    }
}

impl From<ComponentError> for BrackenError {
    fn from(error: ComponentError) -> Self {
        Self::Component(error)
    }
}
