use crate::error::ListError;
use crate::value::Value;

/// The closed set of token kinds a directive stream is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    TextPlain,
    TextHtml,
    StartElement,
    EndElement,
    StartDefinition,
    EndDefinition,
    Name,
    Config,
    LocalFlag,
    RawFlag,
    Include,
    IncludeTemplate,
    IncludeComponent,
    Operator,
    Class,
    ValueBool,
    ValueNull,
    ValueInt,
    ValueArray,
    ValueString,
    Replace,
}

impl TokenKind {
    pub fn is_value(self) -> bool {
        matches!(
            self,
            Self::ValueBool | Self::ValueNull | Self::ValueInt | Self::ValueArray | Self::ValueString
        )
    }
}

/// What [`TokenStream::advance`] may be told to expect: a concrete kind, or
/// any of the value-* kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Kind(TokenKind),
    AnyValue,
}

impl Expect {
    fn matches(self, kind: TokenKind) -> bool {
        match self {
            Self::Kind(expected) => expected == kind,
            Self::AnyValue => kind.is_value(),
        }
    }

    fn describe(self) -> String {
        match self {
            Self::Kind(kind) => format!("{:?}", kind),
            Self::AnyValue => "any value".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    kind: TokenKind,
    data: Option<String>,
}

impl Token {
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    /// Decode a value-* token into a runtime [`Value`].
    pub fn to_value(&self) -> Result<Value, ListError> {
        let data = self.data.as_deref();
        match self.kind {
            TokenKind::ValueNull => Ok(Value::Null),
            TokenKind::ValueBool => Ok(Value::Bool(data == Some("1"))),
            TokenKind::ValueInt => {
                let raw = data.unwrap_or_default();
                raw.parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| ListError::InvalidData {
                        kind: self.kind,
                        data: raw.to_string(),
                    })
            }
            TokenKind::ValueString => Ok(Value::Str(data.unwrap_or_default().to_string())),
            TokenKind::ValueArray => {
                let raw = data.unwrap_or_default();
                let parsed: Vec<serde_json::Value> =
                    serde_json::from_str(raw).map_err(|_| ListError::InvalidData {
                        kind: self.kind,
                        data: raw.to_string(),
                    })?;
                let mut values = Vec::with_capacity(parsed.len());
                for item in &parsed {
                    values.push(json_to_value(item).ok_or_else(|| ListError::InvalidData {
                        kind: self.kind,
                        data: raw.to_string(),
                    })?);
                }
                Ok(Value::Array(values))
            }
            _ => Err(ListError::UnexpectedKind {
                expected: "any value".to_string(),
                found: self.kind,
            }),
        }
    }
}

fn json_to_value(json: &serde_json::Value) -> Option<Value> {
    match json {
        serde_json::Value::Null => Some(Value::Null),
        serde_json::Value::Bool(value) => Some(Value::Bool(*value)),
        serde_json::Value::Number(value) => value.as_i64().map(Value::Int),
        serde_json::Value::String(value) => Some(Value::Str(value.clone())),
        serde_json::Value::Array(values) => {
            let mut out = Vec::with_capacity(values.len());
            for item in values {
                out.push(json_to_value(item)?);
            }
            Some(Value::Array(out))
        }
        serde_json::Value::Object(_) => None,
    }
}

/// A name in the named token class: alphanumeric/underscore, and not purely
/// numeric (a purely numeric name would be indistinguishable from an index).
fn valid_name(data: &str) -> bool {
    !data.is_empty()
        && data.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !data.chars().all(|c| c.is_ascii_digit())
}

/// An ordered, append-validated sequence of tokens with a movable cursor.
///
/// The cursor always points at exactly one current token, or is unset while
/// the stream is empty. Moving past either end reports "not found" rather
/// than failing; an expected-kind mismatch always fails and restores the
/// prior cursor position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenStream {
    tokens: Vec<Token>,
    cursor: Option<usize>,
}

impl TokenStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Iterate the tokens in order, independent of the cursor.
    pub fn tokens(&self) -> std::slice::Iter<'_, Token> {
        self.tokens.iter()
    }

    /// Validate and append a token. Whitespace-only data is normalized to
    /// absent for the kinds that treat content as text, which then fails
    /// their presence requirement.
    pub fn push(&mut self, kind: TokenKind, data: Option<&str>) -> Result<(), ListError> {
        let data = Self::validate(kind, data)?;
        self.tokens.push(Token { kind, data });
        if self.cursor.is_none() {
            self.cursor = Some(0);
        }
        Ok(())
    }

    fn validate(kind: TokenKind, data: Option<&str>) -> Result<Option<String>, ListError> {
        match kind {
            // Named tokens: required, restricted charset, not purely numeric.
            TokenKind::Replace | TokenKind::Name | TokenKind::Config | TokenKind::Class => {
                let data = data.ok_or(ListError::MissingData { kind })?;
                if !valid_name(data) {
                    return Err(ListError::InvalidData {
                        kind,
                        data: data.to_string(),
                    });
                }
                Ok(Some(data.to_string()))
            }
            TokenKind::ValueArray => {
                let data = data.ok_or(ListError::MissingData { kind })?;
                if serde_json::from_str::<Vec<serde_json::Value>>(data).is_err() {
                    return Err(ListError::InvalidData {
                        kind,
                        data: data.to_string(),
                    });
                }
                Ok(Some(data.to_string()))
            }
            // Content tokens: whitespace-only collapses to absent, which is
            // then an error because these kinds cannot be empty.
            TokenKind::TextHtml
            | TokenKind::StartElement
            | TokenKind::EndElement
            | TokenKind::StartDefinition
            | TokenKind::EndDefinition
            | TokenKind::Include
            | TokenKind::IncludeTemplate
            | TokenKind::IncludeComponent
            | TokenKind::Operator
            | TokenKind::ValueString => {
                let data = data.filter(|d| !d.trim().is_empty());
                let data = data.ok_or(ListError::MissingData { kind })?;
                Ok(Some(data.to_string()))
            }
            // Required, but "0" (and plain whitespace in text) is legal data.
            TokenKind::ValueBool | TokenKind::ValueInt | TokenKind::TextPlain => {
                let data = data.ok_or(ListError::MissingData { kind })?;
                Ok(Some(data.to_string()))
            }
            TokenKind::LocalFlag | TokenKind::RawFlag | TokenKind::ValueNull => {
                if data.is_some() {
                    return Err(ListError::ForbiddenData { kind });
                }
                Ok(None)
            }
        }
    }

    pub fn current(&self) -> Option<&Token> {
        self.cursor.and_then(|i| self.tokens.get(i))
    }

    /// Move the cursor to the next token. Returns `false` at end-of-stream.
    /// With an expectation, a kind mismatch restores the cursor and fails.
    pub fn advance(&mut self, expect: Option<Expect>) -> Result<bool, ListError> {
        let next = match self.cursor {
            None => return Ok(false),
            Some(i) => i + 1,
        };
        let Some(token) = self.tokens.get(next) else {
            return Ok(false);
        };
        if let Some(expect) = expect {
            if !expect.matches(token.kind) {
                return Err(ListError::UnexpectedKind {
                    expected: expect.describe(),
                    found: token.kind,
                });
            }
        }
        self.cursor = Some(next);
        Ok(true)
    }

    /// Move the cursor back one token. Returns `false` when already at the
    /// start.
    pub fn retreat(&mut self) -> bool {
        match self.cursor {
            Some(i) if i > 0 => {
                self.cursor = Some(i - 1);
                true
            }
            _ => false,
        }
    }

    /// Advance and hand back the new current token, or `None` at the end.
    pub fn read_next(&mut self, expect: Option<Expect>) -> Result<Option<&Token>, ListError> {
        if self.advance(expect)? {
            Ok(self.current())
        } else {
            Ok(None)
        }
    }

    pub fn reset(&mut self) {
        if !self.tokens.is_empty() {
            self.cursor = Some(0);
        }
    }

    pub fn seek_end(&mut self) {
        if !self.tokens.is_empty() {
            self.cursor = Some(self.tokens.len() - 1);
        }
    }

    /// Advance past the current token, copying everything visited into a new
    /// sub-stream, until a token matches `kind` (and `data`, when given).
    /// The matching end token is left as the current token and not copied.
    pub fn collect_until(
        &mut self,
        kind: TokenKind,
        data: Option<&str>,
    ) -> Result<Self, ListError> {
        let mut sub = Self::new();
        loop {
            if !self.advance(None)? {
                return Err(ListError::UnexpectedEnd {
                    expected: match data {
                        Some(data) => format!("{:?}('{}')", kind, data),
                        None => format!("{:?}", kind),
                    },
                });
            }
            // Current token is guaranteed present after a successful advance.
            let token = match self.current() {
                Some(token) => token.clone(),
                None => break,
            };
            if token.kind == kind && (data.is_none() || token.data.as_deref() == data) {
                break;
            }
            // Raw copy: these tokens already passed validation once.
            sub.tokens.push(token);
        }
        sub.reset();
        Ok(sub)
    }

    /// The one sanctioned rewrite: rename the stream's first name token, used
    /// when an included component is aliased.
    pub(crate) fn rewrite_first_name(&mut self, alias: &str) -> Result<(), ListError> {
        if !valid_name(alias) {
            return Err(ListError::InvalidData {
                kind: TokenKind::Name,
                data: alias.to_string(),
            });
        }
        for token in &mut self.tokens {
            if token.kind == TokenKind::Name {
                token.data = Some(alias.to_string());
                return Ok(());
            }
        }
        Err(ListError::UnexpectedEnd {
            expected: "Name".to_string(),
        })
    }
}
