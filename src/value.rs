use std::cmp::Ordering;

/// A runtime value bound into a template: either supplied by the caller
/// through the binding API or decoded from a value token at build time.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Array(Vec<Value>),
}

impl Value {
    /// Coerce to the string form used by Replace output. Null renders empty,
    /// booleans render "1"/"", arrays join their elements with commas.
    pub fn to_display(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(true) => "1".to_string(),
            Self::Bool(false) => String::new(),
            Self::Int(value) => value.to_string(),
            Self::Str(value) => value.clone(),
            Self::Array(values) => {
                let parts: Vec<String> = values.iter().map(Self::to_display).collect();
                parts.join(",")
            }
        }
    }

    /// Loose equality, used by `==`/`!=` and per-element by `in`/`!in`.
    ///
    /// The coercion rule (one consistent choice, documented in DESIGN.md):
    /// null equals null, false, zero and the empty string; booleans compare
    /// against ints as 0/1 and against strings by emptiness (with "0" also
    /// counting as false); ints compare against strings only when the string
    /// parses as the same integer; arrays compare element-wise.
    pub fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Null, Self::Bool(b)) | (Self::Bool(b), Self::Null) => !b,
            (Self::Null, Self::Int(i)) | (Self::Int(i), Self::Null) => *i == 0,
            (Self::Null, Self::Str(s)) | (Self::Str(s), Self::Null) => s.is_empty(),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Bool(b), Self::Int(i)) | (Self::Int(i), Self::Bool(b)) => *b == (*i != 0),
            (Self::Bool(b), Self::Str(s)) | (Self::Str(s), Self::Bool(b)) => {
                *b == !(s.is_empty() || s == "0")
            }
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Int(i), Self::Str(s)) | (Self::Str(s), Self::Int(i)) => {
                s.parse::<i64>().map(|parsed| parsed == *i).unwrap_or(false)
            }
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.loose_eq(y))
            }
            (Self::Array(_), _) | (_, Self::Array(_)) => false,
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`. Numeric when both sides coerce to
    /// an integer (null counts as zero, booleans as 0/1, numeric strings
    /// parse), lexicographic on the display forms otherwise.
    pub fn loose_cmp(&self, other: &Self) -> Ordering {
        match (self.as_int(), other.as_int()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.to_display().cmp(&other.to_display()),
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Self::Null => Some(0),
            Self::Bool(value) => Some(i64::from(*value)),
            Self::Int(value) => Some(*value),
            Self::Str(value) => value.parse().ok(),
            Self::Array(_) => None,
        }
    }
}

/// The canonical comparison operators a condition may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

impl Operator {
    /// Normalize a directive spelling. Returns `None` for anything outside
    /// the fixed table.
    pub fn parse_spelling(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "is" | "=" | "==" => Some(Self::Eq),
            "not" | "!=" | "<>" => Some(Self::Ne),
            "in" => Some(Self::In),
            "!in" | "notin" => Some(Self::NotIn),
            "greater" | "gt" | ">" => Some(Self::Gt),
            "gte" | ">=" => Some(Self::Ge),
            "smaller" | "lt" | "<" => Some(Self::Lt),
            "lte" | "<=" => Some(Self::Le),
            _ => None,
        }
    }

    pub fn canonical(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::NotIn => "!in",
        }
    }

    pub fn from_canonical(data: &str) -> Option<Self> {
        match data {
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "in" => Some(Self::In),
            "!in" => Some(Self::NotIn),
            _ => None,
        }
    }

    /// Evaluate `left OP right`. Membership tests short-circuit on the first
    /// matching element; a membership test against a non-array operand is
    /// logged and evaluates to false.
    pub fn evaluate(self, left: &Value, right: &Value) -> bool {
        match self {
            Self::Eq => left.loose_eq(right),
            Self::Ne => !left.loose_eq(right),
            Self::Lt => left.loose_cmp(right) == Ordering::Less,
            Self::Le => left.loose_cmp(right) != Ordering::Greater,
            Self::Gt => left.loose_cmp(right) == Ordering::Greater,
            Self::Ge => left.loose_cmp(right) != Ordering::Less,
            Self::In | Self::NotIn => {
                let Value::Array(items) = right else {
                    tracing::warn!(
                        operator = self.canonical(),
                        "membership comparison against a non-array value"
                    );
                    return false;
                };
                let found = items.iter().any(|item| left.loose_eq(item));
                if self == Self::In { found } else { !found }
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::Array(values)
    }
}
