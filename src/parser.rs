use std::collections::HashSet;

use crate::error::SyntaxError;
use crate::token::{TokenKind, TokenStream};
use crate::value::Operator;

/// The fixed marker pair delimiting a directive.
pub const MARKER_OPEN: &str = "[{";
pub const MARKER_CLOSE: &str = "}]";

/// Whether the scanner treats the source as opaque text or as HTML, where
/// whitespace-only runs are dropped and whitespace collapses to one space.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize,
)]
pub enum SourceMode {
    #[default]
    Plain,
    Html,
}

type ScanResult<T> = Result<T, SyntaxError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementType {
    Condition,
    Repeater,
    Section,
    Component,
}

impl ElementType {
    fn keyword(self) -> &'static str {
        match self {
            Self::Condition => "condition",
            Self::Repeater => "repeater",
            Self::Section => "section",
            Self::Component => "component",
        }
    }
}

struct OpenElement {
    kind: ElementType,
    name: String,
    id: String,
}

struct Scanner<'a> {
    input: &'a str,
    pos: usize,
    /// Current line number (1-indexed); `\r\n`, `\n` and bare `\r` each
    /// count as one break.
    line: usize,
    mode: SourceMode,
    stream: TokenStream,
    text_buf: String,
    /// Stack of currently open elements. Closing validation looks back
    /// across the whole accumulated state, so this is explicit data, not
    /// call-stack depth.
    open_stack: Vec<OpenElement>,
    /// One name-set per nesting depth; non-condition elements register here
    /// so duplicate sibling names are rejected.
    scope_names: Vec<HashSet<String>>,
    next_id: u64,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str, mode: SourceMode) -> Self {
        Scanner {
            input,
            pos: 0,
            line: 1,
            mode,
            stream: TokenStream::new(),
            text_buf: String::new(),
            open_stack: Vec::new(),
            scope_names: vec![HashSet::new()],
            next_id: 0,
        }
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn error<M: Into<String>>(&self, message: M) -> SyntaxError {
        SyntaxError::new(message, self.line)
    }

    /// Consume one character (folding `\r\n` into a single step), tracking
    /// lines, and append it to `out`.
    fn bump(&mut self, out: &mut String) {
        let mut chars = self.input[self.pos..].chars();
        let Some(c) = chars.next() else { return };
        let mut len = c.len_utf8();
        match c {
            '\r' => {
                if chars.next() == Some('\n') {
                    len += 1;
                }
                self.line += 1;
            }
            '\n' => self.line += 1,
            _ => {}
        }
        out.push_str(&self.input[self.pos..self.pos + len]);
        self.pos += len;
    }

    fn run(mut self) -> ScanResult<TokenStream> {
        while !self.eof() {
            if self.peek(MARKER_OPEN) {
                self.flush_text()?;
                self.pos += MARKER_OPEN.len();
                let line = self.line;
                let body = self.collect_directive_body()?;
                self.process_directive(&body, line)?;
            } else if self.peek(MARKER_CLOSE) {
                return Err(self.error("Unexpected closing marker '}]'"));
            } else {
                let mut buf = std::mem::take(&mut self.text_buf);
                self.bump(&mut buf);
                self.text_buf = buf;
            }
        }
        self.flush_text()?;
        if let Some(open) = self.open_stack.last() {
            return Err(self.error(format!(
                "Unclosed element '{} {}'",
                open.kind.keyword(),
                open.name
            )));
        }
        Ok(self.stream)
    }

    /// Scan the directive body up to the closing marker. A nested opening
    /// marker or end-of-input inside a directive is a structural failure.
    fn collect_directive_body(&mut self) -> ScanResult<String> {
        let mut body = String::new();
        loop {
            if self.eof() {
                return Err(self.error("Unclosed marker"));
            }
            if self.peek(MARKER_OPEN) {
                return Err(self.error("Unexpected marker nesting"));
            }
            if self.peek(MARKER_CLOSE) {
                self.pos += MARKER_CLOSE.len();
                return Ok(body);
            }
            self.bump(&mut body);
        }
    }

    fn flush_text(&mut self) -> ScanResult<()> {
        if self.text_buf.is_empty() {
            return Ok(());
        }
        let buf = std::mem::take(&mut self.text_buf);
        let line = self.line;
        match self.mode {
            SourceMode::Plain => self
                .stream
                .push(TokenKind::TextPlain, Some(&buf))
                .map_err(|e| SyntaxError::from_list(e, line)),
            SourceMode::Html => {
                if buf.trim().is_empty() {
                    return Ok(());
                }
                let collapsed = collapse_whitespace(&buf);
                self.stream
                    .push(TokenKind::TextHtml, Some(&collapsed))
                    .map_err(|e| SyntaxError::from_list(e, line))
            }
        }
    }

    fn push(&mut self, kind: TokenKind, data: Option<&str>, line: usize) -> ScanResult<()> {
        self.stream
            .push(kind, data)
            .map_err(|e| SyntaxError::from_list(e, line))
    }

    fn process_directive(&mut self, body: &str, line: usize) -> ScanResult<()> {
        let words = split_words(body).map_err(|message| SyntaxError::new(message, line))?;
        let Some(keyword) = words.first() else {
            return Err(SyntaxError::new("Empty directive", line));
        };
        match keyword.to_ascii_lowercase().as_str() {
            "replace" | "var" => self.directive_replace(&words, line),
            "config" => self.directive_config(&words, line),
            "include" => self.directive_include(&words, line),
            "condition" | "if" => self.directive_element(ElementType::Condition, &words, line),
            "repeater" | "loop" => self.directive_element(ElementType::Repeater, &words, line),
            "section" => self.directive_element(ElementType::Section, &words, line),
            "component" => self.directive_element(ElementType::Component, &words, line),
            _ => Err(SyntaxError::new(
                format!("Unknown element '{}'", keyword),
                line,
            )),
        }
    }

    fn directive_replace(&mut self, words: &[String], line: usize) -> ScanResult<()> {
        let Some(name) = words.get(1) else {
            return Err(SyntaxError::new("replace requires a value name", line));
        };
        // Validate the flags up front so a bad directive leaves no partial
        // token trail.
        let mut flags = Vec::new();
        for word in &words[2..] {
            if word.eq_ignore_ascii_case("local") {
                flags.push(TokenKind::LocalFlag);
            } else if word.eq_ignore_ascii_case("raw") {
                flags.push(TokenKind::RawFlag);
            } else {
                return Err(SyntaxError::new(
                    format!("Unknown replace flag '{}'", word),
                    line,
                ));
            }
        }
        self.push(TokenKind::Replace, Some(name), line)?;
        for flag in flags {
            self.push(flag, None, line)?;
        }
        Ok(())
    }

    fn directive_config(&mut self, words: &[String], line: usize) -> ScanResult<()> {
        let inside_component = self
            .open_stack
            .last()
            .is_some_and(|open| open.kind == ElementType::Component);
        if !inside_component {
            return Err(SyntaxError::new(
                "config is only allowed inside a component",
                line,
            ));
        }
        let value = match words.len() {
            3 => &words[2],
            4 if words[2].eq_ignore_ascii_case("is") => &words[3],
            _ => {
                return Err(SyntaxError::new(
                    "config expects 'config NAME [is] VALUE'",
                    line,
                ));
            }
        };
        self.push(TokenKind::Config, Some(&words[1]), line)?;
        let (kind, data) = scalar_value_token(value);
        self.push(kind, data.as_deref(), line)
    }

    fn directive_include(&mut self, words: &[String], line: usize) -> ScanResult<()> {
        let Some(sub) = words.get(1) else {
            return Err(SyntaxError::new("include requires a path", line));
        };
        let kind = match sub.to_ascii_lowercase().as_str() {
            "template" => Some(TokenKind::IncludeTemplate),
            "component" => Some(TokenKind::IncludeComponent),
            _ => None,
        };
        match kind {
            Some(kind) => {
                let alias = match words.len() {
                    3 => None,
                    5 if words[3].eq_ignore_ascii_case("as") => Some(&words[4]),
                    _ => {
                        return Err(SyntaxError::new(
                            format!("include {} expects 'include {} NAME [as ALIAS]'", sub, sub),
                            line,
                        ));
                    }
                };
                self.push(kind, Some(&words[2]), line)?;
                if let Some(alias) = alias {
                    self.push(TokenKind::Name, Some(alias), line)?;
                }
                Ok(())
            }
            None => {
                if words.len() != 2 {
                    return Err(SyntaxError::new("include expects a single path", line));
                }
                self.push(TokenKind::Include, Some(sub), line)
            }
        }
    }

    fn directive_element(
        &mut self,
        ty: ElementType,
        words: &[String],
        line: usize,
    ) -> ScanResult<()> {
        let Some(name) = words.get(1) else {
            return Err(SyntaxError::new(
                format!("{} requires a name", ty.keyword()),
                line,
            ));
        };
        if words.len() == 3 && words[2].eq_ignore_ascii_case("end") {
            return self.close_element(ty, name, line);
        }
        self.open_element(ty, name.clone(), words, line)
    }

    fn close_element(&mut self, ty: ElementType, name: &str, line: usize) -> ScanResult<()> {
        let Some(open) = self.open_stack.pop() else {
            return Err(SyntaxError::new(
                format!("Unexpected closing of '{} {}'", ty.keyword(), name),
                line,
            ));
        };
        if open.kind != ty || open.name != name {
            return Err(SyntaxError::new(
                format!(
                    "Mismatched closing: expected '{} {} end', found '{} {} end'",
                    open.kind.keyword(),
                    open.name,
                    ty.keyword(),
                    name
                ),
                line,
            ));
        }
        self.push(TokenKind::EndElement, Some(&open.id), line)?;
        if ty != ElementType::Condition {
            self.scope_names.pop();
        }
        Ok(())
    }

    fn open_element(
        &mut self,
        ty: ElementType,
        name: String,
        words: &[String],
        line: usize,
    ) -> ScanResult<()> {
        // Validate the type-specific tail before touching any state.
        let tail = match ty {
            ElementType::Condition => Some(self.condition_tail(words, line)?),
            ElementType::Component => {
                if words.len() != 4 || !words[2].eq_ignore_ascii_case("class") {
                    return Err(SyntaxError::new(
                        "component expects 'component NAME class CLASSNAME'",
                        line,
                    ));
                }
                None
            }
            ElementType::Section | ElementType::Repeater => {
                if words.len() != 2 {
                    return Err(SyntaxError::new(
                        format!("{} expects '{} NAME'", ty.keyword(), ty.keyword()),
                        line,
                    ));
                }
                None
            }
        };

        if ty != ElementType::Condition {
            // Sibling conditions are exempt from the duplicate check; every
            // other element type registers its name at the current depth.
            let depth = self
                .scope_names
                .last_mut()
                .expect("scope stack always has a root level");
            if !depth.insert(name.clone()) {
                return Err(SyntaxError::new(
                    format!("Duplicate element name '{}' in scope", name),
                    line,
                ));
            }
            self.scope_names.push(HashSet::new());
        }

        self.next_id += 1;
        let id = self.next_id.to_string();
        self.open_stack.push(OpenElement {
            kind: ty,
            name: name.clone(),
            id: id.clone(),
        });

        self.push(TokenKind::StartElement, Some(&id), line)?;
        self.push(TokenKind::StartDefinition, Some(ty.keyword()), line)?;
        self.push(TokenKind::Name, Some(&name), line)?;
        match ty {
            ElementType::Condition => {
                let (local, operator, value) =
                    tail.expect("condition tail computed above");
                if local {
                    self.push(TokenKind::LocalFlag, None, line)?;
                }
                self.push(TokenKind::Operator, Some(operator.canonical()), line)?;
                self.push(value.0, value.1.as_deref(), line)?;
            }
            ElementType::Component => {
                self.push(TokenKind::Class, Some(&words[3]), line)?;
            }
            ElementType::Section | ElementType::Repeater => {}
        }
        self.push(TokenKind::EndDefinition, Some(ty.keyword()), line)
    }

    /// Parse the `OPERATOR VALUE... [local]` tail of an opening condition.
    fn condition_tail(
        &self,
        words: &[String],
        line: usize,
    ) -> ScanResult<(bool, Operator, (TokenKind, Option<String>))> {
        let mut rest: Vec<&String> = words[2..].iter().collect();
        let local = rest
            .last()
            .is_some_and(|word| word.eq_ignore_ascii_case("local"));
        if local {
            rest.pop();
        }
        let Some(op_word) = rest.first() else {
            return Err(SyntaxError::new("condition requires an operator", line));
        };
        let Some(operator) = Operator::parse_spelling(op_word.as_str()) else {
            return Err(SyntaxError::new(
                format!("Unknown operator '{}'", op_word),
                line,
            ));
        };
        let operands = &rest[1..];
        let value = match operator {
            Operator::In | Operator::NotIn => {
                if operands.is_empty() {
                    return Err(SyntaxError::new(
                        format!("operator '{}' requires at least one value", operator.canonical()),
                        line,
                    ));
                }
                let items: Vec<serde_json::Value> =
                    operands.iter().map(|word| scalar_json(word.as_str())).collect();
                let encoded = serde_json::to_string(&items)
                    .map_err(|e| SyntaxError::new(e.to_string(), line))?;
                (TokenKind::ValueArray, Some(encoded))
            }
            _ => {
                if operands.len() != 1 {
                    return Err(SyntaxError::new(
                        "condition expects exactly one comparison value",
                        line,
                    ));
                }
                scalar_value_token(operands[0].as_str())
            }
        };
        Ok((local, operator, value))
    }
}

/// Scan a raw source into a validated token stream. Comment-wrapped markers
/// are unwrapped first, independent of the source mode.
pub fn scan(source: &str, mode: SourceMode) -> Result<TokenStream, SyntaxError> {
    let unwrapped = unwrap_comment_markers(source);
    Scanner::new(&unwrapped, mode).run()
}

/// Rewrite `<!-- [{` / `}] -->` and `/* [{` / `}] */` wrappers to bare
/// markers, whitespace-tolerant around the inner marker. Each half is
/// replaced independently.
fn unwrap_comment_markers(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut pos = 0;
    while pos < source.len() {
        let rest = &source[pos..];
        if let Some(skipped) = wrapped_open(rest, "<!--").or_else(|| wrapped_open(rest, "/*")) {
            out.push_str(MARKER_OPEN);
            pos += skipped;
            continue;
        }
        if rest.starts_with(MARKER_CLOSE) {
            out.push_str(MARKER_CLOSE);
            pos += MARKER_CLOSE.len();
            let tail = &source[pos..];
            let ws = tail.len() - tail.trim_start().len();
            if tail[ws..].starts_with("-->") {
                pos += ws + 3;
            } else if tail[ws..].starts_with("*/") {
                pos += ws + 2;
            }
            continue;
        }
        let c = rest.chars().next().expect("bounds checked above");
        out.push(c);
        pos += c.len_utf8();
    }
    out
}

/// If `rest` begins with `prefix`, optional whitespace and an opening
/// marker, return the byte length through the end of that marker.
fn wrapped_open(rest: &str, prefix: &str) -> Option<usize> {
    let after = rest.strip_prefix(prefix)?;
    let ws = after.len() - after.trim_start().len();
    if after[ws..].starts_with(MARKER_OPEN) {
        Some(prefix.len() + ws + MARKER_OPEN.len())
    } else {
        None
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_ws = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_ws {
                out.push(' ');
            }
            in_ws = true;
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    out
}

/// Split a directive body into words, honoring single/double quotes with
/// backslash-escaped quote characters.
fn split_words(body: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut started = false;
    let mut quote: Option<char> = None;
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && matches!(chars.peek(), Some('\'') | Some('"')) {
            current.push(chars.next().expect("peeked above"));
            started = true;
            continue;
        }
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                    started = true;
                } else if c.is_whitespace() {
                    if started {
                        words.push(std::mem::take(&mut current));
                        started = false;
                    }
                } else {
                    current.push(c);
                    started = true;
                }
            }
        }
    }
    if quote.is_some() {
        return Err("Unterminated quote in directive".to_string());
    }
    if started {
        words.push(current);
    }
    Ok(words)
}

/// Encode one directive word as a value token: integer, boolean, null, or a
/// verbatim string.
fn scalar_value_token(word: &str) -> (TokenKind, Option<String>) {
    if is_int(word) {
        (TokenKind::ValueInt, Some(word.to_string()))
    } else if word.eq_ignore_ascii_case("true") {
        (TokenKind::ValueBool, Some("1".to_string()))
    } else if word.eq_ignore_ascii_case("false") {
        (TokenKind::ValueBool, Some("0".to_string()))
    } else if word.eq_ignore_ascii_case("null") {
        (TokenKind::ValueNull, None)
    } else {
        (TokenKind::ValueString, Some(word.to_string()))
    }
}

fn scalar_json(word: &str) -> serde_json::Value {
    if is_int(word) {
        match word.parse::<i64>() {
            Ok(value) => serde_json::Value::from(value),
            Err(_) => serde_json::Value::from(word),
        }
    } else if word.eq_ignore_ascii_case("true") {
        serde_json::Value::from(true)
    } else if word.eq_ignore_ascii_case("false") {
        serde_json::Value::from(false)
    } else if word.eq_ignore_ascii_case("null") {
        serde_json::Value::Null
    } else {
        serde_json::Value::from(word)
    }
}

fn is_int(word: &str) -> bool {
    let digits = word.strip_prefix('-').unwrap_or(word);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}
