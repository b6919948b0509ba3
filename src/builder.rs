use std::path::{Path, PathBuf};

use crate::component::ComponentRegistry;
use crate::error::{BrackenError, BrackenResult};
use crate::interface::FileAccess;
use crate::node::{NodeId, NodeKind, Tree};
use crate::parser::{scan, SourceMode};
use crate::token::{Expect, Token, TokenKind, TokenStream};
use crate::translate::Localizer;
use crate::value::Operator;

/// Walks a token stream and grows the node tree, resolving includes and
/// instantiating components along the way.
pub struct TreeBuilder<'a> {
    pub files: &'a dyn FileAccess,
    pub registry: &'a ComponentRegistry,
    pub mode: SourceMode,
    /// Directory of the template currently being built; the first candidate
    /// for relative include paths.
    pub base_dir: Option<PathBuf>,
    pub localizer: Option<Localizer<'a>>,
}

impl<'a> TreeBuilder<'a> {
    fn with_base(&self, base_dir: Option<PathBuf>) -> TreeBuilder<'a> {
        TreeBuilder {
            files: self.files,
            registry: self.registry,
            mode: self.mode,
            base_dir,
            localizer: self.localizer,
        }
    }

    /// Build every token of `stream` into children of `parent`. An empty
    /// stream leaves the parent untouched; a text parent can never take
    /// children.
    pub fn build(
        &self,
        stream: &mut TokenStream,
        tree: &mut Tree,
        parent: NodeId,
    ) -> BrackenResult<()> {
        if matches!(tree.node(parent).kind(), NodeKind::Text { .. }) {
            return Err(BrackenError::build("cannot build content into a text node"));
        }
        if stream.is_empty() {
            return Ok(());
        }
        stream.reset();
        loop {
            let token = stream
                .current()
                .cloned()
                .ok_or_else(|| BrackenError::build("token stream has no current token"))?;
            match token.kind() {
                TokenKind::TextPlain | TokenKind::TextHtml => {
                    tree.append_new(
                        parent,
                        NodeKind::Text {
                            content: token.data().unwrap_or_default().to_string(),
                        },
                    )?;
                }
                TokenKind::Replace => {
                    self.build_replace(stream, tree, parent, &token)?;
                }
                TokenKind::Include => {
                    self.build_include(tree, parent, token.data().unwrap_or_default())?;
                }
                TokenKind::IncludeTemplate => {
                    self.build_template_include(
                        stream,
                        tree,
                        parent,
                        token.data().unwrap_or_default(),
                    )?;
                }
                TokenKind::IncludeComponent => {
                    self.build_component_include(
                        stream,
                        tree,
                        parent,
                        token.data().unwrap_or_default(),
                    )?;
                }
                TokenKind::StartElement => {
                    self.build_element(stream, tree, parent, &token)?;
                }
                TokenKind::Config => {
                    self.build_config(stream, tree, parent, &token)?;
                }
                other => {
                    return Err(BrackenError::build(format!(
                        "unexpected token {:?} while building",
                        other
                    )));
                }
            }
            if !stream.advance(None)? {
                break;
            }
        }
        Ok(())
    }

    fn build_replace(
        &self,
        stream: &mut TokenStream,
        tree: &mut Tree,
        parent: NodeId,
        token: &Token,
    ) -> BrackenResult<()> {
        let name = token.data().unwrap_or_default().to_string();
        let mut local = false;
        let mut raw = false;
        // Consume trailing flags greedily; the first non-flag token is
        // pushed back for the main loop.
        while let Some(next) = stream.read_next(None)? {
            match next.kind() {
                TokenKind::LocalFlag => local = true,
                TokenKind::RawFlag => raw = true,
                _ => {
                    stream.retreat();
                    break;
                }
            }
        }
        tree.append_new(parent, NodeKind::Replace { name, local, raw })?;
        Ok(())
    }

    fn build_include(&self, tree: &mut Tree, parent: NodeId, path: &str) -> BrackenResult<()> {
        let file = self.resolve(path)?;
        let content = self.files.read_all(&file)?;
        if !content.trim().is_empty() {
            tree.append_new(parent, NodeKind::Text { content })?;
        }
        Ok(())
    }

    fn build_template_include(
        &self,
        stream: &mut TokenStream,
        tree: &mut Tree,
        parent: NodeId,
        target: &str,
    ) -> BrackenResult<()> {
        let alias = self.optional_name(stream)?;
        let file = self.resolve(target)?;
        let raw = self.files.read_all(&file)?;
        // A localized root localizes its includes too, falling back to the
        // plain source when the catalogue has nothing for this file.
        let source = match &self.localizer {
            Some(localizer) => match localizer.localize(&file, &raw) {
                Ok(localized) => localized,
                Err(error) => {
                    tracing::debug!(
                        file = %file.display(),
                        %error,
                        "no translations for included template, using plain source"
                    );
                    raw
                }
            },
            None => raw,
        };
        let mut sub = scan(&source, self.mode)?;
        let name = match alias {
            Some(alias) => alias,
            None => derived_section_name(&file)?,
        };
        let section = tree.append_new(parent, NodeKind::Section { name })?;
        self.with_base(file.parent().map(Path::to_path_buf))
            .build(&mut sub, tree, section)
    }

    fn build_component_include(
        &self,
        stream: &mut TokenStream,
        tree: &mut Tree,
        parent: NodeId,
        target: &str,
    ) -> BrackenResult<()> {
        let alias = self.optional_name(stream)?;
        let file = self.resolve(target)?;
        let raw = self.files.read_all(&file)?;
        let mut sub = scan(&raw, self.mode)?;
        validate_single_component(&mut sub)?;
        if let Some(alias) = alias {
            sub.rewrite_first_name(&alias)?;
        }
        sub.reset();
        // The component lands directly under the current parent, without a
        // wrapping section.
        self.with_base(file.parent().map(Path::to_path_buf))
            .build(&mut sub, tree, parent)
    }

    fn build_element(
        &self,
        stream: &mut TokenStream,
        tree: &mut Tree,
        parent: NodeId,
        start: &Token,
    ) -> BrackenResult<()> {
        let element_id = start.data().unwrap_or_default().to_string();
        let definition = self
            .require(stream, Expect::Kind(TokenKind::StartDefinition))?
            .data()
            .unwrap_or_default()
            .to_string();
        let name = self
            .require(stream, Expect::Kind(TokenKind::Name))?
            .data()
            .unwrap_or_default()
            .to_string();

        let child = match definition.as_str() {
            "section" => tree.append_new(parent, NodeKind::Section { name })?,
            "repeater" => tree.append_new(
                parent,
                NodeKind::Repeater {
                    name,
                    captured: Vec::new(),
                },
            )?,
            "condition" => {
                let mut local = false;
                if let Some(next) = stream.read_next(None)? {
                    if next.kind() == TokenKind::LocalFlag {
                        local = true;
                    } else {
                        stream.retreat();
                    }
                }
                let operator_data = self
                    .require(stream, Expect::Kind(TokenKind::Operator))?
                    .data()
                    .unwrap_or_default()
                    .to_string();
                let operator = Operator::from_canonical(&operator_data).ok_or_else(|| {
                    BrackenError::build(format!("unknown operator '{}' in stream", operator_data))
                })?;
                let operand = self.require(stream, Expect::AnyValue)?.to_value()?;
                tree.append_new(
                    parent,
                    NodeKind::Condition {
                        name,
                        local,
                        operator,
                        operand,
                    },
                )?
            }
            "component" => {
                let class = self
                    .require(stream, Expect::Kind(TokenKind::Class))?
                    .data()
                    .unwrap_or_default()
                    .to_string();
                if !self.registry.contains(&class) {
                    return Err(BrackenError::build(format!(
                        "unknown component class '{}'",
                        class
                    )));
                }
                tree.append_new(
                    parent,
                    NodeKind::Component {
                        name,
                        class,
                        defaults: Default::default(),
                        options: Default::default(),
                    },
                )?
            }
            other => {
                return Err(BrackenError::build(format!(
                    "unknown element type '{}'",
                    other
                )));
            }
        };

        self.require(stream, Expect::Kind(TokenKind::EndDefinition))?;
        let mut body = stream.collect_until(TokenKind::EndElement, Some(&element_id))?;
        self.build(&mut body, tree, child)
    }

    fn build_config(
        &self,
        stream: &mut TokenStream,
        tree: &mut Tree,
        parent: NodeId,
        token: &Token,
    ) -> BrackenResult<()> {
        if !matches!(tree.node(parent).kind(), NodeKind::Component { .. }) {
            return Err(BrackenError::build(
                "config is only valid inside a component",
            ));
        }
        let key = token.data().unwrap_or_default().to_string();
        let value = self.require(stream, Expect::AnyValue)?.to_value()?;
        tree.set_default_option(parent, &key, value)
    }

    /// Advance expecting `expect`; running off the end of the stream is a
    /// build failure here, not an ordinary end-of-stream.
    fn require(&self, stream: &mut TokenStream, expect: Expect) -> BrackenResult<Token> {
        match stream.read_next(Some(expect))? {
            Some(token) => Ok(token.clone()),
            None => Err(BrackenError::build("token stream ended mid-element")),
        }
    }

    /// Peek for an optional name token (an include alias).
    fn optional_name(&self, stream: &mut TokenStream) -> BrackenResult<Option<String>> {
        match stream.read_next(None)? {
            Some(token) if token.kind() == TokenKind::Name => {
                Ok(token.data().map(str::to_string))
            }
            Some(_) => {
                stream.retreat();
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Resolve an include path against the including template's directory,
    /// falling back to the working directory. Unresolvable paths are hard
    /// errors.
    fn resolve(&self, path: &str) -> BrackenResult<PathBuf> {
        if let Some(base) = &self.base_dir {
            let candidate = base.join(path);
            if self.files.readable(&candidate) {
                return Ok(candidate);
            }
        }
        let candidate = PathBuf::from(path);
        if self.files.readable(&candidate) {
            return Ok(candidate);
        }
        Err(BrackenError::build(format!(
            "include '{}' could not be resolved",
            path
        )))
    }
}

/// Section name for an unaliased template include: the file stem with every
/// non-alphanumeric character stripped.
fn derived_section_name(file: &Path) -> BrackenResult<String> {
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let name: String = stem.chars().filter(char::is_ascii_alphanumeric).collect();
    if name.is_empty() || name.chars().all(|c| c.is_ascii_digit()) {
        return Err(BrackenError::build(format!(
            "cannot derive a section name from '{}'",
            file.display()
        )));
    }
    Ok(name)
}

/// An included component file must hold exactly one top-level component
/// element and nothing else.
fn validate_single_component(stream: &mut TokenStream) -> BrackenResult<()> {
    stream.reset();
    let malformed =
        || BrackenError::build("included component file must contain exactly one component");
    let first = stream.current().ok_or_else(malformed)?;
    if first.kind() != TokenKind::StartElement {
        return Err(malformed());
    }
    let element_id = first.data().unwrap_or_default().to_string();
    let definition = stream
        .read_next(None)?
        .filter(|t| t.kind() == TokenKind::StartDefinition)
        .ok_or_else(malformed)?;
    if definition.data() != Some("component") {
        return Err(malformed());
    }
    stream
        .collect_until(TokenKind::EndElement, Some(&element_id))
        .map_err(|_| malformed())?;
    if stream.advance(None)? {
        return Err(malformed());
    }
    Ok(())
}
