use std::path::PathBuf;
use std::rc::Rc;

use crate::builder::TreeBuilder;
use crate::component::{ComponentRegistry, ComponentScope};
use crate::error::{BrackenError, BrackenResult};
use crate::interface::{Escaper, HtmlEscaper, StdFiles};
use crate::node::{NodeId, NodeKind, RenderEnv, Tree};
use crate::parser::{scan, SourceMode};
use crate::value::Value;

/// Result of the two-step name resolution: a named child node when one
/// exists, otherwise the plainly-bound value (if any).
#[derive(Debug, Clone, PartialEq)]
pub enum ChildOrValue {
    Child(NodeId),
    Value(Option<Value>),
}

/// Serialized form of a compiled template. Lookup caches and runtime
/// component options never make it in; repeater captures do.
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct Snapshot {
    pub(crate) tree: Tree,
    pub(crate) mode: SourceMode,
    pub(crate) localized: bool,
}

/// A compiled template: the node tree plus everything needed to render it.
///
/// A template instance is single-consumer between [`Template::reset_template`]
/// calls; clone the tree first if independent concurrent use is needed.
///
/// # Example
///
/// ```rust
/// use bracken::{SourceMode, Template};
///
/// let mut template = Template::parse("Hello [{replace name}]!", SourceMode::Plain).unwrap();
/// template.set_value("name", "World");
/// assert_eq!(template.render(), "Hello World!");
/// ```
pub struct Template {
    tree: Tree,
    mode: SourceMode,
    localized: bool,
    source_path: Option<PathBuf>,
    escaper: Rc<dyn Escaper>,
    registry: Rc<ComponentRegistry>,
}

impl Template {
    /// Compile a standalone source string with the default escaper and an
    /// empty component registry. Templates using components or includes
    /// should go through the engine instead.
    ///
    /// # Errors
    ///
    /// Any syntax or build failure aborts the whole parse; no partial
    /// template is returned.
    pub fn parse(source: &str, mode: SourceMode) -> BrackenResult<Self> {
        let registry = Rc::new(ComponentRegistry::new());
        let mut stream = scan(source, mode)?;
        let mut tree = Tree::new("template");
        let root = tree.root();
        TreeBuilder {
            files: &StdFiles,
            registry: &registry,
            mode,
            base_dir: None,
            localizer: None,
        }
        .build(&mut stream, &mut tree, root)?;
        Ok(Self::from_parts(tree, mode, false, None, Rc::new(HtmlEscaper), registry))
    }

    pub(crate) fn from_parts(
        tree: Tree,
        mode: SourceMode,
        localized: bool,
        source_path: Option<PathBuf>,
        escaper: Rc<dyn Escaper>,
        registry: Rc<ComponentRegistry>,
    ) -> Self {
        Self {
            tree,
            mode,
            localized,
            source_path,
            escaper,
            registry,
        }
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    pub fn is_localized(&self) -> bool {
        self.localized
    }

    pub fn source_path(&self) -> Option<&PathBuf> {
        self.source_path.as_ref()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    fn env(&self) -> RenderEnv<'_> {
        RenderEnv {
            escaper: self.escaper.as_ref(),
            registry: self.registry.as_ref(),
        }
    }

    /// Render the whole tree to a string. Render-time component failures
    /// are contained (the component yields nothing); everything else was
    /// already validated at parse/build time.
    pub fn render(&mut self) -> String {
        let root = self.tree.root();
        let env = RenderEnv {
            escaper: self.escaper.as_ref(),
            registry: self.registry.as_ref(),
        };
        self.tree.render(root, &env)
    }

    /// Resolve a named node directly under the root's named scope.
    ///
    /// # Errors
    ///
    /// [`BrackenError::NodeNotFound`] when no such name exists; callers may
    /// treat that as "absent".
    pub fn child(&mut self, name: &str) -> BrackenResult<NodeId> {
        let root = self.tree.root();
        self.tree.get_child_by_name(root, name)
    }

    /// Resolve a named node one level beneath `parent`.
    pub fn child_of(&mut self, parent: NodeId, name: &str) -> BrackenResult<NodeId> {
        self.tree.get_child_by_name(parent, name)
    }

    /// Bind a value on the root scope.
    pub fn set_value<V: Into<Value>>(&mut self, name: &str, value: V) {
        let root = self.tree.root();
        self.tree.set_value(root, name, value.into());
    }

    /// Bind a value on a specific named node's scope.
    pub fn set_value_at<V: Into<Value>>(&mut self, id: NodeId, name: &str, value: V) {
        self.tree.set_value(id, name, value.into());
    }

    /// Snapshot a repeater's current content as one repetition and clear
    /// its scope for the next one.
    pub fn capture(&mut self, id: NodeId) -> BrackenResult<()> {
        let env = RenderEnv {
            escaper: self.escaper.as_ref(),
            registry: self.registry.as_ref(),
        };
        self.tree.capture(id, &env)
    }

    /// [`Template::capture`] by root-scope name.
    pub fn capture_named(&mut self, name: &str) -> BrackenResult<()> {
        let id = self.child(name)?;
        self.capture(id)
    }

    /// Set (or, with [`Value::Null`], clear) a runtime option on a
    /// component node.
    pub fn set_option<V: Into<Value>>(
        &mut self,
        id: NodeId,
        key: &str,
        value: V,
    ) -> BrackenResult<()> {
        self.tree.set_option(id, key, value.into())
    }

    /// Two-step resolution: a named child wins, a plainly-bound root value
    /// is the fallback.
    pub fn get_child_or_value(&mut self, name: &str) -> ChildOrValue {
        match self.child(name) {
            Ok(id) => ChildOrValue::Child(id),
            Err(_) => {
                let root = self.tree.root();
                ChildOrValue::Value(self.tree.lookup_value(root, name, true).cloned())
            }
        }
    }

    /// Two-step assignment: replace a named child's content with the value's
    /// text when the child exists, otherwise bind a plain root value.
    pub fn set_child_or_value<V: Into<Value>>(&mut self, name: &str, value: V) -> BrackenResult<()> {
        let value = value.into();
        match self.child(name) {
            Ok(id) => self.tree.set_children_text(id, &value.to_display()),
            Err(BrackenError::NodeNotFound { .. }) => {
                self.set_value(name, value);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Drop all per-use state: bound values, repeater captures, runtime
    /// component options. Structure and template-time defaults survive.
    pub fn reset_template(&mut self) {
        self.tree.reset();
    }

    pub(crate) fn snapshot_bytes(&self) -> BrackenResult<Vec<u8>> {
        let snapshot = Snapshot {
            tree: self.tree.clone(),
            mode: self.mode,
            localized: self.localized,
        };
        serde_json::to_vec(&snapshot)
            .map_err(|e| BrackenError::build(format!("cannot serialize template: {}", e)))
    }

    /// Run every component's prepare hook, as happens after a reload to
    /// recreate runtime options. A component that fails (or whose class has
    /// vanished from the registry) is detached and logged, never fatal.
    pub(crate) fn run_prepare_hooks(&mut self) {
        for id in self.tree.component_ids() {
            let class = match self.tree.node(id).kind() {
                NodeKind::Component { class, .. } => class.clone(),
                _ => continue,
            };
            let Some(behavior) = self.registry.instantiate(&class) else {
                tracing::warn!(%class, "component class not registered on reload, detaching");
                self.tree.detach(id);
                continue;
            };
            let prepared = {
                let mut scope = ComponentScope::new(&mut self.tree, id);
                behavior.prepare(&mut scope)
            };
            if let Err(error) = prepared {
                tracing::warn!(%class, %error, "component failed to prepare on reload, detaching");
                self.tree.detach(id);
            }
        }
    }
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("tree", &self.tree)
            .field("mode", &self.mode)
            .field("localized", &self.localized)
            .field("source_path", &self.source_path)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for Template {
    /// The defensive boundary for call sites that cannot propagate errors:
    /// string conversion renders a scratch copy of the tree and never
    /// surfaces an internal failure.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut scratch = self.tree.clone();
        let root = scratch.root();
        let output = scratch.render(root, &self.env());
        f.write_str(&output)
    }
}
