use std::collections::{BTreeMap, HashMap};

use crate::component::{ComponentRegistry, ComponentScope};
use crate::error::{BrackenError, BrackenResult};
use crate::interface::Escaper;
use crate::value::{Operator, Value};

/// Index of a node inside its owning [`Tree`]. The parent back-reference is
/// one of these rather than an owning pointer; the tree's arena owns every
/// node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum NodeKind {
    /// The named root of a compiled template.
    Root { name: String },
    /// Opaque text. Never empty.
    Text { content: String },
    Replace {
        name: String,
        local: bool,
        raw: bool,
    },
    Condition {
        name: String,
        local: bool,
        operator: Operator,
        operand: Value,
    },
    /// Purely structural named grouping.
    Section { name: String },
    Repeater {
        name: String,
        /// Completed repetitions, in capture order. These persist with the
        /// tree.
        captured: Vec<String>,
    },
    Component {
        name: String,
        class: String,
        /// Template-time defaults from `config` directives. Immutable at
        /// runtime.
        defaults: BTreeMap<String, Value>,
        /// Runtime options. Not persisted; the prepare hook recreates them
        /// on reload.
        #[serde(skip)]
        options: BTreeMap<String, Value>,
    },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Node {
    pub(crate) kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    values: BTreeMap<String, Value>,
    /// Resolved-name memo ("virtual children"). Never persisted; rebuilt
    /// lazily after a reload.
    #[serde(skip)]
    name_cache: HashMap<String, NodeId>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            values: BTreeMap::new(),
            name_cache: HashMap::new(),
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// The node's name, for the kinds that participate in name lookup.
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Root { name }
            | NodeKind::Condition { name, .. }
            | NodeKind::Section { name }
            | NodeKind::Repeater { name, .. }
            | NodeKind::Component { name, .. } => Some(name),
            NodeKind::Text { .. } | NodeKind::Replace { .. } => None,
        }
    }
}

/// Everything rendering needs beyond the tree itself.
pub struct RenderEnv<'a> {
    pub escaper: &'a dyn Escaper,
    pub registry: &'a ComponentRegistry,
}

/// The compiled node tree. A strict hierarchy: every node has at most one
/// parent, no node is its own ancestor, and attaching an already-attached
/// node is an error.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Tree {
    pub fn new(root_name: &str) -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Root {
                name: root_name.to_string(),
            })],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Allocate a detached node.
    pub fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(kind));
        id
    }

    pub fn append_new(&mut self, parent: NodeId, kind: NodeKind) -> BrackenResult<NodeId> {
        if let NodeKind::Text { content } = &kind {
            if content.is_empty() {
                return Err(BrackenError::build("text nodes must not be empty"));
            }
        }
        let child = self.alloc(kind);
        self.append_child(parent, child)?;
        Ok(child)
    }

    /// Attach a detached node under `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> BrackenResult<()> {
        self.check_attachable(parent, child)?;
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        self.invalidate_caches_from(parent);
        Ok(())
    }

    /// Swap `new` into the tree position `old` occupies. `old` becomes
    /// detached.
    pub fn replace_child(&mut self, old: NodeId, new: NodeId) -> BrackenResult<()> {
        let Some(parent) = self.nodes[old.0].parent else {
            return Err(BrackenError::build("cannot replace a detached or root node"));
        };
        self.check_attachable(parent, new)?;
        let slot = self.nodes[parent.0]
            .children
            .iter()
            .position(|&c| c == old)
            .ok_or_else(|| BrackenError::build("tree corrupted: child missing from parent"))?;
        self.nodes[parent.0].children[slot] = new;
        self.nodes[new.0].parent = Some(parent);
        self.nodes[old.0].parent = None;
        self.invalidate_caches_from(parent);
        Ok(())
    }

    /// Remove a node from its parent, leaving it detached in the arena.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id.0].parent else {
            return;
        };
        self.nodes[parent.0].children.retain(|&c| c != id);
        self.nodes[id.0].parent = None;
        self.invalidate_caches_from(parent);
    }

    fn check_attachable(&self, parent: NodeId, child: NodeId) -> BrackenResult<()> {
        if child == self.root || self.nodes[child.0].parent.is_some() {
            return Err(BrackenError::build(
                "node is already attached to this tree",
            ));
        }
        // Attaching an ancestor of the target position would make the node
        // its own ancestor.
        let mut walk = Some(parent);
        while let Some(current) = walk {
            if current == child {
                return Err(BrackenError::build("a node may not become its own ancestor"));
            }
            walk = self.nodes[current.0].parent;
        }
        Ok(())
    }

    /// Deep-copy the subtree rooted at `id`. The copy is detached from any
    /// parent and shares no mutable state with the original; its lookup
    /// caches start empty.
    pub fn clone_subtree(&mut self, id: NodeId) -> NodeId {
        let mut node = self.nodes[id.0].clone();
        node.parent = None;
        node.name_cache.clear();
        let children = std::mem::take(&mut node.children);
        let new_id = NodeId(self.nodes.len());
        self.nodes.push(node);
        for child in children {
            let new_child = self.clone_subtree(child);
            self.nodes[new_child.0].parent = Some(new_id);
            self.nodes[new_id.0].children.push(new_child);
        }
        new_id
    }

    /// Drop the memoized name lookups of `from` and every ancestor. Called
    /// on every structural mutation; value changes do not affect structure
    /// and leave the caches alone.
    fn invalidate_caches_from(&mut self, from: NodeId) {
        let mut walk = Some(from);
        while let Some(current) = walk {
            self.nodes[current.0].name_cache.clear();
            walk = self.nodes[current.0].parent;
        }
    }

    // --- Values and lookup ---

    pub fn set_value(&mut self, id: NodeId, key: &str, value: Value) {
        self.nodes[id.0].values.insert(key.to_string(), value);
    }

    /// Walk from `from` upward through the ancestry looking for `name`.
    /// With `local` set, only `from` itself is consulted.
    pub fn lookup_value(&self, from: NodeId, name: &str, local: bool) -> Option<&Value> {
        let node = &self.nodes[from.0];
        if let Some(value) = node.values.get(name) {
            return Some(value);
        }
        if local {
            return None;
        }
        node.parent
            .and_then(|parent| self.lookup_value(parent, name, local))
    }

    /// Resolve a named descendant of `from`, skipping over nodes that are
    /// transparent to naming (conditions scope their name but not their
    /// structure). The result is memoized on `from`.
    pub fn get_child_by_name(&mut self, from: NodeId, name: &str) -> BrackenResult<NodeId> {
        if let Some(&hit) = self.nodes[from.0].name_cache.get(name) {
            return Ok(hit);
        }
        let found = self
            .find_named(from, name)
            .ok_or_else(|| BrackenError::NodeNotFound {
                name: name.to_string(),
            })?;
        self.nodes[from.0]
            .name_cache
            .insert(name.to_string(), found);
        Ok(found)
    }

    fn find_named(&self, from: NodeId, name: &str) -> Option<NodeId> {
        for &child in &self.nodes[from.0].children {
            if self.nodes[child.0].name() == Some(name) {
                return Some(child);
            }
        }
        for &child in &self.nodes[from.0].children {
            if matches!(self.nodes[child.0].kind, NodeKind::Condition { .. }) {
                if let Some(hit) = self.find_named(child, name) {
                    return Some(hit);
                }
            }
        }
        None
    }

    // --- Component options ---

    pub fn set_default_option(
        &mut self,
        id: NodeId,
        key: &str,
        value: Value,
    ) -> BrackenResult<()> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Component { defaults, .. } => {
                defaults.insert(key.to_string(), value);
                Ok(())
            }
            _ => Err(BrackenError::build("config target is not a component")),
        }
    }

    /// Set a runtime option. `Value::Null` clears the runtime entry so the
    /// template-time default shows through again.
    pub fn set_option(&mut self, id: NodeId, key: &str, value: Value) -> BrackenResult<()> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Component { options, .. } => {
                if matches!(value, Value::Null) {
                    options.remove(key);
                } else {
                    options.insert(key.to_string(), value);
                }
                Ok(())
            }
            _ => Err(BrackenError::build("option target is not a component")),
        }
    }

    /// Option resolution: explicit runtime option, else template default,
    /// else null.
    pub fn option(&self, id: NodeId, key: &str) -> Value {
        match &self.nodes[id.0].kind {
            NodeKind::Component {
                defaults, options, ..
            } => options
                .get(key)
                .or_else(|| defaults.get(key))
                .cloned()
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    // --- Rendering ---

    pub fn render(&mut self, id: NodeId, env: &RenderEnv<'_>) -> String {
        match &self.nodes[id.0].kind {
            NodeKind::Text { content } => content.clone(),
            NodeKind::Replace { name, local, raw } => {
                let (name, local, raw) = (name.clone(), *local, *raw);
                let Some(parent) = self.nodes[id.0].parent else {
                    return String::new();
                };
                match self.lookup_value(parent, &name, local) {
                    Some(value) => {
                        let text = value.to_display();
                        if raw { text } else { env.escaper.escape(&text) }
                    }
                    None => String::new(),
                }
            }
            NodeKind::Condition {
                name,
                local,
                operator,
                operand,
            } => {
                let (name, local, operator) = (name.clone(), *local, *operator);
                let operand = operand.clone();
                let bound = self.nodes[id.0]
                    .parent
                    .and_then(|parent| self.lookup_value(parent, &name, local))
                    .cloned()
                    .unwrap_or(Value::Null);
                if operator.evaluate(&bound, &operand) {
                    self.render_children(id, env)
                } else {
                    String::new()
                }
            }
            NodeKind::Root { .. } | NodeKind::Section { .. } => self.render_children(id, env),
            NodeKind::Repeater { captured, .. } => captured.concat(),
            NodeKind::Component { class, .. } => {
                let class = class.clone();
                let Some(behavior) = env.registry.instantiate(&class) else {
                    tracing::error!(%class, "component class not registered, rendering empty");
                    return String::new();
                };
                let prepared = {
                    let mut scope = ComponentScope::new(self, id);
                    behavior.prepare(&mut scope)
                };
                match prepared {
                    Ok(()) => self.render_children(id, env),
                    Err(error) => {
                        tracing::warn!(%class, %error, "component prepare failed, rendering empty");
                        String::new()
                    }
                }
            }
        }
    }

    fn render_children(&mut self, id: NodeId, env: &RenderEnv<'_>) -> String {
        let children = self.nodes[id.0].children.clone();
        let mut out = String::new();
        for child in children {
            out.push_str(&self.render(child, env));
        }
        out
    }

    /// Snapshot a repeater's current content as one completed repetition,
    /// then clear every value bound beneath it so the next repetition
    /// starts clean. Structure is untouched.
    pub fn capture(&mut self, id: NodeId, env: &RenderEnv<'_>) -> BrackenResult<()> {
        if !matches!(self.nodes[id.0].kind, NodeKind::Repeater { .. }) {
            return Err(BrackenError::build("capture target is not a repeater"));
        }
        let snapshot = self.render_children(id, env);
        if let NodeKind::Repeater { captured, .. } = &mut self.nodes[id.0].kind {
            captured.push(snapshot);
        }
        self.clear_subtree_values(id);
        Ok(())
    }

    fn clear_subtree_values(&mut self, id: NodeId) {
        self.nodes[id.0].values.clear();
        let children = self.nodes[id.0].children.clone();
        for child in children {
            self.clear_subtree_values(child);
        }
    }

    /// Replace a node's content with a single text child (or nothing, when
    /// the text is empty). The previous children become detached.
    pub fn set_children_text(&mut self, id: NodeId, text: &str) -> BrackenResult<()> {
        let children = std::mem::take(&mut self.nodes[id.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
        self.invalidate_caches_from(id);
        if !text.is_empty() {
            self.append_new(
                id,
                NodeKind::Text {
                    content: text.to_string(),
                },
            )?;
        }
        Ok(())
    }

    /// Return the template to its just-compiled state: bound values,
    /// repeater captures and runtime component options are dropped;
    /// structure and template-time defaults stay.
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.values.clear();
            match &mut node.kind {
                NodeKind::Repeater { captured, .. } => captured.clear(),
                NodeKind::Component { options, .. } => options.clear(),
                _ => {}
            }
        }
    }

    /// Every component node reachable from the root, in document order.
    pub(crate) fn component_ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if matches!(self.nodes[id.0].kind, NodeKind::Component { .. }) {
                out.push(id);
            }
            for &child in self.nodes[id.0].children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::HtmlEscaper;

    fn env(registry: &ComponentRegistry) -> RenderEnv<'_> {
        RenderEnv {
            escaper: &HtmlEscaper,
            registry,
        }
    }

    fn text(content: &str) -> NodeKind {
        NodeKind::Text {
            content: content.to_string(),
        }
    }

    fn section(name: &str) -> NodeKind {
        NodeKind::Section {
            name: name.to_string(),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_render_concatenates_in_order() {
        let registry = ComponentRegistry::new();
        let mut tree = Tree::new("root");
        let root = tree.root();
        tree.append_new(root, text("a")).unwrap();
        let sec = tree.append_new(root, section("s")).unwrap();
        tree.append_new(sec, text("b")).unwrap();
        tree.append_new(root, text("c")).unwrap();
        assert_eq!(tree.render(root, &env(&registry)), "abc");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_text_rejected() {
        let mut tree = Tree::new("root");
        let root = tree.root();
        assert!(tree.append_new(root, text("")).is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_ancestor_cycle_rejected() {
        let mut tree = Tree::new("root");
        let root = tree.root();
        let outer = tree.append_new(root, section("outer")).unwrap();
        let inner = tree.append_new(outer, section("inner")).unwrap();
        let err = tree.append_child(inner, outer).unwrap_err();
        assert!(matches!(err, BrackenError::Build { .. }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_double_attach_rejected() {
        let mut tree = Tree::new("root");
        let root = tree.root();
        let sec = tree.append_new(root, section("s")).unwrap();
        let err = tree.append_child(root, sec).unwrap_err();
        assert!(matches!(err, BrackenError::Build { .. }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_value_lookup_walks_ancestors() {
        let mut tree = Tree::new("root");
        let root = tree.root();
        let outer = tree.append_new(root, section("outer")).unwrap();
        let inner = tree.append_new(outer, section("inner")).unwrap();
        tree.set_value(root, "x", Value::Int(1));

        assert_eq!(tree.lookup_value(inner, "x", false), Some(&Value::Int(1)));
        assert_eq!(tree.lookup_value(inner, "x", true), None);

        // A nearer binding shadows the ancestor's.
        tree.set_value(inner, "x", Value::Int(2));
        assert_eq!(tree.lookup_value(inner, "x", false), Some(&Value::Int(2)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_named_lookup_skips_through_conditions() {
        let mut tree = Tree::new("root");
        let root = tree.root();
        let cond = tree
            .append_new(
                root,
                NodeKind::Condition {
                    name: "guard".to_string(),
                    local: false,
                    operator: Operator::Eq,
                    operand: Value::Int(1),
                },
            )
            .unwrap();
        let buried = tree.append_new(cond, section("buried")).unwrap();

        assert_eq!(tree.get_child_by_name(root, "buried").unwrap(), buried);
        assert_eq!(tree.get_child_by_name(root, "guard").unwrap(), cond);
        assert!(matches!(
            tree.get_child_by_name(root, "absent"),
            Err(BrackenError::NodeNotFound { .. })
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_named_lookup_does_not_cross_named_boundaries() {
        let mut tree = Tree::new("root");
        let root = tree.root();
        let outer = tree.append_new(root, section("outer")).unwrap();
        tree.append_new(outer, section("nested")).unwrap();

        // "nested" is a virtual child of "outer", not of the root.
        assert!(tree.get_child_by_name(root, "nested").is_err());
        assert!(tree.get_child_by_name(outer, "nested").is_ok());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_cache_invalidated_on_structural_change() {
        let mut tree = Tree::new("root");
        let root = tree.root();
        let sec = tree.append_new(root, section("s")).unwrap();
        assert_eq!(tree.get_child_by_name(root, "s").unwrap(), sec);

        let replacement = tree.alloc(section("s"));
        tree.replace_child(sec, replacement).unwrap();
        assert_eq!(tree.get_child_by_name(root, "s").unwrap(), replacement);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_clone_subtree_is_independent() {
        let registry = ComponentRegistry::new();
        let mut tree = Tree::new("root");
        let root = tree.root();
        let sec = tree.append_new(root, section("s")).unwrap();
        tree.append_new(sec, text("original")).unwrap();

        let copy = tree.clone_subtree(sec);
        assert_eq!(tree.node(copy).parent(), None, "clone starts detached");

        // Mutating the copy leaves the original alone.
        tree.set_children_text(copy, "changed").unwrap();
        assert_eq!(tree.render(sec, &env(&registry)), "original");
        assert_eq!(tree.render(copy, &env(&registry)), "changed");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_repeater_accumulates_and_isolates() {
        let registry = ComponentRegistry::new();
        let mut tree = Tree::new("root");
        let root = tree.root();
        let rep = tree
            .append_new(
                root,
                NodeKind::Repeater {
                    name: "items".to_string(),
                    captured: Vec::new(),
                },
            )
            .unwrap();
        tree.append_new(rep, text("-")).unwrap();
        tree.append_new(
            rep,
            NodeKind::Replace {
                name: "item".to_string(),
                local: false,
                raw: false,
            },
        )
        .unwrap();

        for item in ["a", "b", "c"] {
            tree.set_value(rep, "item", Value::from(item));
            tree.capture(rep, &env(&registry)).unwrap();
        }
        // Uncaptured content does not render; captured snapshots do, in
        // order, without leaking values between repetitions.
        assert_eq!(tree.render(root, &env(&registry)), "-a-b-c");
        assert_eq!(tree.lookup_value(rep, "item", true), None);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_option_precedence() {
        let mut tree = Tree::new("root");
        let root = tree.root();
        let comp = tree
            .append_new(
                root,
                NodeKind::Component {
                    name: "box".to_string(),
                    class: "Panel".to_string(),
                    defaults: BTreeMap::new(),
                    options: BTreeMap::new(),
                },
            )
            .unwrap();
        tree.set_default_option(comp, "color", Value::from("red")).unwrap();
        assert_eq!(tree.option(comp, "color"), Value::from("red"));

        tree.set_option(comp, "color", Value::from("blue")).unwrap();
        assert_eq!(tree.option(comp, "color"), Value::from("blue"));

        // Null clears the runtime entry, revealing the default.
        tree.set_option(comp, "color", Value::Null).unwrap();
        assert_eq!(tree.option(comp, "color"), Value::from("red"));

        assert_eq!(tree.option(comp, "missing"), Value::Null);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_reset_clears_runtime_state_only() {
        let mut tree = Tree::new("root");
        let root = tree.root();
        let comp = tree
            .append_new(
                root,
                NodeKind::Component {
                    name: "box".to_string(),
                    class: "Panel".to_string(),
                    defaults: BTreeMap::new(),
                    options: BTreeMap::new(),
                },
            )
            .unwrap();
        tree.set_default_option(comp, "color", Value::from("red")).unwrap();
        tree.set_option(comp, "color", Value::from("blue")).unwrap();
        tree.set_value(root, "x", Value::Int(5));

        tree.reset();
        assert_eq!(tree.lookup_value(root, "x", true), None);
        assert_eq!(tree.option(comp, "color"), Value::from("red"));
    }
}
