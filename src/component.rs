use std::collections::HashMap;

use crate::error::ComponentError;
use crate::node::{NodeId, Tree};
use crate::value::Value;

/// The mutable view a component behavior gets over its own node while the
/// prepare hook runs: option resolution, runtime option writes, and scoped
/// value binding.
pub struct ComponentScope<'t> {
    tree: &'t mut Tree,
    id: NodeId,
}

impl<'t> ComponentScope<'t> {
    pub(crate) fn new(tree: &'t mut Tree, id: NodeId) -> Self {
        Self { tree, id }
    }

    pub fn name(&self) -> &str {
        self.tree.node(self.id).name().unwrap_or_default()
    }

    /// Resolve an option: runtime value if set, else template default, else
    /// null.
    pub fn option(&self, key: &str) -> Value {
        self.tree.option(self.id, key)
    }

    pub fn set_option(&mut self, key: &str, value: Value) {
        // The node is a component by construction, so this cannot fail.
        let _ = self.tree.set_option(self.id, key, value);
    }

    /// Bind a value in the component's own named scope.
    pub fn set_value(&mut self, key: &str, value: Value) {
        self.tree.set_value(self.id, key, value);
    }
}

/// A component implementation. `prepare` runs before each render (and once
/// on reload); returning an error aborts that component's output without
/// failing the surrounding render.
pub trait ComponentBehavior {
    fn prepare(&self, scope: &mut ComponentScope<'_>) -> Result<(), ComponentError>;
}

type Factory = Box<dyn Fn() -> Box<dyn ComponentBehavior>>;

/// Maps component class names to factories. Owned by whoever owns the
/// component catalogue and handed to the engine; the tree builder fails
/// closed on a name that was never registered.
#[derive(Default)]
pub struct ComponentRegistry {
    factories: HashMap<String, Factory>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B, F>(&mut self, class: &str, factory: F)
    where
        B: ComponentBehavior + 'static,
        F: Fn() -> B + 'static,
    {
        self.factories.insert(
            class.to_string(),
            Box::new(move || Box::new(factory()) as Box<dyn ComponentBehavior>),
        );
    }

    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    pub(crate) fn instantiate(&self, class: &str) -> Option<Box<dyn ComponentBehavior>> {
        self.factories.get(class).map(|factory| factory())
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("classes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
