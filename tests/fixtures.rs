use std::path::{Path, PathBuf};

use bracken::{
    BrackenEngine, ComponentBehavior, ComponentError, ComponentRegistry, ComponentScope,
};

/// A component that copies its resolved `label` option into a scoped value,
/// so templates can observe option precedence.
pub struct Labeller;

impl ComponentBehavior for Labeller {
    fn prepare(&self, scope: &mut ComponentScope<'_>) -> Result<(), ComponentError> {
        let label = scope.option("label");
        scope.set_value("label", label);
        Ok(())
    }
}

/// A component whose prepare hook always fails.
pub struct Broken;

impl ComponentBehavior for Broken {
    fn prepare(&self, _scope: &mut ComponentScope<'_>) -> Result<(), ComponentError> {
        Err(ComponentError::new("broken on purpose"))
    }
}

pub fn test_registry() -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();
    registry.register("Labeller", || Labeller);
    registry.register("Broken", || Broken);
    registry
}

pub fn get_engine() -> BrackenEngine {
    BrackenEngine::new().with_registry(test_registry())
}

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("fixture file must be writable");
    path
}
