use std::path::Path;
use std::rc::Rc;

use crate::builder::TreeBuilder;
use crate::component::ComponentRegistry;
use crate::error::{BrackenResult, CacheError};
use crate::interface::{CacheStore, Escaper, FileAccess, FsBlobCache, HtmlEscaper, StdFiles,
    TranslationProvider};
use crate::node::Tree;
use crate::parser::{scan, SourceMode};
use crate::template::{Snapshot, Template};
use crate::translate::Localizer;

/// The template-loading entry point and its explicit configuration: file
/// access, cache store plus enabled flag, the component registry, the
/// output escaper and an optional translation provider. All lifecycle is
/// owned by the caller; there is no process-wide state.
///
/// # Example
///
/// ```rust
/// use bracken::{BrackenEngine, SourceMode};
///
/// let engine = BrackenEngine::new();
/// let mut template = engine
///     .parse_str("Hello [{replace name}]!", SourceMode::Plain)
///     .unwrap();
/// template.set_value("name", "World");
/// assert_eq!(template.render(), "Hello World!");
/// ```
pub struct BrackenEngine {
    files: Rc<dyn FileAccess>,
    cache: Rc<dyn CacheStore>,
    cache_enabled: bool,
    registry: Rc<ComponentRegistry>,
    escaper: Rc<dyn Escaper>,
    translations: Option<Rc<dyn TranslationProvider>>,
    locale: String,
}

impl BrackenEngine {
    pub fn new() -> Self {
        Self {
            files: Rc::new(StdFiles),
            cache: Rc::new(FsBlobCache),
            cache_enabled: false,
            registry: Rc::new(ComponentRegistry::new()),
            escaper: Rc::new(HtmlEscaper),
            translations: None,
            locale: "en".to_string(),
        }
    }

    pub fn with_files<F: FileAccess + 'static>(mut self, files: F) -> Self {
        self.files = Rc::new(files);
        self
    }

    pub fn with_cache<C: CacheStore + 'static>(mut self, cache: C, enabled: bool) -> Self {
        self.cache = Rc::new(cache);
        self.cache_enabled = enabled;
        self
    }

    pub fn with_registry(mut self, registry: ComponentRegistry) -> Self {
        self.registry = Rc::new(registry);
        self
    }

    pub fn with_escaper<E: Escaper + 'static>(mut self, escaper: E) -> Self {
        self.escaper = Rc::new(escaper);
        self
    }

    pub fn with_translations<T: TranslationProvider + 'static>(
        mut self,
        provider: T,
        locale: &str,
    ) -> Self {
        self.translations = Some(Rc::new(provider));
        self.locale = locale.to_string();
        self
    }

    /// Compile a source string. No path context, so includes resolve
    /// against the working directory and no localization applies.
    pub fn parse_str(&self, source: &str, mode: SourceMode) -> BrackenResult<Template> {
        let mut stream = scan(source, mode)?;
        let mut tree = Tree::new("template");
        let root = tree.root();
        TreeBuilder {
            files: self.files.as_ref(),
            registry: self.registry.as_ref(),
            mode,
            base_dir: None,
            localizer: None,
        }
        .build(&mut stream, &mut tree, root)?;
        Ok(Template::from_parts(
            tree,
            mode,
            false,
            None,
            Rc::clone(&self.escaper),
            Rc::clone(&self.registry),
        ))
    }

    /// Load and compile a template file, going through the cache store when
    /// caching is enabled. A cache miss or store failure degrades to a full
    /// parse; a corrupted blob is deleted and reported, then re-parsed.
    pub fn load(&self, path: &Path, mode: SourceMode) -> BrackenResult<Template> {
        let key = path.to_string_lossy().to_string();
        if self.cache_enabled {
            match self.cache.get(&key) {
                Ok(Some(bytes)) => match self.restore(&bytes, path) {
                    Ok(template) => return Ok(template),
                    Err(error) => {
                        tracing::error!(
                            path = %path.display(),
                            %error,
                            "corrupted template cache blob, discarding and re-parsing"
                        );
                        self.cache.delete(&key);
                    }
                },
                Ok(None) => {}
                Err(error) => {
                    tracing::debug!(path = %path.display(), %error, "template cache miss");
                }
            }
        }

        let template = self.parse_file(path, mode)?;
        if self.cache_enabled {
            match template.snapshot_bytes() {
                Ok(bytes) => {
                    if !self.cache.set(&key, &bytes) {
                        tracing::debug!(path = %path.display(), "cache store refused the blob");
                    }
                }
                Err(error) => {
                    tracing::debug!(%error, "compiled template could not be serialized");
                }
            }
        }
        Ok(template)
    }

    fn parse_file(&self, path: &Path, mode: SourceMode) -> BrackenResult<Template> {
        let raw = self.files.read_all(path)?;
        let (source, localized) = match &self.translations {
            Some(provider) => {
                let localizer = Localizer {
                    provider: provider.as_ref(),
                    locale: &self.locale,
                };
                match localizer.localize(path, &raw) {
                    Ok(localized) => (localized, true),
                    Err(error) => {
                        tracing::debug!(
                            path = %path.display(),
                            %error,
                            "no translations for template, parsing plain source"
                        );
                        (raw, false)
                    }
                }
            }
            None => (raw, false),
        };

        let mut stream = scan(&source, mode)?;
        let mut tree = Tree::new(&root_name(path));
        let root = tree.root();
        let localizer = match (&self.translations, localized) {
            (Some(provider), true) => Some(Localizer {
                provider: provider.as_ref(),
                locale: &self.locale,
            }),
            _ => None,
        };
        TreeBuilder {
            files: self.files.as_ref(),
            registry: self.registry.as_ref(),
            mode,
            base_dir: path.parent().map(Path::to_path_buf),
            localizer,
        }
        .build(&mut stream, &mut tree, root)?;

        Ok(Template::from_parts(
            tree,
            mode,
            localized,
            Some(path.to_path_buf()),
            Rc::clone(&self.escaper),
            Rc::clone(&self.registry),
        ))
    }

    fn restore(&self, bytes: &[u8], path: &Path) -> BrackenResult<Template> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)
            .map_err(|e| CacheError::new(format!("blob does not deserialize: {}", e)))?;
        let mut template = Template::from_parts(
            snapshot.tree,
            snapshot.mode,
            snapshot.localized,
            Some(path.to_path_buf()),
            Rc::clone(&self.escaper),
            Rc::clone(&self.registry),
        );
        // Runtime component options were not persisted; the prepare hooks
        // recreate them, detaching any component that no longer works.
        template.run_prepare_hooks();
        Ok(template)
    }
}

impl Default for BrackenEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Root node name for a loaded template: the file stem with everything
/// non-alphanumeric stripped, or a fixed fallback.
fn root_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let name: String = stem.chars().filter(char::is_ascii_alphanumeric).collect();
    if name.is_empty() || name.chars().all(|c| c.is_ascii_digit()) {
        "template".to_string()
    } else {
        name
    }
}
