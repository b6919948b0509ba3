mod builder;
mod component;
mod engine;
mod error;
mod interface;
mod node;
mod parser;
mod template;
mod token;
mod translate;
mod value;

// Public exports.
pub use builder::TreeBuilder;
pub use component::{ComponentBehavior, ComponentRegistry, ComponentScope};
pub use engine::BrackenEngine;
pub use error::{
    BrackenError, BrackenResult, CacheError, ComponentError, ListError, SyntaxError,
};
pub use interface::{
    CacheStore, Escaper, FileAccess, FsBlobCache, HtmlEscaper, NoopEscaper, NullCache, StdFiles,
    TranslationProvider,
};
pub use node::{Node, NodeId, NodeKind, RenderEnv, Tree};
pub use parser::{MARKER_CLOSE, MARKER_OPEN, SourceMode, scan};
pub use template::{ChildOrValue, Template};
pub use token::{Expect, Token, TokenKind, TokenStream};
pub use translate::{Catalogue, Localizer, XmlTranslations, substitute_translations};
pub use value::{Operator, Value};
