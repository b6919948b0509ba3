use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{BrackenError, BrackenResult, CacheError};

/// File reads as the engine sees them: atomic, blocking, hard error on
/// failure.
pub trait FileAccess {
    fn readable(&self, path: &Path) -> bool;

    fn read_all(&self, path: &Path) -> BrackenResult<String>;
}

/// Plain std::fs access.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFiles;

impl FileAccess for StdFiles {
    fn readable(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read_all(&self, path: &Path) -> BrackenResult<String> {
        std::fs::read_to_string(path)
            .map_err(|e| BrackenError::build(format!("cannot read '{}': {}", path.display(), e)))
    }
}

/// Store for compiled-template blobs, keyed by the source path. `Ok(None)`
/// is an ordinary miss; `Err` signals the store itself failed. Either way
/// the caller re-parses.
pub trait CacheStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    fn set(&self, key: &str, value: &[u8]) -> bool;

    fn delete(&self, key: &str);
}

/// Filesystem fallback store: a blob living next to the source at
/// `<original>-cache`, usable only while its modification time is at least
/// the source's.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsBlobCache;

impl FsBlobCache {
    fn blob_path(key: &str) -> PathBuf {
        PathBuf::from(format!("{}-cache", key))
    }
}

impl CacheStore for FsBlobCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let blob = Self::blob_path(key);
        if !blob.is_file() {
            return Ok(None);
        }
        let source_mtime = std::fs::metadata(key)
            .and_then(|m| m.modified())
            .map_err(|e| CacheError::new(format!("source metadata: {}", e)))?;
        let blob_mtime = std::fs::metadata(&blob)
            .and_then(|m| m.modified())
            .map_err(|e| CacheError::new(format!("blob metadata: {}", e)))?;
        if blob_mtime < source_mtime {
            return Ok(None);
        }
        std::fs::read(&blob)
            .map(Some)
            .map_err(|e| CacheError::new(format!("blob read: {}", e)))
    }

    fn set(&self, key: &str, value: &[u8]) -> bool {
        std::fs::write(Self::blob_path(key), value).is_ok()
    }

    fn delete(&self, key: &str) {
        let _ = std::fs::remove_file(Self::blob_path(key));
    }
}

/// An always-miss store, used while caching is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl CacheStore for NullCache {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &[u8]) -> bool {
        false
    }

    fn delete(&self, _key: &str) {}
}

/// Output escaping applied to non-raw Replace output.
pub trait Escaper {
    fn escape(&self, raw: &str) -> String;
}

/// Entity-escapes the standard HTML-unsafe characters, quotes included.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlEscaper;

impl Escaper for HtmlEscaper {
    fn escape(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        for c in raw.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                _ => out.push(c),
            }
        }
        out
    }
}

/// Pass-through escaper for callers producing non-HTML output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEscaper;

impl Escaper for NoopEscaper {
    fn escape(&self, raw: &str) -> String {
        raw.to_string()
    }
}

/// Supplies marker-body → translated-text mappings for a template source,
/// resolved for a locale (with fallback to the catalogue's declared default
/// locale). Substitution happens on the raw source, before tokenizing.
pub trait TranslationProvider {
    fn translations(
        &self,
        source: &Path,
        locale: &str,
    ) -> BrackenResult<HashMap<String, String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_html_escaper() {
        let escaper = HtmlEscaper;
        assert_eq!(
            escaper.escape(r#"<b class="x">&'</b>"#),
            "&lt;b class=&quot;x&quot;&gt;&amp;&#39;&lt;/b&gt;"
        );
        assert_eq!(escaper.escape("plain"), "plain");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_null_cache_always_misses() {
        let cache = NullCache;
        assert!(!cache.set("k", b"v"));
        assert_eq!(cache.get("k").unwrap(), None);
    }
}
