use std::collections::HashMap;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{BrackenError, BrackenResult};
use crate::interface::TranslationProvider;
use crate::parser::{MARKER_CLOSE, MARKER_OPEN};

/// A translation catalogue loaded from XML:
///
/// ```xml
/// <translations default="en">
///   <locale name="en">
///     <entry key="GREETING">Hello %1!</entry>
///   </locale>
/// </translations>
/// ```
///
/// `%N` placeholders expand to nested `[{replace argN}]` directives, so a
/// translated string can pull positional values from the surrounding scope.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    default_locale: String,
    locales: HashMap<String, HashMap<String, String>>,
}

impl Catalogue {
    pub fn parse(xml: &str) -> BrackenResult<Self> {
        let mut reader = Reader::from_str(xml);
        let config = reader.config_mut();
        config.trim_text_start = true;
        config.trim_text_end = true;

        let mut catalogue = Self::default();
        let mut current_locale: Option<String> = None;
        let mut current_key: Option<String> = None;
        let mut text = String::new();
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => match e.name().as_ref() {
                    b"translations" => {
                        if let Some(default) = attribute(&e, "default")? {
                            catalogue.default_locale = default;
                        }
                    }
                    b"locale" => {
                        let name = attribute(&e, "name")?.ok_or_else(|| {
                            BrackenError::build("translation locale is missing its name")
                        })?;
                        catalogue.locales.entry(name.clone()).or_default();
                        current_locale = Some(name);
                    }
                    b"entry" => {
                        current_key = Some(attribute(&e, "key")?.ok_or_else(|| {
                            BrackenError::build("translation entry is missing its key")
                        })?);
                        text.clear();
                    }
                    _ => {}
                },
                Ok(Event::Text(t)) => {
                    if current_key.is_some() {
                        let unescaped = t.unescape().map_err(|e| {
                            BrackenError::build(format!("translation catalogue: {}", e))
                        })?;
                        text.push_str(&unescaped);
                    }
                }
                Ok(Event::End(e)) => match e.name().as_ref() {
                    b"entry" => {
                        if let (Some(locale), Some(key)) = (&current_locale, current_key.take()) {
                            if let Some(entries) = catalogue.locales.get_mut(locale) {
                                entries.insert(key, std::mem::take(&mut text));
                            }
                        }
                    }
                    b"locale" => current_locale = None,
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(BrackenError::build(format!(
                        "translation catalogue: {}",
                        e
                    )));
                }
            }
        }
        Ok(catalogue)
    }

    /// The mappings for `locale`, falling back to the declared default
    /// locale, with placeholders expanded.
    pub fn resolve(&self, locale: &str) -> BrackenResult<HashMap<String, String>> {
        let entries = self
            .locales
            .get(locale)
            .or_else(|| self.locales.get(&self.default_locale))
            .ok_or_else(|| {
                BrackenError::build(format!(
                    "no translations for locale '{}' and no usable default",
                    locale
                ))
            })?;
        Ok(entries
            .iter()
            .map(|(key, value)| (key.clone(), expand_placeholders(value)))
            .collect())
    }
}

fn attribute(
    e: &quick_xml::events::BytesStart<'_>,
    name: &str,
) -> BrackenResult<Option<String>> {
    let attr = e
        .try_get_attribute(name)
        .map_err(|e| BrackenError::build(format!("translation catalogue: {}", e)))?;
    match attr {
        Some(attr) => {
            let value = attr
                .unescape_value()
                .map_err(|e| BrackenError::build(format!("translation catalogue: {}", e)))?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}

/// `%1` and friends become `[{replace arg1}]`, so positional parameters are
/// ordinary scoped values to the main parse.
fn expand_placeholders(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' && chars.peek().is_some_and(char::is_ascii_digit) {
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            out.push_str(MARKER_OPEN);
            out.push_str("replace arg");
            out.push_str(&digits);
            out.push_str(MARKER_CLOSE);
        } else {
            out.push(c);
        }
    }
    out
}

/// Replace every marker whose body is a catalogue key with its translated
/// text. Markers that are not catalogue keys pass through untouched for the
/// main parser.
pub fn substitute_translations(source: &str, map: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(source.len());
    let mut pos = 0;
    while let Some(found) = source[pos..].find(MARKER_OPEN) {
        let start = pos + found;
        let body_start = start + MARKER_OPEN.len();
        let Some(body_len) = source[body_start..].find(MARKER_CLOSE) else {
            break;
        };
        let body = &source[body_start..body_start + body_len];
        let marker_end = body_start + body_len + MARKER_CLOSE.len();
        out.push_str(&source[pos..start]);
        match map.get(body.trim()) {
            Some(translated) => out.push_str(translated),
            None => out.push_str(&source[start..marker_end]),
        }
        pos = marker_end;
    }
    out.push_str(&source[pos..]);
    out
}

/// A translation provider bound into a parse: which provider, which locale.
#[derive(Clone, Copy)]
pub struct Localizer<'a> {
    pub provider: &'a dyn TranslationProvider,
    pub locale: &'a str,
}

impl Localizer<'_> {
    pub fn localize(&self, source: &Path, raw: &str) -> BrackenResult<String> {
        let map = self.provider.translations(source, self.locale)?;
        Ok(substitute_translations(raw, &map))
    }
}

/// Default provider: the catalogue lives next to the template source with
/// an `.xml` extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlTranslations;

impl TranslationProvider for XmlTranslations {
    fn translations(
        &self,
        source: &Path,
        locale: &str,
    ) -> BrackenResult<HashMap<String, String>> {
        let catalogue_path = source.with_extension("xml");
        if !catalogue_path.is_file() {
            return Err(BrackenError::build(format!(
                "no translation catalogue at '{}'",
                catalogue_path.display()
            )));
        }
        let xml = std::fs::read_to_string(&catalogue_path).map_err(|e| {
            BrackenError::build(format!(
                "cannot read '{}': {}",
                catalogue_path.display(),
                e
            ))
        })?;
        Catalogue::parse(&xml)?.resolve(locale)
    }
}
