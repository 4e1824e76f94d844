//! Locale dictionaries and the `%s`/`%d` pattern translator.
//!
//! A [`Dictionary`] maps canonical English text (or a pattern containing
//! `%s`/`%d` placeholders) to localized text. [`Translator::translate`] tries
//! an exact key first, then the pattern keys in dictionary order; the first
//! pattern that matches wins and its captures are substituted positionally
//! into the localized value. Compiled patterns are cached per translator.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

/// Canonical text (or pattern) to localized text, in insertion order.
pub type Dictionary = IndexMap<String, String>;

/// `%s` matches a token without whitespace or quotes.
const TOKEN_CAPTURE: &str = r#"([^\s"']+)"#;
/// `%d` matches an integer or decimal number.
const NUMBER_CAPTURE: &str = r"(-?\d+(?:\.\d+)?)";

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new("%[sd]").expect("static pattern"));

/// Translator bound to one locale's dictionary.
#[derive(Debug, Default)]
pub struct Translator {
    dictionary: Dictionary,
    fallback: Option<Arc<Translator>>,
    patterns: Mutex<HashMap<String, Option<Regex>>>,
}

impl Translator {
    pub fn new(dictionary: Dictionary) -> Self {
        Self {
            dictionary,
            fallback: None,
            patterns: Mutex::new(HashMap::new()),
        }
    }

    /// Consult `fallback` when this dictionary has neither an exact nor a
    /// pattern match.
    pub fn with_fallback(mut self, fallback: Arc<Translator>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// Translate `text`, returning it unchanged when nothing matches.
    pub fn translate(&self, text: &str) -> String {
        self.lookup(text).unwrap_or_else(|| text.to_owned())
    }

    fn lookup(&self, text: &str) -> Option<String> {
        if let Some(exact) = self.dictionary.get(text) {
            return Some(exact.clone());
        }
        for (key, localized) in &self.dictionary {
            if !PLACEHOLDER.is_match(key) {
                continue;
            }
            let Some(pattern) = self.pattern(key) else {
                continue;
            };
            let Some(caps) = pattern.captures(text) else {
                continue;
            };
            let whole = caps.get(0)?;
            let captured: Vec<&str> = caps.iter().skip(1).flatten().map(|m| m.as_str()).collect();
            let mut out = String::with_capacity(text.len() + localized.len());
            out.push_str(&text[..whole.start()]);
            out.push_str(&substitute(localized, &captured));
            out.push_str(&text[whole.end()..]);
            return Some(out);
        }
        self.fallback.as_ref().and_then(|next| next.lookup(text))
    }

    fn pattern(&self, key: &str) -> Option<Regex> {
        let mut cache = self.patterns.lock();
        cache
            .entry(key.to_owned())
            .or_insert_with(|| compile_pattern(key))
            .clone()
    }

    /// Number of pattern keys compiled so far.
    pub fn cached_patterns(&self) -> usize {
        self.patterns.lock().len()
    }
}

fn compile_pattern(key: &str) -> Option<Regex> {
    let mut source = String::new();
    let mut last = 0;
    for m in PLACEHOLDER.find_iter(key) {
        source.push_str(&regex::escape(&key[last..m.start()]));
        source.push_str(if m.as_str() == "%s" { TOKEN_CAPTURE } else { NUMBER_CAPTURE });
        last = m.end();
    }
    source.push_str(&regex::escape(&key[last..]));
    match Regex::new(&source) {
        Ok(re) => Some(re),
        Err(err) => {
            tracing::debug!(key, error = %err, "skipping untranslatable dictionary pattern");
            None
        }
    }
}

/// Replace each `%s`/`%d` in `template` with the next captured value.
/// Placeholders beyond the captures are left as written.
fn substitute(template: &str, values: &[&str]) -> String {
    let mut next = values.iter();
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| match next.next() {
            Some(value) => (*value).to_owned(),
            None => caps[0].to_owned(),
        })
        .into_owned()
}
