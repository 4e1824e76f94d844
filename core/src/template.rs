//! Route templates: `"[METHOD ]/path/{name[:type]}"`.
//!
//! # Design
//! Placeholder types are a closed enum ([`ParamType`]) with one coercion
//! function per variant. The placeholder pattern is compiled once from the
//! enumerated type names, so a new type is a single entry in
//! `param_types!` and nothing in the parser changes.
//!
//! Percent-encoded braces (`%7B`/`%7D`) are accepted so templates that went
//! through a URL encoder still parse.

use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::http::HttpMethod;

macro_rules! param_types {
    ($($variant:ident => $name:literal,)*) => {
        /// Declared type of a placeholder.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ParamType {
            $($variant,)*
        }

        impl ParamType {
            pub const ALL: &'static [ParamType] = &[$(ParamType::$variant,)*];

            pub const fn name(self) -> &'static str {
                match self {
                    $(ParamType::$variant => $name,)*
                }
            }

            pub fn from_name(name: &str) -> Option<ParamType> {
                match name {
                    $($name => Some(ParamType::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

param_types! {
    Bool => "bool",
    Int8 => "int8",
    Int16 => "int16",
    Int32 => "int32",
    Int => "int",
    Int64 => "int64",
    Uint8 => "uint8",
    Uint16 => "uint16",
    Uint32 => "uint32",
    Uint => "uint",
    Uint64 => "uint64",
    String => "string",
    Uuid => "uuid",
    Alphabetical => "alphabetical",
    Email => "email",
    Mail => "mail",
    Weekday => "weekday",
}

static ALPHABETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]+$").expect("static pattern"));
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static pattern"));

const WEEKDAYS: [&str; 7] = [
    "sunday",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
];

impl ParamType {
    /// Validate `value` against this type and render it for a path slot.
    ///
    /// Numbers may arrive as JSON numbers (whole-valued floats included) or
    /// numeric strings. The error is a short reason suitable for a binding
    /// error message.
    pub fn coerce(self, value: &Value) -> Result<String, String> {
        match self {
            ParamType::Bool => coerce_bool(value),
            ParamType::Int8 => coerce_int(value, i128::from(i8::MIN), i128::from(i8::MAX)),
            ParamType::Int16 => coerce_int(value, i128::from(i16::MIN), i128::from(i16::MAX)),
            ParamType::Int32 => coerce_int(value, i128::from(i32::MIN), i128::from(i32::MAX)),
            ParamType::Int | ParamType::Int64 => {
                coerce_int(value, i128::from(i64::MIN), i128::from(i64::MAX))
            }
            ParamType::Uint8 => coerce_int(value, 0, i128::from(u8::MAX)),
            ParamType::Uint16 => coerce_int(value, 0, i128::from(u16::MAX)),
            ParamType::Uint32 => coerce_int(value, 0, i128::from(u32::MAX)),
            ParamType::Uint | ParamType::Uint64 => coerce_int(value, 0, i128::from(u64::MAX)),
            ParamType::String => scalar_text(value),
            ParamType::Uuid => {
                let text = scalar_text(value)?;
                Uuid::parse_str(&text)
                    .map(|id| id.hyphenated().to_string())
                    .map_err(|_| format!("{text:?} is not a uuid"))
            }
            ParamType::Alphabetical => matching(value, &ALPHABETICAL, "alphabetical"),
            ParamType::Email | ParamType::Mail => matching(value, &EMAIL, "an email address"),
            ParamType::Weekday => coerce_weekday(value),
        }
    }
}

fn scalar_text(value: &Value) -> Result<String, String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => return Err("value is null".to_owned()),
        Value::Array(_) | Value::Object(_) => return Err("expected a scalar value".to_owned()),
    };
    if text.is_empty() {
        return Err("value is empty".to_owned());
    }
    Ok(text)
}

fn coerce_bool(value: &Value) -> Result<String, String> {
    match value {
        Value::Bool(b) => Ok(b.to_string()),
        Value::String(s) if s == "true" || s == "false" => Ok(s.clone()),
        Value::Number(n) if n.as_u64() == Some(0) => Ok("false".to_owned()),
        Value::Number(n) if n.as_u64() == Some(1) => Ok("true".to_owned()),
        other => Err(format!("{other} is not a boolean")),
    }
}

fn coerce_int(value: &Value, min: i128, max: i128) -> Result<String, String> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i128)
            }),
        Value::String(s) => s.trim().parse::<i128>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if (min..=max).contains(&n) => Ok(n.to_string()),
        Some(n) => Err(format!("{n} is out of range {min}..={max}")),
        None => Err(format!("{value} is not an integer")),
    }
}

fn matching(value: &Value, pattern: &Regex, what: &str) -> Result<String, String> {
    let text = scalar_text(value)?;
    if pattern.is_match(&text) {
        Ok(text)
    } else {
        Err(format!("{text:?} is not {what}"))
    }
}

/// Weekdays are 0 (Sunday) to 6, given as a number or an English name or
/// its three-letter abbreviation.
fn coerce_weekday(value: &Value) -> Result<String, String> {
    if let Ok(n) = coerce_int(value, 0, 6) {
        return Ok(n);
    }
    let text = scalar_text(value)?.to_ascii_lowercase();
    WEEKDAYS
        .iter()
        .position(|day| *day == text || (text.len() == 3 && day.starts_with(&text)))
        .map(|n| n.to_string())
        .ok_or_else(|| format!("{text:?} is not a weekday"))
}

/// Errors raised while parsing a template string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template has no path")]
    EmptyPath,

    #[error("placeholder name {0:?} is not a valid identifier")]
    InvalidName(String),

    #[error("placeholder {name:?} declares unknown type {ty:?}")]
    UnknownType { name: String, ty: String },

    #[error("placeholder {0:?} appears more than once")]
    DuplicateName(String),

    #[error("unclosed placeholder in {0:?}")]
    Unclosed(String),
}

/// One named slot of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub ty: ParamType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(usize),
}

static METHOD_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(GET|HEAD|POST|PUT|PATCH|DELETE|OPTIONS)(?:\s+|$)").expect("static pattern")
});

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    let mut names: Vec<&str> = ParamType::ALL.iter().map(|t| t.name()).collect();
    names.sort_by_key(|n| std::cmp::Reverse(n.len()));
    let source = format!(
        r"(?:\{{|%7[Bb])([A-Za-z_][A-Za-z0-9_]*)(?::({}))?(?:\}}|%7[Dd])",
        names.join("|")
    );
    Regex::new(&source).expect("placeholder pattern")
});

static LOOSE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\{|%7[Bb])([^{}%]*?)(?:\}|%7[Dd])").expect("static pattern")
});

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static pattern"));

/// Parsed, immutable route template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTemplate {
    method: HttpMethod,
    segments: Vec<Segment>,
    params: Vec<ParameterSpec>,
}

impl RouteTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let source = source.trim();
        let (method, path) = match METHOD_PREFIX.captures(source) {
            Some(caps) => {
                let verb = caps.get(1).map_or("GET", |m| m.as_str());
                let rest = caps.get(0).map_or(source, |m| &source[m.end()..]);
                (verb.parse().unwrap_or(HttpMethod::Get), rest)
            }
            None => (HttpMethod::Get, source),
        };
        if path.is_empty() {
            return Err(TemplateError::EmptyPath);
        }

        let mut segments = Vec::new();
        let mut params: Vec<ParameterSpec> = Vec::new();
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(path) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            push_literal(&mut segments, &path[last..whole.start()])?;
            last = whole.end();

            let name = name.as_str();
            if params.iter().any(|p| p.name == name) {
                return Err(TemplateError::DuplicateName(name.to_owned()));
            }
            let ty = caps
                .get(2)
                .and_then(|t| ParamType::from_name(t.as_str()))
                .unwrap_or(ParamType::String);
            segments.push(Segment::Slot(params.len()));
            params.push(ParameterSpec {
                name: name.to_owned(),
                ty,
            });
        }
        push_literal(&mut segments, &path[last..])?;

        Ok(Self {
            method,
            segments,
            params,
        })
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn params(&self) -> &[ParameterSpec] {
        &self.params
    }

    /// Render the path with one already-encoded value per parameter, in
    /// declaration order.
    pub(crate) fn render(&self, values: &[String]) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(idx) => out.push_str(values.get(*idx).map_or("", String::as_str)),
            }
        }
        out
    }
}

/// A literal chunk must not contain anything brace-like; if it does, the
/// strict pattern rejected a placeholder and we report why.
fn push_literal(segments: &mut Vec<Segment>, text: &str) -> Result<(), TemplateError> {
    if text.is_empty() {
        return Ok(());
    }
    if let Some(caps) = LOOSE_PLACEHOLDER.captures(text) {
        let inner = caps.get(1).map_or("", |m| m.as_str());
        let (name, ty) = match inner.split_once(':') {
            Some((name, ty)) => (name, Some(ty)),
            None => (inner, None),
        };
        if !IDENTIFIER.is_match(name) {
            return Err(TemplateError::InvalidName(name.to_owned()));
        }
        return Err(TemplateError::UnknownType {
            name: name.to_owned(),
            ty: ty.unwrap_or_default().to_owned(),
        });
    }
    let lower = text.to_ascii_lowercase();
    if text.contains('{') || text.contains('}') || lower.contains("%7b") || lower.contains("%7d") {
        return Err(TemplateError::Unclosed(text.to_owned()));
    }
    segments.push(Segment::Literal(text.to_owned()));
    Ok(())
}

pub const DEFAULT_TEMPLATE_CAPACITY: usize = 256;

/// Parse-once cache keyed by the template string.
///
/// Only templates with placeholders are kept, since callers routinely format
/// ids straight into literal paths. At capacity the oldest entry is evicted.
#[derive(Debug)]
pub struct TemplateCache {
    capacity: usize,
    entries: Mutex<IndexMap<String, Arc<RouteTemplate>>>,
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TEMPLATE_CAPACITY)
    }
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(IndexMap::new()),
        }
    }

    /// Failed parses are not cached.
    pub fn get_or_parse(&self, source: &str) -> Result<Arc<RouteTemplate>, TemplateError> {
        if let Some(hit) = self.entries.lock().get(source) {
            return Ok(Arc::clone(hit));
        }
        let parsed = Arc::new(RouteTemplate::parse(source)?);
        if parsed.params().is_empty() || self.capacity == 0 {
            return Ok(parsed);
        }
        tracing::debug!(template = source, "caching route template");
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.shift_remove_index(0);
        }
        entries.insert(source.to_owned(), Arc::clone(&parsed));
        Ok(parsed)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
