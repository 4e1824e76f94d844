//! Per-request options and header composition.
//!
//! Unset options are filled from the client's defaults; caller values are
//! never overwritten. Headers are layered in this order:
//! 1. `X-` headers from the [`HeaderStore`] collaborator,
//! 2. caller headers (override 1, never refilled),
//! 3. client default headers, which only fill names still absent. A default
//!    may be a lazy accessor evaluated at send time.
//!
//! JSON bodies get `Content-Type: application/json` unless one was set;
//! multipart bodies have any `Content-Type` removed so the transport can
//! write its own boundary.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::http::{Body, Headers};
use crate::i18n::Translator;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Credentials {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    Cors,
    NoCors,
    SameOrigin,
    Navigate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Redirect {
    #[default]
    Follow,
    Error,
    Manual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferrerPolicy {
    NoReferrer,
    #[default]
    NoReferrerWhenDowngrade,
    Origin,
    OriginWhenCrossOrigin,
    SameOrigin,
    StrictOrigin,
    StrictOriginWhenCrossOrigin,
    UnsafeUrl,
}

/// Value of a default header.
#[derive(Clone)]
pub enum HeaderSource {
    Static(String),
    /// Evaluated on every request; `None` omits the header.
    Lazy(Arc<dyn Fn() -> Option<String> + Send + Sync>),
}

impl HeaderSource {
    pub fn lazy<F>(f: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        HeaderSource::Lazy(Arc::new(f))
    }

    pub fn resolve(&self) -> Option<String> {
        match self {
            HeaderSource::Static(value) => Some(value.clone()),
            HeaderSource::Lazy(f) => f(),
        }
    }
}

impl fmt::Debug for HeaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderSource::Static(value) => f.debug_tuple("Static").field(value).finish(),
            HeaderSource::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

impl From<&str> for HeaderSource {
    fn from(value: &str) -> Self {
        HeaderSource::Static(value.to_owned())
    }
}

impl From<String> for HeaderSource {
    fn from(value: String) -> Self {
        HeaderSource::Static(value)
    }
}

/// Persistent key/value storage holding custom request headers.
///
/// Only names starting with `X-` are forwarded.
pub trait HeaderStore: Send + Sync {
    fn custom_headers(&self) -> Vec<(String, String)>;
}

/// Caller-supplied options for one request. Everything is optional.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: Headers,
    pub body: Option<Body>,
    pub credentials: Option<Credentials>,
    pub mode: Option<Mode>,
    pub redirect: Option<Redirect>,
    pub referrer_policy: Option<ReferrerPolicy>,
    /// Overrides the client-wide debounce switch.
    pub debounce: Option<bool>,
    /// Dictionary used when describing failures of this request.
    pub translator: Option<Arc<Translator>>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn debounce(mut self, enabled: bool) -> Self {
        self.debounce = Some(enabled);
        self
    }

    pub fn translator(mut self, translator: Arc<Translator>) -> Self {
        self.translator = Some(translator);
        self
    }
}

fn is_custom(name: &str) -> bool {
    name.len() > 2 && name.get(..2).is_some_and(|prefix| prefix.eq_ignore_ascii_case("x-"))
}

/// Compose the final header list for one request.
pub fn compose_headers(
    caller: &Headers,
    defaults: &[(String, HeaderSource)],
    store: Option<&dyn HeaderStore>,
    body: Option<&Body>,
) -> Headers {
    let mut headers = Headers::new();
    if let Some(store) = store {
        for (name, value) in store.custom_headers() {
            if is_custom(&name) {
                headers.set(name, value);
            }
        }
    }
    for (name, value) in caller.iter() {
        headers.set(name, value);
    }
    for (name, source) in defaults {
        if headers.contains(name) {
            continue;
        }
        if let Some(value) = source.resolve() {
            headers.set(name.clone(), value);
        }
    }
    match body {
        Some(body) if body.is_multipart() => {
            headers.remove("Content-Type");
        }
        Some(Body::Json(_)) if !headers.contains("Content-Type") => {
            headers.set("Content-Type", "application/json");
        }
        _ => {}
    }
    headers
}
