//! Declarative request layer for `{code, msg, data}` JSON APIs.
//!
//! # Overview
//! Callers describe a request with a route template such as
//! `"POST /v1/users/{uid:uint64}/tags"` plus a parameter map. The client
//! fills path slots (validating each declared type), sends leftovers to the
//! query string or JSON body depending on the method, composes headers,
//! suppresses accidental duplicate submissions, and normalizes every failure
//! into one [`AError`] that can be rendered in any locale.
//!
//! # Design
//! - [`Client`] is an explicit context object; there are no globals.
//! - The network is a [`Transport`] supplied by the host (host-does-IO), so
//!   building and parsing stay deterministic and testable on their own.
//! - Errors are values: decorating an `AError` yields a new one.

pub mod bind;
pub mod client;
pub mod config;
pub mod debounce;
pub mod error;
pub mod http;
pub mod i18n;
pub mod options;
pub mod template;

pub use bind::{BindError, Params, BIT_MARKER, VALUE_MARKER};
pub use client::{BoundRequest, Client, ClientBuilder, Transport, TransportError};
pub use config::{ClientConfig, ConfigError};
pub use debounce::Debouncer;
pub use error::{AError, ErrorCode};
pub use http::{Body, Headers, HttpMethod, HttpRequest, HttpResponse};
pub use i18n::{Dictionary, Translator};
pub use options::{Credentials, HeaderSource, HeaderStore, Mode, Redirect, ReferrerPolicy, RequestOptions};
pub use template::{ParamType, ParameterSpec, RouteTemplate, TemplateError};

// Re-exported so implementors of `Transport` need no direct dependency.
pub use async_trait::async_trait;
