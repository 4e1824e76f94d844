//! Template-driven request client.
//!
//! # Design
//! `Client` is the context object an application constructs once. It owns
//! its defaults, header providers, dictionaries, template cache and debounce
//! table; nothing is global. Work is split like this:
//! - [`Client::build`] turns a template plus parameters into an
//!   [`HttpRequest`] without I/O;
//! - [`Client::parse`] interprets an [`HttpResponse`] without I/O;
//! - [`Client::call`] runs build → debounce → [`Transport::send`] → parse.
//!
//! The transport is supplied by the host, keeping the core deterministic and
//! free of network dependencies. Every failure leaving this module is an
//! [`AError`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::bind::{bind, BindError, Params};
use crate::config::ClientConfig;
use crate::debounce::{checksum, Debouncer};
use crate::error::{AError, ErrorCode};
use crate::http::{Body, HttpMethod, HttpRequest, HttpResponse};
use crate::i18n::Translator;
use crate::options::{compose_headers, HeaderSource, HeaderStore, RequestOptions};
use crate::template::{TemplateCache, TemplateError};

/// Network failures reported by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

/// Executes requests on behalf of the client. Cancellation, if the
/// underlying primitive offers it, is the transport's business.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl From<TemplateError> for AError {
    fn from(err: TemplateError) -> Self {
        AError::new(ErrorCode::ParameterError)
            .with_heading("template")
            .with_detail(err.to_string())
    }
}

impl From<BindError> for AError {
    fn from(err: BindError) -> Self {
        let base = AError::new(ErrorCode::ParameterError);
        let base = match &err {
            BindError::Missing(name) | BindError::Invalid { name, .. } => base.with_heading(name.clone()),
            _ => base,
        };
        base.with_detail(err.to_string())
    }
}

impl From<TransportError> for AError {
    fn from(err: TransportError) -> Self {
        AError::new(ErrorCode::NetworkFailure).with_detail(err.to_string())
    }
}

/// Wire envelope wrapping every non-HEAD response body.
#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
}

/// A request ready for dispatch, with the behavior flags that stay on the
/// client side.
#[derive(Debug, Clone)]
pub struct BoundRequest {
    pub request: HttpRequest,
    pub debounce: bool,
    pub translator: Option<Arc<Translator>>,
}

pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    headers: Vec<(String, HeaderSource)>,
    store: Option<Arc<dyn HeaderStore>>,
    translator: Option<Arc<Translator>>,
}

impl ClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a default header. Later calls replace earlier ones of the same
    /// name.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<HeaderSource>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    /// Default header evaluated on every request.
    pub fn lazy_header<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        self.default_header(name, HeaderSource::lazy(f))
    }

    /// Supply the `Authorization` value from the auth subsystem.
    pub fn authorization<F>(self, f: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        self.lazy_header("Authorization", f)
    }

    pub fn header_store(mut self, store: Arc<dyn HeaderStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn translator(mut self, translator: Arc<Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn build(self) -> Client {
        let mut headers: Vec<(String, HeaderSource)> = self
            .config
            .headers
            .iter()
            .filter(|(name, _)| !self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)))
            .map(|(name, value)| (name.clone(), HeaderSource::Static(value.clone())))
            .collect();
        headers.extend(self.headers);
        let debouncer = Debouncer::new(self.config.debounce_window(), self.config.sweep_interval());
        Client {
            transport: self.transport,
            config: self.config,
            headers,
            store: self.store,
            translator: self.translator,
            templates: TemplateCache::new(),
            debouncer,
        }
    }
}

pub struct Client {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    headers: Vec<(String, HeaderSource)>,
    store: Option<Arc<dyn HeaderStore>>,
    translator: Option<Arc<Translator>>,
    templates: TemplateCache,
    debouncer: Debouncer,
}

impl Client {
    pub fn builder(transport: impl Transport + 'static) -> ClientBuilder {
        Self::builder_shared(Arc::new(transport))
    }

    pub fn builder_shared(transport: Arc<dyn Transport>) -> ClientBuilder {
        ClientBuilder {
            transport,
            config: ClientConfig::default(),
            headers: Vec::new(),
            store: None,
            translator: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    /// Stop the background debounce sweep. Also happens on drop.
    pub fn shutdown(&self) {
        self.debouncer.stop();
    }

    /// Resolve `template` against `params`/`data` and compose the request.
    pub fn build(
        &self,
        template: &str,
        params: Option<&Params>,
        data: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<BoundRequest, AError> {
        let route = self.templates.get_or_parse(template)?;
        let bound = bind(&route, params, data, options.body.is_some())?;
        let body = options.body.clone().or(bound.json_body.map(Body::Json));
        let headers = compose_headers(&options.headers, &self.headers, self.store.as_deref(), body.as_ref());

        let request = HttpRequest {
            method: route.method(),
            url: self.resolve_url(&bound.url),
            headers,
            body,
            credentials: options.credentials.unwrap_or(self.config.credentials),
            mode: options.mode.unwrap_or(self.config.mode),
            redirect: options.redirect.unwrap_or(self.config.redirect),
            referrer_policy: options.referrer_policy.unwrap_or(self.config.referrer_policy),
        };
        Ok(BoundRequest {
            request,
            debounce: options.debounce.unwrap_or(self.config.debounce),
            translator: options.translator.clone().or_else(|| self.translator.clone()),
        })
    }

    fn resolve_url(&self, path: &str) -> String {
        if self.config.base_url.is_empty() || path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        let base = self.config.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    /// Interpret a transport response.
    ///
    /// Non-2xx statuses fail without reading the body. HEAD and 204 have no
    /// envelope and resolve to `null`. Anything else must be a
    /// `{code, msg, data}` envelope whose `code` is 2xx; only `data` is
    /// returned.
    pub fn parse<T: DeserializeOwned>(&self, method: HttpMethod, response: HttpResponse) -> Result<T, AError> {
        if !response.is_success() {
            return Err(AError::from_status(response.status));
        }
        if method == HttpMethod::Head || response.status == 204 {
            return decode_data(Value::Null);
        }
        let envelope: Envelope = serde_json::from_str(&response.body).map_err(|e| {
            AError::new(ErrorCode::ClientThrow)
                .with_detail(e.to_string())
                .with_detail(response.body.clone())
        })?;
        if !(200..300).contains(&envelope.code) {
            return Err(AError::from_raw(envelope.code, &envelope.msg));
        }
        decode_data(envelope.data)
    }

    /// Run a built request through debounce, transport and parse.
    pub async fn dispatch<T: DeserializeOwned>(&self, bound: BoundRequest) -> Result<T, AError> {
        let BoundRequest {
            request,
            debounce,
            translator,
        } = bound;
        let method = request.method;

        if debounce {
            let sum = checksum(method, &request.url, request.body.as_ref().map(Body::as_bytes));
            if !self.debouncer.admit(&sum) {
                tracing::warn!(%method, url = %request.url, "request denied by debounce");
                return Err(AError::new(ErrorCode::DeniedByDebounce));
            }
        }

        tracing::debug!(%method, url = %request.url, "dispatching request");
        let url = request.url.clone();
        let result = match self.transport.send(request).await {
            Ok(response) => self.parse(method, response),
            Err(err) => Err(AError::from(err)),
        };
        if let Err(err) = &result {
            tracing::warn!(
                %method,
                %url,
                code = err.code().as_u16(),
                error = %self.describe(err, translator.as_deref()),
                "request failed"
            );
        }
        result
    }

    /// Build and dispatch in one go.
    pub async fn call<T: DeserializeOwned>(
        &self,
        template: &str,
        params: Option<&Params>,
        data: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<T, AError> {
        let bound = self.build(template, params, data, options)?;
        self.dispatch(bound).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, params: Option<&Params>) -> Result<T, AError> {
        self.verb(HttpMethod::Get, path, params, None).await
    }

    pub async fn head(&self, path: &str, params: Option<&Params>) -> Result<(), AError> {
        self.verb(HttpMethod::Head, path, params, None).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str, params: Option<&Params>) -> Result<T, AError> {
        self.verb(HttpMethod::Delete, path, params, None).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Option<&Params>,
        data: Option<&Value>,
    ) -> Result<T, AError> {
        self.verb(HttpMethod::Post, path, params, data).await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Option<&Params>,
        data: Option<&Value>,
    ) -> Result<T, AError> {
        self.verb(HttpMethod::Put, path, params, data).await
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Option<&Params>,
        data: Option<&Value>,
    ) -> Result<T, AError> {
        self.verb(HttpMethod::Patch, path, params, data).await
    }

    async fn verb<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        params: Option<&Params>,
        data: Option<&Value>,
    ) -> Result<T, AError> {
        let template = format!("{method} {path}");
        self.call(&template, params, data, &RequestOptions::default()).await
    }

    /// Locale-aware text for `err`: the given dictionary, else the client
    /// default, else the untranslated form.
    pub fn describe(&self, err: &AError, translator: Option<&Translator>) -> String {
        match translator.or(self.translator.as_deref()) {
            Some(translator) => err.to_locale_string(translator),
            None => err.to_string(),
        }
    }
}

fn decode_data<T: DeserializeOwned>(data: Value) -> Result<T, AError> {
    serde_json::from_value(data).map_err(|e| {
        AError::new(ErrorCode::ClientThrow)
            .with_heading("data")
            .with_detail(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Transport that records requests and replays scripted responses.
    #[derive(Default)]
    struct Scripted {
        sent: Mutex<Vec<HttpRequest>>,
        replies: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    }

    impl Scripted {
        fn reply(self: Arc<Self>, status: u16, body: &str) -> Arc<Self> {
            self.replies.lock().push_back(Ok(HttpResponse {
                status,
                headers: Vec::new(),
                body: body.to_owned(),
            }));
            self
        }

        fn sent(&self) -> Vec<HttpRequest> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.sent.lock().push(request);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or(Err(TransportError::Other("no scripted reply".into())))
        }
    }

    fn client_with(transport: Arc<Scripted>) -> Client {
        Client::builder_shared(transport)
            .config(ClientConfig {
                base_url: "http://localhost:3000/".into(),
                ..ClientConfig::default()
            })
            .build()
    }

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    fn ok_envelope(data: Value) -> String {
        json!({"code": 200, "msg": "OK", "data": data}).to_string()
    }

    #[test]
    fn build_resolves_against_base_url() {
        let client = client_with(Arc::new(Scripted::default()));
        let bound = client
            .build("/v1/users/{uid:uint64}", Some(&params(json!({"uid": 3}))), None, &RequestOptions::new())
            .unwrap();
        assert_eq!(bound.request.method, HttpMethod::Get);
        assert_eq!(bound.request.url, "http://localhost:3000/v1/users/3");
        assert!(bound.request.body.is_none());
        assert!(bound.debounce);
    }

    #[test]
    fn build_post_sets_json_body_and_content_type() {
        let client = client_with(Arc::new(Scripted::default()));
        let bound = client
            .build("POST /v1/users", None, Some(&json!({"name": "a"})), &RequestOptions::new())
            .unwrap();
        assert_eq!(bound.request.method, HttpMethod::Post);
        assert_eq!(bound.request.body, Some(Body::Json(r#"{"name":"a"}"#.into())));
        assert_eq!(bound.request.headers.get("content-type"), Some("application/json"));
    }

    #[test]
    fn template_cache_stays_bounded() {
        let client = client_with(Arc::new(Scripted::default()));
        for id in 0..10_000 {
            let path = format!("GET /v1/users/{id}");
            client.build(&path, None, None, &RequestOptions::new()).unwrap();
        }
        for id in 0..1_000 {
            let path = format!("/v1/groups/{id}/users/{{uid:uint64}}");
            let params = params(json!({"uid": id}));
            client.build(&path, Some(&params), None, &RequestOptions::new()).unwrap();
        }
        assert!(client.templates.len() <= crate::template::DEFAULT_TEMPLATE_CAPACITY);
    }

    #[test]
    fn whole_number_float_fills_integer_slot() {
        let client = client_with(Arc::new(Scripted::default()));
        let bound = client
            .build("/v1/users/{uid:uint64}", Some(&params(json!({"uid": 3.0}))), None, &RequestOptions::new())
            .unwrap();
        assert_eq!(bound.request.url, "http://localhost:3000/v1/users/3");
    }

    #[test]
    fn absolute_template_ignores_base_url() {
        let client = client_with(Arc::new(Scripted::default()));
        let bound = client
            .build("https://cdn.example.com/a", None, None, &RequestOptions::new())
            .unwrap();
        assert_eq!(bound.request.url, "https://cdn.example.com/a");
    }

    #[test]
    fn build_errors_are_parameter_errors() {
        let client = client_with(Arc::new(Scripted::default()));
        let err = client
            .build("/v1/users/{uid:uint64}", Some(&params(json!({"uid": -1}))), None, &RequestOptions::new())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParameterError);
        assert_eq!(err.headings(), ["uid"]);

        let err = client.build("/v1/{x:float}", None, None, &RequestOptions::new()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParameterError);
        assert_eq!(err.headings(), ["template"]);
    }

    #[test]
    fn options_fill_from_config_without_overwriting() {
        use crate::options::Credentials;
        let client = client_with(Arc::new(Scripted::default()));
        let bound = client
            .build(
                "/x",
                None,
                None,
                &RequestOptions::new().credentials(Credentials::Include).debounce(false),
            )
            .unwrap();
        assert_eq!(bound.request.credentials, Credentials::Include);
        assert_eq!(bound.request.mode, client.config().mode);
        assert!(!bound.debounce);
    }

    #[test]
    fn authorization_and_config_headers() {
        let client = Client::builder_shared(Arc::new(Scripted::default()))
            .config(ClientConfig {
                headers: [("X-Client".to_owned(), "cfg".to_owned())].into_iter().collect(),
                ..ClientConfig::default()
            })
            .authorization(|| Some("Bearer abc".into()))
            .build();
        let bound = client.build("/x", None, None, &RequestOptions::new()).unwrap();
        assert_eq!(bound.request.headers.get("Authorization"), Some("Bearer abc"));
        assert_eq!(bound.request.headers.get("X-Client"), Some("cfg"));
    }

    #[test]
    fn parse_unwraps_envelope_data() {
        let client = client_with(Arc::new(Scripted::default()));
        let response = HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: ok_envelope(json!({"uid": 3})),
        };
        let data: Value = client.parse(HttpMethod::Get, response).unwrap();
        assert_eq!(data, json!({"uid": 3}));
    }

    #[test]
    fn parse_envelope_failure_code() {
        let client = client_with(Arc::new(Scripted::default()));
        let response = HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: r#"{"code":404,"msg":"Not found","data":null}"#.into(),
        };
        let err = client.parse::<Value>(HttpMethod::Get, response).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.message(), "Not found");
    }

    #[test]
    fn parse_non_2xx_skips_body() {
        let client = client_with(Arc::new(Scripted::default()));
        let response = HttpResponse {
            status: 502,
            headers: Vec::new(),
            body: "<html>bad gateway</html>".into(),
        };
        let err = client.parse::<Value>(HttpMethod::Get, response).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadGateway);
        assert!(err.details().is_empty());
    }

    #[test]
    fn parse_unparsable_body_is_client_throw() {
        let client = client_with(Arc::new(Scripted::default()));
        let response = HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: "not json".into(),
        };
        let err = client.parse::<Value>(HttpMethod::Get, response).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ClientThrow);
        assert!(err.details().iter().any(|d| d == "not json"));
    }

    #[test]
    fn parse_head_synthesizes_success() {
        let client = client_with(Arc::new(Scripted::default()));
        let response = HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: "ignored".into(),
        };
        client.parse::<()>(HttpMethod::Head, response).unwrap();
    }

    #[test]
    fn parse_data_shape_mismatch() {
        #[derive(Debug, Deserialize)]
        struct User {
            #[allow(dead_code)]
            uid: u64,
        }
        let client = client_with(Arc::new(Scripted::default()));
        let response = HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: ok_envelope(json!({"uid": "three"})),
        };
        let err = client.parse::<User>(HttpMethod::Get, response).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ClientThrow);
        assert_eq!(err.headings(), ["data"]);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_calls_within_window_dispatch_once() {
        let transport = Arc::new(Scripted::default())
            .reply(200, &ok_envelope(json!(1)))
            .reply(200, &ok_envelope(json!(2)));
        let client = client_with(Arc::clone(&transport));
        let data = json!({"name": "a"});

        let first: Value = client.post("/v1/users", None, Some(&data)).await.unwrap();
        assert_eq!(first, json!(1));
        let second = client.post::<Value>("/v1/users", None, Some(&data)).await.unwrap_err();
        assert!(second.is_denied_by_debounce());
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_calls_a_window_apart_both_dispatch() {
        let transport = Arc::new(Scripted::default())
            .reply(200, &ok_envelope(json!(1)))
            .reply(200, &ok_envelope(json!(2)));
        let client = client_with(Arc::clone(&transport));

        let first: Value = client.get("/v1/users", None).await.unwrap();
        tokio::time::advance(Duration::from_millis(400)).await;
        let second: Value = client.get("/v1/users", None).await.unwrap();
        assert_eq!((first, second), (json!(1), json!(2)));
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_can_be_disabled_per_request() {
        let transport = Arc::new(Scripted::default())
            .reply(200, &ok_envelope(json!(1)))
            .reply(200, &ok_envelope(json!(2)));
        let client = client_with(Arc::clone(&transport));
        let options = RequestOptions::new().debounce(false);

        client.call::<Value>("/v1/ping", None, None, &options).await.unwrap();
        client.call::<Value>("/v1/ping", None, None, &options).await.unwrap();
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn transport_failure_is_network_failure() {
        let transport = Arc::new(Scripted::default());
        transport
            .replies
            .lock()
            .push_back(Err(TransportError::Connect("refused".into())));
        let client = client_with(Arc::clone(&transport));
        let err = client.get::<Value>("/v1/users", None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NetworkFailure);
        assert_eq!(err.details(), ["connection failed: refused"]);
        client.shutdown();
        assert!(!client.debouncer().is_sweeping());
    }

    #[test]
    fn describe_prefers_request_dictionary() {
        let mut zh = crate::i18n::Dictionary::new();
        zh.insert("Not Found".into(), "未找到".into());
        let mut fr = crate::i18n::Dictionary::new();
        fr.insert("Not Found".into(), "Introuvable".into());

        let client = Client::builder_shared(Arc::new(Scripted::default()))
            .translator(Arc::new(Translator::new(fr)))
            .build();
        let err = AError::new(ErrorCode::NotFound);
        assert_eq!(client.describe(&err, None), "Introuvable");
        assert_eq!(client.describe(&err, Some(&Translator::new(zh))), "未找到");
    }
}
