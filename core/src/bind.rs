//! Parameter binding: path slots, query string and JSON body.
//!
//! # Design
//! Binding is total. Every placeholder must receive a value from `params`,
//! and nothing the caller passed is dropped:
//! - leftover `params` always go to the query string;
//! - `data` becomes the JSON body for POST/PUT/PATCH when no explicit body
//!   was supplied, and is merged into the query string otherwise.
//!
//! Before serialization, values carrying the reserved markers are reduced:
//! an object with [`VALUE_MARKER`] collapses to one scalar field, and an
//! array whose elements all carry [`BIT_MARKER`] collapses to the OR of
//! their bits.

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::template::{ParamType, RouteTemplate};

/// Caller-supplied parameter map.
pub type Params = Map<String, Value>;

/// Marks an object as reportable by one of its fields. A string value names
/// the field; any other value selects `value`, else `id`, else `path`.
pub const VALUE_MARKER: &str = "@value";

/// Marks an array element as contributing its integer to a bitmask.
pub const BIT_MARKER: &str = "@bit";

const DEFAULT_VALUE_FIELDS: [&str; 3] = ["value", "id", "path"];

/// Errors raised while binding parameters to a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("missing path parameter {0:?}")]
    Missing(String),

    #[error("parameter {name:?} is not a valid {}: {reason}", .ty.name())]
    Invalid {
        name: String,
        ty: ParamType,
        reason: String,
    },

    #[error("request data for a {0} request must be a JSON object")]
    DataNotObject(&'static str),

    #[error("request data could not be serialized: {0}")]
    Serialize(String),
}

/// Result of binding: the resolved path (with query) and an optional JSON
/// body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub url: String,
    pub json_body: Option<String>,
}

pub fn bind(
    template: &RouteTemplate,
    params: Option<&Params>,
    data: Option<&Value>,
    explicit_body: bool,
) -> Result<Bound, BindError> {
    let mut leftover = params.cloned().unwrap_or_default();

    let mut slots = Vec::with_capacity(template.params().len());
    for spec in template.params() {
        let value = match leftover.remove(&spec.name) {
            Some(Value::Null) | None => return Err(BindError::Missing(spec.name.clone())),
            Some(value) => value,
        };
        let text = spec.ty.coerce(&value).map_err(|reason| BindError::Invalid {
            name: spec.name.clone(),
            ty: spec.ty,
            reason,
        })?;
        slots.push(urlencoding::encode(&text).into_owned());
    }
    let path = template.render(&slots);

    let method = template.method();
    let mut pairs: Vec<(String, Value)> = leftover
        .into_iter()
        .map(|(k, v)| (k, reduce_markers(v)))
        .collect();

    let mut json_body = None;
    match data {
        None | Some(Value::Null) => {}
        Some(data) if method.carries_body() && !explicit_body => {
            let body = serde_json::to_string(&reduce_markers(data.clone()))
                .map_err(|e| BindError::Serialize(e.to_string()))?;
            json_body = Some(body);
        }
        Some(Value::Object(map)) => {
            pairs.extend(map.iter().map(|(k, v)| (k.clone(), reduce_markers(v.clone()))));
        }
        Some(_) => return Err(BindError::DataNotObject(method.as_str())),
    }

    Ok(Bound {
        url: append_query(path, &pairs),
        json_body,
    })
}

fn append_query(mut path: String, pairs: &[(String, Value)]) -> String {
    let query = to_query_string(pairs);
    if query.is_empty() {
        return path;
    }
    path.push(if path.contains('?') { '&' } else { '?' });
    path.push_str(&query);
    path
}

/// Encode `pairs` as `k=v&...`. Nulls are skipped; arrays join their
/// encoded elements with commas; objects are written as compact JSON.
pub fn to_query_string(pairs: &[(String, Value)]) -> String {
    pairs
        .iter()
        .filter_map(|(key, value)| {
            let rendered = match value {
                Value::Null => return None,
                Value::Array(items) => items
                    .iter()
                    .filter(|item| !item.is_null())
                    .map(|item| urlencoding::encode(&query_text(item)).into_owned())
                    .collect::<Vec<_>>()
                    .join(","),
                other => urlencoding::encode(&query_text(other)).into_owned(),
            };
            Some(format!("{}={}", urlencoding::encode(key), rendered))
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn query_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Apply the reserved-marker reductions recursively.
pub fn reduce_markers(value: Value) -> Value {
    match value {
        Value::Object(map) => reduce_object(map),
        Value::Array(items) => match bitmask(&items) {
            Some(mask) => Value::Number(Number::from(mask)),
            None => Value::Array(items.into_iter().map(reduce_markers).collect()),
        },
        scalar => scalar,
    }
}

fn reduce_object(mut map: Map<String, Value>) -> Value {
    let Some(selector) = map.remove(VALUE_MARKER) else {
        return Value::Object(map.into_iter().map(|(k, v)| (k, reduce_markers(v))).collect());
    };
    let chosen = match &selector {
        Value::String(field) if map.contains_key(field) => Some(field.clone()),
        _ => DEFAULT_VALUE_FIELDS
            .iter()
            .find(|field| map.contains_key(**field))
            .map(|field| (*field).to_owned()),
    };
    match chosen.and_then(|field| map.remove(&field)) {
        Some(value) => reduce_markers(value),
        None => Value::Object(map.into_iter().map(|(k, v)| (k, reduce_markers(v))).collect()),
    }
}

fn bitmask(items: &[Value]) -> Option<u64> {
    if items.is_empty() {
        return None;
    }
    items.iter().try_fold(0u64, |mask, item| {
        let bit = item.as_object()?.get(BIT_MARKER)?.as_u64()?;
        Some(mask | bit)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn template(source: &str) -> RouteTemplate {
        RouteTemplate::parse(source).unwrap()
    }

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn path_slot_is_filled() {
        let p = params(json!({"uid": 3}));
        let bound = bind(&template("/v1/users/{uid:uint64}"), Some(&p), None, false).unwrap();
        assert_eq!(bound.url, "/v1/users/3");
        assert!(bound.json_body.is_none());
    }

    #[test]
    fn post_data_becomes_json_body() {
        let bound = bind(&template("POST /v1/users"), None, Some(&json!({"name": "a"})), false).unwrap();
        assert_eq!(bound.url, "/v1/users");
        assert_eq!(bound.json_body.as_deref(), Some(r#"{"name":"a"}"#));
    }

    #[test]
    fn negative_uid_is_rejected() {
        let p = params(json!({"uid": -1}));
        let err = bind(&template("/v1/users/{uid:uint64}"), Some(&p), None, false).unwrap_err();
        assert!(matches!(err, BindError::Invalid { ref name, ty: ParamType::Uint64, .. } if name == "uid"));
    }

    #[test]
    fn missing_and_null_path_params_fail() {
        let t = template("/v1/users/{uid}");
        assert_eq!(bind(&t, None, None, false).unwrap_err(), BindError::Missing("uid".into()));
        let p = params(json!({"uid": null}));
        assert_eq!(bind(&t, Some(&p), None, false).unwrap_err(), BindError::Missing("uid".into()));
    }

    #[test]
    fn bodiless_methods_put_everything_in_query() {
        for verb in ["GET", "HEAD", "DELETE", "OPTIONS"] {
            let p = params(json!({"uid": 7, "page": 2}));
            let bound = bind(
                &template(&format!("{verb} /v1/users/{{uid:int}}")),
                Some(&p),
                Some(&json!({"q": "x y"})),
                false,
            )
            .unwrap();
            assert_eq!(bound.url, "/v1/users/7?page=2&q=x%20y", "{verb}");
            assert!(bound.json_body.is_none(), "{verb}");
        }
    }

    #[test]
    fn leftover_params_go_to_query_even_with_body() {
        let p = params(json!({"draft": true}));
        let bound = bind(&template("PUT /v1/docs"), Some(&p), Some(&json!({"t": 1})), false).unwrap();
        assert_eq!(bound.url, "/v1/docs?draft=true");
        assert_eq!(bound.json_body.as_deref(), Some(r#"{"t":1}"#));
    }

    #[test]
    fn explicit_body_sends_data_to_query() {
        let bound = bind(&template("POST /upload"), None, Some(&json!({"tag": "a"})), true).unwrap();
        assert_eq!(bound.url, "/upload?tag=a");
        assert!(bound.json_body.is_none());
    }

    #[test]
    fn non_object_data_on_bodiless_method_fails() {
        let err = bind(&template("GET /x"), None, Some(&json!([1, 2])), false).unwrap_err();
        assert_eq!(err, BindError::DataNotObject("GET"));
    }

    #[test]
    fn arrays_join_with_commas() {
        let p = params(json!({"ids": [1, 2, 3], "skip": null, "tags": ["a b", "c"]}));
        let bound = bind(&template("/items"), Some(&p), None, false).unwrap();
        assert_eq!(bound.url, "/items?ids=1,2,3&tags=a%20b,c");
    }

    #[test]
    fn template_with_literal_query_appends() {
        let p = params(json!({"page": 1}));
        let bound = bind(&template("/items?sort=asc"), Some(&p), None, false).unwrap();
        assert_eq!(bound.url, "/items?sort=asc&page=1");
    }

    #[test]
    fn path_values_are_percent_encoded() {
        let p = params(json!({"name": "a/b c"}));
        let bound = bind(&template("/files/{name}"), Some(&p), None, false).unwrap();
        assert_eq!(bound.url, "/files/a%2Fb%20c");
    }

    #[test]
    fn value_marker_selects_named_field() {
        let reduced = reduce_markers(json!({"@value": "code", "code": "CN", "label": "China"}));
        assert_eq!(reduced, json!("CN"));
    }

    #[test]
    fn value_marker_falls_back_to_value_id_path() {
        assert_eq!(reduce_markers(json!({"@value": true, "id": 5, "path": "/x"})), json!(5));
        assert_eq!(reduce_markers(json!({"@value": true, "path": "/x"})), json!("/x"));
        assert_eq!(
            reduce_markers(json!({"@value": true, "value": 1, "id": 5})),
            json!(1)
        );
        assert_eq!(reduce_markers(json!({"@value": true, "other": 1})), json!({"other": 1}));
    }

    #[test]
    fn bitset_arrays_or_reduce() {
        let reduced = reduce_markers(json!({"perms": [{"@bit": 1}, {"@bit": 4, "label": "x"}]}));
        assert_eq!(reduced, json!({"perms": 5}));
        assert_eq!(reduce_markers(json!([{"@bit": 1}, 2])), json!([{"@bit": 1}, 2]));
        assert_eq!(reduce_markers(json!([])), json!([]));
    }

    #[test]
    fn body_is_reduced_before_serialization() {
        let data = json!({
            "country": {"@value": "code", "code": "CN"},
            "flags": [{"@bit": 2}, {"@bit": 8}],
        });
        let bound = bind(&template("POST /v1/profile"), None, Some(&data), false).unwrap();
        let body: Value = serde_json::from_str(bound.json_body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"country": "CN", "flags": 10}));
    }

    proptest! {
        #[test]
        fn query_values_never_leak_separators(key in "[a-z]{1,8}", value in "\\PC{0,16}") {
            let query = to_query_string(&[(key.clone(), Value::String(value))]);
            let (k, v) = query.split_once('=').unwrap();
            prop_assert_eq!(k, key.as_str());
            prop_assert!(!v.contains('&') && !v.contains('=') && !v.contains(' '));
        }
    }
}
