use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};

/// Envelope code for a create that collides with an existing name.
pub const RECORD_CONFLICT: i64 = 495;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: u64,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateUser {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub name: Option<String>,
}

#[derive(Default)]
pub struct Store {
    users: RwLock<BTreeMap<u64, User>>,
    next_uid: AtomicU64,
}

pub type Db = Arc<Store>;

pub fn app() -> Router {
    let db: Db = Arc::new(Store::default());
    Router::new()
        .route("/v1/users", get(list_users).post(create_user))
        .route("/v1/users/{uid}", get(get_user).put(update_user).delete(delete_user))
        .route("/v1/echo", any(echo))
        .route("/v1/status/{code}", get(status))
        .route("/v1/broken", get(broken))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "mock server listening");
    }
    axum::serve(listener, app()).await
}

fn ok(data: impl Serialize) -> Json<Value> {
    Json(json!({"code": 200, "msg": "OK", "data": data}))
}

fn fail(code: i64, msg: &str) -> Json<Value> {
    Json(json!({"code": code, "msg": msg, "data": null}))
}

async fn list_users(State(db): State<Db>, Query(query): Query<ListQuery>) -> Json<Value> {
    let users = db.users.read().await;
    let matching: Vec<&User> = users
        .values()
        .filter(|u| query.name.as_ref().map_or(true, |n| &u.name == n))
        .collect();
    ok(matching)
}

async fn create_user(State(db): State<Db>, Json(input): Json<CreateUser>) -> Json<Value> {
    let mut users = db.users.write().await;
    if users.values().any(|u| u.name == input.name) {
        return fail(RECORD_CONFLICT, "Record Conflict");
    }
    let uid = db.next_uid.fetch_add(1, Ordering::SeqCst) + 1;
    let user = User {
        uid,
        name: input.name,
        email: input.email,
    };
    users.insert(uid, user.clone());
    tracing::debug!(uid, "created user");
    ok(user)
}

async fn get_user(State(db): State<Db>, Path(uid): Path<u64>) -> Json<Value> {
    match db.users.read().await.get(&uid) {
        Some(user) => ok(user),
        None => fail(404, "Not found"),
    }
}

async fn update_user(
    State(db): State<Db>,
    Path(uid): Path<u64>,
    Json(input): Json<UpdateUser>,
) -> Json<Value> {
    let mut users = db.users.write().await;
    let Some(user) = users.get_mut(&uid) else {
        return fail(404, "Not found");
    };
    if let Some(name) = input.name {
        user.name = name;
    }
    if let Some(email) = input.email {
        user.email = Some(email);
    }
    ok(user.clone())
}

async fn delete_user(State(db): State<Db>, Path(uid): Path<u64>) -> Json<Value> {
    match db.users.write().await.remove(&uid) {
        Some(_) => ok(Value::Null),
        None => fail(404, "Not found"),
    }
}

/// Reflects the request back inside an envelope.
async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: String) -> Json<Value> {
    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_owned(), value.to_str().ok()?.to_owned())))
        .collect();
    ok(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "headers": headers,
        "body": body,
    }))
}

async fn status(Path(code): Path<u16>) -> (StatusCode, String) {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, format!("status {code}"))
}

async fn broken() -> &'static str {
    "not json"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_serializes_to_json() {
        let user = User {
            uid: 7,
            name: "ada".to_string(),
            email: None,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["uid"], 7);
        assert_eq!(json["name"], "ada");
        assert!(json["email"].is_null());
    }

    #[test]
    fn create_user_email_is_optional() {
        let input: CreateUser = serde_json::from_str(r#"{"name":"ada"}"#).unwrap();
        assert_eq!(input.name, "ada");
        assert!(input.email.is_none());
    }

    #[test]
    fn create_user_rejects_missing_name() {
        let result: Result<CreateUser, _> = serde_json::from_str(r#"{"email":"a@b.io"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn update_user_all_fields_optional() {
        let input: UpdateUser = serde_json::from_str(r#"{}"#).unwrap();
        assert!(input.name.is_none());
        assert!(input.email.is_none());
    }

    #[test]
    fn envelopes_have_code_msg_data() {
        let Json(success) = ok(json!([1]));
        assert_eq!(success, json!({"code": 200, "msg": "OK", "data": [1]}));
        let Json(failure) = fail(404, "Not found");
        assert_eq!(failure, json!({"code": 404, "msg": "Not found", "data": null}));
    }
}
