use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::RwLock;

use crate::authz::engine::{Interaction, MAX_DEPTH};
use crate::authz::errors::AuthzError;
use crate::authz::hierarchy::ResourceTree;
use crate::authz::sharing::{apply_sharing, settings_for_object, SharingChanges};
use crate::authz::types::{
    AccessRequest, AccessResponse, CheckRequest, CheckResponse, CreateResourceRequest,
    Participation, Principal, ResourceId, Setting,
};
use crate::authz::{AuthzState, AUTHENTICATED_ROLE};

/// Shared state behind the HTTP surface.
pub struct AppState {
    pub authz: Arc<AuthzState>,
    pub tree: RwLock<ResourceTree>,
    pub max_depth: usize,
}

impl AppState {
    pub fn new(authz: Arc<AuthzState>) -> Self {
        Self {
            authz,
            tree: RwLock::new(ResourceTree::new()),
            max_depth: MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn interaction(&self, participations: Vec<Participation>) -> Interaction {
        Interaction::for_request(self.authz.clone(), participations).with_max_depth(self.max_depth)
    }

    /// Principals arriving over HTTP are authenticated: they hold the
    /// `Authenticated` role and belong to the groups listing them.
    fn authenticated(&self, mut principal: Principal) -> Principal {
        principal
            .roles
            .entry(AUTHENTICATED_ROLE.to_string())
            .or_insert(Setting::Allow);
        for group in self.authz.groups.groups_of(&principal.id) {
            if !principal.groups.contains(group) {
                principal.groups.push(group.clone());
            }
        }
        principal
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/check", post(handle_check))
        .route("/v1/access", post(handle_access))
        .route("/v1/resources", post(handle_create_resource))
        .route(
            "/v1/sharing/{id}",
            get(handle_get_sharing).post(handle_post_sharing),
        )
        .route("/healthz", get(health))
        .with_state(state)
}

async fn handle_check(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckRequest>,
) -> impl IntoResponse {
    let participations = req
        .principal
        .map(|p| Participation::Principal(state.authenticated(p)))
        .into_iter()
        .collect();
    let mut interaction = state.interaction(participations);

    let tree = state.tree.read().await;
    if let Err(e) = tree.ensure_exists(&req.resource) {
        return e.into_response();
    }
    let allowed = interaction.check_permission(&req.permission, &*tree, &req.resource);
    Json(CheckResponse { allowed }).into_response()
}

async fn handle_access(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AccessRequest>,
) -> impl IntoResponse {
    let mut interaction = state.interaction(Vec::new());

    let tree = state.tree.read().await;
    if let Err(e) = tree.ensure_exists(&req.resource) {
        return e.into_response();
    }
    let roles = interaction.roles_with_access(&*tree, &req.resource, &req.permission);
    let principals = interaction.principals_with_access(&*tree, &req.resource, &req.permission);
    Json(AccessResponse { roles, principals }).into_response()
}

async fn handle_create_resource(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateResourceRequest>,
) -> impl IntoResponse {
    let mut tree = state.tree.write().await;
    let result = match req.view_of {
        Some(owner) => tree.insert_view(req.id.clone(), owner),
        None => tree.insert(req.id.clone(), req.parent),
    };
    match result {
        Ok(()) => {
            tracing::debug!(resource = %req.id, "resource created");
            (StatusCode::CREATED, Json(json!({ "id": req.id }))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn handle_get_sharing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = ResourceId::new(id);
    let tree = state.tree.read().await;
    if let Err(e) = tree.ensure_exists(&id) {
        return e.into_response();
    }
    Json(settings_for_object(&*tree, &state.authz, &id)).into_response()
}

async fn handle_post_sharing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(changes): Json<SharingChanges>,
) -> impl IntoResponse {
    let id = ResourceId::new(id);
    let mut tree = state.tree.write().await;
    let result: Result<bool, AuthzError> = tree.update_acl(&id, &state.authz.registry, |editor| {
        apply_sharing(editor, &changes)
    });
    match result {
        Ok(changed) => {
            tracing::info!(resource = %id, changed, "sharing updated");
            Json(json!({ "changed": changed })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::loader::{builtin_policy, compile_policies};
    use crate::authz::policy::parse_kdl_document;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    const POLICY: &str = r#"
permission "ViewContent"
role "Reader" local=#true
role "Manager" local=#false
grant permission="ViewContent" role="Reader"
grant permission="ViewContent" role="Manager"
group "staff" {
    roles {
        - "Manager"
    }
    members {
        - "dana"
    }
}
"#;

    fn app() -> Router {
        let authz = compile_policies(vec![
            builtin_policy().unwrap(),
            parse_kdl_document(POLICY).unwrap(),
        ])
        .unwrap();
        router(Arc::new(AppState::new(Arc::new(authz))))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn seed(app: &Router) {
        let (status, _) = call(app, "POST", "/v1/resources", json!({"id": "site"})).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = call(
            app,
            "POST",
            "/v1/resources",
            json!({"id": "doc", "parent": "site"}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = app()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_check_after_sharing() {
        let app = app();
        seed(&app).await;

        let check = json!({
            "principal": {"id": "bob"},
            "permission": "ViewContent",
            "resource": "doc"
        });
        let (_, body) = call(&app, "POST", "/v1/check", check.clone()).await;
        assert_eq!(body["allowed"], false);

        let (status, body) = call(
            &app,
            "POST",
            "/v1/sharing/site",
            json!({"prinrole": [{"principal": "bob", "role": "Reader", "setting": "Allow"}]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changed"], true);

        let (_, body) = call(&app, "POST", "/v1/check", check).await;
        assert_eq!(body["allowed"], true);
    }

    #[tokio::test]
    async fn test_anonymous_and_authenticated_public_permissions() {
        let app = app();
        seed(&app).await;

        let (_, body) = call(
            &app,
            "POST",
            "/v1/check",
            json!({"permission": "AccessPreflight", "resource": "doc"}),
        )
        .await;
        assert_eq!(body["allowed"], true);

        let (_, body) = call(
            &app,
            "POST",
            "/v1/check",
            json!({"permission": "ViewContent", "resource": "doc"}),
        )
        .await;
        assert_eq!(body["allowed"], false);
    }

    #[tokio::test]
    async fn test_group_membership_from_policy() {
        let app = app();
        seed(&app).await;
        let (_, body) = call(
            &app,
            "POST",
            "/v1/check",
            json!({"principal": {"id": "dana"}, "permission": "ViewContent", "resource": "doc"}),
        )
        .await;
        assert_eq!(body["allowed"], true);
    }

    #[tokio::test]
    async fn test_unknown_resource_is_404() {
        let app = app();
        let (status, body) = call(
            &app,
            "POST",
            "/v1/check",
            json!({"permission": "ViewContent", "resource": "nowhere"}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nowhere"));

        let (status, _) = call(
            &app,
            "POST",
            "/v1/resources",
            json!({"id": "orphan", "parent": "nowhere"}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sharing_rejects_global_role() {
        let app = app();
        seed(&app).await;
        let (status, _) = call(
            &app,
            "POST",
            "/v1/sharing/doc",
            json!({"prinrole": [{"principal": "bob", "role": "Manager", "setting": "Allow"}]}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_sharing_view_and_access() {
        let app = app();
        seed(&app).await;
        call(
            &app,
            "POST",
            "/v1/sharing/site",
            json!({"prinrole": [{"principal": "bob", "role": "Reader", "setting": "Allow"}]}),
        )
        .await;

        let request = Request::get("/v1/sharing/doc").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let levels: Value = serde_json::from_slice(&bytes).unwrap();
        let names: Vec<_> = levels
            .as_array()
            .unwrap()
            .iter()
            .map(|l| l["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["doc", "site", "system"]);
        assert_eq!(levels[1]["prinrole"][0]["principal"], "bob");

        let (_, body) = call(
            &app,
            "POST",
            "/v1/access",
            json!({"permission": "ViewContent", "resource": "doc"}),
        )
        .await;
        assert_eq!(body["roles"], json!(["Manager", "Reader"]));
        assert_eq!(body["principals"], json!(["bob"]));
    }

    #[tokio::test]
    async fn test_duplicate_resource_conflicts() {
        let app = app();
        seed(&app).await;
        let (status, _) = call(&app, "POST", "/v1/resources", json!({"id": "site"})).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
