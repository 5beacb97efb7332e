use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(latchkey::authz::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(latchkey::authz::invalid_policy),
        help("Each policy file may contain `permission`, `role`, `group`, `grant`, `deny` or `grant-all` KDL nodes")
    )]
    InvalidPolicy(String),

    #[error("Undefined role `{0}`")]
    #[diagnostic(
        code(latchkey::authz::undefined_role),
        help("Define the role with: role \"<id>\" title=\"...\" local=#true")
    )]
    UndefinedRole(String),

    #[error("Undefined permission `{0}`")]
    #[diagnostic(
        code(latchkey::authz::undefined_permission),
        help("Define the permission with: permission \"<id>\" title=\"...\"")
    )]
    UndefinedPermission(String),

    #[error("Role `{0}` cannot be granted on a resource")]
    #[diagnostic(
        code(latchkey::authz::non_local_role),
        help("Only roles declared with local=#true accept per-resource grants")
    )]
    NonLocalRole(String),

    #[error("Setting `{0}` is not accepted by global grant tables")]
    #[diagnostic(
        code(latchkey::authz::unsupported_setting),
        help("AllowSingle only has a meaning on a resource; use Allow or Deny for code-level grants")
    )]
    UnsupportedSetting(String),

    #[error("No grant stored at ({row}, {col})")]
    #[diagnostic(code(latchkey::authz::missing_cell))]
    MissingCell { row: String, col: String },

    #[error("Unknown resource `{0}`")]
    #[diagnostic(code(latchkey::authz::unknown_resource))]
    UnknownResource(String),

    #[error("Resource `{0}` already exists")]
    #[diagnostic(code(latchkey::authz::resource_exists))]
    ResourceExists(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(latchkey::authz::kdl_parse),
        help("Check your KDL file syntax, see https://kdl.dev")
    )]
    KdlParse(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(latchkey::authz::io))]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthzError::InvalidPolicy(_)
            | AuthzError::UndefinedRole(_)
            | AuthzError::UndefinedPermission(_)
            | AuthzError::NonLocalRole(_)
            | AuthzError::UnsupportedSetting(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AuthzError::UnknownResource(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AuthzError::ResourceExists(_) => (StatusCode::CONFLICT, self.to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };
        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
