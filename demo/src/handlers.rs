//! HTTP handlers

use axum::{Extension, Json};
use serde::Serialize;
use xsts_auth::{ClientClaims, UserClaims};

/// Claims of the calling user as returned by `/api/getclaims`
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimsSummary {
    pub sandbox: String,
    pub audience: String,
    pub expires: String,
    pub device_type: Option<String>,
    pub title_id: Option<String>,
    pub user_hash: String,
    pub gamertag: Option<String>,
    pub pxuid: Option<String>,
    pub age_group: Option<String>,
    pub country: Option<String>,
    pub privileges: Vec<String>,
    pub other_users: usize,
}

impl From<&ClientClaims> for ClaimsSummary {
    fn from(claims: &ClientClaims) -> Self {
        let user: &UserClaims = claims.selected_user();
        let owned = |value: Option<&str>| value.map(ToString::to_string);
        Self {
            sandbox: claims.sandbox().to_string(),
            audience: claims.audience().to_string(),
            expires: claims.expires().to_rfc3339(),
            device_type: claims.device().device_type.clone(),
            title_id: claims.title().title_id.clone(),
            user_hash: user.user_hash().to_string(),
            gamertag: owned(user.gamertag()),
            pxuid: owned(user.pxuid()),
            age_group: owned(user.age_group()),
            country: owned(user.country()),
            privileges: user.privileges().to_vec(),
            other_users: claims.users().len().saturating_sub(1),
        }
    }
}

/// Echo the validated claims back to the caller
pub async fn get_claims(Extension(claims): Extension<ClientClaims>) -> Json<ClaimsSummary> {
    Json(ClaimsSummary::from(&claims))
}

/// Liveness check served without a token
pub async fn health() -> &'static str {
    "ok"
}
