use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
};
use platform_api::{ApiError, ApiResult};
use platform_db::users as user_store;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{http::AppState, session::Session};

#[derive(Debug, Default, Deserialize)]
struct Credentials {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

impl Credentials {
    fn parse(content_type: Option<&str>, body: &[u8]) -> Self {
        let is_form = content_type
            .map(|ct| ct.to_ascii_lowercase().starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        if !is_form {
            return serde_json::from_slice(body).unwrap_or_default();
        }
        let mut creds = Self::default();
        for (key, value) in url::form_urlencoded::parse(body).into_owned() {
            match key.as_str() {
                "username" => creds.username = Some(value),
                "email" => creds.email = Some(value),
                "password" => creds.password = Some(value),
                _ => {}
            }
        }
        creds
    }

    fn login(&self) -> Option<&str> {
        [&self.username, &self.email]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|value| !value.is_empty())
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub username: String,
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

fn verify_password(password: &str, stored: &str) -> bool {
    PasswordHash::new(stored)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

pub async fn login_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<LoginResponse>> {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let creds = Credentials::parse(content_type, &body);
    let (Some(login), Some(password)) = (creds.login(), creds.password.as_deref()) else {
        return Err(ApiError::Unauthorized);
    };

    let user = user_store::find_user_by_login(&state.pool, login)
        .await?
        .filter(|user| user.is_active)
        .ok_or(ApiError::Unauthorized)?;
    if !verify_password(password, &user.password_hash) {
        return Err(ApiError::Unauthorized);
    }

    session.login(&user);
    info!(user_id = %user.id, "user signed in");
    Ok(Json(LoginResponse {
        username: user.username,
    }))
}

pub async fn logout_handler(Extension(session): Extension<Session>) -> StatusCode {
    session.logout();
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_and_form_credentials() {
        let json = Credentials::parse(
            Some("application/json"),
            br#"{"email":"a@example.com","password":"pw"}"#,
        );
        assert_eq!(json.login(), Some("a@example.com"));
        assert_eq!(json.password.as_deref(), Some("pw"));

        let form = Credentials::parse(
            Some("application/x-www-form-urlencoded"),
            b"username=bob&password=s%20cret",
        );
        assert_eq!(form.login(), Some("bob"));
        assert_eq!(form.password.as_deref(), Some("s cret"));

        let garbage = Credentials::parse(Some("application/json"), b"{oops");
        assert_eq!(garbage.login(), None);
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2").expect("hash");
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not-a-phc-string"));
    }
}
