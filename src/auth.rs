//! Identity and session provider.
//!
//! Accounts are provisioned by the superadmin: each credential pairs
//! an email + system role with a one-time-style 6-digit OTP (stored
//! as an argon2 hash). Login is two-step — the client first checks
//! that an account exists for (email, role), then verifies the OTP
//! and receives a JWT for the session.
//!
//! The workflow engine never sees any of this; it only receives an
//! already-resolved Actor.

use crate::config::Config;
use crate::persist::SaveFile;
use crate::world::{Actor, Role, World};
use argon2::{
    password_hash::{rand_core::OsRng, rand_core::RngCore, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const JWT_EXPIRY_HOURS: i64 = 24;

// ── Credentials ────────────────────────────────────────────────

/// One login record. `user_id` is the display id handed to the
/// person at account creation ("STF-SAMR-4F2A"); the OTP is never
/// stored in the clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub otp_hash: String,
    pub role: Role,
}

/// In-memory credential directory. Loaded from the save file on
/// boot; the same email may hold credentials under different roles.
pub struct Directory {
    pub credentials: Vec<Credential>,
}

impl Directory {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Directory { credentials }
    }

    /// Lookup by (email, role) — the pair checked before an OTP is
    /// ever prompted for. Email matching is case-insensitive.
    pub fn find(&self, email: &str, role: Role) -> Option<&Credential> {
        self.credentials
            .iter()
            .find(|c| c.email.eq_ignore_ascii_case(email) && c.role == role)
    }

    /// Full login check: (email, otp, role) triple.
    pub fn verify(&self, email: &str, otp: &str, role: Role) -> Option<&Credential> {
        self.find(email, role)
            .filter(|c| verify_otp(otp, &c.otp_hash))
    }

    pub fn has_superadmin(&self) -> bool {
        self.credentials.iter().any(|c| c.role == Role::Superadmin)
    }
}

// ── OTP / display id generation ────────────────────────────────

pub fn generate_otp() -> String {
    // 6 digits, no leading zero.
    let n = 100_000 + OsRng.next_u32() % 900_000;
    n.to_string()
}

pub fn hash_otp(otp: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(otp.as_bytes(), &salt)
        .map(|h| h.to_string())
        .unwrap_or_default()
}

pub fn verify_otp(otp: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(otp.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Display id shown once at account creation:
/// role prefix + first letters of the email + random suffix,
/// e.g. "STF-SAMR-4F2A".
pub fn generate_user_id(email: &str, role: Role) -> String {
    let prefix = match role {
        Role::Staff => "STF",
        Role::Admin => "ADM",
        Role::Superadmin => "SPA",
    };
    let email_part: String = email
        .split('@')
        .next()
        .unwrap_or("user")
        .chars()
        .take(4)
        .collect::<String>()
        .to_uppercase();
    let suffix = OsRng.next_u32() & 0xFFFF;
    format!("{prefix}-{email_part}-{suffix:04X}")
}

// ── JWT ────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // display user id
    pub name: String,
    pub email: String,
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
}

pub fn create_token(
    credential: &Credential,
    secret: &[u8],
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expiry = now + Duration::hours(JWT_EXPIRY_HOURS);

    let claims = Claims {
        sub: credential.user_id.clone(),
        name: credential.name.clone(),
        email: credential.email.clone(),
        role: credential.role,
        exp: expiry.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

pub fn verify_token(token: &str, secret: &[u8]) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

// ── Shared state ───────────────────────────────────────────────

pub struct AppState {
    pub world: std::sync::RwLock<World>,
    pub directory: std::sync::RwLock<Directory>,
    pub save_file: SaveFile,
    pub events_tx: tokio::sync::broadcast::Sender<String>,
    pub config: Config,
}

pub type SharedState = Arc<AppState>;

// ── Request/response types ─────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RequestOtpRequest {
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct RequestOtpResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub otp: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl From<&Credential> for UserResponse {
    fn from(c: &Credential) -> Self {
        UserResponse {
            user_id: c.user_id.clone(),
            name: c.name.clone(),
            email: c.email.clone(),
            role: c.role,
        }
    }
}

// ── Handlers ───────────────────────────────────────────────────

/// Step 1 of login: confirm an account exists for (email, role)
/// before the client prompts for the OTP.
pub async fn request_otp(
    State(state): State<SharedState>,
    Json(payload): Json<RequestOtpRequest>,
) -> Result<Json<RequestOtpResponse>, (StatusCode, String)> {
    let directory = state.directory.read().unwrap();

    if directory.find(&payload.email, payload.role).is_none() {
        tracing::debug!(email = %payload.email, "otp requested for unknown account");
        return Err((
            StatusCode::UNAUTHORIZED,
            format!(
                "No account found with email {} and that role. Contact your administrator.",
                payload.email
            ),
        ));
    }

    Ok(Json(RequestOtpResponse {
        message: "Enter the OTP provided when your account was created".to_string(),
    }))
}

/// Step 2 of login: verify the (email, otp, role) triple and issue
/// a session token.
pub async fn login(
    State(state): State<SharedState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, String)> {
    let directory = state.directory.read().unwrap();

    let credential = directory
        .verify(&payload.email, &payload.otp, payload.role)
        .ok_or_else(|| {
            tracing::debug!(email = %payload.email, "invalid login attempt");
            (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string())
        })?;

    let token = create_token(credential, state.config.jwt_secret.as_bytes())
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    tracing::info!(user = %credential.name, role = ?credential.role, "logged in");

    Ok(Json(LoginResponse {
        token,
        user: credential.into(),
    }))
}

/// Sessions are stateless JWTs; logout is client-side.
pub async fn logout() -> impl IntoResponse {
    StatusCode::OK
}

// ── Middleware ─────────────────────────────────────────────────

/// Resolve the bearer token into an Actor and stash it as a request
/// extension for the handlers. The credential must still exist in
/// the directory — a token alone does not outlive its account.
pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let token = match auth_header {
        Some(h) if h.starts_with("Bearer ") => &h[7..],
        _ => {
            return Err((
                StatusCode::UNAUTHORIZED,
                "Missing or invalid token".to_string(),
            ))
        }
    };

    let claims = verify_token(token, state.config.jwt_secret.as_bytes())
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid token".to_string()))?;

    {
        let directory = state.directory.read().unwrap();
        directory
            .find(&claims.email, claims.role)
            .ok_or((StatusCode::UNAUTHORIZED, "Account not found".to_string()))?;
    }

    let actor = Actor {
        user_id: claims.sub,
        name: claims.name,
        email: claims.email,
        role: claims.role,
    };
    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}

// ── Tests ──────────────────────────────────────────────────────
