use axum::{
    Extension, Json, Router,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Serialize;
use std::path::{Component, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::jwt::SessionSigner;
use crate::palette::{ColorPalette, PaletteCache};
use crate::session::{GoogleAuthRequest, IdentityProvider};
use crate::users::{NewGoogleUser, User, UserDirectory};

#[derive(Clone)]
pub struct AppState {
    pub users: UserDirectory,
    pub signer: SessionSigner,
    pub identity: Arc<dyn IdentityProvider>,
    pub palettes: PaletteCache,
    pub thumbnails_dir: PathBuf,
}

/// The user resolved by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/auth/profile", get(get_profile))
        .route("/api/songs/thumbnails/:filename", get(get_thumbnail))
        .route(
            "/api/songs/thumbnails/:filename/colors",
            get(get_colors).delete(delete_colors),
        )
        .route("/api/colors", delete(clear_colors))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/", get(root))
        .route("/api/auth/google", post(authenticate))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "Zumi API v0.1.0"
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Uploaded files are addressed by bare file name only
fn is_safe_filename(name: &str) -> bool {
    if name.contains('/') || name.contains('\\') {
        return false;
    }
    let mut components = std::path::Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Bearer-token guard for the protected routes
async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let Some(token) = token else {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "Please authenticate - No token provided",
        );
    };

    let Some(claims) = state.signer.verify(&token) else {
        return error_response(StatusCode::UNAUTHORIZED, "Please authenticate - Invalid token");
    };

    let user = match state.users.find_by_id(&claims.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::warn!("Token for unknown user: {}", claims.user_id);
            return error_response(
                StatusCode::UNAUTHORIZED,
                "Please authenticate - User not found",
            );
        }
        Err(e) => {
            tracing::error!("Auth middleware error: {:#}", e);
            return error_response(StatusCode::UNAUTHORIZED, "Please authenticate - Server error");
        }
    };

    request.extensions_mut().insert(AuthenticatedUser(user));
    next.run(request).await
}

/// Exchange a Google access token for a session token
async fn authenticate(
    State(state): State<AppState>,
    payload: Result<Json<GoogleAuthRequest>, JsonRejection>,
) -> Response {
    let google_token = match payload {
        Ok(Json(request)) if !request.google_token.is_empty() => request.google_token,
        Ok(_) => {
            tracing::warn!("Google auth request with empty token");
            return error_response(StatusCode::UNAUTHORIZED, "Authentication failed");
        }
        Err(rejection) => {
            tracing::warn!("Malformed Google auth request: {}", rejection.body_text());
            return error_response(StatusCode::UNAUTHORIZED, "Authentication failed");
        }
    };

    let profile = match state.identity.fetch_user_info(&google_token).await {
        Ok(profile) => profile,
        Err(e) => {
            tracing::warn!("Failed to get user info from Google: {}", e);
            return error_response(StatusCode::UNAUTHORIZED, "Authentication failed");
        }
    };

    let user = match state.users.find_by_google_id(&profile.id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            let new_user = NewGoogleUser {
                google_id: profile.id,
                email: profile.email,
                name: profile.name,
                picture: profile.picture,
            };
            match state.users.create_with_google(new_user).await {
                Ok(user) => user,
                Err(e) => {
                    tracing::error!("Error creating user: {:#}", e);
                    return error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Failed to create user",
                    );
                }
            }
        }
        Err(e) => {
            tracing::error!("Auth error: {:#}", e);
            return error_response(StatusCode::UNAUTHORIZED, "Authentication failed");
        }
    };

    match state.signer.issue(&user.id) {
        Ok(token) => {
            tracing::debug!("Issued session token for user {}", user.id);
            Json(AuthResponse { user, token }).into_response()
        }
        Err(e) => {
            tracing::error!("Auth error: {:#}", e);
            error_response(StatusCode::UNAUTHORIZED, "Authentication failed")
        }
    }
}

/// Profile of the authenticated user
async fn get_profile(Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>) -> Response {
    Json(serde_json::json!({ "data": user })).into_response()
}

/// Serve a thumbnail image
async fn get_thumbnail(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, StatusCode> {
    if !is_safe_filename(&filename) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let path = state.thumbnails_dir.join(&filename);
    let image_data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("Thumbnail not found: {}", filename);
            return Err(StatusCode::NOT_FOUND);
        }
        Err(e) => {
            tracing::error!("Error serving thumbnail {}: {}", filename, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let mime_type = sniff_image_mime(&image_data);
    tracing::debug!("Serving thumbnail {} ({} bytes, {})", filename, image_data.len(), mime_type);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime_type),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        image_data,
    )
        .into_response())
}

fn sniff_image_mime(data: &[u8]) -> &'static str {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        "image/png"
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        "image/webp"
    } else if data.starts_with(b"GIF8") {
        "image/gif"
    } else {
        "application/octet-stream"
    }
}

/// Palette for a thumbnail. Never fails: unreadable images get the default palette.
async fn get_colors(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<ColorPalette>, StatusCode> {
    if !is_safe_filename(&filename) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let path = state.thumbnails_dir.join(&filename);
    Ok(Json(state.palettes.extract_colors(&path, &filename).await))
}

/// Evict one cached palette
async fn delete_colors(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> StatusCode {
    if !is_safe_filename(&filename) {
        return StatusCode::BAD_REQUEST;
    }

    let removed = state.palettes.remove(&filename).await;
    tracing::debug!("Evicted palette for {} (cached: {})", filename, removed);
    StatusCode::NO_CONTENT
}

/// Drop every cached palette
async fn clear_colors(State(state): State<AppState>) -> StatusCode {
    state.palettes.clear().await;
    StatusCode::NO_CONTENT
}
