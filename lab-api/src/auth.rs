use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};

/// Identity headers, most trusted first.
const IDENTITY_HEADERS: [&str; 3] = [
    "x-lab-user",       // set by the platform's auth gateway
    "x-forwarded-user", // oauth2-proxy format
    "x-user",           // fallback for local development
];

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub username: String,
}

/// Identity middleware - extracts the caller from gateway headers
///
/// Authentication happens in front of this service; requests that reach it
/// without an identity are rejected with 401.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let username = IDENTITY_HEADERS
        .iter()
        .filter_map(|name| req.headers().get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(AuthenticatedUser { username });

    Ok(next.run(req).await)
}
