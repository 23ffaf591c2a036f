use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{
        header::{LOCATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use tracing::{instrument, warn};

use crate::{
    auth::{
        cookies,
        dto::{
            json_body, query_args, ChangeEmailRequest, ChangeUsernameRequest, DeleteUserRequest,
            EmailQuery, LoginRequest, OAuthCallbackQuery, OAuthUserRequest, RawDataRequest,
            SendVerificationQuery, SignupRequest, UpdateUserRequest, UsernameQuery,
            VerificationTarget, VerifyEmailQuery,
        },
        extractors::{require_session, AuthUser},
        oauth::OAuthProviders,
        services::AuthService,
    },
    error::ApiError,
    response::{reply, SuccessResponse},
    state::AppState,
};

/// Email/password account routes. `/data/*` is session guarded.
pub fn auth_routes(state: AppState) -> Router<AppState> {
    let open = Router::new()
        .route("/auth/create-user", post(create_user))
        .route("/auth/log-in", post(log_in))
        .route("/auth/log-out", get(log_out))
        .route("/auth/send-verification-email", post(send_verification_email))
        .route("/auth/verified", get(verify_email))
        .route("/auth/check-email-availability", get(check_email))
        .route("/auth/check-username-availability", get(check_username));

    let guarded = Router::new()
        .route("/data/get-user", get(get_user))
        .route("/data/update-user-info", put(update_user_info))
        .route("/data/update-username", put(update_username))
        .route("/data/update-email", put(update_email))
        .route("/data/append-raw-data", put(append_raw_data))
        .route("/data/delete-user", delete(delete_user))
        .route_layer(middleware::from_fn_with_state(state, require_session));

    open.merge(guarded)
}

pub fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/oauth/login/:provider", get(oauth_login))
        .route("/auth/oauth/callback/:provider", get(oauth_callback))
        .route("/auth/oauth/create-oauth-user", post(create_oauth_user))
        .route("/auth/oauth/check-email-availability", get(check_oauth_email))
        .route(
            "/auth/oauth/check-username-availability",
            get(check_oauth_username),
        )
}

fn with_session_cookie(token: &str, ttl_days: i64) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    let cookie = cookies::session_cookie(token, ttl_days)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    headers.insert(SET_COOKIE, cookie);
    Ok(headers)
}

#[instrument(skip(auth, headers, payload))]
pub async fn create_user(
    State(auth): State<AuthService>,
    headers: HeaderMap,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = json_body(payload)?;
    let session = cookies::session_token(&headers);
    let outcome = auth.signup(req, session.as_deref()).await?;

    let (status, message) = if outcome.verification_sent {
        (
            StatusCode::ACCEPTED,
            "User has been created successfully and sent verification email",
        )
    } else {
        (
            StatusCode::CREATED,
            "User Has been created to the database hope you will verify the email first then everything",
        )
    };
    let body = SuccessResponse::new(message).with("userId", outcome.user_id);

    let response_headers = match outcome.session_token {
        Some(token) => with_session_cookie(&token, auth.keys().ttl_days())?,
        None => HeaderMap::new(),
    };
    Ok(body.into_response_with(status, response_headers))
}

#[instrument(skip(auth, headers, payload))]
pub async fn log_in(
    State(auth): State<AuthService>,
    headers: HeaderMap,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let session = cookies::session_token(&headers);
    // A live session answers before the body is looked at.
    if auth.session_user(session.as_deref()).await?.is_some() {
        return Ok(reply(
            StatusCode::ALREADY_REPORTED,
            SuccessResponse::new("You are already logged in"),
        ));
    }
    let req = json_body(payload)?;

    let outcome = auth.login(req).await?;
    let headers = with_session_cookie(&outcome.token, auth.keys().ttl_days())?;
    Ok(SuccessResponse::new("User has been logged in successfully")
        .with("userID", outcome.user_id)
        .into_response_with(StatusCode::ACCEPTED, headers))
}

pub async fn log_out() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookies::clear_session_cookie());
    SuccessResponse::new("User Has been logged out").into_response_with(StatusCode::OK, headers)
}

#[instrument(skip(auth, headers, query, payload))]
pub async fn send_verification_email(
    State(auth): State<AuthService>,
    headers: HeaderMap,
    query: Result<Query<SendVerificationQuery>, QueryRejection>,
    payload: Result<Json<VerificationTarget>, JsonRejection>,
) -> Result<Response, ApiError> {
    let query = query_args(query)?;

    let mut user_id = String::new();
    if query.use_session() {
        if let Some(parsed) = cookies::session_token(&headers)
            .and_then(|t| auth.keys().parse(&t).ok())
            .filter(|p| !p.expired)
        {
            user_id = parsed.user_id;
        }
    } else {
        user_id = json_body(payload)?.id;
    }
    if user_id.trim().is_empty() {
        return Err(ApiError::validation("User id is required"));
    }

    auth.send_verification_email(&user_id).await?;
    Ok(reply(
        StatusCode::ACCEPTED,
        SuccessResponse::new("Email sent successfully"),
    ))
}

#[instrument(skip(auth, query))]
pub async fn verify_email(
    State(auth): State<AuthService>,
    query: Result<Query<VerifyEmailQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let query = query_args(query)?;
    auth.verify_email(
        query.email.as_deref().unwrap_or_default(),
        query.token.as_deref().unwrap_or_default(),
    )
    .await?;
    Ok(reply(
        StatusCode::OK,
        SuccessResponse::new("Email verified successfully"),
    ))
}

pub async fn check_email(
    State(auth): State<AuthService>,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let query = query_args(query)?;
    auth.email_available(query.email.as_deref()).await?;
    Ok(reply(StatusCode::OK, SuccessResponse::new("The Email is good to go")))
}

pub async fn check_username(
    State(auth): State<AuthService>,
    query: Result<Query<UsernameQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let query = query_args(query)?;
    auth.username_available(query.username.as_deref()).await?;
    Ok(reply(
        StatusCode::OK,
        SuccessResponse::new("The username is good to go"),
    ))
}

#[instrument(skip(auth))]
pub async fn get_user(
    State(auth): State<AuthService>,
    AuthUser(user_id): AuthUser,
) -> Result<Response, ApiError> {
    let user = auth.get_user(&user_id).await?;
    let user = serde_json::to_value(user).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(reply(
        StatusCode::OK,
        SuccessResponse::new("User has been Found successfully").with("user", user),
    ))
}

#[instrument(skip(auth, payload))]
pub async fn update_user_info(
    State(auth): State<AuthService>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    auth.update_user_info(&user_id, json_body(payload)?).await?;
    Ok(reply(
        StatusCode::OK,
        SuccessResponse::new("User Has been Updated Successfully"),
    ))
}

#[instrument(skip(auth, payload))]
pub async fn update_username(
    State(auth): State<AuthService>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<ChangeUsernameRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    auth.change_username(&user_id, json_body(payload)?).await?;
    Ok(reply(
        StatusCode::ACCEPTED,
        SuccessResponse::new("Username Has been Updated"),
    ))
}

#[instrument(skip(auth, payload))]
pub async fn update_email(
    State(auth): State<AuthService>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<ChangeEmailRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    auth.change_email(&user_id, json_body(payload)?).await?;
    Ok(reply(
        StatusCode::ACCEPTED,
        SuccessResponse::new("Email Has been Updated"),
    ))
}

#[instrument(skip(auth, payload))]
pub async fn append_raw_data(
    State(auth): State<AuthService>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<RawDataRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    auth.append_raw_data(&user_id, json_body(payload)?).await?;
    Ok(reply(
        StatusCode::OK,
        SuccessResponse::new("Raw data appended successfully"),
    ))
}

#[instrument(skip(auth, payload))]
pub async fn delete_user(
    State(auth): State<AuthService>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<DeleteUserRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    auth.delete_user(&user_id, json_body(payload)?).await?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookies::clear_session_cookie());
    Ok(SuccessResponse::new("User has been deleted successfully")
        .into_response_with(StatusCode::ACCEPTED, headers))
}

#[instrument(skip(auth, headers, payload))]
pub async fn create_oauth_user(
    State(auth): State<AuthService>,
    headers: HeaderMap,
    payload: Result<Json<OAuthUserRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = json_body(payload)?;
    let session = cookies::session_token(&headers);
    let outcome = auth.create_oauth_user(req, session.as_deref()).await?;

    let body = if outcome.created {
        SuccessResponse::new("user has been created successfully")
    } else {
        SuccessResponse::new("User has been logged in successfully")
    }
    .with("userId", outcome.user_id);
    let headers = with_session_cookie(&outcome.token, auth.keys().ttl_days())?;
    Ok(body.into_response_with(StatusCode::OK, headers))
}

/// Redirects to the provider's consent page, remembering the CSRF state in
/// a cookie.
#[instrument(skip(oauth))]
pub async fn oauth_login(
    State(oauth): State<OAuthProviders>,
    Path(provider): Path<String>,
) -> Result<Response, ApiError> {
    let provider = oauth.resolve(&provider)?;
    let (url, state) = oauth.authorize_url(provider)?;

    let mut headers = HeaderMap::new();
    let cookie =
        cookies::oauth_state_cookie(&state).map_err(|e| ApiError::Internal(e.to_string()))?;
    headers.insert(SET_COOKIE, cookie);
    let location = HeaderValue::from_str(&url).map_err(|e| ApiError::Internal(e.to_string()))?;
    headers.insert(LOCATION, location);
    Ok((StatusCode::SEE_OTHER, headers).into_response())
}

/// Finishes the handshake and hands the verified profile back; the client
/// decides whether to post it to `create-oauth-user`.
#[instrument(skip(oauth, headers, query))]
pub async fn oauth_callback(
    State(oauth): State<OAuthProviders>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    query: Result<Query<OAuthCallbackQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let provider = oauth.resolve(&provider)?;
    let query = query_args(query)?;
    if let Some(reason) = query.error {
        return Err(ApiError::validation(format!(
            "{} denied the request: {reason}",
            provider.as_str()
        )));
    }

    let expected = cookies::cookie_value(&headers, cookies::OAUTH_STATE_COOKIE_NAME);
    match (expected.as_deref(), query.state.as_deref()) {
        (Some(expected), Some(got)) if expected == got => {}
        _ => {
            warn!(provider = provider.as_str(), "oauth state mismatch");
            return Err(ApiError::Unauthorized("OAuth state mismatch".into()));
        }
    }
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::validation("code is required"))?;

    let profile = oauth.complete(provider, code).await?;
    let user = serde_json::to_value(profile).map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookies::clear_oauth_state_cookie());
    Ok(SuccessResponse::new(
        "user logged in please make sure to check if its new user or not add a onboarding system to your client app",
    )
    .with("user", user)
    .into_response_with(StatusCode::OK, headers))
}

pub async fn check_oauth_email(
    State(auth): State<AuthService>,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let query = query_args(query)?;
    auth.oauth_email_available(query.email.as_deref()).await?;
    Ok(reply(StatusCode::OK, SuccessResponse::new("The Email is good to go")))
}

pub async fn check_oauth_username(
    State(auth): State<AuthService>,
    query: Result<Query<UsernameQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let query = query_args(query)?;
    auth.oauth_username_available(query.username.as_deref())
        .await?;
    Ok(reply(
        StatusCode::OK,
        SuccessResponse::new("The username is good to go"),
    ))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header::COOKIE, Request},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        app::build_app,
        state::testing::{fake_config, fake_with},
        store::CredentialStore,
    };

    fn app() -> Router {
        let (state, _, _) = fake_with(fake_config(&[
            ("OAUTH_ENABLED", "true"),
            ("BACKEND_URL", "https://api.example.com"),
            ("GITHUB_OAUTH_ENABLED", "true"),
            ("GITHUB_OAUTH_CLIENT_ID", "gh-client"),
            ("GITHUB_OAUTH_CLIENT_SECRET", "gh-secret"),
        ]));
        build_app(state)
    }

    fn json_request(method: &str, uri: &str, body: Value, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json");
        if let Some(token) = cookie {
            builder = builder.header(COOKIE, format!("jwtToken={token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = cookie {
            builder = builder.header(COOKIE, format!("jwtToken={token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let res = app.clone().oneshot(req).await.expect("router responds");
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }

    fn session_from(headers: &HeaderMap) -> String {
        let cookie = headers
            .get(SET_COOKIE)
            .expect("set-cookie present")
            .to_str()
            .unwrap();
        let value = cookie.split(';').next().unwrap();
        value.trim_start_matches("jwtToken=").to_string()
    }

    async fn signup_and_login(app: &Router) -> String {
        let (status, _, _) = call(
            app,
            json_request(
                "POST",
                "/api/auth/create-user",
                json!({"username": "a", "email": "a@x.com", "password": "password1"}),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, headers, body) = call(
            app,
            json_request(
                "POST",
                "/api/auth/log-in",
                json!({"email": "a@x.com", "password": "password1"}),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body["data"]["userID"].is_string());
        session_from(&headers)
    }

    #[tokio::test]
    async fn ping_pongs() {
        let (status, _, body) = call(&app(), get_request("/api/ping", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Pong");
    }

    #[tokio::test]
    async fn signup_then_duplicate() {
        let app = app();
        let signup = json!({"username": "a", "email": "a@x.com", "password": "password1"});

        let (status, _, body) = call(
            &app,
            json_request("POST", "/api/auth/create-user", signup.clone(), None),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["data"]["userId"].as_str().is_some_and(|id| !id.is_empty()));

        let (status, _, body) =
            call(&app, json_request("POST", "/api/auth/create-user", signup, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "User already exist with this email");
    }

    #[tokio::test]
    async fn malformed_body_keeps_error_shape() {
        let req = Request::builder()
            .method("POST")
            .uri("/api/auth/create-user")
            .header("Content-Type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _, body) = call(&app(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid Request body");
    }

    #[tokio::test]
    async fn wrong_password_is_bad_request() {
        let app = app();
        signup_and_login(&app).await;
        let (status, _, body) = call(
            &app,
            json_request(
                "POST",
                "/api/auth/log-in",
                json!({"email": "a@x.com", "password": "not-the-one"}),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Wrong Password");
    }

    #[tokio::test]
    async fn second_login_with_cookie_is_already_reported() {
        let app = app();
        let token = signup_and_login(&app).await;
        let (status, _, body) = call(
            &app,
            json_request(
                "POST",
                "/api/auth/log-in",
                json!({"email": "a@x.com", "password": "password1"}),
                Some(&token),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ALREADY_REPORTED);
        assert_eq!(body["message"], "You are already logged in");
    }

    #[tokio::test]
    async fn guarded_route_refreshes_cookie_and_hides_hash() {
        let app = app();
        let token = signup_and_login(&app).await;

        let (status, headers, body) =
            call(&app, get_request("/api/data/get-user", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        let user = &body["data"]["user"];
        assert_eq!(user["email"], "a@x.com");
        assert!(user.get("passwordHash").is_none());
        assert!(user.get("verificationToken").is_none());

        let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("jwtToken="));
        assert!(cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn missing_invalid_and_expired_sessions() {
        let (state, _, _) = fake_with(fake_config(&[]));
        let stale = state.keys.issue("someone", -1).unwrap();
        let app = build_app(state);

        let (status, _, body) = call(&app, get_request("/api/data/get-user", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "User is not authorised please log in");

        let (status, _, _) =
            call(&app, get_request("/api/data/get-user", Some("garbage"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, body) =
            call(&app, get_request("/api/data/get-user", Some(&stale))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Please Log in");
    }

    #[tokio::test]
    async fn log_out_clears_cookie() {
        let (status, headers, _) = call(&app(), get_request("/api/auth/log-out", None)).await;
        assert_eq!(status, StatusCode::OK);
        let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn update_email_then_get_user_is_unverified() {
        let app = app();
        let token = signup_and_login(&app).await;

        let (status, _, _) = call(
            &app,
            json_request(
                "PUT",
                "/api/data/update-email",
                json!({"email": "a@x.com", "newEmail": "b@x.com", "password": "password1"}),
                Some(&token),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (_, _, body) = call(&app, get_request("/api/data/get-user", Some(&token))).await;
        assert_eq!(body["data"]["user"]["email"], "b@x.com");
        assert_eq!(body["data"]["user"]["verified"], false);
    }

    #[tokio::test]
    async fn append_raw_data_grows_the_list() {
        let app = app();
        let token = signup_and_login(&app).await;

        for n in 0..2 {
            let (status, _, _) = call(
                &app,
                json_request(
                    "PUT",
                    "/api/data/append-raw-data",
                    json!({"n": n}),
                    Some(&token),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (_, _, body) = call(&app, get_request("/api/data/get-user", Some(&token))).await;
        let raw = body["data"]["user"]["rawData"].as_array().unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[1]["data"]["n"], 1);
    }

    #[tokio::test]
    async fn delete_user_clears_cookie() {
        let app = app();
        let token = signup_and_login(&app).await;

        let (status, headers, _) = call(
            &app,
            json_request(
                "DELETE",
                "/api/data/delete-user",
                json!({"email": "a@x.com", "password": "password1"}),
                Some(&token),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"));

        let (status, _, body) = call(&app, get_request("/api/data/get-user", Some(&token))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "User Not Found");
    }

    #[tokio::test]
    async fn verify_email_over_http() {
        let (state, store, _) = fake_with(fake_config(&[]));
        let app = build_app(state);
        signup_and_login(&app).await;
        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
        let token = user.verification_token.unwrap();

        let (status, _, body) = call(
            &app,
            get_request("/api/auth/verified?email=a@x.com&token=wrong", None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Wrong token Provided");

        let uri = format!("/api/auth/verified?email=a@x.com&token={token}");
        let (status, _, _) = call(&app, get_request(&uri, None)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, body) = call(&app, get_request(&uri, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "User is already verified");
    }

    #[tokio::test]
    async fn availability_endpoints() {
        let app = app();
        signup_and_login(&app).await;

        let (status, _, _) = call(
            &app,
            get_request("/api/auth/check-email-availability?email=a@x.com", None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = call(
            &app,
            get_request("/api/auth/check-username-availability?username=free", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn oauth_signup_sets_cookie() {
        let app = app();
        let (status, headers, body) = call(
            &app,
            json_request(
                "POST",
                "/api/auth/oauth/create-oauth-user",
                json!({
                    "id": "gh-1", "username": "octo", "email": "octo@x.com",
                    "verified": true, "oauthProvider": "github"
                }),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["userId"], "gh-1");
        assert!(!session_from(&headers).is_empty());
    }

    #[tokio::test]
    async fn oauth_login_redirects_with_state_cookie() {
        let (status, headers, _) =
            call(&app(), get_request("/api/auth/oauth/login/github", None)).await;
        assert_eq!(status, StatusCode::SEE_OTHER);

        let location = headers.get(LOCATION).unwrap().to_str().unwrap();
        assert!(location.starts_with("https://github.com/login/oauth/authorize?"));
        assert!(location.contains("client_id=gh-client"));

        let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        let state = cookie
            .split(';')
            .next()
            .unwrap()
            .trim_start_matches("oauthState=");
        assert!(!state.is_empty());
        assert!(location.contains(&format!("state={state}")));
    }

    #[tokio::test]
    async fn oauth_unknown_or_unconfigured_provider_is_bad_request() {
        let app = app();
        for uri in [
            "/api/auth/oauth/login/gitlab",
            "/api/auth/oauth/login/google",
            "/api/auth/oauth/callback/google?code=c&state=s",
        ] {
            let (status, _, body) = call(&app, get_request(uri, None)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(body["error"].is_string());
        }
    }

    #[tokio::test]
    async fn oauth_callback_requires_matching_state() {
        let app = app();
        let (status, _, _) = call(
            &app,
            get_request("/api/auth/oauth/callback/github?code=c&state=s", None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/api/auth/oauth/callback/github?code=c&state=forged")
            .header(COOKIE, "oauthState=expected")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "OAuth state mismatch");
    }

    #[tokio::test]
    async fn oauth_callback_reports_provider_denial() {
        let (status, _, body) = call(
            &app(),
            get_request("/api/auth/oauth/callback/github?error=access_denied", None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("access_denied"));
    }
}
