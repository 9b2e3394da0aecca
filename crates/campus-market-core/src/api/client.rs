//! API client for the marketplace backend.
//!
//! This module provides the `ApiClient` struct for account management
//! (login, registration, verification, token refresh), user profiles, and
//! for reading and managing posts with a bearer token.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::auth::TokenRefresher;
use crate::models::{
    CreatedPost, Credentials, LoginResponse, MessageResponse, ModerationStatus, MyPostsFilter,
    NewPost, Post, PostPage, PostStatus, ProfileUpdate, RefreshRequest, RefreshResponse,
    UserProfile, VerifyRequest,
};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Path of the token refresh endpoint, relative to the API base
const REFRESH_PATH: &str = "/api/auth/refresh";

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Default page size for post feeds, matching the backend default
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

/// API client for the marketplace backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new API client for `base_url` (e.g. `http://localhost:5000`)
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(), // Cheap clone, shares connection pool
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// URL built from path segments, each percent-encoded
    fn segment_url(&self, segments: &[&str]) -> Result<String> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid API base URL {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("API base URL {} cannot take a path", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.into())
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref token) = self.token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut builder = self
                .client
                .request(method.clone(), url)
                .headers(self.auth_headers()?)
                .query(query);
            if let Some(ref body) = body {
                builder = builder.json(body);
            }

            let response = builder
                .send()
                .await
                .with_context(|| format!("Failed to send {} request to {}", method, url))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let text = response
                        .text()
                        .await
                        .with_context(|| format!("Failed to read response body from {}", url))?;
                    return serde_json::from_str(&text)
                        .with_context(|| format!("Failed to parse JSON response from {}", url));
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        self.request(Method::GET, &self.url(path), query, None).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_value(body).context("Failed to encode request body")?;
        self.request(Method::POST, &self.url(path), &[], Some(body)).await
    }

    // ===== Account Methods =====

    /// Exchange email and password for a token pair
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let body = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response: LoginResponse = self.post("/login", &body).await?;
        debug!(user_id = %response.user_id, "Login accepted");
        Ok(response)
    }

    /// Create an account; the backend emails a verification code
    pub async fn register(&self, email: &str, password: &str) -> Result<MessageResponse> {
        let body = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.post("/register", &body).await
    }

    /// Confirm an account with the emailed code
    pub async fn verify(&self, email: &str, code: &str) -> Result<MessageResponse> {
        let body = VerifyRequest {
            email: email.trim().to_lowercase(),
            code: code.trim().to_string(),
        };
        self.post("/verify", &body).await
    }

    /// Revoke the current access token server-side
    pub async fn logout(&self) -> Result<MessageResponse> {
        self.request(Method::POST, &self.url("/logout"), &[], None).await
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// Unlike the other calls this keeps the typed error so callers can tell
    /// a rejection from an unreachable server.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshResponse, ApiError> {
        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    // ===== User Methods =====

    /// Create the profile of the logged-in account, or reactivate a deleted one
    pub async fn save_profile(&self, profile: &ProfileUpdate) -> Result<UserProfile> {
        self.post("/api/users", profile)
            .await
            .context("Failed to save profile")
    }

    /// Change profile fields; at least one must be set
    pub async fn update_profile(&self, profile: &ProfileUpdate) -> Result<UserProfile> {
        if profile.is_empty() {
            anyhow::bail!("No profile fields given");
        }
        let body = serde_json::to_value(profile).context("Failed to encode request body")?;
        self.request(Method::PATCH, &self.url("/api/users"), &[], Some(body))
            .await
            .context("Failed to update profile")
    }

    /// Profile of the logged-in account
    pub async fn me(&self) -> Result<UserProfile> {
        self.get("/api/users/me", &[])
            .await
            .context("Failed to fetch your profile")
    }

    /// Look up another user, e.g. a post owner
    pub async fn get_user(&self, email: &str) -> Result<UserProfile> {
        let url = self.segment_url(&["api", "users", email.trim()])?;
        self.request(Method::GET, &url, &[], None)
            .await
            .with_context(|| format!("Failed to fetch user {}", email))
    }

    // ===== Post Methods =====

    /// Published posts, newest first
    pub async fn list_posts(&self, page: u32, limit: u32) -> Result<PostPage> {
        let query = [("page", page.to_string()), ("limit", limit.to_string())];
        self.get("/api/posts", &query)
            .await
            .context("Failed to fetch posts")
    }

    /// The current user's posts, excluding deleted ones
    pub async fn my_posts(&self, filter: &MyPostsFilter) -> Result<PostPage> {
        self.get("/api/myposts", &filter.query_pairs())
            .await
            .context("Failed to fetch your posts")
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Post> {
        let url = self.segment_url(&["api", "posts", post_id])?;
        self.request(Method::GET, &url, &[], None)
            .await
            .with_context(|| format!("Failed to fetch post {}", post_id))
    }

    /// Submit a post. It starts in `PROCESSING` until moderation finishes.
    pub async fn create_post(&self, post: &NewPost) -> Result<CreatedPost> {
        self.post("/api/posts", post)
            .await
            .context("Failed to create post")
    }

    /// Publish or close one of the user's posts
    pub async fn update_post_status(
        &self,
        post_id: &str,
        status: PostStatus,
    ) -> Result<MessageResponse> {
        if !status.is_owner_settable() {
            anyhow::bail!("Posts can only be set to PUBLISHED or CLOSED, not {}", status.as_str());
        }
        let body = json!({ "status": status.as_str() });
        let url = self.segment_url(&["api", "posts", post_id])?;
        self.request(Method::PATCH, &url, &[], Some(body))
            .await
            .with_context(|| format!("Failed to update post {}", post_id))
    }

    pub async fn delete_post(&self, post_id: &str) -> Result<MessageResponse> {
        let url = self.segment_url(&["api", "posts", post_id])?;
        self.request(Method::DELETE, &url, &[], None)
            .await
            .with_context(|| format!("Failed to delete post {}", post_id))
    }

    /// Moderation details of one of the user's posts, e.g. why it `FAILED`
    pub async fn moderation_status(&self, post_id: &str) -> Result<ModerationStatus> {
        let url = self.segment_url(&["api", "posts", post_id, "moderation-status"])?;
        self.request(Method::GET, &url, &[], None)
            .await
            .with_context(|| format!("Failed to fetch moderation status of post {}", post_id))
    }
}

#[async_trait]
impl TokenRefresher for ApiClient {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        self.refresh_access_token(refresh_token).await
    }
}
