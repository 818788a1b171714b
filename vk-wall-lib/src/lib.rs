//! Library for fetching popular posts from a VK wall
//!
//! This library handles:
//! - Validating `wall.get` request parameters
//! - Issuing the request against the VK API
//! - Decoding the returned items
//! - Filtering out reposts and posts below the like/repost thresholds

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

const PUBLIC_API: &str = "https://api.vk.com/method";
const WALL_GET: &str = "wall.get";

/// Environment variable that overrides the API base URL in [`WallClient::from_env`].
pub const API_BASE_ENV: &str = "VK_API_BASE";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WallError {
    #[error("{0} is a required parameter")]
    MissingParameter(&'static str),
    #[error("invalid value {value:?} for parameter {name}")]
    InvalidParameter { name: &'static str, value: String },
    #[error("HTTP error occurred: {0}")]
    Transport(reqwest::Error),
    #[error("failed to decode wall.get response: {0}")]
    Decode(reqwest::Error),
    #[error("VK API error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("the request returned nothing")]
    EmptyResult,
}

impl WallError {
    /// True when the request was rejected before reaching the network.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WallError::MissingParameter(_) | WallError::InvalidParameter { .. }
        )
    }

    /// HTTP status of a failed response, if the server answered at all.
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            WallError::Transport(err) | WallError::Decode(err) => err.status(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for WallError {
    fn from(err: reqwest::Error) -> Self {
        // The request URL carries the access token.
        let err = err.without_url();
        if err.is_decode() {
            WallError::Decode(err)
        } else {
            WallError::Transport(err)
        }
    }
}

// ============================================================================
// Request Parameters
// ============================================================================

/// Parameters of a `wall.get` call.
///
/// `access_token`, `owner_id` and `version` are required. Community walls use
/// negative owner IDs. See <https://vk.com/dev/wall.get> for the rest.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct WallParams {
    pub access_token: String,
    pub owner_id: i64,
    /// API version, sent as `v`.
    pub version: String,
    pub filter: Option<String>,
    pub offset: Option<u32>,
    pub count: Option<u32>,
    /// Forwarded to the API as-is.
    pub extra: BTreeMap<String, String>,
}

impl WallParams {
    pub fn new(access_token: impl Into<String>, owner_id: i64, version: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            owner_id,
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Build parameters from raw key/value pairs, using the API's key names.
    ///
    /// Keys other than `access_token`, `owner_id`, `v`, `filter`, `offset`
    /// and `count` end up in [`WallParams::extra`].
    ///
    /// # Example
    /// ```
    /// use vk_wall_lib::WallParams;
    /// let params = WallParams::from_pairs([
    ///     ("access_token", "token"),
    ///     ("owner_id", "-1"),
    ///     ("v", "5.103"),
    ///     ("count", "10"),
    /// ])
    /// .unwrap();
    /// assert_eq!(params.owner_id, -1);
    /// assert_eq!(params.count, Some(10));
    /// ```
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, WallError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut access_token = None;
        let mut owner_id = None;
        let mut version = None;
        let mut params = Self::default();

        for (key, value) in pairs {
            let value = value.into();
            match key.as_ref() {
                "access_token" => access_token = Some(value),
                "owner_id" if value.is_empty() => {}
                "owner_id" => owner_id = Some(parse_param("owner_id", &value)?),
                "v" => version = Some(value),
                "filter" => params.filter = Some(value),
                "offset" => params.offset = Some(parse_param("offset", &value)?),
                "count" => params.count = Some(parse_param("count", &value)?),
                other => {
                    params.extra.insert(other.to_string(), value);
                }
            }
        }

        params.access_token = access_token.ok_or(WallError::MissingParameter("access_token"))?;
        params.owner_id = owner_id.ok_or(WallError::MissingParameter("owner_id"))?;
        params.version = version.ok_or(WallError::MissingParameter("v"))?;
        params.validate()?;

        Ok(params)
    }

    /// Check that the required parameters are present and non-empty.
    pub fn validate(&self) -> Result<(), WallError> {
        if self.access_token.is_empty() {
            return Err(WallError::MissingParameter("access_token"));
        }
        if self.owner_id == 0 {
            return Err(WallError::MissingParameter("owner_id"));
        }
        if self.version.is_empty() {
            return Err(WallError::MissingParameter("v"));
        }
        Ok(())
    }

    /// Query parameters in the order they are sent.
    pub fn query_pairs(&self) -> Vec<(&str, String)> {
        let mut pairs = vec![
            ("access_token", self.access_token.clone()),
            ("owner_id", self.owner_id.to_string()),
            ("v", self.version.clone()),
        ];
        if let Some(filter) = &self.filter {
            pairs.push(("filter", filter.clone()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset", offset.to_string()));
        }
        if let Some(count) = self.count {
            pairs.push(("count", count.to_string()));
        }
        for (key, value) in &self.extra {
            pairs.push((key.as_str(), value.clone()));
        }
        pairs
    }

    pub fn query_string(&self) -> String {
        self.query_pairs()
            .iter()
            .map(|(key, value)| {
                format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl fmt::Debug for WallParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WallParams")
            .field("access_token", &"<redacted>")
            .field("owner_id", &self.owner_id)
            .field("version", &self.version)
            .field("filter", &self.filter)
            .field("offset", &self.offset)
            .field("count", &self.count)
            .field("extra", &self.extra)
            .finish()
    }
}

fn parse_param<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, WallError> {
    value.parse().map_err(|_| WallError::InvalidParameter {
        name,
        value: value.to_string(),
    })
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct WallGetEnvelope {
    response: Option<WallGetResponse>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct WallGetResponse {
    items: Option<Vec<RawItem>>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

/// A `{"count": n}` object such as `likes`, `reposts` or `views`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Counter {
    #[serde(default)]
    pub count: u64,
}

/// One post as returned by `wall.get`, before filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawItem {
    pub id: Option<i64>,
    pub date: Option<i64>,
    pub text: Option<String>,
    pub likes: Option<Counter>,
    pub reposts: Option<Counter>,
    pub views: Option<Counter>,
    /// Set when the item carries a `copy_history` key, i.e. it is a repost.
    #[serde(rename = "copy_history", default, deserialize_with = "key_present")]
    pub has_copy_history: bool,
}

fn key_present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    serde::de::IgnoredAny::deserialize(deserializer).map(|_| true)
}

impl RawItem {
    fn original_text(&self) -> Option<&str> {
        if self.has_copy_history {
            return None;
        }
        self.text.as_deref().filter(|text| !text.is_empty())
    }

    fn likes_above(&self, min_likes: i64) -> Option<u64> {
        self.likes.map(|c| c.count).filter(|&count| exceeds(count, min_likes))
    }

    fn project(&self, thresholds: Thresholds) -> Option<WallPost> {
        let text = self.original_text()?;
        let likes_count = self.likes_above(thresholds.min_likes)?;
        let reposts_count = self
            .reposts
            .map(|c| c.count)
            .filter(|&count| exceeds(count, thresholds.min_reposts))?;

        Some(WallPost {
            id: self.id?,
            date: self.date,
            text: text.to_string(),
            likes_count,
            reposts_count,
            views_count: self.views.map(|c| c.count),
        })
    }
}

// ============================================================================
// Output Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallPost {
    pub id: i64,
    /// Unix timestamp, seconds.
    pub date: Option<i64>,
    pub text: String,
    pub likes_count: u64,
    pub reposts_count: u64,
    pub views_count: Option<u64>,
}

/// Engagement a post must strictly exceed to be kept.
///
/// Negative values admit posts with zero likes or reposts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Thresholds {
    pub min_likes: i64,
    pub min_reposts: i64,
}

impl Thresholds {
    pub fn new(min_likes: i64, min_reposts: i64) -> Self {
        Self {
            min_likes,
            min_reposts,
        }
    }

    pub fn admits(&self, post: &WallPost) -> bool {
        !post.text.is_empty()
            && exceeds(post.likes_count, self.min_likes)
            && exceeds(post.reposts_count, self.min_reposts)
    }

    /// Re-apply the thresholds to already projected posts, keeping their order.
    pub fn retain(&self, mut posts: Vec<WallPost>) -> Vec<WallPost> {
        posts.retain(|post| self.admits(post));
        posts
    }
}

// ============================================================================
// Filtering
// ============================================================================

fn exceeds(count: u64, min: i64) -> bool {
    i128::from(count) > i128::from(min)
}

/// Keep original posts with text whose likes and reposts exceed `thresholds`.
pub fn select_posts(items: &[RawItem], thresholds: Thresholds) -> Vec<WallPost> {
    items
        .iter()
        .filter_map(|item| item.project(thresholds))
        .collect()
}

/// Like [`select_posts`], but only checks likes and returns the bare texts.
pub fn select_texts(items: &[RawItem], min_likes: i64) -> Vec<String> {
    items
        .iter()
        .filter(|item| item.likes_above(min_likes).is_some())
        .filter_map(|item| item.original_text().map(str::to_string))
        .collect()
}

// ============================================================================
// VK API Client
// ============================================================================

#[derive(Debug, Clone)]
pub struct WallClient {
    client: reqwest::Client,
    base_url: String,
}

impl Default for WallClient {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClient {
    pub fn new() -> Self {
        Self::with_base_url(PUBLIC_API)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// Use `VK_API_BASE` as the base URL when it is set.
    pub fn from_env() -> Self {
        match std::env::var(API_BASE_ENV) {
            Ok(base) if !base.is_empty() => Self::with_base_url(base),
            _ => Self::new(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_wall(&self, params: &WallParams) -> Result<WallGetEnvelope, WallError> {
        let url = format!("{}/{}?{}", self.base_url, WALL_GET, params.query_string());

        let envelope = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(envelope)
    }

    /// Fetch one page of raw wall items.
    ///
    /// Fails with [`WallError::EmptyResult`] when the API returns no items.
    pub async fn fetch_items(&self, params: &WallParams) -> Result<Vec<RawItem>, WallError> {
        if let Err(err) = params.validate() {
            warn!("Rejected {} request: {}", WALL_GET, err);
            return Err(err);
        }

        debug!(owner_id = params.owner_id, "Requesting {}", WALL_GET);

        let envelope = self
            .get_wall(params)
            .await
            .inspect_err(|err| warn!(owner_id = params.owner_id, "{}", err))?;

        if let Some(error) = envelope.error {
            warn!(
                owner_id = params.owner_id,
                code = error.error_code,
                "{} rejected: {}",
                WALL_GET,
                error.error_msg
            );
            return Err(WallError::Api {
                code: error.error_code,
                message: error.error_msg,
            });
        }

        let items = envelope
            .response
            .and_then(|response| response.items)
            .unwrap_or_default();

        if items.is_empty() {
            debug!(owner_id = params.owner_id, "{} returned no items", WALL_GET);
            return Err(WallError::EmptyResult);
        }

        debug!(owner_id = params.owner_id, "Fetched {} items", items.len());
        Ok(items)
    }

    /// Fetch a wall page and keep the posts that pass `thresholds`.
    ///
    /// An empty vector means the wall had posts but none qualified; a wall
    /// with no posts at all is [`WallError::EmptyResult`].
    pub async fn fetch_posts(
        &self,
        params: &WallParams,
        thresholds: Thresholds,
    ) -> Result<Vec<WallPost>, WallError> {
        let items = self.fetch_items(params).await?;
        let posts = select_posts(&items, thresholds);
        debug!("Kept {} of {} posts", posts.len(), items.len());
        Ok(posts)
    }

    /// Fetch a wall page and return the texts of posts with more than `min_likes` likes.
    pub async fn fetch_texts(
        &self,
        params: &WallParams,
        min_likes: i64,
    ) -> Result<Vec<String>, WallError> {
        let items = self.fetch_items(params).await?;
        Ok(select_texts(&items, min_likes))
    }
}

// ============================================================================
// High-Level API
// ============================================================================

/// Fetch posts from a VK wall that exceed the like and repost thresholds.
///
/// # Arguments
/// * `params` - `wall.get` parameters; access token, owner ID and version are required
/// * `thresholds` - minimum likes and reposts, both exclusive
///
/// # Returns
/// The qualifying posts in the order the API returned them.
pub async fn fetch_wall(
    params: &WallParams,
    thresholds: Thresholds,
) -> Result<Vec<WallPost>, WallError> {
    WallClient::new().fetch_posts(params, thresholds).await
}

/// Fetch the texts of posts on a VK wall with more than `min_likes` likes.
pub async fn fetch_wall_texts(params: &WallParams, min_likes: i64) -> Result<Vec<String>, WallError> {
    WallClient::new().fetch_texts(params, min_likes).await
}
