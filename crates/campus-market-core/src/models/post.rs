use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostStatus {
    Processing,
    Published,
    Failed,
    Closed,
    Deleted,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Processing => "PROCESSING",
            PostStatus::Published => "PUBLISHED",
            PostStatus::Failed => "FAILED",
            PostStatus::Closed => "CLOSED",
            PostStatus::Deleted => "DELETED",
        }
    }

    /// Owners may only move a post between these two states
    pub fn is_owner_settable(&self) -> bool {
        matches!(self, PostStatus::Published | PostStatus::Closed)
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostStatus::Processing => write!(f, "Under review"),
            PostStatus::Published => write!(f, "Published"),
            PostStatus::Failed => write!(f, "Rejected"),
            PostStatus::Closed => write!(f, "Closed"),
            PostStatus::Deleted => write!(f, "Deleted"),
        }
    }
}

impl std::str::FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PROCESSING" => Ok(PostStatus::Processing),
            "PUBLISHED" => Ok(PostStatus::Published),
            "FAILED" => Ok(PostStatus::Failed),
            "CLOSED" => Ok(PostStatus::Closed),
            "DELETED" => Ok(PostStatus::Deleted),
            other => Err(format!("unknown post status: {}", other)),
        }
    }
}

/// Category discriminant, used for filtering without a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostCategory {
    Sell,
    Roommate,
    Carpool,
}

impl PostCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostCategory::Sell => "SELL",
            PostCategory::Roommate => "ROOMMATE",
            PostCategory::Carpool => "CARPOOL",
        }
    }
}

impl std::str::FromStr for PostCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SELL" => Ok(PostCategory::Sell),
            "ROOMMATE" => Ok(PostCategory::Roommate),
            "CARPOOL" => Ok(PostCategory::Carpool),
            other => Err(format!("unknown category: {}", other)),
        }
    }
}

fn default_sub_category() -> String {
    "OTHER".to_string()
}

fn default_gender_preference() -> String {
    "ANY".to_string()
}

fn default_seats() -> u32 {
    1
}

/// Category-specific fields, tagged by the `category` key on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostDetails {
    Sell {
        price: f64,
        item: String,
        #[serde(default = "default_sub_category")]
        sub_category: String,
    },
    Roommate {
        community: String,
        rent: f64,
        start_date: String,
        #[serde(default = "default_gender_preference")]
        gender_preference: String,
        #[serde(default)]
        preferences: Vec<String>,
    },
    Carpool {
        from_location: String,
        to_location: String,
        departure_time: String,
        #[serde(default = "default_seats")]
        seats_available: u32,
    },
}

impl PostDetails {
    pub fn category(&self) -> PostCategory {
        match self {
            PostDetails::Sell { .. } => PostCategory::Sell,
            PostDetails::Roommate { .. } => PostCategory::Roommate,
            PostDetails::Carpool { .. } => PostCategory::Carpool,
        }
    }

    /// One-line description of the category payload
    pub fn summary(&self) -> String {
        match self {
            PostDetails::Sell {
                price,
                item,
                sub_category,
            } => format!("{} for ${:.2} ({})", item, price, sub_category.to_lowercase()),
            PostDetails::Roommate {
                community,
                rent,
                start_date,
                ..
            } => format!(
                "{} at ${:.0}/mo from {}",
                community,
                rent,
                format_date(start_date)
            ),
            PostDetails::Carpool {
                from_location,
                to_location,
                departure_time,
                seats_available,
            } => {
                let seats = if *seats_available == 1 { "seat" } else { "seats" };
                format!(
                    "{} -> {} on {}, {} {} left",
                    from_location,
                    to_location,
                    format_date(departure_time),
                    seats_available,
                    seats
                )
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostImage {
    pub image_id: String,
    #[serde(default)]
    pub filename: Option<String>,
    /// Size name (e.g. "thumbnail") to server-relative URL
    #[serde(default)]
    pub urls: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub title: String,
    pub description: String,
    pub status: PostStatus,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub images: Vec<PostImage>,
    #[serde(flatten)]
    pub details: PostDetails,
}

impl Post {
    pub fn category(&self) -> PostCategory {
        self.details.category()
    }

    pub fn formatted_created_at(&self) -> String {
        match &self.created_at {
            Some(date) => format_date(date),
            None => "unknown".to_string(),
        }
    }
}

/// Format a backend date for display.
///
/// Reads come back in HTTP date format (`Mon, 01 Jan 2024 00:00:00 GMT`),
/// while values the client wrote may still be ISO 8601.
fn format_date(raw: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return dt.format("%b %d, %Y %H:%M").to_string();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format("%b %d, %Y %H:%M").to_string();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return dt.format("%b %d, %Y %H:%M").to_string();
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return d.format("%b %d, %Y").to_string();
    }
    raw.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

impl PostPage {
    pub fn total_pages(&self) -> u64 {
        if self.limit == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.limit))
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.page) < self.total_pages()
    }
}

/// Body for `POST /api/posts`. Images are base64-encoded payloads.
#[derive(Debug, Clone, Serialize)]
pub struct NewPost {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(flatten)]
    pub details: PostDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedPost {
    pub post_id: String,
    pub status: PostStatus,
    #[serde(default)]
    pub message: String,
}

/// Owner-only moderation details for one post
#[derive(Debug, Clone, Deserialize)]
pub struct ModerationStatus {
    pub post_id: String,
    pub status: PostStatus,
    #[serde(default)]
    pub created_at: Option<String>,
    /// Why moderation flagged the post, empty when it passed
    #[serde(default)]
    pub moderation_reason: String,
    #[serde(default)]
    pub moderation_passed_at: Option<String>,
    #[serde(default)]
    pub moderation_completed_at: Option<String>,
    #[serde(default)]
    pub failed_at: Option<String>,
    /// Set when the moderation pipeline itself errored
    #[serde(default)]
    pub moderation_error: String,
    /// Raw classifier output, when the backend kept it
    #[serde(default)]
    pub moderation_analysis: Option<serde_json::Value>,
}

impl ModerationStatus {
    /// One-line explanation of the current state
    pub fn explanation(&self) -> String {
        match self.status {
            PostStatus::Failed if !self.moderation_reason.is_empty() => {
                format!("Rejected: {}", self.moderation_reason)
            }
            PostStatus::Failed if !self.moderation_error.is_empty() => {
                format!("Moderation error: {}", self.moderation_error)
            }
            PostStatus::Failed => "Rejected by moderation".to_string(),
            PostStatus::Processing => "Still under moderation".to_string(),
            _ => "Passed moderation".to_string(),
        }
    }
}

/// Query filters for the owner's post list
#[derive(Debug, Clone, Default)]
pub struct MyPostsFilter {
    pub status: Option<PostStatus>,
    pub category: Option<PostCategory>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl MyPostsFilter {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        if let Some(category) = self.category {
            pairs.push(("category", category.as_str().to_string()));
        }
        if let Some(ref search) = self.search {
            if !search.trim().is_empty() {
                pairs.push(("search", search.trim().to_string()));
            }
        }
        if let Some(page) = self.page {
            pairs.push(("page", page.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}
