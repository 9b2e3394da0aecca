//! Data models for marketplace entities and auth wire types.
//!
//! - `Post`, `PostDetails`: listings, with category-specific payloads for
//!   item sales, roommate search and carpooling
//! - `PostPage`, `MyPostsFilter`: paginated feeds and owner-side filtering
//! - `UserProfile`: account profile details
//! - Auth request/response bodies exchanged with the backend

pub mod auth;
pub mod post;
pub mod user;

pub use auth::{
    Credentials, LoginResponse, MessageResponse, RefreshRequest, RefreshResponse,
    VerifyRequest,
};
pub use post::{
    CreatedPost, ModerationStatus, MyPostsFilter, NewPost, Post, PostCategory, PostDetails,
    PostImage, PostPage, PostStatus,
};
pub use user::{ProfileUpdate, UserProfile};
