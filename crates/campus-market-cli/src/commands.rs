//! Command definitions and handlers.
//!
//! Every authenticated command asks the session manager for a valid token
//! first; the manager refreshes it when needed.

use anyhow::{bail, Context as _, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use campus_market_core::api::DEFAULT_PAGE_LIMIT;
use campus_market_core::auth::token;
use campus_market_core::models::{
    MyPostsFilter, NewPost, Post, PostCategory, PostDetails, PostPage, PostStatus,
    ProfileUpdate, UserProfile,
};
use campus_market_core::{ApiClient, Config, RouteGuard, SessionManager, SessionState};

/// Maximum title width in post listings
const TITLE_WIDTH: usize = 32;

#[derive(Parser)]
#[command(name = "campus-market", version, about = "Campus marketplace client")]
pub struct Cli {
    /// API base URL (overrides config and CAMPUS_MARKET_API_URL)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Log in and remember the session
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Create an account; a verification code is emailed
    Register {
        #[arg(long)]
        email: String,
    },
    /// Confirm an account with the emailed code
    Verify {
        #[arg(long)]
        email: String,
        #[arg(long)]
        code: String,
    },
    /// End the session and forget stored credentials
    Logout,
    /// Show the current session
    Status,
    /// Print a valid access token, refreshing it if needed
    Token,
    /// Show where a page route leads for the current session
    Open { path: String },
    /// Browse published posts
    Posts {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: u32,
    },
    /// List your own posts
    Mine(MineArgs),
    /// Show one post
    Show { id: String },
    /// Submit a new post
    Create(CreateArgs),
    /// Publish one of your posts
    Publish { id: String },
    /// Close one of your posts
    Close { id: String },
    /// Delete one of your posts
    Delete { id: String },
    /// Show why one of your posts passed or failed moderation
    Moderation { id: String },
    /// Show or edit your profile
    Profile {
        #[command(subcommand)]
        action: Option<ProfileAction>,
    },
}

#[derive(Subcommand)]
pub enum ProfileAction {
    /// Create your profile, or reactivate a deleted account
    Create(ProfileFields),
    /// Change profile fields
    Update(ProfileFields),
    /// Look up another user by email
    Lookup { email: String },
}

#[derive(Args)]
pub struct ProfileFields {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    college: Option<String>,
    #[arg(long)]
    department: Option<String>,
}

impl ProfileFields {
    fn into_update(self) -> ProfileUpdate {
        ProfileUpdate {
            name: self.name,
            college: self.college,
            department: self.department,
        }
        .normalized()
    }
}

#[derive(Args)]
pub struct MineArgs {
    #[arg(long)]
    status: Option<PostStatus>,
    #[arg(long)]
    category: Option<PostCategory>,
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    page: Option<u32>,
    #[arg(long)]
    limit: Option<u32>,
}

#[derive(Args)]
pub struct CreateArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: String,
    #[command(subcommand)]
    kind: CreateKind,
}

#[derive(Subcommand)]
enum CreateKind {
    /// Sell an item
    Sell {
        #[arg(long)]
        item: String,
        #[arg(long)]
        price: f64,
        #[arg(long, default_value = "OTHER")]
        sub_category: String,
    },
    /// Look for a roommate
    Roommate {
        #[arg(long)]
        community: String,
        #[arg(long)]
        rent: f64,
        /// Move-in date, YYYY-MM-DD
        #[arg(long)]
        start_date: NaiveDate,
        #[arg(long, default_value = "ANY")]
        gender_preference: String,
        #[arg(long = "preference")]
        preferences: Vec<String>,
    },
    /// Offer a ride
    Carpool {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        /// Departure, YYYY-MM-DDTHH:MM:SS
        #[arg(long)]
        departure: NaiveDateTime,
        #[arg(long, default_value_t = 1)]
        seats: u32,
    },
}

impl CreateKind {
    fn into_details(self) -> PostDetails {
        match self {
            CreateKind::Sell {
                item,
                price,
                sub_category,
            } => PostDetails::Sell {
                price,
                item,
                sub_category: sub_category.to_uppercase(),
            },
            CreateKind::Roommate {
                community,
                rent,
                start_date,
                gender_preference,
                preferences,
            } => PostDetails::Roommate {
                community,
                rent,
                start_date: start_date.format("%Y-%m-%d").to_string(),
                gender_preference: gender_preference.to_uppercase(),
                preferences,
            },
            CreateKind::Carpool {
                from,
                to,
                departure,
                seats,
            } => PostDetails::Carpool {
                from_location: from,
                to_location: to,
                departure_time: departure.format("%Y-%m-%dT%H:%M:%S").to_string(),
                seats_available: seats,
            },
        }
    }
}

pub struct Context<'a> {
    pub api: ApiClient,
    pub session: SessionManager,
    pub config: &'a mut Config,
}

impl Context<'_> {
    /// API client carrying a valid bearer token
    async fn authed(&self) -> Result<ApiClient> {
        match self.session.get_valid_token().await {
            Some(token) => Ok(self.api.with_token(token)),
            None => bail!("Not logged in. Run `campus-market login` first."),
        }
    }
}

fn prompt_password() -> Result<String> {
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;
    if password.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(password)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

fn print_post_line(post: &Post) {
    println!(
        "{:<24}  {:<8}  {:<12}  {:<width$}  {}",
        post.id,
        post.category().as_str(),
        post.status.to_string(),
        truncate(&post.title, TITLE_WIDTH),
        post.details.summary(),
        width = TITLE_WIDTH
    );
}

fn print_page(page: &PostPage) {
    if page.posts.is_empty() {
        println!("No posts found.");
        return;
    }
    for post in &page.posts {
        print_post_line(post);
    }
    println!(
        "\nPage {} of {} ({} posts)",
        page.page,
        page.total_pages().max(1),
        page.total
    );
}

pub async fn login(mut ctx: Context<'_>, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| ctx.config.last_email.clone()) {
        Some(email) => email,
        None => bail!("No email given. Use --email."),
    };
    let password = prompt_password()?;

    let response = ctx.api.login(&email, &password).await?;
    ctx.session.login(
        &response.token,
        &response.user_id,
        response.refresh_token.as_deref(),
    )?;

    ctx.config.last_email = Some(email.clone());
    if let Err(e) = ctx.config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Logged in as {}", email);
    Ok(())
}

pub async fn register(ctx: Context<'_>, email: String) -> Result<()> {
    let password = prompt_password()?;
    let response = ctx.api.register(&email, &password).await?;
    println!("{}", response.message);
    println!("Then run: campus-market verify --email {} --code <code>", email);
    Ok(())
}

pub async fn verify(ctx: Context<'_>, email: String, code: String) -> Result<()> {
    let response = ctx.api.verify(&email, &code).await?;
    println!("{}", response.message);
    Ok(())
}

pub async fn logout(ctx: Context<'_>) -> Result<()> {
    // Best effort: the local session ends regardless of the server's answer
    if let Some(token) = ctx.session.get_valid_token().await {
        if let Err(e) = ctx.api.with_token(token).logout().await {
            warn!(error = %e, "Server-side logout failed");
        }
    }
    ctx.session.logout();
    println!("Logged out");
    Ok(())
}

pub fn status(ctx: Context<'_>) -> Result<()> {
    match ctx.session.state() {
        SessionState::Authenticated { user_id } => {
            println!("Logged in (user {})", user_id);
            if let Some(expiry) = ctx.session.token_expires_at() {
                let minutes = (expiry - chrono::Utc::now()).num_minutes().max(0);
                let marker = if ctx.session.is_token_expired(None) {
                    " (refresh due)"
                } else {
                    ""
                };
                println!("Access token expires in {}m{}", minutes, marker);
            }
        }
        SessionState::Unauthenticated => println!("Not logged in"),
        SessionState::Initializing => println!("Session still initializing"),
    }
    Ok(())
}

pub async fn print_token(ctx: Context<'_>) -> Result<()> {
    match ctx.session.get_valid_token().await {
        Some(access_token) => {
            if let Some(sub) = token::decode_claims(&access_token).and_then(|c| c.sub) {
                eprintln!("Token for {}", sub);
            }
            println!("{}", access_token);
            Ok(())
        }
        None => bail!("No valid token. Run `campus-market login` first."),
    }
}

pub fn open(ctx: Context<'_>, path: &str) -> Result<()> {
    let guard = RouteGuard::new();
    match guard.redirect_for(&ctx.session.session(), path) {
        Some(target) => println!("{} -> {}", path, target),
        None => println!("{}", path),
    }
    Ok(())
}

pub async fn list_posts(ctx: Context<'_>, page: u32, limit: u32) -> Result<()> {
    let page = ctx.authed().await?.list_posts(page.max(1), limit).await?;
    print_page(&page);
    Ok(())
}

pub async fn my_posts(ctx: Context<'_>, args: MineArgs) -> Result<()> {
    let filter = MyPostsFilter {
        status: args.status,
        category: args.category,
        search: args.search,
        page: args.page,
        limit: args.limit,
    };
    let page = ctx.authed().await?.my_posts(&filter).await?;
    print_page(&page);
    Ok(())
}

pub async fn show_post(ctx: Context<'_>, id: &str) -> Result<()> {
    let post = ctx.authed().await?.get_post(id).await?;
    println!("{}", post.title);
    println!("{} | {} | posted {}", post.category().as_str(), post.status, post.formatted_created_at());
    println!("{}", post.details.summary());
    if let PostDetails::Roommate { ref preferences, ref gender_preference, .. } = post.details {
        println!("Gender preference: {}", gender_preference);
        if !preferences.is_empty() {
            println!("Preferences: {}", preferences.join(", "));
        }
    }
    println!();
    println!("{}", post.description);
    if !post.images.is_empty() {
        println!("\n{} image(s)", post.images.len());
    }
    Ok(())
}

pub async fn create_post(ctx: Context<'_>, args: CreateArgs) -> Result<()> {
    let post = NewPost {
        title: args.title,
        description: args.description,
        images: Vec::new(),
        details: args.kind.into_details(),
    };
    let created = ctx.authed().await?.create_post(&post).await?;
    println!("Created post {} ({})", created.post_id, created.status);
    Ok(())
}

pub async fn set_status(ctx: Context<'_>, id: &str, publish: bool) -> Result<()> {
    let status = if publish {
        PostStatus::Published
    } else {
        PostStatus::Closed
    };
    let response = ctx.authed().await?.update_post_status(id, status).await?;
    println!("{}", response.message);
    Ok(())
}

pub async fn delete_post(ctx: Context<'_>, id: &str) -> Result<()> {
    let response = ctx.authed().await?.delete_post(id).await?;
    println!("{}", response.message);
    Ok(())
}

pub async fn moderation(ctx: Context<'_>, id: &str) -> Result<()> {
    let status = ctx.authed().await?.moderation_status(id).await?;
    println!("Post {}: {}", status.post_id, status.status);
    println!("{}", status.explanation());
    if let Some(ref failed_at) = status.failed_at {
        println!("Failed at {}", failed_at);
    } else if let Some(ref passed_at) = status.moderation_passed_at {
        println!("Passed at {}", passed_at);
    }
    Ok(())
}

fn print_profile(profile: &UserProfile) {
    println!("{} <{}>", profile.display_name(), profile.email);
    if let Some(ref college) = profile.college {
        match profile.department {
            Some(ref department) => println!("{}, {}", college, department),
            None => println!("{}", college),
        }
    }
    if let Some(ref status) = profile.status {
        println!("Account {}", status.to_lowercase());
    }
}

pub async fn profile(ctx: Context<'_>, action: Option<ProfileAction>) -> Result<()> {
    let api = ctx.authed().await?;
    let profile = match action {
        None => api.me().await?,
        Some(ProfileAction::Create(fields)) => api.save_profile(&fields.into_update()).await?,
        Some(ProfileAction::Update(fields)) => api.update_profile(&fields.into_update()).await?,
        Some(ProfileAction::Lookup { email }) => api.get_user(&email).await?,
    };
    print_profile(&profile);
    Ok(())
}
