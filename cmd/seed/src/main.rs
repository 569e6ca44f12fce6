//! # Seed
//!
//! Creates the schema and fills a database with a sample discussion:
//! a few numbered comments, a hidden reply and a pair of renames that
//! fold into one post.

use std::sync::Arc;

use anyhow::{Context, Result};
use configs::{ExposeSecret, LoggingSettings, Settings};
use domains::{Actor, CommentPost, Discussion, DiscussionRepository, PostColumn};
use services::{policy, EventBus, PostStore, TypeRegistry};
use storage_adapters::SqliteStore;
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .context("invalid log filter")?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    init_tracing(&settings.logging)?;

    let store = Arc::new(
        SqliteStore::connect(
            settings.database.url.expose_secret(),
            settings.database.max_connections,
        )
        .await?,
    );
    store.ensure_schema().await?;

    let mut bus = EventBus::new();
    policy::register_defaults(&mut bus);
    let posts = PostStore::new(
        store.clone(),
        store.clone(),
        Arc::new(TypeRegistry::with_defaults()),
        Arc::new(bus),
    )
    .private_by_default(settings.visibility.private_by_default);

    let alice = Actor::user(1);
    let bob = Actor::user(2);
    let moderator = Actor::user(3).with_permission(policy::HIDE_POSTS);

    let discussion_id = store
        .insert_discussion(&Discussion::new("Welcome", alice.id))
        .await?;
    tracing::info!(discussion_id, "seeded discussion");

    posts
        .create(
            CommentPost::reply(discussion_id, "Hello, forum!", 1, Some("127.0.0.1".into())),
            &alice,
        )
        .await?;
    let mut reply = posts
        .create(CommentPost::reply(discussion_id, "Hi Alice", 2, None), &bob)
        .await?;
    posts.revise(&mut reply, "Hi Alice, welcome!", &bob).await?;

    let mut spam = posts
        .create(CommentPost::reply(discussion_id, "buy now", 2, None), &bob)
        .await?;
    posts.hide(&mut spam, &moderator).await?;

    posts
        .rename_discussion(discussion_id, "Welcome aboard", &alice)
        .await?;
    posts
        .rename_discussion(discussion_id, "Welcome, everyone", &alice)
        .await?;

    let query = posts.query().where_eq(PostColumn::DiscussionId, discussion_id);
    let guest_view = posts.get(&posts.visible_to(query.clone(), &Actor::guest())).await?;
    let moderator_view = posts.get(&posts.visible_to(query, &moderator)).await?;
    for post in &moderator_view {
        tracing::info!(
            id = ?post.id,
            number = ?post.number,
            post_type = ?post.post_type,
            hidden = post.is_hidden(),
            "post"
        );
    }
    tracing::info!(
        guest = guest_view.len(),
        moderator = moderator_view.len(),
        "seed complete"
    );
    Ok(())
}
