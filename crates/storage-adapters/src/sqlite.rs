//! # SQLite Implementation
//!
//! This module implements the data mapping between the SQLite relational
//! model and the `domains` models, and renders query objects to SQL.

use std::str::FromStr;

use async_trait::async_trait;
use domains::{
    Condition, Direction, Discussion, DiscussionColumn, DiscussionQuery, DiscussionRepository,
    Post, PostColumn, PostQuery, PostRepository, PostRow, PostTransaction, Result, StoreError,
    Value,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS discussions (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        title         TEXT    NOT NULL,
        start_user_id INTEGER,
        start_time    TEXT    NOT NULL,
        number_index  INTEGER NOT NULL DEFAULT 0,
        is_private    INTEGER NOT NULL DEFAULT 0,
        hide_time     TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS posts (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        discussion_id INTEGER NOT NULL REFERENCES discussions (id) ON DELETE CASCADE,
        number        INTEGER NOT NULL,
        time          TEXT    NOT NULL,
        user_id       INTEGER,
        type          TEXT,
        content       TEXT,
        edit_time     TEXT,
        edit_user_id  INTEGER,
        hide_time     TEXT,
        hide_user_id  INTEGER,
        ip_address    TEXT,
        is_private    INTEGER NOT NULL DEFAULT 0,
        UNIQUE (discussion_id, number)
    )
    "#,
];

pub struct SqliteStore {
    pool: SqlitePool,
}

/// Maps sqlx failures onto the store's error taxonomy.
fn storage_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        other => StoreError::Storage(other.to_string()),
    }
}

impl SqliteStore {
    /// Opens a pool. In-memory databases need `max_connections = 1`, since
    /// every SQLite connection to `:memory:` is its own database.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(storage_error)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(storage_error)?;
        tracing::debug!(url, max_connections, "sqlite pool ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates the `discussions` and `posts` tables when missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_error)?;
        }
        Ok(())
    }
}

fn post_from_row(row: &SqliteRow) -> std::result::Result<PostRow, sqlx::Error> {
    Ok(PostRow {
        id: row.try_get("id")?,
        discussion_id: row.try_get("discussion_id")?,
        number: row.try_get("number")?,
        time: row.try_get("time")?,
        user_id: row.try_get("user_id")?,
        post_type: row.try_get("type")?,
        content: row.try_get("content")?,
        edit_time: row.try_get("edit_time")?,
        edit_user_id: row.try_get("edit_user_id")?,
        hide_time: row.try_get("hide_time")?,
        hide_user_id: row.try_get("hide_user_id")?,
        ip_address: row.try_get("ip_address")?,
        is_private: row.try_get("is_private")?,
    })
}

fn discussion_from_row(row: &SqliteRow) -> std::result::Result<Discussion, sqlx::Error> {
    Ok(Discussion {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        start_user_id: row.try_get("start_user_id")?,
        start_time: row.try_get("start_time")?,
        number_index: row.try_get("number_index")?,
        is_private: row.try_get("is_private")?,
        hide_time: row.try_get("hide_time")?,
    })
}

fn push_value(qb: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
    match value {
        Value::Int(v) => qb.push_bind(*v),
        Value::Text(v) => qb.push_bind(v.clone()),
        Value::Bool(v) => qb.push_bind(*v),
        Value::Time(v) => qb.push_bind(*v),
    };
}

/// Renders a condition so it always yields 0 or 1, never NULL, matching
/// the in-memory evaluation: `IS` for equality and `(… IN …) IS 1` for sets.
fn push_condition<C: Copy>(
    qb: &mut QueryBuilder<'_, Sqlite>,
    table: &str,
    name: fn(C) -> &'static str,
    condition: &Condition<C>,
) {
    match condition {
        Condition::Eq(column, value) => {
            qb.push(format!("{table}.{} IS ", name(*column)));
            push_value(qb, value);
        }
        Condition::In(_, values) if values.is_empty() => {
            qb.push("0");
        }
        Condition::In(column, values) => {
            qb.push(format!("({table}.{} IN (", name(*column)));
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                push_value(qb, value);
            }
            qb.push(")) IS 1");
        }
        Condition::IsNull(column) => {
            qb.push(format!("{table}.{} IS NULL", name(*column)));
        }
        Condition::NotNull(column) => {
            qb.push(format!("{table}.{} IS NOT NULL", name(*column)));
        }
        Condition::All(conditions) => push_group(qb, table, name, conditions, " AND ", "1"),
        Condition::Any(conditions) => push_group(qb, table, name, conditions, " OR ", "0"),
        Condition::Not(inner) => {
            qb.push("NOT (");
            push_condition(qb, table, name, inner);
            qb.push(")");
        }
    }
}

fn push_group<C: Copy>(
    qb: &mut QueryBuilder<'_, Sqlite>,
    table: &str,
    name: fn(C) -> &'static str,
    conditions: &[Condition<C>],
    joiner: &str,
    empty: &str,
) {
    if conditions.is_empty() {
        qb.push(empty);
        return;
    }
    qb.push("(");
    for (i, condition) in conditions.iter().enumerate() {
        if i > 0 {
            qb.push(joiner);
        }
        push_condition(qb, table, name, condition);
    }
    qb.push(")");
}

/// Emits ` WHERE ` before the first clause and ` AND ` before the rest.
fn push_clause(qb: &mut QueryBuilder<'_, Sqlite>, first: &mut bool) {
    qb.push(if *first { " WHERE " } else { " AND " });
    *first = false;
}

fn select_posts(query: &PostQuery) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new("SELECT * FROM posts");
    let mut first = true;

    for condition in query.conditions() {
        push_clause(&mut qb, &mut first);
        push_condition(&mut qb, "posts", PostColumn::name, condition);
    }
    for constraint in query.discussion_constraints() {
        push_clause(&mut qb, &mut first);
        qb.push("EXISTS (SELECT 1 FROM discussions WHERE discussions.id = posts.discussion_id");
        for condition in &constraint.conditions {
            qb.push(" AND ");
            push_condition(&mut qb, "discussions", DiscussionColumn::name, condition);
        }
        qb.push(")");
    }

    if query.ordering().is_empty() {
        qb.push(" ORDER BY posts.id ASC");
    } else {
        qb.push(" ORDER BY ");
        for (i, (column, direction)) in query.ordering().iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            let direction = match direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            qb.push(format!("posts.{} {direction}", column.name()));
        }
    }
    if let Some(limit) = query.max_rows() {
        qb.push(" LIMIT ");
        qb.push_bind(limit);
    }
    qb
}

fn select_discussions(query: &DiscussionQuery) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new("SELECT * FROM discussions");
    let mut first = true;
    for condition in &query.conditions {
        push_clause(&mut qb, &mut first);
        push_condition(&mut qb, "discussions", DiscussionColumn::name, condition);
    }
    qb.push(" ORDER BY discussions.id ASC");
    qb
}

/// Wraps a sqlx transaction. Dropping it without `commit` rolls back.
pub struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl PostTransaction for SqliteTransaction {
    /// Single-statement increment, so concurrent writers cannot lose updates.
    async fn increment_number_index(&mut self, discussion_id: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "UPDATE discussions SET number_index = number_index + 1 WHERE id = ? RETURNING number_index",
        )
        .bind(discussion_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage_error)?
        .ok_or(StoreError::not_found("discussion", discussion_id))
    }

    async fn insert_post(&mut self, post: &Post) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO posts (discussion_id, number, time, user_id, type, content, edit_time, edit_user_id, hide_time, hide_user_id, ip_address, is_private) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(post.discussion_id)
        .bind(post.number)
        .bind(post.time)
        .bind(post.user_id)
        .bind(post.post_type.as_deref())
        .bind(post.content.as_deref())
        .bind(post.edit_time)
        .bind(post.edit_user_id)
        .bind(post.hide_time)
        .bind(post.hide_user_id)
        .bind(post.ip_address())
        .bind(post.is_private)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        Ok(result.last_insert_rowid())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let SqliteTransaction { tx } = *self;
        tx.commit().await.map_err(storage_error)
    }
}

#[async_trait]
impl PostRepository for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn PostTransaction>> {
        let tx = self.pool.begin().await.map_err(storage_error)?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn fetch_posts(&self, query: &PostQuery) -> Result<Vec<PostRow>> {
        let mut qb = select_posts(query);
        tracing::trace!(sql = qb.sql(), "fetching posts");
        qb.build()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?
            .iter()
            .map(post_from_row)
            .collect::<std::result::Result<_, _>>()
            .map_err(storage_error)
    }

    async fn update_post(&self, post: &Post) -> Result<()> {
        let id = post
            .id
            .ok_or_else(|| StoreError::Validation("post has no id".into()))?;
        let result = sqlx::query(
            "UPDATE posts SET time = ?, user_id = ?, content = ?, edit_time = ?, edit_user_id = ?, hide_time = ?, hide_user_id = ?, ip_address = ?, is_private = ? WHERE id = ?",
        )
        .bind(post.time)
        .bind(post.user_id)
        .bind(post.content.as_deref())
        .bind(post.edit_time)
        .bind(post.edit_user_id)
        .bind(post.hide_time)
        .bind(post.hide_user_id)
        .bind(post.ip_address.as_deref())
        .bind(post.is_private)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("post", id));
        }
        Ok(())
    }

    async fn delete_post(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl DiscussionRepository for SqliteStore {
    async fn find_discussion(&self, id: i64) -> Result<Option<Discussion>> {
        let row = sqlx::query("SELECT * FROM discussions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        row.as_ref()
            .map(discussion_from_row)
            .transpose()
            .map_err(storage_error)
    }

    async fn insert_discussion(&self, discussion: &Discussion) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO discussions (title, start_user_id, start_time, number_index, is_private, hide_time) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&discussion.title)
        .bind(discussion.start_user_id)
        .bind(discussion.start_time)
        .bind(discussion.number_index)
        .bind(discussion.is_private)
        .bind(discussion.hide_time)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(result.last_insert_rowid())
    }

    /// `number_index` is only ever written by the numbering transaction.
    async fn update_discussion(&self, discussion: &Discussion) -> Result<()> {
        let id = discussion
            .id
            .ok_or_else(|| StoreError::Validation("discussion has no id".into()))?;
        let result = sqlx::query(
            "UPDATE discussions SET title = ?, start_user_id = ?, is_private = ?, hide_time = ? WHERE id = ?",
        )
        .bind(&discussion.title)
        .bind(discussion.start_user_id)
        .bind(discussion.is_private)
        .bind(discussion.hide_time)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("discussion", id));
        }
        Ok(())
    }

    async fn fetch_discussions(&self, query: &DiscussionQuery) -> Result<Vec<Discussion>> {
        select_discussions(query)
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?
            .iter()
            .map(discussion_from_row)
            .collect::<std::result::Result<_, _>>()
            .map_err(storage_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::CommentPost;

    async fn store() -> SqliteStore {
        let store = SqliteStore::connect("sqlite::memory:", 1).await.unwrap();
        store.ensure_schema().await.unwrap();
        store
    }

    #[test]
    fn renders_scoped_post_query() {
        let query = PostQuery::new()
            .where_eq(PostColumn::DiscussionId, 4_i64)
            .with_global_scope(
                "registered_types",
                Condition::In(PostColumn::Type, vec!["comment".into()]),
            )
            .where_discussion_exists(
                DiscussionQuery::new().filter(Condition::equals(DiscussionColumn::IsPrivate, false)),
            )
            .order_by(PostColumn::Number, Direction::Desc)
            .limit(1);

        insta::assert_snapshot!(
            select_posts(&query).sql(),
            @"SELECT * FROM posts WHERE posts.discussion_id IS ? AND (posts.type IN (?)) IS 1 AND EXISTS (SELECT 1 FROM discussions WHERE discussions.id = posts.discussion_id AND discussions.is_private IS ?) ORDER BY posts.number DESC LIMIT ?"
        );
    }

    #[test]
    fn empty_groups_render_as_constants() {
        let query = PostQuery::new()
            .filter(Condition::Any(vec![]))
            .filter(Condition::In(PostColumn::Type, vec![]).negate());
        assert_eq!(
            select_posts(&query).sql(),
            "SELECT * FROM posts WHERE 0 AND NOT (0) ORDER BY posts.id ASC"
        );
    }

    #[tokio::test]
    async fn create_numbered_post_and_read_it_back() {
        let store = store().await;
        let discussion_id = store
            .insert_discussion(&Discussion::new("Test", Some(1)))
            .await
            .expect("Failed to create discussion");

        let mut post = CommentPost::reply(discussion_id, "OP", 1, Some("127.0.0.1".into()));
        post.post_type = Some("comment".into());
        let mut tx = store.begin().await.unwrap();
        post.number = Some(tx.increment_number_index(discussion_id).await.unwrap());
        let id = tx.insert_post(&post).await.unwrap();
        tx.commit().await.unwrap();

        let rows = store
            .fetch_posts(&PostQuery::new().where_eq(PostColumn::Id, id))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].number, 1);
        assert_eq!(rows[0].post_type.as_deref(), Some("comment"));
        assert_eq!(rows[0].ip_address.as_deref(), Some("127.0.0.1"));

        let discussion = store.find_discussion(discussion_id).await.unwrap().unwrap();
        assert_eq!(discussion.number_index, 1);
    }

    #[tokio::test]
    async fn rolled_back_transaction_leaves_no_trace() {
        let store = store().await;
        let discussion_id = store
            .insert_discussion(&Discussion::new("Test", None))
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.increment_number_index(discussion_id).await.unwrap();
        drop(tx);

        let discussion = store.find_discussion(discussion_id).await.unwrap().unwrap();
        assert_eq!(discussion.number_index, 0);
    }

    #[tokio::test]
    async fn duplicate_number_maps_to_conflict() {
        let store = store().await;
        let discussion_id = store
            .insert_discussion(&Discussion::new("Test", None))
            .await
            .unwrap();
        let mut post = CommentPost::reply(discussion_id, "hi", 1, None);
        post.number = Some(1);

        let mut tx = store.begin().await.unwrap();
        tx.insert_post(&post).await.unwrap();
        let err = tx.insert_post(&post).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");
    }

    #[tokio::test]
    async fn missing_discussion_is_not_found() {
        let store = store().await;
        let mut tx = store.begin().await.unwrap();
        let err = tx.increment_number_index(99).await.unwrap_err();
        assert_eq!(err, StoreError::not_found("discussion", 99));
    }

    #[tokio::test]
    async fn null_columns_follow_two_valued_logic() {
        let store = store().await;
        let discussion_id = store
            .insert_discussion(&Discussion::new("Test", None))
            .await
            .unwrap();
        sqlx::query("INSERT INTO posts (discussion_id, number, time, type) VALUES (?, 1, ?, NULL)")
            .bind(discussion_id)
            .bind(chrono::Utc::now())
            .execute(store.pool())
            .await
            .unwrap();

        let typed = Condition::In(PostColumn::Type, vec!["comment".into()]);
        let matched = store
            .fetch_posts(&PostQuery::new().filter(typed.clone()))
            .await
            .unwrap();
        assert!(matched.is_empty());

        let negated = store
            .fetch_posts(&PostQuery::new().filter(typed.negate()))
            .await
            .unwrap();
        assert_eq!(negated.len(), 1);
    }
}
