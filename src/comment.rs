//! # Comment Module
//!
//! Comments attach to exactly one parent, a question or an answer; the
//! parent is a variant in the model and two CHECK-guarded nullable columns
//! in storage. Comments carry no votes. Ownership gating matches questions
//! and answers, and every redirect lands on the enclosing question's detail
//! view.

use crate::auth::AuthService;
use crate::db::{BoardStore, SqlValue};
use crate::error::{BoardError, BoardResult, FormErrors};
use crate::flash;
use crate::models::{now_text, row_to_comment, Comment, CommentParent, WriteOutcome};

use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, post},
    Form, Router,
};
use axum_extra::extract::cookie::CookieJar;
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use std::sync::Arc;

const COMMENT_COLUMNS: &str = "c.id, c.content, c.user_id, u.username, \
     c.question_id, c.answer_id, c.created_at, c.modified_at";

/// Comment access layer
#[derive(Clone)]
pub struct CommentService {
    store: Arc<BoardStore>,
}

impl CommentService {
    pub fn new(store: Arc<BoardStore>) -> Self {
        Self { store }
    }

    /// Create a comment on a question or an answer, returning its id. The
    /// parent must exist.
    pub async fn create(
        &self,
        parent: CommentParent,
        content: &str,
        actor: i64,
    ) -> BoardResult<i64> {
        Self::validate(content)?;

        let content = content.to_string();
        let now = now_text();

        let created = self
            .store
            .with_transaction(move |conn| {
                let exists: Option<i64> = match parent {
                    CommentParent::Question(id) => conn
                        .query_row(
                            "SELECT id FROM questions WHERE id = ?1",
                            params![id],
                            |row| row.get(0),
                        )
                        .optional()?,
                    CommentParent::Answer(id) => conn
                        .query_row("SELECT id FROM answers WHERE id = ?1", params![id], |row| {
                            row.get(0)
                        })
                        .optional()?,
                };
                if exists.is_none() {
                    return Ok(None);
                }

                let (question_id, answer_id) = parent.to_columns();
                conn.execute(
                    "INSERT INTO comments (content, user_id, question_id, answer_id, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![content, actor, question_id, answer_id, now],
                )?;
                Ok(Some(conn.last_insert_rowid()))
            })
            .await?;

        created.ok_or_else(|| BoardError::NotFound(parent.entity().to_string()))
    }

    /// One comment by id
    pub async fn get(&self, id: i64) -> BoardResult<Comment> {
        self.store
            .query_one(
                format!(
                    "SELECT {} FROM comments c JOIN users u ON u.id = c.user_id WHERE c.id = ?1",
                    COMMENT_COLUMNS
                ),
                vec![SqlValue::Integer(id)],
                row_to_comment,
            )
            .await?
            .ok_or_else(|| BoardError::NotFound("comment".to_string()))
    }

    /// Comments attached directly to a question, oldest first
    pub async fn for_question(&self, question_id: i64) -> BoardResult<Vec<Comment>> {
        self.store
            .query(
                format!(
                    "SELECT {} FROM comments c JOIN users u ON u.id = c.user_id \
                     WHERE c.question_id = ?1 ORDER BY c.created_at ASC, c.id ASC",
                    COMMENT_COLUMNS
                ),
                vec![SqlValue::Integer(question_id)],
                row_to_comment,
            )
            .await
    }

    /// Comments attached to any of the given answers, oldest first
    pub async fn for_answers(&self, answer_ids: Vec<i64>) -> BoardResult<Vec<Comment>> {
        if answer_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders: Vec<String> = (1..=answer_ids.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT {} FROM comments c JOIN users u ON u.id = c.user_id \
             WHERE c.answer_id IN ({}) ORDER BY c.created_at ASC, c.id ASC",
            COMMENT_COLUMNS,
            placeholders.join(", ")
        );
        let params = answer_ids.into_iter().map(SqlValue::Integer).collect();

        self.store.query(sql, params, row_to_comment).await
    }

    /// Overwrite content; only the owner may do this
    pub async fn modify(&self, id: i64, content: &str, actor: i64) -> BoardResult<()> {
        Self::validate(content)?;

        let content = content.to_string();
        let now = now_text();

        let outcome = self
            .store
            .with_transaction(move |conn| {
                let owner: Option<i64> = conn
                    .query_row(
                        "SELECT user_id FROM comments WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                match owner {
                    None => Ok(WriteOutcome::Missing),
                    Some(owner) if owner != actor => Ok(WriteOutcome::NotOwner),
                    Some(_) => {
                        conn.execute(
                            "UPDATE comments SET content = ?1, modified_at = ?2 WHERE id = ?3",
                            params![content, now, id],
                        )?;
                        Ok(WriteOutcome::Done)
                    }
                }
            })
            .await?;

        match outcome {
            WriteOutcome::Done => Ok(()),
            WriteOutcome::Missing => Err(BoardError::NotFound("comment".to_string())),
            WriteOutcome::NotOwner => Err(BoardError::Forbidden(
                "You do not have permission to modify this comment".to_string(),
            )),
        }
    }

    /// Delete a comment; only the owner may do this
    pub async fn delete(&self, id: i64, actor: i64) -> BoardResult<()> {
        let outcome = self
            .store
            .with_transaction(move |conn| {
                let owner: Option<i64> = conn
                    .query_row(
                        "SELECT user_id FROM comments WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                match owner {
                    None => Ok(WriteOutcome::Missing),
                    Some(owner) if owner != actor => Ok(WriteOutcome::NotOwner),
                    Some(_) => {
                        conn.execute("DELETE FROM comments WHERE id = ?1", params![id])?;
                        Ok(WriteOutcome::Done)
                    }
                }
            })
            .await?;

        match outcome {
            WriteOutcome::Done => Ok(()),
            WriteOutcome::Missing => Err(BoardError::NotFound("comment".to_string())),
            WriteOutcome::NotOwner => Err(BoardError::Forbidden(
                "You do not have permission to delete this comment".to_string(),
            )),
        }
    }

    /// The question a comment ultimately belongs to, through its answer if
    /// need be; redirect targets come from here.
    pub async fn question_of(&self, id: i64) -> BoardResult<i64> {
        self.store
            .query_one(
                "SELECT COALESCE(c.question_id, a.question_id) \
                 FROM comments c LEFT JOIN answers a ON a.id = c.answer_id \
                 WHERE c.id = ?1"
                    .to_string(),
                vec![SqlValue::Integer(id)],
                |row| row.get::<_, i64>(0),
            )
            .await?
            .ok_or_else(|| BoardError::NotFound("comment".to_string()))
    }

    fn validate(content: &str) -> BoardResult<()> {
        let mut errors = FormErrors::new().value("content", content);
        if content.trim().is_empty() {
            errors.push("content", "Content is required");
        }
        errors.into_result()
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// App state for the comment routes
#[derive(Clone)]
pub struct CommentState {
    pub comments: CommentService,
    pub auth: AuthService,
}

#[derive(Debug, Deserialize)]
pub struct CommentForm {
    #[serde(default)]
    pub content: String,
}

fn detail_path(question_id: i64) -> String {
    format!("/question/detail/{}", question_id)
}

/// POST /comment/create/question/:question_id
async fn create_on_question_handler(
    State(state): State<CommentState>,
    Path(question_id): Path<i64>,
    jar: CookieJar,
    Form(form): Form<CommentForm>,
) -> Result<Response, BoardError> {
    let user = state.auth.require_user(&jar).await?;
    state
        .comments
        .create(CommentParent::Question(question_id), &form.content, user.id)
        .await?;
    Ok(flash::redirect(&detail_path(question_id)))
}

/// POST /comment/create/answer/:answer_id
async fn create_on_answer_handler(
    State(state): State<CommentState>,
    Path(answer_id): Path<i64>,
    jar: CookieJar,
    Form(form): Form<CommentForm>,
) -> Result<Response, BoardError> {
    let user = state.auth.require_user(&jar).await?;
    let id = state
        .comments
        .create(CommentParent::Answer(answer_id), &form.content, user.id)
        .await?;
    let question_id = state.comments.question_of(id).await?;
    Ok(flash::redirect(&detail_path(question_id)))
}

/// POST /comment/modify/:comment_id
async fn modify_handler(
    State(state): State<CommentState>,
    Path(comment_id): Path<i64>,
    jar: CookieJar,
    Form(form): Form<CommentForm>,
) -> Result<Response, BoardError> {
    let user = state.auth.require_user(&jar).await?;
    let target = detail_path(state.comments.question_of(comment_id).await?);

    match state.comments.modify(comment_id, &form.content, user.id).await {
        Ok(()) => Ok(flash::redirect(&target)),
        Err(e) if e.is_soft() => Ok(flash::redirect_with_notice(jar, &target, &e.to_string())),
        Err(e) => Err(e),
    }
}

/// GET /comment/delete/:comment_id
async fn delete_handler(
    State(state): State<CommentState>,
    Path(comment_id): Path<i64>,
    jar: CookieJar,
) -> Result<Response, BoardError> {
    let user = state.auth.require_user(&jar).await?;
    let target = detail_path(state.comments.question_of(comment_id).await?);

    match state.comments.delete(comment_id, user.id).await {
        Ok(()) => Ok(flash::redirect(&target)),
        Err(e) if e.is_soft() => Ok(flash::redirect_with_notice(jar, &target, &e.to_string())),
        Err(e) => Err(e),
    }
}

/// Creates the comment router
pub fn create_comment_router(state: CommentState) -> Router {
    Router::new()
        .route("/create/question/:question_id", post(create_on_question_handler))
        .route("/create/answer/:answer_id", post(create_on_answer_handler))
        .route("/modify/:comment_id", post(modify_handler))
        .route("/delete/:comment_id", get(delete_handler))
        .with_state(state)
}

// ============================================================================
// Tests
// ============================================================================
