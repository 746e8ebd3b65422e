//! # Question Module
//!
//! The question access layer and its routes: paginated/filterable listing,
//! detail view (question + answer page + comments), create, modify, delete
//! and vote.
//!
//! Every mutating operation takes the acting user id explicitly and runs its
//! read-check-write sequence inside one transaction. Ownership violations
//! and vote rejections are soft: the handlers turn them into a redirect with
//! a notice instead of an error status.

use crate::answer::AnswerService;
use crate::auth::AuthService;
use crate::comment::CommentService;
use crate::db::{BoardStore, SqlValue};
use crate::error::{BoardError, BoardResult, FormErrors};
use crate::flash;
use crate::models::{
    now_text, row_to_question, Answer, Comment, CommentParent, Page, Question, VoteOutcome,
    WriteOutcome,
};

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Questions per listing page
pub const QUESTIONS_PER_PAGE: u32 = 10;

/// Subject length limit
const MAX_SUBJECT_LENGTH: usize = 200;

const QUESTION_COLUMNS: &str = "q.id, q.subject, q.content, q.user_id, u.username, \
     q.created_at, q.modified_at, \
     (SELECT COUNT(*) FROM question_voters v WHERE v.question_id = q.id) AS vote_count, \
     (SELECT COUNT(*) FROM answers a WHERE a.question_id = q.id) AS answer_count";

/// Question access layer
#[derive(Clone)]
pub struct QuestionService {
    store: Arc<BoardStore>,
}

impl QuestionService {
    pub fn new(store: Arc<BoardStore>) -> Self {
        Self { store }
    }

    /// One page of questions, newest first, optionally filtered by keyword.
    ///
    /// The keyword matches case-insensitively against question subject,
    /// question content, question author, answer content and answer author;
    /// a question matching through several of those appears once. An empty
    /// keyword is the same as no keyword.
    pub async fn list(&self, page: u32, kw: &str) -> BoardResult<Page<Question>> {
        let page = page.max(1);
        let (where_sql, params) = Self::search_filter(kw);

        let total = self
            .store
            .count(
                format!("SELECT COUNT(*) FROM questions q{}", where_sql),
                params.clone(),
            )
            .await?;

        let limit_idx = params.len() + 1;
        let sql = format!(
            "SELECT {} FROM questions q JOIN users u ON u.id = q.user_id{} \
             ORDER BY q.created_at DESC, q.id DESC LIMIT ?{} OFFSET ?{}",
            QUESTION_COLUMNS,
            where_sql,
            limit_idx,
            limit_idx + 1
        );

        let mut params = params;
        params.push(SqlValue::Integer(QUESTIONS_PER_PAGE as i64));
        params.push(SqlValue::Integer(((page - 1) * QUESTIONS_PER_PAGE) as i64));

        let items = self.store.query(sql, params, row_to_question).await?;
        Ok(Page::new(items, page, QUESTIONS_PER_PAGE, total))
    }

    fn search_filter(kw: &str) -> (String, Vec<SqlValue>) {
        if kw.is_empty() {
            return (String::new(), Vec::new());
        }
        let like = format!("%{}%", kw);
        let clause = " WHERE q.id IN ( \
             SELECT DISTINCT sq.id FROM questions sq \
             JOIN users su ON su.id = sq.user_id \
             LEFT JOIN answers sa ON sa.question_id = sq.id \
             LEFT JOIN users sau ON sau.id = sa.user_id \
             WHERE sq.subject LIKE ?1 OR sq.content LIKE ?1 OR su.username LIKE ?1 \
                OR sa.content LIKE ?1 OR sau.username LIKE ?1)"
            .to_string();
        (clause, vec![SqlValue::Text(like)])
    }

    /// One question by id
    pub async fn get(&self, id: i64) -> BoardResult<Question> {
        self.store
            .query_one(
                format!(
                    "SELECT {} FROM questions q JOIN users u ON u.id = q.user_id WHERE q.id = ?1",
                    QUESTION_COLUMNS
                ),
                vec![SqlValue::Integer(id)],
                row_to_question,
            )
            .await?
            .ok_or_else(|| BoardError::NotFound("question".to_string()))
    }

    /// Create a question owned by `actor`, returning its id
    pub async fn create(&self, subject: &str, content: &str, actor: i64) -> BoardResult<i64> {
        Self::validate(subject, content)?;

        let id = self
            .store
            .insert(
                "INSERT INTO questions (subject, content, user_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4)"
                    .to_string(),
                vec![
                    SqlValue::Text(subject.to_string()),
                    SqlValue::Text(content.to_string()),
                    SqlValue::Integer(actor),
                    SqlValue::Text(now_text()),
                ],
            )
            .await?;

        debug!("Question {} created by user {}", id, actor);
        Ok(id)
    }

    /// Overwrite subject and content; only the owner may do this
    pub async fn modify(
        &self,
        id: i64,
        subject: &str,
        content: &str,
        actor: i64,
    ) -> BoardResult<()> {
        Self::validate(subject, content)?;

        let subject = subject.to_string();
        let content = content.to_string();
        let now = now_text();

        let outcome = self
            .store
            .with_transaction(move |conn| {
                let owner: Option<i64> = conn
                    .query_row(
                        "SELECT user_id FROM questions WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                match owner {
                    None => Ok(WriteOutcome::Missing),
                    Some(owner) if owner != actor => Ok(WriteOutcome::NotOwner),
                    Some(_) => {
                        conn.execute(
                            "UPDATE questions SET subject = ?1, content = ?2, modified_at = ?3 \
                             WHERE id = ?4",
                            params![subject, content, now, id],
                        )?;
                        Ok(WriteOutcome::Done)
                    }
                }
            })
            .await?;

        match outcome {
            WriteOutcome::Done => Ok(()),
            WriteOutcome::Missing => Err(BoardError::NotFound("question".to_string())),
            WriteOutcome::NotOwner => Err(BoardError::Forbidden(
                "You do not have permission to modify this post".to_string(),
            )),
        }
    }

    /// Delete a question; answers, comments and voter rows cascade
    pub async fn delete(&self, id: i64, actor: i64) -> BoardResult<()> {
        let outcome = self
            .store
            .with_transaction(move |conn| {
                let owner: Option<i64> = conn
                    .query_row(
                        "SELECT user_id FROM questions WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                match owner {
                    None => Ok(WriteOutcome::Missing),
                    Some(owner) if owner != actor => Ok(WriteOutcome::NotOwner),
                    Some(_) => {
                        conn.execute("DELETE FROM questions WHERE id = ?1", params![id])?;
                        Ok(WriteOutcome::Done)
                    }
                }
            })
            .await?;

        match outcome {
            WriteOutcome::Done => {
                debug!("Question {} deleted by user {}", id, actor);
                Ok(())
            }
            WriteOutcome::Missing => Err(BoardError::NotFound("question".to_string())),
            WriteOutcome::NotOwner => Err(BoardError::Forbidden(
                "You do not have permission to delete this post".to_string(),
            )),
        }
    }

    /// Add `actor` to the question's voter set.
    ///
    /// Owners cannot vote on their own question; a repeat vote changes
    /// nothing and reports AlreadyVoted. The check and the insert run in one
    /// transaction.
    pub async fn vote(&self, id: i64, actor: i64) -> BoardResult<()> {
        let outcome = self
            .store
            .with_transaction(move |conn| {
                let owner: Option<i64> = conn
                    .query_row(
                        "SELECT user_id FROM questions WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let owner = match owner {
                    Some(owner) => owner,
                    None => return Ok(VoteOutcome::Missing),
                };
                if owner == actor {
                    return Ok(VoteOutcome::OwnPost);
                }

                let voted: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM question_voters WHERE question_id = ?1 AND user_id = ?2",
                        params![id, actor],
                        |row| row.get(0),
                    )
                    .optional()?;
                if voted.is_some() {
                    return Ok(VoteOutcome::Duplicate);
                }

                conn.execute(
                    "INSERT INTO question_voters (question_id, user_id) VALUES (?1, ?2)",
                    params![id, actor],
                )?;
                Ok(VoteOutcome::Voted)
            })
            .await?;

        match outcome {
            VoteOutcome::Voted => Ok(()),
            VoteOutcome::Missing => Err(BoardError::NotFound("question".to_string())),
            VoteOutcome::OwnPost => Err(BoardError::SelfVote),
            VoteOutcome::Duplicate => Err(BoardError::AlreadyVoted),
        }
    }

    fn validate(subject: &str, content: &str) -> BoardResult<()> {
        let mut errors = FormErrors::new()
            .value("subject", subject)
            .value("content", content);

        if subject.trim().is_empty() {
            errors.push("subject", "Subject is required");
        } else if subject.chars().count() > MAX_SUBJECT_LENGTH {
            errors.push(
                "subject",
                &format!("Subject must be {} characters or fewer", MAX_SUBJECT_LENGTH),
            );
        }
        if content.trim().is_empty() {
            errors.push("content", "Content is required");
        }

        errors.into_result()
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// App state for the question routes; the detail view pulls in answers and
/// comments, so those services ride along.
#[derive(Clone)]
pub struct QuestionState {
    pub questions: QuestionService,
    pub answers: AnswerService,
    pub comments: CommentService,
    pub auth: AuthService,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    page: Option<u32>,
    kw: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailParams {
    page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionForm {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub content: String,
}

/// An answer with its comments, as the detail view renders it
#[derive(Debug, Serialize)]
struct AnswerView {
    #[serde(flatten)]
    answer: Answer,
    comments: Vec<Comment>,
}

fn detail_path(id: i64) -> String {
    format!("/question/detail/{}", id)
}

/// GET /question/list?page=&kw=
async fn list_handler(
    State(state): State<QuestionState>,
    Query(params): Query<ListParams>,
    jar: CookieJar,
) -> Result<Response, BoardError> {
    let kw = params.kw.unwrap_or_default();
    let questions = state
        .questions
        .list(params.page.unwrap_or(1), &kw)
        .await?;

    let (jar, notice) = flash::take_notice(jar);
    Ok((
        jar,
        Json(json!({
            "questions": questions,
            "kw": kw,
            "notice": notice,
        })),
    )
        .into_response())
}

/// GET /question/detail/:question_id?page=
async fn detail_handler(
    State(state): State<QuestionState>,
    Path(question_id): Path<i64>,
    Query(params): Query<DetailParams>,
    jar: CookieJar,
) -> Result<Response, BoardError> {
    let question = state.questions.get(question_id).await?;
    let comments = state.comments.for_question(question_id).await?;

    let answer_page = state
        .answers
        .page_for_question(question_id, params.page.unwrap_or(1))
        .await?;
    let answer_ids: Vec<i64> = answer_page.items.iter().map(|a| a.id).collect();
    let answer_comments = state.comments.for_answers(answer_ids).await?;

    let answers = answer_page.map(|answer| {
        let comments = answer_comments
            .iter()
            .filter(|c| c.parent == CommentParent::Answer(answer.id))
            .cloned()
            .collect();
        AnswerView { answer, comments }
    });

    let (jar, notice) = flash::take_notice(jar);
    Ok((
        jar,
        Json(json!({
            "question": question,
            "comments": comments,
            "answers": answers,
            "notice": notice,
        })),
    )
        .into_response())
}

/// GET /question/create - blank form state
async fn create_form_handler(
    State(state): State<QuestionState>,
    jar: CookieJar,
) -> Result<Response, BoardError> {
    state.auth.require_user(&jar).await?;

    let (jar, notice) = flash::take_notice(jar);
    Ok((
        jar,
        Json(json!({
            "values": { "subject": "", "content": "" },
            "errors": {},
            "notice": notice,
        })),
    )
        .into_response())
}

/// POST /question/create
async fn create_handler(
    State(state): State<QuestionState>,
    jar: CookieJar,
    Form(form): Form<QuestionForm>,
) -> Result<Response, BoardError> {
    let user = state.auth.require_user(&jar).await?;
    let id = state
        .questions
        .create(&form.subject, &form.content, user.id)
        .await?;
    Ok(flash::redirect(&detail_path(id)))
}

/// GET /question/modify/:question_id - prefilled form state
async fn modify_form_handler(
    State(state): State<QuestionState>,
    Path(question_id): Path<i64>,
    jar: CookieJar,
) -> Result<Response, BoardError> {
    let user = state.auth.require_user(&jar).await?;
    let question = state.questions.get(question_id).await?;

    if question.user_id != user.id {
        return Ok(flash::redirect_with_notice(
            jar,
            &detail_path(question_id),
            "You do not have permission to modify this post",
        ));
    }

    let (jar, notice) = flash::take_notice(jar);
    Ok((
        jar,
        Json(json!({
            "values": { "subject": question.subject, "content": question.content },
            "errors": {},
            "notice": notice,
        })),
    )
        .into_response())
}

/// POST /question/modify/:question_id
async fn modify_handler(
    State(state): State<QuestionState>,
    Path(question_id): Path<i64>,
    jar: CookieJar,
    Form(form): Form<QuestionForm>,
) -> Result<Response, BoardError> {
    let user = state.auth.require_user(&jar).await?;
    let target = detail_path(question_id);

    match state
        .questions
        .modify(question_id, &form.subject, &form.content, user.id)
        .await
    {
        Ok(()) => Ok(flash::redirect(&target)),
        Err(e) if e.is_soft() => Ok(flash::redirect_with_notice(jar, &target, &e.to_string())),
        Err(e) => Err(e),
    }
}

/// GET /question/delete/:question_id
async fn delete_handler(
    State(state): State<QuestionState>,
    Path(question_id): Path<i64>,
    jar: CookieJar,
) -> Result<Response, BoardError> {
    let user = state.auth.require_user(&jar).await?;

    match state.questions.delete(question_id, user.id).await {
        Ok(()) => Ok(flash::redirect("/question/list")),
        Err(e) if e.is_soft() => Ok(flash::redirect_with_notice(
            jar,
            &detail_path(question_id),
            &e.to_string(),
        )),
        Err(e) => Err(e),
    }
}

/// GET /question/vote/:question_id
async fn vote_handler(
    State(state): State<QuestionState>,
    Path(question_id): Path<i64>,
    jar: CookieJar,
) -> Result<Response, BoardError> {
    let user = state.auth.require_user(&jar).await?;
    let target = detail_path(question_id);

    match state.questions.vote(question_id, user.id).await {
        Ok(()) => Ok(flash::redirect(&target)),
        Err(e) if e.is_soft() => Ok(flash::redirect_with_notice(jar, &target, &e.to_string())),
        Err(e) => Err(e),
    }
}

/// Creates the question router
pub fn create_question_router(state: QuestionState) -> Router {
    Router::new()
        .route("/list", get(list_handler))
        .route("/detail/:question_id", get(detail_handler))
        .route("/create", get(create_form_handler).post(create_handler))
        .route(
            "/modify/:question_id",
            get(modify_form_handler).post(modify_handler),
        )
        .route("/delete/:question_id", get(delete_handler))
        .route("/vote/:question_id", get(vote_handler))
        .with_state(state)
}

// ============================================================================
// Tests
// ============================================================================
