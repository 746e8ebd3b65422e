//! # Answer Module
//!
//! Answers live under a question. Within a detail view they are ordered by
//! vote count descending, then newest first, five per page. Ownership and
//! self-vote rules are the same as for questions; every soft failure
//! redirects back to the enclosing question's detail view.

use crate::auth::AuthService;
use crate::comment::{CommentForm, CommentService};
use crate::db::{BoardStore, SqlValue};
use crate::error::{BoardError, BoardResult, FormErrors};
use crate::flash;
use crate::models::{
    now_text, row_to_answer, Answer, CommentParent, Page, VoteOutcome, WriteOutcome,
};

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Answers per page within a question detail view
pub const ANSWERS_PER_PAGE: u32 = 5;

const ANSWER_COLUMNS: &str = "a.id, a.question_id, a.content, a.user_id, u.username, \
     a.created_at, a.modified_at, \
     (SELECT COUNT(*) FROM answer_voters v WHERE v.answer_id = a.id) AS vote_count";

/// Answer access layer
#[derive(Clone)]
pub struct AnswerService {
    store: Arc<BoardStore>,
}

impl AnswerService {
    pub fn new(store: Arc<BoardStore>) -> Self {
        Self { store }
    }

    /// Create an answer under a question, returning its id. The question
    /// must exist.
    pub async fn create(&self, question_id: i64, content: &str, actor: i64) -> BoardResult<i64> {
        Self::validate(content)?;

        let content = content.to_string();
        let now = now_text();

        let created = self
            .store
            .with_transaction(move |conn| {
                let exists: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM questions WHERE id = ?1",
                        params![question_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_none() {
                    return Ok(None);
                }

                conn.execute(
                    "INSERT INTO answers (question_id, content, user_id, created_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![question_id, content, actor, now],
                )?;
                Ok(Some(conn.last_insert_rowid()))
            })
            .await?;

        match created {
            Some(id) => {
                debug!("Answer {} created on question {} by user {}", id, question_id, actor);
                Ok(id)
            }
            None => Err(BoardError::NotFound("question".to_string())),
        }
    }

    /// One answer by id
    pub async fn get(&self, id: i64) -> BoardResult<Answer> {
        self.store
            .query_one(
                format!(
                    "SELECT {} FROM answers a JOIN users u ON u.id = a.user_id WHERE a.id = ?1",
                    ANSWER_COLUMNS
                ),
                vec![SqlValue::Integer(id)],
                row_to_answer,
            )
            .await?
            .ok_or_else(|| BoardError::NotFound("answer".to_string()))
    }

    /// The id of the question an answer belongs to; redirect targets come
    /// from here.
    pub async fn question_of(&self, id: i64) -> BoardResult<i64> {
        self.store
            .query_one(
                "SELECT question_id FROM answers WHERE id = ?1".to_string(),
                vec![SqlValue::Integer(id)],
                |row| row.get::<_, i64>(0),
            )
            .await?
            .ok_or_else(|| BoardError::NotFound("answer".to_string()))
    }

    /// One page of a question's answers, most-voted first, ties newest
    /// first.
    pub async fn page_for_question(&self, question_id: i64, page: u32) -> BoardResult<Page<Answer>> {
        let page = page.max(1);

        let total = self
            .store
            .count(
                "SELECT COUNT(*) FROM answers WHERE question_id = ?1".to_string(),
                vec![SqlValue::Integer(question_id)],
            )
            .await?;

        let sql = format!(
            "SELECT {} FROM answers a JOIN users u ON u.id = a.user_id \
             WHERE a.question_id = ?1 \
             ORDER BY vote_count DESC, a.created_at DESC, a.id DESC \
             LIMIT ?2 OFFSET ?3",
            ANSWER_COLUMNS
        );
        let items = self
            .store
            .query(
                sql,
                vec![
                    SqlValue::Integer(question_id),
                    SqlValue::Integer(ANSWERS_PER_PAGE as i64),
                    SqlValue::Integer(((page - 1) * ANSWERS_PER_PAGE) as i64),
                ],
                row_to_answer,
            )
            .await?;

        Ok(Page::new(items, page, ANSWERS_PER_PAGE, total))
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
                        "SELECT user_id FROM answers WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                match owner {
                    None => Ok(WriteOutcome::Missing),
                    Some(owner) if owner != actor => Ok(WriteOutcome::NotOwner),
                    Some(_) => {
                        conn.execute(
                            "UPDATE answers SET content = ?1, modified_at = ?2 WHERE id = ?3",
                            params![content, now, id],
                        )?;
                        Ok(WriteOutcome::Done)
                    }
                }
            })
            .await?;

        match outcome {
            WriteOutcome::Done => Ok(()),
            WriteOutcome::Missing => Err(BoardError::NotFound("answer".to_string())),
            WriteOutcome::NotOwner => Err(BoardError::Forbidden(
                "You do not have permission to modify this post".to_string(),
            )),
        }
    }

    /// Delete an answer; its comments and voter rows cascade
    pub async fn delete(&self, id: i64, actor: i64) -> BoardResult<()> {
        let outcome = self
            .store
            .with_transaction(move |conn| {
                let owner: Option<i64> = conn
                    .query_row(
                        "SELECT user_id FROM answers WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                match owner {
                    None => Ok(WriteOutcome::Missing),
                    Some(owner) if owner != actor => Ok(WriteOutcome::NotOwner),
                    Some(_) => {
                        conn.execute("DELETE FROM answers WHERE id = ?1", params![id])?;
                        Ok(WriteOutcome::Done)
                    }
                }
            })
            .await?;

        match outcome {
            WriteOutcome::Done => Ok(()),
            WriteOutcome::Missing => Err(BoardError::NotFound("answer".to_string())),
            WriteOutcome::NotOwner => Err(BoardError::Forbidden(
                "You do not have permission to delete this post".to_string(),
            )),
        }
    }

    /// Add `actor` to the answer's voter set. Same rules as question votes;
    /// the count shown is always the voter-set size.
    pub async fn vote(&self, id: i64, actor: i64) -> BoardResult<()> {
        let outcome = self
            .store
            .with_transaction(move |conn| {
                let owner: Option<i64> = conn
                    .query_row(
                        "SELECT user_id FROM answers WHERE id = ?1",
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
                        "SELECT 1 FROM answer_voters WHERE answer_id = ?1 AND user_id = ?2",
                        params![id, actor],
                        |row| row.get(0),
                    )
                    .optional()?;
                if voted.is_some() {
                    return Ok(VoteOutcome::Duplicate);
                }

                conn.execute(
                    "INSERT INTO answer_voters (answer_id, user_id) VALUES (?1, ?2)",
                    params![id, actor],
                )?;
                Ok(VoteOutcome::Voted)
            })
            .await?;

        match outcome {
            VoteOutcome::Voted => Ok(()),
            VoteOutcome::Missing => Err(BoardError::NotFound("answer".to_string())),
            VoteOutcome::OwnPost => Err(BoardError::SelfVote),
            VoteOutcome::Duplicate => Err(BoardError::AlreadyVoted),
        }
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

/// App state for the answer routes
#[derive(Clone)]
pub struct AnswerState {
    pub answers: AnswerService,
    pub comments: CommentService,
    pub auth: AuthService,
}

#[derive(Debug, Deserialize)]
pub struct AnswerForm {
    #[serde(default)]
    pub content: String,
}

fn detail_path(question_id: i64) -> String {
    format!("/question/detail/{}", question_id)
}

/// POST /answer/create/:question_id
async fn create_handler(
    State(state): State<AnswerState>,
    Path(question_id): Path<i64>,
    jar: CookieJar,
    Form(form): Form<AnswerForm>,
) -> Result<Response, BoardError> {
    let user = state.auth.require_user(&jar).await?;
    state
        .answers
        .create(question_id, &form.content, user.id)
        .await?;
    Ok(flash::redirect(&detail_path(question_id)))
}

/// GET /answer/modify/:answer_id - prefilled form state
async fn modify_form_handler(
    State(state): State<AnswerState>,
    Path(answer_id): Path<i64>,
    jar: CookieJar,
) -> Result<Response, BoardError> {
    let user = state.auth.require_user(&jar).await?;
    let answer = state.answers.get(answer_id).await?;

    if answer.user_id != user.id {
        return Ok(flash::redirect_with_notice(
            jar,
            &detail_path(answer.question_id),
            "You do not have permission to modify this post",
        ));
    }

    let (jar, notice) = flash::take_notice(jar);
    Ok((
        jar,
        Json(json!({
            "values": { "content": answer.content },
            "errors": {},
            "notice": notice,
        })),
    )
        .into_response())
}

/// POST /answer/modify/:answer_id
async fn modify_handler(
    State(state): State<AnswerState>,
    Path(answer_id): Path<i64>,
    jar: CookieJar,
    Form(form): Form<AnswerForm>,
) -> Result<Response, BoardError> {
    let user = state.auth.require_user(&jar).await?;
    let target = detail_path(state.answers.question_of(answer_id).await?);

    match state.answers.modify(answer_id, &form.content, user.id).await {
        Ok(()) => Ok(flash::redirect(&target)),
        Err(e) if e.is_soft() => Ok(flash::redirect_with_notice(jar, &target, &e.to_string())),
        Err(e) => Err(e),
    }
}

/// GET /answer/delete/:answer_id
async fn delete_handler(
    State(state): State<AnswerState>,
    Path(answer_id): Path<i64>,
    jar: CookieJar,
) -> Result<Response, BoardError> {
    let user = state.auth.require_user(&jar).await?;
    let target = detail_path(state.answers.question_of(answer_id).await?);

    match state.answers.delete(answer_id, user.id).await {
        Ok(()) => Ok(flash::redirect(&target)),
        Err(e) if e.is_soft() => Ok(flash::redirect_with_notice(jar, &target, &e.to_string())),
        Err(e) => Err(e),
    }
}

/// GET /answer/vote/:answer_id
async fn vote_handler(
    State(state): State<AnswerState>,
    Path(answer_id): Path<i64>,
    jar: CookieJar,
) -> Result<Response, BoardError> {
    let user = state.auth.require_user(&jar).await?;
    let target = detail_path(state.answers.question_of(answer_id).await?);

    match state.answers.vote(answer_id, user.id).await {
        Ok(()) => Ok(flash::redirect(&target)),
        Err(e) if e.is_soft() => Ok(flash::redirect_with_notice(jar, &target, &e.to_string())),
        Err(e) => Err(e),
    }
}

/// POST /answer/comment/:answer_id
async fn comment_handler(
    State(state): State<AnswerState>,
    Path(answer_id): Path<i64>,
    jar: CookieJar,
    Form(form): Form<CommentForm>,
) -> Result<Response, BoardError> {
    let user = state.auth.require_user(&jar).await?;
    let question_id = state.answers.question_of(answer_id).await?;

    state
        .comments
        .create(CommentParent::Answer(answer_id), &form.content, user.id)
        .await?;
    Ok(flash::redirect(&detail_path(question_id)))
}

/// Creates the answer router
pub fn create_answer_router(state: AnswerState) -> Router {
    Router::new()
        .route("/create/:question_id", post(create_handler))
        .route(
            "/modify/:answer_id",
            get(modify_form_handler).post(modify_handler),
        )
        .route("/delete/:answer_id", get(delete_handler))
        .route("/vote/:answer_id", get(vote_handler))
        .route("/comment/:answer_id", post(comment_handler))
        .with_state(state)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthService, SignupForm, SESSION_COOKIE};
    use crate::comment::CommentService;
    use crate::question::QuestionService;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    async fn test_store() -> Arc<BoardStore> {
        let store = Arc::new(BoardStore::in_memory().await.unwrap());
        store.initialize_schema().await.unwrap();
        store
    }

    async fn create_user(store: &Arc<BoardStore>, name: &str) -> i64 {
        store
            .insert(
                "INSERT INTO users (username, password_hash, email, created_at) \
                 VALUES (?1, ?2, ?3, ?4)"
                    .to_string(),
                vec![
                    SqlValue::Text(name.to_string()),
                    SqlValue::Text("hash".to_string()),
                    SqlValue::Text(format!("{}@example.com", name)),
                    SqlValue::Text(now_text()),
                ],
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_requires_existing_question() {
        let store = test_store().await;
        let bob = create_user(&store, "bob").await;
        let service = AnswerService::new(Arc::clone(&store));

        let err = service.create(99, "hello", bob).await.unwrap_err();
        assert!(matches!(err, BoardError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_page_orders_by_votes_then_recency() {
        let store = test_store().await;
        let alice = create_user(&store, "alice").await;
        let bob = create_user(&store, "bob").await;
        let carol = create_user(&store, "carol").await;
        let dave = create_user(&store, "dave").await;
        let questions = QuestionService::new(Arc::clone(&store));
        let answers = AnswerService::new(Arc::clone(&store));

        let qid = questions.create("Q", "C", alice).await.unwrap();
        let a1 = answers.create(qid, "first", bob).await.unwrap();
        let a2 = answers.create(qid, "second", bob).await.unwrap();
        let a3 = answers.create(qid, "third", bob).await.unwrap();

        answers.vote(a2, carol).await.unwrap();
        answers.vote(a2, dave).await.unwrap();
        answers.vote(a3, carol).await.unwrap();

        let page = answers.page_for_question(qid, 1).await.unwrap();
        let ids: Vec<i64> = page.items.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![a2, a3, a1]);
        assert_eq!(page.items[0].vote_count, 2);

        // Unvoted answers tie on count and fall back to newest first.
        let a4 = answers.create(qid, "fourth", bob).await.unwrap();
        let page = answers.page_for_question(qid, 1).await.unwrap();
        let ids: Vec<i64> = page.items.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![a2, a3, a4, a1]);
    }

    #[tokio::test]
    async fn test_pagination_is_five_per_page() {
        let store = test_store().await;
        let alice = create_user(&store, "alice").await;
        let bob = create_user(&store, "bob").await;
        let questions = QuestionService::new(Arc::clone(&store));
        let answers = AnswerService::new(Arc::clone(&store));

        let qid = questions.create("Q", "C", alice).await.unwrap();
        for i in 0..7 {
            answers.create(qid, &format!("answer {}", i), bob).await.unwrap();
        }

        let page1 = answers.page_for_question(qid, 1).await.unwrap();
        assert_eq!(page1.items.len(), 5);
        assert_eq!(page1.total, 7);
        assert_eq!(page1.pages, 2);
        assert!(page1.has_next);

        let page2 = answers.page_for_question(qid, 2).await.unwrap();
        assert_eq!(page2.items.len(), 2);
        assert!(page2.has_prev);
    }

    // The canonical vote walk-through: the owner is rejected, a third user
    // votes once, and a repeat vote leaves the set and the count unchanged.
    #[tokio::test]
    async fn test_vote_walkthrough() {
        let store = test_store().await;
        let alice = create_user(&store, "alice").await;
        let bob = create_user(&store, "bob").await;
        let carol = create_user(&store, "carol").await;
        let questions = QuestionService::new(Arc::clone(&store));
        let answers = AnswerService::new(Arc::clone(&store));

        let qid = questions.create("Q1", "C1", alice).await.unwrap();
        assert_eq!(questions.get(qid).await.unwrap().answer_count, 0);

        let aid = answers.create(qid, "A1", bob).await.unwrap();
        assert_eq!(questions.get(qid).await.unwrap().answer_count, 1);
        let page = answers.page_for_question(qid, 1).await.unwrap();
        assert_eq!(page.items[0].id, aid);

        // The answer's owner cannot vote on it.
        let err = answers.vote(aid, bob).await.unwrap_err();
        assert!(matches!(err, BoardError::SelfVote));
        assert_eq!(answers.get(aid).await.unwrap().vote_count, 0);

        answers.vote(aid, carol).await.unwrap();
        assert_eq!(answers.get(aid).await.unwrap().vote_count, 1);

        let err = answers.vote(aid, carol).await.unwrap_err();
        assert!(matches!(err, BoardError::AlreadyVoted));
        assert_eq!(answers.get(aid).await.unwrap().vote_count, 1);

        let voters = store
            .count(
                "SELECT COUNT(*) FROM answer_voters WHERE answer_id = ?1".to_string(),
                vec![SqlValue::Integer(aid)],
            )
            .await
            .unwrap();
        assert_eq!(voters, 1);
    }

    #[tokio::test]
    async fn test_modify_and_delete_are_owner_gated() {
        let store = test_store().await;
        let alice = create_user(&store, "alice").await;
        let bob = create_user(&store, "bob").await;
        let mallory = create_user(&store, "mallory").await;
        let questions = QuestionService::new(Arc::clone(&store));
        let answers = AnswerService::new(Arc::clone(&store));

        let qid = questions.create("Q", "C", alice).await.unwrap();
        let aid = answers.create(qid, "original", bob).await.unwrap();

        let err = answers.modify(aid, "changed", mallory).await.unwrap_err();
        assert!(matches!(err, BoardError::Forbidden(_)));
        assert_eq!(answers.get(aid).await.unwrap().content, "original");

        let err = answers.delete(aid, mallory).await.unwrap_err();
        assert!(matches!(err, BoardError::Forbidden(_)));
        assert!(answers.get(aid).await.is_ok());

        answers.modify(aid, "edited", bob).await.unwrap();
        let answer = answers.get(aid).await.unwrap();
        assert_eq!(answer.content, "edited");
        assert!(answer.modified_at.is_some());

        answers.delete(aid, bob).await.unwrap();
        assert!(matches!(
            answers.get(aid).await.unwrap_err(),
            BoardError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_cascades_answer_comments() {
        let store = test_store().await;
        let alice = create_user(&store, "alice").await;
        let bob = create_user(&store, "bob").await;
        let questions = QuestionService::new(Arc::clone(&store));
        let answers = AnswerService::new(Arc::clone(&store));
        let comments = CommentService::new(Arc::clone(&store));

        let qid = questions.create("Q", "C", alice).await.unwrap();
        let aid = answers.create(qid, "A", bob).await.unwrap();
        comments
            .create(CommentParent::Answer(aid), "nice", alice)
            .await
            .unwrap();

        answers.delete(aid, bob).await.unwrap();

        let remaining = store
            .count("SELECT COUNT(*) FROM comments".to_string(), vec![])
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_vote_route_redirects_to_question() {
        let store = test_store().await;
        let auth = AuthService::new(Arc::clone(&store));
        let questions = QuestionService::new(Arc::clone(&store));
        let answers = AnswerService::new(Arc::clone(&store));
        let comments = CommentService::new(Arc::clone(&store));
        let router = create_answer_router(AnswerState {
            answers: answers.clone(),
            comments,
            auth: auth.clone(),
        });

        let (alice, _) = auth
            .signup(SignupForm {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                password1: "password123".to_string(),
                password2: "password123".to_string(),
            })
            .await
            .unwrap();
        let (_bob, bob_token) = auth
            .signup(SignupForm {
                username: "bob".to_string(),
                email: "bob@example.com".to_string(),
                password1: "password123".to_string(),
                password2: "password123".to_string(),
            })
            .await
            .unwrap();

        let qid = questions.create("Q", "C", alice.id).await.unwrap();
        let aid = answers.create(qid, "A", alice.id).await.unwrap();

        let request = Request::builder()
            .method("GET")
            .uri(format!("/vote/{}", aid))
            .header(header::COOKIE, format!("{}={}", SESSION_COOKIE, bob_token))
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            &format!("/question/detail/{}", qid)
        );
        assert_eq!(answers.get(aid).await.unwrap().vote_count, 1);
    }
}
