//! Domain entities, row mapping and pagination.
//!
//! Entities carry the denormalized view fields (author username, derived
//! vote counts) that the listing and detail routes render. Vote counts are
//! always derived from voter-set size; no counter column exists.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use serde::Serialize;

/// A registered account. Identity is immutable once created.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// A top-level post
#[derive(Debug, Clone, Serialize)]
pub struct Question {
    pub id: i64,
    pub subject: String,
    pub content: String,
    pub user_id: i64,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: Option<DateTime<Utc>>,
    pub vote_count: i64,
    pub answer_count: i64,
}

/// A reply to a question
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub id: i64,
    pub question_id: i64,
    pub content: String,
    pub user_id: i64,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: Option<DateTime<Utc>>,
    pub vote_count: i64,
}

/// A reply to a question or an answer
#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub id: i64,
    pub content: String,
    pub user_id: i64,
    pub author: String,
    pub parent: CommentParent,
    pub created_at: DateTime<Utc>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// The one parent a comment attaches to.
///
/// At the storage edge this maps to two nullable foreign-key columns guarded
/// by a CHECK constraint; in the model the variant makes "exactly one
/// parent" structural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CommentParent {
    Question(i64),
    Answer(i64),
}

impl CommentParent {
    /// Rebuild the variant from the two nullable columns. None when the row
    /// violates the exactly-one-parent constraint.
    pub fn from_columns(question_id: Option<i64>, answer_id: Option<i64>) -> Option<Self> {
        match (question_id, answer_id) {
            (Some(id), None) => Some(CommentParent::Question(id)),
            (None, Some(id)) => Some(CommentParent::Answer(id)),
            _ => None,
        }
    }

    /// The (question_id, answer_id) column pair for inserts
    pub fn to_columns(self) -> (Option<i64>, Option<i64>) {
        match self {
            CommentParent::Question(id) => (Some(id), None),
            CommentParent::Answer(id) => (None, Some(id)),
        }
    }

    pub fn entity(self) -> &'static str {
        match self {
            CommentParent::Question(_) => "question",
            CommentParent::Answer(_) => "answer",
        }
    }
}

/// One page of a listing, with the metadata a pager renders
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub pages: u32,
    pub has_prev: bool,
    pub has_next: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, per_page: u32, total: u64) -> Self {
        let pages = ((total + per_page as u64 - 1) / per_page as u64) as u32;
        Self {
            has_prev: page > 1,
            has_next: page < pages,
            items,
            page,
            per_page,
            total,
            pages,
        }
    }

    /// Map the items, keeping the page metadata
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
            pages: self.pages,
            has_prev: self.has_prev,
            has_next: self.has_next,
        }
    }
}

/// Outcome of an ownership-gated write, resolved inside the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Done,
    Missing,
    NotOwner,
}

/// Outcome of a vote attempt, resolved inside the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Voted,
    Missing,
    OwnPost,
    Duplicate,
}

/// Fixed-width RFC 3339 text, so string comparison in SQL matches
/// chronological order.
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The current instant, in storage form
pub fn now_text() -> String {
    timestamp(Utc::now())
}

// Row mappers. Column order is fixed by the SELECT lists in the services.

pub fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        created_at: row.get(3)?,
    })
}

pub fn row_to_question(row: &Row<'_>) -> rusqlite::Result<Question> {
    Ok(Question {
        id: row.get(0)?,
        subject: row.get(1)?,
        content: row.get(2)?,
        user_id: row.get(3)?,
        author: row.get(4)?,
        created_at: row.get(5)?,
        modified_at: row.get(6)?,
        vote_count: row.get(7)?,
        answer_count: row.get(8)?,
    })
}

pub fn row_to_answer(row: &Row<'_>) -> rusqlite::Result<Answer> {
    Ok(Answer {
        id: row.get(0)?,
        question_id: row.get(1)?,
        content: row.get(2)?,
        user_id: row.get(3)?,
        author: row.get(4)?,
        created_at: row.get(5)?,
        modified_at: row.get(6)?,
        vote_count: row.get(7)?,
    })
}

pub fn row_to_comment(row: &Row<'_>) -> rusqlite::Result<Comment> {
    let question_id: Option<i64> = row.get(4)?;
    let answer_id: Option<i64> = row.get(5)?;
    let parent = CommentParent::from_columns(question_id, answer_id).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(4, "comment parent".to_string(), rusqlite::types::Type::Null)
    })?;

    Ok(Comment {
        id: row.get(0)?,
        content: row.get(1)?,
        user_id: row.get(2)?,
        author: row.get(3)?,
        parent,
        created_at: row.get(6)?,
        modified_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_comment_parent_round_trip() {
        let parent = CommentParent::from_columns(Some(3), None).unwrap();
        assert_eq!(parent, CommentParent::Question(3));
        assert_eq!(parent.to_columns(), (Some(3), None));

        let parent = CommentParent::from_columns(None, Some(7)).unwrap();
        assert_eq!(parent, CommentParent::Answer(7));
        assert_eq!(parent.to_columns(), (None, Some(7)));
    }

    #[test]
    fn test_comment_parent_rejects_bad_columns() {
        assert!(CommentParent::from_columns(None, None).is_none());
        assert!(CommentParent::from_columns(Some(1), Some(2)).is_none());
    }

    #[test]
    fn test_page_math() {
        let page = Page::new(vec![1, 2, 3], 1, 10, 23);
        assert_eq!(page.pages, 3);
        assert!(!page.has_prev);
        assert!(page.has_next);

        let page = Page::new(vec![1], 3, 10, 23);
        assert!(page.has_prev);
        assert!(!page.has_next);

        let page = Page::new(Vec::<i64>::new(), 1, 10, 0);
        assert_eq!(page.pages, 0);
        assert!(!page.has_next);
    }

    #[test]
    fn test_timestamp_is_fixed_width() {
        let a = timestamp(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap());
        let b = timestamp(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 6).unwrap());
        assert_eq!(a.len(), b.len());
        assert!(a.ends_with('Z'));
        assert!(a < b);
    }
}
