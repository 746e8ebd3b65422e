//! # askboard
//!
//! A community question-and-answer bulletin board served over HTTP.
//!
//! ## Core Components
//!
//! - **Board-Store**: the SQLite file behind every service, WAL mode,
//!   engine-enforced cascade deletes
//! - **Auth**: accounts, Argon2 password hashing, cookie sessions and the
//!   per-request session gate
//! - **Question / Answer / Comment**: the access layers and their routes;
//!   every mutation is ownership-gated and runs in one transaction
//! - **Flash**: one-shot notice cookies carrying soft-failure messages
//!   across redirects

pub mod answer;
pub mod auth;
pub mod comment;
pub mod db;
pub mod error;
pub mod flash;
pub mod models;
pub mod question;

pub use error::{BoardError, BoardResult};
