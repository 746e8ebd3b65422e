//! # askboard
//!
//! A community question-and-answer bulletin board.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default settings (askboard.db, port 3000)
//! askboard
//!
//! # Custom database and port
//! askboard --db board.db --port 8080
//!
//! # In-memory mode (for testing)
//! askboard --memory
//! ```

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use askboard::answer::{create_answer_router, AnswerService, AnswerState};
use askboard::auth::{create_auth_router, AuthService, AuthState};
use askboard::comment::{create_comment_router, CommentService, CommentState};
use askboard::db::BoardStore;
use askboard::flash;
use askboard::question::{create_question_router, QuestionService, QuestionState};

/// CLI arguments
struct Args {
    /// Database file path
    db_path: String,
    /// Server port
    port: u16,
    /// Use in-memory database
    in_memory: bool,
    /// Host to bind to
    host: String,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            db_path: "askboard.db".to_string(),
            port: 3000,
            in_memory: false,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl Args {
    fn from_env() -> Self {
        let mut args = Args::default();
        let env_args: Vec<String> = env::args().collect();
        let mut i = 1;

        while i < env_args.len() {
            match env_args[i].as_str() {
                "--db" | "-d" => {
                    if i + 1 < env_args.len() {
                        args.db_path = env_args[i + 1].clone();
                        i += 1;
                    }
                }
                "--port" | "-p" => {
                    if i + 1 < env_args.len() {
                        args.port = env_args[i + 1].parse().unwrap_or(3000);
                        i += 1;
                    }
                }
                "--host" | "-h" => {
                    if i + 1 < env_args.len() {
                        args.host = env_args[i + 1].clone();
                        i += 1;
                    }
                }
                "--memory" | "-m" => {
                    args.in_memory = true;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                _ => {}
            }
            i += 1;
        }

        // Environment variable overrides
        if let Ok(port) = env::var("ASKBOARD_PORT") {
            args.port = port.parse().unwrap_or(args.port);
        }
        if let Ok(db) = env::var("ASKBOARD_PATH") {
            args.db_path = db;
        }
        if let Ok(host) = env::var("ASKBOARD_HOST") {
            args.host = host;
        }
        if env::var("ASKBOARD_MEMORY").is_ok() {
            args.in_memory = true;
        }

        args
    }
}

fn print_help() {
    println!(
        r#"
askboard - Community Q&A Bulletin Board

USAGE:
    askboard [OPTIONS]

OPTIONS:
    -d, --db <PATH>      Database file path [default: askboard.db]
    -p, --port <PORT>    Server port [default: 3000]
    -h, --host <HOST>    Host to bind to [default: 0.0.0.0]
    -m, --memory         Use in-memory database
        --help           Print this help message

ENVIRONMENT VARIABLES:
    ASKBOARD_PORT        Server port
    ASKBOARD_PATH        Database file path
    ASKBOARD_HOST        Host to bind to
    ASKBOARD_MEMORY      Set to use in-memory database

ROUTES:
    GET       /question/list                    Paginated, searchable listing
    GET       /question/detail/:id              Question with its answers
    GET,POST  /question/create                  Post a question
    GET,POST  /question/modify/:id              Edit a question (owner)
    GET       /question/delete/:id              Delete a question (owner)
    GET       /question/vote/:id                Upvote a question
    POST      /answer/create/:question_id       Post an answer
    GET,POST  /answer/modify/:id                Edit an answer (owner)
    GET       /answer/delete/:id                Delete an answer (owner)
    GET       /answer/vote/:id                  Upvote an answer
    POST      /answer/comment/:answer_id        Comment on an answer
    POST      /comment/create/question/:id      Comment on a question
    POST      /comment/create/answer/:id        Comment on an answer
    POST      /comment/modify/:id               Edit a comment (owner)
    GET       /comment/delete/:id               Delete a comment (owner)
    GET,POST  /auth/signup                      Register
    GET,POST  /auth/login                       Sign in
    GET       /auth/logout                      Sign out
    GET       /health                           Health check
"#
    );
}

fn print_banner(port: u16, in_memory: bool, db_path: &str) {
    println!(
        r#"
╔══════════════════════════════════════════════════╗
║  askboard - community Q&A bulletin board         ║
╠══════════════════════════════════════════════════╣
║  API:      http://localhost:{:<5}                ║
║  Database: {:<36}  ║
╚══════════════════════════════════════════════════╝
"#,
        port,
        if in_memory { ":memory:" } else { db_path }
    );
}

/// GET / - the board lives at /question/list
async fn root_handler() -> impl IntoResponse {
    flash::redirect("/question/list")
}

/// GET /health
async fn health_handler(State(store): State<Arc<BoardStore>>) -> impl IntoResponse {
    match store
        .query("SELECT 1".to_string(), vec![], |row| row.get::<_, i64>(0))
        .await
    {
        Ok(_) => Json(json!({
            "status": "healthy",
            "database": "connected"
        })),
        Err(e) => Json(json!({
            "status": "unhealthy",
            "database": "disconnected",
            "error": e.to_string()
        })),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    // Parse arguments
    let args = Args::from_env();

    // Initialize database
    let store = if args.in_memory {
        info!("Using in-memory database");
        Arc::new(BoardStore::in_memory().await?)
    } else {
        info!("Using database file: {}", args.db_path);
        Arc::new(BoardStore::new(&args.db_path).await?)
    };
    store.initialize_schema().await?;

    // Services share the store
    let auth = AuthService::new(Arc::clone(&store));
    let questions = QuestionService::new(Arc::clone(&store));
    let answers = AnswerService::new(Arc::clone(&store));
    let comments = CommentService::new(Arc::clone(&store));

    // Build router, one sub-router per view module
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .with_state(Arc::clone(&store))
        .nest(
            "/auth",
            create_auth_router(AuthState { auth: auth.clone() }),
        )
        .nest(
            "/question",
            create_question_router(QuestionState {
                questions,
                answers: answers.clone(),
                comments: comments.clone(),
                auth: auth.clone(),
            }),
        )
        .nest(
            "/answer",
            create_answer_router(AnswerState {
                answers,
                comments: comments.clone(),
                auth: auth.clone(),
            }),
        )
        .nest("/comment", create_comment_router(CommentState { comments, auth }))
        .layer(TraceLayer::new_for_http());

    // Print banner
    print_banner(args.port, args.in_memory, &args.db_path);

    // Start server
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    info!("🚀 askboard listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C signal handler");
        })
        .await?;

    Ok(())
}
