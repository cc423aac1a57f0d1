use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::book::{Language, BOOK_METADATA, BOOK_STRUCTURE};
use crate::commands::{llm, page};
use crate::models::{BookResponse, QuestionsResponse};
use crate::AppState;

/// 构建全部路由
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(page::landing_handler))
        .route("/healthz", get(healthz_handler))
        .route("/api/book", get(book_handler))
        .route("/api/questions", get(questions_handler))
        .route("/api/chat", post(llm::chat_handler))
        .route("/api/chat/stop", post(llm::stop_handler))
        .with_state(state)
}

async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// 书籍元数据与目录
async fn book_handler() -> Json<BookResponse> {
    Json(BookResponse {
        metadata: &BOOK_METADATA,
        structure: &BOOK_STRUCTURE,
    })
}

#[derive(Deserialize)]
pub struct QuestionsQuery {
    pub lang: Option<String>,
}

/// 指定语言的推荐问题，未知语言回退到葡萄牙语
async fn questions_handler(Query(query): Query<QuestionsQuery>) -> Json<QuestionsResponse> {
    let lang = Language::from_query(query.lang.as_deref());
    Json(QuestionsResponse {
        lang,
        placeholder: lang.placeholder(),
        questions: lang.suggested_questions(),
    })
}

/// 启动 HTTP 服务，直到收到 Ctrl-C
pub async fn serve(state: AppState) -> Result<(), String> {
    let bind_addr = state.config.bind_addr.clone();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| format!("bind {bind_addr} failed: {e}"))?;
    info!("book-assistant listening on {bind_addr}");

    let streams = state.streams.clone();
    let app = build_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for shutdown signal: {e}");
                return;
            }
            // 正在进行的流不会自己结束，关闭前全部终止
            let pending = streams.0.len();
            for entry in streams.0.iter() {
                entry.value().task.abort();
            }
            streams.0.clear();
            info!(pending, "shutting down");
        })
        .await
        .map_err(|e| format!("server failed: {e}"))
}
