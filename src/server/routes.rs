//! HTTP 路由
//!
//! | 方法 | 路径 | 说明 |
//! |---|---|---|
//! | POST | `/api/clone` | 开始克隆，返回事件流 |
//! | GET | `/api/clones` | 历史记录分页 |
//! | GET | `/api/clones/:id` | 克隆详情 |
//! | GET | `/api/clones/:id/files` | 生成的文件 |
//! | GET | `/api/preview/:id` | 预览 |
//! | POST | `/api/sandbox/:id/end` | 结束沙箱 |
//! | POST | `/api/sandbox/:id/beacon` | 页面关闭时结束沙箱 |

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::{ClonePage, CloneRecord, GeneratedFile};
use crate::orchestrator::{App, Preview};
use crate::server::sse::{done_event, to_sse_event};

const MAX_PER_PAGE: usize = 100;

/// 构建路由
pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/clone", post(start_clone))
        .route("/api/clones", get(list_clones))
        .route("/api/clones/:id", get(clone_detail))
        .route("/api/clones/:id/files", get(clone_files))
        .route("/api/preview/:id", get(preview))
        .route("/api/sandbox/:id/end", post(end_sandbox))
        .route("/api/sandbox/:id/beacon", post(beacon))
        .with_state(app)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!("请求失败: {}", self);
        }
        (status, Json(json!({ "message": self.user_message() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct CloneRequest {
    url: String,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_per_page")]
    per_page: usize,
}

fn default_page() -> usize {
    1
}

fn default_per_page() -> usize {
    20
}

async fn index() -> Html<&'static str> {
    Html(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>site-cloner</title></head>\
         <body><h1>site-cloner</h1>\
         <p>POST /api/clone {\"url\": \"example.com\"} 开始克隆（SSE 事件流）</p>\
         <p>GET /api/clones 查看历史记录</p></body></html>",
    )
}

async fn start_clone(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Json(body): Json<CloneRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let token = bearer_token(&headers);
    let handle = app.start_clone(&body.url, token).await?;
    info!("[克隆 {}] 事件流已建立", crate::models::short_id(&handle.clone_id));

    let events = handle
        .events
        .into_stream()
        .map(|event| Ok(to_sse_event(&event)))
        .chain(stream::once(async { Ok(done_event()) }));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn list_clones(
    State(app): State<Arc<App>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ClonePage>, AppError> {
    let per_page = query.per_page.clamp(1, MAX_PER_PAGE);
    Ok(Json(app.list_clones(query.page, per_page).await?))
}

async fn clone_detail(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Json<CloneRecord>, AppError> {
    Ok(Json(app.clone_detail(&id).await?))
}

async fn clone_files(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<GeneratedFile>>, AppError> {
    Ok(Json(app.clone_files(&id).await?))
}

async fn preview(State(app): State<Arc<App>>, Path(id): Path<String>) -> Result<Response, AppError> {
    Ok(match app.preview(&id).await? {
        Preview::Redirect(url) => Redirect::temporary(&url).into_response(),
        Preview::Html(page) => Html(page).into_response(),
    })
}

async fn end_sandbox(State(app): State<Arc<App>>, Path(id): Path<String>) -> Json<serde_json::Value> {
    let outcome = app.end_sandbox(&id).await;
    Json(json!({ "ok": true, "outcome": format!("{:?}", outcome) }))
}

async fn beacon(State(app): State<Arc<App>>, Path(id): Path<String>) -> StatusCode {
    app.beacon(&id).await;
    StatusCode::NO_CONTENT
}

/// `Authorization: Bearer <token>`
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_page_query_defaults() {
        let query: PageQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.page, 1);
        assert_eq!(query.per_page, 20);
    }

    #[test]
    fn test_error_response_status() {
        let response = AppError::NotFound {
            what: "克隆记录 x".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::InvalidUrl {
            input: "ftp://x".to_string(),
            reason: "scheme".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
