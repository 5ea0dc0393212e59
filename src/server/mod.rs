//! HTTP 层
//!
//! - `routes` - axum 路由和错误响应
//! - `sse` - 进度事件的编码和解码

pub mod routes;
pub mod sse;

pub use routes::router;
pub use sse::{parse_sse_body, SseDecoder, DONE_SENTINEL};
