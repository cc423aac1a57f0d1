//! HTTP 接口：前端通过这些路由调用后端。

pub mod config;
pub mod llm;
pub mod page;
pub mod server;
