pub mod api;
pub mod http;
pub mod sse;
pub mod ws;

pub use http::HttpServer;
