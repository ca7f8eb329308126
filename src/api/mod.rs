//! HTTP API Module
//!
//! Thin REST layer over [`crate::gateway::Gateway`].

mod http;

pub use http::{HttpServer, TOKEN_HEADER};
