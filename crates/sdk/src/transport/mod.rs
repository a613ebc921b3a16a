//! Transport layer for the directory client.

pub mod http;

pub use http::HttpTransport;
