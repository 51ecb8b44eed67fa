//! Wire types for the console's HTTP/JSON API.
pub mod http;
