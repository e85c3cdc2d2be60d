//! HTTP front end for multipart upload orchestration
//!
//! Routes:
//! - `GET /health`
//! - `POST /s3/multipart/{operation}` with a JSON body
//! - `PUT /parts/{key}?...` presigned part uploads
//! - `GET /objects/{key}` completed objects

pub mod config;
pub mod handlers;
pub mod server;

pub use config::ServerArgs;
pub use server::{serve, AppState};
