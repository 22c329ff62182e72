pub mod auth;
pub mod blobs;
pub mod documents;
pub mod middleware;
