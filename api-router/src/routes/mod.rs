pub mod chat;
pub mod documents;
pub mod health;
pub mod ingest;
pub mod liveness;
pub mod readiness;
pub mod search;
pub mod sessions;
