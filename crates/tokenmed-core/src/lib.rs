//! Token lifecycle and retry core for the token-mediated GitLab client,
//! shared by the `tokenmed` front-end.

pub mod auth;
pub mod config;
pub mod gitlab;
pub mod services;
