mod client;
mod models;

use url::Url;

pub use client::{
    GitlabClient, GitlabError, GitlabResult, GraphqlErrorExtensions, GraphqlResponseError,
};
pub use models::{
    Commit, EmailConnection, EmailNode, Event, FullProfile, Group, PageInfo, PartialProfile,
    Project, UserGroups,
};

/// Resolve a possibly relative URL (GitLab serves avatars as `/uploads/...`)
/// against `base`. Absolute URLs are returned normalized, unparseable input
/// is returned as-is.
pub fn ensure_absolute_url(possibly_relative: &str, base: &Url) -> String {
    if let Ok(url) = Url::parse(possibly_relative) {
        return url.into();
    }
    match base.join(possibly_relative) {
        Ok(url) => url.into(),
        Err(_) => possibly_relative.to_owned(),
    }
}
