use std::sync::Arc;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::auth::{DownstreamFailure, TokenStore};
use crate::config::GitlabEndpoints;

use super::models::{
    Commit, Event, FullProfile, Group, PageInfo, PartialProfile, Project, UserGroups,
};

const USER_AGENT: &str = "tokenmed/0.1.0";

/// Errors returned by the GitLab resource API client.
#[derive(Debug, Error)]
pub enum GitlabError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("GitLab rejected the request as malformed")]
    BadRequest,
    #[error("authentication for GitLab API request failed")]
    Unauthorized,
    #[error("HTTP status {status} body: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("GraphQL returned errors: {0:?}")]
    ResponseErrors(Vec<GraphqlResponseError>),
    #[error("failed to deserialize response: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("missing data payload in response")]
    MissingData,
}

impl DownstreamFailure for GitlabError {
    fn is_auth_failure(&self) -> bool {
        matches!(self, GitlabError::Unauthorized)
    }
}

pub type GitlabResult<T> = Result<T, GitlabError>;

/// Client for the GitLab REST and GraphQL APIs.
///
/// The bearer token is read from the shared [`TokenStore`] on every request,
/// so a refresh is picked up without rebuilding the client.
#[derive(Clone)]
pub struct GitlabClient {
    http: Client,
    endpoints: GitlabEndpoints,
    tokens: Arc<dyn TokenStore>,
}

impl GitlabClient {
    pub fn new(endpoints: GitlabEndpoints, tokens: Arc<dyn TokenStore>) -> GitlabResult<Self> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            endpoints,
            tokens,
        })
    }

    pub fn absolute_base(&self) -> &Url {
        &self.endpoints.absolute_base
    }

    /// Fetch one page of the current user's activity events.
    pub async fn events(&self, per_page: u32, page: u32) -> GitlabResult<Vec<Event>> {
        let request = self.http.get(self.endpoints.events.clone()).query(&[
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ]);
        let response = self.authorize(request).send().await?;
        let status = response.status();
        debug!(%status, page, "GitLab events responded");

        match status {
            StatusCode::BAD_REQUEST => return Err(GitlabError::BadRequest),
            StatusCode::UNAUTHORIZED => return Err(GitlabError::Unauthorized),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(GitlabError::HttpStatus { status, body });
            }
            _ => {}
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn current_user_full(&self) -> GitlabResult<FullProfile> {
        const QUERY: &str = r#"
            query GetCurrentUserFullProfile {
                currentUser {
                    name
                    lastActivityOn
                    username
                    id
                    publicEmail
                    avatarUrl
                    emails(first: 1) {
                        nodes { email }
                    }
                }
            }
        "#;

        let data: CurrentUser<FullProfile> = self.query(QUERY, ()).await?;
        data.current_user.ok_or(GitlabError::Unauthorized)
    }

    pub async fn current_user_partial(&self) -> GitlabResult<PartialProfile> {
        const QUERY: &str = r#"
            query GetCurrentUserPartialProfile {
                currentUser {
                    lastActivityOn
                    publicEmail
                    emails(first: 1) {
                        nodes { email }
                    }
                }
            }
        "#;

        let data: CurrentUser<PartialProfile> = self.query(QUERY, ()).await?;
        data.current_user.ok_or(GitlabError::Unauthorized)
    }

    /// Fetch one page of group memberships, each with its first projects.
    pub async fn group_memberships(
        &self,
        first_groups: u32,
        after_group: Option<&str>,
        first_projects: u32,
        include_subgroups: bool,
    ) -> GitlabResult<UserGroups> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Variables<'a> {
            first_groups: u32,
            after_group: Option<&'a str>,
            first_projects: u32,
            include_subgroups: bool,
        }

        const QUERY: &str = r#"
            query GetUserGroupsWithProjects(
                $firstGroups: Int!
                $afterGroup: String
                $firstProjects: Int!
                $includeSubgroups: Boolean!
            ) {
                currentUser {
                    groupCount
                    groupMemberships(first: $firstGroups, after: $afterGroup) {
                        pageInfo { hasNextPage endCursor }
                        nodes {
                            userPermissions { readGroup }
                            group {
                                name
                                webUrl
                                avatarUrl
                                fullPath
                                projectsCount
                                projects(first: $firstProjects, includeSubgroups: $includeSubgroups) {
                                    nodes {
                                        name
                                        webUrl
                                        avatarUrl
                                        fullPath
                                        repository {
                                            tree {
                                                lastCommit {
                                                    committedDate
                                                    author { name avatarUrl username }
                                                }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        "#;

        let variables = Variables {
            first_groups,
            after_group,
            first_projects,
            include_subgroups,
        };
        let data: CurrentUser<RawMemberships> = self.query(QUERY, variables).await?;
        let user = data.current_user.ok_or(GitlabError::Unauthorized)?;
        Ok(user.into())
    }

    async fn query<V, R>(&self, query: &str, variables: V) -> GitlabResult<R>
    where
        V: Serialize,
        R: DeserializeOwned,
    {
        #[derive(Serialize)]
        struct RequestBody<'a, V> {
            query: &'a str,
            variables: V,
        }

        let request = self
            .http
            .post(self.endpoints.graphql.clone())
            .json(&RequestBody { query, variables });
        let response = self.authorize(request).send().await?;

        let status = response.status();
        debug!(%status, "GitLab GraphQL responded");
        match status {
            StatusCode::UNAUTHORIZED => return Err(GitlabError::Unauthorized),
            StatusCode::BAD_REQUEST => return Err(GitlabError::BadRequest),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(GitlabError::HttpStatus { status, body });
            }
            _ => {}
        }

        let body = response.text().await?;
        let envelope: GraphqlEnvelope<R> = serde_json::from_str(&body)?;

        if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
            if errors.iter().any(GraphqlResponseError::is_unauthenticated) {
                return Err(GitlabError::Unauthorized);
            }
            return Err(GitlabError::ResponseErrors(errors));
        }

        envelope.data.ok_or(GitlabError::MissingData)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.tokens.get().bearer_header() {
            Some(header) => request.header("Authorization", header),
            None => request,
        }
    }
}

impl std::fmt::Debug for GitlabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitlabClient")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlEnvelope<T> {
    data: Option<T>,
    errors: Option<Vec<GraphqlResponseError>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphqlResponseError {
    pub message: String,
    #[serde(default)]
    pub path: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub extensions: Option<GraphqlErrorExtensions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphqlErrorExtensions {
    #[serde(default)]
    pub code: Option<String>,
}

impl GraphqlResponseError {
    fn is_unauthenticated(&self) -> bool {
        let coded = self
            .extensions
            .as_ref()
            .and_then(|ext| ext.code.as_deref())
            == Some("UNAUTHENTICATED");
        coded || self.message.contains("not authenticated")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentUser<T> {
    current_user: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMemberships {
    #[serde(default)]
    group_count: i64,
    group_memberships: Connection<RawMembership>,
}

#[derive(Debug, Deserialize)]
struct Connection<T> {
    #[serde(default, rename = "pageInfo")]
    page_info: PageInfo,
    #[serde(default = "Vec::new")]
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMembership {
    user_permissions: RawPermissions,
    group: RawGroup,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPermissions {
    #[serde(default)]
    read_group: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGroup {
    name: String,
    web_url: String,
    avatar_url: Option<String>,
    full_path: String,
    #[serde(default)]
    projects_count: i64,
    projects: Connection<RawProject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProject {
    name: String,
    web_url: String,
    avatar_url: Option<String>,
    full_path: String,
    repository: Option<RawRepository>,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    tree: Option<RawTree>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTree {
    last_commit: Option<RawCommit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommit {
    committed_date: Option<chrono::DateTime<chrono::Utc>>,
    author: Option<RawAuthor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAuthor {
    name: Option<String>,
    avatar_url: Option<String>,
    username: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl From<RawMemberships> for UserGroups {
    fn from(raw: RawMemberships) -> Self {
        let groups = raw
            .group_memberships
            .nodes
            .into_iter()
            .map(|membership| {
                let group = membership.group;
                Group {
                    name: group.name,
                    web_url: group.web_url,
                    avatar_url: non_blank(group.avatar_url),
                    full_path: group.full_path,
                    projects: group.projects.nodes.into_iter().map(Project::from).collect(),
                    user_can_read: membership.user_permissions.read_group,
                    projects_count: group.projects_count,
                }
            })
            .collect();

        UserGroups {
            group_count: raw.group_count,
            page_info: raw.group_memberships.page_info,
            groups,
        }
    }
}

impl From<RawProject> for Project {
    fn from(raw: RawProject) -> Self {
        let last_commit = raw
            .repository
            .and_then(|repo| repo.tree)
            .and_then(|tree| tree.last_commit)
            .map(|commit| {
                let author = commit.author;
                Commit {
                    committed_date: commit.committed_date,
                    author_name: author.as_ref().and_then(|a| a.name.clone()),
                    author_avatar_url: author
                        .as_ref()
                        .and_then(|a| non_blank(a.avatar_url.clone())),
                    author_username: author.and_then(|a| a.username),
                }
            });

        Project {
            name: raw.name,
            web_url: raw.web_url,
            avatar_url: non_blank(raw.avatar_url),
            full_path: raw.full_path,
            last_commit,
        }
    }
}
