use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the user's GitLab activity feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub action_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub target_title: Option<String>,
    #[serde(default)]
    pub target_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailNode {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailConnection {
    #[serde(default)]
    pub nodes: Vec<EmailNode>,
}

/// `currentUser` with every field the profile view needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullProfile {
    /// Global id, e.g. `gid://gitlab/User/42`.
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub public_email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub last_activity_on: Option<String>,
    #[serde(default)]
    pub emails: Option<EmailConnection>,
}

impl FullProfile {
    /// Trailing segment of the global id.
    pub fn numeric_id(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }

    pub fn primary_email(&self) -> Option<String> {
        primary_email(self.public_email.as_deref(), self.emails.as_ref())
    }
}

/// `currentUser` limited to the fields missing from the OAuth identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialProfile {
    #[serde(default)]
    pub public_email: Option<String>,
    #[serde(default)]
    pub last_activity_on: Option<String>,
    #[serde(default)]
    pub emails: Option<EmailConnection>,
}

impl PartialProfile {
    pub fn primary_email(&self) -> Option<String> {
        primary_email(self.public_email.as_deref(), self.emails.as_ref())
    }
}

fn primary_email(public: Option<&str>, emails: Option<&EmailConnection>) -> Option<String> {
    public
        .filter(|email| !email.is_empty())
        .map(ToOwned::to_owned)
        .or_else(|| {
            emails
                .and_then(|connection| connection.nodes.first())
                .and_then(|node| node.email.clone())
        })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub committed_date: Option<DateTime<Utc>>,
    pub author_name: Option<String>,
    pub author_avatar_url: Option<String>,
    pub author_username: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    pub web_url: String,
    pub avatar_url: Option<String>,
    pub full_path: String,
    pub last_commit: Option<Commit>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub name: String,
    pub web_url: String,
    pub avatar_url: Option<String>,
    pub full_path: String,
    pub projects: Vec<Project>,
    pub user_can_read: bool,
    pub projects_count: i64,
}

/// One page of group memberships.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGroups {
    pub group_count: i64,
    pub page_info: PageInfo,
    pub groups: Vec<Group>,
}
