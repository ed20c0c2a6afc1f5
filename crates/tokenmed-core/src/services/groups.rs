use tracing::debug;
use url::Url;

use crate::auth::AuthSession;
use crate::gitlab::{ensure_absolute_url, GitlabClient, GitlabError, Group, UserGroups};

use super::ServiceResult;

const GROUPS_PER_PAGE: u32 = 3;
const PROJECTS_PER_GROUP: u32 = 5;
const MAX_GROUPS: usize = 3;

/// Collects the first readable groups the user belongs to.
#[derive(Debug, Clone)]
pub struct GroupService {
    session: AuthSession,
    client: GitlabClient,
}

impl GroupService {
    pub fn new(session: AuthSession, client: GitlabClient) -> Self {
        Self { session, client }
    }

    pub async fn group_data(&self) -> ServiceResult<UserGroups> {
        self.session.ensure_session().await?;

        let client = &self.client;
        let mut data = self
            .session
            .call_with_refresh(move || async move {
                let mut readable: Vec<Group> = Vec::new();
                let mut after: Option<String> = None;
                loop {
                    let page = client
                        .group_memberships(
                            GROUPS_PER_PAGE,
                            after.as_deref(),
                            PROJECTS_PER_GROUP,
                            true,
                        )
                        .await?;
                    readable.extend(page.groups.into_iter().filter(|group| group.user_can_read));
                    debug!(collected = readable.len(), "group page fetched");

                    let cursor = page.page_info.end_cursor.clone();
                    let done = readable.len() >= MAX_GROUPS || !page.page_info.has_next_page;
                    match cursor {
                        Some(cursor) if !done => after = Some(cursor),
                        _ => {
                            return Ok::<_, GitlabError>(UserGroups {
                                group_count: page.group_count,
                                page_info: page.page_info,
                                groups: readable,
                            })
                        }
                    }
                }
            })
            .await?;

        data.groups.truncate(MAX_GROUPS);
        for group in &mut data.groups {
            absolutize_avatars(group, client.absolute_base());
        }
        Ok(data)
    }
}

fn absolutize(url: &mut Option<String>, base: &Url) {
    if let Some(value) = url.as_mut() {
        *value = ensure_absolute_url(value, base);
    }
}

fn absolutize_avatars(group: &mut Group, base: &Url) {
    absolutize(&mut group.avatar_url, base);
    for project in &mut group.projects {
        absolutize(&mut project.avatar_url, base);
        if let Some(commit) = project.last_commit.as_mut() {
            absolutize(&mut commit.author_avatar_url, base);
        }
    }
}
