use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::AuthSession;
use crate::gitlab::{Event, GitlabClient, GitlabError};

use super::ServiceResult;

const EVENTS_PER_PAGE: u32 = 51;

/// Display form of a GitLab event. Missing text fields are empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub action_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub target_title: String,
    pub target_type: String,
}

impl From<Event> for Activity {
    fn from(event: Event) -> Self {
        Self {
            action_name: event.action_name.unwrap_or_default(),
            created_at: event.created_at,
            target_title: event.target_title.unwrap_or_default(),
            target_type: event.target_type.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActivityService {
    session: AuthSession,
    client: GitlabClient,
}

impl ActivityService {
    pub fn new(session: AuthSession, client: GitlabClient) -> Self {
        Self { session, client }
    }

    /// Most recent activity: one page, plus a second one when the first is full.
    pub async fn activities(&self) -> ServiceResult<Vec<Activity>> {
        self.session.ensure_session().await?;

        let client = &self.client;
        let events = self
            .session
            .call_with_refresh(move || async move {
                let mut events = client.events(EVENTS_PER_PAGE, 1).await?;
                if events.len() == EVENTS_PER_PAGE as usize {
                    events.extend(client.events(EVENTS_PER_PAGE, 2).await?);
                }
                Ok::<_, GitlabError>(events)
            })
            .await?;

        Ok(events.into_iter().map(Activity::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;
    use crate::services::testing::wired;

    fn events(count: usize) -> serde_json::Value {
        let events: Vec<_> = (0..count)
            .map(|idx| {
                serde_json::json!({
                    "action_name": "pushed to",
                    "created_at": "2024-05-01T10:00:00.000Z",
                    "target_title": format!("commit {idx}"),
                    "target_type": null
                })
            })
            .collect();
        serde_json::Value::Array(events)
    }

    #[tokio::test]
    async fn short_first_page_is_all() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(GET).path("/api/v4/events").query_param("page", "1");
            then.status(200).json_body_obj(&events(3));
        });
        let second = server.mock(|when, then| {
            when.method(GET).path("/api/v4/events").query_param("page", "2");
            then.status(200).json_body_obj(&events(1));
        });
        let (session, client) = wired(&server, "held");

        let activities = ActivityService::new(session, client).activities().await.unwrap();
        assert_eq!(activities.len(), 3);
        assert_eq!(activities[0].target_type, "");
        first.assert();
        second.assert_hits(0);
    }

    #[tokio::test]
    async fn full_first_page_fetches_second() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/api/v4/events")
                .query_param("per_page", "51")
                .query_param("page", "1");
            then.status(200).json_body_obj(&events(51));
        });
        let second = server.mock(|when, then| {
            when.method(GET).path("/api/v4/events").query_param("page", "2");
            then.status(200).json_body_obj(&events(4));
        });
        let (session, client) = wired(&server, "held");

        let activities = ActivityService::new(session, client).activities().await.unwrap();
        assert_eq!(activities.len(), 55);
        assert_eq!(activities[54].target_title, "commit 3");
        second.assert();
    }

    #[tokio::test]
    async fn stale_token_is_refreshed_once() {
        let server = MockServer::start();
        let stale = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v4/events")
                .header("Authorization", "Bearer stale");
            then.status(401);
        });
        let refresh = server.mock(|when, then| {
            when.method(POST).path("/api/v1/auth/refresh");
            then.status(200)
                .json_body_obj(&serde_json::json!({ "access_token": "fresh" }));
        });
        let fresh = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v4/events")
                .header("Authorization", "Bearer fresh");
            then.status(200).json_body_obj(&events(2));
        });
        let (session, client) = wired(&server, "stale");

        let activities = ActivityService::new(session, client).activities().await.unwrap();
        assert_eq!(activities.len(), 2);
        stale.assert_hits(1);
        refresh.assert_hits(1);
        fresh.assert_hits(1);
    }
}
