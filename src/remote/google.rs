//! Google Tasks service: REST client for one task list of the Tasks v1 API.
//!
//! Google keeps deleted tasks listable (`showDeleted`), so deletions made on
//! the Google side reach the local store through reconciliation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RemoteError;
use crate::remote::traits::RemoteTaskApi;
use crate::tasks::model::{RemoteTask, Task};

const API_URL: &str = "https://tasks.googleapis.com/tasks/v1";

/// Service name, used as the external-id key.
pub const GOOGLE_TASKS: &str = "gtasks";

const STATUS_COMPLETED: &str = "completed";
const STATUS_OPEN: &str = "needsAction";

/// Google Tasks REST client bound to a single task list.
pub struct GoogleTasksClient {
    token: SecretString,
    list_id: String,
    base_url: String,
    client: reqwest::Client,
}

/// A task list of the signed-in user.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TaskList {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Task as Google returns it.
#[derive(Debug, Clone, Deserialize)]
struct GoogleTask {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    due: Option<String>,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    completed: Option<String>,
    #[serde(default)]
    deleted: bool,
}

/// Body of insert and patch requests. `None` is sent as `null`, which
/// clears the field on patch.
#[derive(Debug, Serialize, PartialEq)]
struct TaskBody {
    title: String,
    notes: Option<String>,
    status: &'static str,
    due: Option<String>,
}

impl TaskBody {
    fn from_task(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            notes: task.description.clone(),
            status: if task.completed {
                STATUS_COMPLETED
            } else {
                STATUS_OPEN
            },
            // Google stores the date only.
            due: task
                .due
                .map(|d| d.format("%Y-%m-%dT00:00:00.000Z").to_string()),
        }
    }
}

fn parse_time(s: Option<&str>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

impl GoogleTask {
    fn into_remote(self) -> RemoteTask {
        let updated = parse_time(self.updated.as_deref());
        let completed_at = parse_time(self.completed.as_deref());
        // Completing a task does not always move `updated`.
        let last_modified = updated
            .max(completed_at)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        RemoteTask {
            external_id: self.id,
            title: self.title,
            description: self.notes.filter(|n| !n.is_empty()),
            due: parse_time(self.due.as_deref()),
            completed: self.status == STATUS_COMPLETED,
            deleted: self.deleted,
            last_modified,
        }
    }
}

impl GoogleTasksClient {
    pub fn new(token: SecretString, list_id: impl Into<String>) -> Self {
        Self {
            token,
            list_id: list_id.into(),
            base_url: API_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the client at another server (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn list_id(&self) -> &str {
        &self.list_id
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{endpoint}", self.base_url))
            .bearer_auth(self.token.expose_secret())
    }

    fn task_path(&self, external_id: &str) -> String {
        format!("/lists/{}/tasks/{external_id}", self.list_id)
    }

    fn failed(&self, reason: impl ToString) -> RemoteError {
        RemoteError::request_failed(GOOGLE_TASKS, reason)
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let resp = req.send().await.map_err(|e| self.failed(e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(self.failed(format!("HTTP {status}: {body}")));
        }
        Ok(resp)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        req: RequestBuilder,
    ) -> Result<T, RemoteError> {
        self.send(req)
            .await?
            .json::<T>()
            .await
            .map_err(|e| RemoteError::InvalidResponse {
                service: GOOGLE_TASKS.into(),
                reason: e.to_string(),
            })
    }

    /// Follow `nextPageToken` through every page of `endpoint`.
    async fn paged<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, RemoteError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self.request(Method::GET, endpoint).query(query);
            if let Some(token) = page_token.as_deref() {
                req = req.query(&[("pageToken", token)]);
            }
            let page: ListPage<T> = self.send_json(req).await?;
            items.extend(page.items);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(items)
    }

    async fn list(&self, with_deleted: bool) -> Result<Vec<RemoteTask>, RemoteError> {
        let mut query = vec![("showCompleted", "true"), ("maxResults", "100")];
        if with_deleted {
            query.extend([("showDeleted", "true"), ("showHidden", "true")]);
        }
        let tasks: Vec<GoogleTask> = self
            .paged(&format!("/lists/{}/tasks", self.list_id), &query)
            .await?;
        Ok(tasks.into_iter().map(GoogleTask::into_remote).collect())
    }

    /// Task lists of the signed-in user, for choosing `list_id`.
    pub async fn task_lists(&self) -> Result<Vec<TaskList>, RemoteError> {
        self.paged("/users/@me/lists", &[("maxResults", "100")]).await
    }
}

#[async_trait]
impl RemoteTaskApi for GoogleTasksClient {
    fn name(&self) -> &str {
        GOOGLE_TASKS
    }

    async fn create_task(&self, task: &Task) -> Result<RemoteTask, RemoteError> {
        let created: GoogleTask = self
            .send_json(
                self.request(Method::POST, &format!("/lists/{}/tasks", self.list_id))
                    .json(&TaskBody::from_task(task)),
            )
            .await?;
        debug!(external_id = %created.id, list = %self.list_id, "Google task created");
        Ok(created.into_remote())
    }

    async fn list_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        self.list(false).await
    }

    async fn list_tasks_with_deleted(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        self.list(true).await
    }

    async fn get_task(&self, external_id: &str) -> Result<RemoteTask, RemoteError> {
        let task: GoogleTask = self
            .send_json(self.request(Method::GET, &self.task_path(external_id)))
            .await?;
        Ok(task.into_remote())
    }

    async fn update_task(&self, external_id: &str, task: &Task) -> Result<RemoteTask, RemoteError> {
        let updated: GoogleTask = self
            .send_json(
                self.request(Method::PATCH, &self.task_path(external_id))
                    .json(&TaskBody::from_task(task)),
            )
            .await?;
        Ok(updated.into_remote())
    }

    async fn set_completed(
        &self,
        external_id: &str,
        completed: bool,
    ) -> Result<RemoteTask, RemoteError> {
        let body = if completed {
            serde_json::json!({ "status": STATUS_COMPLETED })
        } else {
            // Reopening needs the completion time cleared as well.
            serde_json::json!({ "status": STATUS_OPEN, "completed": null })
        };
        let updated: GoogleTask = self
            .send_json(
                self.request(Method::PATCH, &self.task_path(external_id))
                    .json(&body),
            )
            .await?;
        Ok(updated.into_remote())
    }

    async fn delete_task(&self, external_id: &str) -> Result<(), RemoteError> {
        self.send(self.request(Method::DELETE, &self.task_path(external_id)))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::tasks::model::NewTask;

    #[test]
    fn body_sends_date_only_due_and_status() {
        let due = Utc.with_ymd_and_hms(2024, 1, 1, 15, 30, 0).unwrap();
        let task = NewTask::new("Buy milk").with_due(due).into_task(1);
        let json = serde_json::to_value(TaskBody::from_task(&task)).unwrap();
        assert_eq!(json["title"], "Buy milk");
        assert_eq!(json["due"], "2024-01-01T00:00:00.000Z");
        assert_eq!(json["status"], "needsAction");
    }

    #[test]
    fn body_clears_unset_fields() {
        let mut task = NewTask::new("x").into_task(1);
        task.completed = true;
        let json = serde_json::to_value(TaskBody::from_task(&task)).unwrap();
        assert!(json["notes"].is_null());
        assert!(json["due"].is_null());
        assert_eq!(json["status"], "completed");
    }

    #[test]
    fn google_task_maps_to_remote() {
        let json = r#"{
            "kind": "tasks#task",
            "id": "dGFzazE",
            "title": "Buy milk",
            "notes": "",
            "status": "needsAction",
            "due": "2024-01-01T00:00:00.000Z",
            "updated": "2024-01-02T10:00:00.000Z"
        }"#;
        let task: GoogleTask = serde_json::from_str(json).unwrap();
        let remote = task.into_remote();
        assert_eq!(remote.external_id, "dGFzazE");
        assert!(remote.description.is_none());
        assert_eq!(remote.due, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert!(!remote.completed);
        assert!(!remote.deleted);
        assert_eq!(remote.last_modified, Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap());
    }

    #[test]
    fn later_completion_time_counts_as_modification() {
        let json = r#"{
            "id": "1",
            "title": "x",
            "status": "completed",
            "updated": "2024-01-02T10:00:00.000Z",
            "completed": "2024-01-03T08:00:00.000Z",
            "deleted": true
        }"#;
        let remote = serde_json::from_str::<GoogleTask>(json).unwrap().into_remote();
        assert!(remote.completed);
        assert!(remote.deleted);
        assert_eq!(remote.last_modified, Utc.with_ymd_and_hms(2024, 1, 3, 8, 0, 0).unwrap());
    }

    #[test]
    fn empty_page_has_no_items() {
        let page: ListPage<GoogleTask> = serde_json::from_str(r#"{"kind": "tasks#tasks"}"#).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_page_token.is_none());

        let lists: ListPage<TaskList> = serde_json::from_str(
            r#"{"items": [{"id": "MDE", "title": "My Tasks"}], "nextPageToken": "p2"}"#,
        )
        .unwrap();
        assert_eq!(lists.items[0].title, "My Tasks");
        assert_eq!(lists.next_page_token.as_deref(), Some("p2"));
    }

    #[test]
    fn paths_include_list() {
        let client = GoogleTasksClient::new(SecretString::from("tok".to_string()), "L1")
            .with_base_url("http://localhost:1/");
        assert_eq!(client.base_url, "http://localhost:1");
        assert_eq!(client.task_path("t9"), "/lists/L1/tasks/t9");
        assert_eq!(client.name(), "gtasks");
        assert_eq!(client.list_id(), "L1");
    }
}
