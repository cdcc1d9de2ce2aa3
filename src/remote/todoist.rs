//! Todoist service: REST client for the Todoist v1 API.
//!
//! Todoist cannot list deleted tasks, so deletions made on the Todoist side
//! are invisible to reconciliation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use reqwest::{Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RemoteError;
use crate::remote::traits::RemoteTaskApi;
use crate::tasks::model::{RemoteTask, Task};

const API_URL: &str = "https://api.todoist.com/api/v1";

/// Service name, used as the external-id key.
pub const TODOIST: &str = "todoist";

/// Todoist REST client.
pub struct TodoistClient {
    token: SecretString,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Deserialize)]
struct TodoistDue {
    #[serde(default)]
    date: String,
    #[serde(default)]
    datetime: Option<String>,
}

/// Task as Todoist returns it.
#[derive(Debug, Clone, Deserialize)]
struct TodoistTask {
    id: String,
    content: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    due: Option<TodoistDue>,
    #[serde(default)]
    checked: bool,
    #[serde(default)]
    completed_at: Option<String>,
    #[serde(default)]
    is_deleted: bool,
    #[serde(default)]
    updated_at: Option<String>,
}

/// Page of `GET /tasks`.
#[derive(Debug, Deserialize)]
struct TaskPage {
    #[serde(default)]
    results: Vec<TodoistTask>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// Body of create and update requests.
#[derive(Debug, Serialize, PartialEq)]
struct TaskBody {
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_string: Option<String>,
}

/// Todoist's way of removing a due date.
const NO_DUE: &str = "no date";

impl TaskBody {
    /// New tasks only carry the fields that are set.
    fn for_create(task: &Task) -> Self {
        let (due_date, due_datetime) = match task.due {
            // Midnight UTC means "a date, no time of day".
            Some(due) if due.num_seconds_from_midnight() == 0 => {
                (Some(due.format("%Y-%m-%d").to_string()), None)
            }
            Some(due) => (None, Some(due.to_rfc3339())),
            None => (None, None),
        };
        Self {
            content: task.title.clone(),
            description: task.description.clone(),
            due_date,
            due_datetime,
            due_string: None,
        }
    }

    /// Updates send every field; an omitted field would keep its old value
    /// on the Todoist side.
    fn for_update(task: &Task) -> Self {
        let mut body = Self::for_create(task);
        if body.description.is_none() {
            body.description = Some(String::new());
        }
        if task.due.is_none() {
            body.due_string = Some(NO_DUE.to_string());
        }
        body
    }
}

fn parse_due(due: &TodoistDue) -> Option<DateTime<Utc>> {
    if let Some(dt) = due.datetime.as_deref() {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(dt) {
            return Some(parsed.with_timezone(&Utc));
        }
        // Floating datetimes carry no offset.
        if let Ok(naive) = NaiveDateTime::parse_from_str(dt, "%Y-%m-%dT%H:%M:%S") {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(&due.date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

impl TodoistTask {
    fn into_remote(self) -> RemoteTask {
        let last_modified = self
            .updated_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        RemoteTask {
            external_id: self.id,
            title: self.content,
            description: Some(self.description).filter(|d| !d.is_empty()),
            due: self.due.as_ref().and_then(parse_due),
            completed: self.checked || self.completed_at.is_some(),
            deleted: self.is_deleted,
            last_modified,
        }
    }
}

impl TodoistClient {
    pub fn new(token: SecretString) -> Self {
        Self {
            token,
            base_url: API_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the client at another server (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{endpoint}", self.base_url))
            .bearer_auth(self.token.expose_secret())
    }

    fn failed(&self, reason: impl ToString) -> RemoteError {
        RemoteError::request_failed(TODOIST, reason)
    }

    /// Send a request and fail on transport errors and non-2xx statuses.
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
                service: TODOIST.into(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl RemoteTaskApi for TodoistClient {
    fn name(&self) -> &str {
        TODOIST
    }

    async fn create_task(&self, task: &Task) -> Result<RemoteTask, RemoteError> {
        let created: TodoistTask = self
            .send_json(self.request(Method::POST, "/tasks").json(&TaskBody::for_create(task)))
            .await?;
        let mut remote = created.into_remote();

        if task.completed {
            remote = self.set_completed(&remote.external_id, true).await?;
        }
        debug!(external_id = %remote.external_id, "Todoist task created");
        Ok(remote)
    }

    async fn list_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        let mut tasks = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut req = self.request(Method::GET, "/tasks");
            if let Some(c) = cursor.as_deref() {
                req = req.query(&[("cursor", c)]);
            }
            let page: TaskPage = self.send_json(req).await?;
            tasks.extend(page.results.into_iter().map(TodoistTask::into_remote));

            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(tasks)
    }

    async fn get_task(&self, external_id: &str) -> Result<RemoteTask, RemoteError> {
        let task: TodoistTask = self
            .send_json(self.request(Method::GET, &format!("/tasks/{external_id}")))
            .await?;
        Ok(task.into_remote())
    }

    async fn update_task(&self, external_id: &str, task: &Task) -> Result<RemoteTask, RemoteError> {
        let updated: TodoistTask = self
            .send_json(
                self.request(Method::POST, &format!("/tasks/{external_id}"))
                    .json(&TaskBody::for_update(task)),
            )
            .await?;
        let remote = updated.into_remote();

        if remote.completed != task.completed {
            return self.set_completed(external_id, task.completed).await;
        }
        Ok(remote)
    }

    async fn set_completed(
        &self,
        external_id: &str,
        completed: bool,
    ) -> Result<RemoteTask, RemoteError> {
        let action = if completed { "close" } else { "reopen" };
        self.send(self.request(Method::POST, &format!("/tasks/{external_id}/{action}")))
            .await?;
        // close/reopen answer 204; the new updated_at needs a read.
        self.get_task(external_id).await
    }

    async fn delete_task(&self, external_id: &str) -> Result<(), RemoteError> {
        self.send(self.request(Method::DELETE, &format!("/tasks/{external_id}")))
            .await?;
        Ok(())
    }
}
