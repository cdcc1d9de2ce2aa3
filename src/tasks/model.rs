//! Task data model: local tasks and their remote counterparts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Limits;
use crate::error::Error;

/// A task in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Assigned by the repository on creation, immutable afterwards.
    pub id: i64,
    /// Service name → that service's opaque id for this task.
    #[serde(default)]
    pub external_ids: BTreeMap<String, String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
    pub completed: bool,
    /// A due reminder was already emitted.
    #[serde(default)]
    pub notified: bool,
    /// Soft-deleted, pending propagation to remote services.
    #[serde(default)]
    pub deleted: bool,
    /// Set by whichever side changed the task last. Sole reconciliation tie-breaker.
    pub last_modified: DateTime<Utc>,
}

impl Task {
    /// The id `service` knows this task by, if it was ever pushed there.
    pub fn external_id(&self, service: &str) -> Option<&str> {
        self.external_ids
            .get(service)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Overwrite content fields from a newer remote copy.
    ///
    /// Local id and external ids are kept; `last_modified` takes the remote value.
    pub fn apply_remote(&mut self, remote: &RemoteTask) {
        self.title = remote.title.clone();
        self.description = remote.description.clone();
        self.due = remote.due;
        self.completed = remote.completed;
        self.last_modified = remote.last_modified;
    }

    /// Whether title, description, due and completed match the remote copy.
    pub fn same_content(&self, remote: &RemoteTask) -> bool {
        self.title == remote.title
            && self.description == remote.description
            && self.due == remote.due
            && self.completed == remote.completed
    }

    /// Whether title, description, due and completed match another local copy.
    pub fn same_fields(&self, other: &Task) -> bool {
        self.title == other.title
            && self.description == other.description
            && self.due == other.due
            && self.completed == other.completed
    }

    /// Validate user-editable fields against configured limits.
    pub fn validate(&self, limits: &Limits) -> Result<(), Error> {
        validate_fields(&self.title, self.description.as_deref(), limits)
    }
}

/// A task that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    #[serde(default)]
    pub external_ids: BTreeMap<String, String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: bool,
    pub last_modified: DateTime<Utc>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            external_ids: BTreeMap::new(),
            title: title.into(),
            description: None,
            due: None,
            completed: false,
            last_modified: Utc::now(),
        }
    }

    /// Builder: set description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Builder: set due timestamp.
    pub fn with_due(mut self, due: DateTime<Utc>) -> Self {
        self.due = Some(due);
        self
    }

    /// Builder: set last-modified timestamp.
    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = at;
        self
    }

    /// Local copy of a task that so far only exists in `service`.
    pub fn from_remote(service: &str, remote: &RemoteTask) -> Self {
        let mut external_ids = BTreeMap::new();
        external_ids.insert(service.to_string(), remote.external_id.clone());
        Self {
            external_ids,
            title: remote.title.clone(),
            description: remote.description.clone(),
            due: remote.due,
            completed: remote.completed,
            last_modified: remote.last_modified,
        }
    }

    pub fn validate(&self, limits: &Limits) -> Result<(), Error> {
        validate_fields(&self.title, self.description.as_deref(), limits)
    }

    /// Attach the repository-assigned id.
    pub fn into_task(self, id: i64) -> Task {
        Task {
            id,
            external_ids: self.external_ids,
            title: self.title,
            description: self.description,
            due: self.due,
            completed: self.completed,
            notified: false,
            deleted: false,
            last_modified: self.last_modified,
        }
    }
}

fn validate_fields(title: &str, description: Option<&str>, limits: &Limits) -> Result<(), Error> {
    if title.trim().is_empty() {
        return Err(Error::InvalidTask("title cannot be empty".into()));
    }
    let title_len = title.chars().count();
    if title_len > limits.title_max_len {
        return Err(Error::InvalidTask(format!(
            "title is {title_len} characters, limit is {}",
            limits.title_max_len
        )));
    }
    if let Some(desc) = description {
        let desc_len = desc.chars().count();
        if desc_len > limits.description_max_len {
            return Err(Error::InvalidTask(format!(
                "description is {desc_len} characters, limit is {}",
                limits.description_max_len
            )));
        }
    }
    Ok(())
}

/// A task as a remote service represents it. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTask {
    pub external_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
    pub completed: bool,
    #[serde(default)]
    pub deleted: bool,
    pub last_modified: DateTime<Utc>,
}
