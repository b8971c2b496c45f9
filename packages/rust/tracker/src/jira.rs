//! Jira-style REST v2 adapter.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;

use contentflow_shared::{
    ContentFlowError, Result, StatusNames, Task, TrackerConfig, WorkflowState, tracker_token,
};

use crate::{IssueTracker, StatusFilter};

/// User-Agent string for tracker requests.
const USER_AGENT: &str = concat!("ContentFlow/", env!("CARGO_PKG_VERSION"));

/// Page size for `/search`.
const PAGE_SIZE: usize = 50;

/// JQL reads dates in the API user's profile timezone, so the server-side
/// bound is widened by a day and the exact bound applied client-side.
const JQL_DATE_SLACK_DAYS: i64 = 1;

/// Connection settings for [`JiraTracker`].
#[derive(Debug, Clone)]
pub struct JiraOptions {
    pub base_url: Url,
    pub project: String,
    /// Bearer token; `None` sends unauthenticated requests.
    pub token: Option<String>,
    pub statuses: StatusNames,
    pub timeout: Duration,
}

impl JiraOptions {
    /// Build options from the `[tracker]` config section, reading the token from the env.
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        Ok(Self {
            base_url: parse_base_url(&config.base_url)?,
            project: config.project.clone(),
            token: Some(tracker_token(config)?),
            statuses: config.statuses.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }
}

/// Issue tracker speaking the Jira REST v2 dialect.
pub struct JiraTracker {
    client: Client,
    opts: JiraOptions,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    start_at: usize,
    #[serde(default)]
    total: usize,
    #[serde(default)]
    issues: Vec<IssueJson>,
}

#[derive(Debug, Deserialize)]
struct IssueJson {
    key: String,
    fields: FieldsJson,
}

#[derive(Debug, Deserialize)]
struct FieldsJson {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    created: Option<String>,
    status: StatusJson,
}

#[derive(Debug, Deserialize)]
struct StatusJson {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TransitionsResponse {
    #[serde(default)]
    transitions: Vec<TransitionJson>,
}

#[derive(Debug, Deserialize)]
struct TransitionJson {
    id: String,
    to: StatusJson,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

impl JiraTracker {
    pub fn new(opts: JiraOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(opts.timeout)
            .build()
            .map_err(|e| {
                ContentFlowError::tracker_permanent(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client, opts })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.opts
            .base_url
            .join(path)
            .map_err(|e| ContentFlowError::config(format!("invalid tracker URL {path}: {e}")))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.opts.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request, classifying failures as transient or permanent.
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                ContentFlowError::tracker_transient(format!("{what}: {e}"))
            } else {
                ContentFlowError::tracker_permanent(format!("{what}: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("{what}: HTTP {status} {}", body.trim());
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(ContentFlowError::tracker_transient(message))
        } else {
            Err(ContentFlowError::tracker_permanent(message))
        }
    }

    async fn read_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        response.json::<T>().await.map_err(|e| {
            ContentFlowError::tracker_permanent(format!("{what}: malformed response: {e}"))
        })
    }

    fn map_status(&self, name: &str) -> Result<WorkflowState> {
        self.opts.statuses.state_of(name).ok_or_else(|| {
            ContentFlowError::tracker_permanent(format!("unmapped tracker status: {name}"))
        })
    }

    fn build_jql(&self, created_after: DateTime<Utc>, status: StatusFilter) -> String {
        // JQL dates have minute resolution and no zone; the exact bound is re-applied client-side.
        let lower = created_after
            .checked_sub_signed(chrono::Duration::days(JQL_DATE_SLACK_DAYS))
            .unwrap_or(created_after);
        let mut jql = format!("project = \"{}\"", self.opts.project);
        if let StatusFilter::Is(state) = status {
            jql.push_str(&format!(
                " AND status = \"{}\"",
                self.opts.statuses.name_of(state)
            ));
        }
        jql.push_str(&format!(
            " AND created >= \"{}\" ORDER BY created ASC",
            lower.format("%Y-%m-%d %H:%M")
        ));
        jql
    }

    fn to_task(&self, issue: IssueJson) -> Result<Task> {
        let created = issue.fields.created.ok_or_else(|| {
            ContentFlowError::tracker_permanent(format!("{}: missing created date", issue.key))
        })?;
        Ok(Task {
            created_at: parse_tracker_date(&created)?,
            status: self.map_status(&issue.fields.status.name)?,
            summary: issue.fields.summary.unwrap_or_default(),
            description: issue.fields.description.unwrap_or_default(),
            key: issue.key,
        })
    }
}

/// Parse the tracker base URL with a trailing slash so relative API paths
/// join under it instead of replacing its last segment.
fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| ContentFlowError::config(format!("invalid tracker.base_url: {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Parse `2026-10-01T08:00:00.000+0200` (Jira) or RFC 3339.
fn parse_tracker_date(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ContentFlowError::validation(format!("invalid tracker date {raw:?}: {e}")))
}

#[async_trait]
impl IssueTracker for JiraTracker {
    #[instrument(skip(self), fields(project = %self.opts.project))]
    async fn query_tasks(
        &self,
        created_after: DateTime<Utc>,
        status: StatusFilter,
    ) -> Result<Vec<Task>> {
        let url = self.endpoint("rest/api/2/search")?;
        let jql = self.build_jql(created_after, status);
        let mut tasks = Vec::new();
        let mut start_at = 0;

        loop {
            let body = json!({
                "jql": jql,
                "startAt": start_at,
                "maxResults": PAGE_SIZE,
                "fields": ["summary", "description", "created", "status"],
            });
            let response = self
                .send(self.client.post(url.clone()).json(&body), "search")
                .await?;
            let page: SearchResponse = Self::read_json(response, "search").await?;
            let fetched = page.issues.len();

            for issue in page.issues {
                let task = self.to_task(issue)?;
                if task.created_at > created_after && status.matches(task.status) {
                    tasks.push(task);
                }
            }

            start_at = page.start_at + fetched;
            if fetched == 0 || start_at >= page.total {
                break;
            }
        }

        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        debug!(count = tasks.len(), "tasks discovered");
        Ok(tasks)
    }

    async fn get_task_status(&self, key: &str) -> Result<WorkflowState> {
        let mut url = self.endpoint(&format!("rest/api/2/issue/{key}"))?;
        url.set_query(Some("fields=status"));
        let response = self.send(self.client.get(url), "get status").await?;
        let issue: IssueStatusJson = Self::read_json(response, "get status").await?;
        self.map_status(&issue.fields.status.name)
    }

    async fn transition_task(&self, key: &str, target: WorkflowState) -> Result<()> {
        let url = self.endpoint(&format!("rest/api/2/issue/{key}/transitions"))?;
        let response = self.send(self.client.get(url.clone()), "list transitions").await?;
        let listed: TransitionsResponse = Self::read_json(response, "list transitions").await?;

        let target_name = self.opts.statuses.name_of(target);
        let transition = listed
            .transitions
            .iter()
            .find(|t| t.to.name.trim().eq_ignore_ascii_case(target_name))
            .ok_or_else(|| ContentFlowError::TransitionRejected {
                key: key.to_string(),
                target,
                reason: format!("no transition to {target_name:?} offered"),
            })?;

        let body = json!({ "transition": { "id": transition.id } });
        self.send(self.client.post(url).json(&body), "transition")
            .await
            .map_err(|e| match e {
                ContentFlowError::Tracker {
                    transient: false,
                    message,
                } => ContentFlowError::TransitionRejected {
                    key: key.to_string(),
                    target,
                    reason: message,
                },
                other => other,
            })?;
        debug!(key, %target, transition_id = %transition.id, "transition requested");
        Ok(())
    }

    async fn get_available_transitions(&self, key: &str) -> Result<Vec<WorkflowState>> {
        let url = self.endpoint(&format!("rest/api/2/issue/{key}/transitions"))?;
        let response = self.send(self.client.get(url), "list transitions").await?;
        let listed: TransitionsResponse = Self::read_json(response, "list transitions").await?;
        Ok(listed
            .transitions
            .iter()
            .filter_map(|t| self.opts.statuses.state_of(&t.to.name))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct IssueStatusJson {
    fields: StatusOnlyFields,
}

#[derive(Debug, Deserialize)]
struct StatusOnlyFields {
    status: StatusJson,
}
