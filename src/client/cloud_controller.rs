use super::{ApiResult, Reply, ResourceClient};
use crate::error::ClientError;
use crate::model::{Application, InstanceState, Job, JobState, ProcessInstance, RunConfig, Warnings};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const WARNINGS_HEADER: &str = "X-Cf-Warnings";

/// Cloud Controller v3 client. Covers only the calls the lifecycle engine needs.
#[derive(Clone)]
pub(crate) struct CloudControllerClient {
    http: reqwest::Client,
    api: String,
    token: String,
}

#[derive(Deserialize)]
struct Page<T> {
    resources: Vec<T>,
}

#[derive(Deserialize)]
struct AppResource {
    guid: String,
    name: String,
    state: String,
}

#[derive(Deserialize)]
struct GuidResource {
    guid: String,
}

#[derive(Deserialize)]
struct StatsResource {
    index: u32,
    state: String,
    #[serde(default)]
    details: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    detail: String,
}

#[derive(Deserialize)]
struct Root {
    links: RootLinks,
}

#[derive(Deserialize)]
struct RootLinks {
    log_cache: Option<Link>,
}

#[derive(Deserialize)]
struct Link {
    href: String,
}

impl CloudControllerClient {
    pub fn new(cfg: &RunConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .danger_accept_invalid_certs(cfg.skip_ssl_validation)
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            api: cfg.api_endpoint.trim_end_matches('/').to_string(),
            token: cfg.access_token.clone(),
        })
    }

    pub fn http(&self) -> reqwest::Client {
        self.http.clone()
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Discover the log-cache endpoint advertised by the API root.
    pub async fn log_cache_url(&self) -> Result<String, ClientError> {
        let (resp, _) = self.execute(self.http.get(format!("{}/", self.api))).await?;
        let root: Root = resp.json().await?;
        root.links
            .log_cache
            .map(|l| l.href)
            .ok_or_else(|| ClientError::Decode("API root does not advertise log_cache".into()))
    }

    async fn execute(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<(reqwest::Response, Warnings), ClientError> {
        let resp = req.header(AUTHORIZATION, &self.token).send().await?;
        let warnings = parse_warnings(resp.headers());
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                detail: error_detail(&body).unwrap_or_else(|| status.to_string()),
            });
        }
        Ok((resp, warnings))
    }
}

#[async_trait]
impl ResourceClient for CloudControllerClient {
    async fn get_application(&self, name: &str, space_guid: &str) -> ApiResult<Application> {
        let req = self
            .http
            .get(format!("{}/v3/apps", self.api))
            .query(&[("names", name), ("space_guids", space_guid)]);
        let (resp, warnings) = self.execute(req).await?;
        let page: Page<AppResource> = resp.json().await?;
        let app = page
            .resources
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Status {
                status: 404,
                detail: format!("App '{name}' not found"),
            })?;
        Ok(Reply::new(
            Application {
                guid: app.guid,
                name: app.name,
                state: app.state,
            },
            warnings,
        ))
    }

    async fn stop_application(&self, app_guid: &str) -> ApiResult<()> {
        let url = format!("{}/v3/apps/{app_guid}/actions/stop", self.api);
        let (_, warnings) = self.execute(self.http.post(url)).await?;
        Ok(Reply::new((), warnings))
    }

    async fn start_application(&self, app_guid: &str) -> ApiResult<()> {
        let url = format!("{}/v3/apps/{app_guid}/actions/start", self.api);
        let (_, warnings) = self.execute(self.http.post(url)).await?;
        Ok(Reply::new((), warnings))
    }

    async fn get_current_droplet(&self, app_guid: &str) -> ApiResult<Option<String>> {
        let url = format!("{}/v3/apps/{app_guid}/droplets/current", self.api);
        match self.execute(self.http.get(url)).await {
            Ok((resp, warnings)) => {
                let droplet: GuidResource = resp.json().await?;
                Ok(Reply::new(Some(droplet.guid), warnings))
            }
            Err(ClientError::Status { status: 404, .. }) => Ok(Reply::new(None, Vec::new())),
            Err(e) => Err(e),
        }
    }

    async fn stage_application(&self, app_guid: &str) -> ApiResult<String> {
        let req = self.http.get(format!("{}/v3/packages", self.api)).query(&[
            ("app_guids", app_guid),
            ("order_by", "-created_at"),
            ("per_page", "1"),
        ]);
        let (resp, mut warnings) = self.execute(req).await?;
        let page: Page<GuidResource> = resp.json().await?;
        let package = page
            .resources
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Status {
                status: 404,
                detail: "App has no package to stage".into(),
            })?;

        let req = self
            .http
            .post(format!("{}/v3/builds", self.api))
            .json(&json!({ "package": { "guid": package.guid } }));
        let (resp, build_warnings) = self.execute(req).await?;
        warnings.extend(build_warnings);
        let build: GuidResource = resp.json().await?;
        debug!(app_guid = %app_guid, build_guid = %build.guid, "Staging build created");
        Ok(Reply::new(
            format!("{}/v3/builds/{}", self.api, build.guid),
            warnings,
        ))
    }

    async fn get_job(&self, job_id: &str) -> ApiResult<Job> {
        let (resp, mut warnings) = self.execute(self.http.get(job_id)).await?;
        let body: serde_json::Value = resp.json().await?;
        let (job, job_warnings) = parse_job(job_id, &body)?;
        warnings.extend(job_warnings);
        Ok(Reply::new(job, warnings))
    }

    async fn set_current_droplet(&self, app_guid: &str, droplet_guid: &str) -> ApiResult<()> {
        let req = self
            .http
            .patch(format!(
                "{}/v3/apps/{app_guid}/relationships/current_droplet",
                self.api
            ))
            .json(&json!({ "data": { "guid": droplet_guid } }));
        let (_, warnings) = self.execute(req).await?;
        Ok(Reply::new((), warnings))
    }

    async fn get_process_instances(&self, app_guid: &str) -> ApiResult<Vec<ProcessInstance>> {
        let url = format!("{}/v3/apps/{app_guid}/processes/web/stats", self.api);
        let (resp, warnings) = self.execute(self.http.get(url)).await?;
        let page: Page<StatsResource> = resp.json().await?;
        let instances = page
            .resources
            .into_iter()
            .map(|s| ProcessInstance {
                index: s.index,
                state: parse_instance_state(&s.state),
                details: s.details.filter(|d| !d.is_empty()),
            })
            .collect();
        Ok(Reply::new(instances, warnings))
    }
}

fn parse_warnings(headers: &HeaderMap) -> Warnings {
    headers
        .get_all(WARNINGS_HEADER)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|w| w.trim().replace('+', " "))
        .filter(|w| !w.is_empty())
        .collect()
}

fn error_detail(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let details: Vec<String> = parsed
        .errors
        .into_iter()
        .map(|e| e.detail)
        .filter(|d| !d.is_empty())
        .collect();
    if details.is_empty() {
        None
    } else {
        Some(details.join("; "))
    }
}

/// Map either a v3 job or a v3 build into the job model.
fn parse_job(id: &str, body: &serde_json::Value) -> Result<(Job, Warnings), ClientError> {
    let state = body
        .get("state")
        .and_then(|s| s.as_str())
        .ok_or_else(|| ClientError::Decode(format!("job {id} has no state")))?;

    let state = match state {
        "PROCESSING" | "POLLING" | "STAGING" => JobState::Processing,
        "COMPLETE" | "STAGED" => JobState::Complete,
        "FAILED" => JobState::Failed,
        other => {
            return Err(ClientError::Decode(format!(
                "job {id} has unknown state {other}"
            )))
        }
    };

    let failure_reason = match state {
        JobState::Failed => Some(
            body.get("error")
                .and_then(|e| e.as_str())
                .map(str::to_string)
                .or_else(|| {
                    body.get("errors")
                        .and_then(|e| e.as_array())
                        .and_then(|errs| errs.first())
                        .and_then(|e| e.get("detail"))
                        .and_then(|d| d.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "job failed without a reason".to_string()),
        ),
        _ => None,
    };

    let output = body
        .get("droplet")
        .and_then(|d| d.get("guid"))
        .and_then(|g| g.as_str())
        .map(str::to_string);

    let warnings = body
        .get("warnings")
        .and_then(|w| w.as_array())
        .map(|ws| {
            ws.iter()
                .filter_map(|w| w.get("detail").and_then(|d| d.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok((
        Job {
            id: id.to_string(),
            state,
            failure_reason,
            output,
        },
        warnings,
    ))
}

fn parse_instance_state(state: &str) -> InstanceState {
    match state {
        "RUNNING" => InstanceState::Running,
        "STARTING" => InstanceState::Starting,
        "CRASHED" => InstanceState::Crashed,
        "FLAPPING" => InstanceState::Flapping,
        _ => InstanceState::Down,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_build_states() {
        let staging = json!({ "state": "STAGING" });
        let (job, _) = parse_job("b1", &staging).unwrap();
        assert_eq!(job.state, JobState::Processing);

        let staged = json!({ "state": "STAGED", "droplet": { "guid": "d1" } });
        let (job, _) = parse_job("b1", &staged).unwrap();
        assert_eq!(job.state, JobState::Complete);
        assert_eq!(job.output.as_deref(), Some("d1"));

        let failed = json!({ "state": "FAILED", "error": "NoAppDetectedError - buildpack not detected" });
        let (job, _) = parse_job("b1", &failed).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(
            job.failure_reason.as_deref(),
            Some("NoAppDetectedError - buildpack not detected")
        );
    }

    #[test]
    fn test_parse_job_errors_and_warnings() {
        let body = json!({
            "state": "FAILED",
            "errors": [{ "detail": "quota exceeded" }],
            "warnings": [{ "detail": "deprecated stack" }]
        });
        let (job, warnings) = parse_job("j1", &body).unwrap();
        assert_eq!(job.failure_reason.as_deref(), Some("quota exceeded"));
        assert_eq!(warnings, vec!["deprecated stack".to_string()]);
    }

    #[test]
    fn test_parse_job_unknown_state_is_decode_error() {
        let body = json!({ "state": "WEIRD" });
        assert!(matches!(
            parse_job("j1", &body),
            Err(ClientError::Decode(_))
        ));
    }

    #[test]
    fn test_parse_instance_state() {
        assert_eq!(parse_instance_state("RUNNING"), InstanceState::Running);
        assert_eq!(parse_instance_state("STARTING"), InstanceState::Starting);
        assert_eq!(parse_instance_state("CRASHED"), InstanceState::Crashed);
        assert_eq!(parse_instance_state("STOPPING"), InstanceState::Down);
        assert_eq!(parse_instance_state("DOWN"), InstanceState::Down);
    }

    #[test]
    fn test_parse_warnings_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            WARNINGS_HEADER,
            HeaderValue::from_static("stack+is+deprecated, second"),
        );
        assert_eq!(
            parse_warnings(&headers),
            vec!["stack is deprecated".to_string(), "second".to_string()]
        );
    }

    #[test]
    fn test_error_detail() {
        let body = r#"{"errors":[{"detail":"App not found","title":"CF-ResourceNotFound","code":10010}]}"#;
        assert_eq!(error_detail(body).as_deref(), Some("App not found"));
        assert_eq!(error_detail("not json"), None);
    }
}
