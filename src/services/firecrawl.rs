use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::{HttpConfig, ScrapeConfig};
use crate::services::{with_retries, ScrapeOptions, ScrapeService, ScrapedPage, ServiceError};

const SERVICE: &str = "firecrawl";
pub const API_KEY_VAR: &str = "FIRECRAWL_API_KEY";

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLLS: u32 = 90;

/// Client for the Firecrawl batch scrape API.
///
/// A batch scrape is a job: the submit call returns a job id which is polled
/// until the job completes.
pub struct FirecrawlClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    max_retries: u8,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    success: bool,
    id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    status: String,
    #[serde(default)]
    data: Vec<JobDocument>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobDocument {
    markdown: Option<String>,
    #[serde(default)]
    metadata: Value,
}

impl JobDocument {
    fn source_url(&self) -> Option<String> {
        ["sourceURL", "url"]
            .into_iter()
            .find_map(|key| self.metadata.get(key).and_then(|v| v.as_str()))
            .map(|s| s.to_string())
    }
}

impl FirecrawlClient {
    pub fn new(
        api_key: String,
        config: &ScrapeConfig,
        http: &HttpConfig,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(http.timeout())
            .build()
            .map_err(|source| ServiceError::Transport {
                service: SERVICE,
                source,
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: http.max_retries,
        })
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, ServiceError> {
        let resp = req
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|source| ServiceError::Transport {
                service: SERVICE,
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| ServiceError::malformed(SERVICE, e.to_string()))
    }

    async fn submit(&self, urls: &[String], opts: &ScrapeOptions) -> Result<String, ServiceError> {
        let body = json!({
            "urls": urls,
            "formats": ["markdown"],
            "onlyMainContent": opts.only_main_content,
            "excludeTags": opts.exclude_tags,
            "timeout": opts.timeout.as_millis() as u64,
        });
        let url = format!("{}/batch/scrape", self.base_url);

        let resp = with_retries(SERVICE, self.max_retries, || {
            self.send(self.client.post(&url).json(&body))
        })
        .await?;

        let submit: SubmitResponse = serde_json::from_value(resp)
            .map_err(|e| ServiceError::malformed(SERVICE, e.to_string()))?;

        match (submit.success, submit.id) {
            (true, Some(id)) => Ok(id),
            _ => Err(ServiceError::Rejected {
                service: SERVICE,
                message: format!(
                    "failed to scrape batch: {}",
                    submit.error.unwrap_or_else(|| "unknown error".to_string())
                ),
            }),
        }
    }

    async fn fetch_status(&self, url: &str) -> Result<JobStatus, ServiceError> {
        let resp =
            with_retries(SERVICE, self.max_retries, || self.send(self.client.get(url))).await?;
        serde_json::from_value(resp).map_err(|e| ServiceError::malformed(SERVICE, e.to_string()))
    }

    async fn wait_for_job(&self, id: &str) -> Result<Vec<JobDocument>, ServiceError> {
        let status_url = format!("{}/batch/scrape/{id}", self.base_url);

        for poll in 0..MAX_POLLS {
            let job = self.fetch_status(&status_url).await?;
            log::debug!("service={SERVICE} job={id} poll={poll} status={}", job.status);

            match job.status.as_str() {
                "completed" => return self.collect_pages(job).await,
                "failed" | "cancelled" => {
                    return Err(ServiceError::Rejected {
                        service: SERVICE,
                        message: format!("batch job {id} {}", job.status),
                    })
                }
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }

        Err(ServiceError::Rejected {
            service: SERVICE,
            message: format!("batch job {id} did not finish after {MAX_POLLS} polls"),
        })
    }

    /// Large jobs are paginated through `next` links.
    async fn collect_pages(&self, mut job: JobStatus) -> Result<Vec<JobDocument>, ServiceError> {
        let mut documents = std::mem::take(&mut job.data);
        let mut next = job.next.take();

        while let Some(url) = next {
            let mut page = self.fetch_status(&url).await?;
            documents.append(&mut page.data);
            next = page.next.take();
        }

        Ok(documents)
    }
}

#[async_trait]
impl ScrapeService for FirecrawlClient {
    async fn batch_scrape(
        &self,
        urls: &[String],
        opts: &ScrapeOptions,
    ) -> Result<Vec<ScrapedPage>, ServiceError> {
        if urls.is_empty() {
            return Ok(vec![]);
        }

        let id = self.submit(urls, opts).await?;
        log::info!("service={SERVICE} job={id} urls={}", urls.len());

        let documents = self.wait_for_job(&id).await?;
        Ok(documents
            .into_iter()
            .filter_map(|doc| {
                let url = doc.source_url()?;
                Some(ScrapedPage {
                    url,
                    markdown: doc.markdown.filter(|m| !m.trim().is_empty()),
                })
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "Firecrawl"
    }
}
