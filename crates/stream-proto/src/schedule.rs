//! Remote day schedule: `GET <base>/<yyyymmdd>` returning
//! `{ "list": [ { id, time, title, short_title, info, url_stream, day_label } ] }`.

use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::CatalogConfig;
use crate::error::{CatalogError, Result};
use crate::program::Program;

pub const DEFAULT_BASE_URL: &str = "http://oe1.orf.at/programm/konsole/tag/";

/// Wire shape of the schedule document. Every field is required and
/// string-typed; `id` carries a decimal number.
#[derive(Debug, Deserialize)]
struct ScheduleDocument {
    list: Vec<RawProgram>,
}

#[derive(Debug, Deserialize)]
struct RawProgram {
    id: String,
    time: String,
    title: String,
    short_title: String,
    info: String,
    url_stream: String,
    day_label: String,
}

/// Stateless schedule fetcher; safe to share and call concurrently.
#[derive(Debug, Clone)]
pub struct ScheduleClient {
    client: reqwest::Client,
    base_url: String,
}

impl ScheduleClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn from_config(config: &CatalogConfig) -> Result<Self> {
        Self::new(
            config.schedule_base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn schedule_url(&self, date: NaiveDate) -> String {
        schedule_url(&self.base_url, date)
    }

    /// Fetch and parse the schedule of `date`. Transport failures come back as
    /// `Network`/`Status`, a malformed body as a single `Parse`; no retries.
    pub async fn fetch_schedule(&self, date: NaiveDate) -> Result<Vec<Program>> {
        let url = self.schedule_url(date);
        debug!("schedule: GET {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("schedule: {} returned {}", url, status);
            return Err(CatalogError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        let programs = parse_schedule(&body).inspect_err(|e| {
            warn!("schedule: {} for {}", e, url);
        })?;
        info!("schedule: {} programs for {}", programs.len(), date);
        Ok(programs)
    }

    pub async fn fetch_today(&self) -> Result<Vec<Program>> {
        self.fetch_schedule(chrono::Local::now().date_naive()).await
    }
}

/// `base` followed by `yyyymmdd`, inserting a `/` when `base` lacks one.
pub fn schedule_url(base: &str, date: NaiveDate) -> String {
    let sep = if base.ends_with('/') { "" } else { "/" };
    format!("{}{}{}", base, sep, date.format("%Y%m%d"))
}

/// Parse a schedule document. All-or-nothing: one bad element rejects the
/// whole document.
pub fn parse_schedule(body: &str) -> Result<Vec<Program>> {
    let doc: ScheduleDocument = serde_json::from_str(body)?;
    doc.list
        .into_iter()
        .enumerate()
        .map(|(idx, raw)| {
            let id = raw.id.trim().parse::<i64>().map_err(|_| {
                CatalogError::Parse(format!("list[{}]: id {:?} is not numeric", idx, raw.id))
            })?;
            Ok(Program {
                id,
                time: raw.time,
                title: raw.title,
                short_title: raw.short_title,
                info: raw.info,
                url: raw.url_stream,
                day_label: raw.day_label,
            })
        })
        .collect()
}
