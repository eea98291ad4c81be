//! Open issues from the hosting platform's REST API.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, LINK, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::types::Issue;

pub const GITHUB_API: &str = "https://api.github.com";
const PER_PAGE: u32 = 100;

pub trait IssueSource {
    /// Every open issue of `owner/repo`, pull requests excluded, in API order.
    fn list_open_issues(&self, owner: &str, repo: &str) -> Result<Vec<Issue>>;
}

/// One page of the issues listing as returned by the API.
#[derive(Debug, Clone, Default)]
pub struct IssuePage {
    pub entries: Vec<IssueEntry>,
    pub has_next: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueEntry {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub pull_request: Option<Value>,
}

impl IssueEntry {
    fn into_issue(self) -> Option<Issue> {
        if self.pull_request.is_some() {
            return None;
        }
        Some(Issue::new(
            self.number,
            self.title,
            self.body.unwrap_or_default(),
        ))
    }
}

/// Drive `fetch_page` from page 1 until an empty page or a page without a next link.
pub fn collect_pages<F>(mut fetch_page: F) -> Result<Vec<Issue>>
where
    F: FnMut(u32) -> Result<IssuePage>,
{
    let mut issues = Vec::new();
    let mut page = 1_u32;
    loop {
        let chunk = fetch_page(page).with_context(|| format!("fetch issues page {page}"))?;
        if chunk.entries.is_empty() {
            break;
        }
        let fetched = chunk.entries.len();
        issues.extend(chunk.entries.into_iter().filter_map(IssueEntry::into_issue));
        debug!(page, fetched, total = issues.len(), "issues page");
        if !chunk.has_next {
            break;
        }
        page = page.saturating_add(1);
    }
    Ok(issues)
}

/// True if a `Link` header advertises a `rel="next"` page.
pub fn has_next_page(link: Option<&str>) -> bool {
    static NEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"<[^>]*>\s*;\s*rel="next""#).expect("link regex is valid")
    });
    link.is_some_and(|value| NEXT_RE.is_match(value))
}

pub struct GithubIssues {
    client: Client,
    api_base: String,
}

impl GithubIssues {
    pub fn new(token: &SecretString) -> Result<Self> {
        Self::with_api_base(GITHUB_API, token)
    }

    pub fn with_api_base(api_base: &str, token: &SecretString) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("issue-fixer"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );
        let token = token.expose_secret().trim();
        if !token.is_empty() {
            let mut auth = HeaderValue::from_str(&format!("token {token}"))
                .context("invalid github authorization header")?;
            auth.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .context("build github client")?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn fetch_page(&self, owner: &str, repo: &str, page: u32) -> Result<IssuePage> {
        let response = self
            .client
            .get(format!("{}/repos/{owner}/{repo}/issues", self.api_base))
            .query(&[
                ("state", "open".to_string()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ])
            .send()
            .context("send issues request")?;
        let status = response.status();
        let has_next = has_next_page(
            response
                .headers()
                .get(LINK)
                .and_then(|value| value.to_str().ok()),
        );
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("issues request returned HTTP {status}: {}", body.trim());
        }
        let entries: Vec<IssueEntry> = response.json().context("decode issues page")?;
        Ok(IssuePage { entries, has_next })
    }
}

impl IssueSource for GithubIssues {
    #[instrument(skip_all, fields(owner = %owner, repo = %repo))]
    fn list_open_issues(&self, owner: &str, repo: &str) -> Result<Vec<Issue>> {
        let issues = collect_pages(|page| self.fetch_page(owner, repo, page))?;
        info!(count = issues.len(), "fetched open issues");
        Ok(issues)
    }
}
