//! Candidate feed and filing retrieval
//!
//! The filing source is an opaque fetch-with-metadata call: given a company,
//! return the latest annual filing's text, its accession number, and its
//! filing date. A local cache avoids re-downloading a filing whose accession
//! number and filing date both match the cached copy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tenk_common::{Error, Result};

use crate::models::{Candidate, SizeTier};

/// A retrieved filing
#[derive(Debug, Clone)]
pub struct Filing {
    pub cik: String,
    /// Stable revision identifier assigned by the source
    pub accession_number: String,
    /// Filing date as YYYY-MM-DD
    pub filing_date: String,
    pub text: String,
    /// Local path of the cached text file
    pub path: PathBuf,
    pub from_cache: bool,
}

/// Source of candidate companies, queried per tier
#[async_trait]
pub trait CandidateFeed: Send + Sync {
    async fn candidates(&self, tier: SizeTier, limit: usize) -> Result<Vec<Candidate>>;
}

/// Source of filings
#[async_trait]
pub trait FilingSource: Send + Sync {
    async fn latest_filing(&self, candidate: &Candidate) -> Result<Filing>;
}

/// Candidate feed backed by a JSON file of companies
pub struct StaticCandidateFeed {
    companies: Vec<Candidate>,
}

impl StaticCandidateFeed {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read candidates {} failed: {}", path.display(), e))
        })?;
        let mut companies: Vec<Candidate> = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Parse candidates {} failed: {}", path.display(), e))
        })?;
        for company in &mut companies {
            company.cik = Candidate::normalize_cik(&company.cik);
        }
        Ok(Self { companies })
    }

    pub fn from_candidates(companies: Vec<Candidate>) -> Self {
        Self { companies }
    }
}

#[async_trait]
impl CandidateFeed for StaticCandidateFeed {
    async fn candidates(&self, tier: SizeTier, limit: usize) -> Result<Vec<Candidate>> {
        Ok(self
            .companies
            .iter()
            .filter(|c| c.tier == tier)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheMeta {
    accession_number: String,
    filing_date: String,
}

/// On-disk filing cache, one directory per company
pub struct FilingCache {
    root: PathBuf,
}

impl FilingCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn company_dir(&self, cik: &str) -> PathBuf {
        self.root.join(cik)
    }

    fn text_path(&self, cik: &str) -> PathBuf {
        self.company_dir(cik).join("filing.txt")
    }

    fn meta_path(&self, cik: &str) -> PathBuf {
        self.company_dir(cik).join("meta.json")
    }

    /// Return the cached filing only when both the accession number and the
    /// filing date match exactly.
    pub fn lookup(
        &self,
        cik: &str,
        accession_number: &str,
        filing_date: &str,
    ) -> Result<Option<Filing>> {
        let meta_path = self.meta_path(cik);
        if !meta_path.exists() {
            return Ok(None);
        }

        let meta: CacheMeta = match std::fs::read_to_string(&meta_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
        {
            Some(meta) => meta,
            // Unreadable metadata is treated as a miss, not an error
            None => return Ok(None),
        };

        if meta.accession_number != accession_number || meta.filing_date != filing_date {
            return Ok(None);
        }

        let text_path = self.text_path(cik);
        let text = match std::fs::read_to_string(&text_path) {
            Ok(text) => text,
            Err(_) => return Ok(None),
        };

        Ok(Some(Filing {
            cik: cik.to_string(),
            accession_number: accession_number.to_string(),
            filing_date: filing_date.to_string(),
            text,
            path: text_path,
            from_cache: true,
        }))
    }

    /// Atomically store a filing: write to temp files, then rename. A crash
    /// mid-store leaves either the old copy or the new one, never a partial.
    pub fn store(
        &self,
        cik: &str,
        accession_number: &str,
        filing_date: &str,
        text: &str,
    ) -> Result<Filing> {
        let dir = self.company_dir(cik);
        std::fs::create_dir_all(&dir)?;

        let text_path = self.text_path(cik);
        let tmp_text = dir.join("filing.txt.tmp");
        std::fs::write(&tmp_text, text)?;
        std::fs::rename(&tmp_text, &text_path)?;

        let meta = CacheMeta {
            accession_number: accession_number.to_string(),
            filing_date: filing_date.to_string(),
        };
        let meta_json = serde_json::to_string(&meta)
            .map_err(|e| Error::Internal(format!("Serialize cache meta failed: {}", e)))?;
        let tmp_meta = dir.join("meta.json.tmp");
        std::fs::write(&tmp_meta, meta_json)?;
        std::fs::rename(&tmp_meta, self.meta_path(cik))?;

        Ok(Filing {
            cik: cik.to_string(),
            accession_number: accession_number.to_string(),
            filing_date: filing_date.to_string(),
            text: text.to_string(),
            path: text_path,
            from_cache: false,
        })
    }
}

/// SEC EDGAR filing source
///
/// EDGAR's fair-access policy requires a descriptive User-Agent and modest
/// request rates; the caller supplies the agent string.
pub struct EdgarClient {
    client: reqwest::Client,
    cache: FilingCache,
}

#[derive(Deserialize)]
struct Submissions {
    filings: SubmissionFilings,
}

#[derive(Deserialize)]
struct SubmissionFilings {
    recent: RecentFilings,
}

#[derive(Deserialize)]
struct RecentFilings {
    #[serde(rename = "accessionNumber")]
    accession_number: Vec<String>,
    #[serde(rename = "filingDate")]
    filing_date: Vec<String>,
    form: Vec<String>,
    #[serde(rename = "primaryDocument")]
    primary_document: Vec<String>,
}

impl EdgarClient {
    pub fn new(user_agent: &str, cache_dir: PathBuf) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Provider(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            cache: FilingCache::new(cache_dir),
        })
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("EDGAR request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Provider(format!(
                "EDGAR returned {} for {}",
                response.status(),
                url
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("EDGAR response parse failed: {}", e)))
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("EDGAR request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Provider(format!(
                "EDGAR returned {} for {}",
                response.status(),
                url
            )));
        }

        response
            .text()
            .await
            .map_err(|e| Error::Provider(format!("EDGAR body read failed: {}", e)))
    }
}

#[async_trait]
impl FilingSource for EdgarClient {
    async fn latest_filing(&self, candidate: &Candidate) -> Result<Filing> {
        let cik = Candidate::normalize_cik(&candidate.cik);
        let submissions: Submissions = self
            .fetch_json(&format!(
                "https://data.sec.gov/submissions/CIK{}.json",
                cik
            ))
            .await?;

        let recent = &submissions.filings.recent;
        let index = recent
            .form
            .iter()
            .position(|form| form == "10-K")
            .ok_or_else(|| {
                Error::NotFound(format!("No 10-K filing found for {}", candidate.name))
            })?;

        let accession = recent
            .accession_number
            .get(index)
            .ok_or_else(|| Error::Provider("EDGAR index out of range".to_string()))?
            .clone();
        let filing_date = recent
            .filing_date
            .get(index)
            .ok_or_else(|| Error::Provider("EDGAR index out of range".to_string()))?
            .clone();
        let document = recent
            .primary_document
            .get(index)
            .ok_or_else(|| Error::Provider("EDGAR index out of range".to_string()))?;

        // Exact accession + date match serves the cached copy
        if let Some(filing) = self.cache.lookup(&cik, &accession, &filing_date)? {
            tracing::debug!(cik = %cik, accession = %accession, "Filing served from cache");
            return Ok(filing);
        }

        let accession_compact = accession.replace('-', "");
        let url = format!(
            "https://www.sec.gov/Archives/edgar/data/{}/{}/{}",
            cik.trim_start_matches('0'),
            accession_compact,
            document
        );

        tracing::info!(cik = %cik, accession = %accession, "Downloading filing");
        let html = self.fetch_text(&url).await?;
        let text = strip_markup(&html);

        self.cache.store(&cik, &accession, &filing_date, &text)
    }
}

/// Reduce filing HTML to plain text: drop tags, scripts, and entity noise.
/// Filings are consumed by chunk embedding, so lossy whitespace handling is
/// acceptable.
fn strip_markup(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    let mut tag_done = false;
    let mut tag_name = String::new();
    let mut skip_until: Option<&'static str> = None;

    for (i, c) in html.char_indices() {
        if let Some(end_tag) = skip_until {
            if c == '<' && html[i..].to_ascii_lowercase().starts_with(end_tag) {
                // fall through so the closing tag itself is parsed as a tag
                skip_until = None;
            } else {
                continue;
            }
        }

        match c {
            '<' => {
                in_tag = true;
                tag_done = false;
                tag_name.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag_name.to_ascii_lowercase();
                if name == "script" {
                    skip_until = Some("</script");
                } else if name == "style" {
                    skip_until = Some("</style");
                }
                out.push(' ');
            }
            _ if in_tag => {
                if c.is_whitespace() {
                    tag_done = true;
                } else if !tag_done && tag_name.len() < 16 {
                    tag_name.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&#8217;", "'")
        .replace("&quot;", "\"");

    // Collapse whitespace runs
    let mut collapsed = String::with_capacity(decoded.len());
    let mut last_space = false;
    for c in decoded.chars() {
        if c.is_whitespace() {
            if !last_space {
                collapsed.push(' ');
            }
            last_space = true;
        } else {
            collapsed.push(c);
            last_space = false;
        }
    }
    collapsed.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_requires_both_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FilingCache::new(dir.path().to_path_buf());

        cache
            .store("0000320193", "0000320193-24-000123", "2024-11-01", "filing body")
            .unwrap();

        let hit = cache
            .lookup("0000320193", "0000320193-24-000123", "2024-11-01")
            .unwrap();
        assert!(hit.is_some());
        let filing = hit.unwrap();
        assert!(filing.from_cache);
        assert_eq!(filing.text, "filing body");

        // Same accession, different date: miss
        assert!(cache
            .lookup("0000320193", "0000320193-24-000123", "2024-12-01")
            .unwrap()
            .is_none());
        // Different accession, same date: miss
        assert!(cache
            .lookup("0000320193", "0000320193-25-000001", "2024-11-01")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_store_overwrites_previous_revision() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FilingCache::new(dir.path().to_path_buf());

        cache.store("0000000001", "acc-1", "2023-01-01", "old").unwrap();
        cache.store("0000000001", "acc-2", "2024-01-01", "new").unwrap();

        assert!(cache.lookup("0000000001", "acc-1", "2023-01-01").unwrap().is_none());
        let filing = cache
            .lookup("0000000001", "acc-2", "2024-01-01")
            .unwrap()
            .unwrap();
        assert_eq!(filing.text, "new");
    }

    #[tokio::test]
    async fn test_static_feed_filters_by_tier() {
        let feed = StaticCandidateFeed::from_candidates(vec![
            Candidate {
                cik: "0000000001".to_string(),
                name: "Small Co".to_string(),
                ticker: None,
                tier: SizeTier::Small,
            },
            Candidate {
                cik: "0000000002".to_string(),
                name: "Mega Co".to_string(),
                ticker: None,
                tier: SizeTier::Mega,
            },
        ]);

        let small = feed.candidates(SizeTier::Small, 10).await.unwrap();
        assert_eq!(small.len(), 1);
        assert_eq!(small[0].name, "Small Co");

        let mid = feed.candidates(SizeTier::Mid, 10).await.unwrap();
        assert!(mid.is_empty());
    }

    #[test]
    fn test_strip_markup() {
        let html = "<html><script>var x = 1;</script><body><p>Risk&nbsp;factors &amp; trends</p></body></html>";
        let text = strip_markup(html);
        assert!(text.contains("Risk factors & trends"));
        assert!(!text.contains("var x"));
        assert!(!text.contains('<'));
    }
}
