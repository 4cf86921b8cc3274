//! Candidate selection and priority engine
//!
//! Owns PriorityRecord and Decision. Freshness is a hard gate: a company
//! analyzed more recently than the re-analysis interval is never eligible,
//! regardless of score. Priority only orders among eligible companies.

use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tenk_common::config::ScoringWeights;
use tenk_common::Result;
use uuid::Uuid;

use super::filing_source::CandidateFeed;
use crate::db;
use crate::models::{
    Candidate, CandidateContext, Decision, DecisionAction, ReasonCode, SchedulerSettings,
};
use crate::providers::{clean_model_json, CompletionRequest, ReasoningGateway};

pub struct SelectionEngine {
    pool: SqlitePool,
    feed: Arc<dyn CandidateFeed>,
    reasoning: Arc<ReasoningGateway>,
    weights: ScoringWeights,
}

/// Additive priority score from a company's outcome history. The shape
/// (base plus boosts plus a frequency penalty) is the contract; the constants
/// are configuration.
pub fn priority_score(
    weights: &ScoringWeights,
    times_analyzed: i64,
    total_findings: i64,
    avg_fit_score: Option<f64>,
    max_fit_score: Option<f64>,
) -> f64 {
    let mut score = weights.base;

    if max_fit_score.is_some_and(|m| m >= weights.high_value_threshold) {
        score += weights.high_value_boost;
    }
    if avg_fit_score.is_some_and(|a| a > weights.strong_avg_threshold) {
        score += weights.strong_avg_boost;
    }
    if total_findings > weights.findings_threshold {
        score += weights.findings_boost;
    }
    if times_analyzed > weights.frequent_threshold {
        score -= weights.frequent_penalty;
    }

    score.clamp(0.0, 100.0)
}

#[derive(Deserialize)]
struct AgentSelection {
    #[serde(default)]
    cik: String,
    #[serde(default)]
    rationale: String,
}

impl SelectionEngine {
    pub fn new(
        pool: SqlitePool,
        feed: Arc<dyn CandidateFeed>,
        reasoning: Arc<ReasoningGateway>,
        weights: ScoringWeights,
    ) -> Self {
        Self {
            pool,
            feed,
            reasoning,
            weights,
        }
    }

    /// Recompute every analyzed company's PriorityRecord from its full
    /// outcome history. Run at the start of every cycle.
    pub async fn refresh_priorities(&self, interval_days: i64) -> Result<usize> {
        let stats = db::results::outcome_stats(&self.pool).await?;
        let count = stats.len();

        for s in &stats {
            let record = crate::models::PriorityRecord {
                cik: s.cik.clone(),
                company_name: s.company_name.clone(),
                tier: None,
                priority_score: priority_score(
                    &self.weights,
                    s.times_analyzed,
                    s.total_findings,
                    s.avg_fit_score,
                    s.max_fit_score,
                ),
                last_analyzed_at: s.last_analyzed_at,
                next_eligible_at: s
                    .last_analyzed_at
                    .map(|t| t + chrono::Duration::days(interval_days)),
                times_analyzed: s.times_analyzed,
                total_findings: s.total_findings,
                avg_fit_score: s.avg_fit_score,
                has_high_value: s
                    .max_fit_score
                    .is_some_and(|m| m >= self.weights.high_value_threshold),
                updated_at: None,
            };
            db::priorities::upsert_priority(&self.pool, &record).await?;
        }

        tracing::debug!(companies = count, "Priority records refreshed");
        Ok(count)
    }

    /// Build the ranked shortlist for one run and log a Decision row for
    /// every candidate considered.
    pub async fn build_shortlist(
        &self,
        run_id: Uuid,
        settings: &SchedulerSettings,
        catalog_fingerprint: Option<&str>,
    ) -> Result<Vec<CandidateContext>> {
        let cap = settings.max_companies_per_run.max(0) as usize;
        let interval = settings.analysis_interval_days;
        let now = Utc::now();

        let mut shortlist: Vec<CandidateContext> = Vec::new();
        let mut skipped: Vec<(CandidateContext, ReasonCode, String)> = Vec::new();

        // One pass in strict tier order; a filled cap never evicts an
        // earlier tier's picks.
        for &tier in &settings.tier_priority {
            let candidates = self
                .feed
                .candidates(tier, settings.batch_size.max(0) as usize)
                .await?;

            let mut eligible: Vec<CandidateContext> = Vec::new();
            for mut candidate in candidates {
                candidate.cik = Candidate::normalize_cik(&candidate.cik);
                let context = self
                    .enrich(candidate, interval, catalog_fingerprint, now)
                    .await?;

                let is_eligible = context.times_analyzed == 0
                    || context.days_since_last.is_some_and(|d| d >= interval);
                if is_eligible {
                    eligible.push(context);
                } else {
                    let detail = format!(
                        "analyzed {} days ago, interval is {} days",
                        context.days_since_last.unwrap_or(0),
                        interval
                    );
                    skipped.push((context, ReasonCode::RecentlyAnalyzed, detail));
                }
            }

            // Score descending, then staleness descending; never-analyzed
            // sorts as infinitely stale.
            eligible.sort_by(|a, b| {
                b.priority_score
                    .partial_cmp(&a.priority_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        b.days_since_last
                            .unwrap_or(i64::MAX)
                            .cmp(&a.days_since_last.unwrap_or(i64::MAX))
                    })
            });

            for context in eligible {
                if shortlist.len() < cap {
                    shortlist.push(context);
                } else {
                    skipped.push((
                        context,
                        ReasonCode::CapReached,
                        format!("shortlist cap of {} already reached", cap),
                    ));
                }
            }
        }

        let shortlist = self.maybe_agent_rerank(settings, shortlist).await;

        for context in &shortlist {
            let detail = match context.reason {
                ReasonCode::FirstTime => "never analyzed before".to_string(),
                _ => format!(
                    "last analyzed {} days ago, {} findings on record, score {:.0}",
                    context.days_since_last.unwrap_or(0),
                    context.total_findings,
                    context.priority_score
                ),
            };
            let confidence = 0.5 + context.priority_score / 200.0;
            db::decisions::insert_decision(
                &self.pool,
                &Decision::new(run_id, context, DecisionAction::Analyze, detail, confidence),
            )
            .await?;
        }

        for (context, reason, detail) in skipped {
            let mut context = context;
            context.reason = reason;
            db::decisions::insert_decision(
                &self.pool,
                &Decision::new(run_id, &context, DecisionAction::Skip, detail, 1.0),
            )
            .await?;
        }

        Ok(shortlist)
    }

    async fn enrich(
        &self,
        candidate: Candidate,
        interval: i64,
        catalog_fingerprint: Option<&str>,
        now: chrono::DateTime<Utc>,
    ) -> Result<CandidateContext> {
        let record = db::priorities::load_priority(&self.pool, &candidate.cik).await?;

        let (days_since, last_at, times, findings, avg, high_value, score) = match &record {
            Some(r) if r.times_analyzed > 0 => (
                r.last_analyzed_at.map(|t| (now - t).num_days()),
                r.last_analyzed_at,
                r.times_analyzed,
                r.total_findings,
                r.avg_fit_score,
                r.has_high_value,
                r.priority_score,
            ),
            _ => (None, None, 0, 0, None, false, self.weights.base),
        };

        let reason = if times == 0 {
            ReasonCode::FirstTime
        } else if let Some(fingerprint) = catalog_fingerprint {
            let last = db::results::last_completed_analysis(&self.pool, &candidate.cik).await?;
            match last {
                Some(a) if a.catalog_fingerprint.as_deref() != Some(fingerprint) => {
                    ReasonCode::CatalogUpdated
                }
                _ if high_value => ReasonCode::HighPriority,
                _ if days_since.is_some_and(|d| d >= 2 * interval) => ReasonCode::StaleData,
                _ => ReasonCode::PeriodicRefresh,
            }
        } else if high_value {
            ReasonCode::HighPriority
        } else if days_since.is_some_and(|d| d >= 2 * interval) {
            ReasonCode::StaleData
        } else {
            ReasonCode::PeriodicRefresh
        };

        Ok(CandidateContext {
            candidate,
            days_since_last: days_since,
            last_analyzed_at: last_at,
            times_analyzed: times,
            total_findings: findings,
            avg_fit_score: avg,
            has_high_value: high_value,
            priority_score: score,
            reason,
        })
    }

    /// Optionally hand the ranked shortlist to the reasoning agent for
    /// re-ordering. Any unusable agent output falls back deterministically to
    /// the rule-based order; this never fails.
    async fn maybe_agent_rerank(
        &self,
        settings: &SchedulerSettings,
        shortlist: Vec<CandidateContext>,
    ) -> Vec<CandidateContext> {
        if !settings.use_agent || self.reasoning.is_empty() || shortlist.len() < 2 {
            return shortlist;
        }

        let summary: Vec<serde_json::Value> = shortlist
            .iter()
            .map(|c| {
                serde_json::json!({
                    "cik": c.candidate.cik,
                    "name": c.candidate.name,
                    "tier": c.candidate.tier.as_str(),
                    "score": c.priority_score,
                    "days_since_last": c.days_since_last,
                    "total_findings": c.total_findings,
                })
            })
            .collect();

        let prompt = format!(
            "Ranked analysis candidates:\n{}\n\n\
             Re-order these by expected analysis value. Keep every entry.\n\
             Respond with a JSON array of objects with fields: cik, rationale.",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );

        let request = CompletionRequest {
            system: "You prioritize analysis work and respond only with valid JSON.".to_string(),
            prompt,
            temperature: 0.2,
            max_tokens: 2048,
        };

        let raw = match self.reasoning.complete(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Agent re-rank failed, keeping rule-based order");
                return shortlist;
            }
        };

        let selections: Vec<AgentSelection> =
            match serde_json::from_str(clean_model_json(&raw)) {
                Ok(selections) => selections,
                Err(e) => {
                    tracing::warn!(error = %e, "Agent output unparseable, keeping rule-based order");
                    return shortlist;
                }
            };

        // Every returned cik must reference a known candidate, each at most
        // once; otherwise the agent output is rejected wholesale.
        let mut reordered: Vec<CandidateContext> = Vec::new();
        let mut remaining: Vec<CandidateContext> = shortlist.clone();
        for selection in &selections {
            match remaining.iter().position(|c| c.candidate.cik == selection.cik) {
                Some(index) => {
                    let mut context = remaining.remove(index);
                    if !selection.rationale.is_empty() {
                        context.reason = ReasonCode::AgentSuggested;
                    }
                    reordered.push(context);
                }
                None => {
                    tracing::warn!(cik = %selection.cik, "Agent referenced unknown candidate, keeping rule-based order");
                    return shortlist;
                }
            }
        }

        if reordered.is_empty() {
            return shortlist;
        }
        // Entries the agent dropped keep their rule-based order at the tail
        reordered.extend(remaining);
        reordered
    }
}
