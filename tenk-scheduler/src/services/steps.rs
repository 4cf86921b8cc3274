//! Reasoning pipeline stages: extract, match, score, synthesize, validate
//!
//! Every stage call is allowed to fail or return malformed output; the stage
//! then substitutes a single low-confidence placeholder record instead of
//! aborting the company. Hard failures only come from earlier, non-reasoning
//! steps (fetch, prepare).

use serde::Deserialize;
use std::sync::Arc;
use tenk_common::config::ReasoningConfig;

use super::catalog::Catalog;
use super::vector_store::Snippet;
use crate::models::{AnalysisOutput, Finding, Pitch, ProductMatch};
use crate::providers::{clean_model_json, CompletionRequest, ReasoningGateway};

pub struct StageRunner {
    reasoning: Arc<ReasoningGateway>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct RawFinding {
    #[serde(default)]
    theme: String,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    quotes: Vec<String>,
}

#[derive(Deserialize)]
struct RawMatch {
    #[serde(default)]
    product_id: String,
    #[serde(default)]
    product_name: String,
    #[serde(default)]
    why: String,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    objections: Vec<String>,
    #[serde(default)]
    pain_theme: String,
}

#[derive(Deserialize)]
struct RawScore {
    #[serde(default)]
    product_id: String,
    #[serde(default)]
    fit_score: f64,
}

#[derive(Deserialize)]
struct RawPitch {
    #[serde(default)]
    persona: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    key_quotes: Vec<String>,
}

impl StageRunner {
    pub fn new(reasoning: Arc<ReasoningGateway>, config: &ReasoningConfig) -> Self {
        Self {
            reasoning,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    async fn call(&self, system: &str, prompt: String) -> Option<String> {
        let request = CompletionRequest {
            system: system.to_string(),
            prompt,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        match self.reasoning.complete(&request).await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(error = %e, "Reasoning call failed, substituting placeholder");
                None
            }
        }
    }

    /// Extract pain points and strategic priorities from filing snippets
    pub async fn extract_findings(
        &self,
        company_name: &str,
        snippets: &[Snippet],
        feedback: &[String],
    ) -> Vec<Finding> {
        let excerpts: String = snippets
            .iter()
            .enumerate()
            .map(|(i, s)| format!("[{}] {}\n", i + 1, s.text))
            .collect();

        let feedback_block = if feedback.is_empty() {
            String::new()
        } else {
            format!(
                "\nA prior attempt was rejected for these reasons; address them:\n{}\n",
                feedback.join("\n")
            )
        };

        let prompt = format!(
            "Company: {}\n\nAnnual report excerpts:\n{}{}\n\
             Identify the company's concrete pain points and strategic priorities.\n\
             Respond with a JSON array of objects with fields: theme (short label), \
             rationale, confidence (0 to 1), quotes (verbatim excerpts supporting the finding).",
            company_name, excerpts, feedback_block
        );

        let raw = self
            .call(
                "You analyze SEC annual filings and respond only with valid JSON.",
                prompt,
            )
            .await;

        let parsed: Option<Vec<RawFinding>> =
            raw.as_deref().and_then(|r| serde_json::from_str(clean_model_json(r)).ok());

        match parsed {
            Some(raw_findings) if !raw_findings.is_empty() => raw_findings
                .into_iter()
                .filter(|f| !f.theme.is_empty())
                .map(|f| Finding {
                    theme: f.theme,
                    rationale: f.rationale,
                    confidence: f.confidence.clamp(0.0, 1.0),
                    quotes: f.quotes,
                })
                .collect(),
            _ => vec![placeholder_finding()],
        }
    }

    /// Match catalog products against the extracted findings
    pub async fn match_products(
        &self,
        company_name: &str,
        findings: &[Finding],
        catalog: &Catalog,
    ) -> Vec<ProductMatch> {
        if catalog.is_empty() {
            return vec![placeholder_match()];
        }

        let findings_json = serde_json::to_string(findings).unwrap_or_else(|_| "[]".to_string());
        let products: String = catalog
            .products
            .iter()
            .map(|p| format!("- {} ({}): {}\n", p.name, p.id, p.description))
            .collect();

        let prompt = format!(
            "Company: {}\n\nTheir pain points:\n{}\n\nOur product catalog:\n{}\n\
             Propose which products address which pain points.\n\
             Respond with a JSON array of objects with fields: product_id, product_name, \
             why, evidence (supporting quotes), objections (likely pushback), \
             pain_theme (the theme of the finding addressed).",
            company_name, findings_json, products
        );

        let raw = self
            .call(
                "You map business pain points to products and respond only with valid JSON.",
                prompt,
            )
            .await;

        let parsed: Option<Vec<RawMatch>> =
            raw.as_deref().and_then(|r| serde_json::from_str(clean_model_json(r)).ok());

        match parsed {
            Some(raw_matches) if !raw_matches.is_empty() => raw_matches
                .into_iter()
                .filter(|m| !m.product_id.is_empty())
                .map(|m| ProductMatch {
                    product_id: m.product_id,
                    product_name: m.product_name,
                    fit_score: 0.0,
                    why: m.why,
                    evidence: m.evidence,
                    objections: m.objections,
                    pain_theme: m.pain_theme,
                })
                .collect(),
            _ => vec![placeholder_match()],
        }
    }

    /// Assign fit scores (0-100) to the proposed matches. On failure the
    /// matches keep a conservative default score.
    pub async fn score_matches(
        &self,
        company_name: &str,
        mut matches: Vec<ProductMatch>,
    ) -> Vec<ProductMatch> {
        let matches_json = serde_json::to_string(&matches).unwrap_or_else(|_| "[]".to_string());
        let prompt = format!(
            "Company: {}\n\nProposed product matches:\n{}\n\
             Score each match for real-world fit.\n\
             Respond with a JSON array of objects with fields: product_id, fit_score (0 to 100).",
            company_name, matches_json
        );

        let raw = self
            .call(
                "You score product-fit proposals and respond only with valid JSON.",
                prompt,
            )
            .await;

        let parsed: Option<Vec<RawScore>> =
            raw.as_deref().and_then(|r| serde_json::from_str(clean_model_json(r)).ok());

        match parsed {
            Some(scores) => {
                for m in &mut matches {
                    if let Some(s) = scores.iter().find(|s| s.product_id == m.product_id) {
                        m.fit_score = s.fit_score.clamp(0.0, 100.0);
                    }
                }
                matches
            }
            None => {
                for m in &mut matches {
                    if m.fit_score == 0.0 {
                        m.fit_score = 25.0;
                    }
                }
                matches
            }
        }
    }

    /// Draft outreach pitches from the findings and scored matches
    pub async fn synthesize_pitches(
        &self,
        company_name: &str,
        findings: &[Finding],
        matches: &[ProductMatch],
    ) -> Vec<Pitch> {
        let findings_json = serde_json::to_string(findings).unwrap_or_else(|_| "[]".to_string());
        let matches_json = serde_json::to_string(matches).unwrap_or_else(|_| "[]".to_string());

        let prompt = format!(
            "Company: {}\n\nPain points:\n{}\n\nScored product matches:\n{}\n\
             Draft a short outreach pitch for the best match, grounded in quotes from the filing.\n\
             Respond with a JSON array of objects with fields: persona (target role), \
             subject, body, key_quotes (filing quotes cited in the body).",
            company_name, findings_json, matches_json
        );

        let raw = self
            .call(
                "You write grounded B2B outreach and respond only with valid JSON.",
                prompt,
            )
            .await;

        let parsed: Option<Vec<RawPitch>> =
            raw.as_deref().and_then(|r| serde_json::from_str(clean_model_json(r)).ok());

        match parsed {
            Some(raw_pitches) if !raw_pitches.is_empty() => raw_pitches
                .into_iter()
                .filter(|p| !p.body.is_empty())
                .map(|p| Pitch {
                    persona: p.persona,
                    subject: p.subject,
                    body: p.body,
                    key_quotes: p.key_quotes,
                })
                .collect(),
            _ => vec![placeholder_pitch()],
        }
    }
}

const PLACEHOLDER_THEME: &str = "unclassified";

fn placeholder_finding() -> Finding {
    Finding {
        theme: PLACEHOLDER_THEME.to_string(),
        rationale: "extraction produced no usable findings".to_string(),
        confidence: 0.1,
        quotes: Vec::new(),
    }
}

/// A placeholder substituted for a failed extraction does not count as an
/// extracted finding for the completion rule.
pub fn is_placeholder_finding(finding: &Finding) -> bool {
    finding.theme == PLACEHOLDER_THEME && finding.quotes.is_empty()
}

fn placeholder_match() -> ProductMatch {
    ProductMatch {
        product_id: "none".to_string(),
        product_name: "No match".to_string(),
        fit_score: 0.0,
        why: "matching produced no usable candidates".to_string(),
        evidence: Vec::new(),
        objections: Vec::new(),
        pain_theme: "unclassified".to_string(),
    }
}

fn placeholder_pitch() -> Pitch {
    Pitch {
        persona: "unknown".to_string(),
        subject: String::new(),
        body: String::new(),
        key_quotes: Vec::new(),
    }
}

/// Referee checks over a candidate output. Returns the list of failed checks;
/// empty means the output is accepted.
pub fn validate_output(output: &AnalysisOutput, min_confidence: f32) -> Vec<String> {
    let mut issues = Vec::new();

    if !output
        .findings
        .iter()
        .any(|f| f.confidence >= min_confidence)
    {
        issues.push(format!(
            "no finding reaches the minimum confidence of {}",
            min_confidence
        ));
    }

    if !output.findings.iter().any(|f| !f.quotes.is_empty()) {
        issues.push("no finding carries a supporting citation".to_string());
    }

    if !output.matches.iter().any(|m| m.product_id != "none") {
        issues.push("no product match was found".to_string());
    }

    if !output.pitches.iter().any(|p| !p.key_quotes.is_empty()) {
        issues.push("synthesized pitch cites no supporting evidence".to_string());
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good_output() -> AnalysisOutput {
        AnalysisOutput {
            findings: vec![Finding {
                theme: "supply chain".to_string(),
                rationale: "sole-source risk".to_string(),
                confidence: 0.8,
                quotes: vec!["quote".to_string()],
            }],
            matches: vec![ProductMatch {
                product_id: "p-1".to_string(),
                product_name: "Suite".to_string(),
                fit_score: 80.0,
                why: "addresses risk".to_string(),
                evidence: vec!["quote".to_string()],
                objections: vec![],
                pain_theme: "supply chain".to_string(),
            }],
            pitches: vec![Pitch {
                persona: "VP Ops".to_string(),
                subject: "s".to_string(),
                body: "b".to_string(),
                key_quotes: vec!["quote".to_string()],
            }],
            referee_iterations: 1,
        }
    }

    #[test]
    fn test_validate_accepts_complete_output() {
        assert!(validate_output(&good_output(), 0.6).is_empty());
    }

    #[test]
    fn test_validate_flags_low_confidence() {
        let mut output = good_output();
        output.findings[0].confidence = 0.2;
        let issues = validate_output(&output, 0.6);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("confidence"));
    }

    #[test]
    fn test_validate_flags_placeholder_everything() {
        let output = AnalysisOutput {
            findings: vec![placeholder_finding()],
            matches: vec![placeholder_match()],
            pitches: vec![placeholder_pitch()],
            referee_iterations: 1,
        };
        let issues = validate_output(&output, 0.6);
        // Low confidence, no citation, no match, no pitch evidence
        assert_eq!(issues.len(), 4);
    }

    #[test]
    fn test_validate_flags_missing_citation() {
        let mut output = good_output();
        output.findings[0].quotes.clear();
        let issues = validate_output(&output, 0.6);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("citation"));
    }
}
