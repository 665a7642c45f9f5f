//! Prompt builders for call-derived and news-derived analysis.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::types::{CallRecord, EmailEngagement, Transcript};

/// Transcript text kept per call.
pub const MAX_TRANSCRIPT_CHARS_PER_CALL: usize = 6_000;

/// Overall ceiling on call evidence in one prompt.
pub const MAX_EVIDENCE_CHARS: usize = 60_000;

const OUTPUT_FORMAT: &str = r#"Return a single JSON object:
{
  "signals": [
    {
      "category": "<one of the categories>",
      "summary": "<one sentence>",
      "strength": <0.0 to 1.0>,
      "evidence": ["<short quote or fact>"],
      "callIds": ["<call id the evidence came from>"]
    }
  ],
  "overallSummary": "<two sentences at most>"
}
Use an empty "signals" list when there is no evidence. Do not invent facts."#;

fn format_call_header(call: &CallRecord) -> String {
    let date = call
        .occurred_at()
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown date".to_string());
    let mut header = format!(
        "### Call {} | {} | {} | {} min",
        call.id,
        call.title,
        date,
        call.duration_secs / 60
    );
    if !call.topics.is_empty() {
        let _ = write!(header, " | topics: {}", call.topics.join(", "));
    }
    if let Some(sentiment) = &call.sentiment {
        let _ = write!(header, " | sentiment: {}", sentiment);
    }
    header
}

/// Prompt for signals across a set of calls about one entity.
pub fn build_call_signal_prompt(
    entity_label: &str,
    calls: &[CallRecord],
    transcripts: &HashMap<String, Transcript>,
    engagement: Option<&EmailEngagement>,
    categories: &[String],
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Identify buying signals for \"{}\" from the sales calls below.",
        entity_label
    );
    let _ = writeln!(prompt, "Categories: {}.", categories.join(", "));
    prompt.push('\n');

    if let Some(e) = engagement.filter(|e| e.sent > 0) {
        let _ = writeln!(
            prompt,
            "Email engagement (last 30 days): {} sent, {} opened, {} clicked, {} replied.\n",
            e.sent, e.opened, e.clicked, e.replied
        );
    }

    let mut evidence_chars = 0usize;
    for call in calls {
        let header = format_call_header(call);
        let body = transcripts
            .get(&call.id)
            .map(|t| t.plain_text(MAX_TRANSCRIPT_CHARS_PER_CALL))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "(no transcript available)\n".to_string());

        if evidence_chars + header.len() + body.len() > MAX_EVIDENCE_CHARS {
            let _ = writeln!(prompt, "(further calls omitted)");
            break;
        }
        evidence_chars += header.len() + body.len();
        let _ = writeln!(prompt, "{}", header);
        prompt.push_str(&body);
        prompt.push('\n');
    }

    prompt.push_str(OUTPUT_FORMAT);
    prompt
}

/// Prompt for a web search about one account.
pub fn build_news_signal_prompt(account_name: &str, categories: &[String]) -> String {
    format!(
        "Search recent news (last 90 days) about the company \"{}\". \
         Identify events that suggest it may buy, expand, renew or churn: funding, \
         leadership changes, acquisitions, layoffs, new offices, product launches.\n\
         Categories: {}.\n\n{}",
        account_name,
        categories.join(", "),
        OUTPUT_FORMAT
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gong::fake::call;
    use crate::types::{SentenceSpan, TranscriptSegment};

    fn categories() -> Vec<String> {
        vec!["budget".to_string(), "timeline".to_string()]
    }

    fn transcript(call_id: &str, text: &str) -> Transcript {
        Transcript {
            call_id: call_id.to_string(),
            segments: vec![TranscriptSegment {
                speaker_id: Some("buyer".to_string()),
                topic: None,
                sentences: vec![SentenceSpan {
                    start: 0,
                    end: 1,
                    text: text.to_string(),
                }],
            }],
        }
    }

    #[test]
    fn test_call_prompt_includes_evidence() {
        let calls = vec![
            call("c1", "Pricing review").with_topics(&["Pricing"]),
            call("c2", "Intro"),
        ];
        let mut transcripts = HashMap::new();
        transcripts.insert("c1".to_string(), transcript("c1", "Budget is approved."));
        let engagement = EmailEngagement {
            sent: 4,
            opened: 3,
            clicked: 1,
            replied: 1,
        };

        let prompt = build_call_signal_prompt(
            "Acme Renewal",
            &calls,
            &transcripts,
            Some(&engagement),
            &categories(),
        );

        assert!(prompt.contains("\"Acme Renewal\""));
        assert!(prompt.contains("Categories: budget, timeline."));
        assert!(prompt.contains("4 sent, 3 opened, 1 clicked, 1 replied"));
        assert!(prompt.contains("### Call c1 | Pricing review"));
        assert!(prompt.contains("topics: Pricing"));
        assert!(prompt.contains("buyer: Budget is approved."));
        assert!(prompt.contains("(no transcript available)"));
        assert!(prompt.contains("\"signals\""));
    }

    #[test]
    fn test_call_prompt_skips_empty_engagement() {
        let prompt = build_call_signal_prompt(
            "Acme",
            &[call("c1", "Sync")],
            &HashMap::new(),
            Some(&EmailEngagement::default()),
            &categories(),
        );
        assert!(!prompt.contains("Email engagement"));
    }

    #[test]
    fn test_call_prompt_bounded() {
        let calls: Vec<CallRecord> = (0..40).map(|i| call(&format!("c{i}"), "Sync")).collect();
        let long = "word ".repeat(1_000);
        let transcripts: HashMap<String, Transcript> = calls
            .iter()
            .map(|c| (c.id.clone(), transcript(&c.id, &long)))
            .collect();

        let prompt = build_call_signal_prompt("Acme", &calls, &transcripts, None, &categories());
        assert!(prompt.len() < MAX_EVIDENCE_CHARS + 2_000);
        assert!(prompt.contains("(further calls omitted)"));
    }

    #[test]
    fn test_call_prompt_keeps_long_monologue() {
        let text = format!(
            "The budget approved covers rollout. {}",
            "More detail here. ".repeat(400)
        );
        let mut transcripts = HashMap::new();
        transcripts.insert("c1".to_string(), transcript("c1", &text));

        let calls = [call("c1", "Sync")];
        let prompt = build_call_signal_prompt("Acme", &calls, &transcripts, None, &categories());

        assert!(prompt.contains("buyer: The budget approved"));
        assert!(!prompt.contains("(no transcript available)"));
    }

    #[test]
    fn test_news_prompt() {
        let prompt = build_news_signal_prompt("Globex", &categories());
        assert!(prompt.contains("\"Globex\""));
        assert!(prompt.contains("Categories: budget, timeline."));
        assert!(prompt.contains("\"overallSummary\""));
    }
}
