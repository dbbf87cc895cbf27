use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, info};

use colloquy_core::config::SlackConfig;
use colloquy_core::error::{ColloquyError, Result};
use colloquy_core::traits::Publisher;
use colloquy_core::types::AggregateResult;

use crate::util::split_text;

/// Slack's limit on a section block's text.
const SLACK_SECTION_MAX: usize = 3000;
/// Slack's limit on a header block's text.
const SLACK_HEADER_MAX: usize = 150;

/// Posts each report section to a Slack incoming webhook as Block Kit.
pub struct SlackWebhookPublisher {
    config: SlackConfig,
    http: reqwest::Client,
}

impl SlackWebhookPublisher {
    pub fn new(config: SlackConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn err(message: impl Into<String>) -> ColloquyError {
        ColloquyError::Publish {
            channel: "slack".into(),
            message: message.into(),
        }
    }
}

/// Convert one markdown report section into Slack blocks.
///
/// The message opens with a header block. Each markdown heading starts a new
/// part rendered with a bold title, and parts are separated by dividers.
pub fn section_blocks(header: &str, markdown: &str) -> Vec<Value> {
    let header_text: String = header.chars().take(SLACK_HEADER_MAX).collect();
    let mut blocks = vec![json!({
        "type": "header",
        "text": { "type": "plain_text", "text": header_text, "emoji": true }
    })];

    for (i, part) in split_parts(markdown).iter().enumerate() {
        if i > 0 {
            blocks.push(json!({ "type": "divider" }));
        }
        for chunk in split_text(part, SLACK_SECTION_MAX) {
            blocks.push(json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": chunk }
            }));
        }
    }
    blocks
}

/// Break markdown at headings, rewriting each heading line as `*Title*`.
fn split_parts(markdown: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in markdown.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            if !current.trim().is_empty() {
                parts.push(current.trim_end().to_string());
            }
            let title = trimmed.trim_start_matches('#').trim();
            current = format!("*{}*", title);
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&line.replace("**", "*"));
    }
    if !current.trim().is_empty() {
        parts.push(current.trim_end().to_string());
    }
    parts
}

impl Publisher for SlackWebhookPublisher {
    fn name(&self) -> &str {
        "slack"
    }

    fn publish<'a>(&'a self, report: &'a AggregateResult) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if report.sections.is_empty() {
                debug!("No sections to publish to Slack");
                return Ok(());
            }

            for (i, section) in report.sections.iter().enumerate() {
                let payload = json!({ "blocks": section_blocks(&self.config.header, section) });
                let resp = self
                    .http
                    .post(&self.config.webhook_url)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| Self::err(e.to_string()))?;

                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(Self::err(format!(
                        "section {} rejected: HTTP {}: {}",
                        i + 1,
                        status,
                        body
                    )));
                }
            }

            info!(sections = report.sections.len(), "Report posted to Slack");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECTION: &str = "## Cheaper Inference at Scale\n### Summary\nCosts fell **sharply** [1].\n\n### Sources\n[1] https://example.com/costs";

    #[test]
    fn test_blocks_start_with_header() {
        let blocks = section_blocks(":robot_face: Colloquy has been busy ...", SECTION);
        assert_eq!(blocks[0]["type"], "header");
        assert_eq!(blocks[0]["text"]["text"], ":robot_face: Colloquy has been busy ...");
        assert_eq!(blocks[0]["text"]["emoji"], true);
    }

    #[test]
    fn test_headings_become_bold_parts_with_dividers() {
        let blocks = section_blocks("h", SECTION);
        let kinds: Vec<&str> = blocks.iter().map(|b| b["type"].as_str().unwrap()).collect();
        assert_eq!(
            kinds,
            vec!["header", "section", "divider", "section", "divider", "section"]
        );
        assert_eq!(blocks[1]["text"]["text"], "*Cheaper Inference at Scale*");
        assert_eq!(blocks[3]["text"]["text"], "*Summary*\nCosts fell *sharply* [1].");
        assert_eq!(blocks[3]["text"]["type"], "mrkdwn");
        assert_eq!(blocks[5]["text"]["text"], "*Sources*\n[1] https://example.com/costs");
    }

    #[test]
    fn test_long_parts_split_at_slack_limit() {
        let long = format!("### Summary\n{}", "word ".repeat(1500));
        let blocks = section_blocks("h", &long);
        let sections: Vec<&Value> = blocks.iter().filter(|b| b["type"] == "section").collect();
        assert!(sections.len() >= 3);
        for block in sections {
            assert!(block["text"]["text"].as_str().unwrap().len() <= SLACK_SECTION_MAX);
        }
    }

    #[test]
    fn test_header_is_truncated() {
        let blocks = section_blocks(&"x".repeat(400), "body");
        assert_eq!(blocks[0]["text"]["text"].as_str().unwrap().len(), SLACK_HEADER_MAX);
        assert_eq!(blocks[1]["text"]["text"], "body");
    }

    #[tokio::test]
    async fn test_empty_report_posts_nothing() {
        let publisher = SlackWebhookPublisher::new(SlackConfig {
            webhook_url: "http://127.0.0.1:9/unused".into(),
            header: "h".into(),
        });
        assert_eq!(publisher.name(), "slack");
        publisher.publish(&AggregateResult::default()).await.unwrap();
    }
}
