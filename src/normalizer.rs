//! Raw article → fixed-schema row.
//!
//! Cleaning rules, applied in order:
//!
//! 1. collapse runs of whitespace (including newlines) in the body to one space
//! 2. if the body is longer than the limit, cut after the last `.`, `!` or `?`
//!    inside the limit, or hard-cut at the limit when there is none
//! 3. blank or missing author / image URL become `None`
//! 4. stamp `processed_at`
//!
//! Title, source name, URL and a parseable publication time are mandatory. A
//! record missing any of them is dropped and logged; the rest of the batch is
//! unaffected.

use crate::error::{PipelineError, Result};
use crate::models::{Batch, NormalizedRecord, RawArticle, RunContext};
use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, instrument, warn};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Placeholder NewsAPI returns for articles pulled by the publisher.
const REMOVED_PLACEHOLDER: &str = "[Removed]";

const SENTENCE_TERMINALS: [char; 3] = ['.', '!', '?'];

/// Apply whitespace collapsing and sentence-aware truncation.
///
/// The result is never longer than `max_chars` characters.
pub fn clean_content(raw: &str, max_chars: usize) -> String {
    let collapsed = WHITESPACE.replace_all(raw.trim(), " ");

    // byte offset of the first character past the limit
    let Some((limit, _)) = collapsed.char_indices().nth(max_chars) else {
        return collapsed.into_owned();
    };
    let window = &collapsed[..limit];

    match window.rfind(SENTENCE_TERMINALS) {
        Some(end) => window[..end + 1].to_string(),
        None => window.to_string(),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Normalize one article, or say why it cannot be.
pub fn normalize_article(
    raw: RawArticle,
    max_content_length: usize,
    processed_at: &str,
) -> Result<NormalizedRecord> {
    let url = raw.url_for_log().to_string();

    let news_title = non_blank(raw.title)
        .filter(|t| t != REMOVED_PLACEHOLDER)
        .ok_or_else(|| PipelineError::partial_record(&url, "missing title"))?;
    let source = non_blank(raw.source.and_then(|s| s.name))
        .ok_or_else(|| PipelineError::partial_record(&url, "missing source name"))?;
    let url_source =
        non_blank(raw.url).ok_or_else(|| PipelineError::partial_record(&url, "missing url"))?;
    let published = non_blank(raw.published_at)
        .ok_or_else(|| PipelineError::partial_record(&url, "missing publishedAt"))?;
    let timestamp = DateTime::parse_from_rfc3339(&published)
        .map_err(|e| PipelineError::partial_record(&url, format!("publishedAt {published:?}: {e}")))?
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Secs, true);

    Ok(NormalizedRecord {
        news_title,
        timestamp,
        url_source,
        content: clean_content(raw.content.as_deref().unwrap_or(""), max_content_length),
        source,
        author: non_blank(raw.author),
        url_to_image: non_blank(raw.url_to_image),
        processed_at: processed_at.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    max_content_length: usize,
}

impl Normalizer {
    pub fn new(max_content_length: usize) -> Self {
        Self { max_content_length }
    }

    /// Normalize a fetched result set into a [`Batch`].
    ///
    /// `now` is stamped on every record as `processed_at`. Rejected records are
    /// counted in [`Batch::dropped`]; this never fails.
    #[instrument(level = "info", skip_all, fields(run_date = %run.run_date, count = raws.len()))]
    pub fn normalize_batch(&self, run: RunContext, raws: Vec<RawArticle>, now: DateTime<Utc>) -> Batch {
        let processed_at = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let total = raws.len();
        let mut records = Vec::with_capacity(total);
        let mut dropped = 0usize;

        for raw in raws {
            match normalize_article(raw, self.max_content_length, &processed_at) {
                Ok(record) => records.push(record),
                Err(e) => {
                    dropped += 1;
                    match &e {
                        PipelineError::PartialRecord { url, reason } => {
                            warn!(%url, %reason, "Dropping article")
                        }
                        other => warn!(error = %other, "Dropping article"),
                    }
                }
            }
        }

        info!(total, kept = records.len(), dropped, "Normalized articles");
        Batch {
            run,
            records,
            dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawSource;
    use chrono::TimeZone;

    fn raw(i: usize) -> RawArticle {
        RawArticle {
            source: Some(RawSource {
                id: Some("wired".into()),
                name: Some("Wired".into()),
            }),
            author: Some("  Jane Roe ".into()),
            title: Some(format!("  Title {i} ")),
            description: None,
            url: Some(format!("https://wired.com/{i}")),
            url_to_image: Some("https://img.wired.com/x.jpg".into()),
            published_at: Some("2025-10-03T10:15:00+02:00".into()),
            content: Some("First line.\n\n  Second   line!".into()),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 3, 1, 2, 3).unwrap()
    }

    fn run() -> RunContext {
        RunContext::new(Utc.with_ymd_and_hms(2025, 10, 3, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_whitespace_is_collapsed() {
        assert_eq!(clean_content("  a\n\n b \t c  ", 200), "a b c");
    }

    #[test]
    fn test_short_content_untouched() {
        assert_eq!(clean_content("One. Two.", 200), "One. Two.");
        assert_eq!(clean_content("", 200), "");
    }

    #[test]
    fn test_truncates_at_last_sentence_boundary() {
        let text = "First sentence. Second one! Third goes on and on";
        assert_eq!(clean_content(text, 30), "First sentence. Second one!");
    }

    #[test]
    fn test_boundary_exactly_at_limit_is_kept() {
        let text = "Exactly ten. More text here";
        // "Exactly ten." is 12 chars
        assert_eq!(clean_content(text, 12), "Exactly ten.");
    }

    #[test]
    fn test_hard_cut_without_boundary() {
        let text = "a".repeat(300);
        assert_eq!(clean_content(&text, 200), "a".repeat(200));
    }

    #[test]
    fn test_multibyte_content_counts_characters() {
        let text = format!("{}. {}", "é".repeat(10), "ü".repeat(50));
        let cleaned = clean_content(&text, 20);
        assert_eq!(cleaned, format!("{}.", "é".repeat(10)));
    }

    #[test]
    fn test_length_and_boundary_properties() {
        let corpus = [
            "Breaking news. Markets rallied today as chip makers reported record earnings! Analysts were surprised? Not really.",
            "no punctuation at all just words words words words words words words words words words words",
            "Short. ",
            "Ends without stop. but then continues for quite a while longer than any sensible limit would allow at all",
            "??!!..",
        ];
        for text in corpus {
            for max in 1..=120 {
                let cleaned = clean_content(text, max);
                assert!(cleaned.chars().count() <= max, "{text:?} @ {max}");

                let collapsed = WHITESPACE.replace_all(text.trim(), " ").to_string();
                if collapsed.chars().count() > max {
                    let window: String = collapsed.chars().take(max).collect();
                    if window.contains(SENTENCE_TERMINALS) {
                        assert!(
                            cleaned.ends_with(SENTENCE_TERMINALS),
                            "{text:?} @ {max} -> {cleaned:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_normalize_article_fields() {
        let record = normalize_article(raw(1), 200, "2025-10-03T01:02:03.000Z").unwrap();
        assert_eq!(record.news_title, "Title 1");
        assert_eq!(record.timestamp, "2025-10-03T08:15:00Z");
        assert_eq!(record.url_source, "https://wired.com/1");
        assert_eq!(record.content, "First line. Second line!");
        assert_eq!(record.source, "Wired");
        assert_eq!(record.author.as_deref(), Some("Jane Roe"));
        assert_eq!(record.url_to_image.as_deref(), Some("https://img.wired.com/x.jpg"));
        assert_eq!(record.processed_at, "2025-10-03T01:02:03.000Z");
    }

    #[test]
    fn test_blank_optional_fields_become_null() {
        let mut article = raw(1);
        article.author = Some("   ".into());
        article.url_to_image = None;
        article.content = None;
        let record = normalize_article(article, 200, "x").unwrap();
        assert_eq!(record.author, None);
        assert_eq!(record.url_to_image, None);
        assert_eq!(record.content, "");
    }

    #[test]
    fn test_each_mandatory_field_drops_exactly_one_record() {
        let breakers: Vec<fn(&mut RawArticle)> = vec![
            |a: &mut RawArticle| a.title = None,
            |a: &mut RawArticle| a.title = Some(" ".into()),
            |a: &mut RawArticle| a.title = Some("[Removed]".into()),
            |a: &mut RawArticle| a.source = None,
            |a: &mut RawArticle| a.source = Some(RawSource::default()),
            |a: &mut RawArticle| a.url = None,
            |a: &mut RawArticle| a.published_at = None,
            |a: &mut RawArticle| a.published_at = Some("yesterday".into()),
        ];
        let normalizer = Normalizer::new(200);

        for breaker in breakers {
            let mut raws: Vec<RawArticle> = (0..5).map(raw).collect();
            breaker(&mut raws[2]);
            let batch = normalizer.normalize_batch(run(), raws, now());
            assert_eq!(batch.len(), 4);
            assert_eq!(batch.dropped, 1);
            assert!(batch.records.iter().all(|r| r.url_source != "https://wired.com/2"));
        }
    }

    #[test]
    fn test_batch_preserves_order_and_stamps_processed_at() {
        let batch = Normalizer::new(200).normalize_batch(run(), (0..3).map(raw).collect(), now());
        let titles: Vec<_> = batch.records.iter().map(|r| r.news_title.as_str()).collect();
        assert_eq!(titles, vec!["Title 0", "Title 1", "Title 2"]);
        assert!(batch.records.iter().all(|r| r.processed_at == "2025-10-03T01:02:03.000Z"));
        assert_eq!(batch.run, run());
    }
}
