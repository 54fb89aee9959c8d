//! Sample Builder
//!
//! Turns the MIND-style article and behavior tables into fixed-schema
//! training samples. Data problems are recovered locally: malformed rows are
//! skipped, unknown article ids become a single `PAD` placeholder, and
//! impressions without a positive candidate are dropped.

use crate::core::tokenization::{TitleTokenizer, TokenSequence};
use crate::core::{UnifiedError, UnifiedResult};
use crate::validation_error;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use tracing::{debug, info, warn};

/// One row of the article table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsRecord {
    pub id: String,
    pub category: String,
    pub subcategory: String,
    pub title: String,
}

impl NewsRecord {
    /// Parse a tab-separated article row, `None` when it has fewer than 4 columns
    pub fn parse(line: &str) -> Option<Self> {
        let cols: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
        if cols.len() < 4 {
            return None;
        }
        Some(Self {
            id: cols[0].to_string(),
            category: cols[1].to_string(),
            subcategory: cols[2].to_string(),
            title: cols[3].to_string(),
        })
    }
}

/// One row of the behavior (impression) table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpressionRecord {
    pub impression_id: String,
    pub user_id: String,
    pub timestamp: String,
    /// Clicked article ids, oldest first
    pub history: Vec<String>,
    /// `(article id, clicked)` pairs in impression order
    pub candidates: Vec<(String, bool)>,
}

impl ImpressionRecord {
    /// Parse a tab-separated impression row
    ///
    /// Returns `None` for rows with fewer than 5 columns or with a candidate
    /// that is not a valid `id-label` pair.
    pub fn parse(line: &str) -> Option<Self> {
        let cols: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
        if cols.len() < 5 {
            return None;
        }

        let candidates = cols[4]
            .split_whitespace()
            .map(|item| {
                let (id, label) = item.rsplit_once('-')?;
                let clicked = match label {
                    "0" => false,
                    "1" => true,
                    _ => return None,
                };
                if id.is_empty() {
                    return None;
                }
                Some((id.to_string(), clicked))
            })
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            impression_id: cols[0].to_string(),
            user_id: cols[1].to_string(),
            timestamp: cols[2].to_string(),
            history: cols[3].split_whitespace().map(str::to_string).collect(),
            candidates,
        })
    }

    /// Index of the first clicked candidate
    pub fn first_positive(&self) -> Option<usize> {
        self.candidates.iter().position(|(_, clicked)| *clicked)
    }
}

/// Token cache keyed by article id, built once per article table
#[derive(Debug, Clone, Default)]
pub struct NewsIndex {
    titles: HashMap<String, TokenSequence>,
    topics: Option<HashMap<String, TokenSequence>>,
    pad_id: u32,
}

impl NewsIndex {
    /// Tokenize all records; categories are tokenized too when `include_topics`
    pub fn build(
        records: &[NewsRecord],
        tokenizer: &dyn TitleTokenizer,
        max_title_len: usize,
        include_topics: bool,
    ) -> UnifiedResult<Self> {
        let titles: Vec<&str> = records.iter().map(|r| r.title.as_str()).collect();
        let title_tokens = tokenizer.tokenize_batch(&titles, max_title_len)?;

        let topics = if include_topics {
            let categories: Vec<&str> = records.iter().map(|r| r.category.as_str()).collect();
            let topic_tokens = tokenizer.tokenize_batch(&categories, max_title_len)?;
            Some(
                records
                    .iter()
                    .map(|r| r.id.clone())
                    .zip(topic_tokens)
                    .collect(),
            )
        } else {
            None
        };

        Ok(Self {
            titles: records.iter().map(|r| r.id.clone()).zip(title_tokens).collect(),
            topics,
            pad_id: tokenizer.pad_id(),
        })
    }

    /// Read and tokenize an article table, skipping malformed rows
    pub fn load(
        path: &Path,
        tokenizer: &dyn TitleTokenizer,
        max_title_len: usize,
        include_topics: bool,
    ) -> UnifiedResult<Self> {
        let (records, skipped) = read_news_records(path)?;
        info!(
            "Loaded {} articles from {} ({} malformed rows skipped)",
            records.len(),
            path.display(),
            skipped
        );
        Self::build(&records, tokenizer, max_title_len, include_topics)
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    pub fn has_topics(&self) -> bool {
        self.topics.is_some()
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    /// Title tokens for an article, or the single-`PAD` placeholder
    pub fn title_or_pad(&self, id: &str) -> TokenSequence {
        self.titles
            .get(id)
            .cloned()
            .unwrap_or_else(|| vec![self.pad_id])
    }

    /// Topic tokens for an article, or the single-`PAD` placeholder
    pub fn topic_or_pad(&self, id: &str) -> Option<TokenSequence> {
        self.topics.as_ref().map(|topics| {
            topics
                .get(id)
                .cloned()
                .unwrap_or_else(|| vec![self.pad_id])
        })
    }
}

/// Read an article table, returning the parsed records and the skipped row count
pub fn read_news_records(path: &Path) -> UnifiedResult<(Vec<NewsRecord>, usize)> {
    let file = std::fs::File::open(path).map_err(|e| UnifiedError::IO {
        operation: "open article table".to_string(),
        path: Some(path.display().to_string()),
        source: e,
    })?;
    let mut records = Vec::new();
    let mut skipped = 0;
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match NewsRecord::parse(&line) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }
    Ok((records, skipped))
}

/// Fixed-schema training sample
///
/// `clicked_titles` always has exactly `max_history` entries, oldest first,
/// front-padded with empty sequences. `candidate_topics`, when present, is
/// aligned with `candidate_titles`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub clicked_titles: Vec<TokenSequence>,
    pub candidate_titles: Vec<TokenSequence>,
    pub candidate_topics: Option<Vec<TokenSequence>>,
    pub label: usize,
}

impl Sample {
    /// Construct a sample, enforcing the schema invariants
    pub fn new(
        clicked_titles: Vec<TokenSequence>,
        candidate_titles: Vec<TokenSequence>,
        candidate_topics: Option<Vec<TokenSequence>>,
        label: usize,
        max_history: usize,
    ) -> UnifiedResult<Self> {
        if clicked_titles.len() != max_history {
            return Err(validation_error!(
                "clicked_titles length",
                max_history,
                clicked_titles.len()
            ));
        }
        if candidate_titles.is_empty() {
            return Err(validation_error!("candidate_titles length", "> 0", 0));
        }
        if label >= candidate_titles.len() {
            return Err(validation_error!(
                "label",
                format!("< {}", candidate_titles.len()),
                label
            ));
        }
        if let Some(topics) = &candidate_topics {
            if topics.len() != candidate_titles.len() {
                return Err(validation_error!(
                    "candidate_topics length",
                    candidate_titles.len(),
                    topics.len()
                ));
            }
        }
        Ok(Self {
            clicked_titles,
            candidate_titles,
            candidate_topics,
            label,
        })
    }

    /// Number of candidates in this sample's slate
    pub fn num_candidates(&self) -> usize {
        self.candidate_titles.len()
    }

    /// Per-slot flag: `true` when the history slot holds no real article
    pub fn history_slot_is_padding(&self, pad_id: u32) -> Vec<bool> {
        self.clicked_titles
            .iter()
            .map(|t| t.iter().all(|&id| id == pad_id))
            .collect()
    }
}

/// Counters from one pass over a behavior table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub kept: usize,
    pub without_positive: usize,
    pub malformed: usize,
}

impl LoadStats {
    /// Count one build outcome, keeping the sample when there is one
    pub(crate) fn record(
        &mut self,
        impression_id: &str,
        outcome: UnifiedResult<Option<Sample>>,
        samples: &mut Vec<Sample>,
    ) {
        match outcome {
            Ok(Some(sample)) => {
                samples.push(sample);
                self.kept += 1;
            }
            Ok(None) => {
                debug!("Dropping impression {} without a positive", impression_id);
                self.without_positive += 1;
            }
            Err(e) => {
                warn!("Skipping impression {}: {}", impression_id, e);
                self.malformed += 1;
            }
        }
    }
}

/// Builds samples from impression records against a [`NewsIndex`]
#[derive(Debug, Clone, Copy)]
pub struct SampleBuilder<'a> {
    index: &'a NewsIndex,
    max_history: usize,
}

impl<'a> SampleBuilder<'a> {
    pub fn new(index: &'a NewsIndex, max_history: usize) -> Self {
        Self { index, max_history }
    }

    /// Build a sample, `Ok(None)` when the impression has no positive candidate
    pub fn build(&self, record: &ImpressionRecord) -> UnifiedResult<Option<Sample>> {
        let Some(label) = record.first_positive() else {
            return Ok(None);
        };

        let start = record.history.len().saturating_sub(self.max_history);
        let recent = &record.history[start..];
        let mut clicked_titles = vec![TokenSequence::new(); self.max_history - recent.len()];
        clicked_titles.extend(recent.iter().map(|id| self.index.title_or_pad(id)));

        let candidate_titles = record
            .candidates
            .iter()
            .map(|(id, _)| self.index.title_or_pad(id))
            .collect();
        let candidate_topics = if self.index.has_topics() {
            Some(
                record
                    .candidates
                    .iter()
                    .filter_map(|(id, _)| self.index.topic_or_pad(id))
                    .collect(),
            )
        } else {
            None
        };

        Sample::new(
            clicked_titles,
            candidate_titles,
            candidate_topics,
            label,
            self.max_history,
        )
        .map(Some)
    }

    /// Build samples from raw behavior lines
    pub fn build_from_lines<I, S>(&self, lines: I) -> (Vec<Sample>, LoadStats)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut samples = Vec::new();
        let mut stats = LoadStats::default();
        for line in lines {
            self.push_line(line.as_ref(), &mut samples, &mut stats);
        }
        (samples, stats)
    }

    fn push_line(&self, line: &str, samples: &mut Vec<Sample>, stats: &mut LoadStats) {
        if line.trim().is_empty() {
            return;
        }
        match ImpressionRecord::parse(line) {
            Some(record) => stats.record(&record.impression_id, self.build(&record), samples),
            None => stats.malformed += 1,
        }
    }

    /// Stream a behavior table from disk
    pub fn load_samples(&self, path: &Path) -> UnifiedResult<(Vec<Sample>, LoadStats)> {
        let file = std::fs::File::open(path).map_err(|e| UnifiedError::IO {
            operation: "open behavior table".to_string(),
            path: Some(path.display().to_string()),
            source: e,
        })?;
        let mut samples = Vec::new();
        let mut stats = LoadStats::default();
        for line in std::io::BufReader::new(file).lines() {
            let line = line.map_err(|e| UnifiedError::IO {
                operation: "read behavior table".to_string(),
                path: Some(path.display().to_string()),
                source: e,
            })?;
            self.push_line(&line, &mut samples, &mut stats);
        }
        info!(
            "Built {} samples from {} ({} without positive, {} malformed)",
            stats.kept,
            path.display(),
            stats.without_positive,
            stats.malformed
        );
        Ok((samples, stats))
    }
}
