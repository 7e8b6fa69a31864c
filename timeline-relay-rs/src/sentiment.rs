// timeline-relay-rs/src/sentiment.rs
//
// Lexicon-based sentiment scoring with a one-way loaded state
//
// The analyzer is built once by a background task at process start and
// published through a OnceCell. Until that publish lands, every scoring
// call returns a fixed neutral stub so the service keeps answering in a
// degraded mode rather than erroring.

use once_cell::sync::OnceCell;
use serde::Serialize;
use vader_sentiment::SentimentIntensityAnalyzer;

/// Compound scores at or above this magnitude map to a non-neutral label.
const COMPOUND_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentimentScores {
    pub negative: f64,
    pub neutral: f64,
    pub positive: f64,
}

impl SentimentScores {
    /// Score vector of the degraded-mode stub and of the empty-batch default.
    fn neutral() -> Self {
        Self {
            negative: 0.0,
            neutral: 1.0,
            positive: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SentimentResult {
    pub scores: SentimentScores,
    pub sentiment: SentimentLabel,
    pub confidence: f64,
}

impl SentimentResult {
    fn neutral_stub() -> Self {
        Self {
            scores: SentimentScores::neutral(),
            sentiment: SentimentLabel::Neutral,
            confidence: 1.0,
        }
    }
}

/// One scored text within a batch, input order preserved.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredText {
    pub text: String,
    pub sentiment: SentimentLabel,
    pub scores: SentimentScores,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverallSentiment {
    pub sentiment: SentimentLabel,
    pub scores: SentimentScores,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub overall: OverallSentiment,
    pub individual: Vec<ScoredText>,
}

/// Process-wide sentiment model with a single not-loaded -> loaded transition.
#[derive(Default)]
pub struct SentimentModel {
    analyzer: OnceCell<SentimentIntensityAnalyzer<'static>>,
}

impl SentimentModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the lexicon analyzer off the async runtime and publish it.
    ///
    /// Runs once at startup; a failure is logged and the model simply stays
    /// unloaded, leaving the service in degraded mode.
    pub async fn load(&self) {
        log::info!("Loading sentiment analysis model...");

        let built = tokio::task::spawn_blocking(|| {
            let analyzer = SentimentIntensityAnalyzer::new();
            // Force the embedded lexicon parse before publishing.
            analyzer.polarity_scores("warm up");
            analyzer
        })
        .await;

        match built {
            Ok(analyzer) => {
                if self.analyzer.set(analyzer).is_ok() {
                    log::info!("Sentiment analysis model loaded successfully");
                }
            }
            Err(err) => {
                log::warn!("Error loading sentiment model: {}", err);
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.analyzer.get().is_some()
    }

    /// Score a single text.
    ///
    /// Before the model finishes loading this returns the fixed neutral stub
    /// regardless of input.
    pub fn score(&self, text: &str) -> SentimentResult {
        let analyzer = match self.analyzer.get() {
            Some(analyzer) => analyzer,
            None => return SentimentResult::neutral_stub(),
        };

        let polarity = analyzer.polarity_scores(text);
        let compound = polarity.get("compound").copied().unwrap_or(0.0);

        let sentiment = if compound >= COMPOUND_THRESHOLD {
            SentimentLabel::Positive
        } else if compound <= -COMPOUND_THRESHOLD {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        };

        SentimentResult {
            scores: SentimentScores {
                negative: polarity.get("neg").copied().unwrap_or(0.0),
                neutral: polarity.get("neu").copied().unwrap_or(0.0),
                positive: polarity.get("pos").copied().unwrap_or(0.0),
            },
            sentiment,
            confidence: compound.abs(),
        }
    }

    /// Score a batch of texts, averaging the component scores for the
    /// overall result. The empty batch short-circuits to the neutral
    /// default rather than dividing by zero.
    pub fn score_batch(&self, texts: &[String]) -> BatchResult {
        let individual: Vec<ScoredText> = texts
            .iter()
            .map(|text| {
                let result = self.score(text);
                ScoredText {
                    text: text.clone(),
                    sentiment: result.sentiment,
                    scores: result.scores,
                    confidence: result.confidence,
                }
            })
            .collect();

        let overall = if individual.is_empty() {
            OverallSentiment {
                sentiment: SentimentLabel::Neutral,
                scores: SentimentScores::neutral(),
            }
        } else {
            let count = individual.len() as f64;
            let scores = SentimentScores {
                negative: individual.iter().map(|r| r.scores.negative).sum::<f64>() / count,
                neutral: individual.iter().map(|r| r.scores.neutral).sum::<f64>() / count,
                positive: individual.iter().map(|r| r.scores.positive).sum::<f64>() / count,
            };
            OverallSentiment {
                sentiment: dominant_label(&scores),
                scores,
            }
        };

        BatchResult { overall, individual }
    }
}

/// Label of the largest score component; on ties the earlier of
/// negative, neutral, positive wins.
fn dominant_label(scores: &SentimentScores) -> SentimentLabel {
    let mut label = SentimentLabel::Negative;
    let mut best = scores.negative;

    if scores.neutral > best {
        label = SentimentLabel::Neutral;
        best = scores.neutral;
    }
    if scores.positive > best {
        label = SentimentLabel::Positive;
    }

    label
}
