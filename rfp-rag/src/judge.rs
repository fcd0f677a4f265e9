//! LLM-as-judge scoring of generated answers.
//!
//! A [`Judge`] rates an answer on three integer scales from 1 to 5
//! (accuracy, completeness, professionalism) and explains its rating.
//! Model replies are parsed with [`parse_judgement`], which tolerates prose
//! around the JSON object but never invents a score: anything unparsable is a
//! [`RagError::MalformedResponse`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Structured quality ratings for one answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeScores {
    pub accuracy: u8,
    pub completeness: u8,
    pub professionalism: u8,
    pub rationale: String,
}

/// A backend that scores an answer to a query.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &str;

    async fn judge(&self, query: &str, answer: &str) -> Result<JudgeScores>;
}

/// Offline judge returning fixed mid-range scores.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyJudge;

impl DummyJudge {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Judge for DummyJudge {
    fn name(&self) -> &str {
        "dummy"
    }

    async fn judge(&self, _query: &str, _answer: &str) -> Result<JudgeScores> {
        Ok(JudgeScores {
            accuracy: 3,
            completeness: 3,
            professionalism: 3,
            rationale: "DUMMY judge: fixed scores for offline smoke tests".into(),
        })
    }
}

#[derive(Deserialize)]
struct RawScores {
    accuracy: i64,
    completeness: i64,
    professionalism: i64,
    #[serde(default)]
    rationale: String,
}

/// Extract and validate the JSON object in a judge model's reply.
///
/// The object is taken from the first `{` to the last `}`, so surrounding
/// prose or code fences are ignored.
///
/// # Errors
///
/// Returns [`RagError::MalformedResponse`] when the reply holds no brace
/// pair, the extracted text is not a valid score object, or a score lies
/// outside 1..=5.
pub fn parse_judgement(backend: &str, reply: &str) -> Result<JudgeScores> {
    let malformed = |message: String| RagError::MalformedResponse {
        backend: backend.to_string(),
        message,
    };

    let object = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => return Err(malformed(format!("no JSON object in judge reply: {reply:?}"))),
    };
    let raw: RawScores = serde_json::from_str(object)
        .map_err(|e| malformed(format!("invalid judge JSON ({e}): {object}")))?;

    let score = |name: &str, value: i64| -> Result<u8> {
        u8::try_from(value)
            .ok()
            .filter(|v| (1..=5).contains(v))
            .ok_or_else(|| malformed(format!("{name} score {value} is outside 1..=5")))
    };

    Ok(JudgeScores {
        accuracy: score("accuracy", raw.accuracy)?,
        completeness: score("completeness", raw.completeness)?,
        professionalism: score("professionalism", raw.professionalism)?,
        rationale: raw.rationale.trim().to_string(),
    })
}

/// Build the evaluation prompt sent to a model-backed judge.
pub fn judge_prompt(query: &str, answer: &str) -> String {
    format!(
        r#"You are a bid consultant with ten years of experience in public procurement.
Evaluate the following AI answer.

[Question]
{query}

[Answer]
{answer}

Score each criterion as an integer from 1 to 5:
1) accuracy: consistent with the facts and sources, no hallucination
2) completeness: addresses what the question asks, with minimal omissions
3) professionalism: practically useful from a bid-consulting perspective (risks, strategy, points to verify)

Reply with this JSON object only, no other text:
{{
  "accuracy": <1-5 int>,
  "completeness": <1-5 int>,
  "professionalism": <1-5 int>,
  "rationale": "<short reason>"
}}"#
    )
}

#[cfg(feature = "openai")]
pub use self::openai_backend::OpenAiJudge;

#[cfg(feature = "openai")]
mod openai_backend {
    use async_trait::async_trait;
    use tracing::warn;

    use super::{Judge, JudgeScores, judge_prompt, parse_judgement};
    use crate::error::{RagError, Result};
    use crate::openai::OpenAiChatClient;

    /// A [`Judge`] backed by a chat model.
    ///
    /// A reply that cannot be parsed is re-asked once; a second malformed
    /// reply is returned as the error.
    pub struct OpenAiJudge {
        client: OpenAiChatClient,
    }

    impl OpenAiJudge {
        pub fn new(client: OpenAiChatClient) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl Judge for OpenAiJudge {
        fn name(&self) -> &str {
            "openai"
        }

        async fn judge(&self, query: &str, answer: &str) -> Result<JudgeScores> {
            let prompt = judge_prompt(query, answer);
            let reply = self.client.complete(None, &prompt).await?;
            match parse_judgement(self.name(), &reply) {
                Err(e @ RagError::MalformedResponse { .. }) => {
                    warn!(model = self.client.model(), error = %e, "malformed judge reply, asking again");
                    let reply = self.client.complete(None, &prompt).await?;
                    parse_judgement(self.name(), &reply)
                }
                other => other,
            }
        }
    }
}
