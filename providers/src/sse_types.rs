//! Typed SSE payloads for each wire protocol.
//!
//! Unknown or irrelevant fields are ignored; unknown event kinds land in an
//! `Unknown` variant instead of failing the decode.

/// OpenAI Chat Completions chunks, also spoken by local servers.
pub mod openai {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct Chunk {
        #[serde(default)]
        pub choices: Vec<Choice>,
        pub usage: Option<Usage>,
        pub error: Option<ErrorInfo>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Choice {
        pub delta: Option<Delta>,
        #[serde(default)]
        pub finish_reason: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Delta {
        #[serde(default)]
        pub content: Option<String>,
    }

    #[derive(Debug, Deserialize, Default)]
    pub struct Usage {
        #[serde(default)]
        pub prompt_tokens: u32,
        #[serde(default)]
        pub completion_tokens: u32,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorInfo {
        #[serde(default)]
        pub message: String,
    }

    #[cfg(test)]
    mod tests {
        use super::Chunk;

        #[test]
        fn deserialize_content_delta() {
            let json = r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#;
            let chunk: Chunk = serde_json::from_str(json).unwrap();
            assert_eq!(
                chunk.choices[0].delta.as_ref().unwrap().content.as_deref(),
                Some("Hel")
            );
            assert!(chunk.usage.is_none());
        }

        #[test]
        fn deserialize_usage_only_chunk() {
            let json = r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":30,"total_tokens":42}}"#;
            let chunk: Chunk = serde_json::from_str(json).unwrap();
            let usage = chunk.usage.unwrap();
            assert_eq!((usage.prompt_tokens, usage.completion_tokens), (12, 30));
        }
    }
}

/// Anthropic Messages API events.
pub mod claude {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum Event {
        MessageStart {
            message: MessageInfo,
        },
        MessageDelta {
            usage: Option<OutputUsage>,
        },
        ContentBlockDelta {
            delta: Delta,
        },
        MessageStop,
        Error {
            error: ErrorInfo,
        },
        /// Pings, block start/stop, and kinds added later.
        #[serde(other)]
        Unknown,
    }

    #[derive(Debug, Deserialize)]
    pub struct MessageInfo {
        pub usage: Option<InputUsage>,
    }

    /// `input_tokens` excludes cached tokens; the total adds both cache counters.
    #[derive(Debug, Deserialize, Default)]
    pub struct InputUsage {
        #[serde(default)]
        pub input_tokens: u32,
        #[serde(default)]
        pub cache_read_input_tokens: u32,
        #[serde(default)]
        pub cache_creation_input_tokens: u32,
    }

    impl InputUsage {
        #[must_use]
        pub fn total_input_tokens(&self) -> u32 {
            self.input_tokens
                .saturating_add(self.cache_read_input_tokens)
                .saturating_add(self.cache_creation_input_tokens)
        }
    }

    #[derive(Debug, Deserialize, Default)]
    pub struct OutputUsage {
        #[serde(default)]
        pub output_tokens: u32,
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum Delta {
        TextDelta {
            text: String,
        },
        #[serde(other)]
        Unknown,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorInfo {
        #[serde(default, rename = "type")]
        pub error_type: String,
        #[serde(default)]
        pub message: String,
    }

    #[cfg(test)]
    mod tests {
        use super::{Delta, Event};

        #[test]
        fn deserialize_message_start_with_cache() {
            let json = r#"{"type":"message_start","message":{"id":"m","usage":{"input_tokens":100,"cache_read_input_tokens":50}}}"#;
            match serde_json::from_str::<Event>(json).unwrap() {
                Event::MessageStart { message } => {
                    assert_eq!(message.usage.unwrap().total_input_tokens(), 150);
                }
                other => panic!("wrong event: {other:?}"),
            }
        }

        #[test]
        fn non_text_deltas_are_unknown() {
            let json = r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{"}}"#;
            match serde_json::from_str::<Event>(json).unwrap() {
                Event::ContentBlockDelta { delta } => assert!(matches!(delta, Delta::Unknown)),
                other => panic!("wrong event: {other:?}"),
            }
        }

        #[test]
        fn ping_is_unknown() {
            let event: Event = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
            assert!(matches!(event, Event::Unknown));
        }
    }
}

/// Google `streamGenerateContent` chunks. Each chunk is a whole response object.
pub mod gemini {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Response {
        pub candidates: Option<Vec<Candidate>>,
        pub error: Option<ErrorInfo>,
        pub usage_metadata: Option<UsageMetadata>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Candidate {
        pub content: Option<Content>,
        pub finish_reason: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Content {
        pub parts: Option<Vec<Part>>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Part {
        pub text: Option<String>,
        #[serde(default)]
        pub thought: bool,
    }

    #[derive(Debug, Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct UsageMetadata {
        #[serde(default)]
        pub prompt_token_count: u32,
        #[serde(default)]
        pub candidates_token_count: u32,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorInfo {
        pub message: Option<String>,
        pub code: Option<i32>,
    }

    impl ErrorInfo {
        #[must_use]
        pub fn message_or_default(&self) -> &str {
            self.message.as_deref().unwrap_or("Unknown error")
        }
    }

}
