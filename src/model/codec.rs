//! String codecs shared by every entity.
//!
//! Two encodings live at the persistence boundary:
//!
//! - JSON metadata columns (`meta`, `extracted_params`, `resource_meta`),
//!   decoded on demand and never cached next to their source string.
//! - Pipe-joined ordered lists (`current_job`, reservation `chunk`/`pod`),
//!   handled only by [`encode_list`] and [`decode_list`].

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::error::ModelError;

const LIST_SEPARATOR: char = '|';
const TOKEN_SEPARATOR: &str = "::";

/// Decode a JSON metadata column.
///
/// An empty column and a malformed one both yield `None`: the caller learns
/// that no structured value is available, not that the value is empty.
pub fn decode_json<T: DeserializeOwned>(raw: &str) -> Option<T> {
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(error = %err, "Metadata column is not valid JSON");
            None
        }
    }
}

/// Flatten a structured value into its column form.
///
/// Serialization failure never blocks the surrounding write: the column gets a
/// diagnostic string instead of the payload.
pub fn encode_or_diagnostic<T: Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "Metadata serialization failed, storing diagnostic");
            format!("failed to marshal: {err}")
        }
    }
}

/// Join an ordered list into its pipe-delimited column form.
pub fn encode_list<I, T>(items: I) -> String
where
    I: IntoIterator<Item = T>,
    T: fmt::Display,
{
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join("|")
}

/// Split a pipe-delimited column. A blank column is the empty list.
pub fn decode_list(raw: &str) -> Vec<&str> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(LIST_SEPARATOR).collect()
}

/// Check that a caller-supplied identifier can be embedded in tokens, pipe
/// lists and partition keys.
pub fn validate_identifier(kind: &'static str, value: &str) -> Result<(), ModelError> {
    if value.trim().is_empty() || value.contains(LIST_SEPARATOR) || value.contains(':') {
        return Err(ModelError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// One entry of a pod's job-slot ledger: `<task_id>::<chunk_index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobToken {
    pub task_id: String,
    pub chunk_index: u32,
}

impl JobToken {
    pub fn new(task_id: impl Into<String>, chunk_index: u32) -> Self {
        Self {
            task_id: task_id.into(),
            chunk_index,
        }
    }

    pub fn belongs_to(&self, task_id: &str) -> bool {
        self.task_id == task_id
    }
}

impl fmt::Display for JobToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.task_id, TOKEN_SEPARATOR, self.chunk_index)
    }
}

impl FromStr for JobToken {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (task_id, index) = s
            .rsplit_once(TOKEN_SEPARATOR)
            .ok_or_else(|| ModelError::InvalidToken(s.to_string()))?;
        if task_id.is_empty() {
            return Err(ModelError::InvalidToken(s.to_string()));
        }
        let chunk_index = index
            .parse()
            .map_err(|_| ModelError::InvalidToken(s.to_string()))?;
        Ok(Self::new(task_id, chunk_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serializer};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("boom"))
        }
    }

    #[test]
    fn test_decode_json_empty_and_malformed() {
        assert_eq!(decode_json::<Sample>(""), None);
        assert_eq!(decode_json::<Sample>("   "), None);
        assert_eq!(decode_json::<Sample>("{not json"), None);
        assert_eq!(
            decode_json::<Sample>(r#"{"name":"a"}"#),
            Some(Sample {
                name: "a".to_string()
            })
        );
    }

    #[test]
    fn test_encode_failure_degrades_to_diagnostic() {
        let text = encode_or_diagnostic(&Unserializable);
        assert!(text.starts_with("failed to marshal: "));
        assert!(text.contains("boom"));
    }

    #[test]
    fn test_list_codec() {
        assert!(decode_list("").is_empty());
        assert!(decode_list(" ").is_empty());
        assert_eq!(decode_list("a|b|c"), vec!["a", "b", "c"]);
        assert_eq!(encode_list(["a", "b"]), "a|b");
        assert_eq!(encode_list(Vec::<String>::new()), "");
        assert_eq!(encode_list([0u32, 1, 2]), "0|1|2");
    }

    #[test]
    fn test_job_token_format() {
        let token = JobToken::new("task-1", 7);
        assert_eq!(token.to_string(), "task-1::7");
        assert_eq!("task-1::7".parse::<JobToken>().unwrap(), token);
    }

    #[test]
    fn test_job_token_rejects_garbage() {
        assert!("task-1".parse::<JobToken>().is_err());
        assert!("::3".parse::<JobToken>().is_err());
        assert!("task::x".parse::<JobToken>().is_err());
        assert!("task::-1".parse::<JobToken>().is_err());
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("task", "0193a2b4-task").is_ok());
        assert!(validate_identifier("task", "").is_err());
        assert!(validate_identifier("task", "a|b").is_err());
        assert!(validate_identifier("pod", "a:b").is_err());
    }
}
