use serde::{Deserialize, Serialize};

/// Used when an error response is built from an empty message, so that an
/// error response always has something to say.
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Outcome envelope returned by operations that report faults as values
/// instead of propagating them.
///
/// An `Error` never reports an empty message: [`error`](Self::error),
/// deserialization and [`error_message`](Self::error_message) all substitute
/// [`UNKNOWN_ERROR`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "TaggedResponse<T>")]
pub enum QueueResponse<T> {
    Success(T),
    Error(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum TaggedResponse<T> {
    Success(T),
    Error(String),
}

impl<T> From<TaggedResponse<T>> for QueueResponse<T> {
    fn from(tagged: TaggedResponse<T>) -> Self {
        match tagged {
            TaggedResponse::Success(value) => QueueResponse::success(value),
            TaggedResponse::Error(message) => QueueResponse::error(message),
        }
    }
}

impl<T> QueueResponse<T> {
    pub fn success(value: T) -> Self {
        QueueResponse::Success(value)
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            QueueResponse::Error(UNKNOWN_ERROR.to_string())
        } else {
            QueueResponse::Error(message)
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, QueueResponse::Error(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            QueueResponse::Success(value) => Some(value),
            QueueResponse::Error(_) => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            QueueResponse::Success(_) => None,
            QueueResponse::Error(message) if message.trim().is_empty() => Some(UNKNOWN_ERROR),
            QueueResponse::Error(message) => Some(message.as_str()),
        }
    }

    pub fn map<U, F>(self, f: F) -> QueueResponse<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            QueueResponse::Success(value) => QueueResponse::Success(f(value)),
            QueueResponse::Error(message) => QueueResponse::Error(message),
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match self {
            QueueResponse::Success(value) => Ok(value),
            QueueResponse::Error(message) if message.trim().is_empty() => {
                Err(UNKNOWN_ERROR.to_string())
            }
            QueueResponse::Error(message) => Err(message),
        }
    }
}

impl<T> From<QueueResponse<T>> for Result<T, String> {
    fn from(response: QueueResponse<T>) -> Self {
        response.into_result()
    }
}
