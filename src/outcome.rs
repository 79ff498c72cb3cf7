//! Result objects returned by write operations

use serde::{Serialize, Serializer};
use std::fmt;

use crate::RecordPayload;

/// Write operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOperation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriteOperation::Insert => "insert",
            WriteOperation::Update => "update",
            WriteOperation::Delete => "delete",
        })
    }
}

/// Outcome of a write, carrying an HTTP-style status code.
///
/// Serializes to `{code, data}` on success, `{code, error}` for a failed insert,
/// and `{code, message}` for a failed update or delete.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// 201
    Created(RecordPayload),
    /// 200
    Updated(RecordPayload),
    /// 200
    Deleted,
    /// 500
    Failed {
        operation: WriteOperation,
        message: String,
    },
}

impl WriteOutcome {
    pub fn code(&self) -> u16 {
        match self {
            WriteOutcome::Created(_) => 201,
            WriteOutcome::Updated(_) | WriteOutcome::Deleted => 200,
            WriteOutcome::Failed { .. } => 500,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, WriteOutcome::Failed { .. })
    }

    /// Stored record, for inserts and updates
    pub fn data(&self) -> Option<&RecordPayload> {
        match self {
            WriteOutcome::Created(record) | WriteOutcome::Updated(record) => Some(record),
            _ => None,
        }
    }

    /// Failure message
    pub fn message(&self) -> Option<&str> {
        match self {
            WriteOutcome::Failed { message, .. } => Some(message),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct WireOutcome<'a> {
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a RecordPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

impl Serialize for WriteOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (error, message) = match self {
            WriteOutcome::Failed {
                operation: WriteOperation::Insert,
                message,
            } => (Some(message.as_str()), None),
            WriteOutcome::Failed { message, .. } => (None, Some(message.as_str())),
            _ => (None, None),
        };
        WireOutcome {
            code: self.code(),
            data: self.data(),
            error,
            message,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shapes() {
        let created = WriteOutcome::Created(RecordPayload::new("posts").with_id("1"));
        assert_eq!(
            serde_json::to_value(&created).unwrap(),
            json!({"code": 201, "data": {"id": "1", "table": "posts"}})
        );

        let insert_failed = WriteOutcome::Failed {
            operation: WriteOperation::Insert,
            message: "boom".to_owned(),
        };
        assert_eq!(
            serde_json::to_value(&insert_failed).unwrap(),
            json!({"code": 500, "error": "boom"})
        );

        let delete_failed = WriteOutcome::Failed {
            operation: WriteOperation::Delete,
            message: "boom".to_owned(),
        };
        assert_eq!(
            serde_json::to_value(&delete_failed).unwrap(),
            json!({"code": 500, "message": "boom"})
        );

        assert_eq!(serde_json::to_value(&WriteOutcome::Deleted).unwrap(), json!({"code": 200}));
    }
}
