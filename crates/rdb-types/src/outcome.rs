use serde::{Deserialize, Serialize};

use crate::error::RdbResult;

/// Status half of the outcome envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: u16,
    pub message: String,
}

impl Status {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(200, message)
    }
}

/// The uniform `(success, status, payload)` envelope.
///
/// Library APIs return [`RdbResult`]; this type is the serializable shape of
/// the same information for callers that need one contract across every
/// operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Outcome<T> {
    pub success: bool,
    pub status: Status,
    pub payload: Option<T>,
}

impl<T> Outcome<T> {
    /// Successful outcome carrying `payload`.
    pub fn ok(payload: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            status: Status::ok(message),
            payload: Some(payload),
        }
    }

    /// Build an envelope from a result, using `message` as the success text.
    pub fn from_result(result: RdbResult<T>, message: impl Into<String>) -> Self {
        match result {
            Ok(payload) => Self::ok(payload, message),
            Err(err) => Self {
                success: false,
                status: Status::new(err.status_code(), err.to_string()),
                payload: None,
            },
        }
    }

    /// Map the payload, keeping status and success flag.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            success: self.success,
            status: self.status,
            payload: self.payload.map(f),
        }
    }
}

impl<T> From<RdbResult<T>> for Outcome<T> {
    fn from(result: RdbResult<T>) -> Self {
        Self::from_result(result, "ok")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RdbError;

    #[test]
    fn success_envelope() {
        let outcome = Outcome::from_result(Ok(3usize), "created 3 records");
        assert!(outcome.success);
        assert_eq!(outcome.status.code, 200);
        assert_eq!(outcome.status.message, "created 3 records");
        assert_eq!(outcome.payload, Some(3));
    }

    #[test]
    fn failure_envelope_uses_error_status() {
        let outcome: Outcome<()> = Err(RdbError::lock_conflict("Companies")).into();
        assert!(!outcome.success);
        assert_eq!(outcome.status.code, 423);
        assert!(outcome.status.message.contains("Companies"));
        assert!(outcome.payload.is_none());
    }

    #[test]
    fn serializes_with_null_payload() {
        let outcome: Outcome<u32> = Err(RdbError::not_found("Acme")).into();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["status"]["code"], 404);
        assert!(json["payload"].is_null());
    }

    #[test]
    fn map_keeps_status() {
        let outcome = Outcome::ok(vec![1, 2, 3], "listed").map(|v| v.len());
        assert_eq!(outcome.payload, Some(3));
        assert_eq!(outcome.status.message, "listed");
    }
}
