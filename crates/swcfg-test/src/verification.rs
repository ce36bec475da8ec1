//! Verification helpers for testing the datastore
//!
//! Provides assertion helpers over replies and recorded dataplane calls

use serde_json::Value;
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Reply is not JSON: {reply}: {source}")]
    BadReply {
        reply: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Command '{line}' failed: {reply}")]
    CommandFailed { line: String, reply: Value },

    #[error("Expected ret '{expected}', got {reply}")]
    RetMismatch { expected: String, reply: Value },

    #[error("Expected call '{expected}' in {actual:?}")]
    CallNotFound { expected: String, actual: Vec<String> },

    #[error("Unexpected call '{unexpected}'")]
    UnexpectedCall { unexpected: String },

    #[error("Expected {expected} calls, found {actual}")]
    CallCountMismatch { expected: usize, actual: usize },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Check the `ret` field of a reply
pub fn assert_ret(reply: &Value, expected: &str) -> VerifyResult<()> {
    if reply["ret"] == expected {
        Ok(())
    } else {
        Err(VerificationError::RetMismatch {
            expected: expected.to_string(),
            reply: reply.clone(),
        })
    }
}

/// Dataplane call verifier
pub struct CallVerifier {
    captured_calls: Vec<String>,
}

impl CallVerifier {
    /// Create a new call verifier
    pub fn new(captured_calls: Vec<String>) -> Self {
        Self { captured_calls }
    }

    /// Verify that a specific call was made
    pub fn assert_called(&self, expected: &str) -> VerifyResult<()> {
        if self.captured_calls.iter().any(|call| call == expected) {
            Ok(())
        } else {
            Err(VerificationError::CallNotFound {
                expected: expected.to_string(),
                actual: self.captured_calls.clone(),
            })
        }
    }

    /// Verify that a call was NOT made
    pub fn assert_not_called(&self, unexpected: &str) -> VerifyResult<()> {
        if self.captured_calls.iter().any(|call| call == unexpected) {
            Err(VerificationError::UnexpectedCall {
                unexpected: unexpected.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Verify that `earlier` happened before `later`
    pub fn assert_order(&self, earlier: &str, later: &str) -> VerifyResult<()> {
        let first = self.position(earlier)?;
        let second = self.position(later)?;
        if first < second {
            Ok(())
        } else {
            Err(VerificationError::CallNotFound {
                expected: format!("{} after {}", later, earlier),
                actual: self.captured_calls.clone(),
            })
        }
    }

    fn position(&self, call: &str) -> VerifyResult<usize> {
        self.captured_calls
            .iter()
            .position(|c| c == call)
            .ok_or_else(|| VerificationError::CallNotFound {
                expected: call.to_string(),
                actual: self.captured_calls.clone(),
            })
    }

    /// Verify the number of calls made
    pub fn assert_call_count(&self, expected: usize) -> VerifyResult<()> {
        let actual = self.captured_calls.len();
        if actual != expected {
            Err(VerificationError::CallCountMismatch { expected, actual })
        } else {
            Ok(())
        }
    }

    /// Get all captured calls
    pub fn captured_calls(&self) -> &[String] {
        &self.captured_calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_verifier() {
        let calls = vec![
            "bridge_create :br0".to_string(),
            "bridge_start :br0".to_string(),
        ];

        let verifier = CallVerifier::new(calls);

        assert!(verifier.assert_called("bridge_create :br0").is_ok());
        assert!(verifier.assert_not_called("bridge_destroy :br0").is_ok());
        assert!(verifier
            .assert_order("bridge_create :br0", "bridge_start :br0")
            .is_ok());
        assert!(verifier.assert_call_count(2).is_ok());

        assert!(verifier.assert_call_count(3).is_err());
        assert!(verifier
            .assert_order("bridge_start :br0", "bridge_create :br0")
            .is_err());
        assert!(verifier.assert_called("bridge_start :br1").is_err());
    }

    #[test]
    fn test_assert_ret() {
        assert!(assert_ret(&json!({"ret": "OK"}), "OK").is_ok());
        assert!(assert_ret(&json!({"ret": "NOT_FOUND"}), "OK").is_err());
    }
}
