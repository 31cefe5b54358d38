//! Per-unit outcome rows for bulk operations that tolerate partial failure

use std::fmt;

use serde::Serialize;

use crate::error::Result;

/// Result of one attempted unit (an instance or a region) of a bulk operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub success: bool,
    pub region: String,
    /// What was acted on: an instance id, a group name, a template name
    pub subject: String,
    pub message: String,
}

impl Outcome {
    pub fn ok(region: impl Into<String>, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            region: region.into(),
            subject: subject.into(),
            message: message.into(),
        }
    }

    pub fn failed(region: impl Into<String>, subject: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            success: false,
            region: region.into(),
            subject: subject.into(),
            message: error.to_string(),
        }
    }

    /// Row for a fallible unit: `message` on success, the error text otherwise
    pub fn from_result<T>(
        region: impl Into<String>,
        subject: impl Into<String>,
        result: &Result<T>,
        message: impl Into<String>,
    ) -> Self {
        match result {
            Ok(_) => Self::ok(region, subject, message),
            Err(err) => Self::failed(region, subject, err),
        }
    }

    pub fn mark(&self) -> &'static str {
        if self.success {
            "✓"
        } else {
            "✗"
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}: {}", self.mark(), self.region, self.subject, self.message)
    }
}

/// (succeeded, failed) counts
pub fn tally(outcomes: &[Outcome]) -> (usize, usize) {
    let succeeded = outcomes.iter().filter(|o| o.success).count();
    (succeeded, outcomes.len() - succeeded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeoNetError;

    #[test]
    fn test_from_result() {
        let ok: Result<()> = Ok(());
        let row = Outcome::from_result("us-east-1", "alia", &ok, "created security group 'alia'");
        assert!(row.success);
        assert_eq!(row.message, "created security group 'alia'");

        let err: Result<()> = Err(GeoNetError::transport("us-east-1", "CreateSecurityGroup", "denied"));
        let row = Outcome::from_result("us-east-1", "alia", &err, "unused");
        assert!(!row.success);
        assert_eq!(row.message, "CreateSecurityGroup failed in us-east-1: denied");
        assert!(row.to_string().starts_with("✗ us-east-1 alia"));
    }

    #[test]
    fn test_tally() {
        let rows = vec![
            Outcome::ok("a", "x", "fine"),
            Outcome::failed("b", "y", "bad"),
            Outcome::ok("c", "z", "fine"),
        ];
        assert_eq!(tally(&rows), (2, 1));
    }
}
