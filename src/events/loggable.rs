use serde::{Deserialize, Serialize};

/// Retention class of an audit entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Authorization changes; kept indefinitely
    Critical,
    #[default]
    Important,
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// An entity whose changes land in the audit log as `<entity_type>.<action>`.
pub trait Loggable: Serialize + Send + Sync {
    fn entity_type() -> &'static str;

    fn subject_id(&self) -> String;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    /// Revocations and deactivations always count as critical.
    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deactivated" | "revoked" | "disabled" => Severity::Critical,
            _ => self.severity(),
        }
    }
}
