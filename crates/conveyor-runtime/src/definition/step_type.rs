//! Step type tags.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kind of work a node performs.
///
/// Known types are closed variants; any other tag is carried as
/// [`StepType::Custom`] and resolves only if a handler is registered for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepType {
    /// Entry point of a workflow.
    Trigger,
    /// Enriches the contact/business payload.
    Enrich,
    /// Fetches recent activity for the contact.
    FetchRecentActivity,
    /// Produces an AI summary of a meeting.
    AiSummarizeMeeting,
    /// Sends a Slack alert.
    SlackAlert,
    /// Sends an email.
    EmailSend,
    /// Explicit end of a branch.
    Terminator,
    /// Extension type resolved through the registry.
    Custom(String),
}

impl StepType {
    /// All non-custom step types.
    pub const KNOWN: [StepType; 7] = [
        Self::Trigger,
        Self::Enrich,
        Self::FetchRecentActivity,
        Self::AiSummarizeMeeting,
        Self::SlackAlert,
        Self::EmailSend,
        Self::Terminator,
    ];

    /// Returns the wire tag of this type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Trigger => "trigger",
            Self::Enrich => "enrich",
            Self::FetchRecentActivity => "fetch-recent-activity",
            Self::AiSummarizeMeeting => "ai-summarize-meeting",
            Self::SlackAlert => "slack-alert",
            Self::EmailSend => "email-send",
            Self::Terminator => "terminator",
            Self::Custom(tag) => tag,
        }
    }

    /// Returns whether this is the entry-point type.
    #[inline]
    pub const fn is_trigger(&self) -> bool {
        matches!(self, Self::Trigger)
    }

    /// Returns whether this is a custom extension type.
    #[inline]
    pub const fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for StepType {
    fn from(tag: &str) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|known| known.as_str() == tag)
            .unwrap_or_else(|| Self::Custom(tag.to_owned()))
    }
}

impl From<String> for StepType {
    fn from(tag: String) -> Self {
        match Self::from(tag.as_str()) {
            Self::Custom(_) => Self::Custom(tag),
            known => known,
        }
    }
}

impl From<StepType> for String {
    fn from(step_type: StepType) -> Self {
        match step_type {
            StepType::Custom(tag) => tag,
            known => known.as_str().to_owned(),
        }
    }
}

impl FromStr for StepType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tags() {
        for known in StepType::KNOWN {
            assert_eq!(StepType::from(known.as_str()), known);
            assert!(!known.is_custom());
        }
    }

    #[test]
    fn test_custom_tag() {
        let step_type: StepType = "crm-sync".parse().unwrap();
        assert_eq!(step_type, StepType::Custom("crm-sync".into()));
        assert_eq!(step_type.to_string(), "crm-sync");
    }

    #[test]
    fn test_serde_uses_wire_tag() {
        let json = serde_json::to_string(&StepType::FetchRecentActivity).unwrap();
        assert_eq!(json, "\"fetch-recent-activity\"");

        let parsed: StepType = serde_json::from_str("\"slack-alert\"").unwrap();
        assert_eq!(parsed, StepType::SlackAlert);
    }
}
