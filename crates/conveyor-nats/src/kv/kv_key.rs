//! Key-value key types.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Marker trait for KV key types.
///
/// `Display` produces the stored key and `FromStr` parses it back.
pub trait KvKey: fmt::Debug + fmt::Display + FromStr + Clone + Send + Sync + 'static {}

/// Key of one step within one run.
///
/// Run and step ids are arbitrary strings, so both are hex-encoded into
/// the `{run}.{step}` form NATS accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepKey {
    /// Run identifier.
    pub run_id: String,
    /// Step identifier.
    pub step_id: String,
}

impl StepKey {
    /// Creates a step key.
    pub fn new(run_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            step_id: step_id.into(),
        }
    }
}

impl KvKey for StepKey {}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}",
            hex::encode(&self.run_id),
            hex::encode(&self.step_id)
        )
    }
}

impl FromStr for StepKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |details: String| Error::operation("parse_step_key", details);
        let decode = |part: &str| {
            hex::decode(part)
                .map_err(|e| invalid(e.to_string()))
                .and_then(|bytes| String::from_utf8(bytes).map_err(|e| invalid(e.to_string())))
        };

        let (run, step) = s
            .split_once('.')
            .ok_or_else(|| invalid(format!("missing separator in '{s}'")))?;
        Ok(Self::new(decode(run)?, decode(step)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_survives_arbitrary_ids() {
        let key = StepKey::new("run 1/β", "slack.alert");
        let encoded = key.to_string();
        assert_eq!(encoded.matches('.').count(), 1);
        assert!(encoded.chars().all(|c| c == '.' || c.is_ascii_hexdigit()));
        assert_eq!(encoded.parse::<StepKey>().unwrap(), key);
    }

    #[test]
    fn test_rejects_foreign_keys() {
        assert!("not-hex".parse::<StepKey>().is_err());
        assert!("zz.00".parse::<StepKey>().is_err());
    }
}
