//! Sentence classification
//!
//! Only lines starting with [`SENTENCE_START`] are sentences; anything else is
//! line noise. A [`Trigger`] names the sentence type that completes one fix
//! record and therefore flushes the current batch.

use serde::{Deserialize, Serialize};

use crate::framer::Line;

/// First byte of every NMEA 0183 sentence
pub const SENTENCE_START: u8 = b'$';

/// Default flush trigger, the recommended minimum fix record
pub const DEFAULT_TRIGGER: &str = "$GPRMC";

/// Returns true if the line starts with the sentence marker
pub fn is_sentence(line: &Line<'_>) -> bool {
    line.as_bytes().first() == Some(&SENTENCE_START)
}

/// Sentence identifier that closes a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trigger(String);

impl Trigger {
    /// Trigger on sentences whose first field is `identifier`, e.g. `$GNRMC`
    pub fn new<S: Into<String>>(identifier: S) -> Self {
        Trigger(identifier.into())
    }

    pub fn identifier(&self) -> &str {
        &self.0
    }

    /// Compares the line's leading token with the trigger identifier
    pub fn matches(&self, line: &Line<'_>) -> bool {
        line.leading_token() == self.0.as_bytes()
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Trigger::new(DEFAULT_TRIGGER)
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_is_not_a_sentence() {
        assert!(is_sentence(&Line::new(b"$GPGGA,1")));
        assert!(!is_sentence(&Line::new(b"\x07$GPGGA,1")));
        assert!(!is_sentence(&Line::new(b"GPGGA")));
    }

    #[test]
    fn test_trigger_matches_leading_token_only() {
        let trigger = Trigger::default();
        assert!(trigger.matches(&Line::new(b"$GPRMC,123519,A,4807.038,N")));
        assert!(trigger.matches(&Line::new(b"$GPRMC")));
        assert!(!trigger.matches(&Line::new(b"$GPGGA,$GPRMC")));
        assert!(!trigger.matches(&Line::new(b"$GPRMCX,1")));

        let glonass = Trigger::new("$GNRMC");
        assert!(glonass.matches(&Line::new(b"$GNRMC,1")));
    }

    #[test]
    fn test_trigger_serde_transparent() {
        let trigger: Trigger = serde_json::from_str("\"$GNRMC\"").unwrap();
        assert_eq!(trigger.identifier(), "$GNRMC");
    }
}
