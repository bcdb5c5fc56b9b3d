//! Parser for the `key:value` configuration strings accepted by the drivers.
//!
//! A configuration string is a flat list of whitespace separated tokens, for
//! example `"trig1:1.5 trig2:a50 ref:A sampl:100 tstamp:Y"`. Each token is
//! split on its first colon. The parser does not know what the keys mean;
//! the drivers pull out and validate the keys they need.

use crate::error::{CounterError, CounterResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::str::FromStr;

static TRIG_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^trig(\d)$").expect("static regex"));
static CHANNEL_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ch(\d)$").expect("static regex"));

/// Number of input channels on both supported counters.
pub const CHANNEL_COUNT: u8 = 2;

/// Parsed configuration string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMap {
    entries: HashMap<String, String>,
}

impl ConfigMap {
    /// Parse an optional configuration string.
    ///
    /// `None`, `""` and whitespace-only input yield an empty map. A token
    /// without a colon is rejected.
    pub fn parse(input: Option<&str>) -> CounterResult<Self> {
        let mut entries = HashMap::new();
        let Some(input) = input else {
            return Ok(Self { entries });
        };

        for token in input.split_whitespace() {
            let (key, value) = token.split_once(':').ok_or_else(|| {
                CounterError::config(format!("token '{token}' is not of the form key:value"))
            })?;
            entries.insert(key.to_string(), value.to_string());
        }

        Ok(Self { entries })
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Value stored under `key`, or a configuration error naming `operation`.
    pub fn require(&self, key: &str, operation: &str) -> CounterResult<&str> {
        self.get(key).ok_or_else(|| {
            CounterError::config(format!("{operation} requires the '{key}' parameter"))
        })
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no tokens were parsed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.entries
    }

    /// `trig<N>` tokens as `(channel, value)`, ascending by channel.
    pub fn trigger_tokens(&self) -> CounterResult<Vec<(u8, &str)>> {
        self.channel_tokens(&TRIG_KEY)
    }

    /// `ch<N>` tokens as `(channel, value)`, ascending by channel.
    pub fn channel_selectors(&self) -> CounterResult<Vec<(u8, &str)>> {
        self.channel_tokens(&CHANNEL_KEY)
    }

    fn channel_tokens(&self, pattern: &Regex) -> CounterResult<Vec<(u8, &str)>> {
        let mut tokens = Vec::new();
        for (key, value) in &self.entries {
            let Some(caps) = pattern.captures(key) else {
                continue;
            };
            let channel = parse_channel(&caps[1], key)?;
            tokens.push((channel, value.as_str()));
        }
        tokens.sort_by_key(|(channel, _)| *channel);
        Ok(tokens)
    }
}

impl FromStr for ConfigMap {
    type Err = CounterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(Some(s))
    }
}

/// Validate a channel index taken from `key`.
pub fn parse_channel(digits: &str, key: &str) -> CounterResult<u8> {
    match digits.parse::<u8>() {
        Ok(ch) if (1..=CHANNEL_COUNT).contains(&ch) => Ok(ch),
        _ => Err(CounterError::config(format!(
            "'{key}' names channel {digits}, expected 1 or 2"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trigger_pair() {
        let map = ConfigMap::parse(Some("trig1:1.5 trig2:1.5")).unwrap();
        let expected: HashMap<String, String> = [("trig1", "1.5"), ("trig2", "1.5")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(map.as_map(), &expected);
    }

    #[test]
    fn empty_and_absent_input_yield_empty_map() {
        assert!(ConfigMap::parse(Some("")).unwrap().is_empty());
        assert!(ConfigMap::parse(Some("   ")).unwrap().is_empty());
        assert!(ConfigMap::parse(None).unwrap().is_empty());
    }

    #[test]
    fn trims_and_collapses_whitespace() {
        let map: ConfigMap = "  ref:A \t sampl:10\n".parse().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("ref"), Some("A"));
        assert_eq!(map.get("sampl"), Some("10"));
    }

    #[test]
    fn splits_on_first_colon_only() {
        let map: ConfigMap = "addr:TCPIP0::10.0.0.2".parse().unwrap();
        assert_eq!(map.get("addr"), Some("TCPIP0::10.0.0.2"));
    }

    #[test]
    fn rejects_token_without_colon() {
        let err = ConfigMap::parse(Some("ref:A sampl")).unwrap_err();
        assert!(matches!(err, CounterError::Configuration(_)));
    }

    #[test]
    fn trigger_tokens_sorted_and_filtered() {
        let map: ConfigMap = "trig2:0.5 ref:A trig1:a50 trigger:1".parse().unwrap();
        let tokens = map.trigger_tokens().unwrap();
        assert_eq!(tokens, vec![(1, "a50"), (2, "0.5")]);
    }

    #[test]
    fn rejects_out_of_range_channel() {
        let map: ConfigMap = "trig3:1.0".parse().unwrap();
        assert!(matches!(
            map.trigger_tokens(),
            Err(CounterError::Configuration(_))
        ));

        let map: ConfigMap = "ch0:1".parse().unwrap();
        assert!(map.channel_selectors().is_err());
    }

    #[test]
    fn require_names_missing_key() {
        let map: ConfigMap = "ref:A".parse().unwrap();
        let err = map.require("sampl", "time_interval").unwrap_err();
        assert!(err.to_string().contains("sampl"));
    }
}
