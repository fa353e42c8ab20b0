//! Keyword options passed to strategy constructors.
//!
//! Options are an untyped JSON map at the orchestrator boundary; each
//! strategy deserializes the subset it understands into its own typed
//! struct, rejecting unknown keys.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Options forwarded untouched from a `set_*` call to a strategy constructor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyOptions(Map<String, Value>);

impl StrategyOptions {
    /// Creates an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an option, replacing any previous value for the key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Sets an option in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Parses a `key=value` pair as given on the command line.
    ///
    /// The value is read as JSON when it parses (`3`, `true`, `["a"]`),
    /// otherwise it is kept as a plain string.
    pub fn parse_pair(pair: &str) -> Result<(String, Value), String> {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got '{}'", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("empty option key in '{}'", pair));
        }
        let value =
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        Ok((key.to_string(), value))
    }

    /// Builds an option set from `key=value` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::new();
        for pair in pairs {
            let (key, value) = Self::parse_pair(pair.as_ref())?;
            options.insert(key, value);
        }
        Ok(options)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deserializes the options into a strategy's typed option struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }
}

impl From<BTreeMap<String, Value>> for StrategyOptions {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct Sample {
        #[serde(default)]
        count: u32,
        name: Option<String>,
    }

    #[test]
    fn test_parse_pair_json_and_string() {
        assert_eq!(
            StrategyOptions::parse_pair("count=3").unwrap(),
            ("count".to_string(), json!(3))
        );
        assert_eq!(
            StrategyOptions::parse_pair("name=train.py").unwrap(),
            ("name".to_string(), json!("train.py"))
        );
        assert_eq!(
            StrategyOptions::parse_pair("files=[\"a.py\",\"b.py\"]").unwrap(),
            ("files".to_string(), json!(["a.py", "b.py"]))
        );
        assert!(StrategyOptions::parse_pair("novalue").is_err());
        assert!(StrategyOptions::parse_pair("=x").is_err());
    }

    #[test]
    fn test_parse_typed() {
        let options = StrategyOptions::new().with("count", 2).with("name", "x");
        let sample: Sample = options.parse().unwrap();
        assert_eq!(
            sample,
            Sample {
                count: 2,
                name: Some("x".to_string())
            }
        );

        let empty: Sample = StrategyOptions::new().parse().unwrap();
        assert_eq!(empty.count, 0);
    }

    #[test]
    fn test_parse_rejects_unknown_keys() {
        let options = StrategyOptions::new().with("bogus", true);
        assert!(options.parse::<Sample>().is_err());
    }
}
