use crate::CodecError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Envelope format for whole snapshots and whole diff maps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Serializer {
    #[default]
    Yaml,
    Json,
}

impl Serializer {
    pub fn name(self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
        }
    }

    pub fn dump<T: Serialize + ?Sized>(self, value: &T) -> Result<String, CodecError> {
        Ok(match self {
            Self::Yaml => serde_yaml::to_string(value)?,
            Self::Json => serde_json::to_string(value)?,
        })
    }

    pub fn load<T: DeserializeOwned>(self, encoded: &str) -> Result<T, CodecError> {
        Ok(match self {
            Self::Yaml => serde_yaml::from_str(encoded)?,
            Self::Json => serde_json::from_str(encoded)?,
        })
    }
}

impl fmt::Display for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Serializer {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => Err(CodecError::UnknownSerializer(s.to_owned())),
        }
    }
}
