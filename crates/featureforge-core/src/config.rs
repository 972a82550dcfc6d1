//! Serialized configuration
//!
//! A [`SerializedConfig`] is the opaque byte payload handed across every
//! registry boundary. Each backend and each job kind owns the typed value
//! behind it and encodes it through [`ConfigCodec`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{Error, Result};

/// Opaque configuration bytes
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SerializedConfig(Vec<u8>);

impl SerializedConfig {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for SerializedConfig {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for SerializedConfig {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for SerializedConfig {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

impl AsRef<[u8]> for SerializedConfig {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Encode/decode pair for a typed configuration value
///
/// `decode(encode(x)) == x` holds for every value. Decoding an empty or
/// malformed payload returns [`Error::Deserialization`] naming [`Self::KIND`].
///
/// # Example
///
/// ```
/// use featureforge_core::{ConfigCodec, SerializedConfig};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct KeyspaceConfig {
///     keyspace: String,
/// }
///
/// impl ConfigCodec for KeyspaceConfig {
///     const KIND: &'static str = "keyspace";
/// }
///
/// let config = KeyspaceConfig { keyspace: "features".into() };
/// let bytes = config.to_serialized().unwrap();
/// assert_eq!(KeyspaceConfig::from_serialized(&bytes).unwrap(), config);
/// assert!(KeyspaceConfig::from_serialized(&SerializedConfig::empty()).is_err());
/// ```
pub trait ConfigCodec: Serialize + DeserializeOwned {
    /// Name used in deserialization errors
    const KIND: &'static str;

    fn to_serialized(&self) -> Result<SerializedConfig> {
        Ok(SerializedConfig(serde_json::to_vec(self)?))
    }

    fn from_serialized(config: &SerializedConfig) -> Result<Self> {
        serde_json::from_slice(config.as_bytes())
            .map_err(|e| Error::deserialization(Self::KIND, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ConnConfig {
        addr: String,
        db: i64,
        #[serde(default)]
        prefix: Option<String>,
    }

    impl ConfigCodec for ConnConfig {
        const KIND: &'static str = "conn";
    }

    #[test]
    fn test_round_trip() {
        let config = ConnConfig {
            addr: "localhost:6379".to_string(),
            db: 2,
            prefix: Some("ff_".to_string()),
        };
        let serialized = config.to_serialized().unwrap();
        assert_eq!(ConnConfig::from_serialized(&serialized).unwrap(), config);
    }

    #[test]
    fn test_empty_payload_fails() {
        let err = ConnConfig::from_serialized(&SerializedConfig::empty()).unwrap_err();
        assert!(matches!(err, Error::Deserialization { kind: "conn", .. }));
    }

    #[test]
    fn test_malformed_payload_names_field() {
        let err = ConnConfig::from_serialized(&SerializedConfig::from(r#"{"addr": 7, "db": 0}"#))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("conn"));
        assert!(msg.contains("invalid type"), "unexpected message: {msg}");
    }

    #[test]
    fn test_serialized_config_nests_in_json() {
        let inner = SerializedConfig::from("abc");
        let json = serde_json::to_string(&inner).unwrap();
        assert_eq!(json, "[97,98,99]");
        let back: SerializedConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, inner);
    }
}
