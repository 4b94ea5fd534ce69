use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde::de::Error;
use base64::{Engine as _, engine::general_purpose::STANDARD};

const PNG_PREFIX: &str = "data:image/png;base64,";

/// PNG bytes that travel as a `data:image/png;base64,...` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PngDataUrl(pub Vec<u8>);

impl PngDataUrl {
    pub fn encode(&self) -> String {
        format!("{PNG_PREFIX}{}", STANDARD.encode(&self.0))
    }

    pub fn decode(v: &str) -> Result<Self, String> {
        let payload = v
            .strip_prefix(PNG_PREFIX)
            .ok_or_else(|| format!("not a png data url: {}", v.chars().take(32).collect::<String>()))?;
        STANDARD.decode(payload).map(PngDataUrl).map_err(|e| e.to_string())
    }
}

impl Serialize for PngDataUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for PngDataUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Vis;
        impl serde::de::Visitor<'_> for Vis {
            type Value = PngDataUrl;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a png data url")
            }

            fn visit_str<E: Error>(self, v: &str) -> Result<Self::Value, E> {
                PngDataUrl::decode(v).map_err(Error::custom)
            }
        }
        deserializer.deserialize_str(Vis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_data_url() {
        let json = serde_json::to_string(&PngDataUrl(vec![0x89, b'P', b'N', b'G'])).unwrap();
        assert_eq!(json, "\"data:image/png;base64,iVBORw==\"");
    }

    #[test]
    fn rejects_other_media_types() {
        let res = serde_json::from_str::<PngDataUrl>("\"data:image/gif;base64,R0lG\"");
        assert!(res.is_err());
    }
}
