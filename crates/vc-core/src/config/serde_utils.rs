//! Serde helpers for configuration fields

/// `Duration` as whole seconds in TOML.
///
/// Reading also accepts a string with a unit suffix (`"500ms"`, `"10s"`,
/// `"2m"`), so `connect_timeout = 10` and `connect_timeout = "10s"` are the
/// same setting. Writing always produces an integer.
pub mod duration_secs {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).ok_or_else(|| {
                D::Error::custom(format!(
                    "invalid duration '{}': use seconds or a suffix of ms, s or m",
                    text
                ))
            }),
        }
    }

    fn parse(text: &str) -> Option<Duration> {
        let text = text.trim();
        let split = text.find(|c: char| !c.is_ascii_digit())?;
        let (digits, unit) = text.split_at(split);
        let value: u64 = digits.parse().ok()?;
        match unit.trim() {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => Some(Duration::from_secs(value.checked_mul(60)?)),
            _ => None,
        }
    }
}
