//! Map deserializers that reject duplicate keys.
//!
//! serde_json keeps the last value when a key repeats; descriptors must not
//! declare the same variable or dimension twice, so these visitors fail instead.

use indexmap::IndexMap;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::marker::PhantomData;

struct UniqueMapVisitor<V>(PhantomData<V>);

impl<'de, V> Visitor<'de> for UniqueMapVisitor<V>
where
    V: Deserialize<'de>,
{
    type Value = IndexMap<String, V>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map with unique keys")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut map = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            if map.contains_key(&key) {
                return Err(de::Error::custom(format!("duplicate key `{}`", key)));
            }
            map.insert(key, value);
        }
        Ok(map)
    }
}

/// Deserialize an ordered map, failing on the first repeated key.
pub fn unique_keys<'de, D, V>(deserializer: D) -> Result<IndexMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    deserializer.deserialize_map(UniqueMapVisitor(PhantomData))
}

/// A scalar setting value rendered as the string the driver will see.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
}

impl From<Scalar> for String {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Text(s) => s,
            Scalar::Integer(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Flag(b) => b.to_string(),
        }
    }
}

/// Deserialize a single scalar (string, number or bool) as a string.
pub fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Scalar::deserialize(deserializer).map(String::from)
}

/// Deserialize a `name -> scalar` map into strings, failing on repeated keys.
pub fn unique_scalar_strings<'de, D>(deserializer: D) -> Result<IndexMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: IndexMap<String, Scalar> = unique_keys(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k, String::from(v))).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        #[serde(deserialize_with = "unique_keys")]
        items: IndexMap<String, u32>,
    }

    #[derive(Deserialize)]
    struct Settings {
        #[serde(deserialize_with = "unique_scalar_strings")]
        vars: IndexMap<String, String>,
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = serde_json::from_str::<Holder>(r#"{"items": {"zos": 1, "zos": 2}}"#)
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(err.contains("duplicate key `zos`"), "got: {}", err);
    }

    #[test]
    fn test_order_preserved() {
        let holder: Holder =
            serde_json::from_str(r#"{"items": {"time": 1, "lat": 2, "lon": 3}}"#).unwrap();
        let keys: Vec<&str> = holder.items.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["time", "lat", "lon"]);
    }

    #[test]
    fn test_scalars_become_strings() {
        let settings: Settings =
            serde_json::from_str(r#"{"vars": {"lat_min": 10, "scale": 0.5, "flag": true, "name": "lat"}}"#)
                .unwrap();
        assert_eq!(settings.vars["lat_min"], "10");
        assert_eq!(settings.vars["scale"], "0.5");
        assert_eq!(settings.vars["flag"], "true");
        assert_eq!(settings.vars["name"], "lat");
    }
}
