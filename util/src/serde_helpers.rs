use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Reads a JSON file, reporting the exact path of a malformed field on error.
pub fn load_json_from_file<T, P>(path: P) -> Result<T>
where
    for<'de> T: Deserialize<'de>,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let de = &mut serde_json::Deserializer::from_str(&data);
    serde_path_to_error::deserialize(de)
        .with_context(|| format!("failed to parse {}", path.display()))
}

/// Human-readable durations (`"1s"`, `"250ms"`, `"1h 30m"`).
pub mod humantime {
    use std::time::Duration;

    use serde::de::{Error, Unexpected};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&::humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        ::humantime::parse_duration(&s)
            .map_err(|_e| D::Error::invalid_value(Unexpected::Str(&s), &"a duration"))
    }
}
