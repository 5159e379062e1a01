use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;

/// Which origins may call the API from a browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: String,
    /// Directory every operation is confined to
    pub sandbox_root: PathBuf,
    /// Zone used to render `modifiedTime`
    pub utc_offset: FixedOffset,
    /// Request body limit, effectively the largest accepted upload
    pub max_upload_bytes: usize,
    /// External thumbnail converters, tried in order
    pub converter_binaries: Vec<String>,
    /// Upper bound on a single converter run
    pub converter_timeout: Duration,
    pub cors_origins: CorsOrigins,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let offset_minutes: i32 = env_parse(&lookup, "FILESERVE_UTC_OFFSET_MINUTES", 480)?;
        let utc_offset = FixedOffset::east_opt(offset_minutes * 60).ok_or_else(|| {
            anyhow::anyhow!("FILESERVE_UTC_OFFSET_MINUTES={offset_minutes} is out of range")
        })?;

        let cors = env_csv(&lookup, "FILESERVE_CORS_ORIGINS", &["*"]);
        let cors_origins = if cors.is_empty() || cors.iter().any(|o| o == "*") {
            CorsOrigins::Any
        } else {
            CorsOrigins::List(cors)
        };

        Ok(Self {
            bind_addr: env_str(&lookup, "FILESERVE_BIND", "0.0.0.0:8080"),
            sandbox_root: PathBuf::from(env_str(&lookup, "FILESERVE_ROOT", "./data")),
            utc_offset,
            max_upload_bytes: env_parse(&lookup, "FILESERVE_MAX_UPLOAD_BYTES", 512 * 1024 * 1024)?,
            converter_binaries: env_csv(&lookup, "FILESERVE_CONVERTERS", &["convert", "magick"]),
            converter_timeout: Duration::from_secs(env_parse(
                &lookup,
                "FILESERVE_CONVERTER_TIMEOUT_SECS",
                15,
            )?),
            cors_origins,
        })
    }
}

fn env_str<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        None => Ok(default),
    }
}

fn env_csv<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: &[&str]) -> Vec<String> {
    match lookup(key) {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        None => default.iter().map(|s| (*s).to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.sandbox_root, PathBuf::from("./data"));
        assert_eq!(config.utc_offset.local_minus_utc(), 8 * 3600);
        assert_eq!(config.converter_binaries, vec!["convert", "magick"]);
        assert_eq!(config.converter_timeout, Duration::from_secs(15));
        assert_eq!(config.cors_origins, CorsOrigins::Any);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("FILESERVE_ROOT", "/srv/files"),
            ("FILESERVE_UTC_OFFSET_MINUTES", "-300"),
            ("FILESERVE_CONVERTERS", "magick, ,gm"),
            ("FILESERVE_CORS_ORIGINS", "https://files.example.com,http://localhost:3000"),
            ("FILESERVE_MAX_UPLOAD_BYTES", "1024"),
        ]))
        .unwrap();

        assert_eq!(config.sandbox_root, PathBuf::from("/srv/files"));
        assert_eq!(config.utc_offset.local_minus_utc(), -5 * 3600);
        assert_eq!(config.converter_binaries, vec!["magick", "gm"]);
        assert_eq!(config.max_upload_bytes, 1024);
        assert_eq!(
            config.cors_origins,
            CorsOrigins::List(vec![
                "https://files.example.com".to_string(),
                "http://localhost:3000".to_string()
            ])
        );
    }

    #[test]
    fn test_invalid_values_fail() {
        assert!(Config::from_lookup(lookup(&[("FILESERVE_MAX_UPLOAD_BYTES", "lots")])).is_err());
        assert!(
            Config::from_lookup(lookup(&[("FILESERVE_UTC_OFFSET_MINUTES", "100000")])).is_err()
        );
    }
}
