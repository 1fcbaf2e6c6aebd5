//! Configuration loading from `.env` files.

use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};

/// Runtime settings derived from environment variables.
///
/// Built once at startup and handed to whatever needs it.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Encrypted key file.
    pub key_file: PathBuf,
    /// Newline-separated relay list.
    pub relay_file: PathBuf,
    /// How long a publish waits for relay replies.
    pub publish_timeout: Duration,
    /// Optional Tor SOCKS proxy (host:port).
    pub tor_socks: Option<String>,
}

pub const DEFAULT_KEY_FILE: &str = "mykeys";
pub const DEFAULT_RELAY_FILE: &str = "myrelays";
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 2500;

impl Settings {
    /// Load settings from the specified `.env` file. Relative file paths are
    /// resolved against the directory holding it.
    ///
    /// Values come from the file; a key missing there falls back to the
    /// process environment. The process environment is never modified.
    pub fn from_env(path: &str) -> Result<Self> {
        let vars = dotenvy::from_filename_iter(path)
            .context("reading env file")?
            .collect::<Result<HashMap<String, String>, _>>()
            .context("parsing env file")?;
        let var = |key: &str| -> Option<String> {
            vars.get(key)
                .cloned()
                .or_else(|| env::var(key).ok())
                .filter(|v| !v.trim().is_empty())
        };
        let base = base_dir(Path::new(path))?;
        let key_file = resolve(&base, var("KEY_FILE").unwrap_or_else(|| DEFAULT_KEY_FILE.into()));
        let relay_file = resolve(
            &base,
            var("RELAY_FILE").unwrap_or_else(|| DEFAULT_RELAY_FILE.into()),
        );
        let publish_timeout = match var("PUBLISH_TIMEOUT_MS") {
            Some(v) => Duration::from_millis(
                v.trim()
                    .parse()
                    .with_context(|| format!("PUBLISH_TIMEOUT_MS must be milliseconds, got {v:?}"))?,
            ),
            None => Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
        };
        let tor_socks = var("TOR_SOCKS");
        Ok(Self {
            key_file,
            relay_file,
            publish_timeout,
            tor_socks,
        })
    }
}

/// Create a default `.env` file if one is not already present at `path`.
pub fn ensure_env_file(path: &str) -> Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut content = String::new();
    content.push_str(&format!("KEY_FILE={DEFAULT_KEY_FILE}\n"));
    content.push_str(&format!("RELAY_FILE={DEFAULT_RELAY_FILE}\n"));
    content.push_str(&format!("PUBLISH_TIMEOUT_MS={DEFAULT_PUBLISH_TIMEOUT_MS}\n"));
    content.push_str("TOR_SOCKS=\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn base_dir(env_path: &Path) -> Result<PathBuf> {
    Ok(match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => env::current_dir()?,
    })
}

fn resolve(base: &Path, file: String) -> PathBuf {
    let p = PathBuf::from(file);
    if p.is_absolute() {
        p
    } else {
        base.join(p)
    }
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn loads_env() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            concat!(
                "KEY_FILE=/keys/alice\n",
                "RELAY_FILE=relays.txt\n",
                "PUBLISH_TIMEOUT_MS=1000\n",
                "TOR_SOCKS=127.0.0.1:9050\n",
            ),
        )
        .unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.key_file, PathBuf::from("/keys/alice"));
        assert_eq!(cfg.relay_file, dir.path().join("relays.txt"));
        assert_eq!(cfg.publish_timeout, Duration::from_millis(1000));
        assert_eq!(cfg.tor_socks, Some("127.0.0.1:9050".into()));
    }

    #[test]
    fn defaults_when_optional_absent() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, "TOR_SOCKS=\n").unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.key_file, dir.path().join(DEFAULT_KEY_FILE));
        assert_eq!(cfg.relay_file, dir.path().join(DEFAULT_RELAY_FILE));
        assert_eq!(
            cfg.publish_timeout,
            Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS)
        );
        assert!(cfg.tor_socks.is_none());
    }

    #[test]
    fn bad_timeout_is_an_error() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, "PUBLISH_TIMEOUT_MS=soon\n").unwrap();
        assert!(Settings::from_env(env_path.to_str().unwrap()).is_err());
    }

    #[test]
    fn missing_env_file_is_an_error() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join("absent.env");
        assert!(Settings::from_env(env_path.to_str().unwrap()).is_err());
    }

    #[test]
    fn ensure_env_file_writes_defaults_once() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join("nested/.env");
        let p = env_path.to_str().unwrap();
        ensure_env_file(p).unwrap();
        let written = fs::read_to_string(&env_path).unwrap();
        assert!(written.contains("KEY_FILE=mykeys"));
        fs::write(&env_path, "KEY_FILE=custom\n").unwrap();
        ensure_env_file(p).unwrap();
        assert_eq!(fs::read_to_string(&env_path).unwrap(), "KEY_FILE=custom\n");
        let cfg = Settings::from_env(p).unwrap();
        assert_eq!(cfg.key_file, dir.path().join("nested/custom"));
    }

    #[test]
    fn csv_helpers() {
        assert_eq!(csv_strings("a, b , ,c"), vec!["a", "b", "c"]);
        assert!(csv_strings("").is_empty());
    }
}
