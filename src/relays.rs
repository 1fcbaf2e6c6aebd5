//! Relay list persisted as one URL per line.

use std::{
    collections::BTreeSet,
    fs,
    io::ErrorKind,
    path::PathBuf,
};

use tracing::debug;

use crate::{config::csv_strings, error::Result};

/// Deduplicated set of relay URLs backed by a plain text file.
#[derive(Debug, Clone)]
pub struct RelayList {
    path: PathBuf,
    urls: BTreeSet<String>,
}

impl RelayList {
    /// Load the list at `path`, creating an empty file if none exists yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let urls = match fs::read_to_string(&path) {
            Ok(data) => parse_lines(&data),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)?;
                    }
                }
                fs::write(&path, "")?;
                BTreeSet::new()
            }
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), count = urls.len(), "loaded relay list");
        Ok(Self { path, urls })
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.iter().cloned().collect()
    }

    /// Merge `urls` into the set and persist it. Returns how many were new.
    pub fn add<I, S>(&mut self, urls: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = 0;
        for url in urls {
            let url = url.as_ref().trim();
            if !url.is_empty() && self.urls.insert(url.to_string()) {
                added += 1;
            }
        }
        if added > 0 {
            self.save()?;
        }
        Ok(added)
    }

    /// Drop `url` from the set, persisting if it was present.
    pub fn remove(&mut self, url: &str) -> Result<bool> {
        let removed = self.urls.remove(url.trim());
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn save(&self) -> Result<()> {
        let mut content = String::new();
        for url in &self.urls {
            content.push_str(url);
            content.push('\n');
        }
        fs::write(&self.path, content)?;
        Ok(())
    }
}

/// Split user input such as `"wss://a, wss://b"` into relay URLs.
pub fn parse_relay_input(input: &str) -> Vec<String> {
    csv_strings(input)
}

fn parse_lines(data: &str) -> BTreeSet<String> {
    data.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
