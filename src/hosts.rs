//! Hosts override table.
//!
//! Reads a hosts-style file (`<ip> <domain> [<domain> ...]` per line) into an
//! immutable hostname to IP mapping. The table is built once before the
//! listener starts and is only ever read afterwards.

use crate::error::{ProxyError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, trace};

/// Immutable hostname to IP literal mapping.
///
/// Keys are matched exactly as written in the file (case-sensitive).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostsTable {
    entries: HashMap<String, String>,
}

impl HostsTable {
    /// Loads and parses a hosts file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ProxyError::HostsFile {
            path: path.display().to_string(),
            source,
        })?;

        let table = Self::parse(&contents);
        debug!(path = %path.display(), entries = table.len(), "Loaded hosts file");
        Ok(table)
    }

    /// Parses hosts file contents.
    ///
    /// Blank lines and `#` comments are ignored, lines with fewer than two
    /// fields are skipped, and later lines win over earlier ones.
    pub fn parse(contents: &str) -> Self {
        let mut entries = HashMap::new();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let Some(ip) = fields.next() else {
                continue;
            };
            for domain in fields {
                trace!(domain = %domain, ip = %ip, "Loaded host");
                entries.insert(domain.to_string(), ip.to_string());
            }
        }

        Self { entries }
    }

    /// Returns the override IP for `hostname`, if any.
    pub fn get(&self, hostname: &str) -> Option<&str> {
        self.entries.get(hostname).map(String::as_str)
    }

    /// Number of hostnames in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for HostsTable
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(host, ip)| (host.into(), ip.into()))
                .collect(),
        }
    }
}
