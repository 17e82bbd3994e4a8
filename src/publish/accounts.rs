// src/publish/accounts.rs
//! Upload identities are the token files provisioned out-of-band:
//! `credentials_<n>_token.json` in the token directory.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::dispatch::Identity;

static TOKEN_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^credentials_(\d+)_token\.json$").expect("token file regex"));

/// Account number encoded in a token file name, if it is one.
pub fn account_number(file_name: &str) -> Option<u32> {
    TOKEN_FILE
        .captures(file_name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Identities sorted by account number. A missing directory yields an empty pool.
pub fn discover_identities(token_dir: &Path) -> Result<Vec<Identity>> {
    if !token_dir.exists() {
        warn!(dir = %token_dir.display(), "token directory not found");
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(token_dir)
        .with_context(|| format!("listing {}", token_dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        let Some(n) = name.to_str().and_then(account_number) else {
            continue;
        };
        out.push(Identity::new(n, entry.path()));
    }
    out.sort_by_key(|i| i.id);
    out.dedup_by_key(|i| i.id);
    info!(
        count = out.len(),
        accounts = ?out.iter().map(|i| i.id).collect::<Vec<_>>(),
        "discovered upload identities"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_only_token_file_names() {
        assert_eq!(account_number("credentials_3_token.json"), Some(3));
        assert_eq!(account_number("credentials_12_token.json"), Some(12));
        assert_eq!(account_number("credentials_x_token.json"), None);
        assert_eq!(account_number("credentials_3_token.pickle"), None);
        assert_eq!(account_number("client_secret.json"), None);
    }

    #[test]
    fn discovery_sorts_numerically() {
        let tmp = tempfile::tempdir().unwrap();
        for n in [10, 2, 1] {
            fs::write(tmp.path().join(format!("credentials_{n}_token.json")), "{}").unwrap();
        }
        fs::write(tmp.path().join("notes.txt"), "").unwrap();
        let ids = discover_identities(tmp.path()).unwrap();
        assert_eq!(ids.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2, 10]);
        assert!(ids[2].credential.ends_with("credentials_10_token.json"));
    }

    #[test]
    fn missing_directory_is_an_empty_pool() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_identities(&tmp.path().join("nope")).unwrap().is_empty());
    }
}
