//! Identity and proxy list files

use grass_core::{CoreError, Identity};
use std::path::Path;

/// Non-empty trimmed lines of a newline-delimited file
pub fn load_lines(path: &Path) -> Result<Vec<String>, CoreError> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

/// Identities to run. A missing or empty file is fatal.
pub fn load_identities(path: &Path) -> Result<Vec<Identity>, CoreError> {
    let lines = load_lines(path).map_err(|e| {
        CoreError::Configuration(format!("cannot read identities from {}: {e}", path.display()))
    })?;
    if lines.is_empty() {
        return Err(CoreError::Configuration(format!(
            "no identities in {}",
            path.display()
        )));
    }
    Ok(lines.into_iter().map(Identity::new).collect())
}

/// Raw proxy addresses
pub fn load_proxies(path: &Path) -> Result<Vec<String>, CoreError> {
    load_lines(path).map_err(|e| {
        CoreError::Configuration(format!("cannot read proxies from {}: {e}", path.display()))
    })
}
