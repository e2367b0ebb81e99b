//! Index-roots persisted string.
//!
//! File-backed tables persist their index anchors as a whitespace-
//! separated run of 32-bit integers, one per index, `-1` marking an empty
//! index. The loader accepts the same format, and the codec round-trips:
//! parsing a formatted array yields the array.

use eyre::{bail, Result, WrapErr};

pub fn format_index_roots(roots: &[i64]) -> String {
    let parts: Vec<String> = roots.iter().map(|r| r.to_string()).collect();
    parts.join(" ")
}

pub fn parse_index_roots(text: &str) -> Result<Vec<i64>> {
    let mut roots = Vec::new();

    for token in text.split_whitespace() {
        let value: i64 = token
            .parse()
            .wrap_err_with(|| format!("bad index root token '{}'", token))?;

        if value < -1 || value > i32::MAX as i64 {
            bail!("index root out of 32-bit range: {}", value);
        }

        roots.push(value);
    }

    Ok(roots)
}
