pub mod aggregate;
pub mod clear_cmd;
pub mod core;
pub mod engine;
pub mod report;
pub mod run_cmd;
pub mod storage;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    /// Malformed or invalid configuration. Always raised before any child process runs.
    #[error("config error: {0}")]
    Config(String),
    /// A stage, aggregation or persistence step failed.
    #[error("{0}")]
    Runner(String),
}

impl BenchError {
    pub fn is_config(&self) -> bool {
        matches!(self, BenchError::Config(_))
    }
}

pub type BenchResult<T> = Result<T, BenchError>;

// Shared helpers
pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha256::digest;
    digest(bytes)
}

pub fn utc_timestamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_lowercase_hex() {
        let h = sha256_hex(b"abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn config_errors_are_tagged() {
        let e = BenchError::Config("bad".into());
        assert!(e.is_config());
        assert_eq!(e.to_string(), "config error: bad");
        assert!(!BenchError::Runner("x".into()).is_config());
    }
}
