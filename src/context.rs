//! Per-scan logging context
//!
//! Scans of a batch run concurrently, every stage receives the context of the
//! scan it works on and tags its log records with the scan label.

use std::fmt;

/// Identifies the scan a stage is working on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanContext {
    scan: u32,
    sample: String,
}
impl ScanContext {
    pub fn new(sample: impl Into<String>, scan: u32) -> Self {
        Self {
            scan,
            sample: sample.into(),
        }
    }
    pub fn scan(&self) -> u32 {
        self.scan
    }
    pub fn sample(&self) -> &str {
        &self.sample
    }
    pub fn info(&self, args: fmt::Arguments<'_>) {
        log::info!("[{}] {}", self, args);
    }
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        log::warn!("[{}] {}", self, args);
    }
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        log::debug!("[{}] {}", self, args);
    }
}
impl Default for ScanContext {
    fn default() -> Self {
        Self::new("sample", 0)
    }
}
impl fmt::Display for ScanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_S{}", self.sample, self.scan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label() {
        let ctx = ScanContext::new("PtNP", 128);
        assert_eq!(ctx.to_string(), "PtNP_S128");
        assert_eq!(ctx.scan(), 128);
    }
}
