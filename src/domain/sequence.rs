use serde::{Deserialize, Serialize};

/// A claimed sequence number. `(namespace, year, suffix)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceClaim {
    pub namespace: String,
    pub year: i32,
    pub suffix: u32,
}

impl SequenceClaim {
    pub fn number(&self) -> String {
        format_number(&self.namespace, self.year, self.suffix)
    }
}

/// Human-readable form, e.g. `ORD-2026-000042`.
pub fn format_number(namespace: &str, year: i32, suffix: u32) -> String {
    format!("{namespace}-{year}-{suffix:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number("ORD", 2026, 42), "ORD-2026-000042");
        assert_eq!(format_number("CERT", 2025, 1_234_567), "CERT-2025-1234567");
    }
}
