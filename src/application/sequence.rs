use crate::domain::ports::{SharedLedgerStore, WriteBatch};
use crate::domain::sequence::SequenceClaim;
use crate::error::{LedgerError, Result};
use chrono::{Datelike, Utc};
use std::time::Duration;
use tracing::{debug, instrument};

const CLAIM_JITTER_MILLIS: u64 = 2;

/// Hands out human-readable, collision-free numbers per `(namespace, year)`.
///
/// Each call reads the highest claimed suffix and tries to claim the next one.
/// The store's uniqueness check decides between concurrent claimants; a loser
/// re-reads and tries again, up to `max_attempts` times.
#[derive(Clone)]
pub struct SequenceGenerator {
    store: SharedLedgerStore,
    max_attempts: u32,
}

impl SequenceGenerator {
    pub fn new(store: SharedLedgerStore, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts,
        }
    }

    #[instrument(skip(self))]
    pub async fn next_number(&self, namespace: &str, year: i32) -> Result<String> {
        if namespace.is_empty() || namespace.contains('\0') {
            return Err(LedgerError::ValidationError(format!(
                "invalid sequence namespace {namespace:?}"
            )));
        }

        for attempt in 1..=self.max_attempts {
            let current = self.store.max_sequence(namespace, year).await?.unwrap_or(0);
            let Some(suffix) = current.checked_add(1) else {
                break;
            };
            let claim = SequenceClaim {
                namespace: namespace.to_string(),
                year,
                suffix,
            };
            let mut batch = WriteBatch::new();
            batch.claim_sequence(claim.clone());
            match self.store.commit(batch).await {
                Ok(_) => return Ok(claim.number()),
                Err(LedgerError::DuplicateKey(_)) => {
                    debug!(attempt, suffix, "sequence suffix taken, retrying");
                    tokio::time::sleep(claim_backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(LedgerError::SequenceExhausted {
            namespace: namespace.to_string(),
            year,
            attempts: self.max_attempts,
        })
    }

    /// [`Self::next_number`] for the current calendar year.
    pub async fn next_for_current_year(&self, namespace: &str) -> Result<String> {
        self.next_number(namespace, Utc::now().year()).await
    }
}

/// Random pause that widens with each lost claim, so a burst of callers
/// spreads out instead of colliding on the same suffix every round.
fn claim_backoff(attempt: u32) -> Duration {
    let ceiling = CLAIM_JITTER_MILLIS.saturating_mul(u64::from(attempt));
    Duration::from_millis(fastrand::u64(0..=ceiling))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn generator(max_attempts: u32) -> SequenceGenerator {
        SequenceGenerator::new(Arc::new(InMemoryLedgerStore::new()), max_attempts)
    }

    #[tokio::test]
    async fn test_numbers_are_sequential_per_namespace_and_year() {
        let sequence = generator(10);
        assert_eq!(sequence.next_number("CERT", 2026).await.unwrap(), "CERT-2026-000001");
        assert_eq!(sequence.next_number("CERT", 2026).await.unwrap(), "CERT-2026-000002");
        assert_eq!(sequence.next_number("CERT", 2025).await.unwrap(), "CERT-2025-000001");
        assert_eq!(sequence.next_number("ORD", 2026).await.unwrap(), "ORD-2026-000001");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_get_unique_numbers() {
        let sequence = generator(64);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let sequence = sequence.clone();
            handles.push(tokio::spawn(async move {
                let mut numbers = Vec::new();
                for _ in 0..5 {
                    numbers.push(sequence.next_number("ORD", 2026).await.unwrap());
                }
                numbers
            }));
        }

        let mut all = HashSet::new();
        for handle in handles {
            for number in handle.await.unwrap() {
                assert!(all.insert(number.clone()), "duplicate number {number}");
            }
        }
        assert_eq!(all.len(), 40);
        assert!(all.contains("ORD-2026-000040"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_burst_fits_default_budget() {
        let sequence = generator(10);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let sequence = sequence.clone();
            handles.push(tokio::spawn(async move { sequence.next_number("RCH", 2026).await }));
        }

        let mut all = HashSet::new();
        for handle in handles {
            all.insert(handle.await.unwrap().unwrap());
        }
        assert_eq!(all.len(), 16);
    }

    #[test]
    fn test_claim_backoff_widens() {
        for attempt in 1..=5 {
            assert!(claim_backoff(attempt) <= Duration::from_millis(CLAIM_JITTER_MILLIS * u64::from(attempt)));
        }
        assert_eq!(claim_backoff(0), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_zero_budget_is_exhausted() {
        let sequence = generator(0);
        assert!(matches!(
            sequence.next_number("ORD", 2026).await,
            Err(LedgerError::SequenceExhausted { attempts: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_namespace() {
        let sequence = generator(10);
        assert!(matches!(
            sequence.next_number("", 2026).await,
            Err(LedgerError::ValidationError(_))
        ));
    }
}
