use super::money::Balance;
use super::{UserId, WalletId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The spendable balance of one user.
///
/// Exactly one wallet exists per user. The balance is only ever changed by the
/// store while committing a batch that also writes the journal entry the
/// change is attributed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub balance: Balance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn open(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: WalletId::new(),
            user_id,
            balance: Balance::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}
