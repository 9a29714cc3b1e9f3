//! Domain model for the wallet ledger: value objects, entities and the ports
//! the application layer depends on.

pub mod callback;
pub mod journal;
pub mod money;
pub mod order;
pub mod ports;
pub mod recharge;
pub mod request;
pub mod sequence;
pub mod wallet;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a marketplace user. Owned by the account system outside the ledger.
pub type UserId = u64;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// Primary key of a wallet row.
    WalletId
);
uuid_id!(
    /// Primary key of a journal entry.
    EntryId
);
uuid_id!(
    /// Primary key of a payment order.
    OrderId
);
uuid_id!(RechargeId);
uuid_id!(
    /// Primary key of a manual top-up/withdrawal request.
    RequestId
);
uuid_id!(CallbackId);
