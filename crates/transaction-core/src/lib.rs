//! # voxstack-transaction-core
//!
//! RFC 3261 §17 transaction layer for the voxstack stack.
//!
//! The [`TransactionManager`] runs one dispatcher task over a SIP transport:
//! incoming bytes are parsed, matched to transactions by the Via branch +
//! CSeq method key, and driven through the four client/server state
//! machines. Retransmission and timeout behavior follows RFC 3261 verbatim
//! (Timer A doubling unbounded, Timer E/G doubling capped at T2, Timer B/F
//! completing with a null response). Whatever the machines do not absorb
//! reaches the TU as a [`TransactionEvent`].

pub mod error;
pub mod events;
pub mod key;
pub mod manager;
pub mod timer;
pub mod transaction;

pub use error::{Error, Result};
pub use events::TransactionEvent;
pub use key::{TransactionKey, TransactionSide};
pub use manager::TransactionManager;
pub use timer::TimerSettings;
pub use transaction::TransactionState;

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        Error, Result, TimerSettings, TransactionEvent, TransactionKey, TransactionManager,
        TransactionState,
    };
}
