//! Settlement of open tabs.
//!
//! This crate provides the services a tab close fans out into, and the
//! coordinator that drives them:
//! 1. One sales movement per participant, numbered per company
//! 2. One payment record per participant payment
//! 3. One stock sale debit per distinct product
//! 4. The tab is marked closed
//!
//! Every generated document has a deterministic idempotency key, so a close
//! that failed part-way can simply be retried.

pub mod coordinator;
pub mod error;
pub mod services;

pub use coordinator::{CloseCoordinator, CloseOutcome, StoreCloseCoordinator};
pub use error::SettlementError;
pub use services::{
    Movement, MovementDetail, MovementGenerator, MovementState, NewMovement, NewPaymentRecord,
    PaymentGenerator, PaymentRecord, ProductStock, SaleStockReport, StockItem, StockLedger,
    StockMovement, StockMovementKind, StockUpdate, StockWarning, StoreMovementGenerator,
    StorePaymentGenerator, StoreStockLedger,
};
