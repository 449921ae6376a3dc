//! Service traits and document-store implementations used by the close
//! sequence.

pub mod movements;
pub mod payments;
mod retry;
pub mod stock;

pub use movements::{
    Movement, MovementDetail, MovementGenerator, MovementState, NewMovement,
    StoreMovementGenerator,
};
pub use payments::{NewPaymentRecord, PaymentGenerator, PaymentRecord, StorePaymentGenerator};
pub use stock::{
    ProductStock, SaleStockReport, StockItem, StockLedger, StockMovement, StockMovementKind,
    StockUpdate, StockWarning, StoreStockLedger,
};
