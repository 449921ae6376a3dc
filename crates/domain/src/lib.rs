//! Domain layer for the open-tab back office.
//!
//! This crate provides:
//! - `Aggregate` trait for document-backed aggregates
//! - `Repository` implementing load → validate → apply → persist with
//!   optimistic concurrency
//! - `OpenTab` aggregate with its state machine, allocation rules and
//!   `OpenTabService`

pub mod aggregate;
pub mod allocation;
pub mod error;
pub mod open_tab;
pub mod repository;

pub use aggregate::Aggregate;
pub use error::DomainError;
pub use open_tab::{
    AddParticipantProduct, AddProduct, CancelTab, ClosingPlan, CreateTab, DivideByProducts,
    DivideEqual, DivisionType, NewPayment, NewProduct, OpenTab, OpenTabError, OpenTabService,
    OpenTabState, Participant, ParticipantBill, ParticipantInput, PaymentEntry, ProductAssignment,
    ProductLine, RegisterPayment, RemoveParticipantProduct, RemoveProduct, StockDebit, TabAction,
    TransferProduct, UpdateProductUnits,
};
pub use repository::{CommandResult, Repository};
