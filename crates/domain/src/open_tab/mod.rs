//! Open-tab aggregate and related types.

mod aggregate;
mod commands;
mod service;
mod state;
mod value_objects;

pub use aggregate::{ClosingPlan, OpenTab, ParticipantBill, StockDebit};
pub use commands::*;
pub use service::OpenTabService;
pub use state::{DivisionType, OpenTabState, TabAction};
pub use value_objects::{
    NewPayment, NewProduct, Participant, ParticipantInput, PaymentEntry, ProductAssignment,
    ProductLine,
};

use common::{Money, ParticipantId};
use thiserror::Error;

/// Errors that can occur during open-tab operations.
#[derive(Debug, Error)]
pub enum OpenTabError {
    /// Input failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The tab does not exist for the requesting company.
    #[error("Open tab not found: {id}")]
    NotFound { id: String },

    /// The participant is not part of the tab.
    #[error("Participant not found: {participant_id}")]
    ParticipantNotFound { participant_id: ParticipantId },

    /// The tab is not in a state that allows the action.
    #[error("Invalid state: cannot {action} while tab is {current}")]
    InvalidState {
        current: OpenTabState,
        action: TabAction,
    },

    /// The participant has already settled and can no longer change.
    #[error("Invalid state: participant {participant_id} has already paid")]
    ParticipantAlreadyPaid { participant_id: ParticipantId },

    /// A product index is outside the list it refers to.
    #[error("Product index {index} out of range (0..{len})")]
    OutOfRange { index: usize, len: usize },

    /// The payments do not cover the participant's subtotal.
    #[error("Insufficient payment: paid {paid}, subtotal {subtotal}")]
    InsufficientPayment { paid: Money, subtotal: Money },

    /// Some participants have not paid yet.
    #[error("Cannot close tab: {pending} participant(s) pending payment")]
    IncompleteSettlement { pending: usize },

    /// A transfer asks for more units than the source line holds.
    #[error("Cannot transfer {requested} unit(s): only {available} available")]
    TransferExceedsAvailableUnits { requested: u32, available: u32 },

    /// The tab cannot be cancelled once someone has paid.
    #[error("Cannot cancel tab: {paid} participant(s) already paid")]
    CancelAfterPayment { paid: usize },
}

impl OpenTabError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        OpenTabError::Validation(message.into())
    }

    /// An amount or unit count left the representable range.
    pub(crate) fn overflow(what: &str) -> Self {
        OpenTabError::Validation(format!("{what} is too large"))
    }
}
