//! Shared types for the open-tab back office.
//!
//! Identifiers are newtypes so that a participant id can never be passed
//! where a tab id is expected. `Money` is an integer amount in the smallest
//! unit of the company's currency.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{ClientId, CompanyCode, LineId, ParticipantId, ProductId, TabId};
