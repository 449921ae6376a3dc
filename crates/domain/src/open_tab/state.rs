//! Open-tab state machine.

use serde::{Deserialize, Serialize};

use super::OpenTabError;

/// The state of an open tab in its lifecycle.
///
/// State transitions:
/// ```text
/// Open ──(divide)──► Paying ──(close)──► Closed
///   │                  │
///   └──────────────────┴──(cancel, nobody paid)──► deleted
/// ```
///
/// `Dividing` is part of the stored vocabulary but no action enters it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum OpenTabState {
    /// Shared cart is being built.
    #[default]
    Open,

    /// Reserved; never entered.
    Dividing,

    /// Tab has been divided, participants are settling.
    Paying,

    /// Movements have been generated (terminal state).
    Closed,
}

/// An action that requires the tab to be in a particular state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TabAction {
    /// Add, remove or re-count shared products.
    EditProducts,
    /// Divide the tab among participants.
    Divide,
    /// Add, remove or transfer participant products.
    EditParticipants,
    /// Settle a participant.
    RegisterPayment,
    /// Close the tab.
    Close,
    /// Cancel (delete) the tab.
    Cancel,
}

impl TabAction {
    /// Returns the action name as used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            TabAction::EditProducts => "edit products",
            TabAction::Divide => "divide",
            TabAction::EditParticipants => "edit participants",
            TabAction::RegisterPayment => "register payment",
            TabAction::Close => "close",
            TabAction::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for TabAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OpenTabState {
    /// The transition table: the state reached by performing `action` in
    /// this state, or `None` if the action is not allowed.
    ///
    /// Cancelling deletes the tab, so it maps to the current state.
    pub fn after(self, action: TabAction) -> Option<OpenTabState> {
        use OpenTabState::*;
        use TabAction::*;

        match (self, action) {
            (Open, EditProducts) => Some(Open),
            (Open, Divide) => Some(Paying),
            (Paying, EditParticipants | RegisterPayment) => Some(Paying),
            (Paying, Close) => Some(Closed),
            (Open | Dividing | Paying, Cancel) => Some(self),
            _ => None,
        }
    }

    /// Returns the target state of `action`, or an `InvalidState` error.
    pub fn check(self, action: TabAction) -> Result<OpenTabState, OpenTabError> {
        self.after(action).ok_or(OpenTabError::InvalidState {
            current: self,
            action,
        })
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OpenTabState::Closed)
    }

    /// Returns the state name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenTabState::Open => "open",
            OpenTabState::Dividing => "dividing",
            OpenTabState::Paying => "paying",
            OpenTabState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for OpenTabState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the tab was divided among participants. Set once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DivisionType {
    /// Everyone pays an equal share of the total.
    Equal,
    /// Everyone pays for the lines assigned to them.
    ByProduct,
}

impl DivisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DivisionType::Equal => "equal",
            DivisionType::ByProduct => "byProduct",
        }
    }
}

impl std::fmt::Display for DivisionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
