//! Open-tab commands.

use common::{ParticipantId, TabId};

use super::{NewPayment, NewProduct, ParticipantInput, ProductAssignment};

/// Command to create a new open tab.
#[derive(Debug, Clone)]
pub struct CreateTab {
    /// The tab ID to create.
    pub tab_id: TabId,

    /// Display name, e.g. the table.
    pub name: String,
}

impl CreateTab {
    /// Creates a new CreateTab command with a generated tab ID.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            tab_id: TabId::new(),
            name: name.into(),
        }
    }

    /// Creates a new CreateTab command for a known tab ID.
    pub fn with_id(tab_id: TabId, name: impl Into<String>) -> Self {
        Self {
            tab_id,
            name: name.into(),
        }
    }
}

/// Command to add a product to the shared cart.
#[derive(Debug, Clone)]
pub struct AddProduct {
    pub tab_id: TabId,
    pub product: NewProduct,
}

impl AddProduct {
    pub fn new(tab_id: TabId, product: NewProduct) -> Self {
        Self { tab_id, product }
    }
}

/// Command to remove a shared product line.
#[derive(Debug, Clone)]
pub struct RemoveProduct {
    pub tab_id: TabId,
    pub index: usize,
}

impl RemoveProduct {
    pub fn new(tab_id: TabId, index: usize) -> Self {
        Self { tab_id, index }
    }
}

/// Command to set the units of a shared product line.
#[derive(Debug, Clone)]
pub struct UpdateProductUnits {
    pub tab_id: TabId,
    pub index: usize,

    /// Zero or negative removes the line.
    pub units: i64,
}

impl UpdateProductUnits {
    pub fn new(tab_id: TabId, index: usize, units: i64) -> Self {
        Self {
            tab_id,
            index,
            units,
        }
    }
}

/// Command to divide the tab equally.
#[derive(Debug, Clone)]
pub struct DivideEqual {
    pub tab_id: TabId,
    pub participants: Vec<ParticipantInput>,
}

impl DivideEqual {
    pub fn new(tab_id: TabId, participants: Vec<ParticipantInput>) -> Self {
        Self {
            tab_id,
            participants,
        }
    }
}

/// Command to divide the tab by assigning products.
#[derive(Debug, Clone)]
pub struct DivideByProducts {
    pub tab_id: TabId,
    pub assignments: Vec<ProductAssignment>,
}

impl DivideByProducts {
    pub fn new(tab_id: TabId, assignments: Vec<ProductAssignment>) -> Self {
        Self {
            tab_id,
            assignments,
        }
    }
}

/// Command to add a product to a participant.
#[derive(Debug, Clone)]
pub struct AddParticipantProduct {
    pub tab_id: TabId,
    pub participant_id: ParticipantId,
    pub product: NewProduct,
}

impl AddParticipantProduct {
    pub fn new(tab_id: TabId, participant_id: ParticipantId, product: NewProduct) -> Self {
        Self {
            tab_id,
            participant_id,
            product,
        }
    }
}

/// Command to remove a product line from a participant.
#[derive(Debug, Clone)]
pub struct RemoveParticipantProduct {
    pub tab_id: TabId,
    pub participant_id: ParticipantId,
    pub index: usize,
}

impl RemoveParticipantProduct {
    pub fn new(tab_id: TabId, participant_id: ParticipantId, index: usize) -> Self {
        Self {
            tab_id,
            participant_id,
            index,
        }
    }
}

/// Command to move units of a line between participants.
#[derive(Debug, Clone)]
pub struct TransferProduct {
    pub tab_id: TabId,
    pub from: ParticipantId,
    pub to: ParticipantId,

    /// Index into the source participant's products.
    pub index: usize,
    pub units: u32,
}

impl TransferProduct {
    pub fn new(
        tab_id: TabId,
        from: ParticipantId,
        to: ParticipantId,
        index: usize,
        units: u32,
    ) -> Self {
        Self {
            tab_id,
            from,
            to,
            index,
            units,
        }
    }
}

/// Command to settle a participant.
#[derive(Debug, Clone)]
pub struct RegisterPayment {
    pub tab_id: TabId,
    pub participant_id: ParticipantId,
    pub payments: Vec<NewPayment>,
}

impl RegisterPayment {
    pub fn new(tab_id: TabId, participant_id: ParticipantId, payments: Vec<NewPayment>) -> Self {
        Self {
            tab_id,
            participant_id,
            payments,
        }
    }
}

/// Command to cancel (delete) a tab.
#[derive(Debug, Clone)]
pub struct CancelTab {
    pub tab_id: TabId,
}

impl CancelTab {
    pub fn new(tab_id: TabId) -> Self {
        Self { tab_id }
    }
}
