//! Open-tab aggregate implementation.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use common::{ClientId, CompanyCode, Money, ParticipantId, ProductId, TabId};
use document_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::allocation::{split_money, split_units};

use super::value_objects::{lines_total, merge_line};
use super::{
    DivisionType, NewPayment, NewProduct, OpenTabError, OpenTabState, Participant,
    ParticipantInput, PaymentEntry, ProductAssignment, ProductLine, TabAction,
};

/// Open-tab aggregate root.
///
/// A shared cart that is built while `Open`, divided once among
/// participants, settled participant by participant while `Paying`, and
/// finally closed. Every operation validates before it mutates, so a
/// failed operation leaves the tab unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenTab {
    id: TabId,

    /// Stored in document metadata, not in the body.
    #[serde(skip)]
    version: Version,

    name: String,
    company_code: CompanyCode,
    state: OpenTabState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    closed_at: Option<DateTime<Utc>>,

    /// The undivided cart; source of truth for stock at close.
    shared_products: Vec<ProductLine>,

    participants: Vec<Participant>,
    total_amount: Money,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    division_type: Option<DivisionType>,

    #[serde(default)]
    generated_movements: Vec<String>,
}

impl Aggregate for OpenTab {
    type Error = OpenTabError;

    fn aggregate_type() -> &'static str {
        "OpenTab"
    }

    fn collection() -> &'static str {
        "open_tabs"
    }

    fn not_found(id: &str) -> Self::Error {
        OpenTabError::NotFound { id: id.to_string() }
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn company_code(&self) -> &CompanyCode {
        &self.company_code
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

/// Everything the close sequence needs, computed from a settled tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosingPlan {
    pub tab_id: TabId,
    pub tab_name: String,
    pub company_code: CompanyCode,
    /// One bill per participant, in participant order.
    pub bills: Vec<ParticipantBill>,
    /// One debit per distinct catalog product.
    pub stock_debits: Vec<StockDebit>,
}

/// What one participant is billed for at close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantBill {
    pub participant_id: ParticipantId,
    pub client_id: Option<ClientId>,
    pub client_name: String,
    pub lines: Vec<ProductLine>,
    pub subtotal: Money,
    pub payments: Vec<PaymentEntry>,
}

/// Units of a catalog product sold by the tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockDebit {
    pub product_id: ProductId,
    pub name: String,
    pub units: u32,
}

// Query methods
impl OpenTab {
    /// Returns the tab id.
    pub fn tab_id(&self) -> TabId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> OpenTabState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn shared_products(&self) -> &[ProductLine] {
        &self.shared_products
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Returns a participant by id.
    pub fn participant(&self, participant_id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == participant_id)
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn division_type(&self) -> Option<DivisionType> {
        self.division_type
    }

    pub fn generated_movements(&self) -> &[String] {
        &self.generated_movements
    }

    /// Returns the number of participants that have not paid.
    pub fn pending_count(&self) -> usize {
        self.participants.iter().filter(|p| !p.is_paid).count()
    }

    /// Returns the number of participants that have paid.
    pub fn paid_count(&self) -> usize {
        self.participants.iter().filter(|p| p.is_paid).count()
    }
}

// Cart phase
impl OpenTab {
    /// Creates a new empty tab.
    pub fn create(
        id: TabId,
        name: impl Into<String>,
        company_code: CompanyCode,
    ) -> Result<Self, OpenTabError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(OpenTabError::validation("tab name is required"));
        }

        let now = Utc::now();
        Ok(Self {
            id,
            version: Version::initial(),
            name,
            company_code,
            state: OpenTabState::Open,
            created_at: now,
            updated_at: now,
            closed_at: None,
            shared_products: Vec::new(),
            participants: Vec::new(),
            total_amount: Money::zero(),
            division_type: None,
            generated_movements: Vec::new(),
        })
    }

    /// Adds a product to the shared cart, merging into a line with the same
    /// code and price.
    pub fn add_product(&mut self, product: NewProduct) -> Result<(), OpenTabError> {
        self.state.check(TabAction::EditProducts)?;
        let line = product.into_line()?;

        let mut lines = self.shared_products.clone();
        merge_line(&mut lines, line)?;
        self.replace_cart(lines)?;
        self.touch();
        Ok(())
    }

    /// Removes a shared product line by index.
    pub fn remove_product(&mut self, index: usize) -> Result<(), OpenTabError> {
        self.state.check(TabAction::EditProducts)?;
        check_index(index, self.shared_products.len())?;

        let mut lines = self.shared_products.clone();
        lines.remove(index);
        self.replace_cart(lines)?;
        self.touch();
        Ok(())
    }

    /// Sets the units of a shared product line. Zero or fewer removes it.
    pub fn update_product_units(&mut self, index: usize, units: i64) -> Result<(), OpenTabError> {
        if units <= 0 {
            return self.remove_product(index);
        }

        self.state.check(TabAction::EditProducts)?;
        check_index(index, self.shared_products.len())?;
        let units = u32::try_from(units).map_err(|_| OpenTabError::overflow("product units"))?;

        let mut lines = self.shared_products.clone();
        lines[index].units = units;
        self.replace_cart(lines)?;
        self.touch();
        Ok(())
    }

    /// Installs a new cart once its total is known to fit.
    fn replace_cart(&mut self, lines: Vec<ProductLine>) -> Result<(), OpenTabError> {
        self.total_amount = lines_total(&lines)?;
        self.shared_products = lines;
        Ok(())
    }
}

// Division
impl OpenTab {
    /// Divides the total equally among new participants.
    ///
    /// Shares sum exactly to the total and differ by at most one unit; the
    /// first participants absorb the remainder.
    pub fn divide_equal(&mut self, participants: Vec<ParticipantInput>) -> Result<(), OpenTabError> {
        let next = self.state.check(TabAction::Divide)?;
        self.ensure_has_products()?;
        if participants.is_empty() {
            return Err(OpenTabError::validation("at least one participant is required"));
        }
        for participant in &participants {
            participant.validate()?;
        }

        let shares = split_money(self.total_amount, participants.len());
        self.participants = participants
            .into_iter()
            .zip(shares)
            .map(|(input, share)| Participant::new(input, Vec::new(), share))
            .collect();
        self.division_type = Some(DivisionType::Equal);
        self.state = next;
        self.touch();
        Ok(())
    }

    /// Divides the tab by assigning shared product lines to participants.
    ///
    /// Each shared line may be assigned at most once; unassigned lines are
    /// dropped from the participants' bills but stay on the shared cart.
    pub fn divide_by_products(
        &mut self,
        assignments: Vec<ProductAssignment>,
    ) -> Result<(), OpenTabError> {
        let next = self.state.check(TabAction::Divide)?;
        self.ensure_has_products()?;
        if assignments.is_empty() {
            return Err(OpenTabError::validation("at least one assignment is required"));
        }

        let mut seen = HashSet::new();
        for assignment in &assignments {
            assignment.participant.validate()?;
            for &index in &assignment.product_indices {
                check_index(index, self.shared_products.len())?;
                if !seen.insert(index) {
                    return Err(OpenTabError::validation(format!(
                        "product {index} assigned to multiple participants"
                    )));
                }
            }
        }

        let participants = assignments
            .into_iter()
            .map(|assignment| {
                let products: Vec<ProductLine> = assignment
                    .product_indices
                    .iter()
                    .map(|&i| {
                        let line = &self.shared_products[i];
                        line.split_off(line.units)
                    })
                    .collect();
                let subtotal = lines_total(&products)?;
                Ok(Participant::new(assignment.participant, products, subtotal))
            })
            .collect::<Result<Vec<_>, OpenTabError>>()?;

        self.total_amount = participants_total(&participants)?;
        self.participants = participants;
        self.division_type = Some(DivisionType::ByProduct);
        self.state = next;
        self.touch();
        Ok(())
    }

    fn ensure_has_products(&self) -> Result<(), OpenTabError> {
        if self.shared_products.is_empty() {
            return Err(OpenTabError::validation("tab has no products to divide"));
        }
        Ok(())
    }
}

// Settlement phase
impl OpenTab {
    /// Adds a product to an unpaid participant.
    pub fn add_product_to_participant(
        &mut self,
        participant_id: ParticipantId,
        product: NewProduct,
    ) -> Result<(), OpenTabError> {
        self.state.check(TabAction::EditParticipants)?;
        let idx = self.unpaid_participant_index(participant_id)?;
        let line = product.into_line()?;

        let mut products = self.participants[idx].products.clone();
        match self.division_type {
            Some(DivisionType::ByProduct) => {
                let mut shared = self.shared_products.clone();
                merge_line(&mut shared, line.split_off(line.units))?;
                merge_line(&mut products, line)?;
                lines_total(&shared)?;
                self.commit_by_product(idx, products)?;
                self.shared_products = shared;
            }
            _ => {
                let value = line.total();
                merge_line(&mut products, line)?;
                let subtotal = self.participants[idx]
                    .subtotal
                    .checked_add(value)
                    .ok_or_else(|| OpenTabError::overflow("participant subtotal"))?;
                let total = self
                    .total_amount
                    .checked_add(value)
                    .ok_or_else(|| OpenTabError::overflow("total"))?;
                let participant = &mut self.participants[idx];
                participant.products = products;
                participant.subtotal = subtotal;
                self.total_amount = total;
            }
        }
        self.touch();
        Ok(())
    }

    /// Removes a product line from an unpaid participant.
    ///
    /// Under by-product division the mirrored shared line shrinks by the
    /// removed units and disappears when it reaches zero.
    pub fn remove_product_from_participant(
        &mut self,
        participant_id: ParticipantId,
        index: usize,
    ) -> Result<(), OpenTabError> {
        self.state.check(TabAction::EditParticipants)?;
        let idx = self.unpaid_participant_index(participant_id)?;
        check_index(index, self.participants[idx].products.len())?;

        let mut products = self.participants[idx].products.clone();
        let removed = products.remove(index);
        match self.division_type {
            Some(DivisionType::ByProduct) => {
                let mut shared = self.shared_products.clone();
                if let Some(pos) = shared.iter().position(|line| line.same_product(&removed)) {
                    shared[pos].units = shared[pos].units.saturating_sub(removed.units);
                    if shared[pos].units == 0 {
                        shared.remove(pos);
                    }
                }
                self.commit_by_product(idx, products)?;
                self.shared_products = shared;
            }
            _ => {
                let value = removed.total();
                let subtotal = self.participants[idx]
                    .subtotal
                    .checked_sub(value)
                    .ok_or_else(|| OpenTabError::overflow("participant subtotal"))?;
                let total = self
                    .total_amount
                    .checked_sub(value)
                    .ok_or_else(|| OpenTabError::overflow("total"))?;
                let participant = &mut self.participants[idx];
                participant.products = products;
                participant.subtotal = subtotal;
                self.total_amount = total;
            }
        }
        self.touch();
        Ok(())
    }

    /// Moves units of one participant's line to another participant.
    ///
    /// The shared cart and the tab total are unchanged.
    pub fn transfer_product(
        &mut self,
        from: ParticipantId,
        to: ParticipantId,
        index: usize,
        units: u32,
    ) -> Result<(), OpenTabError> {
        self.state.check(TabAction::EditParticipants)?;
        if from == to {
            return Err(OpenTabError::validation(
                "cannot transfer a product to the same participant",
            ));
        }
        let from_idx = self.unpaid_participant_index(from)?;
        let to_idx = self.unpaid_participant_index(to)?;
        if units == 0 {
            return Err(OpenTabError::validation("transfer units must be at least 1"));
        }

        let source = &self.participants[from_idx].products;
        check_index(index, source.len())?;
        let available = source[index].units;
        if units > available {
            return Err(OpenTabError::TransferExceedsAvailableUnits {
                requested: units,
                available,
            });
        }

        let mut from_products = source.clone();
        let moved = if units == available {
            from_products.remove(index)
        } else {
            let line = &mut from_products[index];
            line.units -= units;
            line.split_off(units)
        };

        let value = moved.total();
        let from_subtotal = self.participants[from_idx]
            .subtotal
            .checked_sub(value)
            .ok_or_else(|| OpenTabError::overflow("participant subtotal"))?;
        let to_subtotal = self.participants[to_idx]
            .subtotal
            .checked_add(value)
            .ok_or_else(|| OpenTabError::overflow("participant subtotal"))?;
        let mut to_products = self.participants[to_idx].products.clone();
        merge_line(&mut to_products, moved)?;

        self.participants[from_idx].products = from_products;
        self.participants[from_idx].subtotal = from_subtotal;
        self.participants[to_idx].products = to_products;
        self.participants[to_idx].subtotal = to_subtotal;
        self.touch();
        Ok(())
    }

    /// Settles a participant with one or more payments.
    ///
    /// The payments must cover the subtotal; any excess is kept as given.
    pub fn register_payment(
        &mut self,
        participant_id: ParticipantId,
        payments: Vec<NewPayment>,
    ) -> Result<(), OpenTabError> {
        self.state.check(TabAction::RegisterPayment)?;
        let idx = self.unpaid_participant_index(participant_id)?;

        let now = Utc::now();
        let entries = payments
            .into_iter()
            .map(|payment| payment.into_entry(now))
            .collect::<Result<Vec<_>, _>>()?;

        let paid = Money::checked_sum(entries.iter().map(|e| e.amount))
            .ok_or_else(|| OpenTabError::overflow("payment total"))?;
        let subtotal = self.participants[idx].subtotal;
        if paid < subtotal {
            return Err(OpenTabError::InsufficientPayment { paid, subtotal });
        }

        let participant = &mut self.participants[idx];
        participant.payments.extend(entries);
        participant.is_paid = true;
        self.touch();
        Ok(())
    }

    fn unpaid_participant_index(
        &self,
        participant_id: ParticipantId,
    ) -> Result<usize, OpenTabError> {
        let idx = self
            .participants
            .iter()
            .position(|p| p.id == participant_id)
            .ok_or(OpenTabError::ParticipantNotFound { participant_id })?;
        self.participants[idx].ensure_unpaid()?;
        Ok(idx)
    }

    /// Replaces a participant's lines under by-product division, deriving
    /// the subtotal and the tab total from the lines.
    fn commit_by_product(
        &mut self,
        idx: usize,
        products: Vec<ProductLine>,
    ) -> Result<(), OpenTabError> {
        let subtotal = lines_total(&products)?;
        let others = self
            .participants
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != idx)
            .map(|(_, p)| p.subtotal);
        let total = Money::checked_sum(others.chain(std::iter::once(subtotal)))
            .ok_or_else(|| OpenTabError::overflow("total"))?;

        let participant = &mut self.participants[idx];
        participant.products = products;
        participant.subtotal = subtotal;
        self.total_amount = total;
        Ok(())
    }
}

// Close and cancel
impl OpenTab {
    /// Checks that the tab is paying and every participant has paid.
    pub fn ensure_closable(&self) -> Result<(), OpenTabError> {
        self.state.check(TabAction::Close)?;
        let pending = self.pending_count();
        if pending > 0 {
            return Err(OpenTabError::IncompleteSettlement { pending });
        }
        Ok(())
    }

    /// Computes the bills and stock debits for closing the tab.
    ///
    /// Under equal division each shared line's units are apportioned across
    /// participants the same way money is, and zero-unit lines are dropped.
    pub fn closing_plan(&self) -> Result<ClosingPlan, OpenTabError> {
        self.ensure_closable()?;

        let n = self.participants.len();
        let equal = self.division_type == Some(DivisionType::Equal);
        let apportioned: Vec<Vec<u32>> = if equal {
            self.shared_products
                .iter()
                .map(|line| split_units(line.units, n))
                .collect()
        } else {
            Vec::new()
        };

        let bills = self
            .participants
            .iter()
            .enumerate()
            .map(|(i, participant)| {
                let mut lines: Vec<ProductLine> = self
                    .shared_products
                    .iter()
                    .zip(&apportioned)
                    .filter(|(_, shares)| shares[i] > 0)
                    .map(|(line, shares)| ProductLine {
                        units: shares[i],
                        ..line.clone()
                    })
                    .collect();
                lines.extend(participant.products.iter().cloned());

                ParticipantBill {
                    participant_id: participant.id,
                    client_id: participant.client_id.clone(),
                    client_name: participant.client_name.clone(),
                    lines,
                    subtotal: participant.subtotal,
                    payments: participant.payments.clone(),
                }
            })
            .collect();

        let mut debits: BTreeMap<ProductId, StockDebit> = BTreeMap::new();
        let participant_lines = self
            .participants
            .iter()
            .filter(|_| equal)
            .flat_map(|p| p.products.iter());
        for line in self.shared_products.iter().chain(participant_lines) {
            let Some(product_id) = line.product_id.clone() else {
                continue;
            };
            match debits.get_mut(&product_id) {
                Some(debit) => {
                    debit.units = debit
                        .units
                        .checked_add(line.units)
                        .ok_or_else(|| OpenTabError::overflow("stock debit units"))?;
                }
                None => {
                    debits.insert(
                        product_id.clone(),
                        StockDebit {
                            product_id,
                            name: line.name.clone(),
                            units: line.units,
                        },
                    );
                }
            }
        }

        Ok(ClosingPlan {
            tab_id: self.id,
            tab_name: self.name.clone(),
            company_code: self.company_code.clone(),
            bills,
            stock_debits: debits.into_values().collect(),
        })
    }

    /// Marks the tab closed with the movements generated for it.
    pub fn close(&mut self, movement_ids: Vec<String>) -> Result<(), OpenTabError> {
        self.ensure_closable()?;
        let next = self.state.check(TabAction::Close)?;

        let now = Utc::now();
        self.state = next;
        self.closed_at = Some(now);
        self.generated_movements = movement_ids;
        self.updated_at = now;
        Ok(())
    }

    /// Checks that the tab may be cancelled: not closed and nobody paid.
    pub fn ensure_cancellable(&self) -> Result<(), OpenTabError> {
        self.state.check(TabAction::Cancel)?;
        let paid = self.paid_count();
        if paid > 0 {
            return Err(OpenTabError::CancelAfterPayment { paid });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn participants_total(participants: &[Participant]) -> Result<Money, OpenTabError> {
    Money::checked_sum(participants.iter().map(|p| p.subtotal))
        .ok_or_else(|| OpenTabError::overflow("total"))
}

fn check_index(index: usize, len: usize) -> Result<(), OpenTabError> {
    if index >= len {
        return Err(OpenTabError::OutOfRange { index, len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab() -> OpenTab {
        OpenTab::create(TabId::new(), "Table 5", CompanyCode::new("ACME")).unwrap()
    }

    fn beer(units: u32) -> NewProduct {
        NewProduct::new("BEER", "Beer", Money::new(5), units).with_product_id("P-BEER")
    }

    fn fries(units: u32) -> NewProduct {
        NewProduct::new("FRIES", "Fries", Money::new(3), units).with_product_id("P-FRIES")
    }

    fn fries_at(price: i64) -> NewProduct {
        NewProduct::new("FRIES", "Fries", Money::new(price), 1).with_product_id("P-FRIES")
    }

    fn diners(names: &[&str]) -> Vec<ParticipantInput> {
        names.iter().map(|n| ParticipantInput::new(*n)).collect()
    }

    fn pay(tab: &mut OpenTab, idx: usize) {
        let participant = &tab.participants()[idx];
        let (id, subtotal) = (participant.id, participant.subtotal);
        tab.register_payment(id, vec![NewPayment::new(subtotal, "cash")])
            .unwrap();
    }

    fn cart_total(tab: &OpenTab) -> Money {
        tab.shared_products().iter().map(ProductLine::total).sum()
    }

    // Cart phase

    #[test]
    fn test_create_trims_and_rejects_blank_name() {
        let tab = OpenTab::create(TabId::new(), "  Table 5 ", CompanyCode::new("ACME")).unwrap();
        assert_eq!(tab.name(), "Table 5");
        assert_eq!(tab.state(), OpenTabState::Open);
        assert_eq!(tab.total_amount(), Money::zero());
        assert_eq!(tab.version(), Version::initial());

        let result = OpenTab::create(TabId::new(), "   ", CompanyCode::new("ACME"));
        assert!(matches!(result, Err(OpenTabError::Validation(_))));
    }

    #[test]
    fn test_add_product_merges_by_code() {
        let mut tab = tab();
        tab.add_product(beer(2)).unwrap();
        tab.add_product(beer(2)).unwrap();
        tab.add_product(fries(1)).unwrap();

        assert_eq!(tab.shared_products().len(), 2);
        assert_eq!(tab.shared_products()[0].units, 4);
        assert_eq!(tab.total_amount(), Money::new(23));
    }

    #[test]
    fn test_cart_total_invariant_after_edits() {
        let mut tab = tab();
        tab.add_product(beer(4)).unwrap();
        tab.add_product(fries(2)).unwrap();
        assert_eq!(tab.total_amount(), cart_total(&tab));

        tab.update_product_units(1, 5).unwrap();
        assert_eq!(tab.total_amount(), cart_total(&tab));
        assert_eq!(tab.total_amount(), Money::new(35));

        tab.remove_product(0).unwrap();
        assert_eq!(tab.total_amount(), cart_total(&tab));
        assert_eq!(tab.total_amount(), Money::new(15));
    }

    #[test]
    fn test_update_to_zero_units_removes_line() {
        let mut tab = tab();
        tab.add_product(beer(4)).unwrap();
        tab.add_product(fries(2)).unwrap();

        tab.update_product_units(0, 0).unwrap();
        assert_eq!(tab.shared_products().len(), 1);
        assert_eq!(tab.shared_products()[0].code, "FRIES");

        tab.update_product_units(0, -3).unwrap();
        assert!(tab.shared_products().is_empty());
        assert_eq!(tab.total_amount(), Money::zero());
    }

    #[test]
    fn test_index_out_of_range() {
        let mut tab = tab();
        tab.add_product(beer(1)).unwrap();

        assert!(matches!(
            tab.remove_product(3),
            Err(OpenTabError::OutOfRange { index: 3, len: 1 })
        ));
        assert!(matches!(
            tab.update_product_units(1, 2),
            Err(OpenTabError::OutOfRange { index: 1, len: 1 })
        ));
        assert!(matches!(
            tab.update_product_units(1, 0),
            Err(OpenTabError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_cart_is_frozen_after_division() {
        let mut tab = tab();
        tab.add_product(beer(4)).unwrap();
        tab.divide_equal(diners(&["A", "B"])).unwrap();

        assert!(matches!(
            tab.add_product(fries(1)),
            Err(OpenTabError::InvalidState {
                current: OpenTabState::Paying,
                action: TabAction::EditProducts
            })
        ));
        assert!(matches!(
            tab.remove_product(0),
            Err(OpenTabError::InvalidState { .. })
        ));
    }

    // Division

    #[test]
    fn test_divide_equal_table_five() {
        let mut tab = tab();
        tab.add_product(beer(4)).unwrap();
        tab.divide_equal(diners(&["A", "B", "C"])).unwrap();

        let subtotals: Vec<i64> = tab
            .participants()
            .iter()
            .map(|p| p.subtotal.amount())
            .collect();
        assert_eq!(subtotals, vec![7, 7, 6]);
        assert_eq!(tab.state(), OpenTabState::Paying);
        assert_eq!(tab.division_type(), Some(DivisionType::Equal));
        assert_eq!(tab.shared_products().len(), 1);
        assert!(tab.participants().iter().all(|p| p.products.is_empty()));
    }

    #[test]
    fn test_divide_equal_shares_sum_to_total() {
        for n in 1..=7 {
            let mut tab = tab();
            tab.add_product(NewProduct::new("X", "X", Money::new(101), 1))
                .unwrap();
            let names: Vec<String> = (0..n).map(|i| format!("P{i}")).collect();
            let inputs = names.iter().map(ParticipantInput::new).collect();
            tab.divide_equal(inputs).unwrap();

            let sum: Money = tab.participants().iter().map(|p| p.subtotal).sum();
            assert_eq!(sum, tab.total_amount());
            for p in tab.participants() {
                let diff = (p.subtotal.amount() * n - 101).abs();
                assert!(diff < n, "share {} not within one unit", p.subtotal);
            }
        }
    }

    #[test]
    fn test_divide_requires_products_and_participants() {
        let mut empty = tab();
        assert!(matches!(
            empty.divide_equal(diners(&["A"])),
            Err(OpenTabError::Validation(_))
        ));

        let mut tab = tab();
        tab.add_product(beer(1)).unwrap();
        assert!(matches!(
            tab.divide_equal(Vec::new()),
            Err(OpenTabError::Validation(_))
        ));
        assert!(matches!(
            tab.divide_equal(diners(&["A", " "])),
            Err(OpenTabError::Validation(_))
        ));
        assert!(matches!(
            tab.divide_by_products(Vec::new()),
            Err(OpenTabError::Validation(_))
        ));
        assert_eq!(tab.state(), OpenTabState::Open);
    }

    #[test]
    fn test_divide_twice_fails() {
        let mut tab = tab();
        tab.add_product(beer(2)).unwrap();
        tab.divide_equal(diners(&["A"])).unwrap();

        assert!(matches!(
            tab.divide_equal(diners(&["B"])),
            Err(OpenTabError::InvalidState {
                action: TabAction::Divide,
                ..
            })
        ));
        assert!(matches!(
            tab.divide_by_products(vec![ProductAssignment::new(ParticipantInput::new("B"), vec![0])]),
            Err(OpenTabError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_divide_by_products_copies_lines() {
        let mut tab = tab();
        tab.add_product(beer(2)).unwrap();
        tab.add_product(fries(3)).unwrap();
        tab.divide_by_products(vec![
            ProductAssignment::new(ParticipantInput::new("A"), vec![0]),
            ProductAssignment::new(ParticipantInput::new("B"), vec![1]),
        ])
        .unwrap();

        let a = &tab.participants()[0];
        let b = &tab.participants()[1];
        assert_eq!(a.subtotal, Money::new(10));
        assert_eq!(b.subtotal, Money::new(9));
        assert_eq!(tab.total_amount(), Money::new(19));
        assert_ne!(a.products[0].id, tab.shared_products()[0].id);

        let mut assigned: Vec<(String, u32)> = tab
            .participants()
            .iter()
            .flat_map(|p| p.products.iter().map(|l| (l.code.clone(), l.units)))
            .collect();
        let mut shared: Vec<(String, u32)> = tab
            .shared_products()
            .iter()
            .map(|l| (l.code.clone(), l.units))
            .collect();
        assigned.sort();
        shared.sort();
        assert_eq!(assigned, shared);
    }

    #[test]
    fn test_divide_by_products_rejects_duplicates_and_bad_indices() {
        let mut tab = tab();
        tab.add_product(beer(2)).unwrap();
        tab.add_product(fries(3)).unwrap();

        let across = tab.divide_by_products(vec![
            ProductAssignment::new(ParticipantInput::new("A"), vec![0]),
            ProductAssignment::new(ParticipantInput::new("B"), vec![0, 1]),
        ]);
        assert!(matches!(across, Err(OpenTabError::Validation(msg)) if msg.contains("multiple")));

        let within = tab.divide_by_products(vec![ProductAssignment::new(
            ParticipantInput::new("A"),
            vec![1, 1],
        )]);
        assert!(matches!(within, Err(OpenTabError::Validation(_))));

        let out_of_range = tab.divide_by_products(vec![ProductAssignment::new(
            ParticipantInput::new("A"),
            vec![2],
        )]);
        assert!(matches!(
            out_of_range,
            Err(OpenTabError::OutOfRange { index: 2, len: 2 })
        ));
        assert_eq!(tab.state(), OpenTabState::Open);
        assert!(tab.participants().is_empty());
    }

    #[test]
    fn test_unassigned_lines_are_dropped_from_bills() {
        let mut tab = tab();
        tab.add_product(beer(2)).unwrap();
        tab.add_product(fries(3)).unwrap();
        tab.divide_by_products(vec![ProductAssignment::new(
            ParticipantInput::new("A"),
            vec![1],
        )])
        .unwrap();

        assert_eq!(tab.total_amount(), Money::new(9));
        assert_eq!(tab.shared_products().len(), 2);
    }

    #[test]
    fn test_oversized_cart_edits_are_rejected_without_mutation() {
        let mut tab = tab();
        tab.add_product(NewProduct::new("PIN", "Pin", Money::new(1), u32::MAX)).unwrap();

        assert!(matches!(
            tab.add_product(NewProduct::new("PIN", "Pin", Money::new(1), u32::MAX)),
            Err(OpenTabError::Validation(_))
        ));
        assert!(matches!(
            tab.add_product(NewProduct::new("GOLD", "Gold", Money::new(i64::MAX), 2)),
            Err(OpenTabError::Validation(_))
        ));
        assert!(matches!(
            tab.add_product(NewProduct::new("GOLD", "Gold", Money::new(i64::MAX), 1)),
            Err(OpenTabError::Validation(_))
        ));
        assert!(matches!(
            tab.update_product_units(0, i64::from(u32::MAX) + 1),
            Err(OpenTabError::Validation(_))
        ));

        assert_eq!(tab.shared_products().len(), 1);
        assert_eq!(tab.shared_products()[0].units, u32::MAX);
        assert_eq!(tab.total_amount(), Money::new(i64::from(u32::MAX)));
    }

    // Settlement phase

    #[test]
    fn test_add_to_participant_under_equal_division() {
        let mut tab = tab();
        tab.add_product(beer(4)).unwrap();
        tab.divide_equal(diners(&["A", "B"])).unwrap();
        let a = tab.participants()[0].id;

        tab.add_product_to_participant(a, fries(1)).unwrap();
        tab.add_product_to_participant(a, fries(1)).unwrap();

        let participant = tab.participant(a).unwrap();
        assert_eq!(participant.products.len(), 1);
        assert_eq!(participant.products[0].units, 2);
        assert_eq!(participant.subtotal, Money::new(16));
        assert_eq!(tab.total_amount(), Money::new(26));
        assert_eq!(tab.shared_products().len(), 1);
    }

    #[test]
    fn test_add_to_participant_under_by_product_mirrors_shared() {
        let mut tab = tab();
        tab.add_product(beer(2)).unwrap();
        tab.divide_by_products(vec![
            ProductAssignment::new(ParticipantInput::new("A"), vec![0]),
            ProductAssignment::new(ParticipantInput::new("B"), vec![]),
        ])
        .unwrap();
        let b = tab.participants()[1].id;

        tab.add_product_to_participant(b, beer(1)).unwrap();
        tab.add_product_to_participant(b, fries(2)).unwrap();

        assert_eq!(tab.shared_products()[0].units, 3);
        assert_eq!(tab.shared_products()[1].code, "FRIES");
        assert_eq!(tab.participant(b).unwrap().subtotal, Money::new(11));
        assert_eq!(tab.total_amount(), Money::new(21));
    }

    #[test]
    fn test_remove_from_participant_under_by_product() {
        let mut tab = tab();
        tab.add_product(beer(2)).unwrap();
        tab.add_product(fries(1)).unwrap();
        tab.divide_by_products(vec![ProductAssignment::new(
            ParticipantInput::new("A"),
            vec![0, 1],
        )])
        .unwrap();
        let a = tab.participants()[0].id;

        tab.remove_product_from_participant(a, 1).unwrap();

        assert_eq!(tab.shared_products().len(), 1);
        assert_eq!(tab.participant(a).unwrap().subtotal, Money::new(10));
        assert_eq!(tab.total_amount(), Money::new(10));

        assert!(matches!(
            tab.remove_product_from_participant(a, 5),
            Err(OpenTabError::OutOfRange { index: 5, len: 1 })
        ));
    }

    #[test]
    fn test_remove_from_participant_under_equal_division() {
        let mut tab = tab();
        tab.add_product(beer(2)).unwrap();
        tab.divide_equal(diners(&["A"])).unwrap();
        let a = tab.participants()[0].id;
        tab.add_product_to_participant(a, fries(2)).unwrap();

        tab.remove_product_from_participant(a, 0).unwrap();

        assert_eq!(tab.participant(a).unwrap().subtotal, Money::new(10));
        assert_eq!(tab.total_amount(), Money::new(10));
        assert_eq!(tab.shared_products()[0].units, 2);
    }

    #[test]
    fn test_repriced_product_is_a_separate_line_under_equal_division() {
        let mut tab = tab();
        tab.add_product(beer(2)).unwrap();
        tab.divide_equal(diners(&["A"])).unwrap();
        let a = tab.participants()[0].id;

        tab.add_product_to_participant(a, fries(1)).unwrap();
        tab.add_product_to_participant(a, fries_at(5)).unwrap();

        let participant = tab.participant(a).unwrap();
        assert_eq!(participant.products.len(), 2);
        assert_eq!(participant.subtotal, Money::new(18));
        let lines: Money = participant.products.iter().map(ProductLine::total).sum();
        assert_eq!(lines, Money::new(8));

        tab.remove_product_from_participant(a, 1).unwrap();
        tab.remove_product_from_participant(a, 0).unwrap();

        assert_eq!(tab.participant(a).unwrap().subtotal, Money::new(10));
        assert_eq!(tab.total_amount(), Money::new(10));
    }

    #[test]
    fn test_repriced_product_is_charged_at_its_price_under_by_product() {
        let mut tab = tab();
        tab.add_product(fries(1)).unwrap();
        tab.divide_by_products(vec![ProductAssignment::new(
            ParticipantInput::new("A"),
            vec![0],
        )])
        .unwrap();
        let a = tab.participants()[0].id;

        tab.add_product_to_participant(a, fries_at(5)).unwrap();

        assert_eq!(tab.participant(a).unwrap().subtotal, Money::new(8));
        assert_eq!(tab.total_amount(), Money::new(8));
        assert_eq!(tab.shared_products().len(), 2);

        tab.remove_product_from_participant(a, 1).unwrap();

        assert_eq!(tab.participant(a).unwrap().subtotal, Money::new(3));
        assert_eq!(tab.shared_products().len(), 1);
        assert_eq!(tab.shared_products()[0].price, Money::new(3));
    }

    #[test]
    fn test_unknown_and_paid_participants_are_rejected() {
        let mut tab = tab();
        tab.add_product(beer(2)).unwrap();
        tab.divide_equal(diners(&["A", "B"])).unwrap();
        let a = tab.participants()[0].id;
        pay(&mut tab, 0);

        assert!(matches!(
            tab.add_product_to_participant(ParticipantId::new(), fries(1)),
            Err(OpenTabError::ParticipantNotFound { .. })
        ));
        assert!(matches!(
            tab.add_product_to_participant(a, fries(1)),
            Err(OpenTabError::ParticipantAlreadyPaid { .. })
        ));
        assert!(matches!(
            tab.register_payment(a, vec![NewPayment::new(Money::new(5), "cash")]),
            Err(OpenTabError::ParticipantAlreadyPaid { .. })
        ));
    }

    #[test]
    fn test_transfer_splits_and_merges() {
        let mut tab = tab();
        tab.add_product(beer(3)).unwrap();
        tab.add_product(fries(1)).unwrap();
        tab.divide_by_products(vec![
            ProductAssignment::new(ParticipantInput::new("A"), vec![0]),
            ProductAssignment::new(ParticipantInput::new("B"), vec![1]),
        ])
        .unwrap();
        let (a, b) = (tab.participants()[0].id, tab.participants()[1].id);
        let total = tab.total_amount();

        tab.transfer_product(a, b, 0, 2).unwrap();
        assert_eq!(tab.participant(a).unwrap().products[0].units, 1);
        assert_eq!(tab.participant(a).unwrap().subtotal, Money::new(5));
        assert_eq!(tab.participant(b).unwrap().subtotal, Money::new(13));

        tab.transfer_product(a, b, 0, 1).unwrap();
        assert!(tab.participant(a).unwrap().products.is_empty());
        let b_lines = &tab.participant(b).unwrap().products;
        assert_eq!(b_lines.len(), 2);
        assert_eq!(b_lines.iter().find(|l| l.code == "BEER").unwrap().units, 3);

        assert_eq!(tab.total_amount(), total);
        assert_eq!(tab.shared_products()[0].units, 3);
    }

    #[test]
    fn test_over_transfer_mutates_nothing() {
        let mut tab = tab();
        tab.add_product(beer(2)).unwrap();
        tab.divide_by_products(vec![
            ProductAssignment::new(ParticipantInput::new("A"), vec![0]),
            ProductAssignment::new(ParticipantInput::new("B"), vec![]),
        ])
        .unwrap();
        let (a, b) = (tab.participants()[0].id, tab.participants()[1].id);
        let before = tab.participants().to_vec();

        let result = tab.transfer_product(a, b, 0, 3);
        assert!(matches!(
            result,
            Err(OpenTabError::TransferExceedsAvailableUnits {
                requested: 3,
                available: 2
            })
        ));
        assert_eq!(tab.participants(), before.as_slice());
    }

    #[test]
    fn test_transfer_validation() {
        let mut tab = tab();
        tab.add_product(beer(2)).unwrap();
        tab.divide_by_products(vec![
            ProductAssignment::new(ParticipantInput::new("A"), vec![0]),
            ProductAssignment::new(ParticipantInput::new("B"), vec![]),
        ])
        .unwrap();
        let (a, b) = (tab.participants()[0].id, tab.participants()[1].id);

        assert!(matches!(
            tab.transfer_product(a, a, 0, 1),
            Err(OpenTabError::Validation(_))
        ));
        assert!(matches!(
            tab.transfer_product(a, b, 0, 0),
            Err(OpenTabError::Validation(_))
        ));
        assert!(matches!(
            tab.transfer_product(a, ParticipantId::new(), 0, 1),
            Err(OpenTabError::ParticipantNotFound { .. })
        ));
        assert!(matches!(
            tab.transfer_product(b, a, 0, 1),
            Err(OpenTabError::OutOfRange { index: 0, len: 0 })
        ));
    }

    #[test]
    fn test_register_payment_threshold() {
        let mut tab = tab();
        tab.add_product(beer(4)).unwrap();
        tab.divide_equal(diners(&["A", "B", "C"])).unwrap();
        let ids: Vec<ParticipantId> = tab.participants().iter().map(|p| p.id).collect();

        let short = tab.register_payment(ids[0], vec![NewPayment::new(Money::new(6), "cash")]);
        assert!(matches!(
            short,
            Err(OpenTabError::InsufficientPayment { paid, subtotal })
                if paid == Money::new(6) && subtotal == Money::new(7)
        ));
        assert!(!tab.participants()[0].is_paid);

        tab.register_payment(ids[0], vec![NewPayment::new(Money::new(7), "cash")])
            .unwrap();
        tab.register_payment(
            ids[1],
            vec![
                NewPayment::new(Money::new(5), "card"),
                NewPayment::new(Money::new(5), "cash"),
            ],
        )
        .unwrap();

        assert!(tab.participants()[0].is_paid);
        assert_eq!(tab.participants()[1].payments.len(), 2);
        assert_eq!(tab.participants()[1].amount_paid(), Money::new(10));
        assert_eq!(tab.pending_count(), 1);
    }

    #[test]
    fn test_overflowing_payments_are_rejected() {
        let mut tab = tab();
        tab.add_product(beer(1)).unwrap();
        tab.divide_equal(diners(&["A"])).unwrap();
        let a = tab.participants()[0].id;

        let result = tab.register_payment(
            a,
            vec![
                NewPayment::new(Money::new(i64::MAX), "cash"),
                NewPayment::new(Money::new(1), "card"),
            ],
        );

        assert!(matches!(result, Err(OpenTabError::Validation(_))));
        assert!(!tab.participant(a).unwrap().is_paid);
    }

    #[test]
    fn test_payment_requires_paying_state() {
        let mut tab = tab();
        tab.add_product(beer(1)).unwrap();
        let result = tab.register_payment(ParticipantId::new(), vec![]);
        assert!(matches!(result, Err(OpenTabError::InvalidState { .. })));
    }

    // Close and cancel

    #[test]
    fn test_close_requires_everyone_paid() {
        let mut tab = tab();
        tab.add_product(beer(4)).unwrap();
        tab.divide_equal(diners(&["A", "B", "C"])).unwrap();
        pay(&mut tab, 0);

        let err = tab.ensure_closable().unwrap_err();
        assert!(matches!(err, OpenTabError::IncompleteSettlement { pending: 2 }));
        assert!(err.to_string().contains('2'));
        assert!(tab.close(vec![]).is_err());
    }

    #[test]
    fn test_close_from_open_is_invalid() {
        let mut tab = tab();
        tab.add_product(beer(1)).unwrap();
        assert!(matches!(
            tab.close(vec![]),
            Err(OpenTabError::InvalidState {
                current: OpenTabState::Open,
                action: TabAction::Close
            })
        ));
    }

    #[test]
    fn test_closing_plan_apportions_equal_division() {
        let mut tab = tab();
        tab.add_product(NewProduct::new("WING", "Wings", Money::new(2), 10).with_product_id("P-WING"))
            .unwrap();
        tab.divide_equal(diners(&["A", "B", "C"])).unwrap();
        let a = tab.participants()[0].id;
        tab.add_product_to_participant(a, fries(1)).unwrap();
        for i in 0..3 {
            pay(&mut tab, i);
        }

        let plan = tab.closing_plan().unwrap();
        let wing_units: Vec<u32> = plan
            .bills
            .iter()
            .map(|bill| bill.lines.iter().find(|l| l.code == "WING").unwrap().units)
            .collect();
        assert_eq!(wing_units, vec![4, 3, 3]);
        assert_eq!(plan.bills[0].lines.len(), 2);

        let subtotals: Money = plan.bills.iter().map(|b| b.subtotal).sum();
        assert_eq!(subtotals, tab.total_amount());

        assert_eq!(
            plan.stock_debits,
            vec![
                StockDebit {
                    product_id: ProductId::new("P-FRIES"),
                    name: "Fries".to_string(),
                    units: 1
                },
                StockDebit {
                    product_id: ProductId::new("P-WING"),
                    name: "Wings".to_string(),
                    units: 10
                },
            ]
        );
    }

    #[test]
    fn test_closing_plan_drops_zero_unit_lines() {
        let mut tab = tab();
        tab.add_product(beer(1)).unwrap();
        tab.divide_equal(diners(&["A", "B"])).unwrap();
        pay(&mut tab, 0);
        pay(&mut tab, 1);

        let plan = tab.closing_plan().unwrap();
        assert_eq!(plan.bills[0].lines.len(), 1);
        assert!(plan.bills[1].lines.is_empty());
    }

    #[test]
    fn test_closing_plan_by_product_debits_shared_lines_only() {
        let mut tab = tab();
        tab.add_product(beer(2)).unwrap();
        tab.add_product(NewProduct::new("TIP", "Tip", Money::new(4), 1))
            .unwrap();
        tab.divide_by_products(vec![ProductAssignment::new(
            ParticipantInput::new("A"),
            vec![0, 1],
        )])
        .unwrap();
        let a = tab.participants()[0].id;
        tab.add_product_to_participant(a, beer(1)).unwrap();
        pay(&mut tab, 0);

        let plan = tab.closing_plan().unwrap();
        assert_eq!(plan.bills[0].lines.len(), 2);
        assert_eq!(plan.stock_debits.len(), 1);
        assert_eq!(plan.stock_debits[0].units, 3);
    }

    #[test]
    fn test_close_records_movements() {
        let mut tab = tab();
        tab.add_product(beer(1)).unwrap();
        tab.divide_equal(diners(&["A"])).unwrap();
        pay(&mut tab, 0);

        tab.close(vec!["m-1".to_string()]).unwrap();
        assert_eq!(tab.state(), OpenTabState::Closed);
        assert!(tab.closed_at().is_some());
        assert_eq!(tab.generated_movements(), ["m-1".to_string()]);
    }

    #[test]
    fn test_cancel_rules() {
        let mut tab = tab();
        tab.add_product(beer(2)).unwrap();
        assert!(tab.ensure_cancellable().is_ok());

        tab.divide_equal(diners(&["A", "B"])).unwrap();
        assert!(tab.ensure_cancellable().is_ok());

        pay(&mut tab, 0);
        assert!(matches!(
            tab.ensure_cancellable(),
            Err(OpenTabError::CancelAfterPayment { paid: 1 })
        ));

        pay(&mut tab, 1);
        tab.close(vec![]).unwrap();
        assert!(matches!(
            tab.ensure_cancellable(),
            Err(OpenTabError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_document_round_trip_keeps_wire_names() {
        let mut tab = tab();
        tab.add_product(beer(2)).unwrap();
        tab.divide_equal(diners(&["A"])).unwrap();

        let json = serde_json::to_value(&tab).unwrap();
        assert_eq!(json["state"], "paying");
        assert_eq!(json["divisionType"], "equal");
        assert_eq!(json["totalAmount"], 10);
        assert_eq!(json["companyCode"], "ACME");
        assert!(json.get("version").is_none());
        assert!(json["participants"][0]["isPaid"] == false);

        let back: OpenTab = serde_json::from_value(json).unwrap();
        assert_eq!(back.participants(), tab.participants());
    }
}
