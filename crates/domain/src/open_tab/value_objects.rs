//! Value objects for the open-tab domain.

use chrono::{DateTime, Utc};
use common::{ClientId, LineId, Money, ParticipantId, ProductId};
use serde::{Deserialize, Serialize};

use super::OpenTabError;

/// A product line on the shared cart or on a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductLine {
    /// Fresh id per line.
    pub id: LineId,

    /// Product code; lines with the same code and price are merged.
    pub code: String,

    /// Display name.
    pub name: String,

    /// Unit price.
    pub price: Money,

    /// Number of units, at least 1.
    pub units: u32,

    /// Catalog product this line sells, if stock is tracked for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
}

impl ProductLine {
    /// Returns `price × units`.
    ///
    /// Every line held by a tab has a total that fits, so this never
    /// overflows for stored lines.
    pub fn total(&self) -> Money {
        self.price.multiply(self.units)
    }

    /// Returns a copy of this line with a fresh id and the given units.
    pub fn split_off(&self, units: u32) -> ProductLine {
        ProductLine {
            id: LineId::new(),
            units,
            ..self.clone()
        }
    }

    /// True when `other` sells the same product at the same unit price.
    pub(crate) fn same_product(&self, other: &ProductLine) -> bool {
        self.code == other.code && self.price == other.price && self.product_id == other.product_id
    }

    pub(crate) fn checked_total(&self) -> Result<Money, OpenTabError> {
        self.price
            .checked_multiply(self.units)
            .ok_or_else(|| OpenTabError::overflow("line total"))
    }
}

impl From<NewProduct> for ProductLine {
    fn from(product: NewProduct) -> Self {
        Self {
            id: LineId::new(),
            code: product.code,
            name: product.name,
            price: product.price,
            units: product.units,
            product_id: product.product_id,
        }
    }
}

/// Adds a line to a list, merging units into an existing line for the same
/// product and price. A different price for the same code gets its own line.
pub(crate) fn merge_line(lines: &mut Vec<ProductLine>, line: ProductLine) -> Result<(), OpenTabError> {
    match lines.iter_mut().find(|existing| existing.same_product(&line)) {
        Some(existing) => {
            let units = existing
                .units
                .checked_add(line.units)
                .ok_or_else(|| OpenTabError::overflow("product units"))?;
            existing
                .price
                .checked_multiply(units)
                .ok_or_else(|| OpenTabError::overflow("line total"))?;
            existing.units = units;
        }
        None => lines.push(line),
    }
    Ok(())
}

/// Sum of `price × units` over lines.
pub(crate) fn lines_total(lines: &[ProductLine]) -> Result<Money, OpenTabError> {
    let totals = lines
        .iter()
        .map(ProductLine::checked_total)
        .collect::<Result<Vec<_>, _>>()?;
    Money::checked_sum(totals).ok_or_else(|| OpenTabError::overflow("total"))
}

/// A product to add to a tab or participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub code: String,
    pub name: String,
    pub price: Money,
    pub units: u32,
    #[serde(default)]
    pub product_id: Option<ProductId>,
}

impl NewProduct {
    /// Creates a new product input.
    pub fn new(code: impl Into<String>, name: impl Into<String>, price: Money, units: u32) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            price,
            units,
            product_id: None,
        }
    }

    /// Links the product to a catalog product for stock tracking.
    pub fn with_product_id(mut self, product_id: impl Into<ProductId>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    /// Validates and normalizes the input into a fresh line.
    pub(crate) fn into_line(self) -> Result<ProductLine, OpenTabError> {
        let code = self.code.trim().to_string();
        let name = self.name.trim().to_string();

        if code.is_empty() {
            return Err(OpenTabError::validation("product code is required"));
        }
        if name.is_empty() {
            return Err(OpenTabError::validation("product name is required"));
        }
        if self.units == 0 {
            return Err(OpenTabError::validation("product units must be at least 1"));
        }
        if self.price.is_negative() {
            return Err(OpenTabError::validation(format!(
                "product price must not be negative: {}",
                self.price
            )));
        }

        let line = ProductLine::from(NewProduct {
            code,
            name,
            ..self
        });
        line.checked_total()?;
        Ok(line)
    }
}

/// A diner who shares the tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,

    pub client_name: String,

    /// Lines this participant pays for individually.
    pub products: Vec<ProductLine>,

    /// Amount this participant owes.
    pub subtotal: Money,

    /// True once the participant has settled. Never reverts.
    pub is_paid: bool,

    pub payments: Vec<PaymentEntry>,
}

impl Participant {
    pub(crate) fn new(input: ParticipantInput, products: Vec<ProductLine>, subtotal: Money) -> Self {
        Self {
            id: ParticipantId::new(),
            client_id: input.client_id,
            client_name: input.client_name.trim().to_string(),
            products,
            subtotal,
            is_paid: false,
            payments: Vec::new(),
        }
    }

    /// Returns the sum of registered payments.
    pub fn amount_paid(&self) -> Money {
        self.payments.iter().map(|p| p.amount).sum()
    }

    pub(crate) fn ensure_unpaid(&self) -> Result<(), OpenTabError> {
        if self.is_paid {
            return Err(OpenTabError::ParticipantAlreadyPaid {
                participant_id: self.id,
            });
        }
        Ok(())
    }
}

/// A recorded payment of a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEntry {
    pub date: DateTime<Utc>,
    pub amount: Money,
    pub payment_method: String,
}

/// A payment to register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPayment {
    pub amount: Money,
    pub payment_method: String,
}

impl NewPayment {
    pub fn new(amount: Money, payment_method: impl Into<String>) -> Self {
        Self {
            amount,
            payment_method: payment_method.into(),
        }
    }

    pub(crate) fn into_entry(self, date: DateTime<Utc>) -> Result<PaymentEntry, OpenTabError> {
        let payment_method = self.payment_method.trim().to_string();
        if payment_method.is_empty() {
            return Err(OpenTabError::validation("payment method is required"));
        }
        if self.amount.is_negative() {
            return Err(OpenTabError::validation(format!(
                "payment amount must not be negative: {}",
                self.amount
            )));
        }
        Ok(PaymentEntry {
            date,
            amount: self.amount,
            payment_method,
        })
    }
}

/// A participant to create at division.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInput {
    #[serde(default)]
    pub client_id: Option<ClientId>,
    pub client_name: String,
}

impl ParticipantInput {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_id: None,
            client_name: client_name.into(),
        }
    }

    pub fn with_client(mut self, client_id: impl Into<ClientId>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), OpenTabError> {
        if self.client_name.trim().is_empty() {
            return Err(OpenTabError::validation("participant name is required"));
        }
        Ok(())
    }
}

/// A participant together with the shared-product indices they take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductAssignment {
    #[serde(flatten)]
    pub participant: ParticipantInput,
    pub product_indices: Vec<usize>,
}

impl ProductAssignment {
    pub fn new(participant: ParticipantInput, product_indices: Vec<usize>) -> Self {
        Self {
            participant,
            product_indices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beer(units: u32) -> NewProduct {
        NewProduct::new("BEER", "Beer", Money::new(5), units)
    }

    #[test]
    fn test_line_total() {
        let line = beer(4).into_line().unwrap();
        assert_eq!(line.total(), Money::new(20));
    }

    #[test]
    fn test_into_line_trims_and_validates() {
        let line = NewProduct::new("  BEER ", " Beer ", Money::new(5), 1)
            .into_line()
            .unwrap();
        assert_eq!(line.code, "BEER");
        assert_eq!(line.name, "Beer");

        assert!(matches!(
            NewProduct::new(" ", "Beer", Money::new(5), 1).into_line(),
            Err(OpenTabError::Validation(_))
        ));
        assert!(matches!(
            NewProduct::new("BEER", "", Money::new(5), 1).into_line(),
            Err(OpenTabError::Validation(_))
        ));
        assert!(matches!(
            beer(0).into_line(),
            Err(OpenTabError::Validation(_))
        ));
        assert!(matches!(
            NewProduct::new("BEER", "Beer", Money::new(-1), 1).into_line(),
            Err(OpenTabError::Validation(_))
        ));
    }

    #[test]
    fn test_free_product_is_allowed() {
        assert!(NewProduct::new("WATER", "Water", Money::zero(), 1).into_line().is_ok());
    }

    #[test]
    fn test_merge_line_by_code() {
        let mut lines = vec![beer(2).into_line().unwrap()];
        merge_line(&mut lines, beer(3).into_line().unwrap()).unwrap();
        merge_line(
            &mut lines,
            NewProduct::new("WINE", "Wine", Money::new(8), 1).into_line().unwrap(),
        )
        .unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].units, 5);
        assert_eq!(lines_total(&lines).unwrap(), Money::new(33));
    }

    #[test]
    fn test_merge_line_keeps_prices_apart() {
        let mut lines = vec![NewProduct::new("FRIES", "Fries", Money::new(3), 1).into_line().unwrap()];
        merge_line(
            &mut lines,
            NewProduct::new("FRIES", "Fries", Money::new(5), 1).into_line().unwrap(),
        )
        .unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].price, Money::new(3));
        assert_eq!(lines[1].price, Money::new(5));
        assert_eq!(lines_total(&lines).unwrap(), Money::new(8));
    }

    #[test]
    fn test_oversized_lines_are_rejected() {
        assert!(matches!(
            NewProduct::new("GOLD", "Gold", Money::new(i64::MAX), 2).into_line(),
            Err(OpenTabError::Validation(_))
        ));

        let mut lines = vec![NewProduct::new("PIN", "Pin", Money::zero(), u32::MAX).into_line().unwrap()];
        let result = merge_line(
            &mut lines,
            NewProduct::new("PIN", "Pin", Money::zero(), 1).into_line().unwrap(),
        );
        assert!(matches!(result, Err(OpenTabError::Validation(_))));
        assert_eq!(lines[0].units, u32::MAX);

        let big = NewProduct::new("A", "A", Money::new(i64::MAX), 1).into_line().unwrap();
        let one = NewProduct::new("B", "B", Money::new(1), 1).into_line().unwrap();
        assert!(matches!(lines_total(&[big, one]), Err(OpenTabError::Validation(_))));
    }

    #[test]
    fn test_split_off_gets_fresh_id() {
        let line = beer(4).into_line().unwrap();
        let part = line.split_off(1);
        assert_ne!(part.id, line.id);
        assert_eq!(part.units, 1);
        assert_eq!(part.code, "BEER");
    }

    #[test]
    fn test_payment_validation() {
        let now = Utc::now();
        assert!(NewPayment::new(Money::new(10), "cash").into_entry(now).is_ok());
        assert!(NewPayment::new(Money::zero(), "voucher").into_entry(now).is_ok());
        assert!(matches!(
            NewPayment::new(Money::new(10), "  ").into_entry(now),
            Err(OpenTabError::Validation(_))
        ));
        assert!(matches!(
            NewPayment::new(Money::new(-10), "cash").into_entry(now),
            Err(OpenTabError::Validation(_))
        ));
    }

    #[test]
    fn test_assignment_wire_format() {
        let json = r#"{"clientName":"Ana","clientId":"C-1","productIndices":[0,2]}"#;
        let assignment: ProductAssignment = serde_json::from_str(json).unwrap();
        assert_eq!(assignment.participant.client_name, "Ana");
        assert_eq!(assignment.participant.client_id, Some(ClientId::new("C-1")));
        assert_eq!(assignment.product_indices, vec![0, 2]);
    }

    #[test]
    fn test_line_wire_format_is_camel_case() {
        let line = beer(1).with_product_id("P-1").into_line().unwrap();
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["productId"], "P-1");
        assert_eq!(json["units"], 1);
    }
}
