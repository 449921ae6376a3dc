//! Stock ledger trait and document-store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CompanyCode, ProductId};
use document_store::{
    DocumentStore, DocumentStoreError, DocumentStoreExt, Filter, NewDocument, WriteOptions,
};
use serde::{Deserialize, Serialize};

use super::retry::{Contention, MAX_ATTEMPTS};
use crate::error::{Result, SettlementError};

const PRODUCT_STOCK: &str = "product_stock";
const STOCK_MOVEMENTS: &str = "stock_movements";

/// Why a stock level changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StockMovementKind {
    Sale,
    Entry,
    Adjustment,
    Revert,
}

impl StockMovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockMovementKind::Sale => "sale",
            StockMovementKind::Entry => "entry",
            StockMovementKind::Adjustment => "adjustment",
            StockMovementKind::Revert => "revert",
        }
    }

    /// Entries and adjustments start tracking unknown products at zero.
    fn creates_product(&self) -> bool {
        matches!(self, StockMovementKind::Entry | StockMovementKind::Adjustment)
    }
}

impl std::fmt::Display for StockMovementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current stock of a product, one document per product and company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductStock {
    pub product_id: ProductId,
    pub name: String,
    pub stock: i64,
}

/// Immutable record of one stock change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockMovement {
    /// `{reference}:{productId}:{kind}`.
    pub id: String,
    pub product_id: ProductId,
    pub name: String,
    pub kind: StockMovementKind,
    /// Signed change applied to the stock.
    pub quantity: i64,
    pub stock_before: i64,
    pub stock_after: i64,
    pub reference: String,
    pub date: DateTime<Utc>,
}

/// A product and a number of units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockItem {
    pub product_id: ProductId,
    pub name: String,
    pub units: u32,
}

impl StockItem {
    pub fn new(product_id: impl Into<ProductId>, name: impl Into<String>, units: u32) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            units,
        }
    }
}

/// One stock change to apply.
#[derive(Debug, Clone)]
pub struct StockUpdate {
    pub product_id: ProductId,
    pub name: String,
    pub delta: i64,
    pub kind: StockMovementKind,
    pub reference: String,
}

/// Outcome of a batch of sale debits or reverts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaleStockReport {
    /// Applied (or previously applied) movements.
    pub movements: Vec<StockMovement>,

    /// Products without a stock record; nothing was changed for them.
    pub skipped: Vec<ProductId>,
}

/// Advisory problem found by [`StockLedger::validate_stock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockWarning {
    UnknownProduct {
        product_id: ProductId,
    },
    Insufficient {
        product_id: ProductId,
        requested: u32,
        available: i64,
    },
}

impl std::fmt::Display for StockWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StockWarning::UnknownProduct { product_id } => {
                write!(f, "product {product_id} has no stock record")
            }
            StockWarning::Insufficient {
                product_id,
                requested,
                available,
            } => write!(
                f,
                "product {product_id}: requested {requested}, {available} in stock"
            ),
        }
    }
}

/// Trait for stock bookkeeping.
///
/// Implementations only provide `update_stock` and `stock_of`; the batch
/// operations are built on top of them.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Applies a signed delta to a product's stock and records a movement.
    ///
    /// Idempotent per `(reference, product, kind)`: a repeated call returns
    /// the movement recorded the first time. Returns `None` if the product
    /// has no stock record and the kind does not create one.
    async fn update_stock(
        &self,
        company_code: &CompanyCode,
        update: StockUpdate,
    ) -> Result<Option<StockMovement>>;

    /// Returns the current stock of a product, if it is tracked.
    async fn stock_of(
        &self,
        company_code: &CompanyCode,
        product_id: &ProductId,
    ) -> Result<Option<i64>>;

    /// Debits sold units, one sale movement per item.
    async fn process_sale_stock(
        &self,
        company_code: &CompanyCode,
        items: &[StockItem],
        reference: &str,
    ) -> Result<SaleStockReport> {
        self.apply_batch(company_code, items, reference, StockMovementKind::Sale)
            .await
    }

    /// Credits previously sold units back.
    async fn revert_sale_stock(
        &self,
        company_code: &CompanyCode,
        items: &[StockItem],
        reference: &str,
    ) -> Result<SaleStockReport> {
        self.apply_batch(company_code, items, reference, StockMovementKind::Revert)
            .await
    }

    /// Reports unknown products and insufficient stock. Never blocks a sale.
    async fn validate_stock(
        &self,
        company_code: &CompanyCode,
        items: &[StockItem],
    ) -> Result<Vec<StockWarning>> {
        let mut warnings = Vec::new();
        for item in items {
            let warning = match self.stock_of(company_code, &item.product_id).await? {
                None => Some(StockWarning::UnknownProduct {
                    product_id: item.product_id.clone(),
                }),
                Some(available) if available < i64::from(item.units) => {
                    Some(StockWarning::Insufficient {
                        product_id: item.product_id.clone(),
                        requested: item.units,
                        available,
                    })
                }
                Some(_) => None,
            };
            if let Some(warning) = warning {
                tracing::warn!(company = %company_code, %warning, "stock check");
                warnings.push(warning);
            }
        }
        Ok(warnings)
    }

    #[doc(hidden)]
    async fn apply_batch(
        &self,
        company_code: &CompanyCode,
        items: &[StockItem],
        reference: &str,
        kind: StockMovementKind,
    ) -> Result<SaleStockReport> {
        let sign = if kind == StockMovementKind::Sale { -1 } else { 1 };
        let mut report = SaleStockReport::default();

        for item in items {
            let update = StockUpdate {
                product_id: item.product_id.clone(),
                name: item.name.clone(),
                delta: sign * i64::from(item.units),
                kind,
                reference: reference.to_string(),
            };
            match self.update_stock(company_code, update).await? {
                Some(movement) => report.movements.push(movement),
                None => {
                    tracing::warn!(
                        company = %company_code,
                        product_id = %item.product_id,
                        %kind,
                        "no stock record, skipping"
                    );
                    report.skipped.push(item.product_id.clone());
                }
            }
        }
        Ok(report)
    }
}

/// Stock ledger over a document store.
#[derive(Debug, Clone)]
pub struct StoreStockLedger<S> {
    store: S,
}

impl<S: DocumentStore> StoreStockLedger<S> {
    /// Creates a new stock ledger over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn movement_id(update: &StockUpdate) -> String {
        format!("{}:{}:{}", update.reference, update.product_id, update.kind)
    }

    async fn existing_movement(
        &self,
        company_code: &CompanyCode,
        id: &str,
    ) -> Result<Option<StockMovement>> {
        match self.store.find_by_id(STOCK_MOVEMENTS, company_code, id).await? {
            Some(document) => Ok(Some(document.decode()?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<S: DocumentStore> StockLedger for StoreStockLedger<S> {
    #[tracing::instrument(skip(self, update), fields(company = %company_code, product_id = %update.product_id, kind = %update.kind))]
    async fn update_stock(
        &self,
        company_code: &CompanyCode,
        update: StockUpdate,
    ) -> Result<Option<StockMovement>> {
        let id = Self::movement_id(&update);
        if let Some(existing) = self.existing_movement(company_code, &id).await? {
            tracing::debug!(movement_id = %id, "stock movement already recorded");
            return Ok(Some(existing));
        }

        let product_key = update.product_id.to_string();
        let mut contention = Contention::new();
        for _ in 0..MAX_ATTEMPTS {
            let document = match self
                .store
                .find_by_id(PRODUCT_STOCK, company_code, &product_key)
                .await?
            {
                Some(document) => document,
                None if update.kind.creates_product() => {
                    let stock = ProductStock {
                        product_id: update.product_id.clone(),
                        name: update.name.clone(),
                        stock: 0,
                    };
                    let new = NewDocument::from_value(&product_key, company_code.clone(), &stock)?;
                    match self.store.insert_one(PRODUCT_STOCK, new).await {
                        Ok(document) => document,
                        Err(DocumentStoreError::DuplicateKey { .. }) => {
                            contention.wait().await;
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                None => return Ok(None),
            };

            let mut stock: ProductStock = document.decode()?;
            let before = stock.stock;
            stock.stock += update.delta;

            let written = self
                .store
                .update_one(
                    PRODUCT_STOCK,
                    &Filter::by_id(company_code.clone(), &product_key),
                    serde_json::to_value(&stock)?,
                    WriteOptions::expect_version(document.version),
                )
                .await;
            match written {
                Ok(_) => {}
                Err(DocumentStoreError::ConcurrencyConflict { .. }) => {
                    contention.wait().await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            let movement = StockMovement {
                id: id.clone(),
                product_id: update.product_id.clone(),
                name: stock.name.clone(),
                kind: update.kind,
                quantity: update.delta,
                stock_before: before,
                stock_after: stock.stock,
                reference: update.reference.clone(),
                date: Utc::now(),
            };
            let new = NewDocument::from_value(&id, company_code.clone(), &movement)?;
            return match self.store.insert_one(STOCK_MOVEMENTS, new).await {
                Ok(_) => {
                    if update.kind == StockMovementKind::Sale {
                        metrics::counter!("stock_debits_total").increment(1);
                    }
                    if stock.stock < 0 {
                        tracing::warn!(stock = stock.stock, "stock went negative");
                    }
                    Ok(Some(movement))
                }
                Err(DocumentStoreError::DuplicateKey { .. }) => {
                    self.existing_movement(company_code, &id).await
                }
                Err(e) => Err(e.into()),
            };
        }

        Err(SettlementError::Stock(format!(
            "could not update stock of {} after {MAX_ATTEMPTS} attempts",
            update.product_id
        )))
    }

    async fn stock_of(
        &self,
        company_code: &CompanyCode,
        product_id: &ProductId,
    ) -> Result<Option<i64>> {
        let document = self
            .store
            .find_by_id(PRODUCT_STOCK, company_code, product_id.as_str())
            .await?;
        match document {
            Some(document) => Ok(Some(document.decode::<ProductStock>()?.stock)),
            None => Ok(None),
        }
    }
}
