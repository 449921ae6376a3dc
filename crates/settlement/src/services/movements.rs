//! Sales movement generator trait and document-store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ClientId, CompanyCode, Money, ProductId, TabId};
use document_store::{
    DocumentStore, DocumentStoreError, DocumentStoreExt, Filter, FindOptions, NewDocument,
    WriteOptions,
};
use domain::ProductLine;
use serde::{Deserialize, Serialize};

use super::retry::{Contention, MAX_ATTEMPTS};
use crate::error::{Result, SettlementError};

const MOVEMENTS: &str = "movements";
const MOVEMENT_COUNTERS: &str = "movement_counters";
const COUNTER_ID: &str = "movements";

/// Payment status of a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MovementState {
    Pending,
    Paid,
}

/// One line of a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
    pub code: String,
    pub name: String,
    pub price: Money,
    pub units: u32,
    pub total: Money,
}

impl From<&ProductLine> for MovementDetail {
    fn from(line: &ProductLine) -> Self {
        Self {
            product_id: line.product_id.clone(),
            code: line.code.clone(),
            name: line.name.clone(),
            price: line.price,
            units: line.units,
            total: line.total(),
        }
    }
}

/// A sales movement (invoice-like record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movement {
    /// Idempotency key the movement was created under.
    pub id: String,
    pub date: DateTime<Utc>,
    pub details: Vec<MovementDetail>,
    pub total_amount: Money,
    pub state: MovementState,
    pub company_code: CompanyCode,
    pub amount_paid: Money,

    /// Per-company sequential number, zero-padded to 8 digits.
    pub identification_number: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    pub client_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_tab_id: Option<TabId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_tab_name: Option<String>,
}

/// A movement to create.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub details: Vec<MovementDetail>,
    pub total_amount: Money,
    pub amount_paid: Money,
    pub client_id: Option<ClientId>,
    pub client_name: String,
    pub open_tab_id: Option<TabId>,
    pub open_tab_name: Option<String>,
}

impl NewMovement {
    /// Creates a fully paid movement for the given total.
    ///
    /// The total is what the customer was charged; under an equal division
    /// it need not equal the sum of the apportioned lines.
    pub fn paid(lines: &[ProductLine], total_amount: Money, client_name: impl Into<String>) -> Self {
        Self {
            details: lines.iter().map(MovementDetail::from).collect(),
            total_amount,
            amount_paid: total_amount,
            client_id: None,
            client_name: client_name.into(),
            open_tab_id: None,
            open_tab_name: None,
        }
    }

    pub fn with_client(mut self, client_id: Option<ClientId>) -> Self {
        self.client_id = client_id;
        self
    }

    /// Cross-references the open tab the movement was generated from.
    pub fn for_tab(mut self, tab_id: TabId, tab_name: impl Into<String>) -> Self {
        self.open_tab_id = Some(tab_id);
        self.open_tab_name = Some(tab_name.into());
        self
    }

    fn into_movement(self, id: String, company_code: CompanyCode, number: String) -> Movement {
        let state = if self.amount_paid >= self.total_amount {
            MovementState::Paid
        } else {
            MovementState::Pending
        };
        Movement {
            id,
            date: Utc::now(),
            details: self.details,
            total_amount: self.total_amount,
            state,
            company_code,
            amount_paid: self.amount_paid,
            identification_number: number,
            client_id: self.client_id,
            client_name: self.client_name,
            open_tab_id: self.open_tab_id,
            open_tab_name: self.open_tab_name,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MovementCounter {
    last_number: u64,
}

/// Trait for sales movement generation.
#[async_trait]
pub trait MovementGenerator: Send + Sync {
    /// Allocates the next movement number of a company.
    async fn generate_movement_number(&self, company_code: &CompanyCode) -> Result<String>;

    /// Creates a movement under an idempotency key.
    ///
    /// If a movement already exists for the key it is returned unchanged and
    /// no number is allocated.
    async fn create_movement(
        &self,
        company_code: &CompanyCode,
        key: &str,
        movement: NewMovement,
    ) -> Result<Movement>;

    /// Returns the movements generated from an open tab, by number.
    async fn movements_for(
        &self,
        company_code: &CompanyCode,
        tab_id: TabId,
    ) -> Result<Vec<Movement>>;
}

/// Movement generator over a document store.
#[derive(Debug, Clone)]
pub struct StoreMovementGenerator<S> {
    store: S,
}

impl<S: DocumentStore> StoreMovementGenerator<S> {
    /// Creates a new movement generator over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    async fn existing(&self, company_code: &CompanyCode, key: &str) -> Result<Option<Movement>> {
        match self.store.find_by_id(MOVEMENTS, company_code, key).await? {
            Some(document) => Ok(Some(document.decode()?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<S: DocumentStore> MovementGenerator for StoreMovementGenerator<S> {
    #[tracing::instrument(skip(self), fields(company = %company_code))]
    async fn generate_movement_number(&self, company_code: &CompanyCode) -> Result<String> {
        let mut contention = Contention::new();
        for _ in 0..MAX_ATTEMPTS {
            let current = self
                .store
                .find_by_id(MOVEMENT_COUNTERS, company_code, COUNTER_ID)
                .await?;

            let next = match current {
                None => {
                    let counter = MovementCounter { last_number: 1 };
                    let new = NewDocument::from_value(COUNTER_ID, company_code.clone(), &counter)?;
                    match self.store.insert_one(MOVEMENT_COUNTERS, new).await {
                        Ok(_) => 1,
                        Err(DocumentStoreError::DuplicateKey { .. }) => {
                            contention.wait().await;
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Some(document) => {
                    let mut counter: MovementCounter = document.decode()?;
                    counter.last_number += 1;
                    let written = self
                        .store
                        .update_one(
                            MOVEMENT_COUNTERS,
                            &Filter::by_id(company_code.clone(), COUNTER_ID),
                            serde_json::to_value(&counter)?,
                            WriteOptions::expect_version(document.version),
                        )
                        .await;
                    match written {
                        Ok(_) => counter.last_number,
                        Err(DocumentStoreError::ConcurrencyConflict { .. }) => {
                            contention.wait().await;
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            };
            return Ok(format!("{next:08}"));
        }

        Err(SettlementError::MovementNumber(format!(
            "counter for {company_code} still contended after {MAX_ATTEMPTS} attempts"
        )))
    }

    #[tracing::instrument(skip(self, movement), fields(company = %company_code))]
    async fn create_movement(
        &self,
        company_code: &CompanyCode,
        key: &str,
        movement: NewMovement,
    ) -> Result<Movement> {
        if let Some(existing) = self.existing(company_code, key).await? {
            tracing::debug!(number = %existing.identification_number, "movement already exists");
            return Ok(existing);
        }

        let number = self.generate_movement_number(company_code).await?;
        let movement = movement.into_movement(key.to_string(), company_code.clone(), number);
        let new = NewDocument::from_value(key, company_code.clone(), &movement)?;

        match self.store.insert_one(MOVEMENTS, new).await {
            Ok(_) => {
                metrics::counter!("movements_generated_total").increment(1);
                tracing::info!(number = %movement.identification_number, "movement created");
                Ok(movement)
            }
            Err(DocumentStoreError::DuplicateKey { .. }) => {
                // Lost a race for the same key; the winner's number stands.
                tracing::warn!(
                    number = %movement.identification_number,
                    "movement number discarded after duplicate key"
                );
                self.existing(company_code, key).await?.ok_or_else(|| {
                    SettlementError::MovementNumber(format!("movement {key} vanished"))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn movements_for(
        &self,
        company_code: &CompanyCode,
        tab_id: TabId,
    ) -> Result<Vec<Movement>> {
        let filter =
            Filter::for_company(company_code.clone()).equals("openTabId", tab_id.to_string());

        let documents = self
            .store
            .find(MOVEMENTS, &filter, &FindOptions::new())
            .await?;
        let mut movements = documents
            .iter()
            .map(|document| document.decode().map_err(SettlementError::from))
            .collect::<Result<Vec<Movement>>>()?;
        // Numbers outgrow their zero padding, so order by width first.
        movements.sort_by(|a, b| {
            let (a, b) = (&a.identification_number, &b.identification_number);
            a.len().cmp(&b.len()).then_with(|| a.cmp(b))
        });
        Ok(movements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use document_store::InMemoryDocumentStore;
    use domain::NewProduct;

    fn acme() -> CompanyCode {
        CompanyCode::new("ACME")
    }

    fn lines() -> Vec<ProductLine> {
        vec![
            ProductLine::from(NewProduct::new("BEER", "Beer", Money::new(5), 2)),
            ProductLine::from(NewProduct::new("CHIPS", "Chips", Money::new(3), 1)),
        ]
    }

    #[tokio::test]
    async fn test_numbers_are_sequential_per_company() {
        let generator = StoreMovementGenerator::new(InMemoryDocumentStore::new());

        assert_eq!(generator.generate_movement_number(&acme()).await.unwrap(), "00000001");
        assert_eq!(generator.generate_movement_number(&acme()).await.unwrap(), "00000002");
        assert_eq!(
            generator
                .generate_movement_number(&CompanyCode::new("OTHER"))
                .await
                .unwrap(),
            "00000001"
        );
    }

    #[tokio::test]
    async fn test_concurrent_numbers_are_unique() {
        let generator = StoreMovementGenerator::new(InMemoryDocumentStore::new());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let generator = generator.clone();
            handles.push(tokio::spawn(async move {
                let mut numbers = Vec::new();
                for _ in 0..5 {
                    numbers.push(generator.generate_movement_number(&acme()).await.unwrap());
                }
                numbers
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 20);
    }

    #[tokio::test]
    async fn test_create_movement_totals_lines() {
        let generator = StoreMovementGenerator::new(InMemoryDocumentStore::new());
        let tab_id = TabId::new();
        let new = NewMovement::paid(&lines(), Money::new(13), "Ana")
            .with_client(Some(ClientId::new("C-1")))
            .for_tab(tab_id, "Table 5");

        let movement = generator
            .create_movement(&acme(), "tab:ana", new)
            .await
            .unwrap();

        assert_eq!(movement.total_amount, Money::new(13));
        assert_eq!(movement.amount_paid, Money::new(13));
        assert_eq!(movement.state, MovementState::Paid);
        assert_eq!(movement.identification_number, "00000001");
        assert_eq!(movement.details[0].total, Money::new(10));
        assert_eq!(movement.open_tab_name.as_deref(), Some("Table 5"));
    }

    #[tokio::test]
    async fn test_same_key_returns_existing_without_new_number() {
        let generator = StoreMovementGenerator::new(InMemoryDocumentStore::new());

        let first = generator
            .create_movement(&acme(), "tab:ana", NewMovement::paid(&lines(), Money::new(13), "Ana"))
            .await
            .unwrap();
        let second = generator
            .create_movement(&acme(), "tab:ana", NewMovement::paid(&lines(), Money::new(13), "Ana"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(generator.generate_movement_number(&acme()).await.unwrap(), "00000002");
    }

    #[tokio::test]
    async fn test_movements_for_tab() {
        let generator = StoreMovementGenerator::new(InMemoryDocumentStore::new());
        let tab_id = TabId::new();

        for key in ["a", "b"] {
            generator
                .create_movement(&acme(), key, NewMovement::paid(&lines(), Money::new(13), key).for_tab(tab_id, "T"))
                .await
                .unwrap();
        }
        generator
            .create_movement(&acme(), "other", NewMovement::paid(&lines(), Money::new(13), "x"))
            .await
            .unwrap();

        let movements = generator.movements_for(&acme(), tab_id).await.unwrap();
        let numbers: Vec<&str> = movements
            .iter()
            .map(|m| m.identification_number.as_str())
            .collect();
        assert_eq!(numbers, vec!["00000001", "00000002"]);
    }

    #[tokio::test]
    async fn test_movements_for_orders_numbers_past_padding() {
        let store = InMemoryDocumentStore::new();
        let counter = MovementCounter {
            last_number: 99_999_998,
        };
        store
            .insert_one(
                MOVEMENT_COUNTERS,
                NewDocument::from_value(COUNTER_ID, acme(), &counter).unwrap(),
            )
            .await
            .unwrap();
        let generator = StoreMovementGenerator::new(store);
        let tab_id = TabId::new();

        for key in ["a", "b"] {
            generator
                .create_movement(&acme(), key, NewMovement::paid(&lines(), Money::new(13), key).for_tab(tab_id, "T"))
                .await
                .unwrap();
        }

        let movements = generator.movements_for(&acme(), tab_id).await.unwrap();
        let numbers: Vec<&str> = movements
            .iter()
            .map(|m| m.identification_number.as_str())
            .collect();
        assert_eq!(numbers, vec!["99999999", "100000000"]);
    }
}
