//! Payment record generator trait and document-store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ClientId, CompanyCode, Money};
use document_store::{
    DocumentStore, DocumentStoreError, DocumentStoreExt, Filter, FindOptions, NewDocument,
    Predicate,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SettlementError};

const PAYMENTS: &str = "payments";

/// A payment received against one or more movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    /// Idempotency key the payment was created under.
    pub id: String,
    pub date: DateTime<Utc>,
    pub amount: Money,
    pub company_code: CompanyCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    pub payment_method: String,

    /// Identification numbers of the settled movements.
    pub movements_number: Vec<String>,
}

/// A payment record to create.
#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub date: DateTime<Utc>,
    pub amount: Money,
    pub client_id: Option<ClientId>,
    pub payment_method: String,
    pub movements_number: Vec<String>,
}

/// Trait for payment record generation.
#[async_trait]
pub trait PaymentGenerator: Send + Sync {
    /// Creates a payment under an idempotency key, or returns the one
    /// already stored for it.
    async fn create_payment(
        &self,
        company_code: &CompanyCode,
        key: &str,
        payment: NewPaymentRecord,
    ) -> Result<PaymentRecord>;

    /// Returns the payments referencing a movement number.
    async fn payments_for(
        &self,
        company_code: &CompanyCode,
        movement_number: &str,
    ) -> Result<Vec<PaymentRecord>>;
}

/// Payment generator over a document store.
#[derive(Debug, Clone)]
pub struct StorePaymentGenerator<S> {
    store: S,
}

impl<S: DocumentStore> StorePaymentGenerator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DocumentStore> PaymentGenerator for StorePaymentGenerator<S> {
    #[tracing::instrument(skip(self, payment), fields(company = %company_code))]
    async fn create_payment(
        &self,
        company_code: &CompanyCode,
        key: &str,
        payment: NewPaymentRecord,
    ) -> Result<PaymentRecord> {
        let record = PaymentRecord {
            id: key.to_string(),
            date: payment.date,
            amount: payment.amount,
            company_code: company_code.clone(),
            client_id: payment.client_id,
            payment_method: payment.payment_method,
            movements_number: payment.movements_number,
        };
        let new = NewDocument::from_value(key, company_code.clone(), &record)?;

        match self.store.insert_one(PAYMENTS, new).await {
            Ok(_) => {
                metrics::counter!("payments_generated_total").increment(1);
                Ok(record)
            }
            Err(DocumentStoreError::DuplicateKey { .. }) => {
                tracing::debug!("payment already recorded");
                let document = self
                    .store
                    .find_by_id(PAYMENTS, company_code, key)
                    .await?
                    .ok_or_else(|| DocumentStoreError::NotFound {
                        collection: PAYMENTS.to_string(),
                        filter: key.to_string(),
                    })?;
                Ok(document.decode()?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn payments_for(
        &self,
        company_code: &CompanyCode,
        movement_number: &str,
    ) -> Result<Vec<PaymentRecord>> {
        let filter = Filter::for_company(company_code.clone())
            .field("movementsNumber", Predicate::Contains(movement_number.into()));

        let documents = self.store.find(PAYMENTS, &filter, &FindOptions::new()).await?;
        documents
            .iter()
            .map(|document| document.decode().map_err(SettlementError::from))
            .collect()
    }
}
