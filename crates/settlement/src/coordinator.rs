//! Close coordinator: turns a fully paid tab into sales documents.

use std::time::Instant;

use common::{CompanyCode, TabId};
use document_store::DocumentStore;
use domain::{ClosingPlan, OpenTab, Repository};

use crate::error::Result;
use crate::services::movements::{Movement, MovementGenerator, NewMovement};
use crate::services::payments::{NewPaymentRecord, PaymentGenerator, PaymentRecord};
use crate::services::stock::{SaleStockReport, StockItem, StockLedger, StockWarning};
use crate::services::{StoreMovementGenerator, StorePaymentGenerator, StoreStockLedger};

const STEP_MOVEMENTS: &str = "generate_movements";
const STEP_STOCK: &str = "debit_stock";
const STEP_CLOSE: &str = "mark_closed";

/// Everything a successful close produced.
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    /// The tab in its closed state.
    pub tab: OpenTab,

    /// One movement per participant, in participant order.
    pub movements: Vec<Movement>,
    pub payments: Vec<PaymentRecord>,
    pub stock: SaleStockReport,

    /// Advisory stock problems found before debiting.
    pub warnings: Vec<StockWarning>,
}

/// Drives the close sequence of open tabs.
///
/// The close runs in three steps (movements and payments → stock debits →
/// closed state). It is not transactional: every document it writes has a
/// deterministic key, so a close that failed part-way is simply retried.
pub struct CloseCoordinator<S, St, M, P>
where
    S: DocumentStore,
    St: StockLedger,
    M: MovementGenerator,
    P: PaymentGenerator,
{
    repository: Repository<S, OpenTab>,
    stock: St,
    movements: M,
    payments: P,
}

/// Close coordinator with every service backed by the same store.
pub type StoreCloseCoordinator<S> =
    CloseCoordinator<S, StoreStockLedger<S>, StoreMovementGenerator<S>, StorePaymentGenerator<S>>;

impl<S: DocumentStore + Clone> StoreCloseCoordinator<S> {
    /// Creates a coordinator whose services all share one store handle.
    pub fn with_store(store: S) -> Self {
        Self::new(
            store.clone(),
            StoreStockLedger::new(store.clone()),
            StoreMovementGenerator::new(store.clone()),
            StorePaymentGenerator::new(store),
        )
    }
}

impl<S, St, M, P> CloseCoordinator<S, St, M, P>
where
    S: DocumentStore,
    St: StockLedger,
    M: MovementGenerator,
    P: PaymentGenerator,
{
    /// Creates a new close coordinator.
    pub fn new(store: S, stock: St, movements: M, payments: P) -> Self {
        Self {
            repository: Repository::new(store),
            stock,
            movements,
            payments,
        }
    }

    pub fn stock(&self) -> &St {
        &self.stock
    }

    pub fn movements(&self) -> &M {
        &self.movements
    }

    pub fn payments(&self) -> &P {
        &self.payments
    }

    /// Closes a tab.
    ///
    /// The tab must be in Paying state with every participant paid.
    #[tracing::instrument(skip(self), fields(company = %company_code, tab_id = %tab_id))]
    pub async fn close_tab(
        &self,
        company_code: &CompanyCode,
        tab_id: TabId,
    ) -> Result<CloseOutcome> {
        let started = Instant::now();

        // 1. Load and validate the tab
        let mut tab = self.repository.get(company_code, &tab_id.to_string()).await?;
        let plan = tab.closing_plan()?;

        // 2. One movement per participant, then its payments
        tracing::info!(step = STEP_MOVEMENTS, bills = plan.bills.len(), "close step started");
        let (movements, payments) = self.generate_documents(company_code, &plan).await?;

        // 3. Debit stock per distinct product
        tracing::info!(step = STEP_STOCK, products = plan.stock_debits.len(), "close step started");
        let items: Vec<StockItem> = plan
            .stock_debits
            .iter()
            .map(|debit| StockItem::new(debit.product_id.clone(), debit.name.clone(), debit.units))
            .collect();
        let warnings = self.stock.validate_stock(company_code, &items).await?;
        let reference = format!("open-tab:{tab_id}");
        let stock = self
            .stock
            .process_sale_stock(company_code, &items, &reference)
            .await?;

        // 4. Mark closed; a concurrent close loses the version check here
        tracing::info!(step = STEP_CLOSE, "close step started");
        tab.close(movements.iter().map(|m| m.id.clone()).collect())?;
        self.repository.save(&mut tab).await?;

        metrics::counter!("open_tabs_closed_total").increment(1);
        metrics::histogram!("open_tab_close_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            movements = movements.len(),
            payments = payments.len(),
            skipped_products = stock.skipped.len(),
            "tab closed"
        );

        Ok(CloseOutcome {
            tab,
            movements,
            payments,
            stock,
            warnings,
        })
    }

    async fn generate_documents(
        &self,
        company_code: &CompanyCode,
        plan: &ClosingPlan,
    ) -> Result<(Vec<Movement>, Vec<PaymentRecord>)> {
        let mut movements = Vec::with_capacity(plan.bills.len());
        let mut payments = Vec::new();

        for bill in &plan.bills {
            let key = format!("{}:{}", plan.tab_id, bill.participant_id);
            let new = NewMovement::paid(&bill.lines, bill.subtotal, bill.client_name.clone())
                .with_client(bill.client_id.clone())
                .for_tab(plan.tab_id, plan.tab_name.clone());
            let movement = self
                .movements
                .create_movement(company_code, &key, new)
                .await?;

            for (index, entry) in bill.payments.iter().enumerate() {
                let record = NewPaymentRecord {
                    date: entry.date,
                    amount: entry.amount,
                    client_id: bill.client_id.clone(),
                    payment_method: entry.payment_method.clone(),
                    movements_number: vec![movement.identification_number.clone()],
                };
                let payment = self
                    .payments
                    .create_payment(company_code, &format!("{key}:{index}"), record)
                    .await?;
                payments.push(payment);
            }
            movements.push(movement);
        }

        Ok((movements, payments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::stock::{StockMovementKind, StockUpdate};
    use crate::SettlementError;
    use common::{Money, ProductId};
    use document_store::InMemoryDocumentStore;
    use domain::{
        AddProduct, CreateTab, DivideEqual, NewPayment, NewProduct, OpenTabError,
        OpenTabService, OpenTabState, ParticipantInput, RegisterPayment,
    };

    fn acme() -> CompanyCode {
        CompanyCode::new("ACME")
    }

    fn setup() -> (
        StoreCloseCoordinator<InMemoryDocumentStore>,
        OpenTabService<InMemoryDocumentStore>,
    ) {
        let store = InMemoryDocumentStore::new();
        (
            CloseCoordinator::with_store(store.clone()),
            OpenTabService::new(store),
        )
    }

    async fn paying_tab(service: &OpenTabService<InMemoryDocumentStore>) -> TabId {
        let cmd = CreateTab::new("Table 5");
        let tab_id = cmd.tab_id;
        service.create_tab(&acme(), cmd).await.unwrap();

        let beer = NewProduct::new("BEER", "Beer", Money::new(5), 4).with_product_id("P-BEER");
        service
            .add_product(&acme(), AddProduct::new(tab_id, beer))
            .await
            .unwrap();

        let diners = vec![ParticipantInput::new("A"), ParticipantInput::new("B")];
        service
            .divide_equal(&acme(), DivideEqual::new(tab_id, diners))
            .await
            .unwrap();
        tab_id
    }

    async fn pay_all(service: &OpenTabService<InMemoryDocumentStore>, tab_id: TabId) {
        let tab = service.get_tab(&acme(), tab_id).await.unwrap();
        for p in tab.participants() {
            service
                .register_payment(
                    &acme(),
                    RegisterPayment::new(tab_id, p.id, vec![NewPayment::new(p.subtotal, "cash")]),
                )
                .await
                .unwrap();
        }
    }

    async fn seed_stock(coordinator: &StoreCloseCoordinator<InMemoryDocumentStore>, units: i64) {
        coordinator
            .stock()
            .update_stock(
                &acme(),
                StockUpdate {
                    product_id: ProductId::new("P-BEER"),
                    name: "Beer".to_string(),
                    delta: units,
                    kind: StockMovementKind::Entry,
                    reference: "seed".to_string(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_happy_path() {
        let (coordinator, service) = setup();
        let tab_id = paying_tab(&service).await;
        pay_all(&service, tab_id).await;
        seed_stock(&coordinator, 10).await;

        let outcome = coordinator.close_tab(&acme(), tab_id).await.unwrap();

        assert_eq!(outcome.tab.state(), OpenTabState::Closed);
        assert!(outcome.tab.closed_at().is_some());
        assert_eq!(outcome.movements.len(), 2);
        assert_eq!(outcome.payments.len(), 2);
        assert!(outcome.warnings.is_empty());

        let total: Money = outcome.movements.iter().map(|m| m.total_amount).sum();
        assert_eq!(total, Money::new(20));
        assert_eq!(
            outcome.tab.generated_movements(),
            outcome.movements.iter().map(|m| m.id.clone()).collect::<Vec<_>>()
        );

        assert_eq!(outcome.stock.movements.len(), 1);
        assert_eq!(outcome.stock.movements[0].id, format!("open-tab:{tab_id}:P-BEER:sale"));
        assert_eq!(
            coordinator
                .stock()
                .stock_of(&acme(), &ProductId::new("P-BEER"))
                .await
                .unwrap(),
            Some(6)
        );
    }

    #[tokio::test]
    async fn test_close_with_pending_participant_fails() {
        let (coordinator, service) = setup();
        let tab_id = paying_tab(&service).await;

        let result = coordinator.close_tab(&acme(), tab_id).await;
        assert!(matches!(
            result,
            Err(SettlementError::Domain(domain::DomainError::OpenTab(
                OpenTabError::IncompleteSettlement { pending: 2 }
            )))
        ));
        assert!(
            coordinator
                .movements()
                .movements_for(&acme(), tab_id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_unknown_product_is_skipped() {
        let (coordinator, service) = setup();
        let tab_id = paying_tab(&service).await;
        pay_all(&service, tab_id).await;

        let outcome = coordinator.close_tab(&acme(), tab_id).await.unwrap();

        assert_eq!(outcome.stock.skipped, vec![ProductId::new("P-BEER")]);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.tab.state(), OpenTabState::Closed);
    }
}
