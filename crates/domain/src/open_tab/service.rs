//! Open-tab service providing the application-level API for open tabs.

use common::{CompanyCode, TabId};
use document_store::{DocumentStore, Filter, FindOptions};

use crate::error::DomainError;
use crate::repository::{CommandResult, Repository};

use super::{
    AddParticipantProduct, AddProduct, CancelTab, CreateTab, DivideByProducts, DivideEqual,
    OpenTab, OpenTabState, RegisterPayment, RemoveParticipantProduct, RemoveProduct,
    TransferProduct, UpdateProductUnits,
};

/// Service for managing open tabs.
///
/// Every method is scoped to the acting company: a tab owned by another
/// company behaves exactly like a missing one. Closing lives in the
/// settlement crate because it writes documents outside the tab.
pub struct OpenTabService<S: DocumentStore> {
    repository: Repository<S, OpenTab>,
}

impl<S: DocumentStore> OpenTabService<S> {
    /// Creates a new open-tab service over the given document store.
    pub fn new(store: S) -> Self {
        Self {
            repository: Repository::new(store),
        }
    }

    /// Returns a reference to the underlying repository.
    pub fn repository(&self) -> &Repository<S, OpenTab> {
        &self.repository
    }

    /// Creates a new empty tab.
    #[tracing::instrument(skip(self), fields(company = %company_code))]
    pub async fn create_tab(
        &self,
        company_code: &CompanyCode,
        cmd: CreateTab,
    ) -> Result<CommandResult<OpenTab>, DomainError> {
        let tab = OpenTab::create(cmd.tab_id, cmd.name, company_code.clone())?;
        let result = self.repository.insert(tab).await?;

        metrics::counter!("open_tabs_created_total").increment(1);
        tracing::info!(tab_id = %cmd.tab_id, "open tab created");
        Ok(result)
    }

    /// Adds a product to the shared cart.
    #[tracing::instrument(skip(self), fields(company = %company_code))]
    pub async fn add_product(
        &self,
        company_code: &CompanyCode,
        cmd: AddProduct,
    ) -> Result<CommandResult<OpenTab>, DomainError> {
        let product = cmd.product;

        self.repository
            .execute(company_code, &cmd.tab_id.to_string(), |tab| {
                tab.add_product(product)
            })
            .await
    }

    /// Removes a shared product line.
    #[tracing::instrument(skip(self), fields(company = %company_code))]
    pub async fn remove_product(
        &self,
        company_code: &CompanyCode,
        cmd: RemoveProduct,
    ) -> Result<CommandResult<OpenTab>, DomainError> {
        self.repository
            .execute(company_code, &cmd.tab_id.to_string(), |tab| {
                tab.remove_product(cmd.index)
            })
            .await
    }

    /// Sets the units of a shared product line.
    #[tracing::instrument(skip(self), fields(company = %company_code))]
    pub async fn update_product_units(
        &self,
        company_code: &CompanyCode,
        cmd: UpdateProductUnits,
    ) -> Result<CommandResult<OpenTab>, DomainError> {
        self.repository
            .execute(company_code, &cmd.tab_id.to_string(), |tab| {
                tab.update_product_units(cmd.index, cmd.units)
            })
            .await
    }

    /// Divides the tab equally among participants.
    #[tracing::instrument(skip(self), fields(company = %company_code))]
    pub async fn divide_equal(
        &self,
        company_code: &CompanyCode,
        cmd: DivideEqual,
    ) -> Result<CommandResult<OpenTab>, DomainError> {
        let participants = cmd.participants;

        let result = self
            .repository
            .execute(company_code, &cmd.tab_id.to_string(), |tab| {
                tab.divide_equal(participants)
            })
            .await?;

        metrics::counter!("open_tabs_divided_total", "division" => "equal").increment(1);
        Ok(result)
    }

    /// Divides the tab by assigning shared products to participants.
    #[tracing::instrument(skip(self), fields(company = %company_code))]
    pub async fn divide_by_products(
        &self,
        company_code: &CompanyCode,
        cmd: DivideByProducts,
    ) -> Result<CommandResult<OpenTab>, DomainError> {
        let assignments = cmd.assignments;

        let result = self
            .repository
            .execute(company_code, &cmd.tab_id.to_string(), |tab| {
                tab.divide_by_products(assignments)
            })
            .await?;

        metrics::counter!("open_tabs_divided_total", "division" => "byProduct").increment(1);
        Ok(result)
    }

    /// Adds a product to a participant.
    #[tracing::instrument(skip(self), fields(company = %company_code))]
    pub async fn add_product_to_participant(
        &self,
        company_code: &CompanyCode,
        cmd: AddParticipantProduct,
    ) -> Result<CommandResult<OpenTab>, DomainError> {
        let product = cmd.product;

        self.repository
            .execute(company_code, &cmd.tab_id.to_string(), |tab| {
                tab.add_product_to_participant(cmd.participant_id, product)
            })
            .await
    }

    /// Removes a product line from a participant.
    #[tracing::instrument(skip(self), fields(company = %company_code))]
    pub async fn remove_product_from_participant(
        &self,
        company_code: &CompanyCode,
        cmd: RemoveParticipantProduct,
    ) -> Result<CommandResult<OpenTab>, DomainError> {
        self.repository
            .execute(company_code, &cmd.tab_id.to_string(), |tab| {
                tab.remove_product_from_participant(cmd.participant_id, cmd.index)
            })
            .await
    }

    /// Moves units of a line from one participant to another.
    #[tracing::instrument(skip(self), fields(company = %company_code))]
    pub async fn transfer_product(
        &self,
        company_code: &CompanyCode,
        cmd: TransferProduct,
    ) -> Result<CommandResult<OpenTab>, DomainError> {
        self.repository
            .execute(company_code, &cmd.tab_id.to_string(), |tab| {
                tab.transfer_product(cmd.from, cmd.to, cmd.index, cmd.units)
            })
            .await
    }

    /// Settles a participant.
    #[tracing::instrument(skip(self), fields(company = %company_code))]
    pub async fn register_payment(
        &self,
        company_code: &CompanyCode,
        cmd: RegisterPayment,
    ) -> Result<CommandResult<OpenTab>, DomainError> {
        let payments = cmd.payments;

        let result = self
            .repository
            .execute(company_code, &cmd.tab_id.to_string(), |tab| {
                tab.register_payment(cmd.participant_id, payments)
            })
            .await?;

        metrics::counter!("open_tab_payments_total").increment(1);
        tracing::info!(
            tab_id = %cmd.tab_id,
            participant_id = %cmd.participant_id,
            pending = result.aggregate.pending_count(),
            "participant settled"
        );
        Ok(result)
    }

    /// Cancels a tab nobody has paid for, deleting it.
    #[tracing::instrument(skip(self), fields(company = %company_code))]
    pub async fn cancel_tab(
        &self,
        company_code: &CompanyCode,
        cmd: CancelTab,
    ) -> Result<OpenTab, DomainError> {
        let tab = self
            .repository
            .delete(company_code, &cmd.tab_id.to_string(), |tab| {
                tab.ensure_cancellable()
            })
            .await?;

        metrics::counter!("open_tabs_cancelled_total").increment(1);
        tracing::info!(tab_id = %cmd.tab_id, "open tab cancelled");
        Ok(tab)
    }

    /// Loads a tab of the company.
    #[tracing::instrument(skip(self), fields(company = %company_code))]
    pub async fn get_tab(
        &self,
        company_code: &CompanyCode,
        tab_id: TabId,
    ) -> Result<OpenTab, DomainError> {
        self.repository
            .get(company_code, &tab_id.to_string())
            .await
    }

    /// Lists the company's tabs, newest first.
    ///
    /// Closed tabs are only included when `include_all` is set.
    #[tracing::instrument(skip(self), fields(company = %company_code))]
    pub async fn list_tabs(
        &self,
        company_code: &CompanyCode,
        include_all: bool,
    ) -> Result<Vec<OpenTab>, DomainError> {
        let mut filter = Filter::for_company(company_code.clone());
        if !include_all {
            filter = filter.not_equals("state", OpenTabState::Closed.as_str());
        }

        let mut tabs = self
            .repository
            .find(&filter, &FindOptions::new())
            .await?;
        tabs.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(tabs)
    }
}
