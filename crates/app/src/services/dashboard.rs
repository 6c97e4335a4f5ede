use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use market_admin_core::entities::{
    Business, BusinessStatus, Company, LegalPage, Record, Service, ServiceStatus, Transaction,
    TransactionStatus, User, UserStatus,
};
use market_admin_postgrest::{with_timeout, RetryConfig};

use super::{count, status_stats, StatusStats, StoreScope};
use crate::error::ServiceError;

/// Landing page figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub users: StatusStats,
    pub companies: StatusStats,
    pub businesses: StatusStats,
    pub services: StatusStats,
    pub transactions: StatusStats,
    pub legal_pages: u64,
    pub attention: Attention,
}

/// Queues waiting on an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attention {
    pub pending_users: u64,
    pub pending_companies: u64,
    pub pending_businesses: u64,
    pub services_requesting_deletion: u64,
    pub pending_transactions: u64,
}

/// Collects every count concurrently. Each count is retried on transient
/// failures and the whole collection is bounded by `timeout`.
pub async fn load(
    scope: StoreScope<'_>,
    retry: &RetryConfig,
    timeout: Duration,
) -> Result<DashboardStats, ServiceError> {
    let retry = Some(retry);
    let (users, companies, businesses, services, transactions, legal_pages) =
        with_timeout(timeout, async {
            tokio::try_join!(
                status_stats::<User>(scope, retry),
                status_stats::<Company>(scope, retry),
                status_stats::<Business>(scope, retry),
                status_stats::<Service>(scope, retry),
                status_stats::<Transaction>(scope, retry),
                count(scope, retry, LegalPage::LIST.table, &[]),
            )
            .map_err(ServiceError::from)
        })
        .await?;

    let attention = Attention {
        pending_users: users.of(UserStatus::Pending),
        pending_companies: companies.of(BusinessStatus::Pending),
        pending_businesses: businesses.of(BusinessStatus::Pending),
        services_requesting_deletion: services.of(ServiceStatus::RequestDeletion),
        pending_transactions: transactions.of(TransactionStatus::Pending),
    };
    debug!(stage = "store", ?attention, "dashboard stats loaded");

    Ok(DashboardStats {
        users,
        companies,
        businesses,
        services,
        transactions,
        legal_pages,
        attention,
    })
}
