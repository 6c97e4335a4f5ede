use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::query::ListSpec;

/// Lifecycle state stored in an entity's `status` column.
pub trait EntityStatus: Copy + Eq + fmt::Debug + Serialize + Send + Sync + 'static {
    /// Every state, in the order they are reported in stats.
    fn all() -> &'static [Self];
    /// Wire representation used by the remote store.
    fn as_str(self) -> &'static str;
    fn parse(value: &str) -> Option<Self>;
}

/// A row of a remote table that can be listed, fetched and deleted by id.
pub trait Record: DeserializeOwned + Serialize + Send + Sync + 'static {
    const LIST: ListSpec;

    fn id(&self) -> &str;
}

/// A record whose `status` column can be changed by an operator.
pub trait StatusRecord: Record {
    type Status: EntityStatus;

    fn status(&self) -> Self::Status;
}

macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];
            pub const NAMES: &'static [&'static str] = &[$($wire),+];
        }

        impl EntityStatus for $name {
            fn all() -> &'static [Self] {
                Self::ALL
            }

            fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }

            fn parse(value: &str) -> Option<Self> {
                match value {
                    $($wire => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

status_enum!(
    /// Account state of a platform user.
    UserStatus {
        Active => "active",
        Pending => "pending",
        Suspended => "suspended",
        Banned => "banned",
        Deleted => "deleted",
    }
);

status_enum!(
    /// Role column checked by the admin gate.
    UserRole {
        Admin => "admin",
        Customer => "customer",
        Provider => "provider",
        BusinessOwner => "business_owner",
    }
);

status_enum!(
    /// Review state shared by businesses and companies.
    BusinessStatus {
        Pending => "pending",
        Active => "active",
        Rejected => "rejected",
        Suspended => "suspended",
        Removed => "removed",
        Deleted => "deleted",
    }
);

/// Companies move through the same review states as businesses.
pub type CompanyStatus = BusinessStatus;

status_enum!(
    /// Listing state of a service; providers may ask for deletion.
    ServiceStatus {
        Pending => "pending",
        Active => "active",
        Rejected => "rejected",
        Suspended => "suspended",
        Removed => "removed",
        Deleted => "deleted",
        RequestDeletion => "requestDeletion",
    }
);

status_enum!(
    /// Payment state of a transaction/order.
    TransactionStatus {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
        Refunded => "refunded",
        Cancelled => "cancelled",
        Processing => "processing",
    }
);

/// Embedded summary of a related user row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Embedded summary of a category row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub id: String,
    pub name: String,
}

/// Embedded summary of a business row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessSummary {
    pub id: String,
    pub name: String,
}

/// Embedded summary of a service row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: UserRole,
    pub status: UserStatus,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl User {
    /// Returns `true` when the account may use the back office.
    pub fn is_active_admin(&self) -> bool {
        self.role == UserRole::Admin && self.status == UserStatus::Active
    }
}

impl Record for User {
    const LIST: ListSpec = ListSpec {
        table: "users",
        select: "*",
        sortable: &["created_at", "updated_at", "full_name", "email", "status", "role"],
        default_sort: "created_at",
        searchable: &["full_name", "email", "phone"],
        statuses: UserStatus::NAMES,
        category_column: None,
        date_column: "created_at",
    };

    fn id(&self) -> &str {
        &self.id
    }
}

impl StatusRecord for User {
    type Status = UserStatus;

    fn status(&self) -> UserStatus {
        self.status
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub registration_number: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub status: CompanyStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<UserSummary>,
}

impl Record for Company {
    const LIST: ListSpec = ListSpec {
        table: "companies",
        select: "*,owner:users!owner_id(id,full_name,email)",
        sortable: &["created_at", "updated_at", "name", "status"],
        default_sort: "created_at",
        searchable: &["name", "email", "registration_number"],
        statuses: BusinessStatus::NAMES,
        category_column: None,
        date_column: "created_at",
    };

    fn id(&self) -> &str {
        &self.id
    }
}

impl StatusRecord for Company {
    type Status = CompanyStatus;

    fn status(&self) -> CompanyStatus {
        self.status
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Business {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub owner_id: String,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    pub status: BusinessStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<UserSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CategorySummary>,
}

impl Record for Business {
    const LIST: ListSpec = ListSpec {
        table: "businesses",
        select: "*,owner:users!owner_id(id,full_name,email),category:categories(id,name)",
        sortable: &["created_at", "updated_at", "name", "status"],
        default_sort: "created_at",
        searchable: &["name", "description"],
        statuses: BusinessStatus::NAMES,
        category_column: Some("category_id"),
        date_column: "created_at",
    };

    fn id(&self) -> &str {
        &self.id
    }
}

impl StatusRecord for Business {
    type Status = BusinessStatus;

    fn status(&self) -> BusinessStatus {
        self.status
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub business_id: String,
    pub provider_id: String,
    #[serde(default)]
    pub category_id: Option<String>,
    pub status: ServiceStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business: Option<BusinessSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<UserSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CategorySummary>,
}

impl Record for Service {
    const LIST: ListSpec = ListSpec {
        table: "services",
        select: "*,business:businesses(id,name),provider:users!provider_id(id,full_name,email),category:categories(id,name)",
        sortable: &["created_at", "updated_at", "title", "price", "status"],
        default_sort: "created_at",
        searchable: &["title", "description"],
        statuses: ServiceStatus::NAMES,
        category_column: Some("category_id"),
        date_column: "created_at",
    };

    fn id(&self) -> &str {
        &self.id
    }
}

impl StatusRecord for Service {
    type Status = ServiceStatus;

    fn status(&self) -> ServiceStatus {
        self.status
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub reference: String,
    pub customer_id: String,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub business_id: Option<String>,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub payment_method: Option<String>,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<UserSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceSummary>,
}

impl Record for Transaction {
    const LIST: ListSpec = ListSpec {
        table: "transactions",
        select: "*,customer:users!customer_id(id,full_name,email),service:services(id,title)",
        sortable: &["created_at", "updated_at", "amount", "status", "reference"],
        default_sort: "created_at",
        searchable: &["reference", "payment_method"],
        statuses: TransactionStatus::NAMES,
        category_column: None,
        date_column: "created_at",
    };

    fn id(&self) -> &str {
        &self.id
    }
}

impl StatusRecord for Transaction {
    type Status = TransactionStatus;

    fn status(&self) -> TransactionStatus {
        self.status
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalPage {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for LegalPage {
    const LIST: ListSpec = ListSpec {
        table: "legal_pages",
        select: "*",
        sortable: &["created_at", "updated_at", "title", "slug"],
        default_sort: "updated_at",
        searchable: &["title", "slug"],
        statuses: &[],
        category_column: None,
        date_column: "created_at",
    };

    fn id(&self) -> &str {
        &self.id
    }
}

fn default_currency() -> String {
    "USD".to_string()
}
