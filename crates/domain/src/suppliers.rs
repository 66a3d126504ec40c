//! Supplier tier lookups.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::PartyId;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::DomainError;

/// Eligibility tier of a supplier, as scored by the supplier directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupplierTier {
    Suspended,
    Basic,
    Verified,
    Preferred,
}

impl SupplierTier {
    pub fn can_bid(&self) -> bool {
        !matches!(self, SupplierTier::Suspended)
    }

    /// Maximum number of SUBMITTED quotes across the whole platform.
    /// `None` means unlimited.
    pub fn max_active_quotes(&self) -> Option<i64> {
        match self {
            SupplierTier::Suspended => Some(0),
            SupplierTier::Basic => Some(3),
            SupplierTier::Verified => Some(10),
            SupplierTier::Preferred => None,
        }
    }
}

/// External directory of supplier eligibility.
#[async_trait]
pub trait SupplierDirectory: Send + Sync {
    /// Returns the supplier's tier, or `None` if the supplier is unknown.
    async fn supplier_tier(&self, supplier_id: PartyId) -> Result<Option<SupplierTier>, DomainError>;
}

/// In-memory supplier directory for tests and local runs.
#[derive(Clone, Default)]
pub struct InMemorySupplierDirectory {
    tiers: Arc<RwLock<HashMap<PartyId, SupplierTier>>>,
}

impl InMemorySupplierDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_tier(&self, supplier_id: PartyId, tier: SupplierTier) {
        self.tiers.write().await.insert(supplier_id, tier);
    }
}

#[async_trait]
impl SupplierDirectory for InMemorySupplierDirectory {
    async fn supplier_tier(&self, supplier_id: PartyId) -> Result<Option<SupplierTier>, DomainError> {
        Ok(self.tiers.read().await.get(&supplier_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_caps() {
        assert!(!SupplierTier::Suspended.can_bid());
        assert_eq!(SupplierTier::Basic.max_active_quotes(), Some(3));
        assert_eq!(SupplierTier::Verified.max_active_quotes(), Some(10));
        assert_eq!(SupplierTier::Preferred.max_active_quotes(), None);
    }

    #[tokio::test]
    async fn unknown_supplier_has_no_tier() {
        let directory = InMemorySupplierDirectory::new();
        let supplier = PartyId::new();
        assert_eq!(directory.supplier_tier(supplier).await.unwrap(), None);

        directory.set_tier(supplier, SupplierTier::Verified).await;
        assert_eq!(
            directory.supplier_tier(supplier).await.unwrap(),
            Some(SupplierTier::Verified)
        );
    }
}
