//! # Ledger Configuration
//!
//! Behavior flags the ledgers honor. The configuration is an explicit
//! object handed to `Database` at construction - never ambient global
//! state - so tests and multiple shop profiles can run side by side.
//!
//! The environment loader lives in `dukan-db` (the core crate does no I/O).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::TransferService;

/// Shop-level ledger behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// When true, sales and adjustments may drive on-hand quantity negative;
    /// the resulting movement is flagged for reconciliation. Default: off.
    pub allow_backorder: bool,

    /// Whole-shop tax rate in basis points applied at invoice finalization
    /// (1400 = 14%). Zero disables tax.
    pub tax_rate_bps: u32,

    /// Per-service overdraft capability: a service listed with `true` may
    /// cash out beyond its running balance. Services not listed disallow
    /// overdraft.
    pub overdraft: BTreeMap<TransferService, bool>,
}

impl LedgerConfig {
    /// May `service` run a negative balance?
    pub fn overdraft_allowed(&self, service: TransferService) -> bool {
        self.overdraft.get(&service).copied().unwrap_or(false)
    }
}

impl Default for LedgerConfig {
    /// Conservative defaults: no backorder, no overdraft, no tax.
    fn default() -> Self {
        LedgerConfig {
            allow_backorder: false,
            tax_rate_bps: 0,
            overdraft: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_conservative() {
        let config = LedgerConfig::default();
        assert!(!config.allow_backorder);
        assert_eq!(config.tax_rate_bps, 0);
        for service in TransferService::ALL {
            assert!(!config.overdraft_allowed(service));
        }
    }

    #[test]
    fn test_per_service_overdraft() {
        let mut config = LedgerConfig::default();
        config
            .overdraft
            .insert(TransferService::VodafoneCash, true);

        assert!(config.overdraft_allowed(TransferService::VodafoneCash));
        assert!(!config.overdraft_allowed(TransferService::OrangeCash));
    }
}
