use std::time::Duration;

/// Runtime settings for the ledger store and its units of work.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// SQLite database file
    pub database_path: String,
    /// Upper bound on pooled connections
    pub max_connections: u32,
    /// How long a statement waits on a store lock before reporting busy
    pub busy_timeout: Duration,
    /// Bound on one deposit/withdraw/transfer, lock waits and commit included
    pub operation_timeout: Duration,
}

impl LedgerConfig {
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Self::default()
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: "tally.db".to_string(),
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(5),
        }
    }
}
