//! SQLite journal of committed transactions and the events they emitted.
//!
//! The ledger itself lives in memory; on start-up the journal is replayed
//! through a freshly deployed ledger to restore its state. The deployment
//! the journal was recorded under is stored with it, since addresses and
//! wallet-binding signatures depend on it.

use agent_registry::{Ledger, LoggedEvent, Receipt, RegistryConfig, Transaction};
use rusqlite::{OptionalExtension, Result as SqliteResult};
use std::sync::{Mutex, MutexGuard};

pub struct Db {
    conn: Mutex<rusqlite::Connection>,
}

impl Db {
    pub fn open(path: &str) -> SqliteResult<Self> {
        let conn = if path == ":memory:" {
            rusqlite::Connection::open_in_memory()?
        } else {
            rusqlite::Connection::open(path)?
        };
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>, String> {
        self.conn
            .lock()
            .map_err(|_| "Database lock poisoned".to_string())
    }

    /// Deployment the journal belongs to.
    ///
    /// The first call stores `requested`. Later calls return the stored
    /// config, so a changed environment cannot move the registries out from
    /// under journaled transactions.
    pub fn pin_deployment(&self, requested: RegistryConfig) -> Result<RegistryConfig, String> {
        let conn = self.conn()?;
        let stored: Option<String> = conn
            .query_row("SELECT config FROM deployment WHERE id = 1", [], |r| r.get(0))
            .optional()
            .map_err(|e| format!("Failed to read deployment: {}", e))?;

        match stored {
            Some(json) => {
                let stored: RegistryConfig = serde_json::from_str(&json)
                    .map_err(|e| format!("Corrupt deployment record: {}", e))?;
                if stored != requested {
                    log::warn!(
                        "Config differs from journaled deployment; using chain {} deployer {:?}",
                        stored.chain_id,
                        stored.deployer
                    );
                }
                Ok(stored)
            }
            None => {
                let json = serde_json::to_string(&requested)
                    .map_err(|e| format!("Failed to serialize deployment: {}", e))?;
                conn.execute(
                    "INSERT INTO deployment (id, config) VALUES (1, ?1)",
                    rusqlite::params![json],
                )
                .map_err(|e| format!("Failed to store deployment: {}", e))?;
                Ok(requested)
            }
        }
    }

    /// Record a committed transaction together with its events
    pub fn journal(&self, tx: &Transaction, receipt: &Receipt) -> Result<(), String> {
        let mut conn = self.conn()?;
        let db_tx = conn
            .transaction()
            .map_err(|e| format!("Failed to begin journal write: {}", e))?;

        let payload = serde_json::to_string(tx)
            .map_err(|e| format!("Failed to serialize transaction: {}", e))?;
        let method = serde_json::to_value(&tx.call)
            .ok()
            .and_then(|v| v.get("method").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or_default();

        db_tx
            .execute(
                "INSERT INTO transactions
                    (tx_index, from_address, registry, method, payload, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    receipt.tx_index as i64,
                    format!("{:?}", tx.from),
                    receipt.registry.to_string(),
                    method,
                    payload,
                    tx.timestamp as i64,
                ],
            )
            .map_err(|e| format!("Failed to journal transaction: {}", e))?;

        for logged in &receipt.events {
            let event_json = serde_json::to_string(logged)
                .map_err(|e| format!("Failed to serialize event: {}", e))?;
            db_tx
                .execute(
                    "INSERT INTO events
                        (sequence, tx_index, registry, emitter, name, agent_id, payload, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        logged.sequence as i64,
                        logged.tx_index as i64,
                        logged.registry.to_string(),
                        format!("{:?}", logged.emitter),
                        logged.event.name(),
                        logged.event.agent_id().map(|id| id as i64),
                        event_json,
                        logged.timestamp as i64,
                    ],
                )
                .map_err(|e| format!("Failed to journal event: {}", e))?;
        }

        db_tx
            .commit()
            .map_err(|e| format!("Failed to commit journal write: {}", e))
    }

    /// Journaled transactions in commit order
    pub fn load_transactions(&self) -> Result<Vec<(u64, Transaction)>, String> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT tx_index, payload FROM transactions ORDER BY tx_index ASC")
            .map_err(|e| format!("Failed to prepare query: {}", e))?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| format!("Failed to query: {}", e))?;

        let mut transactions = Vec::new();
        for row in rows {
            let (tx_index, payload) = row.map_err(|e| format!("Failed to read row: {}", e))?;
            let tx: Transaction = serde_json::from_str(&payload)
                .map_err(|e| format!("Corrupt journal entry {}: {}", tx_index, e))?;
            transactions.push((tx_index as u64, tx));
        }
        Ok(transactions)
    }

    /// Re-execute the journal against `ledger`, returning how many transactions were applied
    pub fn replay_into(&self, ledger: &Ledger) -> Result<usize, String> {
        let transactions = self.load_transactions()?;
        for (tx_index, tx) in &transactions {
            let receipt = ledger
                .execute(tx)
                .map_err(|e| format!("Journal entry {} failed to replay: {}", tx_index, e))?;
            if receipt.tx_index != *tx_index {
                log::warn!(
                    "Journal entry {} replayed as transaction {}",
                    tx_index,
                    receipt.tx_index
                );
            }
        }
        Ok(transactions.len())
    }

    pub fn count_transactions(&self) -> Result<i64, String> {
        let conn = self.conn()?;
        conn.query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))
            .map_err(|e| format!("Failed to count transactions: {}", e))
    }

    pub fn events_for_agent(&self, agent_id: u64) -> Result<Vec<LoggedEvent>, String> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT payload FROM events WHERE agent_id = ?1 ORDER BY sequence ASC")
            .map_err(|e| format!("Failed to prepare query: {}", e))?;

        let rows = stmt
            .query_map(rusqlite::params![agent_id as i64], |row| row.get::<_, String>(0))
            .map_err(|e| format!("Failed to query: {}", e))?;

        let mut events = Vec::new();
        for row in rows {
            let payload = row.map_err(|e| format!("Failed to read row: {}", e))?;
            let event: LoggedEvent = serde_json::from_str(&payload)
                .map_err(|e| format!("Corrupt event for agent {}: {}", agent_id, e))?;
            events.push(event);
        }
        Ok(events)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), String> {
        self.conn()?
            .execute_batch(sql)
            .map_err(|e| format!("Failed to execute batch: {}", e))
    }
}

fn create_tables(conn: &rusqlite::Connection) -> SqliteResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS deployment (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            config TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            tx_index INTEGER PRIMARY KEY,
            from_address TEXT NOT NULL,
            registry TEXT NOT NULL,
            method TEXT NOT NULL,
            payload TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            committed_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            sequence INTEGER PRIMARY KEY,
            tx_index INTEGER NOT NULL REFERENCES transactions(tx_index),
            registry TEXT NOT NULL,
            emitter TEXT NOT NULL,
            name TEXT NOT NULL,
            agent_id INTEGER,
            payload TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_agent ON events(agent_id)",
        [],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_registry::{Address, AgentWalletSet, Call, WalletSigner};

    // Hardhat's default account 1
    const WALLET_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    fn deployer() -> Address {
        Address::from_low_u64_be(0xde)
    }

    fn ledger() -> Ledger {
        Ledger::deploy(RegistryConfig::local(), deployer()).unwrap()
    }

    fn register(owner: u64, uri: &str) -> Transaction {
        Transaction {
            from: Address::from_low_u64_be(owner),
            timestamp: 1_700_000_000 + owner,
            call: Call::Register {
                token_uri: uri.to_string(),
                metadata: vec![],
            },
        }
    }

    fn execute_and_journal(ledger: &Ledger, db: &Db, tx: &Transaction) -> Receipt {
        let receipt = ledger.execute(tx).unwrap();
        db.journal(tx, &receipt).unwrap();
        receipt
    }

    #[test]
    fn test_journal_and_load() {
        let db = Db::open(":memory:").unwrap();
        let ledger = ledger();
        execute_and_journal(&ledger, &db, &register(1, "ipfs://a"));
        execute_and_journal(&ledger, &db, &register(2, "ipfs://b"));

        let loaded = db.load_transactions().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].0, 1);
        assert_eq!(loaded[1].1, register(2, "ipfs://b"));
        assert_eq!(db.count_transactions().unwrap(), 2);
    }

    #[test]
    fn test_events_indexed_by_agent() {
        let db = Db::open(":memory:").unwrap();
        let ledger = ledger();
        execute_and_journal(&ledger, &db, &register(1, "ipfs://a"));
        execute_and_journal(&ledger, &db, &register(2, "ipfs://b"));

        let events = db.events_for_agent(1).unwrap();
        assert!(!events.is_empty());
        assert!(events.iter().all(|e| e.event.agent_id() == Some(1)));
        assert!(events.iter().any(|e| e.event.name() == "Registered"));
        assert!(db.events_for_agent(9).unwrap().is_empty());
    }

    #[test]
    fn test_replay_restores_state_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");
        let path = path.to_str().unwrap();

        {
            let db = Db::open(path).unwrap();
            let ledger = ledger();
            execute_and_journal(&ledger, &db, &register(1, "ipfs://a"));
            execute_and_journal(&ledger, &db, &register(2, "ipfs://b"));
            execute_and_journal(
                &ledger,
                &db,
                &Transaction {
                    from: Address::from_low_u64_be(1),
                    timestamp: 1_700_000_100,
                    call: Call::SetAgentUri {
                        agent_id: 0,
                        new_uri: "ipfs://a2".to_string(),
                    },
                },
            );
        }

        let db = Db::open(path).unwrap();
        let restored = ledger();
        assert_eq!(db.replay_into(&restored).unwrap(), 3);
        assert_eq!(restored.tx_count(), 3);
        assert_eq!(restored.identity(|r| r.total_supply()).unwrap(), 2);
        assert_eq!(restored.identity(|r| r.token_uri(0)).unwrap().unwrap(), "ipfs://a2");
        assert_eq!(
            restored.identity(|r| r.owner_of(1)).unwrap().unwrap(),
            Address::from_low_u64_be(2)
        );
    }

    #[test]
    fn test_replay_of_empty_journal() {
        let db = Db::open(":memory:").unwrap();
        assert_eq!(db.replay_into(&ledger()).unwrap(), 0);
    }

    fn bind_wallet(ledger: &Ledger, owner: u64, agent_id: u64) -> Transaction {
        let signer = WalletSigner::new(WALLET_KEY).unwrap();
        let timestamp = 1_700_000_050;
        let message = AgentWalletSet {
            agent_id,
            new_wallet: signer.address(),
            owner: Address::from_low_u64_be(owner),
            deadline: timestamp + 60,
        };
        let domain = ledger.identity(|r| r.domain().clone()).unwrap();
        Transaction {
            from: message.owner,
            timestamp,
            call: Call::SetAgentWallet {
                agent_id,
                new_wallet: message.new_wallet,
                deadline: message.deadline,
                signature: signer.sign_agent_wallet_set(&domain, &message).unwrap(),
            },
        }
    }

    #[test]
    fn test_deployment_pinned_on_first_open() {
        let db = Db::open(":memory:").unwrap();
        let first = RegistryConfig::local().with_deployer(deployer());
        assert_eq!(db.pin_deployment(first.clone()).unwrap(), first);

        let mut changed =
            RegistryConfig::base_sepolia().with_deployer(Address::from_low_u64_be(0xdf));
        changed.deadline_window_secs = 30;
        assert_eq!(db.pin_deployment(changed).unwrap(), first);
    }

    #[test]
    fn test_replay_survives_config_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");
        let path = path.to_str().unwrap();
        let wallet = WalletSigner::new(WALLET_KEY).unwrap().address();

        {
            let db = Db::open(path).unwrap();
            let config = db
                .pin_deployment(RegistryConfig::local().with_deployer(deployer()))
                .unwrap();
            let ledger = Ledger::deploy(config, deployer()).unwrap();
            execute_and_journal(&ledger, &db, &register(1, "ipfs://a"));
            let bind = bind_wallet(&ledger, 1, 0);
            execute_and_journal(&ledger, &db, &bind);
        }

        // a different deployer and window in the environment
        let mut requested = RegistryConfig::local().with_deployer(Address::from_low_u64_be(0xdf));
        requested.deadline_window_secs = 10;

        let db = Db::open(path).unwrap();
        let config = db.pin_deployment(requested).unwrap();
        assert_eq!(config.deployer, deployer());
        let restored = Ledger::deploy(config.clone(), config.deployer).unwrap();
        assert_eq!(db.replay_into(&restored).unwrap(), 2);
        assert_eq!(restored.identity(|r| r.get_agent_wallet(0)).unwrap(), wallet);
    }

    #[test]
    fn test_corrupt_event_payload_is_reported() {
        let db = Db::open(":memory:").unwrap();
        let ledger = ledger();
        execute_and_journal(&ledger, &db, &register(1, "ipfs://a"));
        db.execute_batch("UPDATE events SET payload = 'not json' WHERE agent_id = 0")
            .unwrap();

        let err = db.events_for_agent(0).unwrap_err();
        assert!(err.contains("Corrupt event for agent 0"), "{}", err);
    }
}
