//! Typed, transactional access to the local store.
//!
//! One SQLite file in WAL mode holds everything the client persists: modules
//! (whole-object JSON blob plus denormalized step rows), derived intent
//! patterns, the command catalog, execution logs, settings and the registry
//! sync state. All multi-row mutations run inside a single transaction; a
//! failed import leaves no partial rows behind.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{CoreError, Result};
use crate::module::{CommandEntry, IntentPattern, LogEntry, LogStatus, Module};
use crate::registry::RegistryModuleMeta;

/// Schema version written to `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 2;

/// Settings seeded on first open.
const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    ("online_mode", "false"),
    ("auto_confirm", "false"),
    ("thresh_keyword", "0.6"),
    ("thresh_llm", "0.6"),
    ("max_history", "1000"),
    ("db_version", "2"),
    ("registry_url", ""),
    ("auto_sync", "false"),
    ("sync_interval", "86400"),
];

pub struct Store {
    conn: Connection,
}

/// Summary row used by the resolver for ranking and tie-breaks.
#[derive(Debug, Clone)]
pub struct ModuleSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// Last registry sync outcome.
#[derive(Debug, Clone)]
pub struct RegistryCache {
    pub last_sync_ts: i64,
    pub last_status: String,
    pub module_count: i64,
}

impl Store {
    /// Opens (creating if needed) the store file and migrates it to the
    /// latest schema. Fails if the file is unreadable or the schema was
    /// written by a future version.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").map_err(storage)?;
        let mut store = Store { conn };
        store.migrate()?;
        Ok(store)
    }

    fn schema_version(&self) -> Result<i64> {
        self.conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(storage)
    }

    fn migrate(&mut self) -> Result<()> {
        let mut version = self.schema_version()?;
        if version > SCHEMA_VERSION {
            return Err(CoreError::Storage(format!(
                "store schema version {} is newer than this client supports ({})",
                version, SCHEMA_VERSION
            )));
        }

        while version < SCHEMA_VERSION {
            let tx = self.conn.transaction().map_err(storage)?;
            match version {
                0 => {
                    tx.execute_batch(
                        "CREATE TABLE modules (
                            id          TEXT PRIMARY KEY,
                            name        TEXT NOT NULL,
                            version     TEXT NOT NULL,
                            description TEXT NOT NULL DEFAULT '',
                            tags        TEXT NOT NULL DEFAULT '[]',
                            provides    TEXT NOT NULL DEFAULT '[]',
                            requires    TEXT NOT NULL DEFAULT '[]',
                            size_kb     INTEGER,
                            author      TEXT,
                            body        TEXT NOT NULL DEFAULT '',
                            installed   INTEGER NOT NULL DEFAULT 0,
                            downloads   INTEGER NOT NULL DEFAULT 0,
                            updated_ts  INTEGER NOT NULL DEFAULT 0
                        );
                        CREATE TABLE steps (
                            module_id TEXT NOT NULL,
                            flow_name TEXT NOT NULL,
                            step_key  TEXT NOT NULL,
                            step_type TEXT NOT NULL,
                            message   TEXT,
                            command   TEXT,
                            run_module TEXT,
                            based_on  TEXT,
                            map_json  TEXT,
                            branch_default TEXT,
                            next_key  TEXT,
                            validate_json TEXT,
                            condition_json TEXT,
                            PRIMARY KEY (module_id, flow_name, step_key)
                        );
                        CREATE TABLE intent_patterns (
                            id        INTEGER PRIMARY KEY AUTOINCREMENT,
                            module_id TEXT NOT NULL,
                            pattern   TEXT NOT NULL,
                            weight    REAL NOT NULL,
                            pattern_type TEXT NOT NULL
                        );
                        CREATE INDEX idx_intent_patterns_pattern
                            ON intent_patterns (pattern);
                        CREATE TABLE dependencies (
                            module_id TEXT NOT NULL,
                            requires_module_id TEXT NOT NULL,
                            PRIMARY KEY (module_id, requires_module_id)
                        );
                        CREATE TABLE logs (
                            id            INTEGER PRIMARY KEY AUTOINCREMENT,
                            ts            TEXT NOT NULL,
                            session_id    TEXT NOT NULL,
                            resolved_module TEXT NOT NULL,
                            confidence    REAL NOT NULL DEFAULT 0,
                            method        TEXT NOT NULL DEFAULT '',
                            status        TEXT NOT NULL,
                            error_message TEXT,
                            duration_ms   INTEGER
                        );
                        CREATE INDEX idx_logs_ts ON logs (ts DESC);
                        CREATE TABLE settings (
                            key   TEXT PRIMARY KEY,
                            value TEXT NOT NULL
                        );
                        CREATE TABLE registry_cache (
                            id           INTEGER PRIMARY KEY CHECK (id = 1),
                            last_sync_ts INTEGER NOT NULL,
                            last_status  TEXT NOT NULL,
                            module_count INTEGER NOT NULL
                        );
                        CREATE TABLE state (
                            key   TEXT PRIMARY KEY,
                            value TEXT NOT NULL
                        );",
                    )
                    .map_err(storage)?;
                }
                1 => {
                    tx.execute_batch(
                        "CREATE TABLE commands (
                            name        TEXT PRIMARY KEY,
                            description TEXT NOT NULL DEFAULT '',
                            has_man     INTEGER NOT NULL DEFAULT 0,
                            category    TEXT,
                            keywords    TEXT NOT NULL DEFAULT '[]',
                            installed   INTEGER NOT NULL DEFAULT 1
                        );",
                    )
                    .map_err(storage)?;
                }
                v => {
                    return Err(CoreError::Storage(format!(
                        "no migration defined from schema version {}",
                        v
                    )));
                }
            }
            version += 1;
            tx.pragma_update(None, "user_version", version).map_err(storage)?;
            tx.commit().map_err(storage)?;
        }

        self.seed_default_settings()
    }

    fn seed_default_settings(&self) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)")
            .map_err(storage)?;
        for (key, value) in DEFAULT_SETTINGS {
            stmt.execute(params![key, value]).map_err(storage)?;
        }
        Ok(())
    }

    // --- Settings ---

    pub fn setting_str(&self, key: &str) -> Result<String> {
        self.conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?
            .ok_or_else(|| CoreError::NotFound(format!("setting '{}'", key)))
    }

    pub fn setting_bool(&self, key: &str) -> Result<bool> {
        Ok(matches!(self.setting_str(key)?.as_str(), "true" | "1"))
    }

    pub fn setting_f64(&self, key: &str) -> Result<f64> {
        let raw = self.setting_str(key)?;
        raw.parse::<f64>()
            .map_err(|_| CoreError::Storage(format!("setting '{}' is not a number: {}", key, raw)))
    }

    pub fn setting_i64(&self, key: &str) -> Result<i64> {
        let raw = self.setting_str(key)?;
        raw.parse::<i64>()
            .map_err(|_| CoreError::Storage(format!("setting '{}' is not an integer: {}", key, raw)))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(storage)?;
        Ok(())
    }

    // --- Modules ---

    /// Upserts a validated module and all of its derived rows in one
    /// transaction. Existing steps, patterns and dependencies for the id are
    /// replaced wholesale so the denormalized copies can never drift from
    /// the body blob.
    pub fn import_module(&mut self, module: &Module, patterns: &[IntentPattern]) -> Result<()> {
        let body = serde_json::to_string(module)?;
        let tags = serde_json::to_string(&module.tags)?;
        let provides = serde_json::to_string(&module.provides)?;
        let requires = serde_json::to_string(&module.requires)?;

        let tx = self.conn.transaction().map_err(storage)?;

        tx.execute(
            "INSERT INTO modules
                (id, name, version, description, tags, provides, requires,
                 size_kb, author, body, installed, updated_ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11)
             ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                version = excluded.version,
                description = excluded.description,
                tags = excluded.tags,
                provides = excluded.provides,
                requires = excluded.requires,
                size_kb = excluded.size_kb,
                author = excluded.author,
                body = excluded.body,
                installed = 1,
                updated_ts = excluded.updated_ts",
            params![
                module.id,
                module.name,
                module.version,
                module.description,
                tags,
                provides,
                requires,
                module.size_kb,
                module.author,
                body,
                chrono::Utc::now().timestamp(),
            ],
        )
        .map_err(storage)?;

        tx.execute("DELETE FROM steps WHERE module_id = ?1", params![module.id])
            .map_err(storage)?;
        tx.execute(
            "DELETE FROM intent_patterns WHERE module_id = ?1",
            params![module.id],
        )
        .map_err(storage)?;
        tx.execute(
            "DELETE FROM dependencies WHERE module_id = ?1",
            params![module.id],
        )
        .map_err(storage)?;

        {
            let mut step_stmt = tx
                .prepare(
                    "INSERT INTO steps
                        (module_id, flow_name, step_key, step_type, message,
                         command, run_module, based_on, map_json,
                         branch_default, next_key, validate_json, condition_json)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                )
                .map_err(storage)?;
            for (flow_name, flow) in &module.flows {
                for (step_key, step) in &flow.steps {
                    let map_json = match &step.map {
                        Some(map) => Some(serde_json::to_string(map)?),
                        None => None,
                    };
                    let validate_json = match &step.validate {
                        Some(v) => Some(serde_json::to_string(v)?),
                        None => None,
                    };
                    let condition_json = match &step.condition {
                        Some(c) => Some(serde_json::to_string(c)?),
                        None => None,
                    };
                    step_stmt
                        .execute(params![
                            module.id,
                            flow_name,
                            step_key,
                            step.step_type.as_str(),
                            step.message,
                            step.command,
                            step.run_module,
                            step.based_on,
                            map_json,
                            step.default,
                            step.next,
                            validate_json,
                            condition_json,
                        ])
                        .map_err(storage)?;
                }
            }

            let mut pattern_stmt = tx
                .prepare(
                    "INSERT INTO intent_patterns (module_id, pattern, weight, pattern_type)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(storage)?;
            for p in patterns {
                pattern_stmt
                    .execute(params![
                        p.module_id,
                        p.pattern,
                        p.weight,
                        p.pattern_type.as_str()
                    ])
                    .map_err(storage)?;
            }

            let mut dep_stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO dependencies (module_id, requires_module_id)
                     VALUES (?1, ?2)",
                )
                .map_err(storage)?;
            for req in &module.requires {
                dep_stmt.execute(params![module.id, req]).map_err(storage)?;
            }
        }

        tx.commit().map_err(storage)?;
        Ok(())
    }

    /// Rehydrates an installed module from its body blob.
    pub fn get_module(&self, id: &str) -> Result<Module> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM modules WHERE id = ?1 AND installed = 1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        match body {
            Some(body) => {
                let mut module: Module = serde_json::from_str(&body)?;
                populate_step_keys(&mut module);
                Ok(module)
            }
            None => Err(CoreError::NotFound(format!("module '{}'", id))),
        }
    }

    /// All installed modules, ordered by id.
    pub fn list_modules(&self) -> Result<Vec<Module>> {
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM modules WHERE installed = 1 ORDER BY id")
            .map_err(storage)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(storage)?;
        let mut modules = Vec::new();
        for body in rows {
            let mut module: Module = serde_json::from_str(&body.map_err(storage)?)?;
            populate_step_keys(&mut module);
            modules.push(module);
        }
        Ok(modules)
    }

    /// Installed module summaries for ranking.
    pub fn module_summaries(&self) -> Result<Vec<ModuleSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, description, tags FROM modules
                 WHERE installed = 1 ORDER BY id",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(storage)?;
        let mut summaries = Vec::new();
        for row in rows {
            let (id, name, description, tags_json) = row.map_err(storage)?;
            let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
            summaries.push(ModuleSummary {
                id,
                name,
                description,
                tags,
            });
        }
        Ok(summaries)
    }

    /// Number of steps across a module's flows, answered from the
    /// denormalized step rows without rehydrating the body blob.
    pub fn step_count(&self, id: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM steps WHERE module_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map_err(storage)
    }

    pub fn module_installed(&self, id: &str) -> Result<bool> {
        let installed: Option<i64> = self
            .conn
            .query_row(
                "SELECT installed FROM modules WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        Ok(installed == Some(1))
    }

    /// Tombstones a module and removes its derived rows.
    pub fn remove_module(&mut self, id: &str) -> Result<()> {
        let tx = self.conn.transaction().map_err(storage)?;
        let changed = tx
            .execute(
                "UPDATE modules SET installed = 0 WHERE id = ?1 AND installed = 1",
                params![id],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(CoreError::NotFound(format!("module '{}'", id)));
        }
        tx.execute("DELETE FROM steps WHERE module_id = ?1", params![id])
            .map_err(storage)?;
        tx.execute("DELETE FROM intent_patterns WHERE module_id = ?1", params![id])
            .map_err(storage)?;
        tx.execute("DELETE FROM dependencies WHERE module_id = ?1", params![id])
            .map_err(storage)?;
        tx.commit().map_err(storage)?;
        Ok(())
    }

    // --- Intent patterns ---

    /// Sum of matched pattern weights per module for the given tokens.
    pub fn match_patterns(&self, tokens: &[String]) -> Result<HashMap<String, f64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT module_id, weight FROM intent_patterns WHERE pattern = ?1")
            .map_err(storage)?;
        let mut scores: HashMap<String, f64> = HashMap::new();
        for token in tokens {
            let rows = stmt
                .query_map(params![token], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                })
                .map_err(storage)?;
            for row in rows {
                let (module_id, weight) = row.map_err(storage)?;
                *scores.entry(module_id).or_insert(0.0) += weight;
            }
        }
        Ok(scores)
    }

    /// All `(module_id, requires_module_id)` edges currently stored.
    pub fn dependency_edges(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT module_id, requires_module_id FROM dependencies")
            .map_err(storage)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(storage)?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row.map_err(storage)?);
        }
        Ok(edges)
    }

    // --- Registry sync ---

    /// Caches registry metadata without touching installed rows. Installed
    /// modules keep their local name, description and body (S5 semantics);
    /// unknown modules are inserted as cached-not-installed.
    pub fn upsert_cached_modules(&mut self, metas: &[RegistryModuleMeta]) -> Result<usize> {
        let tx = self.conn.transaction().map_err(storage)?;
        let mut count = 0usize;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO modules
                        (id, name, version, description, tags, downloads,
                         author, installed, updated_ts)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)
                     ON CONFLICT (id) DO UPDATE SET
                        name = excluded.name,
                        version = excluded.version,
                        description = excluded.description,
                        tags = excluded.tags,
                        downloads = excluded.downloads,
                        author = excluded.author,
                        updated_ts = excluded.updated_ts
                     WHERE modules.installed = 0",
                )
                .map_err(storage)?;
            for meta in metas {
                let tags = serde_json::to_string(&meta.tags)?;
                stmt.execute(params![
                    meta.id,
                    meta.name,
                    meta.version,
                    meta.description,
                    tags,
                    meta.downloads,
                    meta.author,
                    chrono::Utc::now().timestamp(),
                ])
                .map_err(storage)?;
                count += 1;
            }
        }
        tx.commit().map_err(storage)?;
        Ok(count)
    }

    pub fn set_registry_cache(&self, status: &str, module_count: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO registry_cache (id, last_sync_ts, last_status, module_count)
                 VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT (id) DO UPDATE SET
                    last_sync_ts = excluded.last_sync_ts,
                    last_status = excluded.last_status,
                    module_count = excluded.module_count",
                params![chrono::Utc::now().timestamp(), status, module_count],
            )
            .map_err(storage)?;
        Ok(())
    }

    pub fn registry_cache(&self) -> Result<Option<RegistryCache>> {
        self.conn
            .query_row(
                "SELECT last_sync_ts, last_status, module_count FROM registry_cache WHERE id = 1",
                [],
                |row| {
                    Ok(RegistryCache {
                        last_sync_ts: row.get(0)?,
                        last_status: row.get(1)?,
                        module_count: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(storage)
    }

    // --- Command catalog rows ---

    pub fn upsert_command(&self, entry: &CommandEntry) -> Result<()> {
        let keywords = serde_json::to_string(&entry.keywords)?;
        self.conn
            .execute(
                "INSERT INTO commands (name, description, has_man, category, keywords, installed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (name) DO UPDATE SET
                    description = excluded.description,
                    has_man = excluded.has_man,
                    category = COALESCE(excluded.category, commands.category),
                    keywords = excluded.keywords,
                    installed = MAX(commands.installed, excluded.installed)",
                params![
                    entry.name,
                    entry.description,
                    entry.has_man as i64,
                    entry.category,
                    keywords,
                    entry.installed as i64,
                ],
            )
            .map_err(storage)?;
        Ok(())
    }

    pub fn get_command(&self, name: &str) -> Result<CommandEntry> {
        self.conn
            .query_row(
                "SELECT name, description, has_man, category, keywords, installed
                 FROM commands WHERE name = ?1",
                params![name],
                command_from_row,
            )
            .optional()
            .map_err(storage)?
            .ok_or_else(|| CoreError::NotFound(format!("command '{}'", name)))
    }

    pub fn all_commands(&self) -> Result<Vec<CommandEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name, description, has_man, category, keywords, installed
                 FROM commands ORDER BY name",
            )
            .map_err(storage)?;
        let rows = stmt.query_map([], command_from_row).map_err(storage)?;
        let mut commands = Vec::new();
        for row in rows {
            commands.push(row.map_err(storage)?);
        }
        Ok(commands)
    }

    // --- Execution logs ---

    pub fn log_start(
        &self,
        session_id: &str,
        resolved_module: &str,
        confidence: f64,
        method: &str,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO logs (ts, session_id, resolved_module, confidence, method, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    chrono::Utc::now().to_rfc3339(),
                    session_id,
                    resolved_module,
                    confidence,
                    method,
                    LogStatus::Started.as_str(),
                ],
            )
            .map_err(storage)?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn log_finish(
        &self,
        log_id: i64,
        status: LogStatus,
        error_message: Option<&str>,
        duration_ms: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE logs SET status = ?1, error_message = ?2, duration_ms = ?3
                 WHERE id = ?4",
                params![status.as_str(), error_message, duration_ms, log_id],
            )
            .map_err(storage)?;
        self.prune_logs()
    }

    fn prune_logs(&self) -> Result<()> {
        let max_history = self.setting_i64("max_history").unwrap_or(1000);
        self.conn
            .execute(
                "DELETE FROM logs WHERE id NOT IN
                    (SELECT id FROM logs ORDER BY ts DESC, id DESC LIMIT ?1)",
                params![max_history],
            )
            .map_err(storage)?;
        Ok(())
    }

    pub fn recent_logs(&self, limit: i64) -> Result<Vec<LogEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, ts, session_id, resolved_module, confidence, method,
                        status, error_message, duration_ms
                 FROM logs ORDER BY ts DESC, id DESC LIMIT ?1",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(LogEntry {
                    id: row.get(0)?,
                    ts: row.get(1)?,
                    session_id: row.get(2)?,
                    resolved_module: row.get(3)?,
                    confidence: row.get(4)?,
                    method: row.get(5)?,
                    status: row.get(6)?,
                    error_message: row.get(7)?,
                    duration_ms: row.get(8)?,
                })
            })
            .map_err(storage)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(storage)?);
        }
        Ok(entries)
    }

    pub fn log_entry(&self, log_id: i64) -> Result<LogEntry> {
        self.conn
            .query_row(
                "SELECT id, ts, session_id, resolved_module, confidence, method,
                        status, error_message, duration_ms
                 FROM logs WHERE id = ?1",
                params![log_id],
                |row| {
                    Ok(LogEntry {
                        id: row.get(0)?,
                        ts: row.get(1)?,
                        session_id: row.get(2)?,
                        resolved_module: row.get(3)?,
                        confidence: row.get(4)?,
                        method: row.get(5)?,
                        status: row.get(6)?,
                        error_message: row.get(7)?,
                        duration_ms: row.get(8)?,
                    })
                },
            )
            .optional()
            .map_err(storage)?
            .ok_or_else(|| CoreError::NotFound(format!("log entry {}", log_id)))
    }

    // --- Runtime key-value state ---

    pub fn state_get(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)
    }

    /// Every persisted state pair; seeds a run's initial state.
    pub fn state_all(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM state")
            .map_err(storage)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(storage)?;
        let mut state = HashMap::new();
        for row in rows {
            let (key, value) = row.map_err(storage)?;
            state.insert(key, value);
        }
        Ok(state)
    }

    pub fn state_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO state (key, value) VALUES (?1, ?2)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(storage)?;
        Ok(())
    }
}

fn command_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommandEntry> {
    let keywords_json: String = row.get(4)?;
    Ok(CommandEntry {
        name: row.get(0)?,
        description: row.get(1)?,
        has_man: row.get::<_, i64>(2)? != 0,
        category: row.get(3)?,
        keywords: serde_json::from_str(&keywords_json).unwrap_or_default(),
        installed: row.get::<_, i64>(5)? != 0,
    })
}

/// `Flow::steps` keys are authoritative; copy them into each step after
/// rehydration so downstream code can pass steps around by value.
pub(crate) fn populate_step_keys(module: &mut Module) {
    for flow in module.flows.values_mut() {
        for (key, step) in flow.steps.iter_mut() {
            step.key = key.clone();
        }
    }
}

fn storage(e: rusqlite::Error) -> CoreError {
    CoreError::Storage(e.to_string())
}
