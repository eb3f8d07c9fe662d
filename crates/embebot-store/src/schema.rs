/// SQL DDL for the embebot store.
/// Every gateway-owned table is keyed by the actor's instance key so that
/// independent actors can share one database file.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS gateway_state (
    instance TEXT PRIMARY KEY,
    session_id TEXT,
    sequence INTEGER,
    resume_url TEXT,
    heartbeat_interval_ms INTEGER,
    last_heartbeat_acked INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS retry_tasks (
    instance TEXT NOT NULL,
    target_id TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (instance, target_id)
);

CREATE TABLE IF NOT EXISTS wakes (
    instance TEXT NOT NULL,
    purpose TEXT NOT NULL,
    due_at_ms INTEGER NOT NULL,
    PRIMARY KEY (instance, purpose)
);

CREATE TABLE IF NOT EXISTS service_settings (
    guild_id TEXT NOT NULL,
    service TEXT NOT NULL,
    disabled INTEGER NOT NULL DEFAULT 0,
    endpoint TEXT,
    PRIMARY KEY (guild_id, service)
);

CREATE TABLE IF NOT EXISTS custom_domains (
    guild_id TEXT NOT NULL,
    match_domain TEXT NOT NULL,
    replace_domain TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (guild_id, match_domain)
);

CREATE INDEX IF NOT EXISTS idx_retry_tasks_created ON retry_tasks(instance, created_at);
CREATE INDEX IF NOT EXISTS idx_wakes_due ON wakes(instance, due_at_ms);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = FULL;
"#;
