//! SQL migration steps, one constant per schema version.
//!
//! Each step is idempotent (`IF NOT EXISTS` guards on creation) and
//! forward-only; rollback means restoring a backup.

/// v1: initial ledger schema.
pub const MIGRATION_V1: &str = r#"
-- ============================================================
-- Contribution queue
-- ============================================================

CREATE TABLE IF NOT EXISTS contribution_queue (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    total_amount INTEGER NOT NULL,
    partial INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS contribution_queue_publishers (
    queue_id TEXT NOT NULL REFERENCES contribution_queue(id) ON DELETE CASCADE,
    publisher_key TEXT NOT NULL,
    weight REAL NOT NULL,
    ord INTEGER NOT NULL,
    PRIMARY KEY (queue_id, publisher_key)
);

-- ============================================================
-- Settlement records
-- ============================================================

CREATE TABLE IF NOT EXISTS contributions (
    id TEXT PRIMARY KEY,
    queue_entry_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    total_amount INTEGER NOT NULL,
    step TEXT NOT NULL,
    retry_level INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    completed_at INTEGER
);

CREATE TABLE IF NOT EXISTS contribution_publishers (
    contribution_id TEXT NOT NULL REFERENCES contributions(id) ON DELETE CASCADE,
    publisher_key TEXT NOT NULL,
    amount INTEGER NOT NULL,
    PRIMARY KEY (contribution_id, publisher_key)
);

-- ============================================================
-- Credentials
-- ============================================================

CREATE TABLE IF NOT EXISTS creds_batches (
    batch_id TEXT PRIMARY KEY,
    trigger_id TEXT NOT NULL,
    trigger_type TEXT NOT NULL,
    status TEXT NOT NULL,
    creds TEXT NOT NULL DEFAULT '[]',
    blinded_tokens TEXT NOT NULL,
    signed_tokens TEXT NOT NULL DEFAULT '[]',
    public_key TEXT NOT NULL DEFAULT '',
    claim_id TEXT NOT NULL DEFAULT '',
    UNIQUE (trigger_id, trigger_type)
);

CREATE TABLE IF NOT EXISTS unblinded_tokens (
    token_id INTEGER PRIMARY KEY AUTOINCREMENT,
    value INTEGER NOT NULL,
    public_key TEXT NOT NULL,
    batch_id TEXT NOT NULL,
    token_value TEXT NOT NULL,
    expires_at INTEGER
);

-- ============================================================
-- Promotions
-- ============================================================

CREATE TABLE IF NOT EXISTS promotions (
    promotion_id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    approximate_value INTEGER NOT NULL,
    suggested_count INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    claim_id TEXT NOT NULL DEFAULT ''
);

-- ============================================================
-- Publisher verification cache
-- ============================================================

CREATE TABLE IF NOT EXISTS server_publisher_info (
    publisher_key TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

/// v2: token spend-state tracking for reserve/commit-or-release redemption.
pub const MIGRATION_V2: &str = r#"
ALTER TABLE unblinded_tokens ADD COLUMN state TEXT NOT NULL DEFAULT 'spendable';
ALTER TABLE unblinded_tokens ADD COLUMN redeem_id TEXT;

CREATE INDEX IF NOT EXISTS idx_tokens_state ON unblinded_tokens(state);
CREATE INDEX IF NOT EXISTS idx_tokens_redeem ON unblinded_tokens(redeem_id);
"#;

/// v3: held-back shares for unverified publishers, balance reports.
pub const MIGRATION_V3: &str = r#"
CREATE TABLE IF NOT EXISTS pending_contributions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    publisher_key TEXT NOT NULL,
    amount INTEGER NOT NULL,
    kind TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_publisher ON pending_contributions(publisher_key);

CREATE TABLE IF NOT EXISTS balance_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    amount INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
"#;

/// v4: persisted failure reason, so a settlement interrupted between the
/// terminal write and queue cleanup still reports why it failed.
pub const MIGRATION_V4: &str = r#"
ALTER TABLE contributions ADD COLUMN failure_reason TEXT;
"#;
