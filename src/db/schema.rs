pub const SCHEMA: &str = r#"
-- Tenants: one row per Telegram chat that owns a posting schedule
CREATE TABLE IF NOT EXISTS chat_settings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    telegram_chat_id INTEGER NOT NULL UNIQUE,
    display_name TEXT,
    media_source_type TEXT,
    media_source_root TEXT,
    posts_per_day INTEGER,
    posting_window_start INTEGER,
    posting_window_end INTEGER,
    is_paused INTEGER NOT NULL DEFAULT 0,
    instagram_enabled INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Media items: every piece of content ever indexed from a provider
CREATE TABLE IF NOT EXISTS media_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL,
    file_name TEXT NOT NULL,
    file_hash TEXT NOT NULL,
    file_size INTEGER NOT NULL DEFAULT 0,
    mime_type TEXT,
    category TEXT,
    source_type TEXT NOT NULL,
    source_identifier TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    times_posted INTEGER NOT NULL DEFAULT 0,
    last_posted_at TEXT,
    tenant_id INTEGER,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT,
    FOREIGN KEY (tenant_id) REFERENCES chat_settings(id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_media_source
    ON media_items(COALESCE(tenant_id, 0), source_type, source_identifier);
CREATE INDEX IF NOT EXISTS idx_media_hash ON media_items(file_hash);
CREATE INDEX IF NOT EXISTS idx_media_active ON media_items(is_active, category);

-- Locks: locked_until NULL means permanent
CREATE TABLE IF NOT EXISTS media_locks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    media_item_id INTEGER NOT NULL,
    locked_until TEXT,
    lock_reason TEXT NOT NULL,
    created_by TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (media_item_id) REFERENCES media_items(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_locks_media ON media_locks(media_item_id);
CREATE INDEX IF NOT EXISTS idx_locks_until ON media_locks(locked_until);

-- Posting queue: unresolved slots only
CREATE TABLE IF NOT EXISTS posting_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    media_item_id INTEGER NOT NULL,
    scheduled_for TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    tenant_id INTEGER,
    telegram_message_id INTEGER,
    -- Set while a process is publishing the item; shared by the CLI and daemon
    claimed_at TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (media_item_id) REFERENCES media_items(id) ON DELETE CASCADE,
    FOREIGN KEY (tenant_id) REFERENCES chat_settings(id)
);

CREATE INDEX IF NOT EXISTS idx_queue_status_time ON posting_queue(status, scheduled_for);
CREATE INDEX IF NOT EXISTS idx_queue_media ON posting_queue(media_item_id);

-- Posting history: append-only record of resolved queue items
CREATE TABLE IF NOT EXISTS posting_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    media_item_id INTEGER NOT NULL,
    queue_item_id INTEGER,
    scheduled_for TEXT,
    posted_at TEXT NOT NULL,
    status TEXT NOT NULL,
    success INTEGER NOT NULL DEFAULT 0,
    posted_by TEXT,
    posting_method TEXT NOT NULL,
    instagram_story_id TEXT,
    tenant_id INTEGER,
    FOREIGN KEY (media_item_id) REFERENCES media_items(id)
);

CREATE INDEX IF NOT EXISTS idx_history_media ON posting_history(media_item_id);

-- Sync run audit
CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_type TEXT NOT NULL,
    source_root TEXT NOT NULL,
    triggered_by TEXT NOT NULL,
    tenant_id INTEGER,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    new_count INTEGER DEFAULT 0,
    updated_count INTEGER DEFAULT 0,
    deactivated_count INTEGER DEFAULT 0,
    reactivated_count INTEGER DEFAULT 0,
    unchanged_count INTEGER DEFAULT 0,
    error_count INTEGER DEFAULT 0,
    status TEXT DEFAULT 'running'  -- 'running', 'completed', 'failed'
);
"#;

/// Additive changes for databases created by earlier versions.
/// Each statement may fail harmlessly when the column already exists.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE chat_settings ADD COLUMN instagram_enabled INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE posting_history ADD COLUMN tenant_id INTEGER",
    "ALTER TABLE posting_queue ADD COLUMN claimed_at TEXT",
];
