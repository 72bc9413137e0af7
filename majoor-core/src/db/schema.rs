//! Schema creation and migration for the asset index.
//!
//! The FTS table is a plain FTS5 index keyed by asset rowid; triggers keep it
//! in sync with `assets` and `asset_metadata` so the search engine never has
//! to write it directly.

pub const SCHEMA_VERSION: i64 = 1;

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS assets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filepath TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    subfolder TEXT NOT NULL DEFAULT '',
    source TEXT NOT NULL DEFAULT 'output',
    root_id TEXT,
    kind TEXT NOT NULL,
    ext TEXT NOT NULL,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    mtime INTEGER NOT NULL DEFAULT 0,
    width INTEGER,
    height INTEGER,
    duration REAL,
    created_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0,
    indexed_at INTEGER NOT NULL DEFAULT 0,
    content_hash TEXT,
    perceptual_hash TEXT,
    hash_state TEXT NOT NULL DEFAULT 'none'
);

CREATE INDEX IF NOT EXISTS idx_assets_mtime ON assets(mtime DESC);
CREATE INDEX IF NOT EXISTS idx_assets_subfolder ON assets(subfolder);
CREATE INDEX IF NOT EXISTS idx_assets_source_root ON assets(source, root_id);
CREATE INDEX IF NOT EXISTS idx_assets_content_hash ON assets(content_hash)
    WHERE content_hash IS NOT NULL;

CREATE TABLE IF NOT EXISTS asset_metadata (
    asset_id INTEGER PRIMARY KEY REFERENCES assets(id) ON DELETE CASCADE,
    rating INTEGER NOT NULL DEFAULT 0 CHECK (rating BETWEEN 0 AND 5),
    tags TEXT NOT NULL DEFAULT '[]',
    tags_text TEXT NOT NULL DEFAULT '',
    workflow_hash TEXT,
    workflow_type TEXT,
    has_workflow INTEGER NOT NULL DEFAULT 0,
    has_generation_data INTEGER NOT NULL DEFAULT 0,
    quality TEXT NOT NULL DEFAULT 'none',
    raw TEXT,
    updated_at INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS scan_journal (
    filepath TEXT PRIMARY KEY,
    dir_path TEXT NOT NULL,
    state_hash TEXT NOT NULL,
    mtime INTEGER NOT NULL DEFAULT 0,
    size INTEGER NOT NULL DEFAULT 0,
    last_seen INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_journal_dir ON scan_journal(dir_path);

CREATE TABLE IF NOT EXISTS metadata_cache (
    filepath TEXT NOT NULL,
    state_hash TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (filepath, state_hash)
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS assets_fts USING fts5(
    filename,
    subfolder,
    tags_text,
    workflow_type
);

CREATE TRIGGER IF NOT EXISTS assets_fts_insert
AFTER INSERT ON assets
BEGIN
    INSERT INTO assets_fts(rowid, filename, subfolder, tags_text, workflow_type)
    VALUES (new.id, new.filename, new.subfolder, '', '');
END;

CREATE TRIGGER IF NOT EXISTS assets_fts_update
AFTER UPDATE OF filename, subfolder ON assets
BEGIN
    UPDATE assets_fts
    SET filename = new.filename, subfolder = new.subfolder
    WHERE rowid = new.id;
END;

CREATE TRIGGER IF NOT EXISTS assets_fts_delete
AFTER DELETE ON assets
BEGIN
    DELETE FROM assets_fts WHERE rowid = old.id;
END;

CREATE TRIGGER IF NOT EXISTS asset_metadata_fts_insert
AFTER INSERT ON asset_metadata
BEGIN
    UPDATE assets_fts
    SET tags_text = new.tags_text,
        workflow_type = COALESCE(new.workflow_type, '')
    WHERE rowid = new.asset_id;
END;

CREATE TRIGGER IF NOT EXISTS asset_metadata_fts_update
AFTER UPDATE OF tags_text, workflow_type ON asset_metadata
BEGIN
    UPDATE assets_fts
    SET tags_text = new.tags_text,
        workflow_type = COALESCE(new.workflow_type, '')
    WHERE rowid = new.asset_id;
END;
"#;
