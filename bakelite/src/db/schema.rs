//! Database schema definitions.

pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA_VERSION_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    id         INTEGER PRIMARY KEY CHECK (id = 1),
    version    INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
";

const IMAGES_TABLE: &str = "
CREATE TABLE IF NOT EXISTS images (
    id          TEXT PRIMARY KEY,
    reference   TEXT UNIQUE NOT NULL,
    created_at  TEXT NOT NULL,
    record_json TEXT NOT NULL
);
";

// Layer index keyed by cache key: identical stage inputs reuse the stored
// blob instead of re-running the stage.
const LAYERS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS layers (
    cache_key  TEXT PRIMARY KEY,
    digest     TEXT NOT NULL,
    size       INTEGER NOT NULL,
    stage      TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

const CONTAINERS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS containers (
    id          TEXT PRIMARY KEY,
    name        TEXT UNIQUE,
    image       TEXT NOT NULL,
    status      TEXT NOT NULL,
    config_json TEXT NOT NULL,
    state_json  TEXT NOT NULL
);
";

pub fn all_schemas() -> [&'static str; 4] {
    [
        SCHEMA_VERSION_TABLE,
        IMAGES_TABLE,
        LAYERS_TABLE,
        CONTAINERS_TABLE,
    ]
}
