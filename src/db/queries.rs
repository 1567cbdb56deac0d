pub const CREATE_PAGES: &str = r#"
CREATE TABLE IF NOT EXISTS pages (
  url        TEXT PRIMARY KEY,
  hostname   TEXT,
  full_title TEXT,
  full_url   TEXT
);
"#;

pub const CREATE_VISITS: &str = r#"
CREATE TABLE IF NOT EXISTS visits (
  url      TEXT NOT NULL,
  time     INTEGER NOT NULL,
  duration INTEGER,
  PRIMARY KEY (url, time)
);
"#;

pub const CREATE_BOOKMARKS: &str = r#"
CREATE TABLE IF NOT EXISTS bookmarks (
  url  TEXT PRIMARY KEY,
  time INTEGER NOT NULL DEFAULT 0
);
"#;

pub const CREATE_ANNOTATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS annotations (
  url           TEXT PRIMARY KEY,
  page_url      TEXT NOT NULL,
  body          TEXT,
  comment       TEXT,
  created_when  INTEGER NOT NULL DEFAULT 0
);
"#;

pub const CREATE_ANNOTATION_PRIVACY_LEVELS: &str = r#"
CREATE TABLE IF NOT EXISTS annotation_privacy_levels (
  id            INTEGER PRIMARY KEY AUTOINCREMENT,
  annotation    TEXT NOT NULL,
  privacy_level INTEGER NOT NULL DEFAULT 0
);
"#;

pub const CREATE_SHARED_ANNOTATION_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS shared_annotation_metadata (
  local_id        TEXT PRIMARY KEY,
  remote_id       TEXT NOT NULL,
  exclude_from_lists INTEGER NOT NULL DEFAULT 0
);
"#;

pub const CREATE_CUSTOM_LISTS: &str = r#"
CREATE TABLE IF NOT EXISTS custom_lists (
  id         INTEGER PRIMARY KEY,
  name       TEXT NOT NULL,
  created_at INTEGER NOT NULL DEFAULT 0
);
"#;

pub const CREATE_PAGE_LIST_ENTRIES: &str = r#"
CREATE TABLE IF NOT EXISTS page_list_entries (
  list_id    INTEGER NOT NULL,
  page_url   TEXT NOT NULL,
  full_url   TEXT,
  created_at INTEGER NOT NULL DEFAULT 0,
  PRIMARY KEY (list_id, page_url)
);
"#;

pub const CREATE_SHARED_LIST_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS shared_list_metadata (
  local_id  INTEGER PRIMARY KEY,
  remote_id TEXT NOT NULL
);
"#;

pub const CREATE_TAGS: &str = r#"
CREATE TABLE IF NOT EXISTS tags (
  url  TEXT NOT NULL,
  name TEXT NOT NULL,
  PRIMARY KEY (url, name)
);
"#;

pub const CREATE_SETTINGS: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
  key   TEXT PRIMARY KEY,
  value TEXT
);
"#;

pub const CREATE_TEMPLATES: &str = r#"
CREATE TABLE IF NOT EXISTS templates (
  id    INTEGER PRIMARY KEY,
  title TEXT NOT NULL,
  code  TEXT NOT NULL
);
"#;

pub const CREATE_FAV_ICONS: &str = r#"
CREATE TABLE IF NOT EXISTS fav_icons (
  hostname TEXT PRIMARY KEY,
  fav_icon TEXT
);
"#;

pub const CREATE_MIGRATION_QUEUE: &str = r#"
CREATE TABLE IF NOT EXISTS migration_queue (
  id         INTEGER PRIMARY KEY AUTOINCREMENT,
  collection TEXT NOT NULL,
  objs       TEXT NOT NULL
);
"#;

pub const CREATE_LOCAL_STORAGE: &str = r#"
CREATE TABLE IF NOT EXISTS local_storage (
  key   TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
"#;

pub const INDEX_VISITS_URL: &str = "CREATE INDEX IF NOT EXISTS idx_visits_url ON visits(url);";

pub const INDEX_ANNOTATIONS_PAGE_URL: &str =
    "CREATE INDEX IF NOT EXISTS idx_annotations_page_url ON annotations(page_url);";

pub const INDEX_PAGE_LIST_ENTRIES_PAGE_URL: &str =
    "CREATE INDEX IF NOT EXISTS idx_page_list_entries_page_url ON page_list_entries(page_url);";

pub const INDEX_PAGES_HOSTNAME: &str =
    "CREATE INDEX IF NOT EXISTS idx_pages_hostname ON pages(hostname);";

pub fn schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_PAGES,
        CREATE_VISITS,
        CREATE_BOOKMARKS,
        CREATE_ANNOTATIONS,
        CREATE_ANNOTATION_PRIVACY_LEVELS,
        CREATE_SHARED_ANNOTATION_METADATA,
        CREATE_CUSTOM_LISTS,
        CREATE_PAGE_LIST_ENTRIES,
        CREATE_SHARED_LIST_METADATA,
        CREATE_TAGS,
        CREATE_SETTINGS,
        CREATE_TEMPLATES,
        CREATE_FAV_ICONS,
        CREATE_MIGRATION_QUEUE,
        CREATE_LOCAL_STORAGE,
        INDEX_VISITS_URL,
        INDEX_ANNOTATIONS_PAGE_URL,
        INDEX_PAGE_LIST_ENTRIES_PAGE_URL,
        INDEX_PAGES_HOSTNAME,
    ]
}
