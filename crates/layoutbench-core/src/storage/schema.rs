pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  suite TEXT NOT NULL,
  started_at TEXT NOT NULL,
  finished_at TEXT,
  status TEXT NOT NULL,
  baseline TEXT NOT NULL,
  backend TEXT NOT NULL,
  config_fingerprint TEXT NOT NULL,
  config_json TEXT,
  notes_json TEXT
);

CREATE TABLE IF NOT EXISTS run_variants (
  run_id INTEGER NOT NULL REFERENCES runs(id),
  position INTEGER NOT NULL,
  variant_id TEXT NOT NULL,
  strategy TEXT NOT NULL,
  PRIMARY KEY (run_id, variant_id)
);

CREATE TABLE IF NOT EXISTS run_templates (
  run_id INTEGER NOT NULL REFERENCES runs(id),
  position INTEGER NOT NULL,
  template_id TEXT NOT NULL,
  PRIMARY KEY (run_id, template_id)
);

CREATE TABLE IF NOT EXISTS records (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  variant_id TEXT NOT NULL,
  template_id TEXT NOT NULL,
  duration_secs REAL NOT NULL,
  cpu_cost REAL,
  io_cost REAL,
  total_cost REAL,
  row_count INTEGER NOT NULL,
  attempts INTEGER NOT NULL,
  plan_json TEXT
);

CREATE TABLE IF NOT EXISTS missing (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  variant_id TEXT NOT NULL,
  template_id TEXT NOT NULL,
  stage TEXT NOT NULL,
  reason TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_run ON records(run_id);
CREATE INDEX IF NOT EXISTS idx_missing_run ON missing(run_id);
"#;
