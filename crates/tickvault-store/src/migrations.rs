use duckdb::{params, Connection};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_securities_tables",
        sql: r#"
CREATE TABLE IF NOT EXISTS securities (
    id TEXT PRIMARY KEY,
    name TEXT,
    type TEXT NOT NULL,
    currency TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS security_quotes (
    security TEXT NOT NULL REFERENCES securities(id),
    "begin" TIMESTAMP NOT NULL,
    "end" TIMESTAMP NOT NULL,
    interv TINYINT NOT NULL,
    open DOUBLE,
    close DOUBLE,
    high DOUBLE,
    low DOUBLE,
    PRIMARY KEY (security, "begin", interv)
);
"#,
    },
    Migration {
        version: "0002_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_security_quotes_security_end ON security_quotes(security, "end");
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params![migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params![migration.version],
            )?;
        }
    }

    Ok(())
}
