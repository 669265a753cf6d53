use std::error::Error;
use std::fs::OpenOptions;
use std::path::PathBuf;

/// An explicit DSN wins; otherwise a sqlite file under the data dir.
pub(crate) fn resolve_dsn(
    input: Option<&str>,
    data_dir: &str,
) -> Result<String, Box<dyn Error + Send + Sync>> {
    if let Some(input) = input
        && !input.trim().is_empty()
    {
        ensure_sqlite_dsn(input)?;
        return Ok(input.to_string());
    }

    let db_path = PathBuf::from(data_dir).join("db").join("relaygate.db");
    let db_path = db_path.to_string_lossy();
    let dsn = if db_path.starts_with('/') {
        format!("sqlite:///{}", db_path.trim_start_matches('/'))
    } else {
        format!("sqlite://{db_path}")
    };
    ensure_sqlite_dsn(&dsn)?;
    Ok(dsn)
}

/// Creates the sqlite file and its parent directories on demand.
pub(crate) fn ensure_sqlite_dsn(dsn: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    let Some(rest) = dsn.strip_prefix("sqlite:") else {
        return Ok(());
    };
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    if rest.is_empty() || rest.starts_with(":memory:") || rest.starts_with("memory:") {
        return Ok(());
    }

    let path_part = rest.split('?').next().unwrap_or_default();
    if path_part.is_empty() {
        return Ok(());
    }

    let path = PathBuf::from(path_part);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
    }

    Ok(())
}
