use eyre::{eyre, WrapErr};
use std::{fs::OpenOptions, io::Write, path::Path};
use tracing::info;

/// Append a `key=value` output for later pipeline steps to consume
///
/// The line is written with a single call so concurrent appenders can't interleave with it.
pub fn append(path: Option<&Path>, key: &str, value: &str) -> eyre::Result<()> {
    let path =
        path.ok_or_else(|| eyre!("the pipeline output file is not configured (GITHUB_OUTPUT)"))?;

    let line = format!("{key}={value}\n");
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .and_then(|mut file| file.write_all(line.as_bytes()))
        .wrap_err_with(|| format!("failed to write output to {}", path.display()))?;

    info!(%key, %value, "set output");
    Ok(())
}
