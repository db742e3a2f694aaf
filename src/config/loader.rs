use anyhow::{Context, Result, bail};
use schemars::{Schema, schema_for};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, warn};

use super::models::BatchConfig;

/// Parse and validate a batch held in memory.
pub fn load_from_str(s: &str) -> Result<BatchConfig> {
    let cfg: BatchConfig = serde_json::from_str(s).context("Batch is not valid JSON")?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Parse and validate a batch from any reader.
pub fn load_from_reader<R: Read>(reader: R) -> Result<BatchConfig> {
    let cfg: BatchConfig = serde_json::from_reader(reader).context("Batch is not valid JSON")?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Load a batch file, naming the file in every error.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<BatchConfig> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("Cannot open batch file {}", path.display()))?;
    let cfg = load_from_reader(file)
        .with_context(|| format!("Invalid batch file {}", path.display()))?;
    debug!(target: "curly::config", path = %path.display(), actions = cfg.actions.len(), "Batch loaded");
    Ok(cfg)
}

/// Async variant of [`load_from_path`].
pub async fn load_from_path_async<P: AsRef<Path>>(path: P) -> Result<BatchConfig> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Cannot read batch file {}", path.display()))?;
    let cfg = load_from_reader(bytes.as_slice())
        .with_context(|| format!("Invalid batch file {}", path.display()))?;
    debug!(target: "curly::config", path = %path.display(), actions = cfg.actions.len(), "Batch loaded");
    Ok(cfg)
}

/// JSON Schema of the batch file format.
pub fn generate_schema() -> Schema {
    schema_for!(BatchConfig)
}

/// Pretty-printed batch file schema, for editors and external validators.
pub fn write_schema_to_writer<W: Write>(mut writer: W) -> Result<()> {
    let schema = generate_schema();
    let json = serde_json::to_string_pretty(&schema).context("Cannot serialize batch schema")?;
    writer
        .write_all(json.as_bytes())
        .context("Cannot write batch schema")?;
    Ok(())
}

/// Perform basic sanity checks.
/// - Every action has a name and a command.
/// - Every secure variable name is bound.
///
/// Placeholders without a binding only produce a warning: they may be supplied
/// later (e.g. from the command line) and otherwise fail their action at run time.
pub fn validate_config(cfg: &BatchConfig) -> Result<()> {
    for (idx, action) in cfg.actions.iter().enumerate() {
        if action.name.trim().is_empty() {
            bail!("Action at index {} has an empty name", idx);
        }
        if action.command.trim().is_empty() {
            bail!("Action '{}' (index {}) has an empty command", action.name, idx);
        }
    }

    for name in &cfg.secure_variables {
        if !cfg.variables.contains_key(name) {
            bail!("Secure variable '{}' has no value in `variables`", name);
        }
    }

    for name in unbound_variables(cfg) {
        warn!(target: "curly::config", variable = %name, "Placeholder has no binding in config");
    }

    Ok(())
}

/// Placeholder names used by any action but missing from `variables`, sorted.
pub fn unbound_variables(cfg: &BatchConfig) -> BTreeSet<String> {
    cfg.actions
        .iter()
        .flat_map(|action| action.variable_names())
        .filter(|name| !cfg.variables.contains_key(name))
        .collect()
}
