//! Per-module schema versioning.
//!
//! Three logical schemas (`core`, `agents`, `memory`) each carry a `VERSION`
//! file under their subdirectory. Migrations are linear and forward-only:
//! the store refuses to open a layout newer than it understands or older
//! than its minimum supported version, and applies the ordered steps in
//! between on open.

use std::path::Path;

use ag_domain::error::{Error, Result};
use serde::{Deserialize, Serialize};

pub const MODULES: [&str; 3] = ["core", "agents", "memory"];

/// Current schema version per module.
pub fn current_version(module: &str) -> u32 {
    match module {
        "core" | "agents" | "memory" => 1,
        _ => 0,
    }
}

/// Oldest version this build can still migrate forward.
pub fn min_supported(module: &str) -> u32 {
    match module {
        "core" | "agents" | "memory" => 1,
        _ => 0,
    }
}

/// One forward migration step: applies `from` → `from + 1` to the module's
/// directory.
pub struct MigrationStep {
    pub from: u32,
    pub apply: fn(&Path) -> Result<()>,
}

/// Ordered steps per module. Version 1 is the initial layout, so the lists
/// are empty until a layout change lands.
fn steps_for(_module: &str) -> &'static [MigrationStep] {
    &[]
}

#[derive(Debug, Serialize, Deserialize)]
struct VersionRow {
    version: u32,
}

/// Read the module's `VERSION` file. A missing file on a fresh directory is
/// initialized to the current version.
pub fn ensure_version(module_dir: &Path, module: &str) -> Result<u32> {
    let path = module_dir.join("VERSION");
    if !path.exists() {
        let row = VersionRow {
            version: current_version(module),
        };
        std::fs::write(&path, serde_json::to_string(&row)?)?;
        return Ok(row.version);
    }
    let raw = std::fs::read_to_string(&path)?;
    let row: VersionRow = serde_json::from_str(raw.trim())
        .map_err(|e| Error::Integrity(format!("{module}: unreadable VERSION file: {e}")))?;
    Ok(row.version)
}

/// Validate the on-disk version and run any pending forward migrations.
pub fn open_module(module_dir: &Path, module: &str) -> Result<u32> {
    std::fs::create_dir_all(module_dir)?;
    let mut version = ensure_version(module_dir, module)?;
    let current = current_version(module);

    if version > current {
        return Err(Error::Integrity(format!(
            "schema '{module}' is at version {version}, newer than supported {current}"
        )));
    }
    if version < min_supported(module) {
        return Err(Error::Integrity(format!(
            "schema '{module}' is at version {version}, older than minimum supported {}",
            min_supported(module)
        )));
    }

    while version < current {
        let step = steps_for(module)
            .iter()
            .find(|s| s.from == version)
            .ok_or_else(|| {
                Error::Integrity(format!(
                    "schema '{module}': no migration step from version {version}"
                ))
            })?;
        tracing::info!(module, from = version, to = version + 1, "migrating schema");
        (step.apply)(module_dir)?;
        version += 1;
        let row = VersionRow { version };
        std::fs::write(module_dir.join("VERSION"), serde_json::to_string(&row)?)?;
    }

    Ok(version)
}
