//! Persistence layer.
//!
//! Saves and loads agent statistics and the derivation cursor as a JSON
//! file. Keys are never written; every wallet is re-derived from the seed.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::types::AgentState;

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "rotator_state.json";

/// Save agent state to a JSON file.
pub fn save_state(state: &AgentState, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(state)
        .context("Failed to serialise agent state")?;

    std::fs::write(path, &json)
        .context(format!("Failed to write state to {path}"))?;

    debug!(path, ticks = state.tick_count, cursor = %state.cursor, "State saved");
    Ok(())
}

/// Load agent state from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_state(path: Option<&str>) -> Result<Option<AgentState>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read state from {path}"))?;

    let state: AgentState = serde_json::from_str(&json)
        .context(format!("Failed to parse state from {path}"))?;

    info!(
        path,
        ticks = state.tick_count,
        swaps = state.swaps(),
        rotations = state.rotations,
        cursor = %state.cursor,
        "State loaded from disk"
    );

    Ok(Some(state))
}

/// Delete the state file (for testing or reset).
pub fn delete_state(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
