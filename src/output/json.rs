// JSON Output Module

use crate::Result;
use crate::scanner::Grab;

/// Generate JSON output from a grab
pub fn generate_json(grab: &Grab, pretty: bool) -> Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(grab)?)
    } else {
        Ok(serde_json::to_string(grab)?)
    }
}

/// Write JSON to file
pub fn write_json_file(grab: &Grab, path: &str, pretty: bool) -> Result<()> {
    let json = generate_json(grab, pretty)?;
    std::fs::write(path, json)?;
    Ok(())
}
