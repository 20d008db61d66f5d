//! Pre-flight checks on the payload contents before anything is sealed
//! or shipped.

use std::io;
use std::path::Path;

use serde_json::Value;
use walkdir::WalkDir;

use crate::errors::{Error, Result};

const ADG_EXTENSIONS: [&str; 3] = ["grc", "grd", "gri"];

/// An ADG directory must carry at least one file of each graph extension.
pub fn validate_adg_dir(path: &Path) -> Result<()> {
    let mut seen = [false; ADG_EXTENSIONS.len()];
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) {
            if let Some(i) = ADG_EXTENSIONS.iter().position(|e| *e == ext) {
                seen[i] = true;
            }
        }
    }
    if seen.iter().all(|s| *s) {
        Ok(())
    } else {
        Err(Error::BadInput(
            "ADG directory must contain .grc, .grd, and .gri files".to_string(),
        ))
    }
}

/// A deploy-events payload must contain at least one JSON document that
/// names an identifier, a system, an artifact, and a start or end time.
pub fn validate_deploy_events(path: &Path) -> Result<()> {
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        if let Ok(node) = serde_json::from_str::<Value>(&text) {
            if contains_valid_deploy(&node) {
                return Ok(());
            }
        }
    }
    Err(Error::BadInput(
        "no valid deploy-event JSON found".to_string(),
    ))
}

fn contains_valid_deploy(node: &Value) -> bool {
    match node {
        Value::Array(items) => items.iter().any(is_valid_deploy),
        _ => is_valid_deploy(node),
    }
}

fn is_valid_deploy(node: &Value) -> bool {
    let has = |key: &str| node.get(key).map(|v| !v.is_null()).unwrap_or(false);
    has("identifier") && has("system") && has("artifact") && (has("start_time") || has("end_time"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn adg_dir_with_all_extensions_passes() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("one.grc"), "").unwrap();
        fs::write(temp.path().join("two.grd"), "").unwrap();
        fs::write(temp.path().join("three.gri"), "").unwrap();
        validate_adg_dir(temp.path()).unwrap();
    }

    #[test]
    fn adg_dir_missing_an_extension_fails() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("one.grc"), "").unwrap();
        fs::write(temp.path().join("two.grd"), "").unwrap();
        assert!(matches!(
            validate_adg_dir(temp.path()),
            Err(Error::BadInput(_))
        ));
    }

    #[test]
    fn adg_extensions_found_in_subdirectories() {
        let temp = TempDir::new().unwrap();
        let sub = temp.path().join("nested");
        fs::create_dir(&sub).unwrap();
        fs::write(temp.path().join("one.grc"), "").unwrap();
        fs::write(sub.join("two.grd"), "").unwrap();
        fs::write(sub.join("three.gri"), "").unwrap();
        validate_adg_dir(temp.path()).unwrap();
    }

    #[test]
    fn deploy_event_object_passes() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("events.json");
        fs::write(
            &file,
            r#"{"identifier":"ID","system":"SYS","artifact":"ART","start_time":"now"}"#,
        )
        .unwrap();
        validate_deploy_events(&file).unwrap();
    }

    #[test]
    fn deploy_event_array_passes() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("events.json");
        fs::write(
            &file,
            r#"[{"identifier":"ID","system":"SYS","artifact":"ART","end_time":"later"}]"#,
        )
        .unwrap();
        validate_deploy_events(&file).unwrap();
    }

    #[test]
    fn deploy_event_missing_fields_fails() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("events.json");
        fs::write(&file, r#"{"identifier":"ID","system":"SYS"}"#).unwrap();
        assert!(matches!(
            validate_deploy_events(&file),
            Err(Error::BadInput(_))
        ));
    }

    #[test]
    fn deploy_event_without_timestamps_fails() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("events.json");
        fs::write(
            &file,
            r#"{"identifier":"ID","system":"SYS","artifact":"ART"}"#,
        )
        .unwrap();
        assert!(matches!(
            validate_deploy_events(&file),
            Err(Error::BadInput(_))
        ));
    }
}
