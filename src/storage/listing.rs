//! Listing files and their self-healing reads.

use std::{fs, path::Path};

use serde::{Serialize, de::DeserializeOwned};
use tracing::warn;

use crate::error::{Error, Result};

use super::{read_json, write_json};

/// Initializes the file with `T::default()` when absent; when present but unreadable it is
/// rewritten with the default and read back once.
pub(crate) fn load_or_repair<T>(file: &Path) -> Result<T>
where
    T: Default + Serialize + DeserializeOwned,
{
    if !file.exists() {
        let value = T::default();
        write_json(file, &value)?;
        return Ok(value);
    }
    match read_json(file) {
        Ok(value) => Ok(value),
        Err(err) => {
            warn!(file = %file.display(), %err, "repairing unreadable listing");
            write_json(file, &T::default())?;
            read_json(file).map_err(|err| {
                Error::Internal(format!("listing {} is unrecoverable: {}", file.display(), err))
            })
        }
    }
}

/// Reads a name listing and reconciles it with the directories under `dir`: names without
/// a directory are pruned, unlisted directories are appended. The file is rewritten only
/// when reconciliation changed it.
pub(crate) fn read_listing(file: &Path, dir: &Path) -> Result<Vec<String>> {
    let listed: Vec<String> = load_or_repair(file)?;

    let mut on_disk = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str().filter(|n| !n.starts_with('.')) {
            on_disk.push(name.to_string());
        }
    }
    on_disk.sort();

    let mut names: Vec<String> = Vec::with_capacity(listed.len());
    for name in &listed {
        if on_disk.contains(name) && !names.contains(name) {
            names.push(name.clone());
        }
    }
    for name in on_disk {
        if !names.contains(&name) {
            names.push(name);
        }
    }

    if names != listed {
        warn!(file = %file.display(), ?listed, ?names, "reconciled listing with disk");
        write_json(file, &names)?;
    }
    Ok(names)
}

/// Adds a name to a listing file
pub(crate) fn add_to_listing(file: &Path, name: &str) -> Result<()> {
    let mut names: Vec<String> = load_or_repair(file)?;
    if !names.iter().any(|n| n == name) {
        names.push(name.to_string());
        write_json(file, &names)?;
    }
    Ok(())
}

/// Removes a name from a listing file
pub(crate) fn remove_from_listing(file: &Path, name: &str) -> Result<()> {
    let mut names: Vec<String> = load_or_repair(file)?;
    let before = names.len();
    names.retain(|n| n != name);
    if names.len() != before {
        write_json(file, &names)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{add_to_listing, load_or_repair, read_listing, remove_from_listing};
    use crate::{error::Result, storage::read_json};

    #[test]
    fn test_missing_listing_is_created() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("list.json");
        assert_eq!(read_listing(&file, dir.path())?, Vec::<String>::new());
        assert!(file.exists());
        Ok(())
    }

    #[test]
    fn test_corrupt_listing_is_repaired() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("list.json");
        fs::write(&file, "[not json")?;
        let names: Vec<String> = load_or_repair(&file)?;
        assert!(names.is_empty());
        let stored: Vec<String> = read_json(&file)?;
        assert!(stored.is_empty());
        Ok(())
    }

    #[test]
    fn test_reconcile_with_disk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("list.json");
        fs::create_dir(dir.path().join("kept"))?;
        fs::create_dir(dir.path().join("found"))?;
        fs::create_dir(dir.path().join(".snapshots"))?;
        fs::write(&file, r#"["gone", "kept", "kept"]"#)?;

        assert_eq!(read_listing(&file, dir.path())?, vec!["kept".to_string(), "found".to_string()]);
        let stored: Vec<String> = read_json(&file)?;
        assert_eq!(stored, vec!["kept".to_string(), "found".to_string()]);
        Ok(())
    }

    #[test]
    fn test_add_remove() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("list.json");
        add_to_listing(&file, "a")?;
        add_to_listing(&file, "b")?;
        add_to_listing(&file, "a")?;
        remove_from_listing(&file, "a")?;
        let stored: Vec<String> = read_json(&file)?;
        assert_eq!(stored, vec!["b".to_string()]);
        Ok(())
    }
}
