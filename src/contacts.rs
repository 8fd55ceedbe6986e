//! Contact list persisted as `{"contacts": [...]}`
//!
//! Every operation is a full read-modify-write of the file. Writes go to a
//! sibling temp file which is then renamed over the original, so a crash
//! mid-write never leaves a truncated list behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::MatchMode;
use crate::error::{Error, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContactFile {
    #[serde(default)]
    contacts: Vec<String>,
}

/// Ordered, duplicate-free list of contact display names.
#[derive(Debug, Clone)]
pub struct ContactStore {
    path: PathBuf,
    matcher: MatchMode,
}

impl ContactStore {
    pub fn new(path: impl Into<PathBuf>, matcher: MatchMode) -> Self {
        Self {
            path: path.into(),
            matcher,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contacts in insertion order. A missing file is an empty list.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let file: ContactFile = serde_json::from_str(&content)?;
        Ok(file.contacts)
    }

    /// Append a contact. Returns the new total.
    pub fn add(&self, name: &str) -> Result<usize> {
        let name = normalize(name)?;
        let mut contacts = self.list()?;

        if contacts.iter().any(|c| self.matcher.same_name(c, &name)) {
            return Err(Error::AlreadyExists(name));
        }

        contacts.push(name.clone());
        self.save(&contacts)?;
        info!(contact = %name, total = contacts.len(), "Contact added");
        Ok(contacts.len())
    }

    /// Remove a contact. Returns the stored spelling that was removed and
    /// the remaining count.
    pub fn remove(&self, name: &str) -> Result<(String, usize)> {
        let name = normalize(name)?;
        let mut contacts = self.list()?;

        let position = contacts
            .iter()
            .position(|c| self.matcher.same_name(c, &name))
            .ok_or_else(|| Error::NotFound(name.clone()))?;

        let removed = contacts.remove(position);
        self.save(&contacts)?;
        info!(contact = %removed, remaining = contacts.len(), "Contact removed");
        Ok((removed, contacts.len()))
    }

    fn save(&self, contacts: &[String]) -> Result<()> {
        let file = ContactFile {
            contacts: contacts.to_vec(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "contacts.json".to_string());
        let tmp_path = dir.join(format!(".{}.tmp", file_name));

        {
            let mut tmp = fs::File::create(&tmp_path)?;
            tmp.write_all(json.as_bytes())?;
            tmp.write_all(b"\n")?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        debug!(path = %self.path.display(), count = contacts.len(), "Contacts saved");
        Ok(())
    }
}

fn normalize(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidArgument(
            "Nickname cannot be empty".to_string(),
        ));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> ContactStore {
        ContactStore::new(dir.join("contacts.json"), MatchMode::CaseInsensitive)
    }

    #[test]
    fn missing_file_is_empty_list() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn add_preserves_insertion_order() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());

        assert_eq!(store.add("charlie").unwrap(), 1);
        assert_eq!(store.add("alice").unwrap(), 2);
        assert_eq!(store.add("bob").unwrap(), 3);

        assert_eq!(store.list().unwrap(), vec!["charlie", "alice", "bob"]);
    }

    #[test]
    fn duplicate_add_is_rejected_and_store_unchanged() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.add("Alice").unwrap();

        let err = store.add("alice").unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(ref n) if n == "alice"));
        assert_eq!(store.list().unwrap(), vec!["Alice"]);
    }

    #[test]
    fn exact_matcher_allows_case_variants() {
        let dir = tempdir().expect("tempdir");
        let store = ContactStore::new(dir.path().join("contacts.json"), MatchMode::Exact);
        store.add("Alice").unwrap();
        store.add("alice").unwrap();
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn remove_missing_is_rejected_and_store_unchanged() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.add("alice").unwrap();

        let err = store.remove("bob").unwrap_err();
        assert!(matches!(err, Error::NotFound(ref n) if n == "bob"));
        assert_eq!(store.list().unwrap(), vec!["alice"]);
    }

    #[test]
    fn remove_returns_stored_spelling() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.add("Alice").unwrap();
        store.add("bob").unwrap();

        let (removed, remaining) = store.remove("ALICE").unwrap();
        assert_eq!(removed, "Alice");
        assert_eq!(remaining, 1);
        assert_eq!(store.list().unwrap(), vec!["bob"]);
    }

    #[test]
    fn names_are_trimmed_and_empty_rejected() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());

        store.add("  dew  ").unwrap();
        assert_eq!(store.list().unwrap(), vec!["dew"]);

        assert!(matches!(store.add("   "), Err(Error::InvalidArgument(_))));
        assert!(matches!(store.remove(""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn file_format_is_named_key_with_unicode_kept() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.add("Дью 🔥").unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"contacts\""));
        assert!(raw.contains("Дью 🔥"));

        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["contacts"][0], "Дью 🔥");
    }

    #[test]
    fn hand_edited_file_is_picked_up() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        fs::write(store.path(), r#"{"contacts": ["x", "y"]}"#).unwrap();
        assert_eq!(store.list().unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(store.list(), Err(Error::SerializationError(_))));
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.add("alice").unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn sequence_of_operations_never_produces_duplicates() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let ops: &[(&str, &str)] = &[
            ("add", "a"),
            ("add", "b"),
            ("add", "A"),
            ("remove", "a"),
            ("add", "a"),
            ("add", "c"),
            ("remove", "z"),
            ("add", "B"),
            ("remove", "b"),
            ("add", "b"),
        ];

        let mut model: Vec<String> = Vec::new();
        for (op, name) in ops {
            match *op {
                "add" => {
                    let dup = model.iter().any(|m| m.eq_ignore_ascii_case(name));
                    let result = store.add(name);
                    assert_eq!(result.is_err(), dup);
                    if !dup {
                        model.push(name.to_string());
                    }
                }
                _ => {
                    let pos = model.iter().position(|m| m.eq_ignore_ascii_case(name));
                    let result = store.remove(name);
                    assert_eq!(result.is_ok(), pos.is_some());
                    if let Some(p) = pos {
                        model.remove(p);
                    }
                }
            }
            let listed = store.list().unwrap();
            assert_eq!(listed, model);
        }
        assert_eq!(store.list().unwrap(), vec!["a", "c", "b"]);
    }
}
