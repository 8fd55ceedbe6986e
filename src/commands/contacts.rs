//! Contact list management from the command line

use crate::config::Settings;
use crate::contacts::ContactStore;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactsAction {
    List,
    Add(String),
    Remove(String),
}

/// Apply the action and return the text to print.
pub fn execute(store: &ContactStore, action: ContactsAction) -> Result<String> {
    match action {
        ContactsAction::List => {
            let contacts = store.list()?;
            if contacts.is_empty() {
                return Ok(format!("No contacts in {}", store.path().display()));
            }
            let mut out = format!("Contacts ({}):", contacts.len());
            for (i, contact) in contacts.iter().enumerate() {
                out.push_str(&format!("\n  {}. {}", i + 1, contact));
            }
            Ok(out)
        }
        ContactsAction::Add(name) => {
            let total = store.add(&name)?;
            Ok(format!("Added {} ({} total)", name.trim(), total))
        }
        ContactsAction::Remove(name) => {
            let (removed, remaining) = store.remove(&name)?;
            Ok(format!("Removed {} ({} left)", removed, remaining))
        }
    }
}

pub fn run(settings: &Settings, action: ContactsAction) -> Result<()> {
    let store = ContactStore::new(settings.contacts_file.clone(), settings.contact_match);
    println!("{}", execute(&store, action)?);
    Ok(())
}
