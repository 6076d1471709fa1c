//! The immutable profile description shared by every rank.

use error::{Error, Result};

/// A named measurement shape: which categories of work exist and which
/// counter events are read for each of them. Byte-identical on every rank;
/// the collective negotiation enforces that before anything is persisted.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ProfileSpec {
    name: String,
    categories: Vec<String>,
    events: Vec<String>,
}

impl ProfileSpec {
    pub fn new(name: &str, categories: &[&str], events: &[&str]) -> Result<ProfileSpec> {
        if name.is_empty() {
            return Err(Error::InvalidConfig {
                detail: "profile name must not be empty".to_string(),
            });
        }
        if categories.is_empty() {
            return Err(Error::InvalidConfig {
                detail: "a profile needs at least one category".to_string(),
            });
        }
        if let Some(dup) = first_duplicate(categories) {
            return Err(Error::InvalidConfig {
                detail: format!("duplicate category '{}'", dup),
            });
        }
        if let Some(dup) = first_duplicate(events) {
            return Err(Error::InvalidConfig {
                detail: format!("duplicate event '{}'", dup),
            });
        }
        Ok(ProfileSpec {
            name: name.to_string(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            events: events.iter().map(|e| e.to_string()).collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn events(&self) -> &[String] {
        &self.events
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// The same profile with the event list dropped, for sessions whose
    /// counter facility is disabled.
    pub(crate) fn without_events(&self) -> ProfileSpec {
        ProfileSpec {
            name: self.name.clone(),
            categories: self.categories.clone(),
            events: Vec::new(),
        }
    }
}

fn first_duplicate<'a>(names: &'a [&'a str]) -> Option<&'a str> {
    for (i, name) in names.iter().enumerate() {
        if names[..i].contains(name) {
            return Some(name);
        }
    }
    None
}
