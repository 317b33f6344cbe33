//! Flat feature names for grouped (column, operator) results.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NamingError {
    #[error("feature name '{name}' produced by both '{first}' and '{second}'")]
    Collision {
        name: String,
        first: String,
        second: String,
    },
}

/// `<prefix>_<column>_<operator>`.
pub fn flat_column_name(prefix: &str, column: &str, operator: &str) -> String {
    let mut name = String::with_capacity(prefix.len() + column.len() + operator.len() + 2);
    name.push_str(prefix);
    name.push('_');
    name.push_str(column);
    name.push('_');
    name.push_str(operator);
    name
}

/// Flattens ordered (column, operator-name) header pairs under one prefix.
///
/// Output order equals input order. Fails if two pairs map to the same flat
/// name, which can only happen when the header itself repeats a pair.
pub fn reduce_column_names<'a>(
    prefix: &str,
    headers: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<Vec<String>, NamingError> {
    let mut registry = NameRegistry::default();
    let mut names = Vec::new();
    for (column, operator) in headers {
        let name = flat_column_name(prefix, column, operator);
        registry.register(&name, || format!("{prefix}/{column}/{operator}"))?;
        names.push(name);
    }
    Ok(names)
}

/// Tracks every flat name issued during a run and who issued it.
#[derive(Debug, Default)]
pub struct NameRegistry {
    owners: HashMap<String, String>,
}

impl NameRegistry {
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.owners.contains_key(name)
    }

    pub fn register(
        &mut self,
        name: &str,
        owner: impl FnOnce() -> String,
    ) -> Result<(), NamingError> {
        if let Some(first) = self.owners.get(name) {
            return Err(NamingError::Collision {
                name: name.to_string(),
                first: first.clone(),
                second: owner(),
            });
        }
        self.owners.insert(name.to_string(), owner());
        Ok(())
    }
}
