//! Display labels for sensors.
//!
//! Sensors are matched by their broadcast name (after quote truncation),
//! not by address, so a replaced unit with the same name keeps its label.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One `devices` entry of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    /// Broadcast name, e.g. "GVH5075_ABCD"
    pub name: String,
    /// Label shown instead of the name, e.g. "Sauna"
    pub alias: String,
}

/// Read-only lookup from broadcast name to label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable(HashMap<String, String>);

impl AliasTable {
    /// Build the table; a later entry for the same name wins.
    pub fn new(aliases: &[Alias]) -> Self {
        Self(
            aliases
                .iter()
                .map(|a| (a.name.clone(), a.alias.clone()))
                .collect(),
        )
    }

    /// The configured label for `name`, or `name` itself.
    ///
    /// # Example
    /// ```
    /// use goveewatch::alias::{Alias, AliasTable};
    ///
    /// let table = AliasTable::new(&[Alias {
    ///     name: "GVH5075_ABCD".into(),
    ///     alias: "Kitchen".into(),
    /// }]);
    /// assert_eq!(table.resolve("GVH5075_ABCD"), "Kitchen");
    /// assert_eq!(table.resolve("GVH5075_FFFF"), "GVH5075_FFFF");
    /// ```
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.0.get(name).map_or(name, String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
