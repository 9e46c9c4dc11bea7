//! Hosts and their node attributes.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Node attributes for one host, as consumed by chef-solo.
///
/// `run_list` is always present. A missing or `null` run list deserializes
/// to an empty one; anything other than an array of strings is rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    #[serde(default, deserialize_with = "null_as_empty")]
    run_list: Vec<String>,
    #[serde(flatten)]
    attributes: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl AttributeSet {
    /// Attributes with the given run list and nothing else.
    pub fn with_run_list(run_list: Vec<String>) -> Self {
        Self {
            run_list,
            attributes: Map::new(),
        }
    }

    /// Parse a JSON document.
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    pub fn run_list(&self) -> &[String] {
        &self.run_list
    }

    pub fn push_run_list(&mut self, entry: impl Into<String>) {
        self.run_list.push(entry.into());
    }

    /// Any attribute other than `run_list`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Serialize as the `solo.json` payload.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A deployment target.
#[derive(Debug, Clone, PartialEq)]
pub struct Host {
    /// Address or name used to reach the host
    pub name: String,
    /// Roles assigned by the inventory
    pub roles: Vec<String>,
    /// Set by [`crate::RunListResolver::discover`]
    pub attributes: Option<AttributeSet>,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: Vec::new(),
            attributes: None,
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Discovered run list, empty before discovery.
    pub fn run_list(&self) -> &[String] {
        self.attributes
            .as_ref()
            .map(AttributeSet::run_list)
            .unwrap_or(&[])
    }
}
