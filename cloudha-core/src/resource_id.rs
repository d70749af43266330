//! Structured cloud resource identifiers
//!
//! Parses ids of the form
//! `/subscriptions/{sub}/resourceGroups/{group}/providers/{namespace}/{type}/{name}[/{child_type}/{child_name}...]`
//! into named fields instead of indexing into a split string.

use crate::error::{FailoverError, FailoverResult};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub subscription: String,
    pub resource_group: String,
    pub namespace: Option<String>,
    pub resource_type: Option<String>,
    pub name: Option<String>,
    /// Nested `(type, name)` segments below the top-level resource
    pub children: Vec<(String, String)>,
}

impl ResourceId {
    pub fn parse(id: &str) -> FailoverResult<Self> {
        let invalid = |reason: &str| FailoverError::InvalidResourceId {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        let segments: Vec<&str> = id.trim_matches('/').split('/').collect();
        let mut iter = segments.iter().copied();

        match iter.next() {
            Some(s) if s.eq_ignore_ascii_case("subscriptions") => {}
            _ => return Err(invalid("expected leading 'subscriptions' segment")),
        }
        let subscription = iter
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing subscription"))?
            .to_string();

        match iter.next() {
            Some(s) if s.eq_ignore_ascii_case("resourceGroups") => {}
            _ => return Err(invalid("expected 'resourceGroups' segment")),
        }
        let resource_group = iter
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing resource group"))?
            .to_string();

        let mut parsed = ResourceId {
            subscription,
            resource_group,
            namespace: None,
            resource_type: None,
            name: None,
            children: Vec::new(),
        };

        match iter.next() {
            None => return Ok(parsed),
            Some(s) if s.eq_ignore_ascii_case("providers") => {}
            Some(other) => return Err(invalid(&format!("unexpected segment '{}'", other))),
        }

        let rest: Vec<&str> = iter.collect();
        if rest.len() < 3 || (rest.len() - 1) % 2 != 0 {
            return Err(invalid("provider path must be namespace followed by type/name pairs"));
        }
        parsed.namespace = Some(rest[0].to_string());
        parsed.resource_type = Some(rest[1].to_string());
        parsed.name = Some(rest[2].to_string());
        parsed.children = rest[3..]
            .chunks(2)
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect();

        Ok(parsed)
    }

    /// Whether the top-level resource type matches, ignoring case
    pub fn is_type(&self, resource_type: &str) -> bool {
        self.resource_type
            .as_deref()
            .map(|t| t.eq_ignore_ascii_case(resource_type))
            .unwrap_or(false)
    }

    /// Name of the innermost resource
    pub fn leaf_name(&self) -> Option<&str> {
        self.children
            .last()
            .map(|(_, name)| name.as_str())
            .or(self.name.as_deref())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription, self.resource_group
        )?;
        if let (Some(ns), Some(ty), Some(name)) = (&self.namespace, &self.resource_type, &self.name) {
            write!(f, "/providers/{}/{}/{}", ns, ty, name)?;
            for (child_type, child_name) in &self.children {
                write!(f, "/{}/{}", child_type, child_name)?;
            }
        }
        Ok(())
    }
}
