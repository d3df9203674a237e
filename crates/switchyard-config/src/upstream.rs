use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Downstream endpoint written as `group=host:port*weight`.
///
/// The weight suffix is optional and defaults to one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct UpstreamDirective {
    group: String,
    address: String,
    weight: u32,
}

impl UpstreamDirective {
    /// Builds a directive from its parts.
    #[must_use]
    pub fn new(group: impl Into<String>, address: impl Into<String>, weight: u32) -> Self {
        Self {
            group: group.into(),
            address: address.into(),
            weight,
        }
    }

    /// Group the endpoint belongs to.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// `host:port` to dial.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Relative share of traffic.
    #[must_use]
    pub const fn weight(&self) -> u32 {
        self.weight
    }
}

impl fmt::Display for UpstreamDirective {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}={}*{}", self.group, self.address, self.weight)
    }
}

impl FromStr for UpstreamDirective {
    type Err = UpstreamParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (group, target) = input
            .split_once('=')
            .ok_or_else(|| UpstreamParseError::MissingGroup(input.to_owned()))?;
        let group = group.trim();
        if group.is_empty() {
            return Err(UpstreamParseError::MissingGroup(input.to_owned()));
        }

        let (address, weight) = match target.rsplit_once('*') {
            Some((address, weight)) => {
                let weight = weight
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| UpstreamParseError::InvalidWeight(weight.to_owned()))?;
                (address.trim(), weight)
            }
            None => (target.trim(), 1),
        };
        if weight == 0 {
            return Err(UpstreamParseError::InvalidWeight("0".to_owned()));
        }
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => return Err(UpstreamParseError::InvalidAddress(address.to_owned())),
        }
        Ok(Self::new(group, address, weight))
    }
}

impl TryFrom<String> for UpstreamDirective {
    type Error = UpstreamParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UpstreamDirective> for String {
    fn from(value: UpstreamDirective) -> Self {
        value.to_string()
    }
}

/// Errors encountered while parsing an [`UpstreamDirective`].
#[derive(Debug, Error)]
pub enum UpstreamParseError {
    /// The directive lacked the `group=` prefix.
    #[error("upstream '{0}' must be written as group=host:port*weight")]
    MissingGroup(String),
    /// The address was not `host:port`.
    #[error("invalid upstream address '{0}'")]
    InvalidAddress(String),
    /// The weight was not a positive integer.
    #[error("invalid upstream weight '{0}'")]
    InvalidWeight(String),
}

/// Groups directives by name, keeping declaration order within a group.
#[must_use]
pub fn group_upstreams(directives: &[UpstreamDirective]) -> BTreeMap<String, Vec<(String, u32)>> {
    let mut groups: BTreeMap<String, Vec<(String, u32)>> = BTreeMap::new();
    for directive in directives {
        groups
            .entry(directive.group.clone())
            .or_default()
            .push((directive.address.clone(), directive.weight));
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("users=10.0.0.1:7070*3", "users", "10.0.0.1:7070", 3)]
    #[case("users=10.0.0.2:7070", "users", "10.0.0.2:7070", 1)]
    #[case(" billing = db.internal:9000 * 2 ", "billing", "db.internal:9000", 2)]
    fn parses_upstream_directives(
        #[case] input: &str,
        #[case] group: &str,
        #[case] address: &str,
        #[case] weight: u32,
    ) {
        let directive: UpstreamDirective = input.parse().expect("valid directive");
        assert_eq!(directive.group(), group);
        assert_eq!(directive.address(), address);
        assert_eq!(directive.weight(), weight);
    }

    #[rstest]
    #[case("10.0.0.1:7070")]
    #[case("users=10.0.0.1")]
    #[case("users=10.0.0.1:7070*0")]
    #[case("users=10.0.0.1:7070*heavy")]
    #[case("users=:7070")]
    fn rejects_malformed_directives(#[case] input: &str) {
        assert!(input.parse::<UpstreamDirective>().is_err(), "{input} accepted");
    }

    #[test]
    fn groups_keep_declaration_order() {
        let directives = vec![
            UpstreamDirective::new("a", "h1:1", 1),
            UpstreamDirective::new("b", "h2:2", 2),
            UpstreamDirective::new("a", "h3:3", 3),
        ];
        let groups = group_upstreams(&directives);
        assert_eq!(
            groups.get("a"),
            Some(&vec![("h1:1".to_owned(), 1), ("h3:3".to_owned(), 3)])
        );
        assert_eq!(groups.get("b").map(Vec::len), Some(1));
    }
}
