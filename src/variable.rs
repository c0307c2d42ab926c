//! Variable tables and value-reference resolution.
//!
//! Every slave publishes an ordered table of scalar variables. Only
//! canonical (non-alias) entries take part in coupling; aliases mirror a
//! canonical variable and never own storage of their own.

use serde::{Deserialize, Serialize};

use crate::types::{AliasKind, ScalarType, ValueReference};

/// One published coupling point of a slave.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    /// Variable name, used as the result column header
    pub name: String,
    /// Value reference, unique within the slave
    pub value_reference: ValueReference,
    /// Scalar type
    #[serde(rename = "type")]
    pub scalar_type: ScalarType,
    /// Alias kind
    #[serde(default)]
    pub alias: AliasKind,
}

impl VariableDescriptor {
    /// Creates a canonical (non-alias) descriptor.
    pub fn new(name: impl Into<String>, value_reference: ValueReference, scalar_type: ScalarType) -> Self {
        Self {
            name: name.into(),
            value_reference,
            scalar_type,
            alias: AliasKind::None,
        }
    }

    /// Sets the alias kind of this descriptor.
    pub fn with_alias(mut self, alias: AliasKind) -> Self {
        self.alias = alias;
        self
    }

    /// Returns true if this descriptor owns independent storage.
    pub fn is_canonical(&self) -> bool {
        self.alias == AliasKind::None
    }
}

/// The ordered variable table of a slave. Read-only once loaded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableTable {
    variables: Vec<VariableDescriptor>,
}

impl VariableTable {
    /// Creates a table from descriptors in declaration order.
    pub fn new(variables: Vec<VariableDescriptor>) -> Self {
        Self { variables }
    }

    /// Returns all descriptors in table order.
    pub fn iter(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.variables.iter()
    }

    /// Returns the canonical descriptors in table order.
    pub fn canonical(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.variables.iter().filter(|v| v.is_canonical())
    }

    /// Returns the number of descriptors, aliases included.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Returns true if the table has no descriptors.
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

impl FromIterator<VariableDescriptor> for VariableTable {
    fn from_iter<I: IntoIterator<Item = VariableDescriptor>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Stateless lookup of coupling endpoints.
pub struct VariableResolver;

impl VariableResolver {
    /// Finds the first canonical descriptor with the given value reference.
    ///
    /// Aliases are skipped even when their value reference matches, so a
    /// reference shared by a canonical variable and its aliases always
    /// resolves to the canonical one.
    pub fn resolve(table: &VariableTable, value_ref: ValueReference) -> Option<&VariableDescriptor> {
        table
            .iter()
            .find(|v| v.is_canonical() && v.value_reference == value_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> VariableTable {
        VariableTable::new(vec![
            VariableDescriptor::new("x_alias", 0, ScalarType::Real).with_alias(AliasKind::Alias),
            VariableDescriptor::new("x", 0, ScalarType::Real),
            VariableDescriptor::new("flag", 1, ScalarType::Boolean),
            VariableDescriptor::new("neg", 2, ScalarType::Real).with_alias(AliasKind::NegatedAlias),
        ])
    }

    #[test]
    fn test_resolve_skips_aliases() {
        let table = table();
        let found = VariableResolver::resolve(&table, 0).unwrap();
        assert_eq!(found.name, "x");
        assert_eq!(found.scalar_type, ScalarType::Real);
    }

    #[test]
    fn test_resolve_alias_only_reference() {
        let table = table();
        assert!(VariableResolver::resolve(&table, 2).is_none());
        assert!(VariableResolver::resolve(&table, 99).is_none());
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let table = table();
        let a = VariableResolver::resolve(&table, 1);
        let b = VariableResolver::resolve(&table, 1);
        assert_eq!(a, b);
        assert_eq!(a.unwrap().name, "flag");
    }

    #[test]
    fn test_canonical_iter() {
        let table = table();
        let names: Vec<_> = table.canonical().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["x", "flag"]);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_descriptor_yaml() {
        let yaml = "{ name: y, value_reference: 3, type: integer }";
        let desc: VariableDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(desc.value_reference, 3);
        assert_eq!(desc.scalar_type, ScalarType::Integer);
        assert!(desc.is_canonical());
    }
}
