//! Couplings between slaves and their propagation.
//!
//! A coupling copies one scalar from a source slave's variable to a target
//! slave's variable once per macro step. Endpoints are resolved against the
//! variable tables exactly once, when the graph is built; propagation then
//! works on the resolved references and types only.
//!
//! # Example
//!
//! ```
//! use cosim::connection::{ConnectionGraph, CouplingSpec};
//! use cosim::mock::MockComponent;
//! use cosim::registry::SlaveRegistry;
//!
//! let mut registry = SlaveRegistry::new();
//! registry.add(Box::new(MockComponent::ramp("source")));
//! registry.add(Box::new(MockComponent::gain("sink", 2.0)));
//!
//! // source.y (ref 0) drives sink.u (ref 0)
//! let graph = ConnectionGraph::build(&[CouplingSpec::new(0, 0, 1, 0)], &registry).unwrap();
//! assert_eq!(graph.active_count(), 1);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConnectionError;
use crate::registry::SlaveRegistry;
use crate::types::{ScalarType, SlaveIndex, ValueReference};
use crate::variable::VariableResolver;

/// One side of a coupling: a slave and one of its value references.
///
/// Serialized as a two-element sequence `[slave, value_ref]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(SlaveIndex, ValueReference)", into = "(SlaveIndex, ValueReference)")]
pub struct Endpoint {
    pub slave: SlaveIndex,
    pub value_ref: ValueReference,
}

impl From<(SlaveIndex, ValueReference)> for Endpoint {
    fn from((slave, value_ref): (SlaveIndex, ValueReference)) -> Self {
        Self { slave, value_ref }
    }
}

impl From<Endpoint> for (SlaveIndex, ValueReference) {
    fn from(endpoint: Endpoint) -> Self {
        (endpoint.slave, endpoint.value_ref)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.slave, self.value_ref)
    }
}

/// A requested coupling `from → to`, as given by the configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CouplingSpec {
    pub from: Endpoint,
    pub to: Endpoint,
}

impl CouplingSpec {
    /// Creates a coupling from `(from_slave, from_ref)` to `(to_slave, to_ref)`.
    pub fn new(
        from_slave: SlaveIndex,
        from_ref: ValueReference,
        to_slave: SlaveIndex,
        to_ref: ValueReference,
    ) -> Self {
        Self {
            from: Endpoint::from((from_slave, from_ref)),
            to: Endpoint::from((to_slave, to_ref)),
        }
    }

    /// Decodes a flattened list of `4×M` integers
    /// `(fromSlave, fromRef, toSlave, toRef)*`.
    pub fn from_flat(values: &[i64]) -> Result<Vec<Self>, String> {
        if values.len() % 4 != 0 {
            return Err(format!(
                "coupling list has {} integers, expected a multiple of 4",
                values.len()
            ));
        }
        values
            .chunks_exact(4)
            .enumerate()
            .map(|(i, chunk)| -> Result<Self, String> {
                let field = |pos: usize| -> Result<u64, String> {
                    u64::try_from(chunk[pos])
                        .map_err(|_| format!("coupling {i} has a negative entry: {}", chunk[pos]))
                };
                let slave = |pos: usize| -> Result<SlaveIndex, String> {
                    usize::try_from(field(pos)?).map_err(|_| format!("coupling {i}: slave index too large"))
                };
                let value_ref = |pos: usize| -> Result<ValueReference, String> {
                    ValueReference::try_from(field(pos)?)
                        .map_err(|_| format!("coupling {i}: value reference too large"))
                };
                Ok(Self::new(slave(0)?, value_ref(1)?, slave(2)?, value_ref(3)?))
            })
            .collect()
    }
}

impl fmt::Display for CouplingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// A validated coupling with its resolved scalar type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Coupling {
    pub spec: CouplingSpec,
    pub scalar_type: ScalarType,
}

/// Counters of one propagation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PropagationStats {
    /// Values copied from a source to a target
    pub transferred: u64,
    /// Couplings whose read or write reported a fatal status
    pub failed: u64,
}

/// The static coupling graph of a run.
///
/// Holds slave indices only; the registry keeps ownership of the slaves.
#[derive(Clone, Debug, Default)]
pub struct ConnectionGraph {
    couplings: Vec<Coupling>,
    disabled: Vec<ConnectionError>,
}

impl ConnectionGraph {
    /// Resolves and type-checks every requested coupling.
    ///
    /// An endpoint that names an unknown slave or matches no canonical
    /// variable fails the whole build. A coupling whose endpoint types
    /// differ is logged, recorded in [`ConnectionGraph::disabled`] and
    /// skipped; the other couplings are kept.
    pub fn build(specs: &[CouplingSpec], registry: &SlaveRegistry) -> Result<Self, ConnectionError> {
        let mut graph = Self::default();
        for spec in specs {
            let from_type = resolve_endpoint(registry, spec.from)?;
            let to_type = resolve_endpoint(registry, spec.to)?;
            if from_type != to_type {
                let err = ConnectionError::TypeMismatch {
                    from_slave: spec.from.slave,
                    from_ref: spec.from.value_ref,
                    from_type,
                    to_slave: spec.to.slave,
                    to_ref: spec.to.value_ref,
                    to_type,
                };
                warn!(coupling = %spec, "{err}; coupling disabled");
                graph.disabled.push(err);
                continue;
            }
            graph.couplings.push(Coupling {
                spec: *spec,
                scalar_type: from_type,
            });
        }
        Ok(graph)
    }

    /// Copies every active coupling's source value to its target.
    ///
    /// All sources are read before any target is written, so the values
    /// moved in one pass never depend on each other, including chains such
    /// as `a → b, b → c` and couplings within a single slave.
    ///
    /// A read or write that reports a fatal status is logged and counted;
    /// the value is not written and the pass continues.
    pub fn propagate(&self, registry: &mut SlaveRegistry) -> crate::error::MasterResult<PropagationStats> {
        let mut stats = PropagationStats::default();
        let mut values = Vec::with_capacity(self.couplings.len());

        for coupling in &self.couplings {
            let from = coupling.spec.from;
            let (status, value) = registry.get_value(from.slave, coupling.scalar_type, from.value_ref)?;
            if status.is_fatal() {
                warn!(coupling = %coupling.spec, %status, "could not read coupling source");
                stats.failed += 1;
                values.push(None);
            } else {
                values.push(Some(value));
            }
        }

        for (coupling, value) in self.couplings.iter().zip(values) {
            let Some(value) = value else { continue };
            let to = coupling.spec.to;
            let status = registry.set_value(to.slave, to.value_ref, &value)?;
            if status.is_fatal() {
                warn!(coupling = %coupling.spec, %status, "could not write coupling target");
                stats.failed += 1;
            } else {
                stats.transferred += 1;
            }
        }

        Ok(stats)
    }

    /// Returns the active couplings in declaration order.
    pub fn couplings(&self) -> &[Coupling] {
        &self.couplings
    }

    /// Returns the couplings skipped because of a type mismatch.
    pub fn disabled(&self) -> &[ConnectionError] {
        &self.disabled
    }

    /// Returns the number of active couplings.
    pub fn active_count(&self) -> usize {
        self.couplings.len()
    }
}

fn resolve_endpoint(registry: &SlaveRegistry, endpoint: Endpoint) -> Result<ScalarType, ConnectionError> {
    let table = registry
        .variables(endpoint.slave)
        .ok_or(ConnectionError::UnknownSlave {
            slave: endpoint.slave,
            count: registry.len(),
        })?;
    VariableResolver::resolve(table, endpoint.value_ref)
        .map(|v| v.scalar_type)
        .ok_or(ConnectionError::UnknownVariable {
            slave: endpoint.slave,
            value_ref: endpoint.value_ref,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockComponent;
    use crate::types::{AliasKind, ScalarValue};
    use crate::variable::VariableDescriptor;

    fn initialized(registry: &mut SlaveRegistry) {
        registry.instantiate_all(false).unwrap();
        registry.initialize_all(0.0, 1.0).unwrap();
    }

    fn typed(name: &str) -> MockComponent {
        MockComponent::new(
            name,
            vec![
                VariableDescriptor::new("r", 0, ScalarType::Real),
                VariableDescriptor::new("i", 1, ScalarType::Integer),
                VariableDescriptor::new("b", 2, ScalarType::Boolean),
                VariableDescriptor::new("s", 3, ScalarType::String),
                VariableDescriptor::new("e", 4, ScalarType::Enumeration),
            ],
        )
    }

    #[test]
    fn test_flat_decoding() {
        let specs = CouplingSpec::from_flat(&[0, 0, 1, 0, 1, 2, 0, 3]).unwrap();
        assert_eq!(specs, vec![CouplingSpec::new(0, 0, 1, 0), CouplingSpec::new(1, 2, 0, 3)]);
        assert!(CouplingSpec::from_flat(&[0, 0, 1]).is_err());
        assert!(CouplingSpec::from_flat(&[0, -1, 1, 0]).is_err());
        assert!(CouplingSpec::from_flat(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_endpoint_serde() {
        let spec: CouplingSpec = serde_yaml::from_str("{ from: [0, 3], to: [2, 1] }").unwrap();
        assert_eq!(spec, CouplingSpec::new(0, 3, 2, 1));
        assert_eq!(spec.to_string(), "(0, 3) -> (2, 1)");
    }

    #[test]
    fn test_build_unknown_variable() {
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(MockComponent::ramp("a")));
        registry.add(Box::new(MockComponent::gain("b", 1.0)));

        let err = ConnectionGraph::build(&[CouplingSpec::new(0, 0, 1, 9)], &registry).unwrap_err();
        assert_eq!(err, ConnectionError::UnknownVariable { slave: 1, value_ref: 9 });
    }

    #[test]
    fn test_build_unknown_slave() {
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(MockComponent::ramp("a")));
        let err = ConnectionGraph::build(&[CouplingSpec::new(0, 0, 3, 0)], &registry).unwrap_err();
        assert_eq!(err, ConnectionError::UnknownSlave { slave: 3, count: 1 });
    }

    #[test]
    fn test_alias_is_not_an_endpoint() {
        let source = MockComponent::new(
            "src",
            vec![
                VariableDescriptor::new("y_alias", 5, ScalarType::Real).with_alias(AliasKind::Alias),
                VariableDescriptor::new("y", 0, ScalarType::Real),
            ],
        );
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(source));
        registry.add(Box::new(MockComponent::gain("dst", 1.0)));

        let err = ConnectionGraph::build(&[CouplingSpec::new(0, 5, 1, 0)], &registry).unwrap_err();
        assert_eq!(err, ConnectionError::UnknownVariable { slave: 0, value_ref: 5 });
    }

    #[test]
    fn test_alias_sharing_reference_resolves_to_canonical_type() {
        let source = MockComponent::new(
            "src",
            vec![
                VariableDescriptor::new("flag_alias", 0, ScalarType::Boolean)
                    .with_alias(AliasKind::NegatedAlias),
                VariableDescriptor::new("y", 0, ScalarType::Real),
            ],
        );
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(source));
        registry.add(Box::new(MockComponent::gain("dst", 1.0)));

        let graph = ConnectionGraph::build(&[CouplingSpec::new(0, 0, 1, 0)], &registry).unwrap();
        assert_eq!(graph.couplings()[0].scalar_type, ScalarType::Real);
        assert!(graph.disabled().is_empty());
    }

    #[test]
    fn test_type_mismatch_is_skipped() {
        let src = typed("src");
        let dst = typed("dst");
        let dst_monitor = dst.monitor();
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(
            src.with_value(0, ScalarValue::Real(4.0))
                .with_value(4, ScalarValue::Enumeration(2)),
        ));
        registry.add(Box::new(dst));

        let specs = [
            CouplingSpec::new(0, 0, 1, 1), // Real -> Integer
            CouplingSpec::new(0, 4, 1, 1), // Enumeration -> Integer
            CouplingSpec::new(0, 0, 1, 0), // Real -> Real
        ];
        let graph = ConnectionGraph::build(&specs, &registry).unwrap();
        assert_eq!(graph.active_count(), 1);
        assert_eq!(graph.disabled().len(), 2);
        assert!(matches!(
            graph.disabled()[0],
            ConnectionError::TypeMismatch { from_type: ScalarType::Real, to_type: ScalarType::Integer, .. }
        ));

        initialized(&mut registry);
        let stats = graph.propagate(&mut registry).unwrap();
        assert_eq!(stats.transferred, 1);
        assert_eq!(dst_monitor.value(1), Some(ScalarValue::Integer(0)));
        assert_eq!(dst_monitor.value(0), Some(ScalarValue::Real(4.0)));
    }

    #[test]
    fn test_propagate_copies_every_type() {
        let src = typed("src")
            .with_value(0, ScalarValue::Real(1.25))
            .with_value(1, ScalarValue::Integer(-7))
            .with_value(2, ScalarValue::Boolean(true))
            .with_value(3, ScalarValue::String("hello".to_string()))
            .with_value(4, ScalarValue::Enumeration(3));
        let dst = typed("dst");
        let dst_monitor = dst.monitor();
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(src));
        registry.add(Box::new(dst));

        let specs: Vec<_> = (0..5).map(|vr| CouplingSpec::new(0, vr, 1, vr)).collect();
        let graph = ConnectionGraph::build(&specs, &registry).unwrap();
        initialized(&mut registry);

        let stats = graph.propagate(&mut registry).unwrap();
        assert_eq!(stats, PropagationStats { transferred: 5, failed: 0 });
        assert_eq!(dst_monitor.value(0), Some(ScalarValue::Real(1.25)));
        assert_eq!(dst_monitor.value(1), Some(ScalarValue::Integer(-7)));
        assert_eq!(dst_monitor.value(2), Some(ScalarValue::Boolean(true)));
        assert_eq!(dst_monitor.value(3), Some(ScalarValue::String("hello".to_string())));
        assert_eq!(dst_monitor.value(4), Some(ScalarValue::Enumeration(3)));
    }

    #[test]
    fn test_propagate_reads_before_writing() {
        // Within one slave: 0 -> 1 and 1 -> 2. A single pass must move the
        // old value of 1 into 2, not the freshly written one.
        let component = MockComponent::new(
            "chain",
            vec![
                VariableDescriptor::new("a", 0, ScalarType::Real),
                VariableDescriptor::new("b", 1, ScalarType::Real),
                VariableDescriptor::new("c", 2, ScalarType::Real),
            ],
        )
        .with_value(0, ScalarValue::Real(1.0))
        .with_value(1, ScalarValue::Real(2.0));
        let monitor = component.monitor();
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(component));

        let graph = ConnectionGraph::build(
            &[CouplingSpec::new(0, 0, 0, 1), CouplingSpec::new(0, 1, 0, 2)],
            &registry,
        )
        .unwrap();
        initialized(&mut registry);
        graph.propagate(&mut registry).unwrap();

        assert_eq!(monitor.value(1), Some(ScalarValue::Real(1.0)));
        assert_eq!(monitor.value(2), Some(ScalarValue::Real(2.0)));
    }

    #[test]
    fn test_propagate_failed_read_skips_write() {
        let src = MockComponent::new("src", vec![VariableDescriptor::new("y", 0, ScalarType::Real)]);
        let src_monitor = src.monitor();
        let dst = MockComponent::gain("dst", 1.0).with_value(0, ScalarValue::Real(9.0));
        let dst_monitor = dst.monitor();
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(src));
        registry.add(Box::new(dst));
        let graph = ConnectionGraph::build(&[CouplingSpec::new(0, 0, 1, 0)], &registry).unwrap();
        initialized(&mut registry);

        // Corrupt the source so the typed read fails.
        src_monitor.set_value(0, ScalarValue::Boolean(true));
        let stats = graph.propagate(&mut registry).unwrap();

        assert_eq!(stats, PropagationStats { transferred: 0, failed: 1 });
        assert_eq!(dst_monitor.value(0), Some(ScalarValue::Real(9.0)));
    }

    #[test]
    fn test_propagate_requires_instances() {
        let mut registry = SlaveRegistry::new();
        registry.add(Box::new(MockComponent::ramp("a")));
        registry.add(Box::new(MockComponent::gain("b", 1.0)));
        let graph = ConnectionGraph::build(&[CouplingSpec::new(0, 0, 1, 0)], &registry).unwrap();
        assert!(graph.propagate(&mut registry).is_err());
    }
}
