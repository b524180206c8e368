//! Intrinsic definitions.
//!
//! An intrinsic is a named builtin operator. Its definition records a type
//! template over abstract labels (`T`, `U`, ...), whether it aggregates
//! securely, how it relates to placements, and whether the compiler can
//! reduce it to a body built from more primitive intrinsics.
//!
//! # Design
//!
//! The registry is an explicit immutable object. It is built once with
//! [`IntrinsicRegistry::standard`] and passed by reference to the passes and
//! executors that need it; nothing mutates it during a compilation run.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::types::{Placement, Type};

/// Intrinsic URIs.
pub mod uri {
    pub const FEDERATED_AGGREGATE: &str = "federated_aggregate";
    pub const FEDERATED_APPLY: &str = "federated_apply";
    pub const FEDERATED_BROADCAST: &str = "federated_broadcast";
    pub const FEDERATED_EVAL_AT_CLIENTS: &str = "federated_eval_at_clients";
    pub const FEDERATED_EVAL_AT_SERVER: &str = "federated_eval_at_server";
    pub const FEDERATED_MAP: &str = "federated_map";
    pub const FEDERATED_MAP_ALL_EQUAL: &str = "federated_map_all_equal";
    pub const FEDERATED_MEAN: &str = "federated_mean";
    pub const FEDERATED_WEIGHTED_MEAN: &str = "federated_weighted_mean";
    pub const FEDERATED_SUM: &str = "federated_sum";
    pub const FEDERATED_SECURE_SUM: &str = "federated_secure_sum";
    pub const FEDERATED_SECURE_SUM_BITWIDTH: &str = "federated_secure_sum_bitwidth";
    pub const FEDERATED_SECURE_MODULAR_SUM: &str = "federated_secure_modular_sum";
    pub const FEDERATED_SECURE_SELECT: &str = "federated_secure_select";
    pub const FEDERATED_SELECT: &str = "federated_select";
    pub const FEDERATED_VALUE_AT_CLIENTS: &str = "federated_value_at_clients";
    pub const FEDERATED_VALUE_AT_SERVER: &str = "federated_value_at_server";
    pub const FEDERATED_ZIP_AT_CLIENTS: &str = "federated_zip_at_clients";
    pub const FEDERATED_ZIP_AT_SERVER: &str = "federated_zip_at_server";
    pub const SEQUENCE_MAP: &str = "sequence_map";
    pub const SEQUENCE_REDUCE: &str = "sequence_reduce";
    pub const SEQUENCE_SUM: &str = "sequence_sum";
    pub const GENERIC_PLUS: &str = "generic_plus";
    pub const GENERIC_MULTIPLY: &str = "generic_multiply";
    pub const GENERIC_DIVIDE: &str = "generic_divide";
    pub const GENERIC_ZERO: &str = "generic_zero";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationKind {
    Default,
    Secure,
}

/// How an intrinsic relates to placements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementBehavior {
    /// Operates on unplaced values.
    Unplaced,
    /// Consumes and produces values at one placement.
    SinglePlacement,
    /// Moves values between placements.
    CrossPlacement,
}

/// Type signature of an intrinsic.
#[derive(Debug, Clone, PartialEq)]
pub enum Signature {
    Template(Type),
    /// Struct of values at a placement, zipped into one federated struct.
    Zip(Placement),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntrinsicDef {
    pub uri: &'static str,
    pub signature: Signature,
    pub aggregation: AggregationKind,
    pub placement: PlacementBehavior,
    /// A lower-level body exists for this intrinsic.
    pub reducible: bool,
}

impl IntrinsicDef {
    pub fn is_secure(&self) -> bool {
        self.aggregation == AggregationKind::Secure
    }
}

/// Bindings of abstract labels produced by unification.
pub type Bindings = IndexMap<String, Type>;

/// Lookup from URI to definition.
#[derive(Debug, Clone, Default)]
pub struct IntrinsicRegistry {
    defs: IndexMap<&'static str, IntrinsicDef>,
}

impl IntrinsicRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The full intrinsic catalog.
    pub fn standard() -> Self {
        use PlacementBehavior::{CrossPlacement, SinglePlacement, Unplaced};

        let t = || Type::abstract_type("T");
        let u = || Type::abstract_type("U");
        let fun = |param: Type, result: Type| Type::function(Some(param), result);
        let select = || {
            fun(
                Type::unnamed(vec![
                    Type::at_clients(Type::abstract_type("K")),
                    Type::at_server(Type::abstract_type("M")),
                    Type::at_server(Type::abstract_type("S")),
                    fun(
                        Type::unnamed(vec![Type::abstract_type("S"), Type::abstract_type("K")]),
                        Type::abstract_type("E"),
                    ),
                ]),
                Type::at_clients(Type::sequence(Type::abstract_type("E"))),
            )
        };
        let bounded_sum = || {
            fun(
                Type::unnamed(vec![Type::at_clients(t()), Type::abstract_type("B")]),
                Type::at_server(t()),
            )
        };
        let binary = |result: Type| fun(Type::unnamed(vec![t(), u()]), result);

        let mut registry = Self::empty();
        let mut add = |uri: &'static str,
                       signature: Type,
                       aggregation: AggregationKind,
                       placement: PlacementBehavior,
                       reducible: bool| {
            registry.register(IntrinsicDef {
                uri,
                signature: Signature::Template(signature),
                aggregation,
                placement,
                reducible,
            });
        };

        add(
            uri::FEDERATED_AGGREGATE,
            fun(
                Type::unnamed(vec![
                    Type::at_clients(Type::abstract_type("V")),
                    Type::abstract_type("A"),
                    fun(
                        Type::unnamed(vec![Type::abstract_type("A"), Type::abstract_type("V")]),
                        Type::abstract_type("A"),
                    ),
                    fun(
                        Type::unnamed(vec![Type::abstract_type("A"), Type::abstract_type("A")]),
                        Type::abstract_type("A"),
                    ),
                    fun(Type::abstract_type("A"), Type::abstract_type("R")),
                ]),
                Type::at_server(Type::abstract_type("R")),
            ),
            AggregationKind::Default,
            CrossPlacement,
            false,
        );
        add(
            uri::FEDERATED_APPLY,
            fun(
                Type::unnamed(vec![fun(t(), u()), Type::at_server(t())]),
                Type::at_server(u()),
            ),
            AggregationKind::Default,
            SinglePlacement,
            false,
        );
        add(
            uri::FEDERATED_BROADCAST,
            fun(
                Type::at_server(t()),
                Type::federated(t(), Placement::Clients, true),
            ),
            AggregationKind::Default,
            CrossPlacement,
            false,
        );
        add(
            uri::FEDERATED_EVAL_AT_CLIENTS,
            fun(Type::function(None, t()), Type::at_clients(t())),
            AggregationKind::Default,
            SinglePlacement,
            false,
        );
        add(
            uri::FEDERATED_EVAL_AT_SERVER,
            fun(Type::function(None, t()), Type::at_server(t())),
            AggregationKind::Default,
            SinglePlacement,
            false,
        );
        add(
            uri::FEDERATED_MAP,
            fun(
                Type::unnamed(vec![fun(t(), u()), Type::at_clients(t())]),
                Type::at_clients(u()),
            ),
            AggregationKind::Default,
            SinglePlacement,
            false,
        );
        add(
            uri::FEDERATED_MAP_ALL_EQUAL,
            fun(
                Type::unnamed(vec![
                    fun(t(), u()),
                    Type::federated(t(), Placement::Clients, true),
                ]),
                Type::federated(u(), Placement::Clients, true),
            ),
            AggregationKind::Default,
            SinglePlacement,
            false,
        );
        add(
            uri::FEDERATED_MEAN,
            fun(Type::at_clients(t()), Type::at_server(t())),
            AggregationKind::Default,
            CrossPlacement,
            true,
        );
        add(
            uri::FEDERATED_WEIGHTED_MEAN,
            fun(
                Type::unnamed(vec![Type::at_clients(t()), Type::at_clients(u())]),
                Type::at_server(t()),
            ),
            AggregationKind::Default,
            CrossPlacement,
            true,
        );
        add(
            uri::FEDERATED_SUM,
            fun(Type::at_clients(t()), Type::at_server(t())),
            AggregationKind::Default,
            CrossPlacement,
            true,
        );
        add(uri::FEDERATED_SECURE_SUM, bounded_sum(), AggregationKind::Secure, CrossPlacement, true);
        add(
            uri::FEDERATED_SECURE_SUM_BITWIDTH,
            bounded_sum(),
            AggregationKind::Secure,
            CrossPlacement,
            true,
        );
        add(
            uri::FEDERATED_SECURE_MODULAR_SUM,
            bounded_sum(),
            AggregationKind::Secure,
            CrossPlacement,
            true,
        );
        add(uri::FEDERATED_SECURE_SELECT, select(), AggregationKind::Secure, CrossPlacement, true);
        add(uri::FEDERATED_SELECT, select(), AggregationKind::Default, CrossPlacement, false);
        add(
            uri::FEDERATED_VALUE_AT_CLIENTS,
            fun(t(), Type::federated(t(), Placement::Clients, true)),
            AggregationKind::Default,
            SinglePlacement,
            false,
        );
        add(
            uri::FEDERATED_VALUE_AT_SERVER,
            fun(t(), Type::at_server(t())),
            AggregationKind::Default,
            SinglePlacement,
            false,
        );
        add(
            uri::SEQUENCE_MAP,
            fun(
                Type::unnamed(vec![fun(t(), u()), Type::sequence(t())]),
                Type::sequence(u()),
            ),
            AggregationKind::Default,
            Unplaced,
            false,
        );
        add(
            uri::SEQUENCE_REDUCE,
            fun(
                Type::unnamed(vec![
                    Type::sequence(t()),
                    u(),
                    fun(Type::unnamed(vec![u(), t()]), u()),
                ]),
                u(),
            ),
            AggregationKind::Default,
            Unplaced,
            false,
        );
        add(
            uri::SEQUENCE_SUM,
            fun(Type::sequence(t()), t()),
            AggregationKind::Default,
            Unplaced,
            false,
        );
        add(
            uri::GENERIC_PLUS,
            fun(Type::unnamed(vec![t(), t()]), t()),
            AggregationKind::Default,
            Unplaced,
            true,
        );
        add(uri::GENERIC_MULTIPLY, binary(t()), AggregationKind::Default, Unplaced, true);
        add(uri::GENERIC_DIVIDE, binary(t()), AggregationKind::Default, Unplaced, true);
        add(uri::GENERIC_ZERO, t(), AggregationKind::Default, Unplaced, true);

        for (uri, placement) in [
            (uri::FEDERATED_ZIP_AT_CLIENTS, Placement::Clients),
            (uri::FEDERATED_ZIP_AT_SERVER, Placement::Server),
        ] {
            registry.register(IntrinsicDef {
                uri,
                signature: Signature::Zip(placement),
                aggregation: AggregationKind::Default,
                placement: SinglePlacement,
                reducible: false,
            });
        }

        registry
    }

    /// Add a definition, replacing any previous one with the same URI.
    pub fn register(&mut self, def: IntrinsicDef) {
        self.defs.insert(def.uri, def);
    }

    pub fn get(&self, uri: &str) -> Option<&IntrinsicDef> {
        self.defs.get(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.defs.contains_key(uri)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IntrinsicDef> {
        self.defs.values()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Check that `ty` is an instance of the signature registered for `uri`.
    pub fn check_signature(&self, uri: &str, ty: &Type) -> Result<Bindings> {
        let def = self
            .get(uri)
            .ok_or_else(|| Error::UnknownIntrinsic(uri.to_string()))?;
        let mut bindings = Bindings::new();
        let matches = match &def.signature {
            Signature::Template(template) => unify(template, ty, &mut bindings),
            Signature::Zip(placement) => is_zip_at(*placement, ty),
        };
        if matches {
            Ok(bindings)
        } else {
            Err(Error::signature(uri, ty))
        }
    }
}

/// Match `concrete` against `template`, binding abstract labels.
///
/// A label bound twice must be bound to equivalent types. Struct names and
/// containers in `concrete` are ignored; placements and `all_equal` flags
/// must match exactly.
pub fn unify(template: &Type, concrete: &Type, bindings: &mut Bindings) -> bool {
    match (template, concrete) {
        (Type::Abstract(label), _) => match bindings.get(label) {
            Some(bound) => bound.is_equivalent_to(concrete),
            None => {
                bindings.insert(label.clone(), concrete.clone());
                true
            }
        },
        (Type::Tensor(template), Type::Tensor(concrete)) => template == concrete,
        (Type::Struct(template), Type::Struct(concrete)) => {
            template.len() == concrete.len()
                && template
                    .types()
                    .zip(concrete.types())
                    .all(|(template, concrete)| unify(template, concrete, bindings))
        }
        (Type::Sequence(template), Type::Sequence(concrete)) => {
            unify(template, concrete, bindings)
        }
        (Type::Function(template), Type::Function(concrete)) => {
            let parameters = match (template.parameter(), concrete.parameter()) {
                (None, None) => true,
                (Some(template), Some(concrete)) => unify(template, concrete, bindings),
                _ => false,
            };
            parameters && unify(&template.result, &concrete.result, bindings)
        }
        (Type::Federated(template), Type::Federated(concrete)) => {
            template.placement == concrete.placement
                && template.all_equal == concrete.all_equal
                && unify(&template.member, &concrete.member, bindings)
        }
        _ => false,
    }
}

fn is_zip_at(placement: Placement, ty: &Type) -> bool {
    let Some(ft) = ty.as_function() else {
        return false;
    };
    let (Some(Type::Struct(parameter)), Type::Federated(result)) =
        (ft.parameter(), ft.result())
    else {
        return false;
    };
    let Some(members) = result.member.as_struct() else {
        return false;
    };
    result.placement == placement
        && !parameter.is_empty()
        && parameter.len() == members.len()
        && parameter.types().zip(members.types()).all(|(element, member)| {
            element.as_federated().is_some_and(|ft| {
                ft.placement == placement && ft.member.is_equivalent_to(member)
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_catalog() {
        let registry = IntrinsicRegistry::standard();
        assert_eq!(registry.len(), 26);
        assert!(registry.get(uri::FEDERATED_SECURE_SUM).unwrap().is_secure());
        assert!(!registry.get(uri::FEDERATED_SUM).unwrap().is_secure());
        assert_eq!(
            registry.get(uri::FEDERATED_BROADCAST).unwrap().placement,
            PlacementBehavior::CrossPlacement
        );
    }

    #[test]
    fn checks_map_signature() {
        let registry = IntrinsicRegistry::standard();
        let ty = Type::function(
            Some(Type::unnamed(vec![
                Type::function(Some(Type::int32()), Type::float32()),
                Type::at_clients(Type::int32()),
            ])),
            Type::at_clients(Type::float32()),
        );
        let bindings = registry.check_signature(uri::FEDERATED_MAP, &ty).unwrap();
        assert_eq!(bindings.get("T"), Some(&Type::int32()));
        assert_eq!(bindings.get("U"), Some(&Type::float32()));

        let wrong = Type::function(
            Some(Type::unnamed(vec![
                Type::function(Some(Type::int32()), Type::float32()),
                Type::at_clients(Type::int32()),
            ])),
            Type::at_clients(Type::int32()),
        );
        assert!(matches!(
            registry.check_signature(uri::FEDERATED_MAP, &wrong),
            Err(Error::IntrinsicSignature { .. })
        ));
    }

    #[test]
    fn rejects_unknown_uri() {
        let registry = IntrinsicRegistry::standard();
        assert!(matches!(
            registry.check_signature("intrinsic", &Type::int32()),
            Err(Error::UnknownIntrinsic(_))
        ));
    }

    #[test]
    fn checks_zip_signature() {
        let registry = IntrinsicRegistry::standard();
        let ty = Type::function(
            Some(Type::unnamed(vec![
                Type::at_server(Type::int32()),
                Type::at_server(Type::float32()),
            ])),
            Type::at_server(Type::unnamed(vec![Type::int32(), Type::float32()])),
        );
        assert!(registry.check_signature(uri::FEDERATED_ZIP_AT_SERVER, &ty).is_ok());
        assert!(registry
            .check_signature(uri::FEDERATED_ZIP_AT_CLIENTS, &ty)
            .is_err());
    }

    #[test]
    fn generic_zero_is_not_a_function() {
        let registry = IntrinsicRegistry::standard();
        assert!(registry
            .check_signature(uri::GENERIC_ZERO, &Type::float32())
            .is_ok());
    }
}
