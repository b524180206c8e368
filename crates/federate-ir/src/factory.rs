//! Building-block factory.
//!
//! Helpers that assemble well-typed intrinsic calls. Each helper computes the
//! intrinsic's concrete function type from its arguments, so callers never
//! spell out signatures by hand.

use crate::building_block::{BuildingBlock, Comp};
use crate::error::{Error, Result};
use crate::intrinsics::uri;
use crate::kernel::{KernelOp, KernelProto, Literal};
use crate::names::{NameGenerator, DEFAULT_PREFIX};
use crate::types::{FederatedType, Placement, StructType, Type};

/// `(name -> name)` over `ty`.
pub fn create_identity_function(name: &str, ty: Type) -> Comp {
    BuildingBlock::lambda(name, ty.clone(), BuildingBlock::reference(name, ty))
}

/// A compiled kernel returning its argument unchanged.
pub fn create_compiled_identity(ty: Type, name: Option<&str>) -> Comp {
    create_compiled_kernel(
        name.unwrap_or("identity"),
        KernelOp::Identity,
        Type::function(Some(ty.clone()), ty),
    )
}

pub fn create_compiled_kernel(name: &str, op: KernelOp, ty: Type) -> Comp {
    BuildingBlock::compiled(KernelProto::new(name, op), ty)
}

/// Call of a no-argument kernel producing `literal` as a value of `ty`.
pub fn create_constant(literal: Literal, ty: Type) -> Result<Comp> {
    let kernel = create_compiled_kernel("constant", KernelOp::Constant(literal), Type::function(None, ty));
    BuildingBlock::call(kernel, None)
}

pub fn create_generic_zero(ty: Type) -> Comp {
    BuildingBlock::intrinsic(uri::GENERIC_ZERO, ty)
}

/// `uri(<left,right>)` for a generic binary operator; the result has the type
/// of `left`.
pub fn create_generic_binary(op_uri: &str, left: Comp, right: Comp) -> Result<Comp> {
    let result = left.type_signature().clone();
    let arg = BuildingBlock::struct_of(vec![left, right]);
    call_intrinsic(op_uri, arg, result)
}

pub fn create_federated_map(function: Comp, arg: Comp) -> Result<Comp> {
    let result = function_result(&function)?;
    federated(&arg, Some(Placement::Clients))?;
    map_like(uri::FEDERATED_MAP, function, arg, Type::at_clients(result))
}

pub fn create_federated_map_all_equal(function: Comp, arg: Comp) -> Result<Comp> {
    let result = function_result(&function)?;
    federated(&arg, Some(Placement::Clients))?;
    map_like(
        uri::FEDERATED_MAP_ALL_EQUAL,
        function,
        arg,
        Type::federated(result, Placement::Clients, true),
    )
}

pub fn create_federated_apply(function: Comp, arg: Comp) -> Result<Comp> {
    let result = function_result(&function)?;
    federated(&arg, Some(Placement::Server))?;
    map_like(uri::FEDERATED_APPLY, function, arg, Type::at_server(result))
}

/// `federated_map`, `federated_map_all_equal` or `federated_apply`, chosen
/// from the placement of `arg`.
pub fn create_federated_map_or_apply(function: Comp, arg: Comp) -> Result<Comp> {
    let (placement, all_equal) = {
        let ft = federated(&arg, None)?;
        (ft.placement, ft.all_equal)
    };
    match (placement, all_equal) {
        (Placement::Clients, false) => create_federated_map(function, arg),
        (Placement::Clients, true) => create_federated_map_all_equal(function, arg),
        (Placement::Server, _) => create_federated_apply(function, arg),
    }
}

pub fn create_federated_broadcast(value: Comp) -> Result<Comp> {
    let member = (*federated(&value, Some(Placement::Server))?.member).clone();
    call_intrinsic(
        uri::FEDERATED_BROADCAST,
        value,
        Type::federated(member, Placement::Clients, true),
    )
}

pub fn create_federated_value(value: Comp, placement: Placement) -> Result<Comp> {
    if value.type_signature().is_federated() {
        return Err(Error::InvalidComputation(format!(
            "cannot place value of federated type {}",
            value.type_signature()
        )));
    }
    let op_uri = match placement {
        Placement::Clients => uri::FEDERATED_VALUE_AT_CLIENTS,
        Placement::Server => uri::FEDERATED_VALUE_AT_SERVER,
    };
    let result = Type::federated(value.type_signature().clone(), placement, true);
    call_intrinsic(op_uri, value, result)
}

/// `federated_eval_at_*` of a no-argument function.
pub fn create_federated_eval(function: Comp, placement: Placement) -> Result<Comp> {
    let ft = function
        .type_signature()
        .as_function()
        .ok_or_else(|| Error::NotAFunction(function.type_signature().clone()))?;
    if ft.parameter().is_some() {
        return Err(Error::UnexpectedArgument {
            function: function.type_signature().clone(),
        });
    }
    let member = ft.result().clone();
    let (op_uri, result) = match placement {
        Placement::Clients => (uri::FEDERATED_EVAL_AT_CLIENTS, Type::at_clients(member)),
        Placement::Server => (uri::FEDERATED_EVAL_AT_SERVER, Type::at_server(member)),
    };
    call_intrinsic(op_uri, function, result)
}

/// Zip a struct of values at one placement into one federated struct.
///
/// Element names and the struct container carry over to the member type.
pub fn create_federated_zip(value: Comp) -> Result<Comp> {
    let st = value
        .type_signature()
        .as_struct()
        .filter(|st| !st.is_empty())
        .ok_or_else(|| {
            Error::InvalidComputation(format!(
                "federated zip expects a non-empty struct, found {}",
                value.type_signature()
            ))
        })?;
    let mut placement = None;
    let mut members = Vec::with_capacity(st.len());
    for (name, ty) in &st.elements {
        let ft = ty.as_federated().ok_or_else(|| Error::TypeMismatch {
            expected: Type::at_server(ty.clone()),
            found: ty.clone(),
        })?;
        match placement {
            None => placement = Some(ft.placement),
            Some(first) if first != ft.placement => {
                return Err(Error::MultiplePlacements {
                    first,
                    second: ft.placement,
                })
            }
            Some(_) => {}
        }
        members.push((name.clone(), (*ft.member).clone()));
    }
    let member = Type::Struct(StructType {
        elements: members,
        container: st.container,
    });
    let (op_uri, result) = match placement {
        Some(Placement::Server) => (uri::FEDERATED_ZIP_AT_SERVER, Type::at_server(member)),
        _ => (uri::FEDERATED_ZIP_AT_CLIENTS, Type::at_clients(member)),
    };
    call_intrinsic(op_uri, value, result)
}

/// Split a federated struct into a struct of federated values.
pub fn create_federated_unzip(value: Comp) -> Result<Comp> {
    let member = (*federated(&value, None)?.member).clone();
    let st = member.as_struct().ok_or_else(|| {
        Error::InvalidComputation(format!(
            "federated unzip expects a struct member, found {member}"
        ))
    })?;
    let mut elements = Vec::with_capacity(st.len());
    for (index, (name, _)) in st.elements.iter().enumerate() {
        let selector = BuildingBlock::select_index(BuildingBlock::reference("x", member.clone()), index)?;
        let select_fn = BuildingBlock::lambda("x", member.clone(), selector);
        elements.push((name.clone(), create_federated_map_or_apply(select_fn, value.clone())?));
    }
    match st.container {
        Some(container) => BuildingBlock::structure_with_container(elements, container),
        None => BuildingBlock::structure(elements),
    }
}

pub fn create_federated_sum(value: Comp) -> Result<Comp> {
    let member = (*federated(&value, Some(Placement::Clients))?.member).clone();
    call_intrinsic(uri::FEDERATED_SUM, value, Type::at_server(member))
}

/// `federated_mean`, or `federated_weighted_mean` when `weight` is given.
pub fn create_federated_mean(value: Comp, weight: Option<Comp>) -> Result<Comp> {
    let member = (*federated(&value, Some(Placement::Clients))?.member).clone();
    match weight {
        None => call_intrinsic(uri::FEDERATED_MEAN, value, Type::at_server(member)),
        Some(weight) => {
            federated(&weight, Some(Placement::Clients))?;
            call_intrinsic(
                uri::FEDERATED_WEIGHTED_MEAN,
                BuildingBlock::struct_of(vec![value, weight]),
                Type::at_server(member),
            )
        }
    }
}

pub fn create_federated_aggregate(
    value: Comp,
    zero: Comp,
    accumulate: Comp,
    merge: Comp,
    report: Comp,
) -> Result<Comp> {
    federated(&value, Some(Placement::Clients))?;
    let result = function_result(&report)?;
    call_intrinsic(
        uri::FEDERATED_AGGREGATE,
        BuildingBlock::struct_of(vec![value, zero, accumulate, merge, report]),
        Type::at_server(result),
    )
}

pub fn create_federated_secure_sum(value: Comp, max_input: Comp) -> Result<Comp> {
    bounded_sum(uri::FEDERATED_SECURE_SUM, value, max_input)
}

pub fn create_federated_secure_sum_bitwidth(value: Comp, bitwidth: Comp) -> Result<Comp> {
    bounded_sum(uri::FEDERATED_SECURE_SUM_BITWIDTH, value, bitwidth)
}

pub fn create_federated_secure_modular_sum(value: Comp, modulus: Comp) -> Result<Comp> {
    bounded_sum(uri::FEDERATED_SECURE_MODULAR_SUM, value, modulus)
}

/// `federated_select` or `federated_secure_select`.
pub fn create_federated_select(
    client_keys: Comp,
    max_key: Comp,
    server_state: Comp,
    select_fn: Comp,
    secure: bool,
) -> Result<Comp> {
    federated(&client_keys, Some(Placement::Clients))?;
    federated(&max_key, Some(Placement::Server))?;
    federated(&server_state, Some(Placement::Server))?;
    let element = function_result(&select_fn)?;
    let op_uri = if secure {
        uri::FEDERATED_SECURE_SELECT
    } else {
        uri::FEDERATED_SELECT
    };
    call_intrinsic(
        op_uri,
        BuildingBlock::struct_of(vec![client_keys, max_key, server_state, select_fn]),
        Type::at_clients(Type::sequence(element)),
    )
}

pub fn create_sequence_map(function: Comp, arg: Comp) -> Result<Comp> {
    let result = function_result(&function)?;
    if arg.type_signature().as_sequence().is_none() {
        return Err(Error::TypeMismatch {
            expected: Type::sequence(result),
            found: arg.type_signature().clone(),
        });
    }
    map_like(uri::SEQUENCE_MAP, function, arg, Type::sequence(result))
}

pub fn create_sequence_sum(arg: Comp) -> Result<Comp> {
    let element = arg
        .type_signature()
        .as_sequence()
        .cloned()
        .ok_or_else(|| Error::InvalidComputation(format!(
            "sequence sum expects a sequence, found {}",
            arg.type_signature()
        )))?;
    call_intrinsic(uri::SEQUENCE_SUM, arg, element)
}

/// Name generator that avoids every name occurring in `comp`.
pub fn unique_name_generator(comp: &BuildingBlock, prefix: Option<&str>) -> NameGenerator {
    NameGenerator::for_tree(comp, prefix.unwrap_or(DEFAULT_PREFIX))
}

fn bounded_sum(op_uri: &str, value: Comp, bound: Comp) -> Result<Comp> {
    let member = (*federated(&value, Some(Placement::Clients))?.member).clone();
    call_intrinsic(
        op_uri,
        BuildingBlock::struct_of(vec![value, bound]),
        Type::at_server(member),
    )
}

fn map_like(op_uri: &str, function: Comp, arg: Comp, result: Type) -> Result<Comp> {
    call_intrinsic(op_uri, BuildingBlock::struct_of(vec![function, arg]), result)
}

fn call_intrinsic(op_uri: &str, arg: Comp, result: Type) -> Result<Comp> {
    let intrinsic = BuildingBlock::intrinsic(
        op_uri,
        Type::function(Some(arg.type_signature().clone()), result),
    );
    BuildingBlock::call(intrinsic, Some(arg))
}

fn function_result(function: &Comp) -> Result<Type> {
    function
        .type_signature()
        .as_function()
        .map(|ft| ft.result().clone())
        .ok_or_else(|| Error::NotAFunction(function.type_signature().clone()))
}

fn federated(value: &Comp, placement: Option<Placement>) -> Result<&FederatedType> {
    let ty = value.type_signature();
    match ty.as_federated() {
        Some(ft) if placement.map_or(true, |p| p == ft.placement) => Ok(ft),
        _ => {
            let expected = match placement {
                Some(p) => Type::federated(ty.without_placement(), p, p == Placement::Server),
                None => Type::at_clients(ty.without_placement()),
            };
            Err(Error::TypeMismatch {
                expected,
                found: ty.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Container;

    #[test]
    fn federated_map_of_identity() {
        let data = BuildingBlock::data("data", Type::at_clients(Type::int32()));
        let call = create_federated_map(create_identity_function("a", Type::int32()), data).unwrap();
        assert_eq!(call.compact_representation(), "federated_map(<(a -> a),data>)");
        assert_eq!(call.type_signature(), &Type::at_clients(Type::int32()));
    }

    #[test]
    fn map_or_apply_follows_placement() {
        let id = create_identity_function("x", Type::int32());
        let server = BuildingBlock::reference("x", Type::at_server(Type::int32()));
        let applied = create_federated_map_or_apply(id.clone(), server).unwrap();
        assert_eq!(
            applied.compact_representation(),
            "federated_apply(<(x -> x),x>)"
        );
        let all_equal = BuildingBlock::reference(
            "y",
            Type::federated(Type::int32(), Placement::Clients, true),
        );
        let mapped = create_federated_map_or_apply(id, all_equal).unwrap();
        assert!(mapped
            .compact_representation()
            .starts_with("federated_map_all_equal"));
    }

    #[test]
    fn zip_keeps_container() {
        let a = create_federated_value(BuildingBlock::data("x", Type::int32()), Placement::Server)
            .unwrap();
        let b = create_federated_value(BuildingBlock::data("x", Type::float32()), Placement::Server)
            .unwrap();
        let tuple =
            BuildingBlock::structure_with_container(vec![(None, a), (None, b)], Container::Tuple)
                .unwrap();
        let zipped = create_federated_zip(tuple).unwrap();
        assert_eq!(
            zipped.type_signature(),
            &Type::at_server(
                Type::unnamed(vec![Type::int32(), Type::float32()]).with_container(Container::Tuple)
            )
        );
    }

    #[test]
    fn zip_rejects_mixed_placements() {
        let a = BuildingBlock::data("a", Type::at_server(Type::int32()));
        let b = BuildingBlock::data("b", Type::at_clients(Type::int32()));
        let err = create_federated_zip(BuildingBlock::struct_of(vec![a, b])).unwrap_err();
        assert!(matches!(err, Error::MultiplePlacements { .. }));
    }

    #[test]
    fn unzip_then_zip_round_trips_type() {
        let list = Type::unnamed(vec![Type::int32(), Type::float32()]).with_container(Container::List);
        let value = BuildingBlock::reference("tup", Type::at_server(list.clone()));
        let unzipped = create_federated_unzip(value).unwrap();
        let zipped = create_federated_zip(unzipped).unwrap();
        assert_eq!(zipped.type_signature(), &Type::at_server(list));
    }

    #[test]
    fn map_requires_clients_value() {
        let id = create_identity_function("x", Type::int32());
        let server = BuildingBlock::data("s", Type::at_server(Type::int32()));
        assert!(matches!(
            create_federated_map(id, server),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn secure_select_signature() {
        let keys = BuildingBlock::data("keys", Type::at_clients(Type::int32()));
        let max_key = BuildingBlock::data("max", Type::at_server(Type::int32()));
        let state = BuildingBlock::data("state", Type::at_server(Type::float32()));
        let select_fn = BuildingBlock::data(
            "select",
            Type::function(
                Some(Type::unnamed(vec![Type::float32(), Type::int32()])),
                Type::float32(),
            ),
        );
        let call = create_federated_select(keys, max_key, state, select_fn, true).unwrap();
        assert_eq!(
            call.type_signature(),
            &Type::at_clients(Type::sequence(Type::float32()))
        );
    }
}
