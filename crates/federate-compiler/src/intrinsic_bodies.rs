//! Intrinsic bodies - lowering reducible intrinsics to primitive ones
//!
//! A body is built per call site from the intrinsic's concrete function type,
//! so the generic element type of the definition is already specialised.
//!
//! | intrinsic                        | body                                          |
//! |----------------------------------|-----------------------------------------------|
//! | `federated_sum`                  | `federated_aggregate` with zero/plus/identity |
//! | `federated_mean`                 | aggregate of `<total,count>`, divide report   |
//! | `federated_weighted_mean`        | zip, scale, aggregate of `<total,weight>`     |
//! | `generic_plus/multiply/divide`   | lambda over a compiled binary kernel          |
//! | `generic_zero`                   | call of a compiled zero kernel                |
//!
//! Secure intrinsics have bodies too, flagged `secure`: they trade the secure
//! protocol for its plaintext equivalent and only run through
//! [`replace_secure_intrinsics_with_insecure_bodies`].
//!
//! # Pipeline Position
//!
//! ```text
//! Build → Replace intrinsic bodies → Tree transformations → Execute
//!         ^^^^^^^^^^^^^^^^^^^^^^^^
//! ```

use federate_ir::factory;
use federate_ir::names::DEFAULT_PREFIX;
use federate_ir::{
    uri, BuildingBlock, Comp, Error, KernelOp, Literal, NameGenerator, Placement, Result, Type,
};
use indexmap::IndexMap;
use tracing::{debug, instrument};

use crate::transformation_utils::transform_postorder;

/// Builds a body for one call site from the intrinsic's concrete type.
pub type BodyBuilder = fn(&Type, &mut NameGenerator) -> Result<Comp>;

#[derive(Debug, Clone)]
pub struct IntrinsicBody {
    pub uri: &'static str,
    /// The body drops a secure aggregation protocol.
    pub secure: bool,
    builder: BodyBuilder,
}

impl IntrinsicBody {
    pub fn new(uri: &'static str, secure: bool, builder: BodyBuilder) -> Self {
        Self {
            uri,
            secure,
            builder,
        }
    }

    /// Body specialised to `ty`, with binder names drawn from `names`.
    pub fn build(&self, ty: &Type, names: &mut NameGenerator) -> Result<Comp> {
        (self.builder)(ty, names)
    }
}

/// URI to body lookup, built once and shared by reference.
#[derive(Debug, Clone, Default)]
pub struct BodyTable {
    bodies: IndexMap<&'static str, IntrinsicBody>,
}

impl BodyTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let entries: [(&'static str, bool, BodyBuilder); 11] = [
            (uri::FEDERATED_SUM, false, sum_body),
            (uri::FEDERATED_MEAN, false, mean_body),
            (uri::FEDERATED_WEIGHTED_MEAN, false, weighted_mean_body),
            (uri::GENERIC_PLUS, false, generic_plus_body),
            (uri::GENERIC_MULTIPLY, false, generic_multiply_body),
            (uri::GENERIC_DIVIDE, false, generic_divide_body),
            (uri::GENERIC_ZERO, false, generic_zero_body),
            (uri::FEDERATED_SECURE_SUM, true, secure_sum_body),
            (uri::FEDERATED_SECURE_SUM_BITWIDTH, true, secure_sum_body),
            (uri::FEDERATED_SECURE_MODULAR_SUM, true, secure_modular_sum_body),
            (uri::FEDERATED_SECURE_SELECT, true, secure_select_body),
        ];
        let mut table = Self::empty();
        for (uri, secure, builder) in entries {
            table.register(IntrinsicBody::new(uri, secure, builder));
        }
        table
    }

    pub fn register(&mut self, body: IntrinsicBody) {
        self.bodies.insert(body.uri, body);
    }

    pub fn get(&self, uri: &str) -> Option<&IntrinsicBody> {
        self.bodies.get(uri)
    }

    /// `uri` has a non-secure body.
    pub fn is_reducible(&self, uri: &str) -> bool {
        self.get(uri).is_some_and(|body| !body.secure)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IntrinsicBody> {
        self.bodies.values()
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

/// Replace every intrinsic with a non-secure body until none remains.
///
/// Bodies may introduce further reducible intrinsics (a sum body uses
/// `generic_plus`), so replacement repeats until a round changes nothing.
/// Secure intrinsics are left untouched.
#[instrument(skip_all)]
pub fn replace_intrinsics_with_bodies(comp: &Comp, bodies: &BodyTable) -> Result<(Comp, bool)> {
    let mut names = NameGenerator::for_tree(comp, DEFAULT_PREFIX);
    let mut current = comp.clone();
    let mut modified = false;
    loop {
        let (next, changed) = replace_matching(&current, bodies, false, &mut names)?;
        if !changed {
            break;
        }
        modified = true;
        current = next;
    }
    debug!(modified, "replace_intrinsics_with_bodies");
    Ok((current, modified))
}

/// Replace secure intrinsics with their plaintext equivalents.
///
/// Intrinsics introduced by the replacement (such as `federated_sum`) are
/// kept. Types are preserved up to struct containers.
#[instrument(skip_all)]
pub fn replace_secure_intrinsics_with_insecure_bodies(
    comp: &Comp,
    bodies: &BodyTable,
) -> Result<(Comp, bool)> {
    let mut names = NameGenerator::for_tree(comp, DEFAULT_PREFIX);
    let (result, modified) = replace_matching(comp, bodies, true, &mut names)?;
    debug!(modified, "replace_secure_intrinsics_with_insecure_bodies");
    Ok((result, modified))
}

fn replace_matching(
    comp: &Comp,
    bodies: &BodyTable,
    secure: bool,
    names: &mut NameGenerator,
) -> Result<(Comp, bool)> {
    transform_postorder(comp, &mut |node| {
        let body = node
            .intrinsic_uri()
            .and_then(|uri| bodies.get(uri))
            .filter(|body| body.secure == secure);
        match body {
            Some(body) => {
                debug!(uri = body.uri, "replacing intrinsic with body");
                Ok((body.build(node.type_signature(), names)?, true))
            }
            None => Ok((node, false)),
        }
    })
}

// === Bodies ===

fn signature(ty: &Type) -> Result<(&Type, &Type)> {
    let ft = ty.as_function().ok_or_else(|| Error::NotAFunction(ty.clone()))?;
    let parameter = ft.parameter().ok_or_else(|| Error::MissingArgument {
        function: ty.clone(),
    })?;
    Ok((parameter, ft.result()))
}

fn clients_member(ty: &Type) -> Result<Type> {
    match ty.as_federated() {
        Some(ft) if ft.placement == Placement::Clients => Ok((*ft.member).clone()),
        _ => Err(Error::TypeMismatch {
            expected: Type::at_clients(ty.without_placement()),
            found: ty.clone(),
        }),
    }
}

fn element(source: &Comp, index: usize) -> Result<Comp> {
    BuildingBlock::select_index(source.clone(), index)
}

fn plus(left: Comp, right: Comp) -> Result<Comp> {
    factory::create_generic_binary(uri::GENERIC_PLUS, left, right)
}

/// `(s -> <plus(s[0][0],s[1][0]), plus(s[0][1],s[1][1])>)` over pairs.
fn pairwise_plus(pair: &Type, names: &mut NameGenerator) -> Result<Comp> {
    let name = names.next_name();
    let parameter_type = Type::unnamed(vec![pair.clone(), pair.clone()]);
    let s = BuildingBlock::reference(name.clone(), parameter_type.clone());
    let left = element(&s, 0)?;
    let right = element(&s, 1)?;
    let first = plus(element(&left, 0)?, element(&right, 0)?)?;
    let second = plus(element(&left, 1)?, element(&right, 1)?)?;
    Ok(BuildingBlock::lambda(
        name,
        parameter_type,
        BuildingBlock::struct_of(vec![first, second]),
    ))
}

/// `(r -> generic_divide(<r[0],r[1]>))` over a pair.
fn divide_report(pair: &Type, names: &mut NameGenerator) -> Result<Comp> {
    let name = names.next_name();
    let r = BuildingBlock::reference(name.clone(), pair.clone());
    let quotient =
        factory::create_generic_binary(uri::GENERIC_DIVIDE, element(&r, 0)?, element(&r, 1)?)?;
    Ok(BuildingBlock::lambda(name, pair.clone(), quotient))
}

fn sum_body(ty: &Type, names: &mut NameGenerator) -> Result<Comp> {
    let (parameter, _) = signature(ty)?;
    let member = clients_member(parameter)?;
    let arg = names.next_name();
    let value = BuildingBlock::reference(arg.clone(), parameter.clone());
    let zero = factory::create_generic_zero(member.clone());
    let generic_plus = BuildingBlock::intrinsic(
        uri::GENERIC_PLUS,
        Type::function(
            Some(Type::unnamed(vec![member.clone(), member.clone()])),
            member.clone(),
        ),
    );
    let report = factory::create_identity_function(&names.next_name(), member);
    let aggregate =
        factory::create_federated_aggregate(value, zero, generic_plus.clone(), generic_plus, report)?;
    Ok(BuildingBlock::lambda(arg, parameter.clone(), aggregate))
}

fn mean_body(ty: &Type, names: &mut NameGenerator) -> Result<Comp> {
    let (parameter, _) = signature(ty)?;
    let member = clients_member(parameter)?;
    let count = Type::float32();
    let accumulator = Type::unnamed(vec![member.clone(), count.clone()]);

    let zero = BuildingBlock::struct_of(vec![
        factory::create_generic_zero(member.clone()),
        factory::create_constant(Literal::Float(0.0), count.clone())?,
    ]);

    let acc_name = names.next_name();
    let acc_type = Type::unnamed(vec![accumulator.clone(), member.clone()]);
    let acc = BuildingBlock::reference(acc_name.clone(), acc_type.clone());
    let running = element(&acc, 0)?;
    let accumulate = BuildingBlock::lambda(
        acc_name,
        acc_type,
        BuildingBlock::struct_of(vec![
            plus(element(&running, 0)?, element(&acc, 1)?)?,
            plus(
                element(&running, 1)?,
                factory::create_constant(Literal::Float(1.0), count)?,
            )?,
        ]),
    );
    let merge = pairwise_plus(&accumulator, names)?;
    let report = divide_report(&accumulator, names)?;

    let arg = names.next_name();
    let value = BuildingBlock::reference(arg.clone(), parameter.clone());
    let aggregate = factory::create_federated_aggregate(value, zero, accumulate, merge, report)?;
    Ok(BuildingBlock::lambda(arg, parameter.clone(), aggregate))
}

fn weighted_mean_body(ty: &Type, names: &mut NameGenerator) -> Result<Comp> {
    let (parameter, _) = signature(ty)?;
    let arg = names.next_name();
    let p = BuildingBlock::reference(arg.clone(), parameter.clone());
    let values = element(&p, 0)?;
    let weights = element(&p, 1)?;
    let member = clients_member(values.type_signature())?;
    let weight = clients_member(weights.type_signature())?;
    let pair = Type::unnamed(vec![member.clone(), weight.clone()]);

    let zipped = factory::create_federated_zip(BuildingBlock::struct_of(vec![values, weights]))?;
    let scale_name = names.next_name();
    let q = BuildingBlock::reference(scale_name.clone(), pair.clone());
    let scaled = factory::create_generic_binary(
        uri::GENERIC_MULTIPLY,
        element(&q, 0)?,
        element(&q, 1)?,
    )?;
    let scale = BuildingBlock::lambda(
        scale_name,
        pair.clone(),
        BuildingBlock::struct_of(vec![scaled, element(&q, 1)?]),
    );
    let weighted = factory::create_federated_map(scale, zipped)?;

    let zero = BuildingBlock::struct_of(vec![
        factory::create_generic_zero(member),
        factory::create_generic_zero(weight),
    ]);
    let accumulate = pairwise_plus(&pair, names)?;
    let merge = pairwise_plus(&pair, names)?;
    let report = divide_report(&pair, names)?;
    let aggregate = factory::create_federated_aggregate(weighted, zero, accumulate, merge, report)?;
    Ok(BuildingBlock::lambda(arg, parameter.clone(), aggregate))
}

fn binary_kernel_body(
    ty: &Type,
    names: &mut NameGenerator,
    kernel: &str,
    op: KernelOp,
) -> Result<Comp> {
    let (parameter, _) = signature(ty)?;
    let name = names.next_name();
    let compiled = factory::create_compiled_kernel(kernel, op, ty.clone());
    let call = BuildingBlock::call(
        compiled,
        Some(BuildingBlock::reference(name.clone(), parameter.clone())),
    )?;
    Ok(BuildingBlock::lambda(name, parameter.clone(), call))
}

fn generic_plus_body(ty: &Type, names: &mut NameGenerator) -> Result<Comp> {
    binary_kernel_body(ty, names, "add", KernelOp::Add)
}

fn generic_multiply_body(ty: &Type, names: &mut NameGenerator) -> Result<Comp> {
    binary_kernel_body(ty, names, "multiply", KernelOp::Multiply)
}

fn generic_divide_body(ty: &Type, names: &mut NameGenerator) -> Result<Comp> {
    binary_kernel_body(ty, names, "divide", KernelOp::Divide)
}

fn generic_zero_body(ty: &Type, _names: &mut NameGenerator) -> Result<Comp> {
    let kernel = factory::create_compiled_kernel("zero", KernelOp::Zero, Type::function(None, ty.clone()));
    BuildingBlock::call(kernel, None)
}

/// Shared by `federated_secure_sum` and `federated_secure_sum_bitwidth`; the
/// bound is dropped.
fn secure_sum_body(ty: &Type, names: &mut NameGenerator) -> Result<Comp> {
    let (parameter, _) = signature(ty)?;
    let arg = names.next_name();
    let p = BuildingBlock::reference(arg.clone(), parameter.clone());
    let sum = factory::create_federated_sum(element(&p, 0)?)?;
    Ok(BuildingBlock::lambda(arg, parameter.clone(), sum))
}

/// Modulus applied per client and again to the total.
///
/// The compiled kernels produce container-free structs, so the body's type is
/// equivalent, not identical, to the intrinsic's.
fn secure_modular_sum_body(ty: &Type, names: &mut NameGenerator) -> Result<Comp> {
    let (parameter, _) = signature(ty)?;
    let arg = names.next_name();
    let p = BuildingBlock::reference(arg.clone(), parameter.clone());
    let value = element(&p, 0)?;
    let modulus = element(&p, 1)?;
    let member = clients_member(value.type_signature())?;
    let reduced = member.without_containers();
    let modulus_type = modulus.type_signature().clone();

    let modulo_kernel = |input: &Type| {
        factory::create_compiled_kernel(
            "modulo",
            KernelOp::Modulo,
            Type::function(
                Some(Type::unnamed(vec![input.clone(), modulus_type.clone()])),
                reduced.clone(),
            ),
        )
    };

    let modulus_at_clients = factory::create_federated_value(modulus.clone(), Placement::Clients)?;
    let client_pairs =
        factory::create_federated_zip(BuildingBlock::struct_of(vec![value, modulus_at_clients]))?;
    let client_reduced = factory::create_federated_map(modulo_kernel(&member), client_pairs)?;
    let total = factory::create_federated_sum(client_reduced)?;
    let modulus_at_server = factory::create_federated_value(modulus, Placement::Server)?;
    let server_pair =
        factory::create_federated_zip(BuildingBlock::struct_of(vec![total, modulus_at_server]))?;
    let result = factory::create_federated_apply(modulo_kernel(&reduced), server_pair)?;
    Ok(BuildingBlock::lambda(arg, parameter.clone(), result))
}

fn secure_select_body(ty: &Type, _names: &mut NameGenerator) -> Result<Comp> {
    Ok(BuildingBlock::intrinsic(uri::FEDERATED_SELECT, ty.clone()))
}
