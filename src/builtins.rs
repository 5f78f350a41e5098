//! The builtin shading functions: type signatures registered into the
//! symbol table and the implementations the machine calls through `CALL_n`.
//!
//! Most functions are registered twice, once per storage class, so that
//! uniform-only call sites resolve to uniform signatures and never allocate
//! varying temporaries. The implementations read the storage off their
//! argument values, so one function body serves both registrations.

use crate::color;
use crate::context::{LightKind, ShadingContext};
use crate::error::{ErrorCode, ErrorPolicy};
use crate::symbol::{Signature, SymbolKind, SymbolTable};
use crate::value::{Value, ValueStorage, ValueType};
use glam::{Mat4, Vec3};
use std::sync::OnceLock;

/// Everything a builtin sees: the external oracles, the grid length, the
/// evaluated arguments, and the result slot.
pub struct BuiltinCall<'a> {
    pub context: &'a ShadingContext,
    pub error_policy: &'a dyn ErrorPolicy,
    pub grid_size: usize,
    pub arguments: &'a [Value],
    pub result: &'a mut Value,
}

pub type BuiltinFn = fn(&mut BuiltinCall);

pub struct BuiltinDescriptor {
    pub name: &'static str,
    pub parameters: Vec<(ValueType, ValueStorage)>,
    pub return_type: ValueType,
    /// The result is varying no matter the arguments (`ambient`).
    pub varying_result: bool,
    /// The call stores its result back through the first argument.
    pub writes_first_argument: bool,
    pub function: BuiltinFn,
}

pub fn builtins() -> &'static [BuiltinDescriptor] {
    static TABLE: OnceLock<Vec<BuiltinDescriptor>> = OnceLock::new();
    TABLE.get_or_init(descriptors)
}

/// Register every builtin signature into the table's global scope.
pub fn register_builtins(table: &mut SymbolTable) {
    for (index, descriptor) in builtins().iter().enumerate() {
        let id = match table.find_symbol(descriptor.name) {
            Some(id) => id,
            None => {
                let id = table
                    .add_symbol(descriptor.name)
                    .expect("builtin registered twice");
                let symbol = table.symbol_mut(id);
                symbol.kind = SymbolKind::Builtin;
                symbol.ty = descriptor.return_type;
                id
            }
        };
        table.symbol_mut(id).signatures.push(Signature {
            parameters: descriptor.parameters.clone(),
            return_type: descriptor.return_type,
            builtin: index,
            varying_result: descriptor.varying_result,
            writes_first_argument: descriptor.writes_first_argument,
        });
    }
}

fn descriptors() -> Vec<BuiltinDescriptor> {
    let mut table = Vec::new();

    // Registers the uniform and varying storage variants of one signature.
    // String parameters stay uniform in both.
    fn add(
        table: &mut Vec<BuiltinDescriptor>,
        name: &'static str,
        parameters: &[ValueType],
        return_type: ValueType,
        function: BuiltinFn,
    ) {
        for storage in [ValueStorage::Uniform, ValueStorage::Varying] {
            table.push(BuiltinDescriptor {
                name,
                parameters: parameters
                    .iter()
                    .map(|&ty| {
                        let storage = if ty == ValueType::String {
                            ValueStorage::Uniform
                        } else {
                            storage
                        };
                        (ty, storage)
                    })
                    .collect(),
                return_type,
                varying_result: false,
                writes_first_argument: false,
                function,
            });
        }
    }

    use ValueType::{Color, Float, Normal, Point, String as Str, Vector, Void};

    add(&mut table, "radians", &[Float], Float, builtin_radians);
    add(&mut table, "degrees", &[Float], Float, builtin_degrees);
    add(&mut table, "sin", &[Float], Float, builtin_sin);
    add(&mut table, "asin", &[Float], Float, builtin_asin);
    add(&mut table, "cos", &[Float], Float, builtin_cos);
    add(&mut table, "acos", &[Float], Float, builtin_acos);
    add(&mut table, "tan", &[Float], Float, builtin_tan);
    add(&mut table, "atan", &[Float], Float, builtin_atan);
    add(&mut table, "atan", &[Float, Float], Float, builtin_atan2);
    add(&mut table, "pow", &[Float, Float], Float, builtin_pow);
    add(&mut table, "exp", &[Float], Float, builtin_exp);
    add(&mut table, "log", &[Float], Float, builtin_log);
    add(&mut table, "sqrt", &[Float], Float, builtin_sqrt);
    add(&mut table, "inversesqrt", &[Float], Float, builtin_inversesqrt);
    add(&mut table, "abs", &[Float], Float, builtin_abs);
    add(&mut table, "sign", &[Float], Float, builtin_sign);
    add(&mut table, "floor", &[Float], Float, builtin_floor);
    add(&mut table, "ceil", &[Float], Float, builtin_ceil);
    add(&mut table, "round", &[Float], Float, builtin_round);
    add(&mut table, "mod", &[Float, Float], Float, builtin_mod);
    add(&mut table, "min", &[Float, Float], Float, builtin_min);
    add(&mut table, "max", &[Float, Float], Float, builtin_max);
    add(&mut table, "clamp", &[Float, Float, Float], Float, builtin_clamp);
    add(&mut table, "step", &[Float, Float], Float, builtin_step);
    add(
        &mut table,
        "smoothstep",
        &[Float, Float, Float],
        Float,
        builtin_smoothstep,
    );
    add(&mut table, "mix", &[Float, Float, Float], Float, builtin_mix_float);
    add(&mut table, "mix", &[Color, Color, Float], Color, builtin_mix_vec3);
    add(&mut table, "noise", &[Float], Float, builtin_noise1);
    add(&mut table, "noise", &[Float, Float], Float, builtin_noise2);
    add(&mut table, "noise", &[Point], Float, builtin_noise3);

    add(&mut table, "length", &[Vector], Float, builtin_length);
    add(&mut table, "distance", &[Point, Point], Float, builtin_distance);
    add(&mut table, "normalize", &[Vector], Vector, builtin_normalize);
    add(&mut table, "faceforward", &[Vector, Vector], Vector, builtin_faceforward);
    add(&mut table, "reflect", &[Vector, Vector], Vector, builtin_reflect);
    add(
        &mut table,
        "refract",
        &[Vector, Vector, Float],
        Vector,
        builtin_refract,
    );
    add(&mut table, "xcomp", &[Point], Float, builtin_xcomp);
    add(&mut table, "ycomp", &[Point], Float, builtin_ycomp);
    add(&mut table, "zcomp", &[Point], Float, builtin_zcomp);

    // The component index is uniform across the grid in both variants.
    for storage in [ValueStorage::Uniform, ValueStorage::Varying] {
        table.push(BuiltinDescriptor {
            name: "comp",
            parameters: vec![(Color, storage), (Float, ValueStorage::Uniform)],
            return_type: Float,
            varying_result: false,
            writes_first_argument: false,
            function: builtin_comp,
        });
        table.push(BuiltinDescriptor {
            name: "setcomp",
            parameters: vec![
                (Color, storage),
                (Float, ValueStorage::Uniform),
                (Float, storage),
            ],
            return_type: Void,
            varying_result: false,
            writes_first_argument: true,
            function: builtin_setcomp,
        });
    }

    add(&mut table, "ctransform", &[Str, Color], Color, builtin_ctransform);
    add(&mut table, "transform", &[Str, Point], Point, builtin_transform);
    add(
        &mut table,
        "transform",
        &[Str, Str, Point],
        Point,
        builtin_transform,
    );
    add(&mut table, "vtransform", &[Str, Vector], Vector, builtin_vtransform);
    add(
        &mut table,
        "vtransform",
        &[Str, Str, Vector],
        Vector,
        builtin_vtransform,
    );
    add(&mut table, "ntransform", &[Str, Normal], Normal, builtin_ntransform);
    add(
        &mut table,
        "ntransform",
        &[Str, Str, Normal],
        Normal,
        builtin_ntransform,
    );

    table.push(BuiltinDescriptor {
        name: "ambient",
        parameters: Vec::new(),
        return_type: Color,
        varying_result: true,
        writes_first_argument: false,
        function: builtin_ambient,
    });

    table
}

// --- mapping helpers ---

fn at<T: Copy>(buffer: &[T], index: usize) -> T {
    buffer[index % buffer.len()]
}

fn result_shape(arguments: &[Value]) -> ValueStorage {
    if arguments.iter().any(|a| a.storage().is_varying()) {
        ValueStorage::Varying
    } else {
        ValueStorage::Uniform
    }
}

fn map1(call: &mut BuiltinCall, op: impl Fn(f32) -> f32) {
    let storage = result_shape(call.arguments);
    call.result.reset(ValueType::Float, storage, call.grid_size);
    let a = call.arguments[0].floats();
    for (index, r) in call.result.floats_mut().iter_mut().enumerate() {
        *r = op(at(a, index));
    }
}

fn map2(call: &mut BuiltinCall, op: impl Fn(f32, f32) -> f32) {
    let storage = result_shape(call.arguments);
    call.result.reset(ValueType::Float, storage, call.grid_size);
    let a = call.arguments[0].floats();
    let b = call.arguments[1].floats();
    for (index, r) in call.result.floats_mut().iter_mut().enumerate() {
        *r = op(at(a, index), at(b, index));
    }
}

fn map3(call: &mut BuiltinCall, op: impl Fn(f32, f32, f32) -> f32) {
    let storage = result_shape(call.arguments);
    call.result.reset(ValueType::Float, storage, call.grid_size);
    let a = call.arguments[0].floats();
    let b = call.arguments[1].floats();
    let c = call.arguments[2].floats();
    for (index, r) in call.result.floats_mut().iter_mut().enumerate() {
        *r = op(at(a, index), at(b, index), at(c, index));
    }
}

fn map_vec3_to_float(call: &mut BuiltinCall, op: impl Fn(Vec3) -> f32) {
    let storage = result_shape(call.arguments);
    call.result.reset(ValueType::Float, storage, call.grid_size);
    let a = call.arguments[0].vec3s();
    for (index, r) in call.result.floats_mut().iter_mut().enumerate() {
        *r = op(at(a, index));
    }
}

fn map_vec3(call: &mut BuiltinCall, ty: ValueType, op: impl Fn(Vec3) -> Vec3) {
    let storage = result_shape(call.arguments);
    call.result.reset(ty, storage, call.grid_size);
    let a = call.arguments[0].vec3s();
    for (index, r) in call.result.vec3s_mut().iter_mut().enumerate() {
        *r = op(at(a, index));
    }
}

fn map_vec3_2(call: &mut BuiltinCall, ty: ValueType, op: impl Fn(Vec3, Vec3) -> Vec3) {
    let storage = result_shape(call.arguments);
    call.result.reset(ty, storage, call.grid_size);
    let a = call.arguments[0].vec3s();
    let b = call.arguments[1].vec3s();
    for (index, r) in call.result.vec3s_mut().iter_mut().enumerate() {
        *r = op(at(a, index), at(b, index));
    }
}

// --- math ---

fn builtin_radians(call: &mut BuiltinCall) {
    map1(call, f32::to_radians)
}

fn builtin_degrees(call: &mut BuiltinCall) {
    map1(call, f32::to_degrees)
}

fn builtin_sin(call: &mut BuiltinCall) {
    map1(call, f32::sin)
}

fn builtin_asin(call: &mut BuiltinCall) {
    map1(call, f32::asin)
}

fn builtin_cos(call: &mut BuiltinCall) {
    map1(call, f32::cos)
}

fn builtin_acos(call: &mut BuiltinCall) {
    map1(call, f32::acos)
}

fn builtin_tan(call: &mut BuiltinCall) {
    map1(call, f32::tan)
}

fn builtin_atan(call: &mut BuiltinCall) {
    map1(call, f32::atan)
}

fn builtin_atan2(call: &mut BuiltinCall) {
    map2(call, f32::atan2)
}

fn builtin_pow(call: &mut BuiltinCall) {
    map2(call, f32::powf)
}

fn builtin_exp(call: &mut BuiltinCall) {
    map1(call, f32::exp)
}

fn builtin_log(call: &mut BuiltinCall) {
    map1(call, f32::ln)
}

fn builtin_sqrt(call: &mut BuiltinCall) {
    map1(call, f32::sqrt)
}

fn builtin_inversesqrt(call: &mut BuiltinCall) {
    map1(call, |x| 1.0 / x.sqrt())
}

fn builtin_abs(call: &mut BuiltinCall) {
    map1(call, f32::abs)
}

fn builtin_sign(call: &mut BuiltinCall) {
    map1(call, f32::signum)
}

fn builtin_floor(call: &mut BuiltinCall) {
    map1(call, f32::floor)
}

fn builtin_ceil(call: &mut BuiltinCall) {
    map1(call, f32::ceil)
}

fn builtin_round(call: &mut BuiltinCall) {
    map1(call, f32::round)
}

fn builtin_mod(call: &mut BuiltinCall) {
    map2(call, f32::rem_euclid)
}

fn builtin_min(call: &mut BuiltinCall) {
    map2(call, f32::min)
}

fn builtin_max(call: &mut BuiltinCall) {
    map2(call, f32::max)
}

fn builtin_clamp(call: &mut BuiltinCall) {
    map3(call, |x, lo, hi| x.clamp(lo, hi))
}

fn builtin_step(call: &mut BuiltinCall) {
    map2(call, |edge, x| if x < edge { 0.0 } else { 1.0 })
}

fn builtin_smoothstep(call: &mut BuiltinCall) {
    map3(call, |lo, hi, x| {
        let t = ((x - lo) / (hi - lo)).clamp(0.0, 1.0);
        t * t * (3.0 - 2.0 * t)
    })
}

fn builtin_mix_float(call: &mut BuiltinCall) {
    map3(call, |x, y, alpha| x * (1.0 - alpha) + y * alpha)
}

fn builtin_mix_vec3(call: &mut BuiltinCall) {
    let storage = result_shape(call.arguments);
    call.result.reset(ValueType::Color, storage, call.grid_size);
    let x = call.arguments[0].vec3s();
    let y = call.arguments[1].vec3s();
    let alpha = call.arguments[2].floats();
    for (index, r) in call.result.vec3s_mut().iter_mut().enumerate() {
        let t = at(alpha, index);
        *r = at(x, index) * (1.0 - t) + at(y, index) * t;
    }
}

// --- noise ---

/// Smooth hash-gradient value noise in [0, 1].
fn hash_noise(p: Vec3) -> f32 {
    let cell = p.floor();
    let f = p - cell;
    let u = f * f * (Vec3::splat(3.0) - 2.0 * f);

    let hash = |x: i32, y: i32, z: i32| -> f32 {
        let mut h = (x as u32)
            .wrapping_mul(374_761_393)
            .wrapping_add((y as u32).wrapping_mul(668_265_263))
            .wrapping_add((z as u32).wrapping_mul(1_274_126_177));
        h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
        h ^= h >> 16;
        h as f32 / u32::MAX as f32
    };

    let (ix, iy, iz) = (cell.x as i32, cell.y as i32, cell.z as i32);
    let lerp = |a: f32, b: f32, t: f32| a + t * (b - a);

    let c00 = lerp(hash(ix, iy, iz), hash(ix + 1, iy, iz), u.x);
    let c10 = lerp(hash(ix, iy + 1, iz), hash(ix + 1, iy + 1, iz), u.x);
    let c01 = lerp(hash(ix, iy, iz + 1), hash(ix + 1, iy, iz + 1), u.x);
    let c11 = lerp(hash(ix, iy + 1, iz + 1), hash(ix + 1, iy + 1, iz + 1), u.x);
    lerp(lerp(c00, c10, u.y), lerp(c01, c11, u.y), u.z)
}

fn builtin_noise1(call: &mut BuiltinCall) {
    map1(call, |x| hash_noise(Vec3::new(x, 0.0, 0.0)))
}

fn builtin_noise2(call: &mut BuiltinCall) {
    map2(call, |x, y| hash_noise(Vec3::new(x, y, 0.0)))
}

fn builtin_noise3(call: &mut BuiltinCall) {
    map_vec3_to_float(call, hash_noise)
}

// --- geometry ---

fn builtin_length(call: &mut BuiltinCall) {
    map_vec3_to_float(call, |v| v.length())
}

fn builtin_distance(call: &mut BuiltinCall) {
    let storage = result_shape(call.arguments);
    call.result.reset(ValueType::Float, storage, call.grid_size);
    let a = call.arguments[0].vec3s();
    let b = call.arguments[1].vec3s();
    for (index, r) in call.result.floats_mut().iter_mut().enumerate() {
        *r = (at(a, index) - at(b, index)).length();
    }
}

fn builtin_normalize(call: &mut BuiltinCall) {
    map_vec3(call, ValueType::Vector, |v| v.normalize_or_zero())
}

/// Flip `N` so it faces against the incident direction `I`.
fn builtin_faceforward(call: &mut BuiltinCall) {
    map_vec3_2(call, ValueType::Vector, |n, i| {
        if i.dot(n) < 0.0 { n } else { -n }
    })
}

fn builtin_reflect(call: &mut BuiltinCall) {
    map_vec3_2(call, ValueType::Vector, |i, n| i - 2.0 * i.dot(n) * n)
}

fn builtin_refract(call: &mut BuiltinCall) {
    let storage = result_shape(call.arguments);
    call.result.reset(ValueType::Vector, storage, call.grid_size);
    let i = call.arguments[0].vec3s();
    let n = call.arguments[1].vec3s();
    let eta = call.arguments[2].floats();
    for (index, r) in call.result.vec3s_mut().iter_mut().enumerate() {
        let (i, n, eta) = (at(i, index), at(n, index), at(eta, index));
        let cos_i = -i.dot(n);
        let k = 1.0 - eta * eta * (1.0 - cos_i * cos_i);
        *r = if k < 0.0 {
            Vec3::ZERO
        } else {
            eta * i + (eta * cos_i - k.sqrt()) * n
        };
    }
}

fn builtin_xcomp(call: &mut BuiltinCall) {
    map_vec3_to_float(call, |v| v.x)
}

fn builtin_ycomp(call: &mut BuiltinCall) {
    map_vec3_to_float(call, |v| v.y)
}

fn builtin_zcomp(call: &mut BuiltinCall) {
    map_vec3_to_float(call, |v| v.z)
}

// --- color ---

fn builtin_comp(call: &mut BuiltinCall) {
    let color = &call.arguments[0];
    let index = call.arguments[1].float_value() as usize;
    call.result
        .reset(ValueType::Float, color.storage(), call.grid_size);
    let colors = color.vec3s();
    for (i, r) in call.result.floats_mut().iter_mut().enumerate() {
        let c = at(colors, i);
        *r = match index {
            0 => c.x,
            1 => c.y,
            _ => c.z,
        };
    }
}

fn builtin_setcomp(call: &mut BuiltinCall) {
    let color = &call.arguments[0];
    let index = call.arguments[1].float_value() as usize;
    let values = call.arguments[2].floats();
    *call.result = color.clone();
    for (i, c) in call.result.vec3s_mut().iter_mut().enumerate() {
        let v = at(values, i);
        match index {
            0 => c.x = v,
            1 => c.y = v,
            _ => c.z = v,
        }
    }
}

fn builtin_ctransform(call: &mut BuiltinCall) {
    let space = call.arguments[0].string_value().to_string();
    let color = &call.arguments[1];
    call.result
        .reset(ValueType::Color, color.storage(), call.grid_size);
    let source = color.vec3s();

    let conversion: Option<fn(Vec3) -> Vec3> = match space.as_str() {
        "hsv" => Some(color::rgb_from_hsv),
        "hsl" => Some(color::rgb_from_hsl),
        "rgb_to_hsv" => Some(color::hsv_from_rgb),
        "rgb_to_hsl" => Some(color::hsl_from_rgb),
        "rgb" => Some(|c| c),
        _ => None,
    };
    let Some(conversion) = conversion else {
        call.error_policy.error(
            ErrorCode::UnknownColorSpace,
            &format!("Unknown color space '{}'", space),
        );
        for (i, r) in call.result.vec3s_mut().iter_mut().enumerate() {
            *r = at(source, i);
        }
        return;
    };
    for (i, r) in call.result.vec3s_mut().iter_mut().enumerate() {
        *r = conversion(at(source, i));
    }
}

// --- coordinate transforms ---

#[derive(Clone, Copy)]
enum TransformMode {
    Point,
    Vector,
    Normal,
}

/// Matrix for `transform(["from",] "to", value)`: out of `from` space into
/// current, then from current into `to`.
fn transform_matrix(call: &BuiltinCall) -> Mat4 {
    let (from, to) = if call.arguments.len() == 3 {
        (
            call.arguments[0].string_value(),
            call.arguments[1].string_value(),
        )
    } else {
        ("current", call.arguments[0].string_value())
    };

    let Some(current_from) = call.context.current_from_space(from) else {
        call.error_policy.error(
            ErrorCode::UnknownCoordinateSystem,
            &format!("Unknown coordinate system '{}'", from),
        );
        return Mat4::IDENTITY;
    };
    let Some(to_from_current) = call.context.space_from_current(to) else {
        call.error_policy.error(
            ErrorCode::UnknownCoordinateSystem,
            &format!("Unknown coordinate system '{}'", to),
        );
        return Mat4::IDENTITY;
    };
    to_from_current * current_from
}

fn transform_impl(call: &mut BuiltinCall, mode: TransformMode, ty: ValueType) {
    let matrix = transform_matrix(call);
    let value = call.arguments.last().unwrap();
    call.result.reset(ty, value.storage(), call.grid_size);
    let source = value.vec3s();
    let apply = |v: Vec3| match mode {
        TransformMode::Point => matrix.transform_point3(v),
        TransformMode::Vector => matrix.transform_vector3(v),
        TransformMode::Normal => matrix.inverse().transpose().transform_vector3(v),
    };
    for (i, r) in call.result.vec3s_mut().iter_mut().enumerate() {
        *r = apply(at(source, i));
    }
}

fn builtin_transform(call: &mut BuiltinCall) {
    transform_impl(call, TransformMode::Point, ValueType::Point)
}

fn builtin_vtransform(call: &mut BuiltinCall) {
    transform_impl(call, TransformMode::Vector, ValueType::Vector)
}

fn builtin_ntransform(call: &mut BuiltinCall) {
    transform_impl(call, TransformMode::Normal, ValueType::Normal)
}

// --- lights ---

/// Sum of the ambient lights' color contributions.
fn builtin_ambient(call: &mut BuiltinCall) {
    call.result
        .reset(ValueType::Color, ValueStorage::Varying, call.grid_size);
    call.result.zero();
    let result = call.result.vec3s_mut();
    for light in call.context.lights() {
        if light.kind != LightKind::Ambient {
            continue;
        }
        let colors = light.color.vec3s();
        for (i, r) in result.iter_mut().enumerate() {
            *r += at(colors, i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollectingErrorPolicy;

    fn call_builtin(name: &str, arity: usize, arguments: Vec<Value>) -> Value {
        let descriptor = builtins()
            .iter()
            .find(|d| d.name == name && d.parameters.len() == arity)
            .expect("builtin exists");
        let context = ShadingContext::new();
        let policy = CollectingErrorPolicy::new();
        let mut result = Value::null();
        let mut call = BuiltinCall {
            context: &context,
            error_policy: &policy,
            grid_size: 4,
            arguments: &arguments,
            result: &mut result,
        };
        (descriptor.function)(&mut call);
        result
    }

    #[test]
    fn uniform_arguments_give_uniform_results() {
        let result = call_builtin("sin", 1, vec![Value::uniform_float(0.0)]);
        assert_eq!(result.storage(), ValueStorage::Uniform);
        assert_eq!(result.size(), 1);
        assert_eq!(result.float_value(), 0.0);
    }

    #[test]
    fn varying_argument_broadcasts() {
        let mut x = Value::uniform_float(2.0);
        x.promote(4);
        let result = call_builtin("max", 2, vec![x, Value::uniform_float(3.0)]);
        assert_eq!(result.storage(), ValueStorage::Varying);
        assert_eq!(result.floats(), &[3.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn normalize_handles_zero_vectors() {
        let v = Value::uniform_vec3(ValueType::Vector, Vec3::ZERO);
        let result = call_builtin("normalize", 1, vec![v]);
        assert_eq!(result.vec3_value(), Vec3::ZERO);
    }

    #[test]
    fn reflect_mirrors_across_the_normal() {
        let i = Value::uniform_vec3(ValueType::Vector, Vec3::new(1.0, -1.0, 0.0));
        let n = Value::uniform_vec3(ValueType::Vector, Vec3::Y);
        let result = call_builtin("reflect", 2, vec![i, n]);
        assert_eq!(result.vec3_value(), Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn setcomp_replaces_one_component() {
        let c = Value::uniform_vec3(ValueType::Color, Vec3::new(0.1, 0.2, 0.3));
        let result = call_builtin(
            "setcomp",
            3,
            vec![c, Value::uniform_float(1.0), Value::uniform_float(0.9)],
        );
        assert_eq!(result.vec3_value(), Vec3::new(0.1, 0.9, 0.3));
    }

    #[test]
    fn ctransform_round_trips_hsv() {
        let c = Value::uniform_vec3(ValueType::Color, Vec3::new(0.8, 0.3, 0.5));
        let hsv = call_builtin(
            "ctransform",
            2,
            vec![Value::uniform_string("rgb_to_hsv"), c],
        );
        let rgb = call_builtin("ctransform", 2, vec![Value::uniform_string("hsv"), hsv]);
        assert!((rgb.vec3_value() - Vec3::new(0.8, 0.3, 0.5)).length() < 1e-4);
    }

    #[test]
    fn unknown_color_space_reports_and_passes_through() {
        let descriptor = builtins()
            .iter()
            .find(|d| d.name == "ctransform")
            .unwrap();
        let context = ShadingContext::new();
        let policy = CollectingErrorPolicy::new();
        let mut result = Value::null();
        let arguments = vec![
            Value::uniform_string("oklab"),
            Value::uniform_vec3(ValueType::Color, Vec3::ONE),
        ];
        let mut call = BuiltinCall {
            context: &context,
            error_policy: &policy,
            grid_size: 1,
            arguments: &arguments,
            result: &mut result,
        };
        (descriptor.function)(&mut call);
        assert!(policy.contains(ErrorCode::UnknownColorSpace));
        assert_eq!(result.vec3_value(), Vec3::ONE);
    }
}
