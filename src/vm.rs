use crate::builtins::{self, BuiltinCall};
use crate::color;
use crate::context::{Light, LightKind, ShadingContext};
use crate::error::{ErrorCode, ErrorPolicy, Result};
use crate::grid::Grid;
use crate::instruction::{Dispatch, Instruction, Opcode};
use crate::kernels;
use crate::shader::{Shader, SpaceKind};
use crate::symbol::ShaderKind;
use crate::value::{Value, ValueStorage, ValueType};
use glam::{Mat4, Vec3};
use log::debug;

/// Per-sample execution masks. Every frame is a subset of the one below it:
/// a fresh frame copies the current top, narrowing only ever intersects, and
/// inversion takes the complement within the parent.
struct MaskStack {
    masks: Vec<Vec<bool>>,
    length: usize,
}

impl MaskStack {
    fn new(length: usize) -> Self {
        MaskStack {
            masks: Vec::new(),
            length,
        }
    }

    fn push(&mut self) {
        let mask = match self.masks.last() {
            Some(top) => top.clone(),
            None => vec![true; self.length],
        };
        self.masks.push(mask);
    }

    fn pop(&mut self) {
        self.masks.pop();
    }

    /// Intersect the top mask with `condition != 0`.
    fn generate(&mut self, condition: &Value) {
        let Some(top) = self.masks.last_mut() else { return };
        let values = condition.floats();
        for (index, lane) in top.iter_mut().enumerate() {
            *lane = *lane && values[index % values.len()] != 0.0;
        }
    }

    /// Replace the top with the lanes of the parent the top left out.
    fn invert(&mut self) {
        let depth = self.masks.len();
        if depth == 0 {
            return;
        }
        if depth == 1 {
            for lane in self.masks[0].iter_mut() {
                *lane = !*lane;
            }
            return;
        }
        let (parents, top) = self.masks.split_at_mut(depth - 1);
        let parent = &parents[depth - 2];
        for (lane, enclosing) in top[0].iter_mut().zip(parent) {
            *lane = *enclosing ^ *lane;
        }
    }

    fn is_empty(&self) -> bool {
        match self.masks.last() {
            Some(top) => !top.iter().any(|lane| *lane),
            None => false,
        }
    }

    fn top(&self) -> Option<&[bool]> {
        self.masks.last().map(Vec::as_slice)
    }

    fn restrict(&mut self, predicate: impl Fn(usize) -> bool) {
        if let Some(top) = self.masks.last_mut() {
            for (index, lane) in top.iter_mut().enumerate() {
                *lane = *lane && predicate(index);
            }
        }
    }
}

/// A light opened by an `ambient`/`solar`/`illuminate` instruction and
/// captured at the next lighting boundary, once the body has computed the
/// light color and opacity.
struct PendingLight {
    kind: LightKind,
    color_register: i32,
    opacity_register: i32,
    direction_register: Option<i32>,
    position: Option<Vec3>,
    axis: Option<Vec3>,
    angle: Option<f32>,
}

struct IlluminanceFrame {
    address: usize,
    cursor: usize,
    current: usize,
}

/// Executes a compiled shader over one grid. State is per invocation; the
/// shader, context and policy are shared read-only.
pub struct VirtualMachine<'a> {
    shader: &'a Shader,
    context: &'a ShadingContext,
    error_policy: &'a dyn ErrorPolicy,
    registers: Vec<Value>,
    constants: Vec<Value>,
    masks: MaskStack,
    illuminance: Vec<IlluminanceFrame>,
    pending_light: Option<PendingLight>,
    lights: Vec<Light>,
    grid_size: usize,
}

impl<'a> VirtualMachine<'a> {
    pub fn new(
        shader: &'a Shader,
        context: &'a ShadingContext,
        error_policy: &'a dyn ErrorPolicy,
    ) -> Self {
        VirtualMachine {
            shader,
            context,
            error_policy,
            registers: Vec::new(),
            constants: Vec::new(),
            masks: MaskStack::new(0),
            illuminance: Vec::new(),
            pending_light: None,
            lights: Vec::new(),
            grid_size: 0,
        }
    }

    /// Run the shader over the grid. Surface-family shaders mutate the grid
    /// in place; light shaders additionally return the lights they emit.
    pub fn run(&mut self, grid: &mut Grid) -> Result<Vec<Light>> {
        self.grid_size = grid.size();
        self.masks = MaskStack::new(self.grid_size);
        self.registers = vec![Value::null(); self.shader.register_count()];
        self.load_constants();
        self.load_parameters(grid);
        self.load_globals(grid);

        debug!(
            "shading '{}' over a {}x{} grid",
            self.shader.name(),
            grid.width(),
            grid.height()
        );
        self.execute();
        self.store_outputs(grid);
        Ok(std::mem::take(&mut self.lights))
    }

    // --- invocation setup ---

    /// Clone the pool, transforming space-annotated constants through the
    /// coordinate oracle.
    fn load_constants(&mut self) {
        self.constants = Vec::with_capacity(self.shader.constants().len());
        for constant in self.shader.constants() {
            let mut value = constant.value.clone();
            if let Some((kind, space)) = &constant.space {
                self.transform_constant(&mut value, *kind, space);
            }
            self.constants.push(value);
        }
    }

    fn transform_constant(&mut self, value: &mut Value, kind: SpaceKind, space: &str) {
        if kind == SpaceKind::Color {
            let conversion: Option<fn(Vec3) -> Vec3> = match space {
                "rgb" => Some(|c| c),
                "hsv" => Some(color::rgb_from_hsv),
                "hsl" => Some(color::rgb_from_hsl),
                _ => None,
            };
            match conversion {
                Some(conversion) => {
                    for c in value.vec3s_mut() {
                        *c = conversion(*c);
                    }
                }
                None => self.error_policy.error(
                    ErrorCode::UnknownColorSpace,
                    &format!("Unknown color space '{}'", space),
                ),
            }
            return;
        }

        let Some(matrix) = self.context.current_from_space(space) else {
            self.error_policy.error(
                ErrorCode::UnknownCoordinateSystem,
                &format!("Unknown coordinate system '{}'", space),
            );
            return;
        };
        match kind {
            SpaceKind::Point => {
                for v in value.vec3s_mut() {
                    *v = matrix.transform_point3(*v);
                }
            }
            SpaceKind::Vector => {
                for v in value.vec3s_mut() {
                    *v = matrix.transform_vector3(*v);
                }
            }
            SpaceKind::Normal => {
                let normal_matrix = matrix.inverse().transpose();
                for v in value.vec3s_mut() {
                    *v = normal_matrix.transform_vector3(*v);
                }
            }
            SpaceKind::Matrix => {
                for m in value.mat4s_mut() {
                    *m = matrix * *m;
                }
            }
            SpaceKind::Color => unreachable!(),
        }
    }

    /// Parameter registers: a grid primvar wins over a host-set value,
    /// which wins over the compiled default.
    fn load_parameters(&mut self, grid: &Grid) {
        for (index, parameter) in self.shader.parameters().iter().enumerate() {
            let mut value = if let Some(primvar) = grid.find_value(&parameter.name) {
                primvar.clone()
            } else if let Some(set) = self.shader.parameter_value(index) {
                set.clone()
            } else if let Some(constant) = parameter.default_constant {
                self.constants[constant].clone()
            } else {
                Value::new(parameter.ty, parameter.storage, self.grid_size)
            };

            if value.ty() != parameter.ty {
                self.error_policy.error(
                    ErrorCode::TypeMismatch,
                    &format!(
                        "parameter '{}' is {}, expected {}",
                        parameter.name,
                        value.ty().name(),
                        parameter.ty.name()
                    ),
                );
                value = Value::new(parameter.ty, parameter.storage, self.grid_size);
            }
            if parameter.storage == ValueStorage::Varying {
                value.promote(self.grid_size);
            }
            self.registers[parameter.register] = value;
        }
    }

    /// Global registers load from the grid's named values; names the grid
    /// does not carry start zeroed. Light shaders see the surface position
    /// as `Ps` and start fully opaque.
    fn load_globals(&mut self, grid: &Grid) {
        for global in self.shader.globals() {
            let source = grid.find_value(&global.name).or_else(|| {
                if self.shader.kind() == ShaderKind::Light && global.name == "Ps" {
                    grid.find_value("P")
                } else {
                    None
                }
            });
            let mut value = match source {
                Some(value) if value.ty() == global.ty => value.clone(),
                _ => Value::new(global.ty, ValueStorage::Varying, self.grid_size),
            };
            value.promote(self.grid_size);
            if self.shader.kind() == ShaderKind::Light
                && global.name == "Ol"
                && grid.find_value("Ol").is_none()
            {
                value.vec3s_mut().fill(Vec3::ONE);
            }
            self.registers[global.register] = value;
        }
    }

    /// Write the shader kind's output globals and any output parameters
    /// back into the grid.
    fn store_outputs(&mut self, grid: &mut Grid) {
        let outputs: &[(&str, ValueType)] = match self.shader.kind() {
            ShaderKind::Surface => &[
                ("Ci", ValueType::Color),
                ("Oi", ValueType::Color),
                ("P", ValueType::Point),
                ("N", ValueType::Normal),
            ],
            ShaderKind::Volume => &[("Ci", ValueType::Color), ("Oi", ValueType::Color)],
            ShaderKind::Imager => &[
                ("Ci", ValueType::Color),
                ("Oi", ValueType::Color),
                ("alpha", ValueType::Float),
            ],
            ShaderKind::Displacement => {
                &[("P", ValueType::Point), ("N", ValueType::Normal)]
            }
            ShaderKind::Light => &[],
        };
        for &(name, ty) in outputs {
            grid.value(name, ty);
            if let Some(global) = self
                .shader
                .globals()
                .iter()
                .find(|global| global.name == name)
            {
                grid.insert(name, self.registers[global.register].clone());
            }
        }
        for parameter in self.shader.parameters() {
            if parameter.output {
                grid.insert(&parameter.name, self.registers[parameter.register].clone());
            }
        }
    }

    // --- execution ---

    fn execute(&mut self) {
        let shader = self.shader;
        let instructions = shader.instructions();
        let mut ip = 0;
        while ip < instructions.len() {
            let instruction = instructions[ip];
            ip += 1;
            match instruction.opcode {
                Opcode::Null => {}
                Opcode::Halt => break,
                Opcode::Reset => self.masks.pop(),
                Opcode::ClearMask => self.masks.push(),
                Opcode::GenerateMask => {
                    let condition = self.value(instruction.args[0]).clone();
                    self.masks.generate(&condition);
                }
                Opcode::InvertMask => self.masks.invert(),
                Opcode::Jump => ip = instruction.target(),
                Opcode::JumpEmpty => {
                    if self.masks.is_empty() {
                        ip = instruction.target();
                    }
                }
                Opcode::JumpNotEmpty => {
                    if !self.masks.is_empty() {
                        ip = instruction.target();
                    }
                }
                Opcode::JumpIlluminance => {
                    if let Some(target) = self.jump_illuminance(ip - 1) {
                        ip = target;
                    }
                }
                Opcode::IlluminanceAxisAngle => self.illuminance_fill(&instruction),

                Opcode::Transform
                | Opcode::TransformVector
                | Opcode::TransformNormal
                | Opcode::TransformColor
                | Opcode::TransformMatrix => self.transform(&instruction),

                Opcode::Dot => self.binary_vec3_to_float(&instruction, |a, b| a.dot(b)),
                Opcode::Cross => {
                    self.binary_vec3(&instruction, ValueType::Vector, |a, b| a.cross(b))
                }

                Opcode::MultiplyFloat => self.binary_float(&instruction, |a, b| a * b),
                Opcode::DivideFloat => self.binary_float(&instruction, |a, b| a / b),
                Opcode::AddFloat => self.binary_float(&instruction, |a, b| a + b),
                Opcode::SubtractFloat => self.binary_float(&instruction, |a, b| a - b),
                Opcode::MultiplyVec3 => self.binary_vec3_keep_type(&instruction, |a, b| a * b),
                Opcode::DivideVec3 => self.binary_vec3_keep_type(&instruction, |a, b| a / b),
                Opcode::AddVec3 => self.binary_vec3_keep_type(&instruction, |a, b| a + b),
                Opcode::SubtractVec3 => self.binary_vec3_keep_type(&instruction, |a, b| a - b),

                Opcode::Greater => self.binary_float(&instruction, |a, b| bool_to_float(a > b)),
                Opcode::GreaterEqual => {
                    self.binary_float(&instruction, |a, b| bool_to_float(a >= b))
                }
                Opcode::Less => self.binary_float(&instruction, |a, b| bool_to_float(a < b)),
                Opcode::LessEqual => {
                    self.binary_float(&instruction, |a, b| bool_to_float(a <= b))
                }
                Opcode::And => {
                    self.binary_float(&instruction, |a, b| bool_to_float(a != 0.0 && b != 0.0))
                }
                Opcode::Or => {
                    self.binary_float(&instruction, |a, b| bool_to_float(a != 0.0 || b != 0.0))
                }
                Opcode::EqualFloat => {
                    self.binary_float(&instruction, |a, b| bool_to_float(a == b))
                }
                Opcode::NotEqualFloat => {
                    self.binary_float(&instruction, |a, b| bool_to_float(a != b))
                }
                Opcode::EqualVec3 => {
                    self.binary_vec3_to_float(&instruction, |a, b| bool_to_float(a == b))
                }
                Opcode::NotEqualVec3 => {
                    self.binary_vec3_to_float(&instruction, |a, b| bool_to_float(a != b))
                }

                Opcode::NegateFloat => self.unary_float(&instruction, |x| -x),
                Opcode::NegateVec3 => self.unary_vec3(&instruction, |v| -v),

                Opcode::PromoteInteger
                | Opcode::PromoteFloat
                | Opcode::PromoteVec3
                | Opcode::PromoteMatrix => self.promote(&instruction),
                Opcode::FloatToColor => self.float_to_vec3(&instruction, ValueType::Color),
                Opcode::FloatToPoint => self.float_to_vec3(&instruction, ValueType::Point),
                Opcode::FloatToVector => self.float_to_vec3(&instruction, ValueType::Vector),
                Opcode::FloatToNormal => self.float_to_vec3(&instruction, ValueType::Normal),
                Opcode::FloatToMatrix => self.float_to_matrix(&instruction),

                Opcode::AssignFloat
                | Opcode::AssignVec3
                | Opcode::AssignMat4x4
                | Opcode::AssignInteger
                | Opcode::AssignString => self.assign(&instruction),
                Opcode::AddAssignFloat => self.op_assign_float(&instruction, |a, b| a + b),
                Opcode::SubtractAssignFloat => self.op_assign_float(&instruction, |a, b| a - b),
                Opcode::MultiplyAssignFloat => self.op_assign_float(&instruction, |a, b| a * b),
                Opcode::DivideAssignFloat => self.op_assign_float(&instruction, |a, b| a / b),
                Opcode::AddAssignVec3 => self.op_assign_vec3(&instruction, |a, b| a + b),
                Opcode::SubtractAssignVec3 => self.op_assign_vec3(&instruction, |a, b| a - b),
                Opcode::MultiplyAssignVec3 => self.op_assign_vec3(&instruction, |a, b| a * b),
                Opcode::DivideAssignVec3 => self.op_assign_vec3(&instruction, |a, b| a / b),

                Opcode::FloatTexture
                | Opcode::Vec3Texture
                | Opcode::FloatEnvironment
                | Opcode::Vec3Environment
                | Opcode::Shadow => self.sample(&instruction),

                Opcode::Call0
                | Opcode::Call1
                | Opcode::Call2
                | Opcode::Call3
                | Opcode::Call4
                | Opcode::Call5 => self.call(&instruction),

                Opcode::Ambient => {
                    self.flush_pending_light();
                    self.pending_light = Some(PendingLight {
                        kind: LightKind::Ambient,
                        color_register: instruction.args[0],
                        opacity_register: instruction.args[1],
                        direction_register: None,
                        position: None,
                        axis: None,
                        angle: None,
                    });
                }
                Opcode::Solar | Opcode::SolarAxisAngle => self.solar(&instruction),
                Opcode::Illuminate | Opcode::IlluminateAxisAngle => {
                    self.illuminate(&instruction)
                }
            }
        }
        self.flush_pending_light();
    }

    // --- register access ---

    fn value(&self, register: i32) -> &Value {
        if register < 0 {
            &self.constants[(-register - 1) as usize]
        } else {
            &self.registers[register as usize]
        }
    }

    fn take(&mut self, register: i32) -> Value {
        debug_assert!(register >= 0, "constants are read-only");
        std::mem::take(&mut self.registers[register as usize])
    }

    fn put(&mut self, register: i32, value: Value) {
        self.registers[register as usize] = value;
    }

    fn result_shape(&self, dispatch: Dispatch) -> ValueStorage {
        if dispatch.result_varying() {
            ValueStorage::Varying
        } else {
            ValueStorage::Uniform
        }
    }

    // --- arithmetic ---

    fn binary_float(&mut self, instruction: &Instruction, op: impl Fn(f32, f32) -> f32) {
        let storage = self.result_shape(instruction.dispatch);
        let mut destination = self.take(instruction.args[0]);
        destination.reset(ValueType::Float, storage, self.grid_size);
        {
            let lhs = self.value(instruction.args[1]);
            let rhs = self.value(instruction.args[2]);
            kernels::binary_float(
                instruction.dispatch,
                destination.floats_mut(),
                lhs.floats(),
                rhs.floats(),
                op,
            );
        }
        self.put(instruction.args[0], destination);
    }

    fn binary_vec3(
        &mut self,
        instruction: &Instruction,
        ty: ValueType,
        op: impl Fn(Vec3, Vec3) -> Vec3,
    ) {
        let storage = self.result_shape(instruction.dispatch);
        let mut destination = self.take(instruction.args[0]);
        destination.reset(ty, storage, self.grid_size);
        {
            let lhs = self.value(instruction.args[1]);
            let rhs = self.value(instruction.args[2]);
            kernels::binary_vec3(
                instruction.dispatch,
                destination.vec3s_mut(),
                lhs.vec3s(),
                rhs.vec3s(),
                op,
            );
        }
        self.put(instruction.args[0], destination);
    }

    /// Vec3 arithmetic keeps the left operand's geometric type.
    fn binary_vec3_keep_type(&mut self, instruction: &Instruction, op: impl Fn(Vec3, Vec3) -> Vec3) {
        let ty = self.value(instruction.args[1]).ty();
        self.binary_vec3(instruction, ty, op);
    }

    fn binary_vec3_to_float(&mut self, instruction: &Instruction, op: impl Fn(Vec3, Vec3) -> f32) {
        let storage = self.result_shape(instruction.dispatch);
        let mut destination = self.take(instruction.args[0]);
        destination.reset(ValueType::Float, storage, self.grid_size);
        {
            let lhs = self.value(instruction.args[1]);
            let rhs = self.value(instruction.args[2]);
            kernels::binary_vec3_to_float(
                instruction.dispatch,
                destination.floats_mut(),
                lhs.vec3s(),
                rhs.vec3s(),
                op,
            );
        }
        self.put(instruction.args[0], destination);
    }

    fn unary_float(&mut self, instruction: &Instruction, op: impl Fn(f32) -> f32) {
        let storage = self.result_shape(instruction.dispatch);
        let mut destination = self.take(instruction.args[0]);
        destination.reset(ValueType::Float, storage, self.grid_size);
        {
            let source = self.value(instruction.args[1]);
            kernels::unary_float(
                instruction.dispatch,
                destination.floats_mut(),
                source.floats(),
                op,
            );
        }
        self.put(instruction.args[0], destination);
    }

    fn unary_vec3(&mut self, instruction: &Instruction, op: impl Fn(Vec3) -> Vec3) {
        let ty = self.value(instruction.args[1]).ty();
        let storage = self.result_shape(instruction.dispatch);
        let mut destination = self.take(instruction.args[0]);
        destination.reset(ty, storage, self.grid_size);
        {
            let source = self.value(instruction.args[1]);
            kernels::unary_vec3(
                instruction.dispatch,
                destination.vec3s_mut(),
                source.vec3s(),
                op,
            );
        }
        self.put(instruction.args[0], destination);
    }

    // --- conversions ---

    fn promote(&mut self, instruction: &Instruction) {
        let mut value = self.value(instruction.args[1]).clone();
        value.promote(self.grid_size);
        self.put(instruction.args[0], value);
    }

    fn float_to_vec3(&mut self, instruction: &Instruction, ty: ValueType) {
        let storage = self.result_shape(instruction.dispatch);
        let mut destination = self.take(instruction.args[0]);
        destination.reset(ty, storage, self.grid_size);
        {
            let source = self.value(instruction.args[1]);
            kernels::unary_float_to_vec3(
                instruction.dispatch,
                destination.vec3s_mut(),
                source.floats(),
            );
        }
        self.put(instruction.args[0], destination);
    }

    fn float_to_matrix(&mut self, instruction: &Instruction) {
        let storage = self.result_shape(instruction.dispatch);
        let mut destination = self.take(instruction.args[0]);
        destination.reset(ValueType::Matrix, storage, self.grid_size);
        {
            let source = self.value(instruction.args[1]).floats();
            for (index, m) in destination.mat4s_mut().iter_mut().enumerate() {
                *m = Mat4::from_diagonal(glam::Vec4::splat(source[index % source.len()]));
            }
        }
        self.put(instruction.args[0], destination);
    }

    // --- assignment ---

    /// Masked store: varying destinations only change on lanes where the
    /// top mask is true.
    fn assign(&mut self, instruction: &Instruction) {
        let destination_register = instruction.args[0];
        let source_register = instruction.args[1];
        let varying = instruction.dispatch.lhs_varying();
        let storage = if varying {
            ValueStorage::Varying
        } else {
            ValueStorage::Uniform
        };

        let mut destination = self.take(destination_register);
        {
            let source_owned;
            let source = if source_register == destination_register {
                source_owned = destination.clone();
                &source_owned
            } else {
                self.value(source_register)
            };
            destination.reset(source.ty(), storage, self.grid_size);
            let mask = if varying { self.masks.top() } else { None };
            store_masked(&mut destination, source, mask);
        }
        self.put(destination_register, destination);
    }

    fn op_assign_float(&mut self, instruction: &Instruction, op: impl Fn(f32, f32) -> f32) {
        let destination_register = instruction.args[0];
        let varying = instruction.dispatch.lhs_varying();
        let mut destination = self.take(destination_register);
        destination.reset(
            ValueType::Float,
            if varying { ValueStorage::Varying } else { ValueStorage::Uniform },
            self.grid_size,
        );
        {
            let source_owned;
            let source = if instruction.args[1] == destination_register {
                source_owned = destination.clone();
                &source_owned
            } else {
                self.value(instruction.args[1])
            };
            let values = source.floats();
            let mask = if varying { self.masks.top() } else { None };
            for (index, d) in destination.floats_mut().iter_mut().enumerate() {
                if mask.map_or(true, |m| m[index]) {
                    *d = op(*d, values[index % values.len()]);
                }
            }
        }
        self.put(destination_register, destination);
    }

    fn op_assign_vec3(&mut self, instruction: &Instruction, op: impl Fn(Vec3, Vec3) -> Vec3) {
        let destination_register = instruction.args[0];
        let varying = instruction.dispatch.lhs_varying();
        let ty = self.value(destination_register).ty();
        let ty = if ty.is_vec3() { ty } else { ValueType::Color };
        let mut destination = self.take(destination_register);
        destination.reset(
            ty,
            if varying { ValueStorage::Varying } else { ValueStorage::Uniform },
            self.grid_size,
        );
        {
            let source_owned;
            let source = if instruction.args[1] == destination_register {
                source_owned = destination.clone();
                &source_owned
            } else {
                self.value(instruction.args[1])
            };
            let values = source.vec3s();
            let mask = if varying { self.masks.top() } else { None };
            for (index, d) in destination.vec3s_mut().iter_mut().enumerate() {
                if mask.map_or(true, |m| m[index]) {
                    *d = op(*d, values[index % values.len()]);
                }
            }
        }
        self.put(destination_register, destination);
    }

    // --- transforms ---

    fn transform(&mut self, instruction: &Instruction) {
        let space = self.value(instruction.args[2]).string_value().to_string();
        let kind = match instruction.opcode {
            Opcode::Transform => SpaceKind::Point,
            Opcode::TransformVector => SpaceKind::Vector,
            Opcode::TransformNormal => SpaceKind::Normal,
            Opcode::TransformColor => SpaceKind::Color,
            _ => SpaceKind::Matrix,
        };
        let mut value = self.value(instruction.args[1]).clone();
        self.transform_constant(&mut value, kind, &space);
        self.put(instruction.args[0], value);
    }

    // --- texture sampling ---

    fn sample(&mut self, instruction: &Instruction) {
        let name = self.value(instruction.args[1]).string_value().to_string();
        let a = self.value(instruction.args[2]).clone();
        let b = if matches!(instruction.opcode, Opcode::FloatTexture | Opcode::Vec3Texture) {
            Some(self.value(instruction.args[3]).clone())
        } else {
            None
        };

        let varying = a.storage().is_varying()
            || b.as_ref().map_or(false, |b| b.storage().is_varying());
        let storage = if varying { ValueStorage::Varying } else { ValueStorage::Uniform };
        let vec3_result = matches!(
            instruction.opcode,
            Opcode::Vec3Texture | Opcode::Vec3Environment
        );
        let ty = if vec3_result { ValueType::Color } else { ValueType::Float };

        let mut destination = self.take(instruction.args[0]);
        destination.reset(ty, storage, self.grid_size);

        let sampler = self.context.texture_sampler();
        let mut failed = sampler.is_none();
        if let Some(sampler) = sampler {
            let length = destination.size();
            for index in 0..length {
                match instruction.opcode {
                    Opcode::FloatTexture => {
                        let s = a.floats()[index % a.size()];
                        let t = b.as_ref().map_or(0.0, |b| b.floats()[index % b.size()]);
                        match sampler.float_texture(&name, s, t) {
                            Some(value) => destination.floats_mut()[index] = value,
                            None => failed = true,
                        }
                    }
                    Opcode::Vec3Texture => {
                        let s = a.floats()[index % a.size()];
                        let t = b.as_ref().map_or(0.0, |b| b.floats()[index % b.size()]);
                        match sampler.vec3_texture(&name, s, t) {
                            Some(value) => destination.vec3s_mut()[index] = value,
                            None => failed = true,
                        }
                    }
                    Opcode::FloatEnvironment => {
                        let direction = a.vec3s()[index % a.size()];
                        match sampler.float_environment(&name, direction) {
                            Some(value) => destination.floats_mut()[index] = value,
                            None => failed = true,
                        }
                    }
                    Opcode::Vec3Environment => {
                        let direction = a.vec3s()[index % a.size()];
                        match sampler.vec3_environment(&name, direction) {
                            Some(value) => destination.vec3s_mut()[index] = value,
                            None => failed = true,
                        }
                    }
                    _ => {
                        let position = a.vec3s()[index % a.size()];
                        match sampler.shadow(&name, position) {
                            Some(value) => destination.floats_mut()[index] = value,
                            None => failed = true,
                        }
                    }
                }
                if failed {
                    break;
                }
            }
        }
        if failed {
            self.error_policy.error(
                ErrorCode::OpeningFileFailed,
                &format!("Texture lookup '{}' failed", name),
            );
            destination.zero();
        }
        self.put(instruction.args[0], destination);
    }

    // --- calls ---

    fn call(&mut self, instruction: &Instruction) {
        let builtin = &builtins::builtins()[instruction.args[1] as usize];
        let argument_count = instruction
            .opcode
            .call_argument_count()
            .unwrap_or_default();
        let arguments: Vec<Value> = (0..argument_count)
            .map(|index| self.value(instruction.args[2 + index]).clone())
            .collect();

        let mut result = Value::null();
        {
            let mut call = BuiltinCall {
                context: self.context,
                error_policy: self.error_policy,
                grid_size: self.grid_size,
                arguments: &arguments,
                result: &mut result,
            };
            (builtin.function)(&mut call);
        }

        let destination_register = instruction.args[0];
        if builtin.writes_first_argument {
            // Merge through the mask, like an assignment to the argument.
            let mut destination = self.take(destination_register);
            let varying = destination.storage().is_varying();
            let mask = if varying { self.masks.top() } else { None };
            store_masked(&mut destination, &result, mask);
            self.put(destination_register, destination);
        } else {
            self.put(destination_register, result);
        }
    }

    // --- lighting ---

    fn flush_pending_light(&mut self) {
        let Some(pending) = self.pending_light.take() else { return };
        let color = self.light_output(pending.color_register, Vec3::ZERO);
        let opacity = self.light_output(pending.opacity_register, Vec3::ONE);
        let light = match pending.kind {
            LightKind::Ambient => Light::ambient(color, opacity),
            LightKind::Solar => {
                let direction = pending
                    .direction_register
                    .map(|register| self.value(register))
                    .filter(|value| value.ty().is_vec3())
                    .map(|value| value.vec3s()[0])
                    .unwrap_or(Vec3::NEG_Z);
                Light::solar(color, opacity, direction)
            }
            LightKind::Illuminate => {
                let mut light =
                    Light::illuminate(color, opacity, pending.position.unwrap_or(Vec3::ZERO));
                light.axis = pending.axis;
                light.angle = pending.angle;
                light
            }
        };
        self.lights.push(light);
    }

    /// A light output register at capture time; untouched registers default
    /// to the given component value.
    fn light_output(&self, register: i32, default: Vec3) -> Value {
        let value = self.value(register);
        if value.ty().is_vec3() {
            value.clone()
        } else {
            Value::uniform_vec3(ValueType::Color, default)
        }
    }

    fn solar(&mut self, instruction: &Instruction) {
        self.flush_pending_light();
        if instruction.opcode == Opcode::SolarAxisAngle {
            // The body sees the axis as the outgoing light direction.
            let axis = self.value(instruction.args[3]).clone();
            let mut direction = self.take(instruction.args[0]);
            direction.reset(ValueType::Vector, ValueStorage::Varying, self.grid_size);
            let source = axis.vec3s();
            for (index, d) in direction.vec3s_mut().iter_mut().enumerate() {
                *d = source[index % source.len()];
            }
            self.put(instruction.args[0], direction);
        }
        self.pending_light = Some(PendingLight {
            kind: LightKind::Solar,
            color_register: instruction.args[1],
            opacity_register: instruction.args[2],
            direction_register: Some(instruction.args[0]),
            position: None,
            axis: None,
            angle: None,
        });
    }

    fn illuminate(&mut self, instruction: &Instruction) {
        self.flush_pending_light();
        let position_value = self.value(instruction.args[4]).clone();
        let position = position_value.vec3s()[0];

        // L runs from each surface sample toward the light position, the
        // same convention the surface-side loop refills it with.
        let surface = self.value(instruction.args[0]).clone();
        let mut direction = self.take(instruction.args[1]);
        direction.reset(ValueType::Vector, ValueStorage::Varying, self.grid_size);
        let positions = surface.vec3s();
        for (index, d) in direction.vec3s_mut().iter_mut().enumerate() {
            *d = position - positions[index % positions.len()];
        }
        self.put(instruction.args[1], direction);

        let (axis, angle) = if instruction.opcode == Opcode::IlluminateAxisAngle {
            (
                Some(self.value(instruction.args[5]).vec3s()[0]),
                Some(self.value(instruction.args[6]).floats()[0]),
            )
        } else {
            (None, None)
        };
        self.pending_light = Some(PendingLight {
            kind: LightKind::Illuminate,
            color_register: instruction.args[2],
            opacity_register: instruction.args[3],
            direction_register: None,
            position: Some(position),
            axis,
            angle,
        });
    }

    /// Advance the innermost light loop to its next contributing light, or
    /// fall through past the loop when none remain.
    fn jump_illuminance(&mut self, address: usize) -> Option<usize> {
        let context = self.context;
        let shader = self.shader;
        if self.illuminance.last().map(|frame| frame.address) != Some(address) {
            self.illuminance.push(IlluminanceFrame {
                address,
                cursor: 0,
                current: 0,
            });
        }
        let lights = context.lights();
        loop {
            let frame = self.illuminance.last_mut().expect("frame just ensured");
            if frame.cursor >= lights.len() {
                let target = shader
                    .instructions()
                    .get(address)
                    .map(|instruction| instruction.target());
                self.illuminance.pop();
                return target;
            }
            let index = frame.cursor;
            frame.cursor += 1;
            if lights[index].kind != LightKind::Ambient {
                frame.current = index;
                return None;
            }
        }
    }

    /// Refill `L`, `Cl`, `Ol` from the current light and push the cone-
    /// restricted mask frame for the body.
    fn illuminance_fill(&mut self, instruction: &Instruction) {
        let context = self.context;
        let Some(frame) = self.illuminance.last() else { return };
        let light = &context.lights()[frame.current];
        let (light_kind, light_direction, light_position) =
            (light.kind, light.direction, light.position);
        let (light_axis, light_angle) = (light.axis, light.angle);
        let (light_color, light_opacity) = (light.color.clone(), light.opacity.clone());

        // L per sample.
        let surface = self.value(instruction.args[3]).clone();
        let mut direction_value = self.take(instruction.args[0]);
        direction_value.reset(ValueType::Vector, ValueStorage::Varying, self.grid_size);
        {
            let positions = surface.vec3s();
            for (index, d) in direction_value.vec3s_mut().iter_mut().enumerate() {
                *d = match light_kind {
                    LightKind::Solar => light_direction.unwrap_or(Vec3::NEG_Z),
                    _ => {
                        light_position.unwrap_or(Vec3::ZERO)
                            - positions[index % positions.len()]
                    }
                };
            }
        }
        let directions = direction_value.vec3s().to_vec();
        self.put(instruction.args[0], direction_value);

        // Cl and Ol, widened to the grid.
        let mut color = light_color;
        color.promote(self.grid_size);
        self.put(instruction.args[1], color);
        let mut opacity = light_opacity;
        opacity.promote(self.grid_size);
        self.put(instruction.args[2], opacity);

        // The body's mask: inside the surface cone, and inside the light's
        // own cone when it declared one.
        self.masks.push();
        if instruction.args[4] >= 0 {
            let axes = self.value(instruction.args[4]).vec3s().to_vec();
            let angles = self.value(instruction.args[5]).floats().to_vec();
            self.masks.restrict(|index| {
                let l = directions[index].normalize_or_zero();
                let axis = axes[index % axes.len()].normalize_or_zero();
                l.dot(axis) >= angles[index % angles.len()].cos()
            });
        }
        if let (Some(axis), Some(angle)) = (light_axis, light_angle) {
            self.masks.restrict(|index| {
                let l = directions[index].normalize_or_zero();
                (-l).dot(axis.normalize_or_zero()) >= angle.cos()
            });
        }
    }
}

fn bool_to_float(condition: bool) -> f32 {
    if condition { 1.0 } else { 0.0 }
}

/// Copy `source` into `destination`, broadcasting a narrower source and
/// honoring the mask. The destination is already shaped.
fn store_masked(destination: &mut Value, source: &Value, mask: Option<&[bool]>) {
    match destination.ty() {
        ValueType::Float => {
            let values = source.floats();
            for (index, d) in destination.floats_mut().iter_mut().enumerate() {
                if mask.map_or(true, |m| m[index]) {
                    *d = values[index % values.len()];
                }
            }
        }
        ty if ty.is_vec3() => {
            let values = source.vec3s();
            for (index, d) in destination.vec3s_mut().iter_mut().enumerate() {
                if mask.map_or(true, |m| m[index]) {
                    *d = values[index % values.len()];
                }
            }
        }
        ValueType::Matrix => {
            let values = source.mat4s();
            for (index, d) in destination.mat4s_mut().iter_mut().enumerate() {
                if mask.map_or(true, |m| m[index]) {
                    *d = values[index % values.len()];
                }
            }
        }
        ValueType::String => {
            let values = source.strings();
            for (index, d) in destination.strings_mut().iter_mut().enumerate() {
                if mask.map_or(true, |m| m[index]) {
                    d.clone_from(&values[index % values.len()]);
                }
            }
        }
        ValueType::Integer => {
            let values = source.ints();
            for (index, d) in destination.ints_mut().iter_mut().enumerate() {
                if mask.map_or(true, |m| m[index]) {
                    *d = values[index % values.len()];
                }
            }
        }
        _ => {}
    }
}
