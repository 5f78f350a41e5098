use crate::ast::{NodeKind, SyntaxNode};
use crate::error::{ErrorCode, ErrorPolicy, RenderError, Result};
use crate::instruction::{Dispatch, Instruction, Opcode};
use crate::shader::{Constant, GlobalInfo, ParameterInfo, Shader, SpaceKind};
use crate::symbol::{ShaderKind, SymbolId, SymbolKind, SymbolTable};
use crate::value::{Value, ValueStorage, ValueType};
use glam::{Mat4, Vec4};
use log::debug;
use std::collections::HashMap;

/// Register index of a pool constant: constants live in their own space and
/// are encoded as negative register numbers.
fn constant_register(index: usize) -> i32 {
    -(index as i32) - 1
}

struct LoopFrame {
    /// Mask-stack depth including the loop's own frame.
    mask_depth: usize,
    break_patches: Vec<usize>,
    continue_patches: Vec<usize>,
}

/// Post-order tree walk producing the instruction stream and constant pool.
/// Named symbols receive fixed registers up front; expression temporaries
/// are allocated above them and recycled per statement.
pub struct CodeGenerator<'a> {
    symbol_table: &'a SymbolTable,
    error_policy: &'a dyn ErrorPolicy,
    errors: usize,
    constants: Vec<Constant>,
    instructions: Vec<Instruction>,
    registers: HashMap<SymbolId, i32>,
    next_register: i32,
    max_register: i32,
    loops: Vec<LoopFrame>,
    mask_depth: usize,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(symbol_table: &'a SymbolTable, error_policy: &'a dyn ErrorPolicy) -> Self {
        CodeGenerator {
            symbol_table,
            error_policy,
            errors: 0,
            constants: Vec::new(),
            instructions: Vec::new(),
            registers: HashMap::new(),
            next_register: 0,
            max_register: 0,
            loops: Vec::new(),
            mask_depth: 0,
        }
    }

    pub fn generate(mut self, shader: &SyntaxNode, name: &str) -> Result<Shader> {
        let kind = match shader.kind() {
            NodeKind::LightShader => ShaderKind::Light,
            NodeKind::SurfaceShader => ShaderKind::Surface,
            NodeKind::VolumeShader => ShaderKind::Volume,
            NodeKind::DisplacementShader => ShaderKind::Displacement,
            NodeKind::ImagerShader => ShaderKind::Imager,
            _ => return Err(RenderError::CodeGenerationFailed(name.to_string())),
        };

        // Fixed registers for every named symbol the shader touches, then
        // parameter metadata with folded defaults.
        let mut globals = Vec::new();
        self.assign_symbol_registers(shader, &mut globals);

        let mut parameters = Vec::new();
        for variable in shader.node(0).nodes() {
            if let Some(info) = self.parameter_info(variable) {
                parameters.push(info);
            }
        }

        self.generate_statement(shader.node(1));
        self.emit(Instruction::new(Opcode::Halt));

        debug!(
            "shader '{}': {} instructions, {} constants, {} registers",
            name,
            self.instructions.len(),
            self.constants.len(),
            self.max_register
        );

        if self.errors > 0 {
            return Err(RenderError::CodeGenerationFailed(name.to_string()));
        }
        Ok(Shader::build(
            name.to_string(),
            kind,
            self.constants,
            parameters,
            globals,
            self.max_register as usize,
            self.instructions,
        ))
    }

    /// Walk the whole definition and give every referenced parameter,
    /// global and local symbol a register below the temporary region.
    fn assign_symbol_registers(&mut self, node: &SyntaxNode, globals: &mut Vec<GlobalInfo>) {
        if let Some(id) = node.symbol() {
            let symbol = self.symbol_table.symbol(id);
            if matches!(
                symbol.kind,
                SymbolKind::Parameter | SymbolKind::Global | SymbolKind::Variable
            ) && !self.registers.contains_key(&id)
            {
                let register = self.allocate_register();
                self.registers.insert(id, register);
                if symbol.kind == SymbolKind::Global {
                    globals.push(GlobalInfo {
                        name: symbol.name.clone(),
                        ty: symbol.ty,
                        register: register as usize,
                    });
                }
            }
        }
        for child in node.nodes() {
            self.assign_symbol_registers(child, globals);
        }
    }

    fn parameter_info(&mut self, variable: &SyntaxNode) -> Option<ParameterInfo> {
        let id = variable.symbol()?;
        let symbol = self.symbol_table.symbol(id);
        let register = self.registers[&id] as usize;

        let initializer = variable.node(0);
        let default_constant = if initializer.kind() == NodeKind::Null {
            None
        } else {
            match self.fold_constant(initializer) {
                Some(constant) => Some(self.add_constant(constant)),
                None => {
                    self.error(
                        variable.line(),
                        ErrorCode::Unimplemented,
                        &format!(
                            "the default of parameter '{}' is not a constant expression",
                            variable.lexeme()
                        ),
                    );
                    None
                }
            }
        };

        Some(ParameterInfo {
            name: symbol.name.clone(),
            ty: symbol.ty,
            storage: symbol.storage,
            register,
            default_constant,
            output: symbol.output,
        })
    }

    // --- statements ---

    fn generate_statement(&mut self, node: &SyntaxNode) {
        let mark = self.next_register;
        match node.kind() {
            NodeKind::List => {
                for child in node.nodes() {
                    if child.kind() == NodeKind::Variable {
                        self.generate_variable(child);
                    } else {
                        self.generate_statement(child);
                    }
                }
            }
            NodeKind::Null => {}
            NodeKind::Return => {
                let _ = self.generate_expression(node.node(0));
                self.emit(Instruction::new(Opcode::Halt));
            }
            NodeKind::Break | NodeKind::Continue => self.generate_break_or_continue(node),
            NodeKind::If => self.generate_if(node),
            NodeKind::IfElse => self.generate_if_else(node),
            NodeKind::While => self.generate_while(node),
            NodeKind::For => self.generate_for(node),
            NodeKind::Solar => self.generate_solar(node),
            NodeKind::Illuminate => self.generate_illuminate(node),
            NodeKind::Illuminance => self.generate_illuminance(node),
            NodeKind::Ambient => self.generate_ambient(node),
            _ => {
                let _ = self.generate_expression(node);
            }
        }
        self.free_registers(mark);
    }

    fn generate_variable(&mut self, node: &SyntaxNode) {
        let initializer = node.node(0);
        if initializer.kind() == NodeKind::Null {
            return;
        }
        let Some(id) = node.symbol() else { return };
        let mark = self.next_register;
        let source = self.generate_expression(initializer);
        let destination = self.registers[&id];
        let symbol = self.symbol_table.symbol(id);
        let opcode = assign_opcode(symbol.ty);
        let dispatch = Dispatch::binary(
            symbol.storage.is_varying(),
            is_varying(initializer),
            symbol.ty.is_vec3(),
        );
        let mut instruction = Instruction::with_dispatch(opcode, dispatch);
        instruction.args[0] = destination;
        instruction.args[1] = source;
        self.emit(instruction);
        self.free_registers(mark);
    }

    fn generate_break_or_continue(&mut self, node: &SyntaxNode) {
        let level = if node.nodes().is_empty() {
            1
        } else {
            node.node(0).integer().max(1) as usize
        };
        debug_assert!(level <= self.loops.len(), "checked during analysis");
        let frame_index = self.loops.len() - level;
        let target_depth = self.loops[frame_index].mask_depth;

        // Pop the mask frames opened between here and the target loop; the
        // loop's own frame pops at its exit label.
        for _ in target_depth..self.mask_depth {
            self.emit(Instruction::new(Opcode::Reset));
        }
        let jump = self.emit(Instruction::new(Opcode::Jump));
        if node.kind() == NodeKind::Break {
            self.loops[frame_index].break_patches.push(jump);
        } else {
            self.loops[frame_index].continue_patches.push(jump);
        }
    }

    /// `if (E) S`: evaluate E, push a frame, narrow it, skip S when no lane
    /// survives, pop at the end label.
    fn generate_if(&mut self, node: &SyntaxNode) {
        let condition = self.generate_expression(node.node(0));
        self.emit(Instruction::new(Opcode::ClearMask));
        self.mask_depth += 1;
        let mut generate = Instruction::new(Opcode::GenerateMask);
        generate.args[0] = condition;
        self.emit(generate);
        let skip = self.emit(Instruction::new(Opcode::JumpEmpty));

        self.generate_statement(node.node(1));

        let end = self.emit(Instruction::new(Opcode::Reset));
        self.mask_depth -= 1;
        self.patch(skip, end);
    }

    /// `if (E) S else T`: the inverted frame runs T on exactly the lanes S
    /// skipped.
    fn generate_if_else(&mut self, node: &SyntaxNode) {
        let condition = self.generate_expression(node.node(0));
        self.emit(Instruction::new(Opcode::ClearMask));
        self.mask_depth += 1;
        let mut generate = Instruction::new(Opcode::GenerateMask);
        generate.args[0] = condition;
        self.emit(generate);
        let skip_then = self.emit(Instruction::new(Opcode::JumpEmpty));

        self.generate_statement(node.node(1));

        let invert = self.emit(Instruction::new(Opcode::InvertMask));
        self.patch(skip_then, invert);
        let skip_else = self.emit(Instruction::new(Opcode::JumpEmpty));

        self.generate_statement(node.node(2));

        let end = self.emit(Instruction::new(Opcode::Reset));
        self.mask_depth -= 1;
        self.patch(skip_else, end);
    }

    /// `while (E) S`: one frame, narrowed monotonically; a lane whose
    /// condition fails stays retired for the remaining iterations.
    fn generate_while(&mut self, node: &SyntaxNode) {
        self.emit(Instruction::new(Opcode::ClearMask));
        self.mask_depth += 1;
        self.loops.push(LoopFrame {
            mask_depth: self.mask_depth,
            break_patches: Vec::new(),
            continue_patches: Vec::new(),
        });

        let head = self.instructions.len();
        let mark = self.next_register;
        let condition = self.generate_expression(node.node(0));
        let mut generate = Instruction::new(Opcode::GenerateMask);
        generate.args[0] = condition;
        self.emit(generate);
        self.free_registers(mark);
        let exit = self.emit(Instruction::new(Opcode::JumpEmpty));

        self.generate_statement(node.node(1));

        let mut jump = Instruction::new(Opcode::Jump);
        jump.args[0] = head as i32;
        self.emit(jump);

        let done = self.emit(Instruction::new(Opcode::Reset));
        self.mask_depth -= 1;
        self.patch(exit, done);

        let frame = self.loops.pop().unwrap();
        for patch in frame.break_patches {
            self.patch(patch, done);
        }
        for patch in frame.continue_patches {
            self.patch(patch, head);
        }
    }

    /// `for (I; E; U) S` is `I; while (E) { S; U }` with `continue` aimed
    /// at the increment.
    fn generate_for(&mut self, node: &SyntaxNode) {
        let mark = self.next_register;
        let _ = self.generate_expression(node.node(0));
        self.free_registers(mark);

        self.emit(Instruction::new(Opcode::ClearMask));
        self.mask_depth += 1;
        self.loops.push(LoopFrame {
            mask_depth: self.mask_depth,
            break_patches: Vec::new(),
            continue_patches: Vec::new(),
        });

        let head = self.instructions.len();
        let mark = self.next_register;
        let condition = self.generate_expression(node.node(1));
        let mut generate = Instruction::new(Opcode::GenerateMask);
        generate.args[0] = condition;
        self.emit(generate);
        self.free_registers(mark);
        let exit = self.emit(Instruction::new(Opcode::JumpEmpty));

        self.generate_statement(node.node(3));

        let increment = self.instructions.len();
        let mark = self.next_register;
        let _ = self.generate_expression(node.node(2));
        self.free_registers(mark);
        let mut jump = Instruction::new(Opcode::Jump);
        jump.args[0] = head as i32;
        self.emit(jump);

        let done = self.emit(Instruction::new(Opcode::Reset));
        self.mask_depth -= 1;
        self.patch(exit, done);

        let frame = self.loops.pop().unwrap();
        for patch in frame.break_patches {
            self.patch(patch, done);
        }
        for patch in frame.continue_patches {
            self.patch(patch, increment);
        }
    }

    /// The machine holds one pending light at a time; `solar`, `illuminate`
    /// and `ambient` open one and the next boundary (another lighting
    /// instruction or the halt) captures the light color and opacity the
    /// body computed.
    fn generate_solar(&mut self, node: &SyntaxNode) {
        let parameters = node.node(0);
        let light_direction = self.register_of(node.node(2));
        let color = self.register_of(node.node(3));
        let opacity = self.register_of(node.node(4));

        if parameters.nodes().len() == 2 {
            let axis = self.generate_expression(parameters.node(0));
            let angle = self.generate_expression(parameters.node(1));
            let mut instruction = Instruction::new(Opcode::SolarAxisAngle);
            instruction.args = [light_direction, color, opacity, axis, angle, 0, 0];
            self.emit(instruction);
        } else {
            let mut instruction = Instruction::new(Opcode::Solar);
            instruction.args = [light_direction, color, opacity, -1, -1, 0, 0];
            self.emit(instruction);
        }
        self.generate_statement(node.node(1));
    }

    fn generate_illuminate(&mut self, node: &SyntaxNode) {
        let parameters = node.node(0);
        let surface_position = self.register_of(node.node(2));
        let light_direction = self.register_of(node.node(3));
        let color = self.register_of(node.node(4));
        let opacity = self.register_of(node.node(5));

        let position = self.generate_expression(parameters.node(0));
        let (opcode, axis, angle) = if parameters.nodes().len() == 3 {
            (
                Opcode::IlluminateAxisAngle,
                self.generate_expression(parameters.node(1)),
                self.generate_expression(parameters.node(2)),
            )
        } else {
            (Opcode::Illuminate, -1, -1)
        };

        let mut instruction = Instruction::new(opcode);
        instruction.args = [
            surface_position,
            light_direction,
            color,
            opacity,
            position,
            axis,
            angle,
        ];
        self.emit(instruction);
        self.generate_statement(node.node(1));
    }

    /// The surface-side integration loop: advance to the next contributing
    /// light or fall through, refill `L`, `Cl`, `Ol` and restrict the mask
    /// to the cone, run the body, loop.
    fn generate_illuminance(&mut self, node: &SyntaxNode) {
        let parameters = node.node(0);
        let light_direction = self.register_of(node.node(2));
        let color = self.register_of(node.node(3));
        let opacity = self.register_of(node.node(4));

        let position = self.generate_expression(parameters.node(0));
        let (axis, angle) = if parameters.nodes().len() == 3 {
            (
                self.generate_expression(parameters.node(1)),
                self.generate_expression(parameters.node(2)),
            )
        } else {
            (-1, -1)
        };

        let head = self.instructions.len();
        let advance = self.emit(Instruction::new(Opcode::JumpIlluminance));

        let mut fill = Instruction::new(Opcode::IlluminanceAxisAngle);
        fill.args = [light_direction, color, opacity, position, axis, angle, 0];
        self.emit(fill);
        self.mask_depth += 1;

        self.generate_statement(node.node(1));

        self.emit(Instruction::new(Opcode::Reset));
        self.mask_depth -= 1;
        let mut jump = Instruction::new(Opcode::Jump);
        jump.args[0] = head as i32;
        self.emit(jump);

        let end = self.instructions.len();
        self.patch(advance, end);
    }

    fn generate_ambient(&mut self, node: &SyntaxNode) {
        let color = self.register_of(node.node(0));
        let opacity = self.register_of(node.node(1));
        let mut instruction = Instruction::new(Opcode::Ambient);
        instruction.args[0] = color;
        instruction.args[1] = opacity;
        self.emit(instruction);
    }

    // --- expressions ---

    /// Emit an expression and return the register holding its value, with
    /// any recorded conversion and promotion applied.
    fn generate_expression(&mut self, node: &SyntaxNode) -> i32 {
        // Compile-time constants fold straight into the pool at their
        // converted type, so no conversion instruction follows them;
        // space-annotated casts transform at load time.
        let is_literal = matches!(
            node.kind(),
            NodeKind::Integer
                | NodeKind::Real
                | NodeKind::String
                | NodeKind::Triple
                | NodeKind::Sixteentuple
        );
        let mut register = -1;
        let mut folded = false;
        if is_literal || node.original_storage() == ValueStorage::Constant {
            if let Some(constant) = self.fold_constant(node) {
                register = self.add_constant_register(constant);
                folded = true;
            }
        }
        if !folded {
            register = self.generate_expression_inner(node);
            if node.original_type() == ValueType::Float && node.ty() != ValueType::Float {
                register = self.emit_conversion(node, register);
            }
        }
        if node.storage() == ValueStorage::Varying
            && matches!(
                node.original_storage(),
                ValueStorage::Uniform | ValueStorage::Constant
            )
        {
            register = self.emit_promotion(node, register);
        }
        register
    }

    fn generate_expression_inner(&mut self, node: &SyntaxNode) -> i32 {
        match node.kind() {
            NodeKind::Integer | NodeKind::Real | NodeKind::String | NodeKind::Triple
            | NodeKind::Sixteentuple => {
                self.error(
                    node.line(),
                    ErrorCode::Unimplemented,
                    "literal does not fold to a constant",
                );
                0
            }
            NodeKind::Identifier => self.generate_identifier(node),
            NodeKind::Dot | NodeKind::Cross => self.generate_binary(node, true),
            NodeKind::Multiply | NodeKind::Divide | NodeKind::Add | NodeKind::Subtract => {
                self.generate_binary(node, node.ty().is_vec3())
            }
            NodeKind::Greater
            | NodeKind::GreaterEqual
            | NodeKind::Less
            | NodeKind::LessEqual
            | NodeKind::And
            | NodeKind::Or => self.generate_binary(node, false),
            NodeKind::Equal | NodeKind::NotEqual => {
                let vec3 = node.node(0).ty().is_vec3();
                self.generate_binary(node, vec3)
            }
            NodeKind::Negate => self.generate_negate(node),
            NodeKind::Ternary => self.generate_ternary(node),
            NodeKind::Typecast => self.generate_typecast(node),
            NodeKind::Assign
            | NodeKind::AddAssign
            | NodeKind::SubtractAssign
            | NodeKind::MultiplyAssign
            | NodeKind::DivideAssign => self.generate_assignment(node),
            NodeKind::Call => self.generate_call(node),
            NodeKind::Texture | NodeKind::Environment | NodeKind::Shadow => {
                self.generate_sampling(node)
            }
            _ => {
                self.error(
                    node.line(),
                    ErrorCode::Unimplemented,
                    &format!("cannot generate code for {:?}", node.kind()),
                );
                0
            }
        }
    }

    fn generate_identifier(&mut self, node: &SyntaxNode) -> i32 {
        let Some(id) = node.symbol() else { return 0 };
        let symbol = self.symbol_table.symbol(id);
        if symbol.kind == SymbolKind::Constant {
            let value = Value::uniform_float(symbol.constant_value.unwrap_or(0.0));
            return self.add_constant_register(Constant::plain(value));
        }
        match self.registers.get(&id) {
            Some(register) => *register,
            None => {
                self.error(
                    node.line(),
                    ErrorCode::UnknownIdentifier,
                    &format!("'{}' has no storage", symbol.name),
                );
                0
            }
        }
    }

    fn generate_binary(&mut self, node: &SyntaxNode, vec3_operands: bool) -> i32 {
        let lhs = self.generate_expression(node.node(0));
        let rhs = self.generate_expression(node.node(1));
        let destination = self.allocate_register();
        let dispatch = Dispatch::binary(
            is_varying(node.node(0)),
            is_varying(node.node(1)),
            vec3_operands,
        );
        let mut instruction = Instruction::with_dispatch(node.instruction(), dispatch);
        instruction.args[0] = destination;
        instruction.args[1] = lhs;
        instruction.args[2] = rhs;
        self.emit(instruction);
        destination
    }

    fn generate_negate(&mut self, node: &SyntaxNode) -> i32 {
        let source = self.generate_expression(node.node(0));
        let destination = self.allocate_register();
        let dispatch = Dispatch::unary(is_varying(node.node(0)), node.ty().is_vec3());
        let mut instruction = Instruction::with_dispatch(node.instruction(), dispatch);
        instruction.args[0] = destination;
        instruction.args[1] = source;
        self.emit(instruction);
        destination
    }

    /// Ternaries merge through the mask: the then-value lands on the
    /// selected lanes, the inverted frame fills the rest. A uniform
    /// condition instead skips the untaken branch outright.
    fn generate_ternary(&mut self, node: &SyntaxNode) -> i32 {
        let destination = self.allocate_register();
        let opcode = assign_opcode(node.ty());
        let vec3 = node.ty().is_vec3();
        let varying = node.storage() == ValueStorage::Varying;

        let condition = self.generate_expression(node.node(0));
        self.emit(Instruction::new(Opcode::ClearMask));
        self.mask_depth += 1;
        let mut generate = Instruction::new(Opcode::GenerateMask);
        generate.args[0] = condition;
        self.emit(generate);

        if varying {
            let then_register = self.generate_expression(node.node(1));
            let mut assign = Instruction::with_dispatch(
                opcode,
                Dispatch::binary(true, is_varying(node.node(1)), vec3),
            );
            assign.args[0] = destination;
            assign.args[1] = then_register;
            self.emit(assign);

            self.emit(Instruction::new(Opcode::InvertMask));

            let else_register = self.generate_expression(node.node(2));
            let mut assign = Instruction::with_dispatch(
                opcode,
                Dispatch::binary(true, is_varying(node.node(2)), vec3),
            );
            assign.args[0] = destination;
            assign.args[1] = else_register;
            self.emit(assign);
        } else {
            let skip_then = self.emit(Instruction::new(Opcode::JumpEmpty));
            let then_register = self.generate_expression(node.node(1));
            let mut assign = Instruction::with_dispatch(opcode, Dispatch::binary(false, false, vec3));
            assign.args[0] = destination;
            assign.args[1] = then_register;
            self.emit(assign);
            let over_else = self.emit(Instruction::new(Opcode::Jump));

            let else_start = self.instructions.len();
            self.patch(skip_then, else_start);
            let else_register = self.generate_expression(node.node(2));
            let mut assign = Instruction::with_dispatch(opcode, Dispatch::binary(false, false, vec3));
            assign.args[0] = destination;
            assign.args[1] = else_register;
            self.emit(assign);
            let end = self.instructions.len();
            self.patch(over_else, end);
        }

        self.emit(Instruction::new(Opcode::Reset));
        self.mask_depth -= 1;
        destination
    }

    fn generate_typecast(&mut self, node: &SyntaxNode) -> i32 {
        let source = self.generate_expression(node.node(1));
        if node.instruction() == Opcode::Null {
            // A pure retype; the value's layout is unchanged.
            return source;
        }

        // A space-annotated cast of a runtime value: transform through the
        // coordinate oracle per sample.
        let space = node.node(0).node(0).lexeme().to_string();
        let space_register =
            self.add_constant_register(Constant::plain(Value::uniform_string(space)));
        let destination = self.allocate_register();
        let dispatch = Dispatch::unary(is_varying(node.node(1)), node.ty().is_vec3());
        let mut instruction = Instruction::with_dispatch(node.instruction(), dispatch);
        instruction.args[0] = destination;
        instruction.args[1] = source;
        instruction.args[2] = space_register;
        self.emit(instruction);
        destination
    }

    fn generate_assignment(&mut self, node: &SyntaxNode) -> i32 {
        let source = self.generate_expression(node.node(0));
        let Some(id) = node.symbol() else { return source };
        let Some(&destination) = self.registers.get(&id) else {
            return source;
        };
        let dispatch = Dispatch::binary(
            node.storage().is_varying(),
            is_varying(node.node(0)),
            node.ty().is_vec3(),
        );
        let mut instruction = Instruction::with_dispatch(node.instruction(), dispatch);
        instruction.args[0] = destination;
        instruction.args[1] = source;
        self.emit(instruction);
        destination
    }

    fn generate_call(&mut self, node: &SyntaxNode) -> i32 {
        let Some(id) = node.symbol() else { return 0 };
        let Some(signature_index) = node.signature() else { return 0 };
        let signature = &self.symbol_table.symbol(id).signatures[signature_index];
        let builtin = signature.builtin;
        let writes_first_argument = signature.writes_first_argument;

        let mut argument_registers = Vec::with_capacity(node.nodes().len());
        for argument in node.nodes() {
            argument_registers.push(self.generate_expression(argument));
        }

        let destination = if writes_first_argument {
            argument_registers[0]
        } else {
            self.allocate_register()
        };

        let mut instruction = Instruction::new(Opcode::call(argument_registers.len()));
        instruction.args[0] = destination;
        instruction.args[1] = builtin as i32;
        for (slot, register) in argument_registers.iter().enumerate() {
            instruction.args[2 + slot] = *register;
        }
        self.emit(instruction);
        destination
    }

    fn generate_sampling(&mut self, node: &SyntaxNode) -> i32 {
        let mut registers = Vec::with_capacity(node.nodes().len());
        for child in node.nodes() {
            registers.push(self.generate_expression(child));
        }
        let destination = self.allocate_register();
        let mut instruction = Instruction::new(node.instruction());
        instruction.args[0] = destination;
        for (slot, register) in registers.iter().enumerate().take(4) {
            instruction.args[1 + slot] = *register;
        }
        self.emit(instruction);
        destination
    }

    fn emit_conversion(&mut self, node: &SyntaxNode, source: i32) -> i32 {
        let opcode = match node.ty() {
            ValueType::Color => Opcode::FloatToColor,
            ValueType::Point => Opcode::FloatToPoint,
            ValueType::Vector => Opcode::FloatToVector,
            ValueType::Normal => Opcode::FloatToNormal,
            ValueType::Matrix => Opcode::FloatToMatrix,
            _ => return source,
        };
        let destination = self.allocate_register();
        // The operand is still a float; the conversion broadcasts it.
        let dispatch = Dispatch::unary(node.original_storage() == ValueStorage::Varying, false);
        let mut instruction = Instruction::with_dispatch(opcode, dispatch);
        instruction.args[0] = destination;
        instruction.args[1] = source;
        self.emit(instruction);
        destination
    }

    fn emit_promotion(&mut self, node: &SyntaxNode, source: i32) -> i32 {
        let opcode = if node.ty().is_vec3() {
            Opcode::PromoteVec3
        } else if node.ty() == ValueType::Matrix {
            Opcode::PromoteMatrix
        } else if node.ty() == ValueType::Float {
            Opcode::PromoteFloat
        } else {
            // Unpromotable types are rejected during semantic analysis.
            self.error(
                node.line(),
                ErrorCode::Unimplemented,
                &format!("cannot promote a {} value", node.ty().name()),
            );
            return source;
        };
        let destination = self.allocate_register();
        let mut instruction = Instruction::new(opcode);
        instruction.args[0] = destination;
        instruction.args[1] = source;
        self.emit(instruction);
        destination
    }

    // --- constants ---

    /// Evaluate a constant expression at compile time. Space-string casts
    /// keep the space name for the load-time transform.
    fn fold_constant(&self, node: &SyntaxNode) -> Option<Constant> {
        match node.kind() {
            NodeKind::Typecast => {
                let type_node = node.node(0);
                let inner = self.fold_scalar_or_vec3(node.node(1))?;
                let value = retype_constant(inner, node.ty())?;
                let space = type_node.nodes().first().map(|space_node| {
                    (space_kind(node.ty()), space_node.lexeme().to_string())
                });
                Some(Constant { value, space })
            }
            NodeKind::String => Some(Constant::plain(Value::uniform_string(node.lexeme()))),
            _ => {
                let value = self.fold_scalar_or_vec3(node)?;
                Some(Constant::plain(retype_constant(value, node.ty())?))
            }
        }
    }

    /// Literal folding below a typecast: floats, triples, sixteentuples and
    /// negations of them.
    fn fold_scalar_or_vec3(&self, node: &SyntaxNode) -> Option<FoldedValue> {
        match node.kind() {
            NodeKind::Integer | NodeKind::Real => Some(FoldedValue::Float(node.real())),
            NodeKind::Negate => match self.fold_scalar_or_vec3(node.node(0))? {
                FoldedValue::Float(f) => Some(FoldedValue::Float(-f)),
                FoldedValue::Vec3(v) => Some(FoldedValue::Vec3(-v)),
                FoldedValue::Mat4(_) => None,
            },
            NodeKind::Triple => {
                let mut components = [0.0f32; 3];
                for (component, child) in components.iter_mut().zip(node.nodes()) {
                    match self.fold_scalar_or_vec3(child)? {
                        FoldedValue::Float(f) => *component = f,
                        _ => return None,
                    }
                }
                Some(FoldedValue::Vec3(components.into()))
            }
            NodeKind::Sixteentuple => {
                let mut elements = [0.0f32; 16];
                for (element, child) in elements.iter_mut().zip(node.nodes()) {
                    match self.fold_scalar_or_vec3(child)? {
                        FoldedValue::Float(f) => *element = f,
                        _ => return None,
                    }
                }
                Some(FoldedValue::Mat4(Mat4::from_cols_array(&elements).transpose()))
            }
            NodeKind::Identifier => {
                let id = node.symbol()?;
                let symbol = self.symbol_table.symbol(id);
                symbol.constant_value.map(FoldedValue::Float)
            }
            NodeKind::Typecast => {
                // Nested casts without a space collapse into the outer one.
                if node.node(0).nodes().is_empty() {
                    self.fold_scalar_or_vec3(node.node(1))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn add_constant(&mut self, constant: Constant) -> usize {
        self.constants.push(constant);
        self.constants.len() - 1
    }

    fn add_constant_register(&mut self, constant: Constant) -> i32 {
        let index = self.add_constant(constant);
        constant_register(index)
    }

    // --- registers and emission ---

    fn allocate_register(&mut self) -> i32 {
        let register = self.next_register;
        self.next_register += 1;
        self.max_register = self.max_register.max(self.next_register);
        register
    }

    fn free_registers(&mut self, mark: i32) {
        self.next_register = mark;
    }

    fn register_of(&mut self, node: &SyntaxNode) -> i32 {
        self.generate_identifier(node)
    }

    fn emit(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    fn patch(&mut self, at: usize, target: usize) {
        self.instructions[at].args[0] = target as i32;
    }

    fn error(&mut self, line: usize, code: ErrorCode, message: &str) {
        self.errors += 1;
        self.error_policy
            .error(code, &format!("({}): {}", line, message));
    }
}

enum FoldedValue {
    Float(f32),
    Vec3(glam::Vec3),
    Mat4(Mat4),
}

/// Build a pool value of `ty` from a folded literal, broadcasting floats
/// into the wider types.
fn retype_constant(folded: FoldedValue, ty: ValueType) -> Option<Value> {
    match (folded, ty) {
        (FoldedValue::Float(f), ValueType::Float) => Some(Value::uniform_float(f)),
        (FoldedValue::Float(f), ty) if ty.is_vec3() => {
            Some(Value::uniform_vec3(ty, glam::Vec3::splat(f)))
        }
        (FoldedValue::Float(f), ValueType::Matrix) => {
            Some(Value::uniform_matrix(Mat4::from_diagonal(Vec4::splat(f))))
        }
        (FoldedValue::Vec3(v), ty) if ty.is_vec3() => Some(Value::uniform_vec3(ty, v)),
        (FoldedValue::Mat4(m), ValueType::Matrix) => Some(Value::uniform_matrix(m)),
        _ => None,
    }
}

fn space_kind(ty: ValueType) -> SpaceKind {
    match ty {
        ValueType::Point => SpaceKind::Point,
        ValueType::Vector => SpaceKind::Vector,
        ValueType::Normal => SpaceKind::Normal,
        ValueType::Matrix => SpaceKind::Matrix,
        _ => SpaceKind::Color,
    }
}

fn assign_opcode(ty: ValueType) -> Opcode {
    match ty {
        ValueType::Matrix => Opcode::AssignMat4x4,
        ValueType::String => Opcode::AssignString,
        ValueType::Integer => Opcode::AssignInteger,
        ty if ty.is_vec3() => Opcode::AssignVec3,
        _ => Opcode::AssignFloat,
    }
}

/// Storage as the kernels see it: constants read like uniforms.
fn is_varying(node: &SyntaxNode) -> bool {
    node.storage() == ValueStorage::Varying
}
