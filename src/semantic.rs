use crate::ast::{NodeKind, SyntaxNode};
use crate::error::{ErrorCode, ErrorPolicy};
use crate::instruction::Opcode;
use crate::symbol::{SymbolKind, SymbolTable};
use crate::value::{ValueStorage, ValueType};
use log::trace;

/// The annotation pass. Walks the parsed tree and assigns a type and a
/// storage class to every expression node, records implicit conversions and
/// promotions in the node's original/current fields, resolves call overloads
/// and selects instruction opcodes. Errors are streamed to the policy and
/// counted; code generation only runs on a cleanly annotated tree.
pub struct SemanticAnalyzer<'a> {
    symbol_table: &'a SymbolTable,
    error_policy: &'a dyn ErrorPolicy,
    errors: usize,
    loop_depth: usize,
}

impl<'a> SemanticAnalyzer<'a> {
    pub fn new(symbol_table: &'a SymbolTable, error_policy: &'a dyn ErrorPolicy) -> Self {
        SemanticAnalyzer {
            symbol_table,
            error_policy,
            errors: 0,
            loop_depth: 0,
        }
    }

    /// Annotate a shader definition node. Returns the number of errors.
    pub fn analyze_shader(mut self, shader: &mut SyntaxNode) -> usize {
        debug_assert!(matches!(
            shader.kind(),
            NodeKind::LightShader
                | NodeKind::SurfaceShader
                | NodeKind::VolumeShader
                | NodeKind::DisplacementShader
                | NodeKind::ImagerShader
        ));

        // Formals: each declarator's initializer converts to the declared
        // parameter type.
        for variable in shader.node_mut(0).nodes_mut() {
            self.analyze_variable(variable);
        }
        self.analyze_statement(shader.node_mut(1));
        self.errors
    }

    fn analyze_statement(&mut self, node: &mut SyntaxNode) {
        trace!("analyze_statement: {:?}", node.kind());
        match node.kind() {
            NodeKind::List => {
                for child in node.nodes_mut() {
                    if child.kind() == NodeKind::Variable {
                        self.analyze_variable(child);
                    } else {
                        self.analyze_statement(child);
                    }
                }
            }
            NodeKind::Null => {}
            NodeKind::Return => {
                self.analyze_expression(node.node_mut(0), ValueType::Null);
            }
            NodeKind::Break | NodeKind::Continue => {
                let level = if node.nodes().is_empty() {
                    1
                } else {
                    node.node(0).integer().max(1) as usize
                };
                if level > self.loop_depth {
                    let what = if node.kind() == NodeKind::Break { "break" } else { "continue" };
                    self.error(
                        node.line(),
                        ErrorCode::SyntaxError,
                        &format!("'{}' level {} exceeds the enclosing loop depth", what, level),
                    );
                }
            }
            NodeKind::If | NodeKind::IfElse => {
                self.analyze_condition(node.node_mut(0));
                self.analyze_statement(node.node_mut(1));
                if node.kind() == NodeKind::IfElse {
                    self.analyze_statement(node.node_mut(2));
                }
            }
            NodeKind::While => {
                self.analyze_condition(node.node_mut(0));
                self.loop_depth += 1;
                self.analyze_statement(node.node_mut(1));
                self.loop_depth -= 1;
            }
            NodeKind::For => {
                self.analyze_expression(node.node_mut(0), ValueType::Null);
                self.analyze_condition(node.node_mut(1));
                self.analyze_expression(node.node_mut(2), ValueType::Null);
                self.loop_depth += 1;
                self.analyze_statement(node.node_mut(3));
                self.loop_depth -= 1;
            }
            NodeKind::Solar => self.analyze_lighting_statement(node, &[]),
            NodeKind::Illuminate | NodeKind::Illuminance => {
                self.analyze_lighting_statement(node, &[ValueType::Point])
            }
            NodeKind::Ambient => {
                for child in node.nodes_mut() {
                    self.analyze_expression(child, ValueType::Null);
                }
            }
            // An expression used as a statement.
            _ => {
                self.analyze_expression(node, ValueType::Null);
            }
        }
    }

    /// Conditions evaluate to float, 0 meaning false.
    fn analyze_condition(&mut self, node: &mut SyntaxNode) {
        let (ty, _) = self.analyze_expression(node, ValueType::Float);
        if ty != ValueType::Float && ty != ValueType::Null {
            self.error(
                node.line(),
                ErrorCode::TypeMismatch,
                &format!("condition is {}, expected float", ty.name()),
            );
        }
    }

    /// Solar/illuminate/illuminance: typed positional parameters, the body,
    /// then the implicit global identifiers attached by the parser. The
    /// optional trailing axis/angle pair is common to all three.
    fn analyze_lighting_statement(&mut self, node: &mut SyntaxNode, leading: &[ValueType]) {
        let parameter_count = node.node(0).nodes().len();
        for index in 0..parameter_count {
            let expected = if index < leading.len() {
                leading[index]
            } else if index == parameter_count - 1 {
                ValueType::Float // the cone angle
            } else {
                ValueType::Vector // the axis
            };
            let parameter = node.node_mut(0).node_mut(index);
            let (ty, _) = self.analyze_expression(parameter, expected);
            if expected == ValueType::Float && ty != ValueType::Float {
                self.error(
                    parameter.line(),
                    ErrorCode::TypeMismatch,
                    &format!("angle parameter is {}, expected float", ty.name()),
                );
            } else if expected != ValueType::Float && !ty.is_vec3() && ty != ValueType::Null {
                self.error(
                    parameter.line(),
                    ErrorCode::TypeMismatch,
                    &format!("parameter is {}, expected a point-like type", ty.name()),
                );
            }
        }
        self.analyze_statement(node.node_mut(1));
        for index in 2..node.nodes().len() {
            self.analyze_expression(node.node_mut(index), ValueType::Null);
        }
    }

    /// A declarator: bind the initializer to the declared type and storage.
    fn analyze_variable(&mut self, node: &mut SyntaxNode) {
        debug_assert!(node.kind() == NodeKind::Variable);
        let Some(symbol) = node.symbol() else { return };
        let symbol = self.symbol_table.symbol(symbol);
        let (ty, storage) = (symbol.ty, symbol.storage);
        node.set_type(ty);
        node.set_storage(storage);

        let initializer = node.node_mut(0);
        if initializer.kind() == NodeKind::Null {
            return;
        }
        let (actual, actual_storage) = self.analyze_expression(initializer, ty);
        if actual != ValueType::Null {
            self.convert(initializer, ty);
        }
        match (storage, actual_storage) {
            (ValueStorage::Uniform, ValueStorage::Varying) => {
                self.error(
                    node.line(),
                    ErrorCode::StorageMismatch,
                    &format!("uniform '{}' initialized from a varying expression", node.lexeme()),
                );
            }
            (ValueStorage::Varying, ValueStorage::Uniform | ValueStorage::Constant) => {
                self.promote_to_varying(initializer);
            }
            _ => {}
        }
    }

    /// Annotate an expression node, returning its (type, storage). The
    /// expected type steers context-dependent nodes (triples, texture
    /// lookups) but conversion to it is the caller's decision.
    fn analyze_expression(
        &mut self,
        node: &mut SyntaxNode,
        expected: ValueType,
    ) -> (ValueType, ValueStorage) {
        trace!("analyze_expression: {:?}", node.kind());
        node.set_expected_type(expected);
        match node.kind() {
            NodeKind::Integer | NodeKind::Real => {
                node.set_type(ValueType::Float);
                node.set_storage(ValueStorage::Constant);
            }
            NodeKind::String => {
                node.set_type(ValueType::String);
                node.set_storage(ValueStorage::Constant);
            }
            NodeKind::Triple => self.analyze_triple(node, expected),
            NodeKind::Sixteentuple => self.analyze_sixteentuple(node),
            NodeKind::Identifier => {
                if let Some(id) = node.symbol() {
                    let symbol = self.symbol_table.symbol(id);
                    node.set_type(symbol.ty);
                    node.set_storage(symbol.storage);
                }
            }
            NodeKind::Dot => self.analyze_dot(node),
            NodeKind::Cross => self.analyze_cross(node),
            NodeKind::Multiply | NodeKind::Divide | NodeKind::Add | NodeKind::Subtract => {
                self.analyze_arithmetic(node)
            }
            NodeKind::Greater
            | NodeKind::GreaterEqual
            | NodeKind::Less
            | NodeKind::LessEqual
            | NodeKind::Equal
            | NodeKind::NotEqual => self.analyze_comparison(node),
            NodeKind::And | NodeKind::Or => self.analyze_logical(node),
            NodeKind::Negate => self.analyze_negate(node),
            NodeKind::Ternary => self.analyze_ternary(node, expected),
            NodeKind::Typecast => self.analyze_typecast(node),
            NodeKind::Assign
            | NodeKind::AddAssign
            | NodeKind::SubtractAssign
            | NodeKind::MultiplyAssign
            | NodeKind::DivideAssign => self.analyze_assignment(node),
            NodeKind::Call => self.analyze_call(node),
            NodeKind::Texture | NodeKind::Environment => self.analyze_texture(node, expected),
            NodeKind::Shadow => self.analyze_shadow(node),
            NodeKind::Null => {}
            _ => {
                self.error(
                    node.line(),
                    ErrorCode::SyntaxError,
                    &format!("{:?} is not an expression", node.kind()),
                );
            }
        }
        (node.ty(), node.storage())
    }

    /// Triples build compile-time constants; each component must be a
    /// numeric literal (possibly negated).
    fn analyze_triple(&mut self, node: &mut SyntaxNode, expected: ValueType) {
        for child in node.nodes_mut() {
            if !is_literal_component(child) {
                self.errors += 1;
                self.error_policy.error(
                    ErrorCode::Unimplemented,
                    &format!(
                        "({}): tuple components must be numeric literals",
                        child.line()
                    ),
                );
            }
        }
        let ty = if expected.is_vec3() { expected } else { ValueType::Color };
        node.set_type(ty);
        node.set_storage(ValueStorage::Constant);
    }

    fn analyze_sixteentuple(&mut self, node: &mut SyntaxNode) {
        for child in node.nodes_mut() {
            if !is_literal_component(child) {
                self.errors += 1;
                self.error_policy.error(
                    ErrorCode::Unimplemented,
                    &format!(
                        "({}): tuple components must be numeric literals",
                        child.line()
                    ),
                );
            }
        }
        node.set_type(ValueType::Matrix);
        node.set_storage(ValueStorage::Constant);
    }

    fn analyze_dot(&mut self, node: &mut SyntaxNode) {
        let (lhs, lhs_storage) = self.analyze_expression(node.node_mut(0), ValueType::Vector);
        let (rhs, rhs_storage) = self.analyze_expression(node.node_mut(1), ValueType::Vector);
        if !(lhs.is_vec3() && rhs.is_vec3()) && lhs != ValueType::Null && rhs != ValueType::Null {
            self.error(
                node.line(),
                ErrorCode::TypeMismatch,
                &format!("'.' applied to {} and {}", lhs.name(), rhs.name()),
            );
        }
        node.set_type(ValueType::Float);
        node.set_storage(join_storage(lhs_storage, rhs_storage));
        node.set_instruction(Opcode::Dot);
    }

    fn analyze_cross(&mut self, node: &mut SyntaxNode) {
        let (lhs, lhs_storage) = self.analyze_expression(node.node_mut(0), ValueType::Vector);
        let (rhs, rhs_storage) = self.analyze_expression(node.node_mut(1), ValueType::Vector);
        if !(lhs.is_vec3() && rhs.is_vec3()) && lhs != ValueType::Null && rhs != ValueType::Null {
            self.error(
                node.line(),
                ErrorCode::TypeMismatch,
                &format!("'^' applied to {} and {}", lhs.name(), rhs.name()),
            );
        }
        node.set_type(ValueType::Vector);
        node.set_storage(join_storage(lhs_storage, rhs_storage));
        node.set_instruction(Opcode::Cross);
    }

    fn analyze_arithmetic(&mut self, node: &mut SyntaxNode) {
        let (lhs, lhs_storage) = self.analyze_expression(node.node_mut(0), ValueType::Null);
        let (rhs, rhs_storage) = self.analyze_expression(node.node_mut(1), ValueType::Null);
        if lhs == ValueType::Null || rhs == ValueType::Null {
            return;
        }

        let vec3 = lhs.is_vec3() || rhs.is_vec3();
        let ty = if vec3 {
            // `vec3 op float` broadcasts the float operand.
            let ty = if lhs.is_vec3() { lhs } else { rhs };
            if !lhs.is_vec3() {
                self.convert(node.node_mut(0), ty);
            }
            if !rhs.is_vec3() {
                self.convert(node.node_mut(1), ty);
            }
            ty
        } else if lhs == ValueType::Float && rhs == ValueType::Float {
            ValueType::Float
        } else {
            self.error(
                node.line(),
                ErrorCode::TypeMismatch,
                &format!("arithmetic on {} and {}", lhs.name(), rhs.name()),
            );
            return;
        };

        node.set_type(ty);
        node.set_storage(join_storage(lhs_storage, rhs_storage));
        node.set_instruction(match (node.kind(), vec3) {
            (NodeKind::Multiply, false) => Opcode::MultiplyFloat,
            (NodeKind::Multiply, true) => Opcode::MultiplyVec3,
            (NodeKind::Divide, false) => Opcode::DivideFloat,
            (NodeKind::Divide, true) => Opcode::DivideVec3,
            (NodeKind::Add, false) => Opcode::AddFloat,
            (NodeKind::Add, true) => Opcode::AddVec3,
            (NodeKind::Subtract, false) => Opcode::SubtractFloat,
            (NodeKind::Subtract, true) => Opcode::SubtractVec3,
            _ => unreachable!(),
        });
    }

    fn analyze_comparison(&mut self, node: &mut SyntaxNode) {
        let (lhs, lhs_storage) = self.analyze_expression(node.node_mut(0), ValueType::Float);
        let (rhs, rhs_storage) = self.analyze_expression(node.node_mut(1), ValueType::Float);
        if lhs == ValueType::Null || rhs == ValueType::Null {
            return;
        }

        let equality = matches!(node.kind(), NodeKind::Equal | NodeKind::NotEqual);
        let vec3 = lhs.is_vec3() && rhs.is_vec3();
        if vec3 && !equality {
            self.error(
                node.line(),
                ErrorCode::TypeMismatch,
                "ordered comparison of point-like values",
            );
            return;
        }
        if !vec3 && (lhs != ValueType::Float || rhs != ValueType::Float) {
            self.error(
                node.line(),
                ErrorCode::TypeMismatch,
                &format!("comparison of {} and {}", lhs.name(), rhs.name()),
            );
            return;
        }

        node.set_type(ValueType::Float);
        node.set_storage(join_storage(lhs_storage, rhs_storage));
        node.set_instruction(match (node.kind(), vec3) {
            (NodeKind::Greater, _) => Opcode::Greater,
            (NodeKind::GreaterEqual, _) => Opcode::GreaterEqual,
            (NodeKind::Less, _) => Opcode::Less,
            (NodeKind::LessEqual, _) => Opcode::LessEqual,
            (NodeKind::Equal, false) => Opcode::EqualFloat,
            (NodeKind::Equal, true) => Opcode::EqualVec3,
            (NodeKind::NotEqual, false) => Opcode::NotEqualFloat,
            (NodeKind::NotEqual, true) => Opcode::NotEqualVec3,
            _ => unreachable!(),
        });
    }

    fn analyze_logical(&mut self, node: &mut SyntaxNode) {
        let (lhs, lhs_storage) = self.analyze_expression(node.node_mut(0), ValueType::Float);
        let (rhs, rhs_storage) = self.analyze_expression(node.node_mut(1), ValueType::Float);
        if (lhs != ValueType::Float && lhs != ValueType::Null)
            || (rhs != ValueType::Float && rhs != ValueType::Null)
        {
            self.error(
                node.line(),
                ErrorCode::TypeMismatch,
                "logical operator applied to non-float operands",
            );
        }
        node.set_type(ValueType::Float);
        node.set_storage(join_storage(lhs_storage, rhs_storage));
        node.set_instruction(if node.kind() == NodeKind::And {
            Opcode::And
        } else {
            Opcode::Or
        });
    }

    fn analyze_negate(&mut self, node: &mut SyntaxNode) {
        let (ty, storage) = self.analyze_expression(node.node_mut(0), ValueType::Null);
        if ty == ValueType::Null {
            return;
        }
        if ty != ValueType::Float && !ty.is_vec3() {
            self.error(
                node.line(),
                ErrorCode::TypeMismatch,
                &format!("negation of {}", ty.name()),
            );
            return;
        }
        node.set_type(ty);
        node.set_storage(storage);
        node.set_instruction(if ty.is_vec3() {
            Opcode::NegateVec3
        } else {
            Opcode::NegateFloat
        });
    }

    fn analyze_ternary(&mut self, node: &mut SyntaxNode, expected: ValueType) {
        self.analyze_condition(node.node_mut(0));
        let condition_storage = node.node(0).storage();
        let (then_ty, then_storage) = self.analyze_expression(node.node_mut(1), expected);
        let (else_ty, else_storage) = self.analyze_expression(node.node_mut(2), expected);
        if then_ty == ValueType::Null || else_ty == ValueType::Null {
            return;
        }

        let ty = if then_ty.is_vec3() || else_ty.is_vec3() {
            let ty = if then_ty.is_vec3() { then_ty } else { else_ty };
            if !then_ty.is_vec3() {
                self.convert(node.node_mut(1), ty);
            }
            if !else_ty.is_vec3() {
                self.convert(node.node_mut(2), ty);
            }
            ty
        } else if then_ty == else_ty {
            then_ty
        } else {
            self.error(
                node.line(),
                ErrorCode::TypeMismatch,
                &format!("ternary branches are {} and {}", then_ty.name(), else_ty.name()),
            );
            return;
        };

        node.set_type(ty);
        node.set_storage(join_storage(
            condition_storage,
            join_storage(then_storage, else_storage),
        ));
    }

    fn analyze_typecast(&mut self, node: &mut SyntaxNode) {
        let target = node.node(0).value_type();
        let has_space = !node.node(0).nodes().is_empty();
        let (ty, storage) = self.analyze_expression(node.node_mut(1), target);
        if ty == ValueType::Null {
            return;
        }

        if target.is_vec3() {
            if ty == ValueType::Float {
                self.convert(node.node_mut(1), target);
            } else if !ty.is_vec3() {
                self.error(
                    node.line(),
                    ErrorCode::TypeMismatch,
                    &format!("cannot cast {} to {}", ty.name(), target.name()),
                );
                return;
            }
        } else if target == ValueType::Matrix {
            if ty == ValueType::Float {
                self.convert(node.node_mut(1), target);
            } else if ty != ValueType::Matrix {
                self.error(
                    node.line(),
                    ErrorCode::TypeMismatch,
                    &format!("cannot cast {} to matrix", ty.name()),
                );
                return;
            }
        } else if target != ty {
            self.error(
                node.line(),
                ErrorCode::TypeMismatch,
                &format!("cannot cast {} to {}", ty.name(), target.name()),
            );
            return;
        }

        node.set_type(target);
        node.set_storage(storage);
        if has_space {
            node.set_instruction(match target {
                ValueType::Point => Opcode::Transform,
                ValueType::Vector => Opcode::TransformVector,
                ValueType::Normal => Opcode::TransformNormal,
                ValueType::Color => Opcode::TransformColor,
                ValueType::Matrix => Opcode::TransformMatrix,
                _ => {
                    self.error(
                        node.line(),
                        ErrorCode::TypeMismatch,
                        "a coordinate space applies to point-like, color or matrix casts",
                    );
                    Opcode::Null
                }
            });
        }
    }

    fn analyze_assignment(&mut self, node: &mut SyntaxNode) {
        let Some(id) = node.symbol() else {
            self.analyze_expression(node.node_mut(0), ValueType::Null);
            return;
        };
        let symbol = self.symbol_table.symbol(id);
        let (ty, storage) = (symbol.ty, symbol.storage);

        if symbol.kind == SymbolKind::Constant {
            self.error(
                node.line(),
                ErrorCode::TypeMismatch,
                &format!("assignment to constant '{}'", symbol.name),
            );
            return;
        }

        let (actual, actual_storage) = self.analyze_expression(node.node_mut(0), ty);
        if actual == ValueType::Null {
            return;
        }
        self.convert(node.node_mut(0), ty);

        match (storage, actual_storage) {
            (ValueStorage::Uniform, ValueStorage::Varying) => {
                self.error(
                    node.line(),
                    ErrorCode::StorageMismatch,
                    &format!("uniform '{}' assigned from a varying expression", node.lexeme()),
                );
                return;
            }
            (ValueStorage::Varying, ValueStorage::Uniform | ValueStorage::Constant) => {
                self.promote_to_varying(node.node_mut(0));
            }
            _ => {}
        }

        node.set_type(ty);
        node.set_storage(storage);
        let vec3 = ty.is_vec3();
        node.set_instruction(match (node.kind(), vec3, ty) {
            (NodeKind::Assign, _, ValueType::Matrix) => Opcode::AssignMat4x4,
            (NodeKind::Assign, _, ValueType::String) => Opcode::AssignString,
            (NodeKind::Assign, true, _) => Opcode::AssignVec3,
            (NodeKind::Assign, false, _) => Opcode::AssignFloat,
            (NodeKind::AddAssign, true, _) => Opcode::AddAssignVec3,
            (NodeKind::AddAssign, false, _) => Opcode::AddAssignFloat,
            (NodeKind::SubtractAssign, true, _) => Opcode::SubtractAssignVec3,
            (NodeKind::SubtractAssign, false, _) => Opcode::SubtractAssignFloat,
            (NodeKind::MultiplyAssign, true, _) => Opcode::MultiplyAssignVec3,
            (NodeKind::MultiplyAssign, false, _) => Opcode::MultiplyAssignFloat,
            (NodeKind::DivideAssign, true, _) => Opcode::DivideAssignVec3,
            (NodeKind::DivideAssign, false, _) => Opcode::DivideAssignFloat,
            _ => Opcode::Null,
        });
    }

    /// Overload resolution. Candidates are scored per argument: an exact
    /// match costs nothing, a uniform argument for a varying parameter costs
    /// a promotion, a float argument for a point-like parameter costs a
    /// conversion. The cheapest signature wins; registration order breaks
    /// ties.
    fn analyze_call(&mut self, node: &mut SyntaxNode) {
        let mut arguments = Vec::new();
        for index in 0..node.nodes().len() {
            arguments.push(self.analyze_expression(node.node_mut(index), ValueType::Null));
        }
        let Some(id) = node.symbol() else { return };
        let symbol = self.symbol_table.symbol(id);

        if symbol.kind == SymbolKind::Function {
            self.error(
                node.line(),
                ErrorCode::Unimplemented,
                &format!("calls to shading-language functions ('{}') are not implemented", symbol.name),
            );
            return;
        }
        if symbol.kind != SymbolKind::Builtin {
            self.error(
                node.line(),
                ErrorCode::TypeMismatch,
                &format!("'{}' is not a function", symbol.name),
            );
            return;
        }
        if arguments.iter().any(|(ty, _)| *ty == ValueType::Null) {
            return;
        }

        let mut best: Option<(usize, u32)> = None;
        for (index, signature) in symbol.signatures.iter().enumerate() {
            if let Some(score) = score_signature(signature, &arguments) {
                if best.map_or(true, |(_, best_score)| score < best_score) {
                    best = Some((index, score));
                }
            }
        }

        let Some((chosen, _)) = best else {
            let argument_types: Vec<&str> =
                arguments.iter().map(|(ty, _)| ty.name()).collect();
            self.error(
                node.line(),
                ErrorCode::OverloadNotFound,
                &format!("no overload of '{}' takes ({})", symbol.name, argument_types.join(", ")),
            );
            return;
        };

        let signature = &symbol.signatures[chosen];
        for (index, ((argument_ty, argument_storage), (parameter_ty, parameter_storage))) in
            arguments.iter().zip(signature.parameters.iter().map(|p| *p)).enumerate()
        {
            let argument = node.node_mut(index);
            if *argument_ty == ValueType::Float && parameter_ty.is_vec3() {
                argument.set_type_for_conversion(parameter_ty);
            }
            if parameter_storage == ValueStorage::Varying
                && *argument_storage != ValueStorage::Varying
            {
                self.promote_to_varying(argument);
            }
        }

        node.set_type(signature.return_type);
        node.set_storage(if signature.varying_result {
            ValueStorage::Varying
        } else {
            arguments
                .iter()
                .fold(ValueStorage::Uniform, |acc, (_, storage)| join_storage(acc, *storage))
        });
        node.set_signature(chosen);
        node.set_instruction(Opcode::call(arguments.len()));
    }

    /// Texture and environment lookups read a float channel unless the
    /// context expects a point-like result.
    fn analyze_texture(&mut self, node: &mut SyntaxNode, expected: ValueType) {
        let environment = node.kind() == NodeKind::Environment;
        let mut storage = ValueStorage::Uniform;
        for index in 0..node.nodes().len() {
            let child_expected = if index == 0 { ValueType::String } else { ValueType::Null };
            let (_, child_storage) = self.analyze_expression(node.node_mut(index), child_expected);
            storage = join_storage(storage, child_storage);
        }
        if node.nodes().is_empty() || node.node(0).ty() != ValueType::String {
            self.error(
                node.line(),
                ErrorCode::TypeMismatch,
                "the first sampling parameter is the map name",
            );
            return;
        }
        let expected_arity = if environment { 2 } else { 3 };
        if node.nodes().len() != expected_arity {
            self.error(
                node.line(),
                ErrorCode::TypeMismatch,
                "wrong number of sampling parameters",
            );
            return;
        }

        let vec3 = expected.is_vec3();
        node.set_type(if vec3 { ValueType::Color } else { ValueType::Float });
        node.set_storage(storage);
        node.set_instruction(match (environment, vec3) {
            (false, false) => Opcode::FloatTexture,
            (false, true) => Opcode::Vec3Texture,
            (true, false) => Opcode::FloatEnvironment,
            (true, true) => Opcode::Vec3Environment,
        });
    }

    fn analyze_shadow(&mut self, node: &mut SyntaxNode) {
        let mut storage = ValueStorage::Uniform;
        for index in 0..node.nodes().len() {
            let child_expected = if index == 0 { ValueType::String } else { ValueType::Null };
            let (_, child_storage) = self.analyze_expression(node.node_mut(index), child_expected);
            storage = join_storage(storage, child_storage);
        }
        if node.nodes().len() != 2 || node.node(0).ty() != ValueType::String {
            self.error(
                node.line(),
                ErrorCode::TypeMismatch,
                "shadow takes the map name and a position",
            );
            return;
        }
        node.set_type(ValueType::Float);
        node.set_storage(storage);
        node.set_instruction(Opcode::Shadow);
    }

    /// Record a uniform-to-varying promotion. Float, point-like and matrix
    /// values widen by broadcast; strings have no varying form.
    fn promote_to_varying(&mut self, node: &mut SyntaxNode) {
        if node.ty() == ValueType::String {
            self.error(
                node.line(),
                ErrorCode::StorageMismatch,
                "a string value cannot be promoted to varying",
            );
            return;
        }
        node.set_storage_for_promotion(ValueStorage::Varying);
    }

    /// Record an implicit conversion of `node` to `target`, reporting a
    /// mismatch when no conversion exists.
    fn convert(&mut self, node: &mut SyntaxNode, target: ValueType) {
        let ty = node.ty();
        if ty == target || target == ValueType::Null || ty == ValueType::Null {
            return;
        }
        let allowed = (ty == ValueType::Float && (target.is_vec3() || target == ValueType::Matrix))
            || (ty.is_vec3() && target.is_vec3());
        if allowed {
            node.set_type_for_conversion(target);
        } else {
            self.error(
                node.line(),
                ErrorCode::TypeMismatch,
                &format!("expression is {}, expected {}", ty.name(), target.name()),
            );
        }
    }

    fn error(&mut self, line: usize, code: ErrorCode, message: &str) {
        self.errors += 1;
        self.error_policy.error(code, &format!("({}): {}", line, message));
    }
}

/// Result storage of an operation over two operands: varying wins.
fn join_storage(a: ValueStorage, b: ValueStorage) -> ValueStorage {
    if a == ValueStorage::Varying || b == ValueStorage::Varying {
        ValueStorage::Varying
    } else {
        ValueStorage::Uniform
    }
}

fn is_literal_component(node: &SyntaxNode) -> bool {
    match node.kind() {
        NodeKind::Integer | NodeKind::Real => true,
        NodeKind::Negate => node.nodes().len() == 1 && is_literal_component(node.node(0)),
        _ => false,
    }
}

/// Cost of calling `signature` with `arguments`, or `None` on a mismatch.
fn score_signature(
    signature: &crate::symbol::Signature,
    arguments: &[(ValueType, ValueStorage)],
) -> Option<u32> {
    if signature.parameters.len() != arguments.len() {
        return None;
    }
    let mut score = 0;
    for ((parameter_ty, parameter_storage), (argument_ty, argument_storage)) in
        signature.parameters.iter().zip(arguments)
    {
        score += match (*argument_ty, *parameter_ty) {
            (a, p) if a == p => 0,
            (a, p) if a.is_vec3() && p.is_vec3() => 0,
            (ValueType::Float, p) if p.is_vec3() => 3,
            _ => return None,
        };
        score += match (*argument_storage, *parameter_storage) {
            (a, p) if a == p => 0,
            (ValueStorage::Constant | ValueStorage::Uniform, ValueStorage::Uniform) => 0,
            (ValueStorage::Constant | ValueStorage::Uniform, ValueStorage::Varying) => 2,
            (ValueStorage::Varying, ValueStorage::Varying) => 0,
            // A varying argument cannot feed a uniform parameter.
            (ValueStorage::Varying, ValueStorage::Uniform) => return None,
            _ => 0,
        };
    }
    Some(score)
}
