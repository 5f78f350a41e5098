use crate::ast::{NodeKind, SyntaxNode};
use crate::error::{ErrorCode, ErrorPolicy};
use crate::lexer::{Spanned, Token};
use crate::symbol::{ShaderKind, SymbolId, SymbolKind, SymbolTable};
use crate::value::{ValueStorage, ValueType};
use log::trace;

/// Recursive-descent parser for the shading language. Semantic actions run
/// as productions reduce: scopes are pushed and popped, declarators create
/// symbols, identifiers bind, and the lighting statements collect their
/// implicit globals so code generation needs no name lookups.
///
/// Soft errors (unknown identifiers, unimplemented constructs) are streamed
/// to the error policy and counted; parsing continues, but a non-zero count
/// at end of input suppresses the tree.
pub struct Parser<'a> {
    tokens: Vec<Spanned>,
    current: usize,
    symbol_table: &'a mut SymbolTable,
    error_policy: &'a dyn ErrorPolicy,
    errors: usize,
    solar_and_illuminate_statements: usize,
}

/// Hard syntax failure; the message has already been shaped for reporting.
struct SyntaxFault(String);

type Parse<T> = std::result::Result<T, SyntaxFault>;

impl<'a> Parser<'a> {
    pub fn new(
        tokens: Vec<Spanned>,
        symbol_table: &'a mut SymbolTable,
        error_policy: &'a dyn ErrorPolicy,
    ) -> Self {
        Parser {
            tokens,
            current: 0,
            symbol_table,
            error_policy,
            errors: 0,
            solar_and_illuminate_statements: 0,
        }
    }

    /// Parse a whole source: a list of shader and function definitions.
    /// Returns `None` when any error was reported.
    pub fn parse(mut self) -> Option<SyntaxNode> {
        let mut list = SyntaxNode::new(NodeKind::List, 1);
        while !self.is_at_end() {
            match self.parse_definition() {
                Ok(definition) => list.add_node(definition),
                Err(SyntaxFault(message)) => {
                    self.errors += 1;
                    self.error_policy.error(ErrorCode::SyntaxError, &message);
                    return None;
                }
            }
        }
        if self.errors > 0 {
            return None;
        }
        Some(list)
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    fn parse_definition(&mut self) -> Parse<SyntaxNode> {
        trace!("parse_definition: next token = {:?}", self.peek());
        match self.peek() {
            Some(
                Token::Light | Token::Surface | Token::Volume | Token::Displacement | Token::Imager,
            ) => self.parse_shader_definition(),
            Some(
                Token::Float
                | Token::String
                | Token::Color
                | Token::Point
                | Token::Vector
                | Token::Normal
                | Token::Matrix
                | Token::Void,
            ) => self.parse_function_definition(),
            _ => Err(self.fault("expected a shader or function definition")),
        }
    }

    fn parse_shader_definition(&mut self) -> Parse<SyntaxNode> {
        trace!("parse_shader_definition: next token = {:?}", self.peek());
        let line = self.line();
        let (kind, node_kind) = match self.advance() {
            Some(Token::Light) => (ShaderKind::Light, NodeKind::LightShader),
            Some(Token::Surface) => (ShaderKind::Surface, NodeKind::SurfaceShader),
            Some(Token::Volume) => (ShaderKind::Volume, NodeKind::VolumeShader),
            Some(Token::Displacement) => (ShaderKind::Displacement, NodeKind::DisplacementShader),
            Some(Token::Imager) => (ShaderKind::Imager, NodeKind::ImagerShader),
            _ => return Err(self.fault("expected a shader kind")),
        };

        // The shader scope opens before the formals so parameter symbols and
        // the kind's implicit globals share it.
        self.symbol_table.push_shader_scope(kind);
        let solar_and_illuminate_before = self.solar_and_illuminate_statements;

        let name = self.expect_identifier()?;
        let mut shader = SyntaxNode::with_lexeme(node_kind, line, name);

        self.expect(&Token::LeftParen)?;
        let formals = self.parse_formals()?;
        self.expect(&Token::RightParen)?;

        self.expect(&Token::LeftBrace)?;
        let mut statements = self.parse_statement_list()?;
        self.expect(&Token::RightBrace)?;

        // A light shader with no solar or illuminate statement is an
        // ambient source: synthesize the ambient capture at the head of the
        // body, referencing the light color and opacity globals.
        if kind == ShaderKind::Light
            && self.solar_and_illuminate_statements == solar_and_illuminate_before
        {
            let mut ambient = SyntaxNode::new(NodeKind::Ambient, line);
            ambient.add_node(self.implicit_identifier("Cl", line));
            ambient.add_node(self.implicit_identifier("Ol", line));
            statements.add_node_at_front(ambient);
        }

        self.symbol_table.pop_scope();

        shader.add_node(formals);
        shader.add_node(statements);
        Ok(shader)
    }

    fn parse_function_definition(&mut self) -> Parse<SyntaxNode> {
        trace!("parse_function_definition: next token = {:?}", self.peek());
        let line = self.line();
        let return_type = self.parse_type_node()?;
        let name = self.expect_identifier()?;

        let mut function = SyntaxNode::with_lexeme(NodeKind::Function, line, name.clone());
        match self.symbol_table.add_symbol(&name) {
            Ok(id) => {
                let symbol = self.symbol_table.symbol_mut(id);
                symbol.ty = return_type.value_type();
                symbol.kind = SymbolKind::Function;
                function.set_symbol(Some(id));
            }
            Err(message) => self.report(ErrorCode::SyntaxError, line, &message),
        }

        self.symbol_table.push_scope();
        self.expect(&Token::LeftParen)?;
        let formals = self.parse_formals()?;
        self.expect(&Token::RightParen)?;
        self.expect(&Token::LeftBrace)?;
        let statements = self.parse_statement_list()?;
        self.expect(&Token::RightBrace)?;
        self.symbol_table.pop_scope();

        function.add_node(formals);
        function.add_node(statements);
        Ok(function)
    }

    /// Formal parameters: groups of `[output] [storage] type declarators ;`
    /// with default storage uniform.
    fn parse_formals(&mut self) -> Parse<SyntaxNode> {
        trace!("parse_formals: next token = {:?}", self.peek());
        let mut list = SyntaxNode::new(NodeKind::List, self.line());
        while !self.check(&Token::RightParen) && !self.is_at_end() {
            self.parse_declaration_group(
                &mut list,
                ValueStorage::Uniform,
                SymbolKind::Parameter,
            )?;
            if self.check(&Token::Semicolon) {
                self.advance();
            }
        }
        Ok(list)
    }

    /// A storage/type modifier run plus one or more declarators. Used for
    /// formals (uniform default) and local definitions (varying default).
    fn parse_declaration_group(
        &mut self,
        list: &mut SyntaxNode,
        default_storage: ValueStorage,
        symbol_kind: SymbolKind,
    ) -> Parse<()> {
        let mut output = false;
        let mut storage = default_storage;
        loop {
            match self.peek() {
                Some(Token::Output) => {
                    output = true;
                    self.advance();
                }
                Some(Token::Uniform) => {
                    storage = ValueStorage::Uniform;
                    self.advance();
                }
                Some(Token::Varying) => {
                    storage = ValueStorage::Varying;
                    self.advance();
                }
                Some(Token::Extern) => {
                    self.advance();
                }
                _ => break,
            }
        }

        let type_node = self.parse_type_node()?;
        let ty = type_node.value_type();

        loop {
            let line = self.line();
            let name = self.expect_identifier()?;
            let mut variable = SyntaxNode::with_lexeme(NodeKind::Variable, line, name.clone());
            if self.check(&Token::Assign) {
                self.advance();
                variable.add_node(self.parse_expression()?);
            } else {
                variable.add_node(SyntaxNode::new(NodeKind::Null, line));
            }

            match self.symbol_table.add_symbol(&name) {
                Ok(id) => {
                    let symbol = self.symbol_table.symbol_mut(id);
                    symbol.ty = ty;
                    symbol.storage = storage;
                    symbol.kind = symbol_kind;
                    symbol.output = output;
                    variable.set_symbol(Some(id));
                }
                Err(message) => self.report(ErrorCode::SyntaxError, line, &message),
            }
            list.add_node(variable);

            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }
        Ok(())
    }

    fn parse_type_node(&mut self) -> Parse<SyntaxNode> {
        let line = self.line();
        let kind = match self.advance() {
            Some(Token::Float) => NodeKind::FloatType,
            Some(Token::String) => NodeKind::StringType,
            Some(Token::Color) => NodeKind::ColorType,
            Some(Token::Point) => NodeKind::PointType,
            Some(Token::Vector) => NodeKind::VectorType,
            Some(Token::Normal) => NodeKind::NormalType,
            Some(Token::Matrix) => NodeKind::MatrixType,
            Some(Token::Void) => NodeKind::VoidType,
            _ => return Err(self.fault("expected a type")),
        };
        Ok(SyntaxNode::new(kind, line))
    }

    fn parse_statement_list(&mut self) -> Parse<SyntaxNode> {
        let mut list = SyntaxNode::new(NodeKind::List, self.line());
        while !self.check(&Token::RightBrace) && !self.is_at_end() {
            let statement = self.parse_statement()?;
            list.add_node(statement);
        }
        Ok(list)
    }

    fn parse_statement(&mut self) -> Parse<SyntaxNode> {
        trace!("parse_statement: next token = {:?}", self.peek());
        match self.peek() {
            Some(Token::LeftBrace) => {
                self.advance();
                let statements = self.parse_statement_list()?;
                self.expect(&Token::RightBrace)?;
                Ok(statements)
            }
            Some(Token::Return) => {
                let line = self.line();
                self.advance();
                let mut statement = SyntaxNode::new(NodeKind::Return, line);
                statement.add_node(self.parse_expression()?);
                self.expect(&Token::Semicolon)?;
                Ok(statement)
            }
            Some(Token::Break) => self.parse_break_or_continue(NodeKind::Break),
            Some(Token::Continue) => self.parse_break_or_continue(NodeKind::Continue),
            Some(Token::If) => self.parse_if_statement(),
            Some(Token::While) => self.parse_while_statement(),
            Some(Token::For) => self.parse_for_statement(),
            Some(Token::Solar) => self.parse_solar_statement(),
            Some(Token::Illuminate) => self.parse_illuminate_statement(),
            Some(Token::Illuminance) => self.parse_illuminance_statement(),
            Some(
                Token::Uniform | Token::Varying | Token::Output | Token::Extern,
            ) => self.parse_variable_definition(),
            Some(
                Token::Float
                | Token::String
                | Token::Color
                | Token::Point
                | Token::Vector
                | Token::Normal
                | Token::Matrix,
            ) if matches!(self.peek_at(1), Some(Token::Identifier(_))) => {
                self.parse_variable_definition()
            }
            _ => {
                let expression = self.parse_expression()?;
                self.expect(&Token::Semicolon)?;
                Ok(expression)
            }
        }
    }

    /// Local variable definitions default to varying storage.
    fn parse_variable_definition(&mut self) -> Parse<SyntaxNode> {
        trace!("parse_variable_definition: next token = {:?}", self.peek());
        let mut list = SyntaxNode::new(NodeKind::List, self.line());
        self.parse_declaration_group(&mut list, ValueStorage::Varying, SymbolKind::Variable)?;
        self.expect(&Token::Semicolon)?;
        Ok(list)
    }

    fn parse_break_or_continue(&mut self, kind: NodeKind) -> Parse<SyntaxNode> {
        let line = self.line();
        self.advance();
        let mut statement = SyntaxNode::new(kind, line);
        if let Some(Token::Integer(level)) = self.peek() {
            let level = level.clone();
            self.advance();
            statement.add_node(SyntaxNode::with_lexeme(NodeKind::Integer, line, level));
        }
        self.expect(&Token::Semicolon)?;
        Ok(statement)
    }

    fn parse_if_statement(&mut self) -> Parse<SyntaxNode> {
        trace!("parse_if_statement: next token = {:?}", self.peek());
        let line = self.line();
        self.expect(&Token::If)?;
        self.expect(&Token::LeftParen)?;
        let condition = self.parse_expression()?;
        self.expect(&Token::RightParen)?;
        let then_statement = self.parse_statement()?;

        if self.check(&Token::Else) {
            self.advance();
            let else_statement = self.parse_statement()?;
            let mut statement = SyntaxNode::new(NodeKind::IfElse, line);
            statement.add_node(condition);
            statement.add_node(then_statement);
            statement.add_node(else_statement);
            Ok(statement)
        } else {
            let mut statement = SyntaxNode::new(NodeKind::If, line);
            statement.add_node(condition);
            statement.add_node(then_statement);
            Ok(statement)
        }
    }

    fn parse_while_statement(&mut self) -> Parse<SyntaxNode> {
        trace!("parse_while_statement: next token = {:?}", self.peek());
        let line = self.line();
        self.expect(&Token::While)?;
        self.expect(&Token::LeftParen)?;
        let condition = self.parse_expression()?;
        self.expect(&Token::RightParen)?;
        let body = self.parse_statement()?;

        let mut statement = SyntaxNode::new(NodeKind::While, line);
        statement.add_node(condition);
        statement.add_node(body);
        Ok(statement)
    }

    fn parse_for_statement(&mut self) -> Parse<SyntaxNode> {
        trace!("parse_for_statement: next token = {:?}", self.peek());
        let line = self.line();
        self.expect(&Token::For)?;
        self.expect(&Token::LeftParen)?;
        let initial = self.parse_expression()?;
        self.expect(&Token::Semicolon)?;
        let condition = self.parse_expression()?;
        self.expect(&Token::Semicolon)?;
        let increment = self.parse_expression()?;
        self.expect(&Token::RightParen)?;
        let body = self.parse_statement()?;

        let mut statement = SyntaxNode::new(NodeKind::For, line);
        statement.add_node(initial);
        statement.add_node(condition);
        statement.add_node(increment);
        statement.add_node(body);
        Ok(statement)
    }

    /// `solar([axis, angle]) statement`. The body sees `L`; the statement
    /// node also carries the light color and opacity globals so codegen can
    /// wire the capture without lookups.
    fn parse_solar_statement(&mut self) -> Parse<SyntaxNode> {
        trace!("parse_solar_statement: next token = {:?}", self.peek());
        let line = self.line();
        self.expect(&Token::Solar)?;
        self.solar_and_illuminate_statements += 1;
        self.symbol_table.push_illuminate_or_solar_scope();

        self.expect(&Token::LeftParen)?;
        let parameters = self.parse_expression_list(&Token::RightParen)?;
        self.expect(&Token::RightParen)?;
        let body = self.parse_statement()?;

        if parameters.nodes().len() != 0 && parameters.nodes().len() != 2 {
            self.report(
                ErrorCode::SyntaxError,
                line,
                "solar expects no parameters or an axis and an angle",
            );
        }

        let mut statement = SyntaxNode::new(NodeKind::Solar, line);
        statement.add_node(parameters);
        statement.add_node(body);
        statement.add_node(self.implicit_identifier("L", line));
        statement.add_node(self.implicit_identifier("Cl", line));
        statement.add_node(self.implicit_identifier("Ol", line));
        self.symbol_table.pop_scope();
        Ok(statement)
    }

    /// `illuminate(P[, axis, angle]) statement`; the node carries `Ps`, `L`,
    /// `Cl` and `Ol`.
    fn parse_illuminate_statement(&mut self) -> Parse<SyntaxNode> {
        trace!("parse_illuminate_statement: next token = {:?}", self.peek());
        let line = self.line();
        self.expect(&Token::Illuminate)?;
        self.solar_and_illuminate_statements += 1;
        self.symbol_table.push_illuminate_or_solar_scope();

        self.expect(&Token::LeftParen)?;
        let parameters = self.parse_expression_list(&Token::RightParen)?;
        self.expect(&Token::RightParen)?;
        let body = self.parse_statement()?;

        if parameters.nodes().len() != 1 && parameters.nodes().len() != 3 {
            self.report(
                ErrorCode::SyntaxError,
                line,
                "illuminate expects a position, optionally with an axis and an angle",
            );
        }

        let mut statement = SyntaxNode::new(NodeKind::Illuminate, line);
        statement.add_node(parameters);
        statement.add_node(body);
        statement.add_node(self.implicit_identifier("Ps", line));
        statement.add_node(self.implicit_identifier("L", line));
        statement.add_node(self.implicit_identifier("Cl", line));
        statement.add_node(self.implicit_identifier("Ol", line));
        self.symbol_table.pop_scope();
        Ok(statement)
    }

    /// `illuminance(P, axis, angle) statement` (or the single-position
    /// form); the node carries `L`, `Cl` and `Ol` from the pushed scope.
    fn parse_illuminance_statement(&mut self) -> Parse<SyntaxNode> {
        trace!("parse_illuminance_statement: next token = {:?}", self.peek());
        let line = self.line();
        self.expect(&Token::Illuminance)?;
        self.symbol_table.push_illuminance_scope();

        self.expect(&Token::LeftParen)?;
        let parameters = self.parse_expression_list(&Token::RightParen)?;
        self.expect(&Token::RightParen)?;
        let body = self.parse_statement()?;

        if parameters.nodes().len() != 1 && parameters.nodes().len() != 3 {
            self.report(
                ErrorCode::SyntaxError,
                line,
                "illuminance expects a position, optionally with an axis and an angle",
            );
        }

        let mut statement = SyntaxNode::new(NodeKind::Illuminance, line);
        statement.add_node(parameters);
        statement.add_node(body);
        statement.add_node(self.implicit_identifier("L", line));
        statement.add_node(self.implicit_identifier("Cl", line));
        statement.add_node(self.implicit_identifier("Ol", line));
        self.symbol_table.pop_scope();
        Ok(statement)
    }

    fn parse_expression_list(&mut self, terminator: &Token) -> Parse<SyntaxNode> {
        let mut list = SyntaxNode::new(NodeKind::List, self.line());
        if !self.check(terminator) {
            loop {
                list.add_node(self.parse_expression()?);
                if !self.check(&Token::Comma) {
                    break;
                }
                self.advance();
            }
        }
        Ok(list)
    }

    // --- expressions, lowest precedence first ---

    fn parse_expression(&mut self) -> Parse<SyntaxNode> {
        if let Some(Token::Identifier(_)) = self.peek() {
            if matches!(
                self.peek_at(1),
                Some(
                    Token::Assign
                        | Token::AddAssign
                        | Token::SubtractAssign
                        | Token::MultiplyAssign
                        | Token::DivideAssign
                )
            ) {
                return self.parse_assignment();
            }
        }

        let expression = self.parse_ternary()?;

        // The only path that reaches an assignment operator here is an
        // indexed target; the grammar reserves it.
        if matches!(
            self.peek(),
            Some(
                Token::Assign
                    | Token::AddAssign
                    | Token::SubtractAssign
                    | Token::MultiplyAssign
                    | Token::DivideAssign
            )
        ) {
            let line = self.line();
            self.report(ErrorCode::Unimplemented, line, "indexed assignment is not implemented");
            self.advance();
            let _ = self.parse_ternary()?;
        }
        Ok(expression)
    }

    fn parse_assignment(&mut self) -> Parse<SyntaxNode> {
        let line = self.line();
        let name = self.expect_identifier()?;
        let kind = match self.advance() {
            Some(Token::Assign) => NodeKind::Assign,
            Some(Token::AddAssign) => NodeKind::AddAssign,
            Some(Token::SubtractAssign) => NodeKind::SubtractAssign,
            Some(Token::MultiplyAssign) => NodeKind::MultiplyAssign,
            Some(Token::DivideAssign) => NodeKind::DivideAssign,
            _ => return Err(self.fault("expected an assignment operator")),
        };

        let mut assignment = SyntaxNode::with_lexeme(kind, line, name.clone());
        assignment.add_node(self.parse_expression()?);
        assignment.set_symbol(self.find_symbol(&name, line));
        Ok(assignment)
    }

    fn parse_ternary(&mut self) -> Parse<SyntaxNode> {
        let condition = self.parse_or()?;
        if !self.check(&Token::Question) {
            return Ok(condition);
        }
        let line = self.line();
        self.advance();
        let then_expression = self.parse_expression()?;
        self.expect(&Token::Colon)?;
        let else_expression = self.parse_ternary()?;

        let mut ternary = SyntaxNode::new(NodeKind::Ternary, line);
        ternary.add_node(condition);
        ternary.add_node(then_expression);
        ternary.add_node(else_expression);
        Ok(ternary)
    }

    fn parse_or(&mut self) -> Parse<SyntaxNode> {
        let mut left = self.parse_and()?;
        while self.check(&Token::OrOr) {
            let line = self.line();
            self.advance();
            let right = self.parse_and()?;
            left = Self::binary(NodeKind::Or, line, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Parse<SyntaxNode> {
        let mut left = self.parse_equality()?;
        while self.check(&Token::AndAnd) {
            let line = self.line();
            self.advance();
            let right = self.parse_equality()?;
            left = Self::binary(NodeKind::And, line, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Parse<SyntaxNode> {
        let mut left = self.parse_relational()?;
        loop {
            let kind = match self.peek() {
                Some(Token::EqualEqual) => NodeKind::Equal,
                Some(Token::NotEqual) => NodeKind::NotEqual,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let right = self.parse_relational()?;
            left = Self::binary(kind, line, left, right);
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Parse<SyntaxNode> {
        let mut left = self.parse_additive()?;
        loop {
            let kind = match self.peek() {
                Some(Token::Greater) => NodeKind::Greater,
                Some(Token::GreaterEqual) => NodeKind::GreaterEqual,
                Some(Token::Less) => NodeKind::Less,
                Some(Token::LessEqual) => NodeKind::LessEqual,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let right = self.parse_additive()?;
            left = Self::binary(kind, line, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Parse<SyntaxNode> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let kind = match self.peek() {
                Some(Token::Plus) => NodeKind::Add,
                Some(Token::Minus) => NodeKind::Subtract,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Self::binary(kind, line, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Parse<SyntaxNode> {
        let mut left = self.parse_cross()?;
        loop {
            let kind = match self.peek() {
                Some(Token::Star) => NodeKind::Multiply,
                Some(Token::Slash) => NodeKind::Divide,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let right = self.parse_cross()?;
            left = Self::binary(kind, line, left, right);
        }
        Ok(left)
    }

    /// `^` is the cross product; it binds tighter than `*` and looser than
    /// the `.` dot product.
    fn parse_cross(&mut self) -> Parse<SyntaxNode> {
        let mut left = self.parse_dot()?;
        while self.check(&Token::Caret) {
            let line = self.line();
            self.advance();
            let right = self.parse_dot()?;
            left = Self::binary(NodeKind::Cross, line, left, right);
        }
        Ok(left)
    }

    fn parse_dot(&mut self) -> Parse<SyntaxNode> {
        let mut left = self.parse_unary()?;
        while self.check(&Token::Dot) {
            let line = self.line();
            self.advance();
            let right = self.parse_unary()?;
            left = Self::binary(NodeKind::Dot, line, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Parse<SyntaxNode> {
        if self.check(&Token::Minus) {
            let line = self.line();
            self.advance();
            let operand = self.parse_unary()?;
            let mut negate = SyntaxNode::new(NodeKind::Negate, line);
            negate.add_node(operand);
            return Ok(negate);
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Parse<SyntaxNode> {
        trace!("parse_primary: next token = {:?}", self.peek());
        match self.peek() {
            Some(Token::Integer(_)) => {
                let line = self.line();
                let lexeme = self.expect_number()?;
                Ok(SyntaxNode::with_lexeme(NodeKind::Integer, line, lexeme))
            }
            Some(Token::Real(_)) => {
                let line = self.line();
                let lexeme = self.expect_number()?;
                Ok(SyntaxNode::with_lexeme(NodeKind::Real, line, lexeme))
            }
            Some(Token::StringLiteral(_)) => {
                let line = self.line();
                let lexeme = self.expect_string()?;
                Ok(SyntaxNode::with_lexeme(NodeKind::String, line, lexeme))
            }
            Some(
                Token::Float
                | Token::String
                | Token::Color
                | Token::Point
                | Token::Vector
                | Token::Normal
                | Token::Matrix,
            ) => self.parse_typecast(),
            Some(Token::Texture) => self.parse_sampling(NodeKind::Texture),
            Some(Token::Environment) => self.parse_sampling(NodeKind::Environment),
            Some(Token::Shadow) => self.parse_sampling(NodeKind::Shadow),
            Some(Token::LeftParen) => self.parse_parenthesized(),
            Some(Token::Identifier(_)) => self.parse_identifier_expression(),
            _ => Err(self.fault("expected an expression")),
        }
    }

    /// Typecasts: `T expr`, `T "space" expr`, including the constructor
    /// forms `T (x, y, z)` and the sixteen-element matrix form. The space
    /// string becomes a child of the type node.
    fn parse_typecast(&mut self) -> Parse<SyntaxNode> {
        trace!("parse_typecast: next token = {:?}", self.peek());
        let line = self.line();
        let mut type_node = self.parse_type_node()?;
        if let Some(Token::StringLiteral(_)) = self.peek() {
            let space = self.expect_string()?;
            type_node.add_node(SyntaxNode::with_lexeme(NodeKind::String, line, space));
        }
        let expression = self.parse_unary()?;

        let mut typecast = SyntaxNode::new(NodeKind::Typecast, line);
        typecast.add_node(type_node);
        typecast.add_node(expression);
        Ok(typecast)
    }

    /// `texture`, `environment` and `shadow` sampling forms. A one-argument
    /// `texture` implicitly samples at the current surface coordinates.
    fn parse_sampling(&mut self, kind: NodeKind) -> Parse<SyntaxNode> {
        trace!("parse_sampling: next token = {:?}", self.peek());
        let line = self.line();
        self.advance();
        self.expect(&Token::LeftParen)?;
        let mut parameters = self.parse_expression_list(&Token::RightParen)?;
        self.expect(&Token::RightParen)?;

        let mut sampling = SyntaxNode::new(kind, line);
        let single_parameter = parameters.nodes().len() == 1;
        for parameter in parameters.take_nodes() {
            sampling.add_node(parameter);
        }
        if kind == NodeKind::Texture && single_parameter {
            sampling.add_node(self.implicit_identifier("s", line));
            sampling.add_node(self.implicit_identifier("t", line));
        }
        Ok(sampling)
    }

    fn parse_parenthesized(&mut self) -> Parse<SyntaxNode> {
        let line = self.line();
        self.expect(&Token::LeftParen)?;
        let mut expressions = vec![self.parse_expression()?];
        while self.check(&Token::Comma) {
            self.advance();
            expressions.push(self.parse_expression()?);
        }
        self.expect(&Token::RightParen)?;

        match expressions.len() {
            1 => Ok(expressions.pop().unwrap()),
            3 => {
                let mut triple = SyntaxNode::new(NodeKind::Triple, line);
                for expression in expressions {
                    triple.add_node(expression);
                }
                Ok(triple)
            }
            16 => {
                let mut sixteentuple = SyntaxNode::new(NodeKind::Sixteentuple, line);
                for expression in expressions {
                    sixteentuple.add_node(expression);
                }
                Ok(sixteentuple)
            }
            n => Err(self.fault(&format!(
                "expected 1, 3 or 16 parenthesized expressions, found {}",
                n
            ))),
        }
    }

    fn parse_identifier_expression(&mut self) -> Parse<SyntaxNode> {
        let line = self.line();
        let name = self.expect_identifier()?;

        if self.check(&Token::LeftParen) {
            self.advance();
            let mut arguments = self.parse_expression_list(&Token::RightParen)?;
            self.expect(&Token::RightParen)?;

            let mut call = SyntaxNode::with_lexeme(NodeKind::Call, line, name.clone());
            call.set_symbol(self.find_symbol(&name, line));
            for argument in arguments.take_nodes() {
                call.add_node(argument);
            }
            return Ok(call);
        }

        if self.check(&Token::LeftBracket) {
            // Array indexing is reserved in the grammar but not implemented.
            self.report(ErrorCode::Unimplemented, line, "indexed expressions are not implemented");
            self.advance();
            let _ = self.parse_expression()?;
            self.expect(&Token::RightBracket)?;
        }

        let mut identifier = SyntaxNode::with_lexeme(NodeKind::Identifier, line, name.clone());
        identifier.set_symbol(self.find_symbol(&name, line));
        Ok(identifier)
    }

    // --- helpers ---

    fn binary(kind: NodeKind, line: usize, lhs: SyntaxNode, rhs: SyntaxNode) -> SyntaxNode {
        let mut node = SyntaxNode::new(kind, line);
        node.add_node(lhs);
        node.add_node(rhs);
        node
    }

    /// An identifier node bound without reporting; used for the globals the
    /// lighting statements and ambient synthesis attach implicitly.
    fn implicit_identifier(&mut self, name: &str, line: usize) -> SyntaxNode {
        let mut identifier = SyntaxNode::with_lexeme(NodeKind::Identifier, line, name);
        identifier.set_symbol(self.find_symbol(name, line));
        identifier
    }

    /// Bind an identifier to its symbol, reporting an unknown identifier
    /// without aborting the parse.
    fn find_symbol(&mut self, name: &str, line: usize) -> Option<SymbolId> {
        let symbol = self.symbol_table.find_symbol(name);
        if symbol.is_none() {
            self.report(
                ErrorCode::UnknownIdentifier,
                line,
                &format!("Unknown identifier '{}'", name),
            );
        }
        symbol
    }

    fn report(&mut self, code: ErrorCode, line: usize, message: &str) {
        self.errors += 1;
        self.error_policy.error(code, &format!("({}): {}", line, message));
    }

    fn fault(&self, message: &str) -> SyntaxFault {
        SyntaxFault(format!("({}): {}", self.line(), message))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.current + offset).map(|s| &s.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.current)
            .or_else(|| self.tokens.last())
            .map(|s| s.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Option<&Token> {
        if self.is_at_end() {
            None
        } else {
            self.current += 1;
            self.tokens.get(self.current - 1).map(|s| &s.token)
        }
    }

    fn check(&self, token: &Token) -> bool {
        match self.peek() {
            Some(t) => std::mem::discriminant(t) == std::mem::discriminant(token),
            None => false,
        }
    }

    fn expect(&mut self, token: &Token) -> Parse<()> {
        if self.check(token) {
            self.advance();
            Ok(())
        } else {
            Err(self.fault(&format!("expected {:?}, found {:?}", token, self.peek())))
        }
    }

    fn expect_identifier(&mut self) -> Parse<String> {
        match self.peek() {
            Some(Token::Identifier(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.fault(&format!("expected an identifier, found {:?}", self.peek()))),
        }
    }

    fn expect_number(&mut self) -> Parse<String> {
        match self.peek() {
            Some(Token::Integer(lexeme) | Token::Real(lexeme)) => {
                let lexeme = lexeme.clone();
                self.advance();
                Ok(lexeme)
            }
            _ => Err(self.fault("expected a number")),
        }
    }

    fn expect_string(&mut self) -> Parse<String> {
        match self.peek() {
            Some(Token::StringLiteral(lexeme)) => {
                let lexeme = lexeme.clone();
                self.advance();
                Ok(lexeme)
            }
            _ => Err(self.fault("expected a string literal")),
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.tokens.len()
    }
}
