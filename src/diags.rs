//! Formats an annotated syntax tree back to shading-language source.
//!
//! Synthesized nodes (the implicit `ambient` capture, the globals attached
//! to lighting statements) are not printed, and every compound expression
//! is parenthesized, so parsing the output again produces a structurally
//! equal tree.

use crate::ast::{NodeKind, SyntaxNode};
use crate::symbol::SymbolTable;
use crate::value::{ValueStorage, ValueType};
use std::fmt::Write;

pub struct SourceFormatter<'a> {
    symbol_table: &'a SymbolTable,
    output: String,
    indent: usize,
}

impl<'a> SourceFormatter<'a> {
    pub fn new(symbol_table: &'a SymbolTable) -> Self {
        SourceFormatter {
            symbol_table,
            output: String::new(),
            indent: 0,
        }
    }

    /// Format a whole parse tree (a list of definitions).
    pub fn format(symbol_table: &SymbolTable, tree: &SyntaxNode) -> String {
        let mut formatter = SourceFormatter::new(symbol_table);
        for definition in tree.nodes() {
            formatter.write_definition(definition);
        }
        formatter.output
    }

    fn write_definition(&mut self, node: &SyntaxNode) {
        let keyword = match node.kind() {
            NodeKind::LightShader => "light",
            NodeKind::SurfaceShader => "surface",
            NodeKind::VolumeShader => "volume",
            NodeKind::DisplacementShader => "displacement",
            NodeKind::ImagerShader => "imager",
            NodeKind::Function => {
                self.write_function(node);
                return;
            }
            _ => return,
        };

        self.write_line_start();
        let _ = write!(self.output, "{} {}(", keyword, node.lexeme());
        self.write_formals(node.node(0));
        self.output.push_str(")\n");
        self.write_block(node.node(1));
        self.output.push('\n');
    }

    fn write_function(&mut self, node: &SyntaxNode) {
        let return_type = node
            .symbol()
            .map(|id| self.symbol_table.symbol(id).ty)
            .unwrap_or(ValueType::Void);
        self.write_line_start();
        let _ = write!(self.output, "{} {}(", type_keyword(return_type), node.lexeme());
        self.write_formals(node.node(0));
        self.output.push_str(")\n");
        self.write_block(node.node(1));
        self.output.push('\n');
    }

    fn write_formals(&mut self, formals: &SyntaxNode) {
        for variable in formals.nodes() {
            self.write_declarator_group(&[variable], ValueStorage::Uniform);
            self.output.push(' ');
        }
    }

    /// One declaration: shared storage and type, then the declarators.
    fn write_declarator_group(&mut self, variables: &[&SyntaxNode], default_storage: ValueStorage) {
        let Some(first) = variables.first() else { return };
        let (ty, storage, output) = match first.symbol() {
            Some(id) => {
                let symbol = self.symbol_table.symbol(id);
                (symbol.ty, symbol.storage, symbol.output)
            }
            None => (ValueType::Float, default_storage, false),
        };
        if output {
            self.output.push_str("output ");
        }
        if storage != default_storage && storage != ValueStorage::Null {
            let _ = write!(self.output, "{} ", storage.name());
        }
        let _ = write!(self.output, "{} ", type_keyword(ty));

        for (index, variable) in variables.iter().enumerate() {
            if index > 0 {
                self.output.push_str(", ");
            }
            self.output.push_str(variable.lexeme());
            let initializer = variable.node(0);
            if initializer.kind() != NodeKind::Null {
                self.output.push_str(" = ");
                self.write_expression(initializer);
            }
        }
        self.output.push(';');
    }

    fn write_block(&mut self, statements: &SyntaxNode) {
        self.write_line_start();
        self.output.push_str("{\n");
        self.indent += 1;
        for statement in statements.nodes() {
            self.write_statement(statement);
        }
        self.indent -= 1;
        self.write_line_start();
        self.output.push('}');
    }

    fn write_statement(&mut self, node: &SyntaxNode) {
        match node.kind() {
            // The implicit ambient capture is re-synthesized on parse.
            NodeKind::Ambient => {}
            NodeKind::List if node.nodes().iter().all(|n| n.kind() == NodeKind::Variable) => {
                if node.nodes().is_empty() {
                    self.write_line_start();
                    self.output.push_str("{\n");
                    self.write_line_start();
                    self.output.push_str("}\n");
                } else {
                    self.write_line_start();
                    let variables: Vec<&SyntaxNode> = node.nodes().iter().collect();
                    self.write_declarator_group(&variables, ValueStorage::Varying);
                    self.output.push('\n');
                }
            }
            NodeKind::List => {
                self.write_block(node);
                self.output.push('\n');
            }
            NodeKind::Return => {
                self.write_line_start();
                self.output.push_str("return ");
                self.write_expression(node.node(0));
                self.output.push_str(";\n");
            }
            NodeKind::Break | NodeKind::Continue => {
                self.write_line_start();
                self.output.push_str(if node.kind() == NodeKind::Break {
                    "break"
                } else {
                    "continue"
                });
                if let Some(level) = node.nodes().first() {
                    let _ = write!(self.output, " {}", level.lexeme());
                }
                self.output.push_str(";\n");
            }
            NodeKind::If | NodeKind::IfElse => {
                self.write_line_start();
                self.output.push_str("if (");
                self.write_expression(node.node(0));
                self.output.push_str(")\n");
                self.write_nested_statement(node.node(1));
                if node.kind() == NodeKind::IfElse {
                    self.write_line_start();
                    self.output.push_str("else\n");
                    self.write_nested_statement(node.node(2));
                }
            }
            NodeKind::While => {
                self.write_line_start();
                self.output.push_str("while (");
                self.write_expression(node.node(0));
                self.output.push_str(")\n");
                self.write_nested_statement(node.node(1));
            }
            NodeKind::For => {
                self.write_line_start();
                self.output.push_str("for (");
                self.write_expression(node.node(0));
                self.output.push_str("; ");
                self.write_expression(node.node(1));
                self.output.push_str("; ");
                self.write_expression(node.node(2));
                self.output.push_str(")\n");
                self.write_nested_statement(node.node(3));
            }
            NodeKind::Solar | NodeKind::Illuminate | NodeKind::Illuminance => {
                let keyword = match node.kind() {
                    NodeKind::Solar => "solar",
                    NodeKind::Illuminate => "illuminate",
                    _ => "illuminance",
                };
                self.write_line_start();
                let _ = write!(self.output, "{}(", keyword);
                for (index, parameter) in node.node(0).nodes().iter().enumerate() {
                    if index > 0 {
                        self.output.push_str(", ");
                    }
                    self.write_expression(parameter);
                }
                self.output.push_str(")\n");
                self.write_nested_statement(node.node(1));
            }
            _ => {
                self.write_line_start();
                self.write_expression(node);
                self.output.push_str(";\n");
            }
        }
    }

    /// Statement bodies always print as blocks; a reparse flattens a block
    /// around a single statement to the same list shape.
    fn write_nested_statement(&mut self, node: &SyntaxNode) {
        if node.kind() == NodeKind::List {
            self.write_block(node);
            self.output.push('\n');
        } else {
            self.indent += 1;
            self.write_statement(node);
            self.indent -= 1;
        }
    }

    fn write_expression(&mut self, node: &SyntaxNode) {
        match node.kind() {
            NodeKind::Integer | NodeKind::Real | NodeKind::Identifier => {
                self.output.push_str(node.lexeme());
            }
            NodeKind::String => {
                let _ = write!(self.output, "\"{}\"", node.lexeme());
            }
            NodeKind::Triple | NodeKind::Sixteentuple => {
                self.output.push('(');
                for (index, child) in node.nodes().iter().enumerate() {
                    if index > 0 {
                        self.output.push_str(", ");
                    }
                    self.write_expression(child);
                }
                self.output.push(')');
            }
            NodeKind::Negate => {
                self.output.push_str("(-");
                self.write_expression(node.node(0));
                self.output.push(')');
            }
            NodeKind::Ternary => {
                self.output.push('(');
                self.write_expression(node.node(0));
                self.output.push_str(" ? ");
                self.write_expression(node.node(1));
                self.output.push_str(" : ");
                self.write_expression(node.node(2));
                self.output.push(')');
            }
            NodeKind::Typecast => {
                let type_node = node.node(0);
                self.output.push_str(type_keyword(type_node.value_type()));
                if let Some(space) = type_node.nodes().first() {
                    let _ = write!(self.output, " \"{}\"", space.lexeme());
                }
                self.output.push(' ');
                let inner = node.node(1);
                if matches!(inner.kind(), NodeKind::Triple | NodeKind::Sixteentuple) {
                    self.write_expression(inner);
                } else {
                    self.output.push('(');
                    self.write_expression(inner);
                    self.output.push(')');
                }
            }
            NodeKind::Assign
            | NodeKind::AddAssign
            | NodeKind::SubtractAssign
            | NodeKind::MultiplyAssign
            | NodeKind::DivideAssign => {
                let operator = match node.kind() {
                    NodeKind::Assign => "=",
                    NodeKind::AddAssign => "+=",
                    NodeKind::SubtractAssign => "-=",
                    NodeKind::MultiplyAssign => "*=",
                    _ => "/=",
                };
                let _ = write!(self.output, "{} {} ", node.lexeme(), operator);
                self.write_expression(node.node(0));
            }
            NodeKind::Call => {
                let _ = write!(self.output, "{}(", node.lexeme());
                for (index, argument) in node.nodes().iter().enumerate() {
                    if index > 0 {
                        self.output.push_str(", ");
                    }
                    self.write_expression(argument);
                }
                self.output.push(')');
            }
            NodeKind::Texture | NodeKind::Environment | NodeKind::Shadow => {
                let keyword = match node.kind() {
                    NodeKind::Texture => "texture",
                    NodeKind::Environment => "environment",
                    _ => "shadow",
                };
                let _ = write!(self.output, "{}(", keyword);
                for (index, argument) in node.nodes().iter().enumerate() {
                    if index > 0 {
                        self.output.push_str(", ");
                    }
                    self.write_expression(argument);
                }
                self.output.push(')');
            }
            _ => {
                if let Some(operator) = binary_operator(node.kind()) {
                    self.output.push('(');
                    self.write_expression(node.node(0));
                    let _ = write!(self.output, " {} ", operator);
                    self.write_expression(node.node(1));
                    self.output.push(')');
                }
            }
        }
    }

    fn write_line_start(&mut self) {
        for _ in 0..self.indent {
            self.output.push_str("    ");
        }
    }
}

fn binary_operator(kind: NodeKind) -> Option<&'static str> {
    let operator = match kind {
        NodeKind::Dot => ".",
        NodeKind::Cross => "^",
        NodeKind::Multiply => "*",
        NodeKind::Divide => "/",
        NodeKind::Add => "+",
        NodeKind::Subtract => "-",
        NodeKind::Greater => ">",
        NodeKind::GreaterEqual => ">=",
        NodeKind::Less => "<",
        NodeKind::LessEqual => "<=",
        NodeKind::Equal => "==",
        NodeKind::NotEqual => "!=",
        NodeKind::And => "&&",
        NodeKind::Or => "||",
        _ => return None,
    };
    Some(operator)
}

fn type_keyword(ty: ValueType) -> &'static str {
    match ty {
        ValueType::Float => "float",
        ValueType::String => "string",
        ValueType::Color => "color",
        ValueType::Point => "point",
        ValueType::Vector => "vector",
        ValueType::Normal => "normal",
        ValueType::Matrix => "matrix",
        _ => "void",
    }
}
