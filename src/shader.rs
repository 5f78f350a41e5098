use crate::ast::NodeKind;
use crate::codegen::CodeGenerator;
use crate::context::{Light, ShadingContext};
use crate::error::{ErrorCode, ErrorPolicy, RenderError, Result};
use crate::grid::Grid;
use crate::instruction::Instruction;
use crate::lexer;
use crate::parser::Parser;
use crate::semantic::SemanticAnalyzer;
use crate::symbol::{ShaderKind, SymbolTable};
use crate::value::{Value, ValueStorage, ValueType};
use crate::vm::VirtualMachine;
use log::debug;

/// Which transform a space-annotated constant undergoes when it is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceKind {
    Point,
    Vector,
    Normal,
    Color,
    Matrix,
}

/// A constant-pool entry. Constants built from a space-string typecast keep
/// the space name so each invocation can transform them through the
/// coordinate oracle before execution starts.
#[derive(Debug, Clone)]
pub struct Constant {
    pub value: Value,
    pub space: Option<(SpaceKind, String)>,
}

impl Constant {
    pub fn plain(value: Value) -> Self {
        Constant { value, space: None }
    }
}

#[derive(Debug, Clone)]
pub struct ParameterInfo {
    pub name: String,
    pub ty: ValueType,
    pub storage: ValueStorage,
    pub register: usize,
    pub default_constant: Option<usize>,
    pub output: bool,
}

#[derive(Debug, Clone)]
pub struct GlobalInfo {
    pub name: String,
    pub ty: ValueType,
    pub register: usize,
}

/// A compiled shader: parameter and global metadata, the constant pool, and
/// the instruction stream. Immutable once built; invocations on different
/// grids may share it by reference.
#[derive(Debug)]
pub struct Shader {
    name: String,
    kind: ShaderKind,
    constants: Vec<Constant>,
    parameters: Vec<ParameterInfo>,
    globals: Vec<GlobalInfo>,
    register_count: usize,
    instructions: Vec<Instruction>,
    parameter_values: Vec<Option<Value>>,
}

impl Shader {
    pub(crate) fn build(
        name: String,
        kind: ShaderKind,
        constants: Vec<Constant>,
        parameters: Vec<ParameterInfo>,
        globals: Vec<GlobalInfo>,
        register_count: usize,
        instructions: Vec<Instruction>,
    ) -> Self {
        let parameter_values = vec![None; parameters.len()];
        Shader {
            name,
            kind,
            constants,
            parameters,
            globals,
            register_count,
            instructions,
            parameter_values,
        }
    }

    /// Compile a shader from source text. Symbols created during the parse
    /// live in the given table; diagnostics stream to the policy.
    pub fn from_source(
        source: &str,
        name: &str,
        symbol_table: &mut SymbolTable,
        error_policy: &dyn ErrorPolicy,
    ) -> Result<Shader> {
        let tokens = match lexer::tokenize(source) {
            Ok(tokens) => tokens,
            Err(message) => {
                error_policy.error(ErrorCode::SyntaxError, &message);
                return Err(RenderError::SyntaxError(name.to_string()));
            }
        };

        let parser = Parser::new(tokens, symbol_table, error_policy);
        let Some(tree) = parser.parse() else {
            error_policy.error(
                ErrorCode::ParsingFailed,
                &format!("Parsing shader '{}' failed", name),
            );
            return Err(RenderError::ParsingFailed(name.to_string()));
        };

        let mut shader_node = None;
        for node in tree.nodes() {
            if matches!(
                node.kind(),
                NodeKind::LightShader
                    | NodeKind::SurfaceShader
                    | NodeKind::VolumeShader
                    | NodeKind::DisplacementShader
                    | NodeKind::ImagerShader
            ) {
                shader_node = Some(node.clone());
                break;
            }
        }
        let Some(mut shader_node) = shader_node else {
            error_policy.error(
                ErrorCode::ParsingFailed,
                &format!("Shader '{}' defines no shader", name),
            );
            return Err(RenderError::ParsingFailed(name.to_string()));
        };

        let errors =
            SemanticAnalyzer::new(symbol_table, error_policy).analyze_shader(&mut shader_node);
        if errors > 0 {
            return Err(RenderError::SemanticAnalysisFailed(name.to_string()));
        }

        debug!("generating code for shader '{}'", name);
        CodeGenerator::new(symbol_table, error_policy).generate(&shader_node, name)
    }

    pub fn from_file(
        path: &str,
        symbol_table: &mut SymbolTable,
        error_policy: &dyn ErrorPolicy,
    ) -> Result<Shader> {
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(error) => {
                error_policy.error(
                    ErrorCode::OpeningFileFailed,
                    &format!("Opening shader '{}' failed", path),
                );
                return Err(RenderError::OpeningFileFailed(path.to_string(), error));
            }
        };
        Shader::from_source(&source, path, symbol_table, error_policy)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ShaderKind {
        self.kind
    }

    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    pub fn parameters(&self) -> &[ParameterInfo] {
        &self.parameters
    }

    pub fn globals(&self) -> &[GlobalInfo] {
        &self.globals
    }

    pub fn register_count(&self) -> usize {
        self.register_count
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn parameter_value(&self, index: usize) -> Option<&Value> {
        self.parameter_values[index].as_ref()
    }

    /// Set a parameter before invocation. The value's type must match the
    /// declared parameter type.
    pub fn parameter(&mut self, name: &str, value: Value) -> Result<()> {
        let index = self
            .parameters
            .iter()
            .position(|parameter| parameter.name == name)
            .ok_or_else(|| RenderError::UnknownParameter(name.to_string()))?;
        self.parameter_values[index] = Some(value);
        Ok(())
    }

    /// Run the shader over a grid, mutating its named values in place.
    pub fn shade(
        &self,
        grid: &mut Grid,
        context: &ShadingContext,
        error_policy: &dyn ErrorPolicy,
    ) -> Result<()> {
        if self.kind == ShaderKind::Light {
            return Err(RenderError::WrongShaderKind(
                self.name.clone(),
                "light",
                "surface",
            ));
        }
        let mut machine = VirtualMachine::new(self, context, error_policy);
        machine.run(grid)?;
        Ok(())
    }

    /// Run a light shader over a grid, returning the lights it emits for
    /// the surface pass's integration loop.
    pub fn light_shade(
        &self,
        grid: &mut Grid,
        context: &ShadingContext,
        error_policy: &dyn ErrorPolicy,
    ) -> Result<Vec<Light>> {
        if self.kind != ShaderKind::Light {
            return Err(RenderError::WrongShaderKind(
                self.name.clone(),
                self.kind.name(),
                "light",
            ));
        }
        let mut machine = VirtualMachine::new(self, context, error_policy);
        machine.run(grid)
    }
}
