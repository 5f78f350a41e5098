use crate::instruction::Opcode;
use crate::symbol::SymbolId;
use crate::value::{ValueStorage, ValueType};
use glam::{Mat4, Vec3};

/// Tags for every construct the parser builds. One node struct carries all
/// of them; the kind decides which fields and children are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Null,
    List,

    // Definitions. Children of a shader node: formals list, statement list.
    LightShader,
    SurfaceShader,
    VolumeShader,
    DisplacementShader,
    ImagerShader,
    Function,

    // A declarator: lexeme is the name, child 0 the initializer (or Null).
    Variable,

    // Type and modifier markers used in formals and typecasts. A type node
    // may carry a coordinate-space string as child 0.
    FloatType,
    StringType,
    ColorType,
    PointType,
    VectorType,
    NormalType,
    MatrixType,
    VoidType,
    Varying,
    Uniform,
    Output,
    Extern,

    // Statements.
    Return,
    Break,
    Continue,
    If,
    IfElse,
    While,
    For,
    Solar,
    Illuminate,
    Illuminance,
    Ambient,

    // Expressions.
    Dot,
    Cross,
    Multiply,
    Divide,
    Add,
    Subtract,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Equal,
    NotEqual,
    And,
    Or,
    Negate,
    Ternary,
    Typecast,
    Assign,
    AddAssign,
    SubtractAssign,
    MultiplyAssign,
    DivideAssign,
    Integer,
    Real,
    String,
    Identifier,
    Triple,
    Sixteentuple,
    Call,
    Texture,
    Environment,
    Shadow,
}

/// A node of the annotated syntax tree. The parser fills kind, line, lexeme
/// and children; semantic analysis fills the type/storage triples, the
/// instruction choice and the constant index.
#[derive(Debug, Clone)]
pub struct SyntaxNode {
    kind: NodeKind,
    line: usize,
    lexeme: String,
    nodes: Vec<SyntaxNode>,
    symbol: Option<SymbolId>,
    signature: Option<usize>,
    constant_index: Option<usize>,
    expected_type: ValueType,
    original_type: ValueType,
    ty: ValueType,
    expected_storage: ValueStorage,
    original_storage: ValueStorage,
    storage: ValueStorage,
    instruction: Opcode,
}

impl SyntaxNode {
    pub fn new(kind: NodeKind, line: usize) -> Self {
        SyntaxNode {
            kind,
            line,
            lexeme: String::new(),
            nodes: Vec::new(),
            symbol: None,
            signature: None,
            constant_index: None,
            expected_type: ValueType::Null,
            original_type: ValueType::Null,
            ty: ValueType::Null,
            expected_storage: ValueStorage::Null,
            original_storage: ValueStorage::Null,
            storage: ValueStorage::Null,
            instruction: Opcode::Null,
        }
    }

    pub fn with_lexeme(kind: NodeKind, line: usize, lexeme: impl Into<String>) -> Self {
        let mut node = SyntaxNode::new(kind, line);
        node.lexeme = lexeme.into();
        node
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: NodeKind) {
        self.kind = kind;
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn lexeme(&self) -> &str {
        &self.lexeme
    }

    pub fn add_node(&mut self, node: SyntaxNode) {
        self.nodes.push(node);
    }

    pub fn add_node_at_front(&mut self, node: SyntaxNode) {
        self.nodes.insert(0, node);
    }

    pub fn node(&self, index: usize) -> &SyntaxNode {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut SyntaxNode {
        &mut self.nodes[index]
    }

    pub fn nodes(&self) -> &[SyntaxNode] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [SyntaxNode] {
        &mut self.nodes
    }

    pub fn take_nodes(&mut self) -> Vec<SyntaxNode> {
        std::mem::take(&mut self.nodes)
    }

    /// Wrap child `index` in a freshly built node (conversion and promotion
    /// insertion during semantic analysis).
    pub fn wrap_node(&mut self, index: usize, mut wrapper: SyntaxNode) {
        let child = std::mem::replace(&mut self.nodes[index], SyntaxNode::new(NodeKind::Null, 0));
        wrapper.add_node(child);
        self.nodes[index] = wrapper;
    }

    pub fn set_symbol(&mut self, symbol: Option<SymbolId>) {
        self.symbol = symbol;
    }

    pub fn symbol(&self) -> Option<SymbolId> {
        self.symbol
    }

    /// Index of the overload chosen for a call, into the bound function
    /// symbol's signature list.
    pub fn set_signature(&mut self, signature: usize) {
        self.signature = Some(signature);
    }

    pub fn signature(&self) -> Option<usize> {
        self.signature
    }

    pub fn set_constant_index(&mut self, index: usize) {
        self.constant_index = Some(index);
    }

    pub fn constant_index(&self) -> Option<usize> {
        self.constant_index
    }

    pub fn ty(&self) -> ValueType {
        self.ty
    }

    pub fn set_type(&mut self, ty: ValueType) {
        self.ty = ty;
        self.original_type = ty;
    }

    /// Record an implicit conversion: keeps the pre-conversion type around
    /// for diagnostics and codegen.
    pub fn set_type_for_conversion(&mut self, ty: ValueType) {
        self.original_type = self.ty;
        self.ty = ty;
    }

    pub fn original_type(&self) -> ValueType {
        self.original_type
    }

    pub fn set_expected_type(&mut self, ty: ValueType) {
        self.expected_type = ty;
    }

    pub fn expected_type(&self) -> ValueType {
        self.expected_type
    }

    pub fn storage(&self) -> ValueStorage {
        self.storage
    }

    pub fn set_storage(&mut self, storage: ValueStorage) {
        self.storage = storage;
        self.original_storage = storage;
    }

    pub fn set_storage_for_promotion(&mut self, storage: ValueStorage) {
        self.original_storage = self.storage;
        self.storage = storage;
    }

    pub fn original_storage(&self) -> ValueStorage {
        self.original_storage
    }

    pub fn set_expected_storage(&mut self, storage: ValueStorage) {
        self.expected_storage = storage;
    }

    pub fn expected_storage(&self) -> ValueStorage {
        self.expected_storage
    }

    pub fn instruction(&self) -> Opcode {
        self.instruction
    }

    pub fn set_instruction(&mut self, instruction: Opcode) {
        self.instruction = instruction;
    }

    /// Numeric value of an `Integer` or `Real` literal.
    pub fn real(&self) -> f32 {
        debug_assert!(matches!(self.kind, NodeKind::Real | NodeKind::Integer));
        self.lexeme.parse().unwrap_or(0.0)
    }

    pub fn integer(&self) -> i32 {
        debug_assert!(self.kind == NodeKind::Integer);
        self.lexeme.parse().unwrap_or(0)
    }

    /// A `Triple` of literal children as a vector.
    pub fn vec3(&self) -> Vec3 {
        debug_assert!(self.kind == NodeKind::Triple && self.nodes.len() == 3);
        Vec3::new(self.node(0).real(), self.node(1).real(), self.node(2).real())
    }

    /// A `Sixteentuple` of literal children as a row-major matrix.
    pub fn mat4(&self) -> Mat4 {
        debug_assert!(self.kind == NodeKind::Sixteentuple && self.nodes.len() == 16);
        let mut elements = [0.0f32; 16];
        for (element, node) in elements.iter_mut().zip(&self.nodes) {
            *element = node.real();
        }
        Mat4::from_cols_array(&elements).transpose()
    }

    /// The value type named by a type node.
    pub fn value_type(&self) -> ValueType {
        match self.kind {
            NodeKind::FloatType => ValueType::Float,
            NodeKind::StringType => ValueType::String,
            NodeKind::ColorType => ValueType::Color,
            NodeKind::PointType => ValueType::Point,
            NodeKind::VectorType => ValueType::Vector,
            NodeKind::NormalType => ValueType::Normal,
            NodeKind::MatrixType => ValueType::Matrix,
            NodeKind::VoidType => ValueType::Void,
            _ => ValueType::Null,
        }
    }
}

/// Structural equality: kind, lexeme and children. Annotations are ignored
/// so trees can be compared across compile stages and round trips.
impl PartialEq for SyntaxNode {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.lexeme == other.lexeme && self.nodes == other.nodes
    }
}
