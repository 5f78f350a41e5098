use crate::value::{ValueStorage, ValueType};

/// The five shader kinds, each with its own implicit globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Light,
    Surface,
    Volume,
    Displacement,
    Imager,
}

impl ShaderKind {
    pub fn name(self) -> &'static str {
        match self {
            ShaderKind::Light => "light",
            ShaderKind::Surface => "surface",
            ShaderKind::Volume => "volume",
            ShaderKind::Displacement => "displacement",
            ShaderKind::Imager => "imager",
        }
    }

    /// The implicit globals preloaded into this kind's scope.
    pub fn globals(self) -> &'static [(&'static str, ValueType)] {
        match self {
            ShaderKind::Surface => &[
                ("Cs", ValueType::Color),
                ("Os", ValueType::Color),
                ("P", ValueType::Point),
                ("N", ValueType::Normal),
                ("I", ValueType::Vector),
                ("s", ValueType::Float),
                ("t", ValueType::Float),
                ("Ci", ValueType::Color),
                ("Oi", ValueType::Color),
            ],
            ShaderKind::Light => &[
                ("Ps", ValueType::Point),
                ("N", ValueType::Normal),
                ("Cl", ValueType::Color),
                ("Ol", ValueType::Color),
            ],
            ShaderKind::Volume => &[
                ("P", ValueType::Point),
                ("I", ValueType::Vector),
                ("Ci", ValueType::Color),
                ("Oi", ValueType::Color),
            ],
            ShaderKind::Displacement => &[
                ("P", ValueType::Point),
                ("N", ValueType::Normal),
                ("I", ValueType::Vector),
                ("s", ValueType::Float),
                ("t", ValueType::Float),
            ],
            ShaderKind::Imager => &[
                ("P", ValueType::Point),
                ("Ci", ValueType::Color),
                ("Oi", ValueType::Color),
                ("alpha", ValueType::Float),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Variable,
    Parameter,
    Global,
    Function,
    Builtin,
    Constant,
}

/// One overload of a function symbol: the (type, storage) pair expected for
/// each parameter, the return type, and the builtin that implements it.
#[derive(Debug, Clone)]
pub struct Signature {
    pub parameters: Vec<(ValueType, ValueStorage)>,
    pub return_type: ValueType,
    pub builtin: usize,
    /// The result is varying regardless of the arguments (`ambient`).
    pub varying_result: bool,
    /// The call stores its result through the first argument's register
    /// (e.g. `setcomp`), instead of a temporary.
    pub writes_first_argument: bool,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub ty: ValueType,
    pub storage: ValueStorage,
    pub kind: SymbolKind,
    pub output: bool,
    pub signatures: Vec<Signature>,
    /// Compile-time value for named constants such as `PI`.
    pub constant_value: Option<f32>,
}

impl Symbol {
    fn new(name: &str) -> Self {
        Symbol {
            name: name.to_string(),
            ty: ValueType::Null,
            storage: ValueStorage::Null,
            kind: SymbolKind::Variable,
            output: false,
            signatures: Vec::new(),
            constant_value: None,
        }
    }
}

/// Lexically scoped identifier table. Symbols live in an arena so that
/// syntax nodes can keep referring to them by id after their scope has been
/// popped; lookup only ever searches the live scope stack.
#[derive(Debug)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    scopes: Vec<Vec<SymbolId>>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// An empty table with a single global scope.
    pub fn empty() -> Self {
        SymbolTable {
            symbols: Vec::new(),
            scopes: vec![Vec::new()],
        }
    }

    /// The standard table: global scope preloaded with the builtin function
    /// signatures and named constants.
    pub fn new() -> Self {
        let mut table = SymbolTable::empty();
        crate::builtins::register_builtins(&mut table);
        let pi = table
            .add_symbol("PI")
            .expect("builtin registration defines PI twice");
        let symbol = table.symbol_mut(pi);
        symbol.ty = ValueType::Float;
        symbol.storage = ValueStorage::Uniform;
        symbol.kind = SymbolKind::Constant;
        symbol.constant_value = Some(std::f32::consts::PI);
        table
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "popped the global scope");
        self.scopes.pop();
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Add a symbol to the innermost scope. Fails if the name is already
    /// bound there.
    pub fn add_symbol(&mut self, name: &str) -> std::result::Result<SymbolId, String> {
        let scope = self.scopes.last().expect("scope stack is never empty");
        for id in scope {
            if self.symbols[id.0].name == name {
                return Err(format!("'{}' is already defined in this scope", name));
            }
        }
        let id = SymbolId(self.symbols.len());
        self.symbols.push(Symbol::new(name));
        self.scopes.last_mut().unwrap().push(id);
        Ok(id)
    }

    /// Bulk-add `(name, type)` globals to the innermost scope, the seeding
    /// used when entering a shader kind's scope.
    pub fn add_symbols(&mut self, globals: &[(&str, ValueType)]) {
        for &(name, ty) in globals {
            // Kind scopes are freshly pushed, so the names cannot collide.
            let id = self.add_symbol(name).expect("duplicate global in kind scope");
            let symbol = self.symbol_mut(id);
            symbol.ty = ty;
            symbol.storage = ValueStorage::Varying;
            symbol.kind = SymbolKind::Global;
        }
    }

    /// Look up a name, innermost scope first.
    pub fn find_symbol(&self, name: &str) -> Option<SymbolId> {
        for scope in self.scopes.iter().rev() {
            for id in scope.iter().rev() {
                if self.symbols[id.0].name == name {
                    return Some(*id);
                }
            }
        }
        None
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0]
    }

    pub fn push_shader_scope(&mut self, kind: ShaderKind) {
        self.push_scope();
        self.add_symbols(kind.globals());
    }

    /// `illuminance` bodies see the light's direction, color and opacity.
    pub fn push_illuminance_scope(&mut self) {
        self.push_scope();
        self.add_symbols(&[
            ("L", ValueType::Vector),
            ("Cl", ValueType::Color),
            ("Ol", ValueType::Color),
        ]);
    }

    /// `solar` and `illuminate` bodies see the outgoing light direction.
    pub fn push_illuminate_or_solar_scope(&mut self) {
        self.push_scope();
        self.add_symbols(&[("L", ValueType::Vector)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_nearest_binding() {
        let mut table = SymbolTable::empty();
        let outer = table.add_symbol("x").unwrap();
        table.push_scope();
        let inner = table.add_symbol("x").unwrap();
        assert_eq!(table.find_symbol("x"), Some(inner));
        table.pop_scope();
        assert_eq!(table.find_symbol("x"), Some(outer));
    }

    #[test]
    fn duplicate_in_innermost_scope_fails() {
        let mut table = SymbolTable::empty();
        table.add_symbol("x").unwrap();
        assert!(table.add_symbol("x").is_err());
        table.push_scope();
        assert!(table.add_symbol("x").is_ok());
    }

    #[test]
    fn surface_scope_preloads_globals() {
        let mut table = SymbolTable::empty();
        table.push_shader_scope(ShaderKind::Surface);
        for name in ["Cs", "Os", "P", "N", "I", "s", "t", "Ci", "Oi"] {
            let id = table.find_symbol(name).unwrap();
            assert_eq!(table.symbol(id).kind, SymbolKind::Global);
            assert_eq!(table.symbol(id).storage, ValueStorage::Varying);
        }
        table.pop_scope();
        assert!(table.find_symbol("Ci").is_none());
    }

    #[test]
    fn symbols_outlive_their_scope() {
        let mut table = SymbolTable::empty();
        table.push_scope();
        let id = table.add_symbol("local").unwrap();
        table.pop_scope();
        assert!(table.find_symbol("local").is_none());
        assert_eq!(table.symbol(id).name, "local");
    }
}
