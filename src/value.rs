use glam::{Mat4, Vec3};

/// Types a [`Value`] can take at runtime. The three geometric types share
/// their layout with `Color` but transform differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValueType {
    #[default]
    Null,
    Integer,
    Float,
    String,
    Color,
    Point,
    Vector,
    Normal,
    Matrix,
    Void,
}

impl ValueType {
    /// Color, point, vector and normal all occupy three floats per element.
    pub fn is_vec3(self) -> bool {
        matches!(
            self,
            ValueType::Color | ValueType::Point | ValueType::Vector | ValueType::Normal
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Null => "null",
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::Color => "color",
            ValueType::Point => "point",
            ValueType::Vector => "vector",
            ValueType::Normal => "normal",
            ValueType::Matrix => "matrix",
            ValueType::Void => "void",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum ValueStorage {
    #[default]
    Null,
    Constant,
    Uniform,
    Varying,
}

impl ValueStorage {
    /// One element for constant/uniform values, `grid_size` for varying.
    pub fn element_count(self, grid_size: usize) -> usize {
        match self {
            ValueStorage::Varying => grid_size,
            _ => 1,
        }
    }

    pub fn is_varying(self) -> bool {
        self == ValueStorage::Varying
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueStorage::Null => "null",
            ValueStorage::Constant => "constant",
            ValueStorage::Uniform => "uniform",
            ValueStorage::Varying => "varying",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Buffer {
    Empty,
    Int(Vec<i32>),
    Float(Vec<f32>),
    Vec3(Vec<Vec3>),
    Mat4(Vec<Mat4>),
    Str(Vec<String>),
}

/// A typed buffer of per-sample data. Uniform and constant values hold one
/// element; varying values hold one element per grid sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    ty: ValueType,
    storage: ValueStorage,
    buffer: Buffer,
}

impl Default for Value {
    fn default() -> Self {
        Value::null()
    }
}

impl Value {
    pub fn null() -> Self {
        Value {
            ty: ValueType::Null,
            storage: ValueStorage::Null,
            buffer: Buffer::Empty,
        }
    }

    pub fn new(ty: ValueType, storage: ValueStorage, size: usize) -> Self {
        let mut value = Value::null();
        value.reset(ty, storage, size);
        value
    }

    pub fn uniform_float(x: f32) -> Self {
        let mut value = Value::new(ValueType::Float, ValueStorage::Uniform, 1);
        value.floats_mut()[0] = x;
        value
    }

    pub fn uniform_vec3(ty: ValueType, v: Vec3) -> Self {
        debug_assert!(ty.is_vec3());
        let mut value = Value::new(ty, ValueStorage::Uniform, 1);
        value.vec3s_mut()[0] = v;
        value
    }

    pub fn uniform_matrix(m: Mat4) -> Self {
        let mut value = Value::new(ValueType::Matrix, ValueStorage::Uniform, 1);
        value.mat4s_mut()[0] = m;
        value
    }

    pub fn uniform_string(s: impl Into<String>) -> Self {
        Value {
            ty: ValueType::String,
            storage: ValueStorage::Uniform,
            buffer: Buffer::Str(vec![s.into()]),
        }
    }

    pub fn ty(&self) -> ValueType {
        self.ty
    }

    pub fn storage(&self) -> ValueStorage {
        self.storage
    }

    pub fn size(&self) -> usize {
        match &self.buffer {
            Buffer::Empty => 0,
            Buffer::Int(b) => b.len(),
            Buffer::Float(b) => b.len(),
            Buffer::Vec3(b) => b.len(),
            Buffer::Mat4(b) => b.len(),
            Buffer::Str(b) => b.len(),
        }
    }

    /// Retype and resize in place. Existing contents are kept when the type,
    /// storage and size already match, so masked stores can merge into prior
    /// data; any change reallocates zeroed.
    pub fn reset(&mut self, ty: ValueType, storage: ValueStorage, size: usize) {
        debug_assert!(size > 0);
        let size = storage.element_count(size);
        if self.ty == ty && self.storage == storage && self.size() == size {
            return;
        }
        self.ty = ty;
        self.storage = storage;
        self.buffer = match ty {
            ValueType::Integer => Buffer::Int(vec![0; size]),
            ValueType::Float => Buffer::Float(vec![0.0; size]),
            ValueType::Color | ValueType::Point | ValueType::Vector | ValueType::Normal => {
                Buffer::Vec3(vec![Vec3::ZERO; size])
            }
            ValueType::Matrix => Buffer::Mat4(vec![Mat4::IDENTITY; size]),
            ValueType::String => Buffer::Str(vec![String::new(); size]),
            ValueType::Null | ValueType::Void => Buffer::Empty,
        };
    }

    pub fn zero(&mut self) {
        match &mut self.buffer {
            Buffer::Empty => {}
            Buffer::Int(b) => b.fill(0),
            Buffer::Float(b) => b.fill(0.0),
            Buffer::Vec3(b) => b.fill(Vec3::ZERO),
            Buffer::Mat4(b) => b.fill(Mat4::ZERO),
            Buffer::Str(b) => b.fill(String::new()),
        }
    }

    /// Widen a uniform value to a varying buffer of `size` copies. Varying
    /// values are left untouched.
    pub fn promote(&mut self, size: usize) {
        if self.storage == ValueStorage::Varying {
            return;
        }
        self.storage = ValueStorage::Varying;
        self.buffer = match &self.buffer {
            Buffer::Empty => Buffer::Empty,
            Buffer::Int(b) => Buffer::Int(vec![b[0]; size]),
            Buffer::Float(b) => Buffer::Float(vec![b[0]; size]),
            Buffer::Vec3(b) => Buffer::Vec3(vec![b[0]; size]),
            Buffer::Mat4(b) => Buffer::Mat4(vec![b[0]; size]),
            Buffer::Str(b) => Buffer::Str(vec![b[0].clone(); size]),
        };
    }

    pub fn ints(&self) -> &[i32] {
        match &self.buffer {
            Buffer::Int(b) => b,
            _ => panic!("integer access on {} value", self.ty.name()),
        }
    }

    pub fn ints_mut(&mut self) -> &mut [i32] {
        match &mut self.buffer {
            Buffer::Int(b) => b,
            _ => panic!("integer access on non-integer value"),
        }
    }

    pub fn floats(&self) -> &[f32] {
        match &self.buffer {
            Buffer::Float(b) => b,
            _ => panic!("float access on {} value", self.ty.name()),
        }
    }

    pub fn floats_mut(&mut self) -> &mut [f32] {
        match &mut self.buffer {
            Buffer::Float(b) => b,
            _ => panic!("float access on non-float value"),
        }
    }

    pub fn vec3s(&self) -> &[Vec3] {
        match &self.buffer {
            Buffer::Vec3(b) => b,
            _ => panic!("vec3 access on {} value", self.ty.name()),
        }
    }

    pub fn vec3s_mut(&mut self) -> &mut [Vec3] {
        match &mut self.buffer {
            Buffer::Vec3(b) => b,
            _ => panic!("vec3 access on non-vec3 value"),
        }
    }

    pub fn mat4s(&self) -> &[Mat4] {
        match &self.buffer {
            Buffer::Mat4(b) => b,
            _ => panic!("matrix access on {} value", self.ty.name()),
        }
    }

    pub fn mat4s_mut(&mut self) -> &mut [Mat4] {
        match &mut self.buffer {
            Buffer::Mat4(b) => b,
            _ => panic!("matrix access on non-matrix value"),
        }
    }

    pub fn strings(&self) -> &[String] {
        match &self.buffer {
            Buffer::Str(b) => b,
            _ => panic!("string access on {} value", self.ty.name()),
        }
    }

    pub fn strings_mut(&mut self) -> &mut [String] {
        match &mut self.buffer {
            Buffer::Str(b) => b,
            _ => panic!("string access on non-string value"),
        }
    }

    /// First element of a float buffer, the usual read for uniform values.
    pub fn float_value(&self) -> f32 {
        self.floats()[0]
    }

    pub fn vec3_value(&self) -> Vec3 {
        self.vec3s()[0]
    }

    pub fn string_value(&self) -> &str {
        &self.strings()[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_allocates_by_storage() {
        let mut value = Value::null();
        value.reset(ValueType::Color, ValueStorage::Varying, 16);
        assert_eq!(value.size(), 16);
        value.reset(ValueType::Float, ValueStorage::Uniform, 16);
        assert_eq!(value.size(), 1);
    }

    #[test]
    fn reset_preserves_matching_shape() {
        let mut value = Value::new(ValueType::Float, ValueStorage::Varying, 4);
        value.floats_mut()[2] = 7.0;
        value.reset(ValueType::Float, ValueStorage::Varying, 4);
        assert_eq!(value.floats()[2], 7.0);
        value.reset(ValueType::Float, ValueStorage::Varying, 8);
        assert_eq!(value.floats()[2], 0.0);
    }

    #[test]
    fn promote_broadcasts_uniform() {
        let mut value = Value::uniform_float(3.0);
        value.promote(4);
        assert_eq!(value.storage(), ValueStorage::Varying);
        assert_eq!(value.floats(), &[3.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    #[should_panic]
    fn mismatched_accessor_panics() {
        let value = Value::uniform_float(1.0);
        value.vec3s();
    }
}
