/// Operations interpreted by the virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Opcode {
    #[default]
    Null,
    Halt,
    Reset,
    ClearMask,
    GenerateMask,
    InvertMask,
    JumpEmpty,
    JumpNotEmpty,
    JumpIlluminance,
    Jump,
    Transform,
    TransformVector,
    TransformNormal,
    TransformColor,
    TransformMatrix,
    Dot,
    Cross,
    MultiplyFloat,
    MultiplyVec3,
    DivideFloat,
    DivideVec3,
    AddFloat,
    AddVec3,
    SubtractFloat,
    SubtractVec3,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    And,
    Or,
    EqualFloat,
    EqualVec3,
    NotEqualFloat,
    NotEqualVec3,
    NegateFloat,
    NegateVec3,
    PromoteInteger,
    PromoteFloat,
    PromoteVec3,
    PromoteMatrix,
    FloatToColor,
    FloatToPoint,
    FloatToVector,
    FloatToNormal,
    FloatToMatrix,
    AssignFloat,
    AssignVec3,
    AssignMat4x4,
    AssignInteger,
    AssignString,
    AddAssignFloat,
    AddAssignVec3,
    SubtractAssignFloat,
    SubtractAssignVec3,
    MultiplyAssignFloat,
    MultiplyAssignVec3,
    DivideAssignFloat,
    DivideAssignVec3,
    FloatTexture,
    Vec3Texture,
    FloatEnvironment,
    Vec3Environment,
    Shadow,
    Call0,
    Call1,
    Call2,
    Call3,
    Call4,
    Call5,
    Ambient,
    Solar,
    SolarAxisAngle,
    Illuminate,
    IlluminateAxisAngle,
    IlluminanceAxisAngle,
}

impl Opcode {
    pub fn call(argument_count: usize) -> Opcode {
        match argument_count {
            0 => Opcode::Call0,
            1 => Opcode::Call1,
            2 => Opcode::Call2,
            3 => Opcode::Call3,
            4 => Opcode::Call4,
            5 => Opcode::Call5,
            n => panic!("no call opcode for {} arguments", n),
        }
    }

    pub fn call_argument_count(self) -> Option<usize> {
        match self {
            Opcode::Call0 => Some(0),
            Opcode::Call1 => Some(1),
            Opcode::Call2 => Some(2),
            Opcode::Call3 => Some(3),
            Opcode::Call4 => Some(4),
            Opcode::Call5 => Some(5),
            _ => None,
        }
    }
}

/// Kernel specialization selected from operand storage and arity. `U`/`V`
/// is uniform/varying, `1`/`3` the float count per element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dispatch {
    #[default]
    None,
    U1,
    V1,
    U3,
    V3,
    U1U1,
    U1V1,
    V1U1,
    V1V1,
    U3U3,
    U3V3,
    V3U3,
    V3V3,
}

impl Dispatch {
    pub fn unary(varying: bool, vec3: bool) -> Dispatch {
        match (varying, vec3) {
            (false, false) => Dispatch::U1,
            (true, false) => Dispatch::V1,
            (false, true) => Dispatch::U3,
            (true, true) => Dispatch::V3,
        }
    }

    pub fn binary(lhs_varying: bool, rhs_varying: bool, vec3: bool) -> Dispatch {
        match (lhs_varying, rhs_varying, vec3) {
            (false, false, false) => Dispatch::U1U1,
            (false, true, false) => Dispatch::U1V1,
            (true, false, false) => Dispatch::V1U1,
            (true, true, false) => Dispatch::V1V1,
            (false, false, true) => Dispatch::U3U3,
            (false, true, true) => Dispatch::U3V3,
            (true, false, true) => Dispatch::V3U3,
            (true, true, true) => Dispatch::V3V3,
        }
    }

    pub fn lhs_varying(self) -> bool {
        matches!(
            self,
            Dispatch::V1 | Dispatch::V3 | Dispatch::V1U1 | Dispatch::V1V1 | Dispatch::V3U3 | Dispatch::V3V3
        )
    }

    pub fn rhs_varying(self) -> bool {
        matches!(
            self,
            Dispatch::U1V1 | Dispatch::V1V1 | Dispatch::U3V3 | Dispatch::V3V3
        )
    }

    pub fn result_varying(self) -> bool {
        self.lhs_varying() || self.rhs_varying()
    }
}

/// Argument slots per instruction. Call instructions use the most:
/// destination, builtin index, and up to five argument registers.
pub const INSTRUCTION_ARGUMENTS: usize = 7;

/// A single encoded instruction: opcode, kernel dispatch, and a fixed block
/// of operand slots (register numbers, jump targets, constant indices).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub dispatch: Dispatch,
    pub args: [i32; INSTRUCTION_ARGUMENTS],
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Instruction {
            opcode,
            dispatch: Dispatch::None,
            args: [0; INSTRUCTION_ARGUMENTS],
        }
    }

    pub fn with_dispatch(opcode: Opcode, dispatch: Dispatch) -> Self {
        Instruction {
            opcode,
            dispatch,
            args: [0; INSTRUCTION_ARGUMENTS],
        }
    }

    pub fn arg(&self, index: usize) -> i32 {
        self.args[index]
    }

    pub fn register(&self, index: usize) -> usize {
        self.args[index] as usize
    }

    pub fn target(&self) -> usize {
        self.args[0] as usize
    }
}
