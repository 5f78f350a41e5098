use crate::error::{CollectingErrorPolicy, ErrorCode};
use crate::instruction::Opcode;
use crate::shader::{Shader, SpaceKind};
use crate::symbol::{ShaderKind, SymbolTable};
use crate::value::{ValueStorage, ValueType};
use glam::Vec3;

fn compile(source: &str) -> Shader {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut symbol_table = SymbolTable::new();
    let policy = CollectingErrorPolicy::new();
    Shader::from_source(source, "test", &mut symbol_table, &policy).unwrap_or_else(|error| {
        for (code, message) in policy.errors() {
            println!("  {}: {}", code, message);
        }
        panic!("compilation failed: {}", error);
    })
}

fn opcodes(shader: &Shader) -> Vec<Opcode> {
    shader.instructions().iter().map(|i| i.opcode).collect()
}

#[test]
fn compiles_to_a_halting_instruction_stream() {
    let shader = compile("surface t() { Ci = Cs; }");
    assert_eq!(shader.kind(), ShaderKind::Surface);
    assert_eq!(shader.instructions().last().unwrap().opcode, Opcode::Halt);
}

#[test]
fn uniform_only_expressions_use_uniform_dispatch() {
    let shader = compile("surface t(float a = 1; float b = 2;) { uniform float x = a * b + 2; }");
    for instruction in shader.instructions() {
        assert!(
            !instruction.dispatch.result_varying(),
            "varying dispatch in a uniform-only shader: {:?}",
            instruction
        );
    }
}

#[test]
fn mask_pushes_and_pops_balance() {
    let shader = compile(
        "surface t() {\n\
         if (s > 0.5) Ci = Cs;\n\
         else Ci = Os;\n\
         float x = 0;\n\
         while (x < 3) x += 1;\n\
         for (x = 0; x < 2; x += 1) Oi = Os;\n\
         }",
    );
    let codes = opcodes(&shader);
    let pushes = codes.iter().filter(|op| **op == Opcode::ClearMask).count();
    let pops = codes.iter().filter(|op| **op == Opcode::Reset).count();
    assert_eq!(pushes, 3);
    assert_eq!(pushes, pops);
}

#[test]
fn if_generates_the_documented_mask_sequence() {
    let shader = compile("surface t() { if (s > 0.5) Ci = Cs; }");
    let codes = opcodes(&shader);
    let clear = codes.iter().position(|op| *op == Opcode::ClearMask).unwrap();
    assert_eq!(codes[clear + 1], Opcode::GenerateMask);
    assert_eq!(codes[clear + 2], Opcode::JumpEmpty);
    // The skip target is the frame pop.
    let skip = &shader.instructions()[clear + 2];
    assert_eq!(shader.instructions()[skip.target()].opcode, Opcode::Reset);
}

#[test]
fn if_else_inverts_within_the_frame() {
    let shader = compile("surface t() { if (s > 0.5) Ci = Cs; else Ci = Os; }");
    let codes = opcodes(&shader);
    assert!(codes.contains(&Opcode::InvertMask));
    let pushes = codes.iter().filter(|op| **op == Opcode::ClearMask).count();
    let pops = codes.iter().filter(|op| **op == Opcode::Reset).count();
    assert_eq!(pushes, 1);
    assert_eq!(pops, 1);
}

#[test]
fn while_jumps_back_to_its_condition() {
    let shader = compile("surface t() { float x = 0; while (x < 3) x += 1; }");
    let instructions = shader.instructions();
    let jump = instructions
        .iter()
        .enumerate()
        .find(|(_, i)| i.opcode == Opcode::Jump)
        .expect("a back jump");
    assert!(jump.1.target() < jump.0, "loop jump goes backward");
    let exit = instructions
        .iter()
        .find(|i| i.opcode == Opcode::JumpEmpty)
        .expect("a loop exit");
    assert_eq!(instructions[exit.target()].opcode, Opcode::Reset);
}

#[test]
fn break_pops_intervening_frames_before_jumping() {
    let shader = compile(
        "surface t() {\n\
         float x = 0;\n\
         while (x < 3) {\n\
         if (s > 0.5) break;\n\
         x += 1;\n\
         }\n\
         }",
    );
    let instructions = shader.instructions();
    // The break's jump lands on the loop's frame pop, preceded by the pop
    // of the if frame.
    let jump = instructions
        .iter()
        .enumerate()
        .filter(|(_, i)| i.opcode == Opcode::Jump)
        .find(|(index, i)| i.target() > *index)
        .expect("the break jump");
    assert_eq!(instructions[jump.0 - 1].opcode, Opcode::Reset);
    assert_eq!(instructions[jump.1.target()].opcode, Opcode::Reset);
}

#[test]
fn literal_assignments_fold_into_the_pool() {
    let shader = compile("surface t() { Ci = color(1, 0, 0); Oi = 1; }");
    let red = shader
        .constants()
        .iter()
        .find(|c| c.value.ty() == ValueType::Color && c.value.vec3_value() == Vec3::new(1.0, 0.0, 0.0));
    assert!(red.is_some());
    // `Oi = 1` broadcasts the float into an opaque color constant.
    let white = shader
        .constants()
        .iter()
        .find(|c| c.value.ty() == ValueType::Color && c.value.vec3_value() == Vec3::ONE);
    assert!(white.is_some());
    assert!(opcodes(&shader).contains(&Opcode::PromoteVec3));
}

#[test]
fn space_typecast_defaults_keep_their_space() {
    let shader = compile("surface t(point o = point \"world\" (0, 0, 0);) { P = o; }");
    let parameter = &shader.parameters()[0];
    assert_eq!(parameter.name, "o");
    assert_eq!(parameter.ty, ValueType::Point);
    assert_eq!(parameter.storage, ValueStorage::Uniform);
    let constant = &shader.constants()[parameter.default_constant.unwrap()];
    assert_eq!(
        constant.space.as_ref().map(|(kind, name)| (*kind, name.as_str())),
        Some((SpaceKind::Point, "world"))
    );
}

#[test]
fn light_shaders_emit_a_lighting_capture() {
    let shader = compile("light amb(color c = 1;) { Cl = c; }");
    assert_eq!(shader.kind(), ShaderKind::Light);
    assert!(opcodes(&shader).contains(&Opcode::Ambient));
    let default = &shader.constants()[shader.parameters()[0].default_constant.unwrap()];
    assert_eq!(default.value.ty(), ValueType::Color);
    assert_eq!(default.value.vec3_value(), Vec3::ONE);
}

#[test]
fn solar_with_axis_and_angle_selects_the_axis_angle_opcode() {
    let shader = compile("light sun() { solar((0, 0, -1), 0) { Cl = (1, 1, 1); } }");
    let codes = opcodes(&shader);
    assert!(codes.contains(&Opcode::SolarAxisAngle));
    assert!(!codes.contains(&Opcode::Solar));
}

#[test]
fn illuminance_compiles_to_the_light_loop() {
    let shader = compile("surface t() { illuminance(P, N, PI / 2) { Ci += Cl; } }");
    let instructions = shader.instructions();
    let advance = instructions
        .iter()
        .enumerate()
        .find(|(_, i)| i.opcode == Opcode::JumpIlluminance)
        .expect("the loop head");
    assert_eq!(instructions[advance.0 + 1].opcode, Opcode::IlluminanceAxisAngle);
    // Falling out of the loop lands past the back jump.
    assert!(advance.1.target() > advance.0);
    let back_jump = &instructions[advance.1.target() - 1];
    assert_eq!(back_jump.opcode, Opcode::Jump);
    assert_eq!(back_jump.target(), advance.0);
}

#[test]
fn calls_encode_arity_and_builtin() {
    let shader = compile("surface t() { Ci = Cs * normalize(N).I; }");
    let call = shader
        .instructions()
        .iter()
        .find(|i| i.opcode == Opcode::Call1)
        .expect("the normalize call");
    let builtin = &crate::builtins::builtins()[call.args[1] as usize];
    assert_eq!(builtin.name, "normalize");
}

#[test]
fn nonconstant_parameter_defaults_are_rejected() {
    let mut symbol_table = SymbolTable::new();
    let policy = CollectingErrorPolicy::new();
    let result = Shader::from_source(
        "surface t(float a = s;) { Ci = Cs; }",
        "test",
        &mut symbol_table,
        &policy,
    );
    assert!(result.is_err());
    assert!(policy.contains(ErrorCode::Unimplemented) || policy.contains(ErrorCode::StorageMismatch));
}

#[test]
fn registers_stay_within_the_declared_count() {
    let shader = compile(
        "surface t(float a = 1;) {\n\
         float x = a * 2 + 3;\n\
         Ci = Cs * x;\n\
         if (x > 1) Ci += Os;\n\
         }",
    );
    for instruction in shader.instructions() {
        for argument in instruction.args {
            assert!(argument < shader.register_count() as i32);
        }
    }
}
