use crate::ast::{NodeKind, SyntaxNode};
use crate::error::{CollectingErrorPolicy, ErrorCode};
use crate::lexer::tokenize;
use crate::parser::Parser;
use crate::semantic::SemanticAnalyzer;
use crate::symbol::SymbolTable;
use crate::value::{ValueStorage, ValueType};

fn analyze(source: &str) -> (SyntaxNode, SymbolTable, CollectingErrorPolicy, usize) {
    let _ = env_logger::builder().is_test(true).try_init();
    let tokens = tokenize(source).expect("tokenize failed");
    let mut symbol_table = SymbolTable::new();
    let policy = CollectingErrorPolicy::new();
    let tree = Parser::new(tokens, &mut symbol_table, &policy)
        .parse()
        .unwrap_or_else(|| {
            for (code, message) in policy.errors() {
                println!("  {}: {}", code, message);
            }
            panic!("expected '{}' to parse", source);
        });
    let mut shader = tree
        .nodes()
        .iter()
        .find(|node| {
            matches!(
                node.kind(),
                NodeKind::SurfaceShader | NodeKind::LightShader | NodeKind::DisplacementShader
            )
        })
        .expect("a shader definition")
        .clone();
    let errors = SemanticAnalyzer::new(&symbol_table, &policy).analyze_shader(&mut shader);
    (shader, symbol_table, policy, errors)
}

fn analyze_ok(source: &str) -> (SyntaxNode, SymbolTable) {
    let (shader, symbol_table, policy, errors) = analyze(source);
    if errors > 0 {
        for (code, message) in policy.errors() {
            println!("  {}: {}", code, message);
        }
        panic!("expected '{}' to analyze cleanly", source);
    }
    (shader, symbol_table)
}

/// Every expression node below `node` must carry a type and a storage, and
/// every identifier a symbol whose type matches.
fn check_annotations(node: &SyntaxNode, table: &SymbolTable) {
    let is_expression = matches!(
        node.kind(),
        NodeKind::Identifier
            | NodeKind::Integer
            | NodeKind::Real
            | NodeKind::String
            | NodeKind::Triple
            | NodeKind::Dot
            | NodeKind::Cross
            | NodeKind::Multiply
            | NodeKind::Divide
            | NodeKind::Add
            | NodeKind::Subtract
            | NodeKind::Greater
            | NodeKind::Less
            | NodeKind::Negate
            | NodeKind::Typecast
            | NodeKind::Assign
            | NodeKind::AddAssign
            | NodeKind::Call
    );
    if is_expression {
        assert_ne!(node.ty(), ValueType::Null, "untyped {:?}", node.kind());
        assert_ne!(
            node.storage(),
            ValueStorage::Null,
            "no storage on {:?}",
            node.kind()
        );
    }
    if node.kind() == NodeKind::Identifier {
        let id = node.symbol().expect("identifier bound");
        assert_eq!(node.original_type(), table.symbol(id).ty);
    }
    for child in node.nodes() {
        check_annotations(child, table);
    }
}

#[test]
fn every_expression_is_typed_after_analysis() {
    let (shader, table) = analyze_ok(
        "surface t(float gain = 0.5;) {\n\
         float x = gain * 2;\n\
         if (s > x) Ci = Cs * gain;\n\
         Oi = 1;\n\
         }",
    );
    check_annotations(shader.node(1), &table);
}

#[test]
fn binary_storage_is_varying_iff_an_operand_is() {
    let (shader, _) = analyze_ok("surface t(float gain = 1;) { float x = gain * 2; Ci = Cs * gain; }");
    // gain * 2: uniform * constant stays uniform.
    let uniform_product = shader.node(1).node(0).node(0).node(0);
    assert_eq!(uniform_product.kind(), NodeKind::Multiply);
    assert_eq!(uniform_product.storage(), ValueStorage::Uniform);
    // Cs * gain: a varying operand makes the result varying.
    let varying_product = shader.node(1).node(1).node(0);
    assert_eq!(varying_product.kind(), NodeKind::Multiply);
    assert_eq!(varying_product.storage(), ValueStorage::Varying);
}

#[test]
fn assigning_varying_to_uniform_is_a_storage_mismatch() {
    let (_, _, policy, errors) = analyze("surface t() { uniform float x = 1; x = s; }");
    assert!(errors > 0);
    assert!(policy.contains(ErrorCode::StorageMismatch));
}

#[test]
fn uniform_into_varying_records_a_promotion() {
    let (shader, _) = analyze_ok("surface t(float gain = 1;) { float x = gain; }");
    let initializer = shader.node(1).node(0).node(0).node(0);
    assert_eq!(initializer.storage(), ValueStorage::Varying);
    assert_eq!(initializer.original_storage(), ValueStorage::Uniform);
}

#[test]
fn float_into_color_records_a_conversion() {
    let (shader, _) = analyze_ok("surface t() { Oi = 1; }");
    let value = shader.node(1).node(0).node(0);
    assert_eq!(value.ty(), ValueType::Color);
    assert_eq!(value.original_type(), ValueType::Float);
}

#[test]
fn arithmetic_broadcasts_float_against_color() {
    let (shader, _) = analyze_ok("surface t() { Ci = Cs * 0.5; }");
    let product = shader.node(1).node(0).node(0);
    assert_eq!(product.ty(), ValueType::Color);
    let scalar = product.node(1);
    assert_eq!(scalar.ty(), ValueType::Color);
    assert_eq!(scalar.original_type(), ValueType::Float);
}

#[test]
fn comparisons_yield_float() {
    let (shader, _) = analyze_ok("surface t() { if (s > t) Ci = Cs; }");
    let comparison = shader.node(1).node(0).node(0);
    assert_eq!(comparison.kind(), NodeKind::Greater);
    assert_eq!(comparison.ty(), ValueType::Float);
    assert_eq!(comparison.storage(), ValueStorage::Varying);
}

#[test]
fn uniform_arguments_resolve_to_the_uniform_overload() {
    let (shader, table) = analyze_ok("surface t(float a = 1;) { float x = sin(a); }");
    let call = shader.node(1).node(0).node(0).node(0);
    assert_eq!(call.kind(), NodeKind::Call);
    let signature = &table.symbol(call.symbol().unwrap()).signatures[call.signature().unwrap()];
    assert_eq!(signature.parameters[0].1, ValueStorage::Uniform);
    assert_eq!(call.storage(), ValueStorage::Uniform);
}

#[test]
fn varying_arguments_resolve_to_the_varying_overload() {
    let (shader, table) = analyze_ok("surface t() { float x = sin(s); }");
    let call = shader.node(1).node(0).node(0).node(0);
    let signature = &table.symbol(call.symbol().unwrap()).signatures[call.signature().unwrap()];
    assert_eq!(signature.parameters[0].1, ValueStorage::Varying);
    assert_eq!(call.storage(), ValueStorage::Varying);
}

#[test]
fn mix_resolves_by_argument_type() {
    let (shader, table) = analyze_ok("surface t() { Ci = mix(Cs, Os, 0.5); }");
    let call = shader.node(1).node(0).node(0);
    assert_eq!(call.kind(), NodeKind::Call);
    assert_eq!(call.ty(), ValueType::Color);
    let signature = &table.symbol(call.symbol().unwrap()).signatures[call.signature().unwrap()];
    assert_eq!(signature.parameters[0].0, ValueType::Color);
}

#[test]
fn float_arguments_coerce_to_point_parameters() {
    // distance(point, point) called with floats: both convert.
    let (shader, _) = analyze_ok("surface t() { float x = distance(1, 2); }");
    let call = shader.node(1).node(0).node(0).node(0);
    assert_eq!(call.node(0).ty(), ValueType::Point);
    assert_eq!(call.node(0).original_type(), ValueType::Float);
}

#[test]
fn unresolvable_overload_is_reported() {
    let (_, _, policy, errors) = analyze("surface t() { float x = sin(\"angle\"); }");
    assert!(errors > 0);
    assert!(policy.contains(ErrorCode::OverloadNotFound));
}

#[test]
fn atan_resolves_both_arities() {
    analyze_ok("surface t(float a = 1; float b = 2;) { float x = atan(a) + atan(a, b); }");
}

#[test]
fn calls_to_shading_language_functions_are_unimplemented() {
    let source = "float half(float x;) { return x / 2; }\n\
                  surface t(float a = 1;) { float x = half(a); }";
    let tokens = tokenize(source).unwrap();
    let mut symbol_table = SymbolTable::new();
    let policy = CollectingErrorPolicy::new();
    let tree = Parser::new(tokens, &mut symbol_table, &policy)
        .parse()
        .expect("parses");
    let mut shader = tree.nodes()[1].clone();
    let errors = SemanticAnalyzer::new(&symbol_table, &policy).analyze_shader(&mut shader);
    assert!(errors > 0);
    assert!(policy.contains(ErrorCode::Unimplemented));
}

#[test]
fn break_beyond_loop_depth_is_an_error() {
    let (_, _, _, errors) = analyze("surface t() { float i = 0; while (i < 2) { break 2; } }");
    assert!(errors > 0);
}

#[test]
fn break_within_two_nested_loops_is_accepted() {
    analyze_ok(
        "surface t() { float i = 0; while (i < 2) { while (i < 2) { break 2; } } }",
    );
}

#[test]
fn break_outside_a_loop_is_an_error() {
    let (_, _, _, errors) = analyze("surface t() { break; }");
    assert!(errors > 0);
}

#[test]
fn uniform_matrix_into_varying_records_a_promotion() {
    let (shader, _) = analyze_ok(
        "surface t(matrix m = matrix (1, 0, 0, 0,  0, 1, 0, 0,  0, 0, 1, 0,  0, 0, 0, 1);)\n\
         { varying matrix v = m; }",
    );
    let initializer = shader.node(1).node(0).node(0).node(0);
    assert_eq!(initializer.ty(), ValueType::Matrix);
    assert_eq!(initializer.storage(), ValueStorage::Varying);
    assert_eq!(initializer.original_storage(), ValueStorage::Uniform);
}

#[test]
fn strings_cannot_be_promoted_to_varying() {
    let (_, _, policy, errors) =
        analyze("surface t(string name = \"wood\";) { string local = name; }");
    assert!(errors > 0);
    assert!(policy.contains(ErrorCode::StorageMismatch));
}

#[test]
fn conditions_must_be_float() {
    let (_, _, policy, errors) = analyze("surface t() { if (Cs) Ci = Cs; }");
    assert!(errors > 0);
    assert!(policy.contains(ErrorCode::TypeMismatch));
}

#[test]
fn assignment_to_a_named_constant_is_rejected() {
    let (_, _, policy, errors) = analyze("surface t() { PI = 3; }");
    assert!(errors > 0);
    assert!(policy.contains(ErrorCode::TypeMismatch));
}

#[test]
fn texture_result_type_follows_the_expected_type() {
    let (shader, _) = analyze_ok("surface t() { Ci = texture(\"a\"); float x = texture(\"b\"); }");
    let color_lookup = shader.node(1).node(0).node(0);
    assert_eq!(color_lookup.ty(), ValueType::Color);
    let float_lookup = shader.node(1).node(1).node(0).node(0);
    assert_eq!(float_lookup.ty(), ValueType::Float);
}

#[test]
fn ternary_branches_unify() {
    let (shader, _) = analyze_ok("surface t(float a = 1;) { Ci = a > 0 ? Cs : 0.5; }");
    let ternary = shader.node(1).node(0).node(0);
    assert_eq!(ternary.ty(), ValueType::Color);
    assert_eq!(ternary.node(2).ty(), ValueType::Color);
    assert_eq!(ternary.node(2).original_type(), ValueType::Float);
}
