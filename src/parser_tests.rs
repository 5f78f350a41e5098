use crate::ast::{NodeKind, SyntaxNode};
use crate::diags::SourceFormatter;
use crate::error::{CollectingErrorPolicy, ErrorCode};
use crate::lexer::tokenize;
use crate::parser::Parser;
use crate::symbol::{SymbolKind, SymbolTable};
use crate::value::{ValueStorage, ValueType};

fn parse_with(source: &str) -> (Option<SyntaxNode>, SymbolTable, CollectingErrorPolicy) {
    let _ = env_logger::builder().is_test(true).try_init();
    let tokens = tokenize(source).expect("tokenize failed");
    let mut symbol_table = SymbolTable::new();
    let policy = CollectingErrorPolicy::new();
    let tree = Parser::new(tokens, &mut symbol_table, &policy).parse();
    (tree, symbol_table, policy)
}

/// Parse input and return the tree, panicking with the diagnostics on
/// failure.
fn parse_ok(source: &str) -> (SyntaxNode, SymbolTable) {
    let (tree, symbol_table, policy) = parse_with(source);
    match tree {
        Some(tree) => (tree, symbol_table),
        None => {
            println!("parse failed, diagnostics:");
            for (code, message) in policy.errors() {
                println!("  {}: {}", code, message);
            }
            panic!("expected '{}' to parse", source);
        }
    }
}

fn shader_of(tree: &SyntaxNode) -> &SyntaxNode {
    tree.nodes()
        .iter()
        .find(|node| {
            matches!(
                node.kind(),
                NodeKind::SurfaceShader | NodeKind::LightShader | NodeKind::DisplacementShader
            )
        })
        .expect("a shader definition")
}

#[test]
fn surface_shader_has_formals_and_statements() {
    let (tree, _) = parse_ok("surface plastic(float Ka = 1;) { Ci = Cs; }");
    let shader = shader_of(&tree);
    assert_eq!(shader.kind(), NodeKind::SurfaceShader);
    assert_eq!(shader.lexeme(), "plastic");
    assert_eq!(shader.nodes().len(), 2);
    assert_eq!(shader.node(0).nodes().len(), 1);
    assert_eq!(shader.node(0).node(0).lexeme(), "Ka");
}

#[test]
fn parameters_default_to_uniform_locals_to_varying() {
    let (tree, table) = parse_ok("surface t(float a = 1;) { float b = 2; Ci = Cs; }");
    let shader = shader_of(&tree);

    let a = shader.node(0).node(0).symbol().unwrap();
    assert_eq!(table.symbol(a).storage, ValueStorage::Uniform);
    assert_eq!(table.symbol(a).kind, SymbolKind::Parameter);

    let b = shader.node(1).node(0).node(0).symbol().unwrap();
    assert_eq!(table.symbol(b).storage, ValueStorage::Varying);
    assert_eq!(table.symbol(b).kind, SymbolKind::Variable);
}

#[test]
fn shader_globals_are_scoped_to_the_definition() {
    let (tree, table) = parse_ok("surface t() { Ci = Cs; }");
    let shader = shader_of(&tree);
    let assignment = shader.node(1).node(0);
    let ci = assignment.symbol().unwrap();
    assert_eq!(table.symbol(ci).ty, ValueType::Color);
    assert_eq!(table.symbol(ci).kind, SymbolKind::Global);
    // The scope was popped with the definition.
    assert!(table.find_symbol("Ci").is_none());
}

#[test]
fn unknown_identifier_is_reported_and_suppresses_the_tree() {
    let (tree, _, policy) = parse_with("surface t() { Ci = missing; }");
    assert!(tree.is_none());
    assert!(policy.contains(ErrorCode::UnknownIdentifier));
    assert!(policy.contains(ErrorCode::ParsingFailed) || !policy.is_empty());
}

#[test]
fn light_without_solar_or_illuminate_gets_an_ambient_head() {
    let (tree, _) = parse_ok("light amb(color c = 1;) {}");
    let shader = shader_of(&tree);
    let statements = shader.node(1);
    assert!(!statements.nodes().is_empty());
    let ambient = statements.node(0);
    assert_eq!(ambient.kind(), NodeKind::Ambient);
    assert_eq!(ambient.node(0).lexeme(), "Cl");
    assert_eq!(ambient.node(1).lexeme(), "Ol");
    assert!(ambient.node(0).symbol().is_some());
    assert!(ambient.node(1).symbol().is_some());
}

#[test]
fn light_with_solar_gets_no_ambient() {
    let (tree, _) = parse_ok("light sun() { solar((0, 0, -1), 0) { Cl = (1, 1, 1); } }");
    let shader = shader_of(&tree);
    let solar = shader.node(1).node(0);
    assert_eq!(solar.kind(), NodeKind::Solar);
    // Parameters, body, then the implicit L, Cl, Ol.
    assert_eq!(solar.nodes().len(), 5);
    assert_eq!(solar.node(2).lexeme(), "L");
    assert_eq!(solar.node(3).lexeme(), "Cl");
    assert_eq!(solar.node(4).lexeme(), "Ol");
}

#[test]
fn illuminance_carries_its_implicit_globals() {
    let (tree, _) = parse_ok(
        "surface t() { illuminance(P, N, PI / 2) { Ci += Cl; } }",
    );
    let shader = shader_of(&tree);
    let illuminance = shader.node(1).node(0);
    assert_eq!(illuminance.kind(), NodeKind::Illuminance);
    assert_eq!(illuminance.node(0).nodes().len(), 3);
    assert_eq!(illuminance.node(2).lexeme(), "L");
    assert_eq!(illuminance.node(3).lexeme(), "Cl");
    assert_eq!(illuminance.node(4).lexeme(), "Ol");
}

#[test]
fn illuminate_carries_surface_position_and_direction() {
    let (tree, _) = parse_ok("light spot() { illuminate((0, 0, 0)) { Cl = (1, 1, 1); } }");
    let shader = shader_of(&tree);
    let illuminate = shader.node(1).node(0);
    assert_eq!(illuminate.kind(), NodeKind::Illuminate);
    assert_eq!(illuminate.node(2).lexeme(), "Ps");
    assert_eq!(illuminate.node(3).lexeme(), "L");
}

#[test]
fn one_argument_texture_samples_at_surface_coordinates() {
    let (tree, _) = parse_ok("surface t() { Ci = texture(\"wood\"); }");
    let shader = shader_of(&tree);
    let texture = shader.node(1).node(0).node(0);
    assert_eq!(texture.kind(), NodeKind::Texture);
    assert_eq!(texture.nodes().len(), 3);
    assert_eq!(texture.node(1).lexeme(), "s");
    assert_eq!(texture.node(2).lexeme(), "t");
}

#[test]
fn explicit_texture_coordinates_are_untouched() {
    let (tree, _) = parse_ok("surface t() { Ci = texture(\"wood\", s, t); }");
    let shader = shader_of(&tree);
    let texture = shader.node(1).node(0).node(0);
    assert_eq!(texture.nodes().len(), 3);
}

#[test]
fn indexed_assignment_reports_unimplemented() {
    let (tree, _, policy) = parse_with("surface t() { Ci[0] = 1; }");
    assert!(tree.is_none());
    assert!(policy.contains(ErrorCode::Unimplemented));
}

#[test]
fn indexed_expressions_report_unimplemented() {
    let (tree, _, policy) = parse_with("surface t(float a = 1;) { float x = a[0]; }");
    assert!(tree.is_none());
    assert!(policy.contains(ErrorCode::Unimplemented));
}

#[test]
fn ternary_has_three_distinct_children() {
    let (tree, _) = parse_ok("surface t(float a = 1;) { float x = a > 0 ? 1 : 2; }");
    let shader = shader_of(&tree);
    let ternary = shader.node(1).node(0).node(0).node(0);
    assert_eq!(ternary.kind(), NodeKind::Ternary);
    assert_eq!(ternary.nodes().len(), 3);
    assert_eq!(ternary.node(0).kind(), NodeKind::Greater);
    assert_eq!(ternary.node(1).lexeme(), "1");
    assert_eq!(ternary.node(2).lexeme(), "2");
}

#[test]
fn dot_binds_tighter_than_multiply() {
    let (tree, _) = parse_ok("surface t() { Ci = Cs * N.I; }");
    let shader = shader_of(&tree);
    let multiply = shader.node(1).node(0).node(0);
    assert_eq!(multiply.kind(), NodeKind::Multiply);
    assert_eq!(multiply.node(1).kind(), NodeKind::Dot);
}

#[test]
fn cross_sits_between_dot_and_multiply() {
    let (tree, _) = parse_ok("surface t() { Ci = Cs * (N ^ I); }");
    let shader = shader_of(&tree);
    let multiply = shader.node(1).node(0).node(0);
    assert_eq!(multiply.node(1).kind(), NodeKind::Cross);
}

#[test]
fn break_level_is_kept_as_a_child() {
    let (tree, _) = parse_ok(
        "surface t() { float i = 0; while (i < 2) { while (i < 2) { break 2; } } }",
    );
    let shader = shader_of(&tree);
    let outer = shader.node(1).node(1);
    assert_eq!(outer.kind(), NodeKind::While);
    let inner = outer.node(1).node(0);
    let break_statement = inner.node(1).node(0);
    assert_eq!(break_statement.kind(), NodeKind::Break);
    assert_eq!(break_statement.node(0).integer(), 2);
}

#[test]
fn sixteentuple_builds_a_matrix_literal() {
    let (tree, _) = parse_ok(
        "surface t() { matrix m = matrix (1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1); }",
    );
    let shader = shader_of(&tree);
    let typecast = shader.node(1).node(0).node(0).node(0);
    assert_eq!(typecast.kind(), NodeKind::Typecast);
    assert_eq!(typecast.node(1).kind(), NodeKind::Sixteentuple);
    assert_eq!(typecast.node(1).nodes().len(), 16);
}

#[test]
fn function_definitions_register_their_symbol() {
    let (tree, table) = parse_ok(
        "float half(float x;) { return x / 2; }\nsurface t() { Ci = Cs; }",
    );
    let function = &tree.nodes()[0];
    assert_eq!(function.kind(), NodeKind::Function);
    let id = function.symbol().unwrap();
    assert_eq!(table.symbol(id).kind, SymbolKind::Function);
    assert_eq!(table.symbol(id).ty, ValueType::Float);
}

#[test]
fn print_then_reparse_is_structurally_equal() {
    let source = "surface speckle(float gain = 0.5; color tint = (1, 0.5, 0.25);)\n\
                  {\n\
                  float x = 0;\n\
                  for (x = 0; x < 3; x += 1) {\n\
                  if (s > 0.5) { Ci += tint * gain; }\n\
                  else { Ci += tint * noise(s, t); }\n\
                  }\n\
                  illuminance(P, N, PI / 2) { Ci += Cl * (normalize(L) . N); }\n\
                  Oi = 1;\n\
                  }";
    let (tree, table) = parse_ok(source);
    let printed = SourceFormatter::format(&table, &tree);
    let (reparsed, _) = parse_ok(&printed);
    assert_eq!(tree, reparsed, "printed form was:\n{}", printed);
}

#[test]
fn light_round_trip_re_synthesizes_the_ambient_head() {
    let source = "light glow(color tint = 1;) { Cl = tint; Ol = (1, 1, 1); }";
    let (tree, table) = parse_ok(source);
    let printed = SourceFormatter::format(&table, &tree);
    let (reparsed, _) = parse_ok(&printed);
    assert_eq!(tree, reparsed, "printed form was:\n{}", printed);
}
