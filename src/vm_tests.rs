use crate::context::{Light, ShadingContext, TextureSampler};
use crate::error::{CollectingErrorPolicy, ErrorCode};
use crate::grid::Grid;
use crate::shader::Shader;
use crate::symbol::SymbolTable;
use crate::value::{Value, ValueStorage, ValueType};
use glam::{Mat4, Vec3, Vec4};

const TOLERANCE: f32 = 0.01;

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

fn shade(source: &str, grid: &mut Grid, context: &ShadingContext) -> CollectingErrorPolicy {
    let shader = compile(source);
    let policy = CollectingErrorPolicy::new();
    shader.shade(grid, context, &policy).expect("shade succeeds");
    policy
}

fn assert_all_close(value: &Value, expected: Vec3) {
    for (index, v) in value.vec3s().iter().enumerate() {
        assert!(
            (*v - expected).length() < TOLERANCE,
            "sample {} is {:?}, expected {:?}",
            index,
            v,
            expected
        );
    }
}

#[test]
fn constant_surface_fills_the_grid() {
    let mut grid = Grid::new(2, 2);
    shade(
        "surface test() { Ci = color(1, 0, 0); Oi = 1; }",
        &mut grid,
        &ShadingContext::new(),
    );

    let ci = grid.find_value("Ci").expect("Ci present");
    assert_eq!(ci.storage(), ValueStorage::Varying);
    assert_eq!(ci.size(), 4);
    assert_all_close(ci, Vec3::new(1.0, 0.0, 0.0));

    let oi = grid.find_value("Oi").expect("Oi present");
    assert_all_close(oi, Vec3::ONE);
}

#[test]
fn space_typecast_default_transforms_at_load() {
    let mut context = ShadingContext::new();
    context.add_coordinate_system("world", Mat4::from_translation(Vec3::new(0.0, 0.0, -1.0)));

    let mut grid = Grid::new(1, 1);
    grid.value("P", ValueType::Point).zero();
    grid.value("N", ValueType::Normal).zero();
    shade(
        "surface test(point o = point \"world\" (0, 0, 0);) { P = o; }",
        &mut grid,
        &context,
    );

    let p = grid.find_value("P").unwrap();
    assert_all_close(p, Vec3::new(0.0, 0.0, -1.0));
}

#[test]
fn unknown_coordinate_system_is_reported_and_left_untransformed() {
    let mut grid = Grid::new(1, 1);
    let policy = shade(
        "surface test(point o = point \"mars\" (1, 2, 3);) { P = o; }",
        &mut grid,
        &ShadingContext::new(),
    );
    assert!(policy.contains(ErrorCode::UnknownCoordinateSystem));
    assert_all_close(grid.find_value("P").unwrap(), Vec3::new(1.0, 2.0, 3.0));
}

#[test]
fn for_loop_accumulates_across_iterations() {
    let mut grid = Grid::new(2, 2);
    shade(
        "surface t() { float x = 0; for (x = 0; x < 3; x += 1) Ci += color(1, 0, 0) * 0.25; }",
        &mut grid,
        &ShadingContext::new(),
    );
    assert_all_close(grid.find_value("Ci").unwrap(), Vec3::new(0.75, 0.0, 0.0));
}

#[test]
fn if_else_splits_lanes_by_the_mask() {
    let mut grid = Grid::new(2, 1);
    grid.value("s", ValueType::Float)
        .floats_mut()
        .copy_from_slice(&[0.25, 0.75]);
    shade(
        "surface t() { if (s > 0.5) Ci = color(1, 0, 0); else Ci = color(0, 1, 0); }",
        &mut grid,
        &ShadingContext::new(),
    );
    let ci = grid.find_value("Ci").unwrap().vec3s();
    assert!((ci[0] - Vec3::new(0.0, 1.0, 0.0)).length() < TOLERANCE);
    assert!((ci[1] - Vec3::new(1.0, 0.0, 0.0)).length() < TOLERANCE);
}

#[test]
fn an_all_false_mask_skips_the_body() {
    let mut grid = Grid::new(2, 2);
    shade(
        "surface t() { Ci = color(0, 0, 1); if (0) Ci = color(1, 0, 0); }",
        &mut grid,
        &ShadingContext::new(),
    );
    assert_all_close(grid.find_value("Ci").unwrap(), Vec3::new(0.0, 0.0, 1.0));
}

#[test]
fn while_loop_lanes_retire_independently() {
    let mut grid = Grid::new(2, 1);
    grid.value("s", ValueType::Float)
        .floats_mut()
        .copy_from_slice(&[1.0, 3.0]);
    shade(
        "surface t() { float x = 0; while (x < s) { x += 1; Ci += color(0.25, 0, 0); } }",
        &mut grid,
        &ShadingContext::new(),
    );
    let ci = grid.find_value("Ci").unwrap().vec3s();
    assert!((ci[0].x - 0.25).abs() < TOLERANCE);
    assert!((ci[1].x - 0.75).abs() < TOLERANCE);
}

#[test]
fn break_level_two_exits_both_loops() {
    let mut grid = Grid::new(1, 1);
    shade(
        "surface t() {\n\
         float i = 0;\n\
         float j = 0;\n\
         for (i = 0; i < 3; i += 1) {\n\
         for (j = 0; j < 3; j += 1) {\n\
         Ci += color(0.1, 0, 0);\n\
         break 2;\n\
         }\n\
         }\n\
         }",
        &mut grid,
        &ShadingContext::new(),
    );
    assert!((grid.find_value("Ci").unwrap().vec3s()[0].x - 0.1).abs() < TOLERANCE);
}

#[test]
fn continue_skips_to_the_increment() {
    let mut grid = Grid::new(1, 1);
    shade(
        "surface t() {\n\
         float i = 0;\n\
         for (i = 0; i < 4; i += 1) {\n\
         if (i > 1) continue;\n\
         Ci += color(0.25, 0, 0);\n\
         }\n\
         }",
        &mut grid,
        &ShadingContext::new(),
    );
    // Iterations 0 and 1 accumulate; 2 and 3 skip past the body.
    assert!((grid.find_value("Ci").unwrap().vec3s()[0].x - 0.5).abs() < TOLERANCE);
}

#[test]
fn uniform_ternary_selects_one_branch() {
    let mut grid = Grid::new(2, 1);
    shade(
        "surface t(float gain = 2;) { Ci = gain > 1 ? color(0, 1, 0) : color(1, 0, 0); }",
        &mut grid,
        &ShadingContext::new(),
    );
    assert_all_close(grid.find_value("Ci").unwrap(), Vec3::new(0.0, 1.0, 0.0));
}

#[test]
fn varying_ternary_merges_through_the_mask() {
    let mut grid = Grid::new(2, 1);
    grid.value("s", ValueType::Float)
        .floats_mut()
        .copy_from_slice(&[0.0, 1.0]);
    shade(
        "surface t() { Ci = s > 0.5 ? color(0, 1, 0) : color(1, 0, 0); }",
        &mut grid,
        &ShadingContext::new(),
    );
    let ci = grid.find_value("Ci").unwrap().vec3s();
    assert!((ci[0] - Vec3::new(1.0, 0.0, 0.0)).length() < TOLERANCE);
    assert!((ci[1] - Vec3::new(0.0, 1.0, 0.0)).length() < TOLERANCE);
}

#[test]
fn solar_light_shader_emits_a_directional_light() {
    let shader = compile(
        "light sun(color lightcolor = (1, 0.5, 0.25);) {\n\
         solar((0, 0, 1), 0) { Cl = lightcolor; }\n\
         }",
    );
    let mut grid = Grid::new(2, 2);
    grid.value("P", ValueType::Point).zero();
    let policy = CollectingErrorPolicy::new();
    let lights = shader
        .light_shade(&mut grid, &ShadingContext::new(), &policy)
        .expect("light shade succeeds");

    assert_eq!(lights.len(), 1);
    let light = &lights[0];
    assert_eq!(light.kind, crate::context::LightKind::Solar);
    assert_eq!(light.direction, Some(Vec3::new(0.0, 0.0, 1.0)));
    assert_all_close(&light.color, Vec3::new(1.0, 0.5, 0.25));
    assert_all_close(&light.opacity, Vec3::ONE);
}

#[test]
fn illuminate_body_sees_the_direction_toward_the_light() {
    // The light sits at the origin; the surface sits two units down -Z, so
    // inside the body L is (0, 0, 2): from the sample toward the light.
    let shader = compile(
        "light spot(point from = (0, 0, 0);) {\n\
         illuminate(from) {\n\
         Cl = color(0, 0, 1) * (normalize(L) . vector (0, 0, 1));\n\
         Ol = (1, 1, 1);\n\
         }\n\
         }",
    );
    let mut grid = Grid::new(2, 2);
    grid.value("P", ValueType::Point)
        .vec3s_mut()
        .fill(Vec3::new(0.0, 0.0, -2.0));
    let policy = CollectingErrorPolicy::new();
    let lights = shader
        .light_shade(&mut grid, &ShadingContext::new(), &policy)
        .expect("light shade succeeds");

    assert_eq!(lights.len(), 1);
    let light = &lights[0];
    assert_eq!(light.kind, crate::context::LightKind::Illuminate);
    assert_eq!(light.position, Some(Vec3::ZERO));
    assert_all_close(&light.color, Vec3::new(0.0, 0.0, 1.0));
}

#[test]
fn ambient_light_shader_defaults_to_opaque() {
    let shader = compile("light amb() { Cl = color(0.2, 0.2, 0.2); }");
    let mut grid = Grid::new(1, 1);
    let policy = CollectingErrorPolicy::new();
    let lights = shader
        .light_shade(&mut grid, &ShadingContext::new(), &policy)
        .expect("light shade succeeds");
    assert_eq!(lights.len(), 1);
    assert_eq!(lights[0].kind, crate::context::LightKind::Ambient);
    assert_all_close(&lights[0].color, Vec3::splat(0.2));
    assert_all_close(&lights[0].opacity, Vec3::ONE);
}

#[test]
fn illuminance_integrates_a_directional_light() {
    let mut context = ShadingContext::new();
    context.add_light(Light::solar(
        Value::uniform_vec3(ValueType::Color, Vec3::new(1.0, 0.5, 0.25)),
        Value::uniform_vec3(ValueType::Color, Vec3::ONE),
        Vec3::new(0.0, 0.0, 1.0),
    ));

    let mut grid = Grid::new(2, 2);
    grid.value("P", ValueType::Point).zero();
    let normals = grid.value("N", ValueType::Normal);
    normals.vec3s_mut().fill(Vec3::new(0.0, 0.0, 1.0));

    shade(
        "surface t() { illuminance(P, N, PI / 2) { Ci += Cl * (normalize(L) . N); } }",
        &mut grid,
        &context,
    );
    assert_all_close(grid.find_value("Ci").unwrap(), Vec3::new(1.0, 0.5, 0.25));
}

#[test]
fn illuminance_skips_lights_outside_the_cone() {
    let mut context = ShadingContext::new();
    // Shines along -Z while the cone looks along +Z.
    context.add_light(Light::solar(
        Value::uniform_vec3(ValueType::Color, Vec3::ONE),
        Value::uniform_vec3(ValueType::Color, Vec3::ONE),
        Vec3::new(0.0, 0.0, -1.0),
    ));

    let mut grid = Grid::new(2, 2);
    grid.value("P", ValueType::Point).zero();
    grid.value("N", ValueType::Normal)
        .vec3s_mut()
        .fill(Vec3::new(0.0, 0.0, 1.0));

    shade(
        "surface t() { illuminance(P, N, PI / 4) { Ci += Cl; } }",
        &mut grid,
        &context,
    );
    assert_all_close(grid.find_value("Ci").unwrap(), Vec3::ZERO);
}

#[test]
fn illuminance_ignores_ambient_lights() {
    let mut context = ShadingContext::new();
    context.add_light(Light::ambient(
        Value::uniform_vec3(ValueType::Color, Vec3::ONE),
        Value::uniform_vec3(ValueType::Color, Vec3::ONE),
    ));

    let mut grid = Grid::new(1, 1);
    grid.value("P", ValueType::Point).zero();
    grid.value("N", ValueType::Normal)
        .vec3s_mut()
        .fill(Vec3::Z);

    shade(
        "surface t() { illuminance(P, N, PI) { Ci += Cl; } }",
        &mut grid,
        &context,
    );
    assert_all_close(grid.find_value("Ci").unwrap(), Vec3::ZERO);
}

#[test]
fn ambient_builtin_sums_ambient_lights() {
    let mut context = ShadingContext::new();
    context.add_light(Light::ambient(
        Value::uniform_vec3(ValueType::Color, Vec3::splat(0.2)),
        Value::uniform_vec3(ValueType::Color, Vec3::ONE),
    ));
    context.add_light(Light::ambient(
        Value::uniform_vec3(ValueType::Color, Vec3::splat(0.1)),
        Value::uniform_vec3(ValueType::Color, Vec3::ONE),
    ));

    let mut grid = Grid::new(2, 2);
    shade("surface t() { Ci = ambient(); }", &mut grid, &context);
    assert_all_close(grid.find_value("Ci").unwrap(), Vec3::splat(0.3));
}

#[test]
fn transform_round_trips_through_a_named_space() {
    let mut context = ShadingContext::new();
    let world = Mat4::from_rotation_y(0.7) * Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
    context.add_coordinate_system("world", world);

    let mut grid = Grid::new(1, 1);
    grid.value("P", ValueType::Point)
        .vec3s_mut()
        .fill(Vec3::new(0.5, -0.25, 2.0));
    shade(
        "surface t() { P = transform(\"world\", \"current\", transform(\"current\", \"world\", P)); }",
        &mut grid,
        &context,
    );
    assert_all_close(grid.find_value("P").unwrap(), Vec3::new(0.5, -0.25, 2.0));
}

#[test]
fn transform_moves_points_into_the_named_space() {
    let mut context = ShadingContext::new();
    context.add_coordinate_system("world", Mat4::from_translation(Vec3::new(0.0, 0.0, 1.0)));

    let mut grid = Grid::new(1, 1);
    grid.value("P", ValueType::Point).zero();
    shade(
        "surface t() { P = transform(\"world\", P); }",
        &mut grid,
        &context,
    );
    // The camera origin expressed in world coordinates.
    assert_all_close(grid.find_value("P").unwrap(), Vec3::new(0.0, 0.0, -1.0));
}

#[test]
fn ctransform_round_trips_hsv_in_shader() {
    let mut grid = Grid::new(1, 1);
    shade(
        "surface t(color c = (0.3, 0.6, 0.9);) { Ci = ctransform(\"hsv\", ctransform(\"rgb_to_hsv\", c)); }",
        &mut grid,
        &ShadingContext::new(),
    );
    assert_all_close(grid.find_value("Ci").unwrap(), Vec3::new(0.3, 0.6, 0.9));
}

struct CheckerSampler;

impl TextureSampler for CheckerSampler {
    fn float_texture(&self, _name: &str, s: f32, t: f32) -> Option<f32> {
        Some(s + t)
    }
    fn vec3_texture(&self, _name: &str, s: f32, t: f32) -> Option<Vec3> {
        Some(Vec3::new(s, t, 0.0))
    }
    fn float_environment(&self, _name: &str, direction: Vec3) -> Option<f32> {
        Some(direction.z)
    }
    fn vec3_environment(&self, _name: &str, direction: Vec3) -> Option<Vec3> {
        Some(direction)
    }
    fn shadow(&self, _name: &str, _position: Vec3) -> Option<f32> {
        Some(0.5)
    }
}

#[test]
fn texture_lookup_reads_surface_coordinates() {
    let mut context = ShadingContext::new();
    context.set_texture_sampler(Box::new(CheckerSampler));

    let mut grid = Grid::new(2, 1);
    grid.value("s", ValueType::Float)
        .floats_mut()
        .copy_from_slice(&[0.25, 0.5]);
    grid.value("t", ValueType::Float)
        .floats_mut()
        .copy_from_slice(&[0.1, 0.2]);
    shade("surface t() { Ci = texture(\"map\"); }", &mut grid, &context);

    let ci = grid.find_value("Ci").unwrap().vec3s();
    assert!((ci[0] - Vec3::new(0.25, 0.1, 0.0)).length() < TOLERANCE);
    assert!((ci[1] - Vec3::new(0.5, 0.2, 0.0)).length() < TOLERANCE);
}

#[test]
fn environment_lookup_uses_the_direction() {
    let mut context = ShadingContext::new();
    context.set_texture_sampler(Box::new(CheckerSampler));

    let mut grid = Grid::new(1, 1);
    grid.value("I", ValueType::Vector)
        .vec3s_mut()
        .fill(Vec3::new(0.5, 0.0, 1.0));
    shade(
        "surface t() { Ci = environment(\"sky\", I); }",
        &mut grid,
        &context,
    );
    assert_all_close(grid.find_value("Ci").unwrap(), Vec3::new(0.5, 0.0, 1.0));
}

#[test]
fn missing_sampler_reports_and_defaults() {
    let mut grid = Grid::new(1, 1);
    let policy = shade(
        "surface t() { Ci = texture(\"map\"); }",
        &mut grid,
        &ShadingContext::new(),
    );
    assert!(policy.contains(ErrorCode::OpeningFileFailed));
    assert_all_close(grid.find_value("Ci").unwrap(), Vec3::ZERO);
}

#[test]
fn displacement_writes_back_position_and_normal() {
    let mut grid = Grid::new(1, 1);
    grid.value("P", ValueType::Point).zero();
    grid.value("N", ValueType::Normal).vec3s_mut().fill(Vec3::Z);
    shade(
        "displacement lift() { P = P + N * 0.5; }",
        &mut grid,
        &ShadingContext::new(),
    );
    assert_all_close(grid.find_value("P").unwrap(), Vec3::new(0.0, 0.0, 0.5));
}

#[test]
fn grid_primvars_override_parameter_defaults() {
    let mut grid = Grid::new(2, 2);
    grid.value("gain", ValueType::Float).floats_mut().fill(0.5);
    shade(
        "surface t(float gain = 1;) { Ci = color(1, 1, 1) * gain; }",
        &mut grid,
        &ShadingContext::new(),
    );
    assert_all_close(grid.find_value("Ci").unwrap(), Vec3::splat(0.5));
}

#[test]
fn host_set_parameters_override_defaults() {
    let mut shader = compile("surface t(float gain = 1;) { Ci = color(1, 1, 1) * gain; }");
    shader
        .parameter("gain", Value::uniform_float(0.25))
        .expect("parameter exists");
    let mut grid = Grid::new(1, 1);
    let policy = CollectingErrorPolicy::new();
    shader
        .shade(&mut grid, &ShadingContext::new(), &policy)
        .expect("shade succeeds");
    assert_all_close(grid.find_value("Ci").unwrap(), Vec3::splat(0.25));
}

#[test]
fn light_shaders_refuse_the_surface_entry_point() {
    let shader = compile("light amb() { Cl = color(1, 1, 1); }");
    let mut grid = Grid::new(1, 1);
    let policy = CollectingErrorPolicy::new();
    assert!(shader.shade(&mut grid, &ShadingContext::new(), &policy).is_err());
}

#[test]
fn setcomp_mutates_its_first_argument() {
    let mut grid = Grid::new(1, 1);
    shade(
        "surface t() { Ci = color(0.1, 0.2, 0.3); setcomp(Ci, 1, 0.9); }",
        &mut grid,
        &ShadingContext::new(),
    );
    assert_all_close(grid.find_value("Ci").unwrap(), Vec3::new(0.1, 0.9, 0.3));
}

#[test]
fn uniform_matrix_promotes_into_varying_storage() {
    let mut grid = Grid::new(2, 2);
    shade(
        "surface t(matrix m = matrix (1, 0, 0, 0,  0, 2, 0, 0,  0, 0, 3, 0,  0, 0, 0, 1);\n\
         output varying matrix v;) { v = m; }",
        &mut grid,
        &ShadingContext::new(),
    );

    let v = grid.find_value("v").expect("output parameter written back");
    assert_eq!(v.ty(), ValueType::Matrix);
    assert_eq!(v.storage(), ValueStorage::Varying);
    assert_eq!(v.size(), 4);
    let expected = Mat4::from_diagonal(Vec4::new(1.0, 2.0, 3.0, 1.0));
    for m in v.mat4s() {
        assert_eq!(*m, expected);
    }
}

#[test]
fn smoothstep_and_clamp_behave_at_the_edges() {
    let mut grid = Grid::new(1, 1);
    shade(
        "surface t() {\n\
         float a = smoothstep(0, 1, 0.5);\n\
         float b = clamp(2, 0, 1);\n\
         Ci = color(1, 0, 0) * a;\n\
         Oi = color(1, 1, 1) * b;\n\
         }",
        &mut grid,
        &ShadingContext::new(),
    );
    let ci = grid.find_value("Ci").unwrap().vec3s()[0];
    assert!((ci.x - 0.5).abs() < TOLERANCE);
    let oi = grid.find_value("Oi").unwrap().vec3s()[0];
    assert!((oi.x - 1.0).abs() < TOLERANCE);
}
