//! SIMD-style kernels over sample buffers. Each operation has four
//! specializations selected by the dispatch code: scalar, broadcast left,
//! broadcast right, and elementwise. Kernels always write their full
//! result length; masking happens at the store step.

use crate::instruction::Dispatch;
use glam::Vec3;

pub fn binary_float(
    dispatch: Dispatch,
    result: &mut [f32],
    lhs: &[f32],
    rhs: &[f32],
    op: impl Fn(f32, f32) -> f32,
) {
    match dispatch {
        Dispatch::U1U1 => result[0] = op(lhs[0], rhs[0]),
        Dispatch::U1V1 => {
            for (r, b) in result.iter_mut().zip(rhs) {
                *r = op(lhs[0], *b);
            }
        }
        Dispatch::V1U1 => {
            for (r, a) in result.iter_mut().zip(lhs) {
                *r = op(*a, rhs[0]);
            }
        }
        Dispatch::V1V1 => {
            for ((r, a), b) in result.iter_mut().zip(lhs).zip(rhs) {
                *r = op(*a, *b);
            }
        }
        _ => unreachable!("float kernel dispatched as {:?}", dispatch),
    }
}

pub fn binary_vec3(
    dispatch: Dispatch,
    result: &mut [Vec3],
    lhs: &[Vec3],
    rhs: &[Vec3],
    op: impl Fn(Vec3, Vec3) -> Vec3,
) {
    match dispatch {
        Dispatch::U3U3 => result[0] = op(lhs[0], rhs[0]),
        Dispatch::U3V3 => {
            for (r, b) in result.iter_mut().zip(rhs) {
                *r = op(lhs[0], *b);
            }
        }
        Dispatch::V3U3 => {
            for (r, a) in result.iter_mut().zip(lhs) {
                *r = op(*a, rhs[0]);
            }
        }
        Dispatch::V3V3 => {
            for ((r, a), b) in result.iter_mut().zip(lhs).zip(rhs) {
                *r = op(*a, *b);
            }
        }
        _ => unreachable!("vec3 kernel dispatched as {:?}", dispatch),
    }
}

/// Vec3 × vec3 operations that narrow to a float, such as the dot product
/// and aggregate comparisons.
pub fn binary_vec3_to_float(
    dispatch: Dispatch,
    result: &mut [f32],
    lhs: &[Vec3],
    rhs: &[Vec3],
    op: impl Fn(Vec3, Vec3) -> f32,
) {
    match dispatch {
        Dispatch::U3U3 => result[0] = op(lhs[0], rhs[0]),
        Dispatch::U3V3 => {
            for (r, b) in result.iter_mut().zip(rhs) {
                *r = op(lhs[0], *b);
            }
        }
        Dispatch::V3U3 => {
            for (r, a) in result.iter_mut().zip(lhs) {
                *r = op(*a, rhs[0]);
            }
        }
        Dispatch::V3V3 => {
            for ((r, a), b) in result.iter_mut().zip(lhs).zip(rhs) {
                *r = op(*a, *b);
            }
        }
        _ => unreachable!("vec3 comparison dispatched as {:?}", dispatch),
    }
}

pub fn unary_float(
    dispatch: Dispatch,
    result: &mut [f32],
    source: &[f32],
    op: impl Fn(f32) -> f32,
) {
    match dispatch {
        Dispatch::U1 => result[0] = op(source[0]),
        Dispatch::V1 => {
            for (r, s) in result.iter_mut().zip(source) {
                *r = op(*s);
            }
        }
        _ => unreachable!("unary float kernel dispatched as {:?}", dispatch),
    }
}

pub fn unary_vec3(
    dispatch: Dispatch,
    result: &mut [Vec3],
    source: &[Vec3],
    op: impl Fn(Vec3) -> Vec3,
) {
    match dispatch {
        Dispatch::U3 => result[0] = op(source[0]),
        Dispatch::V3 => {
            for (r, s) in result.iter_mut().zip(source) {
                *r = op(*s);
            }
        }
        _ => unreachable!("unary vec3 kernel dispatched as {:?}", dispatch),
    }
}

/// Broadcast a float into the components of a wider element, as the
/// float-to-color and friends conversions do.
pub fn unary_float_to_vec3(dispatch: Dispatch, result: &mut [Vec3], source: &[f32]) {
    match dispatch {
        Dispatch::U1 => result[0] = Vec3::splat(source[0]),
        Dispatch::V1 => {
            for (r, s) in result.iter_mut().zip(source) {
                *r = Vec3::splat(*s);
            }
        }
        _ => unreachable!("float conversion dispatched as {:?}", dispatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greater_specializations() {
        let op = |a: f32, b: f32| if a > b { 1.0 } else { 0.0 };

        let mut result = [0.0];
        binary_float(Dispatch::U1U1, &mut result, &[2.0], &[1.0], op);
        assert_eq!(result, [1.0]);

        let mut result = [0.0; 3];
        binary_float(Dispatch::U1V1, &mut result, &[2.0], &[1.0, 2.0, 3.0], op);
        assert_eq!(result, [1.0, 0.0, 0.0]);

        let mut result = [0.0; 3];
        binary_float(Dispatch::V1U1, &mut result, &[1.0, 2.0, 3.0], &[2.0], op);
        assert_eq!(result, [0.0, 0.0, 1.0]);

        let mut result = [0.0; 3];
        binary_float(
            Dispatch::V1V1,
            &mut result,
            &[1.0, 5.0, 3.0],
            &[2.0, 2.0, 3.0],
            op,
        );
        assert_eq!(result, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn broadcast_left_vec3() {
        let mut result = [Vec3::ZERO; 2];
        binary_vec3(
            Dispatch::U3V3,
            &mut result,
            &[Vec3::ONE],
            &[Vec3::splat(2.0), Vec3::splat(3.0)],
            |a, b| a + b,
        );
        assert_eq!(result, [Vec3::splat(3.0), Vec3::splat(4.0)]);
    }

    #[test]
    fn dot_narrows_to_float() {
        let mut result = [0.0; 2];
        binary_vec3_to_float(
            Dispatch::V3V3,
            &mut result,
            &[Vec3::X, Vec3::Y],
            &[Vec3::X, Vec3::X],
            |a, b| a.dot(b),
        );
        assert_eq!(result, [1.0, 0.0]);
    }

    #[test]
    fn float_to_vec3_broadcasts_components() {
        let mut result = [Vec3::ZERO; 2];
        unary_float_to_vec3(Dispatch::V1, &mut result, &[1.0, 2.0]);
        assert_eq!(result, [Vec3::ONE, Vec3::splat(2.0)]);
    }
}
