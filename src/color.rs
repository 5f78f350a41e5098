//! Color space conversions backing `ctransform` and the color typecast.

use glam::Vec3;

pub fn rgb_from_hsv(hsv: Vec3) -> Vec3 {
    let (h, s, v) = (hsv.x, hsv.y, hsv.z);
    if s <= 0.0 {
        return Vec3::splat(v);
    }
    let h = (h.rem_euclid(360.0)) / 60.0;
    let sector = h.floor();
    let f = h - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match sector as i32 {
        0 => Vec3::new(v, t, p),
        1 => Vec3::new(q, v, p),
        2 => Vec3::new(p, v, t),
        3 => Vec3::new(p, q, v),
        4 => Vec3::new(t, p, v),
        _ => Vec3::new(v, p, q),
    }
}

pub fn hsv_from_rgb(rgb: Vec3) -> Vec3 {
    let max = rgb.x.max(rgb.y).max(rgb.z);
    let min = rgb.x.min(rgb.y).min(rgb.z);
    let delta = max - min;
    let v = max;
    let s = if max > 0.0 { delta / max } else { 0.0 };
    if delta <= 0.0 {
        return Vec3::new(0.0, s, v);
    }
    let h = if max == rgb.x {
        (rgb.y - rgb.z) / delta
    } else if max == rgb.y {
        2.0 + (rgb.z - rgb.x) / delta
    } else {
        4.0 + (rgb.x - rgb.y) / delta
    };
    Vec3::new((h * 60.0).rem_euclid(360.0), s, v)
}

pub fn rgb_from_hsl(hsl: Vec3) -> Vec3 {
    let (h, s, l) = (hsl.x, hsl.y, hsl.z);
    if s <= 0.0 {
        return Vec3::splat(l);
    }
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let h = h.rem_euclid(360.0) / 60.0;
    let x = c * (1.0 - (h.rem_euclid(2.0) - 1.0).abs());
    let (r, g, b) = match h.floor() as i32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    Vec3::new(r + m, g + m, b + m)
}

pub fn hsl_from_rgb(rgb: Vec3) -> Vec3 {
    let max = rgb.x.max(rgb.y).max(rgb.z);
    let min = rgb.x.min(rgb.y).min(rgb.z);
    let delta = max - min;
    let l = (max + min) / 2.0;
    if delta <= 0.0 {
        return Vec3::new(0.0, 0.0, l);
    }
    let s = delta / (1.0 - (2.0 * l - 1.0).abs());
    let h = if max == rgb.x {
        (rgb.y - rgb.z) / delta
    } else if max == rgb.y {
        2.0 + (rgb.z - rgb.x) / delta
    } else {
        4.0 + (rgb.x - rgb.y) / delta
    };
    Vec3::new((h * 60.0).rem_euclid(360.0), s, l)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn hsv_round_trip() {
        for rgb in [
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.2, 0.8, 0.4),
            Vec3::new(0.5, 0.5, 0.5),
            Vec3::new(0.9, 0.1, 0.7),
        ] {
            assert!(close(rgb_from_hsv(hsv_from_rgb(rgb)), rgb), "{:?}", rgb);
        }
    }

    #[test]
    fn hsl_round_trip() {
        for rgb in [
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.3, 0.6, 0.9),
            Vec3::new(1.0, 1.0, 0.0),
        ] {
            assert!(close(rgb_from_hsl(hsl_from_rgb(rgb)), rgb), "{:?}", rgb);
        }
    }

    #[test]
    fn pure_red_is_hue_zero() {
        let hsv = hsv_from_rgb(Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(hsv, Vec3::new(0.0, 1.0, 1.0));
    }
}
