//! Vector, rotation and color arithmetic behind the field object methods.

pub type Vec3 = [f64; 3];
/// Quaternion as `[x, y, z, w]`.
pub type Quat = [f64; 4];

const EPSILON: f64 = 1e-9;

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn length(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Unit vector in the direction of `a`, or `a` unchanged when it has no length.
pub fn normalize(a: &[f64]) -> Vec<f64> {
    let len = length(a);
    if len < EPSILON {
        a.to_vec()
    } else {
        a.iter().map(|v| v / len).collect()
    }
}

/// Axis-angle `[x, y, z, angle]` to a unit quaternion.
pub fn quat_from_axis_angle(r: [f64; 4]) -> Quat {
    let axis = [r[0], r[1], r[2]];
    let len = length(&axis);
    if len < EPSILON {
        return [0.0, 0.0, 0.0, 1.0];
    }
    let half = r[3] / 2.0;
    let s = half.sin() / len;
    [axis[0] * s, axis[1] * s, axis[2] * s, half.cos()]
}

pub fn axis_angle_from_quat(q: Quat) -> [f64; 4] {
    let len = length(&q);
    let q = if len < EPSILON {
        [0.0, 0.0, 0.0, 1.0]
    } else {
        [q[0] / len, q[1] / len, q[2] / len, q[3] / len]
    };
    let w = q[3].clamp(-1.0, 1.0);
    let angle = 2.0 * w.acos();
    let s = (1.0 - w * w).sqrt();
    if s < EPSILON {
        [0.0, 0.0, 1.0, 0.0]
    } else {
        [q[0] / s, q[1] / s, q[2] / s, angle]
    }
}

/// Hamilton product `a * b`.
pub fn quat_mul(a: Quat, b: Quat) -> Quat {
    [
        a[3] * b[0] + a[0] * b[3] + a[1] * b[2] - a[2] * b[1],
        a[3] * b[1] - a[0] * b[2] + a[1] * b[3] + a[2] * b[0],
        a[3] * b[2] + a[0] * b[1] - a[1] * b[0] + a[2] * b[3],
        a[3] * b[3] - a[0] * b[0] - a[1] * b[1] - a[2] * b[2],
    ]
}

/// Compose two axis-angle rotations.
pub fn rotation_multiply(a: [f64; 4], b: [f64; 4]) -> [f64; 4] {
    axis_angle_from_quat(quat_mul(quat_from_axis_angle(a), quat_from_axis_angle(b)))
}

/// Rotate `v` by the axis-angle rotation `r`.
pub fn rotate_vector(r: [f64; 4], v: Vec3) -> Vec3 {
    let q = quat_from_axis_angle(r);
    let p = [v[0], v[1], v[2], 0.0];
    let conj = [-q[0], -q[1], -q[2], q[3]];
    let out = quat_mul(quat_mul(q, p), conj);
    [out[0], out[1], out[2]]
}

/// Spherical interpolation between two rotations, `t` in `[0, 1]`.
pub fn slerp(a: [f64; 4], b: [f64; 4], t: f64) -> [f64; 4] {
    let qa = quat_from_axis_angle(a);
    let mut qb = quat_from_axis_angle(b);
    let mut cos = dot(&qa, &qb);
    if cos < 0.0 {
        qb = [-qb[0], -qb[1], -qb[2], -qb[3]];
        cos = -cos;
    }
    let (sa, sb) = if 1.0 - cos > 1e-6 {
        let omega = cos.acos();
        let sin = omega.sin();
        (((1.0 - t) * omega).sin() / sin, (t * omega).sin() / sin)
    } else {
        (1.0 - t, t)
    };
    axis_angle_from_quat([
        sa * qa[0] + sb * qb[0],
        sa * qa[1] + sb * qb[1],
        sa * qa[2] + sb * qb[2],
        sa * qa[3] + sb * qb[3],
    ])
}

/// Rotation taking direction `from` onto direction `to`.
pub fn rotation_between(from: Vec3, to: Vec3) -> Option<[f64; 4]> {
    let (lf, lt) = (length(&from), length(&to));
    if lf < EPSILON || lt < EPSILON {
        return None;
    }
    let cos = (dot(&from, &to) / (lf * lt)).clamp(-1.0, 1.0);
    let axis = cross(from, to);
    let la = length(&axis);
    if la < EPSILON {
        if cos > 0.0 {
            return Some([0.0, 0.0, 1.0, 0.0]);
        }
        // Opposite directions: any perpendicular axis will do.
        let helper = if from[0].abs() < 0.9 {
            [1.0, 0.0, 0.0]
        } else {
            [0.0, 1.0, 0.0]
        };
        let perp = cross(from, helper);
        let lp = length(&perp);
        return Some([perp[0] / lp, perp[1] / lp, perp[2] / lp, std::f64::consts::PI]);
    }
    Some([axis[0] / la, axis[1] / la, axis[2] / la, cos.acos()])
}

/// HSV (hue in degrees, saturation and value in `[0, 1]`) to RGB.
pub fn hsv_to_rgb(h: f64, s: f64, v: f64) -> [f64; 3] {
    if s <= 0.0 {
        return [v, v, v];
    }
    let h = h.rem_euclid(360.0) / 60.0;
    let sector = h.floor();
    let f = h - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match sector as u32 {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}

pub fn rgb_to_hsv(r: f64, g: f64, b: f64) -> [f64; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let s = if max > 0.0 { delta / max } else { 0.0 };
    let h = if delta < EPSILON {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    [h, s, max]
}
