//! CPU versions of the capture fragment programs.
//!
//! These follow the WGSL in `shaders/` line for line so that the software
//! backend produces the same tables as the GPU path, within half-float
//! precision.

use std::f32::consts::{FRAC_1_PI, PI};

use glam::{Vec2, Vec3};

/// Map a direction to equirectangular UV, `v = 1` at the zenith.
pub fn equirect_uv(dir: Vec3) -> Vec2 {
    let inv_atan = Vec2::new(0.5 * FRAC_1_PI, FRAC_1_PI);
    Vec2::new(dir.z.atan2(dir.x), dir.y.clamp(-1.0, 1.0).asin()) * inv_atan + 0.5
}

/// Cosine-weighted hemisphere integral of the environment around `normal`.
///
/// Samples are taken on a regular `(phi, theta)` grid with spacing
/// `sample_delta`, weighted by `cos(theta) * sin(theta)`, and normalized by the
/// total weight. A uniform environment therefore returns its radiance exactly.
pub fn irradiance<F>(normal: Vec3, sample_delta: f32, sample_env: F) -> Vec3
where
    F: Fn(Vec3) -> Vec3,
{
    let mut up = if normal.y.abs() < 0.999 {
        Vec3::Y
    } else {
        Vec3::Z
    };
    let right = up.cross(normal).normalize();
    up = normal.cross(right).normalize();

    let phi_steps = (2.0 * PI / sample_delta).ceil() as u32;
    let theta_steps = (0.5 * PI / sample_delta).ceil() as u32;

    let mut irradiance = Vec3::ZERO;
    let mut total_weight = 0.0;
    for i in 0..phi_steps {
        let phi = i as f32 * sample_delta;
        for j in 0..theta_steps {
            let theta = j as f32 * sample_delta;
            let tangent_sample = Vec3::new(
                theta.sin() * phi.cos(),
                theta.sin() * phi.sin(),
                theta.cos(),
            );
            let sample_vec =
                tangent_sample.x * right + tangent_sample.y * up + tangent_sample.z * normal;
            let weight = theta.cos() * theta.sin();
            irradiance += sample_env(sample_vec) * weight;
            total_weight += weight;
        }
    }

    irradiance / total_weight.max(1e-6)
}

/// GGX pre-filtered radiance around `normal` (N = V = R).
///
/// `sample_env(dir, lod)` must fetch the environment at an explicit mip LOD;
/// `resolution` is the environment's face size used for the LOD estimate.
pub fn prefilter<F>(
    normal: Vec3,
    roughness: f32,
    sample_count: u32,
    resolution: f32,
    sample_env: F,
) -> Vec3
where
    F: Fn(Vec3, f32) -> Vec3,
{
    let n = normal;
    let v = n;
    let sa_texel = 4.0 * PI / (6.0 * resolution * resolution);

    let mut prefiltered = Vec3::ZERO;
    let mut total_weight = 0.0;
    for i in 0..sample_count {
        let xi = hammersley(i, sample_count);
        let h = importance_sample_ggx(xi, n, roughness);
        let l = (2.0 * v.dot(h) * h - v).normalize();

        let n_dot_l = n.dot(l).max(0.0);
        if n_dot_l > 0.0 {
            let mip_level = if roughness > 0.0 {
                let n_dot_h = n.dot(h).max(0.0);
                let h_dot_v = h.dot(v).max(0.0);
                let d = distribution_ggx(n_dot_h, roughness);
                let pdf = d * n_dot_h / (4.0 * h_dot_v) + 0.0001;
                let sa_sample = 1.0 / (sample_count as f32 * pdf + 0.0001);
                (0.5 * (sa_sample / sa_texel).log2()).max(0.0)
            } else {
                0.0
            };
            prefiltered += sample_env(l, mip_level) * n_dot_l;
            total_weight += n_dot_l;
        }
    }

    prefiltered / total_weight.max(1e-6)
}

/// Split-sum BRDF integration: returns `(scale, bias)` applied to F0.
pub fn integrate_brdf(n_dot_v: f32, roughness: f32, sample_count: u32) -> Vec2 {
    let n_dot_v = n_dot_v.max(1e-4);
    let v = Vec3::new((1.0 - n_dot_v * n_dot_v).sqrt(), 0.0, n_dot_v);
    let n = Vec3::Z;

    let mut scale = 0.0;
    let mut bias = 0.0;
    for i in 0..sample_count {
        let xi = hammersley(i, sample_count);
        let h = importance_sample_ggx(xi, n, roughness);
        let l = (2.0 * v.dot(h) * h - v).normalize();

        let n_dot_l = l.z.max(0.0);
        let n_dot_h = h.z.max(0.0);
        let v_dot_h = v.dot(h).max(0.0);
        if n_dot_l > 0.0 {
            let g = geometry_smith(n_dot_v, n_dot_l, roughness);
            let g_vis = (g * v_dot_h) / (n_dot_h * n_dot_v).max(1e-7);
            let fc = (1.0 - v_dot_h).powi(5);
            scale += (1.0 - fc) * g_vis;
            bias += fc * g_vis;
        }
    }

    let inv = 1.0 / sample_count.max(1) as f32;
    (Vec2::new(scale, bias) * inv).clamp(Vec2::ZERO, Vec2::ONE)
}

/// Hammersley point `i` of `n`.
pub fn hammersley(i: u32, n: u32) -> Vec2 {
    Vec2::new(i as f32 / n as f32, radical_inverse_vdc(i))
}

/// Van der Corput radical inverse in base 2.
pub fn radical_inverse_vdc(bits: u32) -> f32 {
    bits.reverse_bits() as f32 * 2.328_306_4e-10
}

/// Half vector around `n` drawn from the GGX distribution.
pub fn importance_sample_ggx(xi: Vec2, n: Vec3, roughness: f32) -> Vec3 {
    let a = roughness * roughness;

    let phi = 2.0 * PI * xi.x;
    let cos_theta = ((1.0 - xi.y) / (1.0 + (a * a - 1.0) * xi.y)).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let h = Vec3::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta);

    let up = if n.z.abs() < 0.999 { Vec3::Z } else { Vec3::X };
    let tangent = up.cross(n).normalize();
    let bitangent = n.cross(tangent);

    (tangent * h.x + bitangent * h.y + n * h.z).normalize()
}

/// Trowbridge-Reitz GGX normal distribution.
pub fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let denom = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    a2 / (PI * denom * denom).max(1e-7)
}

fn geometry_schlick_ggx(n_dot_v: f32, roughness: f32) -> f32 {
    let k = (roughness * roughness) / 2.0;
    n_dot_v / (n_dot_v * (1.0 - k) + k)
}

fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness)
}
