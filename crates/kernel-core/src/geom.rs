//! Integer grid geometry: positions, distances, quarter-turn rotation.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Vec3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Vec3 {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn from_array(raw: [i32; 3]) -> Self {
        Self::new(raw[0], raw[1], raw[2])
    }

    pub fn to_array(self) -> [i32; 3] {
        [self.x, self.y, self.z]
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn manhattan(self, other: Vec3) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs() + (self.z - other.z).abs()
    }

    /// Manhattan distance in the XZ plane.
    pub fn dist_xz(self, other: Vec3) -> i32 {
        (self.x - other.x).abs() + (self.z - other.z).abs()
    }

    /// Max-norm distance in the XZ plane.
    pub fn chebyshev_xz(self, other: Vec3) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }

    pub fn dist2_xz(self, other: Vec3) -> i64 {
        let dx = i64::from(self.x - other.x);
        let dz = i64::from(self.z - other.z);
        dx * dx + dz * dz
    }

    /// The four XZ neighbours in canonical order `+X, -X, +Z, -Z`.
    pub fn neighbours_xz(self) -> [Vec3; 4] {
        [
            self.offset(1, 0, 0),
            self.offset(-1, 0, 0),
            self.offset(0, 0, 1),
            self.offset(0, 0, -1),
        ]
    }

    /// The six face neighbours, XZ first.
    pub fn neighbours6(self) -> [Vec3; 6] {
        [
            self.offset(1, 0, 0),
            self.offset(-1, 0, 0),
            self.offset(0, 0, 1),
            self.offset(0, 0, -1),
            self.offset(0, 1, 0),
            self.offset(0, -1, 0),
        ]
    }

    /// Parses `x,y,z`.
    pub fn parse(raw: &str) -> Option<Vec3> {
        let mut parts = raw.split(',').map(|part| part.trim().parse::<i32>());
        let x = parts.next()?.ok()?;
        let y = parts.next()?.ok()?;
        let z = parts.next()?.ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Vec3::new(x, y, z))
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// Accepts quarter turns (`0..=3`, any sign) or degrees in multiples of 90.
pub fn normalize_rotation(raw: i32) -> i32 {
    let quarter = if raw.abs() >= 90 && raw % 90 == 0 {
        raw / 90
    } else {
        raw
    };
    quarter.rem_euclid(4)
}

/// Rotates clockwise around Y by `rotation` quarter turns.
pub fn rotate_xz(x: i32, z: i32, rotation: i32) -> (i32, i32) {
    match normalize_rotation(rotation) {
        1 => (z, -x),
        2 => (-x, -z),
        3 => (-z, x),
        _ => (x, z),
    }
}

pub fn rotate_offset(offset: Vec3, rotation: i32) -> Vec3 {
    let (x, z) = rotate_xz(offset.x, offset.z, rotation);
    Vec3::new(x, offset.y, z)
}

/// Axis-aligned inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_corners(a: Vec3, b: Vec3) -> Self {
        Self {
            min: Vec3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Vec3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    pub fn contains(&self, pos: Vec3) -> bool {
        pos.x >= self.min.x
            && pos.x <= self.max.x
            && pos.y >= self.min.y
            && pos.y <= self.max.y
            && pos.z >= self.min.z
            && pos.z <= self.max.z
    }

    /// Parses `x1,y1,z1:x2,y2,z2`.
    pub fn parse(raw: &str) -> Option<Aabb> {
        let (a, b) = raw.split_once(':')?;
        Some(Aabb::from_corners(Vec3::parse(a)?, Vec3::parse(b)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rotation_matches_clockwise_table() {
        assert_eq!(rotate_xz(1, 2, 0), (1, 2));
        assert_eq!(rotate_xz(1, 2, 1), (2, -1));
        assert_eq!(rotate_xz(1, 2, 2), (-1, -2));
        assert_eq!(rotate_xz(1, 2, 3), (-2, 1));
    }

    #[test]
    fn rotation_accepts_degrees_and_negative_turns() {
        assert_eq!(normalize_rotation(90), 1);
        assert_eq!(normalize_rotation(180), 2);
        assert_eq!(normalize_rotation(270), 3);
        assert_eq!(normalize_rotation(360), 0);
        assert_eq!(normalize_rotation(-1), 3);
        assert_eq!(normalize_rotation(-90), 3);
        assert_eq!(normalize_rotation(5), 1);
    }

    #[test]
    fn aabb_parses_unordered_corners() {
        let aabb = Aabb::parse("5,0,5:-2,0,1").expect("parse");
        assert_eq!(aabb.min, Vec3::new(-2, 0, 1));
        assert!(aabb.contains(Vec3::new(0, 0, 3)));
        assert!(!aabb.contains(Vec3::new(6, 0, 3)));
        assert!(Aabb::parse("1,2:3,4,5").is_none());
    }

    proptest! {
        #[test]
        fn rotation_inverse_restores_point(x in -1000i32..1000, z in -1000i32..1000, r in 0i32..4) {
            let (rx, rz) = rotate_xz(x, z, r);
            prop_assert_eq!(rotate_xz(rx, rz, 4 - r), (x, z));
        }
    }
}
