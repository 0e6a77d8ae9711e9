use crate::{ANGBOHR, DVec, Vec3};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, ops::Index};

/// Cartesian geometry in bohr, one position per atom including dummy atoms
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Geom(pub Vec<Vec3>);

impl Geom {
    pub fn new() -> Self {
        Geom(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, it: Vec3) {
        self.0.push(it)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Vec3> {
        self.0.iter()
    }

    /// vector from atom i to atom j in angstroms
    pub fn vec(&self, i: usize, j: usize) -> Vec3 {
        ANGBOHR * (self[j] - self[i])
    }

    /// return the unit vector from atom i to atom j
    pub fn unit(&self, i: usize, j: usize) -> Vec3 {
        let diff = self[j] - self[i];
        diff / diff.norm()
    }

    /// distance between atoms i and j in angstroms, assuming `self` in bohr
    pub fn dist(&self, i: usize, j: usize) -> f64 {
        ANGBOHR * (self[j] - self[i]).norm()
    }

    /// angle in radians between atoms i, j, and k, where j is the central atom
    pub fn angle(&self, i: usize, j: usize, k: usize) -> f64 {
        let e_ji = self.unit(j, i);
        let e_jk = self.unit(j, k);
        e_ji.dot(&e_jk).clamp(-1.0, 1.0).acos()
    }

    /// mass-weighted center of `atoms` in bohr
    pub fn center(&self, atoms: &[usize], masses: &[f64]) -> Vec3 {
        let total: f64 = masses.iter().sum();
        atoms
            .iter()
            .zip(masses)
            .fold(Vec3::zeros(), |acc, (a, m)| acc + *m * self[*a])
            / total
    }

    /// a copy of `self` with every position rotated by `rot` and then shifted
    /// by `shift`
    pub fn transformed(&self, rot: &crate::Mat3, shift: &Vec3) -> Self {
        Self(self.0.iter().map(|p| rot * p + shift).collect())
    }
}

impl From<&DVec> for Geom {
    fn from(dvec: &DVec) -> Self {
        Self(
            dvec.as_slice()
                .chunks(3)
                .map(Vec3::from_row_slice)
                .collect(),
        )
    }
}

impl From<&Geom> for DVec {
    fn from(val: &Geom) -> Self {
        DVec::from_iterator(
            3 * val.len(),
            val.iter().flat_map(|c| c.iter().copied()),
        )
    }
}

impl From<Vec<f64>> for Geom {
    /// group a flat slice of coordinates into atoms. a trailing partial triple
    /// is dropped
    fn from(v: Vec<f64>) -> Self {
        Self(
            v.chunks_exact(3)
                .map(Vec3::from_row_slice)
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Geom {
    type Item = &'a Vec3;

    type IntoIter = std::slice::Iter<'a, Vec3>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Index<usize> for Geom {
    type Output = Vec3;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl Display for Geom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for atom in &self.0 {
            writeln!(f, "{:20.10}{:20.10}{:20.10}", atom[0], atom[1], atom[2])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn water() -> Geom {
        Geom::from(vec![
            0.000000000,
            1.431390207,
            0.986041184,
            0.000000000,
            0.000000000,
            -0.124238453,
            0.000000000,
            -1.431390207,
            0.986041184,
        ])
    }

    #[test]
    fn dist_and_angle() {
        let geom = water();
        assert_abs_diff_eq!(geom.dist(0, 1), 0.9586143064, epsilon = 1e-10);
        assert_abs_diff_eq!(geom.dist(0, 1), geom.dist(1, 0));
        assert_abs_diff_eq!(
            geom.angle(0, 1, 2).to_degrees(),
            104.4010205969,
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(geom.unit(0, 1).norm(), 1.0, epsilon = 1e-15);
    }

    #[test]
    fn dvec_conversions() {
        let geom = water();
        let v = DVec::from(&geom);
        assert_eq!(v.len(), 9);
        assert_eq!(v[4], 0.0);
        assert_eq!(v[5], -0.124238453);
        assert_eq!(Geom::from(&v), geom);
    }

    #[test]
    fn center_of_mass() {
        let geom = water();
        let got = geom.center(&[0, 1, 2], &[1.0, 16.0, 1.0]);
        assert_abs_diff_eq!(got[1], 0.0, epsilon = 1e-15);
        let want = (2.0 * 0.986041184 - 16.0 * 0.124238453) / 18.0;
        assert_abs_diff_eq!(got[2], want, epsilon = 1e-15);
    }
}
