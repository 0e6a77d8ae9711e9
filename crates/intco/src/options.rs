//! The fixed-length vector of integer input options at the top of an input
//! file

use serde::{Deserialize, Serialize};

/// number of integers on the options line
pub const NOPTIONS: usize = 17;

/// convergence threshold exponent used when the input leaves it at zero
pub const DEFAULT_THRESH: usize = 14;

/// Typed view of the options line. The fields appear in the order they are
/// written in the input
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct InputOptions {
    /// number of real atoms
    pub atoms: usize,
    /// number of simple internal coordinates
    pub simple: usize,
    /// number of symmetry internal coordinates
    pub symmetry: usize,
    /// highest derivative order to transform
    pub deriv_level: usize,
    /// nonzero if the reference geometry is a stationary point
    pub stationary: usize,
    pub print: usize,
    /// direction of the coordinate transformation
    pub transform: usize,
    /// number of dummy atoms, listed after the real atoms
    pub dummies: usize,
    /// nonzero to check the analytic B matrix against finite differences
    pub numeric_test: usize,
    pub geom_source: usize,
    pub freq_coords: usize,
    pub ir_intensities: usize,
    pub property_dim: usize,
    /// nonzero to stop after forming the B and A matrices
    pub stop: usize,
    /// nonzero when the input carries displacements to convert
    pub disp_coords: usize,
    pub mode_assign: usize,
    /// the displacement threshold is 10^-thresh
    pub thresh: usize,
}

impl InputOptions {
    /// build the options from the values on the options line, padding any
    /// missing trailing values with zeros. returns None if there are too many
    pub fn from_slice(vals: &[usize]) -> Option<Self> {
        if vals.len() > NOPTIONS {
            return None;
        }
        let mut v = [0; NOPTIONS];
        v[..vals.len()].copy_from_slice(vals);
        let [
            atoms,
            simple,
            symmetry,
            deriv_level,
            stationary,
            print,
            transform,
            dummies,
            numeric_test,
            geom_source,
            freq_coords,
            ir_intensities,
            property_dim,
            stop,
            disp_coords,
            mode_assign,
            thresh,
        ] = v;
        Some(Self {
            atoms,
            simple,
            symmetry,
            deriv_level,
            stationary,
            print,
            transform,
            dummies,
            numeric_test,
            geom_source,
            freq_coords,
            ir_intensities,
            property_dim,
            stop,
            disp_coords,
            mode_assign,
            thresh,
        })
    }

    pub fn to_array(&self) -> [usize; NOPTIONS] {
        [
            self.atoms,
            self.simple,
            self.symmetry,
            self.deriv_level,
            self.stationary,
            self.print,
            self.transform,
            self.dummies,
            self.numeric_test,
            self.geom_source,
            self.freq_coords,
            self.ir_intensities,
            self.property_dim,
            self.stop,
            self.disp_coords,
            self.mode_assign,
            self.thresh,
        ]
    }

    /// total number of atoms expected in the Cartesian geometry
    pub fn total_atoms(&self) -> usize {
        self.atoms + self.dummies
    }

    pub fn has_dummies(&self) -> bool {
        self.dummies > 0
    }

    /// maximum allowed internal deviation when converting displacements
    pub fn threshold(&self) -> f64 {
        let exp = if self.thresh == 0 {
            DEFAULT_THRESH
        } else {
            self.thresh
        };
        10f64.powi(-(exp as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn water_options() {
        let got = InputOptions::from_slice(&[
            3, 3, 3, 0, 0, 3, 0, 0, 0, 1, 0, 0, 0, 1, 1, 0, 14,
        ])
        .unwrap();
        assert_eq!(got.atoms, 3);
        assert_eq!(got.symmetry, 3);
        assert_eq!(got.print, 3);
        assert_eq!(got.geom_source, 1);
        assert_eq!(got.stop, 1);
        assert_eq!(got.disp_coords, 1);
        assert_eq!(got.threshold(), 1e-14);
        assert_eq!(
            got.to_array(),
            [3, 3, 3, 0, 0, 3, 0, 0, 0, 1, 0, 0, 0, 1, 1, 0, 14]
        );
    }

    #[test]
    fn short_and_long() {
        let got = InputOptions::from_slice(&[4, 6, 6]).unwrap();
        assert_eq!(got.total_atoms(), 4);
        assert_eq!(got.thresh, 0);
        assert_eq!(got.threshold(), 1e-14);
        assert!(InputOptions::from_slice(&[0; 18]).is_none());
    }
}
