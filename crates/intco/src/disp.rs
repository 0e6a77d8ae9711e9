//! Displacement requests and their conversion from symmetry internal
//! coordinates to Cartesian coordinates

use std::collections::BTreeMap;

use log::{debug, trace};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    ANGBOHR, DMat, DVec, IntcoError, Settings,
    bmat::{a_matrix, b_matrix, sym_b_matrix},
    geom::Geom,
    siic::Siic,
    syic::{Syic, u_mat},
};

/// A sparse displacement in symmetry internal coordinates, mapping 0-based
/// coordinate indices to offsets. Missing coordinates are not displaced
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Disp(pub BTreeMap<usize, f64>);

impl Disp {
    pub fn new() -> Self {
        Self::default()
    }

    /// set the offset for coordinate `i` to `val`, replacing any earlier
    /// offset. a zero offset removes the entry
    pub fn set(&mut self, i: usize, val: f64) {
        if val == 0.0 {
            self.0.remove(&i);
        } else {
            self.0.insert(i, val);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&usize, &f64)> {
        self.0.iter()
    }

    /// expand into a dense vector of length `n`. an offset for a coordinate
    /// past the end is an error
    pub fn to_dense(&self, n: usize) -> Result<DVec, IntcoError> {
        let mut ret = DVec::zeros(n);
        for (&i, &v) in &self.0 {
            if i >= n {
                return Err(IntcoError::InvalidSymmetryReference {
                    coord: i + 1,
                    term: 0,
                });
            }
            ret[i] = v;
        }
        Ok(ret)
    }
}

impl<const N: usize> From<[(usize, f64); N]> for Disp {
    fn from(value: [(usize, f64); N]) -> Self {
        let mut ret = Self::new();
        for (i, v) in value {
            ret.set(i, v);
        }
        ret
    }
}

/// Newton iterate for a single displacement
struct Iterate {
    cart: DVec,
    iter: usize,
    resid: f64,
}

/// Everything needed to convert displacements around one reference geometry.
/// The reference values are computed once and shared by every conversion
pub struct Converter<'a> {
    siics: &'a [Siic],
    u: DMat,
    cart0: DVec,
    q0: DVec,
    threshold: f64,
    max_iter: usize,
    svd_tol: f64,
}

impl<'a> Converter<'a> {
    pub fn new(
        siics: &'a [Siic],
        syics: &[Syic],
        geom: &Geom,
        threshold: f64,
        settings: &Settings,
    ) -> Result<Self, IntcoError> {
        for (i, s) in syics.iter().enumerate() {
            s.validate(i, siics.len())?;
        }
        let mut ret = Self {
            siics,
            u: u_mat(syics, siics.len()),
            cart0: DVec::from(geom),
            q0: DVec::zeros(0),
            threshold,
            max_iter: settings.max_iter,
            svd_tol: settings.svd_tol,
        };
        ret.q0 = ret.values(geom)?;
        Ok(ret)
    }

    /// values of the (symmetry) internal coordinates at `geom`
    pub fn values(&self, geom: &Geom) -> Result<DVec, IntcoError> {
        let sics = self
            .siics
            .iter()
            .map(|s| s.value(geom))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(&self.u * DVec::from(sics))
    }

    /// the reference values of the (symmetry) internal coordinates
    pub fn reference(&self) -> &DVec {
        &self.q0
    }

    /// convert a single displacement to a Cartesian geometry in bohr
    pub fn convert(&self, disp: &Disp) -> Result<DVec, IntcoError> {
        let target = &self.q0 + disp.to_dense(self.q0.len())?;
        let mut it = Iterate {
            cart: self.cart0.clone(),
            iter: 0,
            resid: f64::INFINITY,
        };
        loop {
            let geom = Geom::from(&it.cart);
            let diff = &target - self.values(&geom)?;
            it.resid = diff.amax();
            debug!(
                "iter={:5} max internal deviation = {:.4e}",
                it.iter, it.resid
            );
            if it.resid < self.threshold {
                trace!("new cartesian geometry (bohr)\n{geom}");
                return Ok(it.cart);
            }
            if it.iter >= self.max_iter {
                return Err(IntcoError::ConvergenceError {
                    iterations: it.iter,
                    residual: it.resid,
                });
            }
            let b = sym_b_matrix(&self.u, &b_matrix(self.siics, &geom)?);
            let a = a_matrix(&b, self.svd_tol)?;
            it.cart += a * diff / ANGBOHR;
            it.iter += 1;
        }
    }

    /// convert every displacement in `disps` in parallel, preserving their
    /// order. a failure in one displacement does not affect the others
    pub fn convert_all(&self, disps: &[Disp]) -> Vec<Result<DVec, IntcoError>> {
        disps
            .par_iter()
            .enumerate()
            .map(|(i, disp)| {
                let res = self.convert(disp);
                if let Err(e) = &res {
                    debug!("displacement {} failed: {e}", i + 1);
                }
                res
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn water() -> (Vec<Siic>, Vec<Syic>, Geom) {
        (
            vec![
                Siic::Stretch(0, 1),
                Siic::Stretch(1, 2),
                Siic::Bend(0, 1, 2),
            ],
            vec![Syic(vec![1, 2]), Syic(vec![3]), Syic(vec![1, -2])],
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
            ]),
        )
    }

    #[test]
    fn dense() {
        let d = Disp::from([(0, -0.005), (2, 0.01), (0, -0.005)]);
        assert_eq!(d.to_dense(3).unwrap().as_slice(), &[-0.01, 0.0, 0.01]);
        assert_eq!(
            d.to_dense(2),
            Err(IntcoError::InvalidSymmetryReference { coord: 3, term: 0 })
        );
    }

    #[test]
    fn reference_values() {
        let (siics, syics, geom) = water();
        let settings = Settings::default();
        let c =
            Converter::new(&siics, &syics, &geom, 1e-14, &settings).unwrap();
        let want = [1.3556853532, 1.8221415519, 0.0];
        for (got, want) in c.reference().iter().zip(want) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-9);
        }
    }

    #[test]
    fn converge() {
        let (siics, syics, geom) = water();
        let settings = Settings::default();
        let c =
            Converter::new(&siics, &syics, &geom, 1e-14, &settings).unwrap();
        let got = c
            .convert(&Disp::from([(0, -0.005), (1, -0.005), (2, -0.01)]))
            .unwrap();
        let want = [
            0.0,
            1.4186597974,
            0.9822041564,
            0.0,
            0.0094006500,
            -0.1238566934,
            0.0,
            -1.4280604475,
            0.9894964520,
        ];
        assert_abs_diff_eq!(got, DVec::from(want.to_vec()), epsilon = 1e-9);

        // nothing to do for an empty displacement
        assert_eq!(c.convert(&Disp::new()).unwrap(), DVec::from(&geom));
    }

    #[test]
    fn too_few_iterations() {
        let (siics, syics, geom) = water();
        let settings = Settings {
            max_iter: 0,
            ..Settings::default()
        };
        let c =
            Converter::new(&siics, &syics, &geom, 1e-14, &settings).unwrap();
        let disp = Disp::from([(0, -0.005), (1, -0.005), (2, -0.01)]);
        let got = c.convert(&disp);
        let Err(IntcoError::ConvergenceError {
            iterations,
            residual,
        }) = &got
        else {
            panic!("expected a convergence error, got {got:?}");
        };
        assert_eq!(*iterations, 0);
        assert_abs_diff_eq!(*residual, 0.01, epsilon = 1e-12);
        // the reference geometry needs no steps at all
        assert_eq!(c.convert(&Disp::new()).unwrap(), DVec::from(&geom));
    }
}
