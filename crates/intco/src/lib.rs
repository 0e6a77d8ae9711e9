use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    error::Error,
    fmt::{Display, Formatter},
    fs::File,
    io::{BufReader, Read, Write},
    path::Path,
    sync::LazyLock,
};

pub mod bmat;
pub mod disp;
pub mod geom;
pub mod options;
pub mod parse;
pub mod siic;
pub mod syic;

use disp::{Converter, Disp};
use geom::Geom;
use log::warn;
use nalgebra as na;
use options::InputOptions;
use siic::Siic;
use syic::Syic;

/// bohr radius in Ångstroms
pub const ANGBOHR: f64 = 0.529_177_249;

pub type Vec3 = na::Vector3<f64>;
pub type Mat3 = na::Matrix3<f64>;
pub type DMat = na::DMatrix<f64>;
pub type DVec = na::DVector<f64>;

#[derive(Debug, PartialEq, Clone)]
pub enum IntcoError {
    Io(String, std::io::ErrorKind),
    /// malformed input. `line` is 1-based
    ParseError { line: usize, msg: String },
    UnsupportedCoordinateKind(String),
    /// a symmetry internal `coord` (1-based) refers to an invalid simple
    /// internal `term`. a displacement of a nonexistent coordinate reports a
    /// term of 0
    InvalidSymmetryReference { coord: usize, term: isize },
    DegenerateGeometry(String),
    ConvergenceError { iterations: usize, residual: f64 },
}

impl Display for IntcoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IntcoError::Io(msg, _) => write!(f, "{msg}"),
            IntcoError::ParseError { line, msg } => {
                write!(f, "parse error on line {line}: {msg}")
            }
            IntcoError::UnsupportedCoordinateKind(k) => {
                write!(f, "unsupported coordinate type '{k}'")
            }
            IntcoError::InvalidSymmetryReference { coord, term: 0 } => {
                write!(f, "no symmetry internal coordinate {coord}")
            }
            IntcoError::InvalidSymmetryReference { coord, term } => write!(
                f,
                "symmetry internal coordinate {coord} has invalid term {term}"
            ),
            IntcoError::DegenerateGeometry(msg) => {
                write!(f, "degenerate geometry: {msg}")
            }
            IntcoError::ConvergenceError {
                iterations,
                residual,
            } => write!(
                f,
                "failed to converge after {iterations} iterations, \
                 max internal deviation = {residual:.4e}"
            ),
        }
    }
}

impl Error for IntcoError {}

impl From<std::io::Error> for IntcoError {
    fn from(e: std::io::Error) -> Self {
        IntcoError::Io(e.to_string(), e.kind())
    }
}

/// Numerical parameters that are not part of the input file
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// maximum number of Newton steps per displacement
    pub max_iter: usize,
    /// singular values below `svd_tol` times the largest are treated as zero
    pub svd_tol: f64,
    /// finite difference step in bohr for checking the B matrix
    pub fd_step: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_iter: 20,
            svd_tol: 1e-10,
            fd_step: 1e-5,
        }
    }
}

static DEFAULT_WEIGHTS: LazyLock<HashMap<&'static str, usize>> =
    LazyLock::new(|| {
        HashMap::from([
            ("X", 0),
            ("H", 1),
            ("He", 4),
            ("Li", 7),
            ("Be", 9),
            ("B", 11),
            ("C", 12),
            ("N", 14),
            ("O", 16),
            ("F", 19),
            ("Ne", 20),
            ("Na", 23),
            ("Mg", 24),
            ("Al", 27),
            ("Si", 28),
            ("P", 31),
            ("S", 32),
            ("Cl", 35),
            ("Ar", 40),
        ])
    });

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Atom {
    pub label: String,
    pub weight: usize,
}

impl Atom {
    pub fn new(label: impl Into<String>, weight: usize) -> Self {
        Self {
            label: label.into(),
            weight,
        }
    }

    /// look up the integer mass of `label`, ignoring case after the first
    /// letter
    pub fn from_label(label: &str) -> Option<Self> {
        let mut chars = label.chars();
        let first = chars.next()?.to_ascii_uppercase();
        let norm: String = std::iter::once(first)
            .chain(chars.map(|c| c.to_ascii_lowercase()))
            .collect();
        DEFAULT_WEIGHTS
            .get(norm.as_str())
            .map(|&w| Self::new(norm, w))
    }
}

/// A complete input: options, coordinate definitions, the reference geometry,
/// and the displacements to convert
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Intco {
    pub options: InputOptions,
    pub simple_internals: Vec<Siic>,
    /// empty when displacements are given directly in simple internals
    pub symmetry_internals: Vec<Syic>,
    /// cartesian geometry in bohr
    pub geom: Geom,
    /// atom labels and weights, empty if the geometry was unlabeled
    pub atoms: Vec<Atom>,
    pub disps: Vec<Disp>,
    #[serde(default)]
    pub settings: Settings,
}

impl Display for Intco {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "# INTDER ###############")?;
        for op in self.options.to_array() {
            write!(f, "{op:5}")?;
        }
        writeln!(f)?;
        for siic in &self.simple_internals {
            writeln!(f, "{}", siic.to_line())?;
        }
        for (i, syic) in self.symmetry_internals.iter().enumerate() {
            writeln!(f, "{}", syic.to_line(i))?;
        }
        writeln!(f, "{:5}", 0)?;
        if self.atoms.len() == self.geom.len() && !self.atoms.is_empty() {
            for (atom, p) in self.atoms.iter().zip(&self.geom) {
                writeln!(
                    f,
                    "{:<2}{:20.10}{:20.10}{:20.10}",
                    atom.label, p[0], p[1], p[2]
                )?;
            }
        } else {
            write!(f, "{}", self.geom)?;
        }
        if !self.disps.is_empty() {
            writeln!(f, "DISP{:4}", self.disps.len())?;
            for disp in &self.disps {
                for (i, d) in disp.iter() {
                    if *d != 0.0 {
                        writeln!(f, "{:5}{:20.10}", i + 1, d)?;
                    }
                }
                writeln!(f, "{:5}", 0)?;
            }
        }
        Ok(())
    }
}

impl Intco {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_file(infile: impl AsRef<Path>) -> Result<Self, IntcoError> {
        let path = infile.as_ref();
        let f = File::open(path).map_err(|e| {
            IntcoError::Io(
                format!("failed to open '{}': {e}", path.display()),
                e.kind(),
            )
        })?;
        Self::load(f)
    }

    pub fn load<R: Read>(r: R) -> Result<Self, IntcoError> {
        parse::parse(BufReader::new(r))
    }

    /// return the number of coordinates displacements are given in
    pub fn nsym(&self) -> usize {
        if self.symmetry_internals.is_empty() {
            self.simple_internals.len()
        } else {
            self.symmetry_internals.len()
        }
    }

    /// return the number of cartesian coordinates
    pub fn ncart(&self) -> usize {
        3 * self.geom.len()
    }

    /// return the number of dummy atoms
    pub fn ndum(&self) -> usize {
        self.options.dummies
    }

    /// simple internal values in Ångstroms or radians, stopping at the first
    /// coordinate that cannot be evaluated
    pub fn simple_values(&self, geom: &Geom) -> Result<Vec<f64>, IntcoError> {
        self.simple_internals.iter().map(|s| s.value(geom)).collect()
    }

    /// like [Intco::simple_values], but evaluate every coordinate
    /// independently
    pub fn simple_values_each(
        &self,
        geom: &Geom,
    ) -> Vec<Result<f64, IntcoError>> {
        self.simple_internals.iter().map(|s| s.value(geom)).collect()
    }

    /// symmetry internal values, or the simple internal values if there are
    /// no symmetry internals
    pub fn symmetry_values(
        &self,
        geom: &Geom,
    ) -> Result<Vec<f64>, IntcoError> {
        let sics = self.simple_values(geom)?;
        if self.symmetry_internals.is_empty() {
            return Ok(sics);
        }
        syic::evaluate(&self.symmetry_internals, &sics)
    }

    pub fn u_mat(&self) -> DMat {
        syic::u_mat(&self.symmetry_internals, self.simple_internals.len())
    }

    pub fn b_matrix(&self, geom: &Geom) -> Result<DMat, IntcoError> {
        bmat::b_matrix(&self.simple_internals, geom)
    }

    pub fn sym_b_matrix(&self, geom: &Geom) -> Result<DMat, IntcoError> {
        Ok(bmat::sym_b_matrix(&self.u_mat(), &self.b_matrix(geom)?))
    }

    /// the generalized inverse of the symmetry B matrix at `geom`
    pub fn a_matrix(&self, geom: &Geom) -> Result<DMat, IntcoError> {
        bmat::a_matrix(&self.sym_b_matrix(geom)?, self.settings.svd_tol)
    }

    /// compare the analytic B matrix at the reference geometry to finite
    /// differences and return the largest absolute deviation
    pub fn check_b_matrix(&self) -> Result<f64, IntcoError> {
        let b = self.b_matrix(&self.geom)?;
        let n = bmat::numerical_b_matrix(
            &self.simple_internals,
            &self.geom,
            self.settings.fd_step,
        )?;
        Ok((b - n).amax())
    }

    pub fn converter(&self) -> Result<Converter<'_>, IntcoError> {
        Converter::new(
            &self.simple_internals,
            &self.symmetry_internals,
            &self.geom,
            self.options.threshold(),
            &self.settings,
        )
    }

    /// convert the displacements in `self.disps` from (symmetry) internal
    /// coordinates to Cartesian coordinates, returning one result per
    /// displacement in the same order
    pub fn convert_disps(&self) -> Vec<Result<DVec, IntcoError>> {
        match self.converter() {
            Ok(c) => c.convert_all(&self.disps),
            Err(e) => vec![Err(e); self.disps.len()],
        }
    }

    /// like [Intco::convert_disps] but fail if any displacement fails
    pub fn try_convert_disps(&self) -> Result<Vec<DVec>, IntcoError> {
        self.convert_disps().into_iter().collect()
    }

    pub fn print_cart<W: Write>(
        w: &mut W,
        cart: &DVec,
    ) -> std::io::Result<()> {
        for c in cart.as_slice().chunks(3) {
            for x in c {
                write!(w, "{x:20.10}")?;
            }
            writeln!(w)?;
        }
        Ok(())
    }

    /// write the values of the coordinates at the reference geometry to `w`.
    /// a simple internal that fails to evaluate is reported in place
    pub fn write_report<W: Write>(&self, w: &mut W) -> Result<(), IntcoError> {
        writeln!(w, "NUCLEAR CARTESIAN COORDINATES (BOHR)\n")?;
        write!(w, "{}", self.geom)?;
        writeln!(w)?;
        writeln!(
            w,
            "VALUES OF SIMPLE INTERNAL COORDINATES (ANG. or DEG.) FOR \
             REFERENCE GEOMETRY\n"
        )?;
        let vals = self.simple_values_each(&self.geom);
        for (i, (siic, v)) in self.simple_internals.iter().zip(&vals).enumerate()
        {
            let label = siic.to_string();
            match v {
                Ok(v) => {
                    let v = if siic.is_angle() { v.to_degrees() } else { *v };
                    writeln!(w, "{:5} {label:<20}{v:18.10}", i + 1)?
                }
                Err(e) => {
                    warn!("{label}: {e}");
                    writeln!(w, "{:5} {label:<20} FAILED: {e}", i + 1)?
                }
            }
        }
        writeln!(w)?;
        if vals.iter().any(Result::is_err) {
            return Ok(());
        }
        writeln!(
            w,
            "VALUES OF SYMMETRY INTERNAL COORDINATES (ANG. or RAD.) FOR \
             REFERENCE GEOMETRY\n"
        )?;
        for (i, v) in self.symmetry_values(&self.geom)?.iter().enumerate() {
            writeln!(w, "{:5}{v:18.10}", i + 1)?;
        }
        writeln!(w)?;
        if !self.symmetry_internals.is_empty() {
            writeln!(w, "SYMMETRY INTERNAL COORDINATES\n")?;
            for (i, s) in self.symmetry_internals.iter().enumerate() {
                let name = format!("S{}", i + 1);
                writeln!(
                    w,
                    "{name:<4}= {}",
                    s.describe(&self.simple_internals)
                )?;
            }
            writeln!(w)?;
        }
        if self.options.print >= 2 {
            let b = self.sym_b_matrix(&self.geom)?;
            writeln!(w, "B MATRIX FOR (SYMMETRY) INTERNAL COORDINATES")?;
            writeln!(w, "{b:.8}")?;
            let a = bmat::a_matrix(&b, self.settings.svd_tol)?;
            writeln!(w, "A MATRIX FOR (SYMMETRY) INTERNAL COORDINATES")?;
            writeln!(w, "{a:.8}")?;
        }
        Ok(())
    }
}
