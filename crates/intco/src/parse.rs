//! Line-oriented reader for the input format. Sections appear in a fixed
//! order: a header line, the options line, simple internals, symmetry
//! internals closed by a `0` line, the Cartesian geometry, and an optional
//! `DISP` block of displacements, each closed by a `0` line.

use std::io::BufRead;
use std::sync::LazyLock;

use log::{debug, warn};
use regex::Regex;

use crate::{
    Atom, IntcoError, Intco, Vec3,
    disp::Disp,
    options::InputOptions,
    siic::{self, Fragment, Siic},
    syic::Syic,
};

static ZERO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*0\s*$").unwrap());
static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bINTDER\b").unwrap());
static DISP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*DISP\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekHeader,
    ReadConfig,
    ReadSic,
    ReadSyc,
    ReadCartesian,
    ReadDisplacement,
}

struct Parser {
    state: State,
    /// current 1-based line number
    line: usize,
    options: Vec<usize>,
    options_line: usize,
    siics: Vec<Siic>,
    /// line each simple internal was read from, for later errors
    siic_lines: Vec<usize>,
    syics: Vec<Syic>,
    geom: Vec<Vec3>,
    atoms: Vec<Atom>,
    disps: Vec<Disp>,
    pending: Disp,
}

fn parse_num<T: std::str::FromStr>(
    tok: &str,
    line: usize,
    what: &str,
) -> Result<T, IntcoError> {
    tok.parse().map_err(|_| IntcoError::ParseError {
        line,
        msg: format!("expected {what}, found '{tok}'"),
    })
}

impl Parser {
    fn new() -> Self {
        Self {
            state: State::SeekHeader,
            line: 0,
            options: Vec::new(),
            options_line: 0,
            siics: Vec::new(),
            siic_lines: Vec::new(),
            syics: Vec::new(),
            geom: Vec::new(),
            atoms: Vec::new(),
            disps: Vec::new(),
            pending: Disp::new(),
        }
    }

    fn error(&self, msg: impl Into<String>) -> IntcoError {
        IntcoError::ParseError {
            line: self.line,
            msg: msg.into(),
        }
    }

    fn int(&self, tok: &str) -> Result<usize, IntcoError> {
        parse_num(tok, self.line, "an integer")
    }

    fn float(&self, tok: &str) -> Result<f64, IntcoError> {
        parse_num(tok, self.line, "a number")
    }

    /// a 1-based index, returned 0-based
    fn index(&self, tok: &str) -> Result<usize, IntcoError> {
        match self.int(tok)? {
            0 => Err(self.error("indices start at 1")),
            i => Ok(i - 1),
        }
    }

    fn feed(&mut self, line: &str) -> Result<(), IntcoError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            return Ok(());
        }
        match self.state {
            State::SeekHeader => {
                if HEADER.is_match(line) {
                    self.state = State::ReadConfig;
                }
            }
            State::ReadConfig => {
                self.options = fields
                    .iter()
                    .map(|f| self.int(f))
                    .collect::<Result<_, _>>()?;
                self.options_line = self.line;
                self.state = State::ReadSic;
            }
            State::ReadSic => {
                if siic::is_keyword(fields[0]) {
                    let s = self.simple_internal(&fields)?;
                    self.siics.push(s);
                    self.siic_lines.push(self.line);
                } else {
                    self.state = State::ReadSyc;
                    return self.feed(line);
                }
            }
            State::ReadSyc => {
                if ZERO.is_match(line) {
                    self.state = State::ReadCartesian;
                } else {
                    let s = self.symmetry_internal(&fields)?;
                    self.syics.push(s);
                }
            }
            State::ReadCartesian => {
                if DISP.is_match(line) {
                    self.state = State::ReadDisplacement;
                } else {
                    self.cartesian(&fields)?;
                }
            }
            State::ReadDisplacement => {
                if ZERO.is_match(line) {
                    let d = std::mem::take(&mut self.pending);
                    self.disps.push(d);
                } else {
                    let [i, v] = fields[..] else {
                        return Err(self.error(
                            "displacement lines need a coordinate and a value",
                        ));
                    };
                    let (i, v) = (self.index(i)?, self.float(v)?);
                    self.pending.set(i, v);
                }
            }
        }
        Ok(())
    }

    fn simple_internal(&self, fields: &[&str]) -> Result<Siic, IntcoError> {
        let keyword = fields[0];
        let rest = &fields[1..];
        let Some(kind) = siic::lookup(keyword) else {
            let atoms = rest
                .iter()
                .map(|f| self.index(f))
                .collect::<Result<_, _>>()?;
            return Ok(Siic::Unsupported(keyword.to_owned(), atoms));
        };
        if rest.len() < kind.natoms || rest.len() > kind.natoms + kind.nreal {
            return Err(self.error(format!(
                "{keyword} takes {} atoms, found {} fields",
                kind.natoms,
                rest.len()
            )));
        }
        let atoms: Vec<usize> = rest[..kind.natoms]
            .iter()
            .map(|f| self.index(f))
            .collect::<Result<_, _>>()?;
        let reals: Vec<f64> = rest[kind.natoms..]
            .iter()
            .map(|f| self.float(f))
            .collect::<Result<_, _>>()?;
        Ok(kind.build(&atoms, &reals))
    }

    /// the first field is the coordinate's own index, followed by pairs of
    /// simple internal index and coefficient. only the sign of the coefficient
    /// is kept
    fn symmetry_internal(&self, fields: &[&str]) -> Result<Syic, IntcoError> {
        let n = self.int(fields[0])?;
        if n != self.syics.len() + 1 {
            warn!(
                "symmetry internal {} labeled {n} on line {}",
                self.syics.len() + 1,
                self.line
            );
        }
        let pairs = &fields[1..];
        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return Err(self.error(
                "symmetry internals need pairs of coordinate and coefficient",
            ));
        }
        let mut terms = Vec::with_capacity(pairs.len() / 2);
        for pair in pairs.chunks_exact(2) {
            let i = isize::try_from(self.int(pair[0])?).map_err(|_| {
                self.error("simple internal index out of range")
            })?;
            let c = self.float(pair[1])?;
            if c != 0.0 {
                terms.push(i * c.signum() as isize);
            }
        }
        Ok(Syic(terms))
    }

    /// a row of three coordinates, optionally preceded by an atom label
    fn cartesian(&mut self, fields: &[&str]) -> Result<(), IntcoError> {
        let mut fields = fields;
        if fields[0].starts_with(|c: char| c.is_ascii_alphabetic()) {
            let Some(atom) = Atom::from_label(fields[0]) else {
                return Err(
                    self.error(format!("unknown atom label '{}'", fields[0]))
                );
            };
            self.atoms.push(atom);
            fields = &fields[1..];
        }
        let [x, y, z] = fields[..] else {
            return Err(self.error(format!(
                "expected 3 coordinates, found {}",
                fields.len()
            )));
        };
        let p = Vec3::new(self.float(x)?, self.float(y)?, self.float(z)?);
        self.geom.push(p);
        Ok(())
    }

    fn finish(self) -> Result<Intco, IntcoError> {
        let eof = |msg: &str| IntcoError::ParseError {
            line: self.line,
            msg: msg.to_owned(),
        };
        match self.state {
            State::SeekHeader => return Err(eof("missing INTDER header")),
            State::ReadConfig | State::ReadSic | State::ReadSyc => {
                return Err(eof("end of input before the Cartesian geometry"));
            }
            State::ReadDisplacement if !self.pending.is_empty() => {
                return Err(eof("displacement not terminated by 0"));
            }
            _ => {}
        }

        let Some(options) = InputOptions::from_slice(&self.options) else {
            return Err(IntcoError::ParseError {
                line: self.options_line,
                msg: format!(
                    "expected at most {} options, found {}",
                    crate::options::NOPTIONS,
                    self.options.len()
                ),
            });
        };
        if options.simple != self.siics.len() {
            warn!(
                "expected {} simple internals, found {}",
                options.simple,
                self.siics.len()
            );
        }
        if options.symmetry != self.syics.len() {
            warn!(
                "expected {} symmetry internals, found {}",
                options.symmetry,
                self.syics.len()
            );
        }
        let natom = self.geom.len();
        if natom != options.total_atoms() {
            return Err(eof(&format!(
                "expected {} atoms, found {natom}",
                options.total_atoms()
            )));
        }
        if !self.atoms.is_empty() && self.atoms.len() != natom {
            return Err(eof("either every atom or no atom must be labeled"));
        }

        let mut intco = Intco {
            options,
            geom: crate::geom::Geom(self.geom),
            atoms: self.atoms,
            symmetry_internals: self.syics,
            disps: self.disps,
            ..Intco::default()
        };
        for (mut s, line) in self.siics.into_iter().zip(self.siic_lines) {
            let err = |msg: String| IntcoError::ParseError { line, msg };
            if let Some(a) = s.atoms().iter().find(|&&a| a >= natom) {
                return Err(err(format!(
                    "atom {} out of range for {natom} atoms",
                    a + 1
                )));
            }
            match &mut s {
                Siic::Spf(a, b, r0) if *r0 == 0.0 => {
                    *r0 = intco.geom.dist(*a, *b);
                }
                Siic::Rcom(f, g) => {
                    for frag in [f, g] {
                        if frag.first > frag.last {
                            return Err(err(format!(
                                "empty fragment {}..{}",
                                frag.first + 1,
                                frag.last + 1
                            )));
                        }
                        if !intco.atoms.is_empty() {
                            *frag = Fragment {
                                first: frag.first,
                                last: frag.last,
                                masses: intco.atoms[frag.first..=frag.last]
                                    .iter()
                                    .map(|a| a.weight as f64)
                                    .collect(),
                            };
                        }
                        if frag.mass() == 0.0 {
                            return Err(err("fragment has no mass".to_owned()));
                        }
                    }
                }
                _ => {}
            }
            intco.simple_internals.push(s);
        }
        debug!(
            "read {} simple internals, {} symmetry internals, {} atoms, \
             {} displacements",
            intco.simple_internals.len(),
            intco.symmetry_internals.len(),
            natom,
            intco.disps.len()
        );
        Ok(intco)
    }
}

/// build an [Intco] from the lines of `r`
pub fn parse<R: BufRead>(r: R) -> Result<Intco, IntcoError> {
    let mut p = Parser::new();
    for line in r.lines() {
        let line = line?;
        p.line += 1;
        p.feed(&line)?;
    }
    p.finish()
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    const WATER: &str = "# INTDER ###############
    3    3    3    0    0    3    0    0    0    1    0    0    0    1    1    0   14
 STRE    1    2
 STRE    2    3
 BEND    1    2    3
    1   1   1.000000000   2   1.000000000
    2   3   1.000000000
    3   1   1.000000000   2  -1.000000000
    0
      0.000000000        1.431390207        0.986041184
      0.000000000        0.000000000       -0.124238453
      0.000000000       -1.431390207        0.986041184
DISP    2
    1     -0.0050000000
    2     -0.0050000000
    3     -0.0100000000
    0
    0
";

    fn load(s: &str) -> Result<Intco, IntcoError> {
        parse(s.as_bytes())
    }

    #[test]
    fn water() {
        let got = load(WATER).unwrap();
        assert_eq!(got.options.thresh, 14);
        assert_eq!(
            got.simple_internals,
            vec![
                Siic::Stretch(0, 1),
                Siic::Stretch(1, 2),
                Siic::Bend(0, 1, 2)
            ]
        );
        assert_eq!(
            got.symmetry_internals,
            vec![Syic(vec![1, 2]), Syic(vec![3]), Syic(vec![1, -2])]
        );
        assert_eq!(got.geom.len(), 3);
        assert_eq!(got.geom[1][2], -0.124238453);
        assert!(got.atoms.is_empty());
        assert_eq!(
            got.disps,
            vec![Disp::from([(0, -0.005), (1, -0.005), (2, -0.01)]), Disp::new()]
        );
    }

    #[test]
    fn first_syc_line_kept() {
        // a single symmetry internal directly after the simple internals
        let input = "# INTDER
    2    1    1
 STRE    1    2
    1   1   -1.0
    0
 0.0 0.0 0.0
 0.0 0.0 1.4
";
        let got = load(input).unwrap();
        assert_eq!(got.symmetry_internals, vec![Syic(vec![-1])]);
        assert_eq!(got.options.threshold(), 1e-14);
        assert!(got.disps.is_empty());
    }

    #[test]
    fn labels_and_extra_kinds() {
        let input = "# INTDER
    4    4    0
 STRE    1    2
  SPF    1    2
  SPF    3    4   0.75
 RCOM    1    2    3    4
 LIN2    1    2    3    4
    0
H   0.0 0.0 0.0
O   0.0 0.0 1.8
C   0.0 3.0 1.0
H   0.0 3.0 3.0
";
        let got = load(input).unwrap();
        assert_eq!(got.atoms[1], Atom::new("O", 16));
        assert!(got.symmetry_internals.is_empty());
        let r = got.geom.dist(0, 1);
        assert_eq!(got.simple_internals[1], Siic::Spf(0, 1, r));
        assert_eq!(got.simple_internals[2], Siic::Spf(2, 3, 0.75));
        assert_eq!(
            got.simple_internals[3],
            Siic::Rcom(
                Fragment {
                    first: 0,
                    last: 1,
                    masses: vec![1.0, 16.0]
                },
                Fragment {
                    first: 2,
                    last: 3,
                    masses: vec![12.0, 1.0]
                },
            )
        );
        assert_eq!(
            got.simple_internals[4],
            Siic::Unsupported("LIN2".to_owned(), vec![0, 1, 2, 3])
        );
    }

    #[test]
    fn repeated_disp_index() {
        let input = "# INTDER
    2    1    0    0    0    0    0    0    0    0    0    0    0    0    1
 STRE    1    2
    0
 0.0 0.0 0.0
 0.0 0.0 1.4
DISP    3
    1   0.1
    1   0.2
    0
    1   0.1
    1   0.0
    0
    1   0.3
    1  -0.1
    0
";
        let got = load(input).unwrap();
        assert_eq!(
            got.disps,
            vec![Disp::from([(0, 0.2)]), Disp::new(), Disp::from([(0, -0.1)])]
        );
    }

    #[test_case("", 0 ; "empty")]
    #[test_case("# INTDER\n 2 1 1\n STRE 1 2\n", 3 ; "no geometry")]
    #[test_case("# INTDER\n 2 x 1\n", 2 ; "bad option")]
    #[test_case("# INTDER\n 2 1 1\n STRE 1 2 3\n 0\n", 3 ; "too many atoms")]
    #[test_case("# INTDER\n 2 1 1\n STRE 1 0\n 0\n", 3 ; "zero index")]
    #[test_case("# INTDER\n 2 1 1\n STRE 1 2\n 1 1\n", 4 ; "odd pairs")]
    #[test_case("# INTDER\n 2 1 0\n STRE 1 2\n 0\n 0 0\n", 5 ; "short row")]
    #[test_case("# INTDER\n 2 1 0\n STRE 1 2\n 0\nQq 0 0 0\n", 5 ; "bad label")]
    #[test_case(
        "# INTDER\n 2 1 0\n STRE 1 2\n 0\n 0 0 0\n", 5 ; "too few atoms"
    )]
    #[test_case(
        "# INTDER\n 2 1 0\n STRE 1 3\n 0\n 0 0 0\n 0 0 1\n", 3 ; "atom range"
    )]
    #[test_case(
        "# INTDER\n 2 1 0\n STRE 1 2\n 0\n 0 0 0\n 0 0 1\nDISP 1\n 1 0.1\n",
        8 ; "unterminated disp"
    )]
    #[test_case(
        "# INTDER\n 2 1 0\n STRE 1 2\n 0\n 0 0 0\n 0 0 1\nDISP 1\n 1 0.1 2\n",
        8 ; "long disp"
    )]
    #[test_case(
        "# INTDER\n 2 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0\n STRE 1 2\n 0\n\
         0 0 0\n 0 0 1\n",
        2 ; "too many options"
    )]
    #[test_case(
        "# INTDER\n 2 1 1\n STRE 1 2\n x 1 1.0\n 0\n 0 0 0\n 0 0 1\n",
        4 ; "bad syc label"
    )]
    #[test_case(
        "# INTDER\n 2 1 1\n STRE 1 2\n 1 9223372036854775808 1.0\n 0\n",
        4 ; "huge syc term"
    )]
    fn malformed(input: &str, line: usize) {
        match load(input) {
            Err(IntcoError::ParseError { line: got, .. }) => {
                assert_eq!(got, line)
            }
            other => panic!("expected a parse error, got {other:?}"),
        }
    }
}
