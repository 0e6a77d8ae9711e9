use std::fs::File;
use std::io::{BufWriter, Write};

use clap::Parser;
use intco::{Intco, IntcoError};
use log::{error, info};

/// convert displacements in internal coordinates to Cartesian geometries
#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
struct Args {
    /// input file. Read from stdin if omitted
    #[arg(value_parser)]
    infile: Option<String>,

    /// Write the converted geometries to this file. Defaults to file07.
    #[arg(short, long, default_value_t = String::from("file07"))]
    output: String,

    /// Log the progress of every iteration. Defaults to false.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Maximum number of Newton iterations for each displacement.
    #[arg(short = 'n', long, default_value_t = 20)]
    max_iter: usize,

    /// Set the maximum number of threads to use. Defaults to 0, which means to
    /// use as many threads as there are CPUS.
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// Serialize the input file to JSON and exit.
    #[arg(short, long, default_value_t = false)]
    json: bool,
}

/// write the reference report to stdout and the converted geometries to
/// `output`, returning the number of displacements that failed
fn run(intco: &Intco, output: &str) -> Result<usize, IntcoError> {
    let mut stdout = std::io::stdout().lock();
    intco.write_report(&mut stdout)?;
    if intco.options.numeric_test != 0 {
        let dev = intco.check_b_matrix()?;
        writeln!(
            stdout,
            "MAX DEVIATION BETWEEN ANALYTIC AND NUMERICAL B MATRIX = {dev:.4e}\n"
        )?;
    }
    if intco.options.disp_coords == 0 || intco.disps.is_empty() {
        info!("no displacements to convert");
        return Ok(0);
    }

    let results = intco.convert_disps();
    let f = File::create(output).map_err(|e| {
        IntcoError::Io(format!("failed to create '{output}': {e}"), e.kind())
    })?;
    let mut w = BufWriter::new(f);
    let mut failed = 0;
    for (i, res) in results.iter().enumerate() {
        match res {
            Ok(cart) => {
                writeln!(w, "# GEOMUP #################")?;
                Intco::print_cart(&mut w, cart)?;
            }
            Err(e) => {
                error!("displacement {} failed: {e}", i + 1);
                writeln!(w, "# FAILED ################# {e}")?;
                failed += 1;
            }
        }
    }
    w.flush()?;
    Ok(failed)
}

fn main() {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level),
    )
    .init();
    let _ = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global();

    let loaded = match &args.infile {
        Some(infile) => Intco::load_file(infile),
        None => Intco::load(std::io::stdin()),
    };
    let mut intco = match loaded {
        Ok(intco) => intco,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    intco.settings.max_iter = args.max_iter;

    if args.json {
        match serde_json::to_string_pretty(&intco) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("failed to serialize input with {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    match run(&intco, &args.output) {
        Ok(0) => {}
        Ok(n) => {
            eprintln!("{n} of {} displacements failed", intco.disps.len());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_args() {
        let args = Args::try_parse_from(["intco", "-v", "intco.in"]).unwrap();
        assert_eq!(args.infile.as_deref(), Some("intco.in"));
        assert!(args.verbose);
        assert_eq!(args.output, "file07");
        assert_eq!(args.max_iter, 20);

        let args = Args::try_parse_from([
            "intco", "-n", "5", "-t", "2", "--output", "geoms", "-j",
        ])
        .unwrap();
        assert_eq!(args.infile, None);
        assert_eq!(args.max_iter, 5);
        assert_eq!(args.threads, 2);
        assert_eq!(args.output, "geoms");
        assert!(args.json);

        assert!(Args::try_parse_from(["intco", "-n", "many"]).is_err());
    }
}
