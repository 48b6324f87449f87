use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Instant;
use std::{env, fs, process};

use csra_base::{ArchiveBuilder, CsraDb};
use csra_base::utils;

use getopts::Options;

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    let start_time = Instant::now();
    env_logger::init();

    // Parse arguments.
    let config = Config::new();

    // Check if the database already exists.
    if utils::file_exists(&config.db_file) {
        if config.overwrite {
            eprintln!("Overwriting database {}", config.db_file.display());
            fs::remove_file(&config.db_file).map_err(|x| x.to_string())?;
        } else {
            return Err(format!("Database {} already exists", config.db_file.display()));
        }
    }

    // Read the input.
    eprintln!("Reading references from {}", config.fasta_file.display());
    let mut fasta = utils::open_file(&config.fasta_file).map_err(|x| x.to_string())?;
    eprintln!("Reading alignments from {}", config.sam_file.display());
    let mut sam = utils::open_file(&config.sam_file).map_err(|x| x.to_string())?;
    let builder = ArchiveBuilder::import_sam(&mut sam, &mut fasta, config.row_size).map_err(|x| x.to_string())?;

    // Create the database.
    eprintln!("Creating database {}", config.db_file.display());
    builder.create(&config.db_file).map_err(|x| x.to_string())?;

    // Statistics.
    let database = CsraDb::open(&config.db_file).map_err(|x| x.to_string())?;
    eprintln!(
        "The database contains {} references, {} spots, and {} alignments",
        database.references(), database.spots(), database.alignments()
    );
    let size = database.file_size().unwrap_or(String::from("unknown"));
    eprintln!("Final database size: {}", size);

    let end_time = Instant::now();
    let seconds = end_time.duration_since(start_time).as_secs_f64();
    eprintln!("Used {:.3} seconds", seconds);

    Ok(())
}

//-----------------------------------------------------------------------------

struct Config {
    pub sam_file: PathBuf,
    pub fasta_file: PathBuf,
    pub db_file: PathBuf,
    pub row_size: usize,
    pub overwrite: bool,
}

impl Config {
    pub fn new() -> Config {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();
        let header = format!("Usage: {} [options] alignments.sam[.gz]", program);

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optopt("r", "reference", "reference sequences in FASTA format (required)", "FILE");
        let row_desc = format!("number of bases in a reference row (default: {})", CsraDb::ROW_SIZE);
        opts.optopt("", "row-size", &row_desc, "INT");
        opts.optopt("o", "output", "output file name (default: <input>.db)", "FILE");
        opts.optflag("", "overwrite", "overwrite the database file if it exists");
        let matches = match opts.parse(&args[1..]) {
            Ok(m) => m,
            Err(f) => {
                eprintln!("{}", f);
                process::exit(1);
            }
        };

        if matches.opt_present("h") {
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }
        let fasta_file = if let Some(s) = matches.opt_str("r") {
            PathBuf::from(s)
        } else {
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        };
        let sam_file = if let Some(s) = matches.free.first() {
            PathBuf::from(s)
        } else {
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        };
        let db_file = match matches.opt_str("o") {
            Some(s) => PathBuf::from(s),
            None => {
                let mut name = OsString::from(sam_file.as_os_str());
                name.push(".db");
                PathBuf::from(name)
            },
        };

        let mut row_size = CsraDb::ROW_SIZE;
        if let Some(s) = matches.opt_str("row-size") {
            match s.parse::<usize>() {
                Ok(size) if size > 0 => row_size = size,
                _ => {
                    eprintln!("Invalid row size: {}", s);
                    process::exit(1);
                }
            }
        }

        let overwrite = matches.opt_present("overwrite");

        Config { sam_file, fasta_file, db_file, row_size, overwrite }
    }
}

//-----------------------------------------------------------------------------
