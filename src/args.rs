use clap::{value_parser, Arg, Command};

pub struct Args {
    /// Tempo given on the command line; wins over the stored one.
    pub bpm: Option<f64>,
}

pub fn parse_arguments() -> Args {
    let matches = Command::new("tempotap")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A tap-tempo TUI metronome")
        .arg(
            Arg::new("bpm")
                .short('b')
                .long("bpm")
                .help("Initial tempo in beats per minute (overrides the saved tempo)")
                .value_parser(value_parser!(f64))
                .required(false),
        )
        .get_matches();

    Args {
        bpm: matches.get_one::<f64>("bpm").copied(),
    }
}
