//! Command-line driver for the netlink spec C code generator.

use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};

use ynl_gen_c::{generate, GenOptions, Mode};

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    User,
    Kernel,
    Uapi,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Mode {
        match mode {
            ModeArg::User => Mode::User,
            ModeArg::Kernel => Mode::Kernel,
            ModeArg::Uapi => Mode::Uapi,
        }
    }
}

#[derive(Parser)]
#[command(name = "ynl-gen-c")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Netlink simple parsing generator", long_about = None)]
struct Cli {
    /// Which side of the protocol to generate
    #[arg(long, value_enum)]
    mode: ModeArg,

    /// Family spec (YAML)
    #[arg(long)]
    spec: PathBuf,

    /// Generate the header of the source/header pair
    #[arg(long, conflicts_with = "source")]
    header: bool,

    /// Generate the source of the source/header pair
    #[arg(long)]
    source: bool,

    /// Extra include(s) for user mode
    #[arg(long = "user-header", value_name = "PATH", num_args = 1..)]
    user_header: Vec<String>,

    /// Do not overwrite the output file if the new output is identical
    /// to the old
    #[arg(long = "cmp-out")]
    cmp_out: bool,

    /// Drop operations matching this regex (repeatable)
    #[arg(long = "exclude-op", value_name = "REGEX")]
    exclude_op: Vec<String>,

    /// Output file; stdout when absent
    #[arg(short = 'o', value_name = "FILE")]
    out_file: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    if !cli.header && !cli.source {
        eprintln!("Error: --header or --source is required");
        process::exit(2);
    }

    let opts = GenOptions {
        mode: cli.mode.into(),
        header: cli.header,
        spec: cli.spec,
        out_file: cli.out_file,
        cmp_out: cli.cmp_out,
        user_headers: cli.user_header,
        exclude_ops: cli.exclude_op,
    };

    if let Err(e) = generate(&opts) {
        eprintln!("{}", e);
        process::exit(1);
    }
}
