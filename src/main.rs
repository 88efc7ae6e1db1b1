use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::exit;

use clap::Parser as ClapParser;
use mal_bytecode::disasm::Disassembly;
use mal_vm::{InterpretError, Vm, VmOptions};
use tracing_subscriber::EnvFilter;

/// Exit code for a source file that could not be read
const EXIT_IO_ERROR: i32 = 74;

fn main() {
    let opt = Opt::parse();
    init_logging();

    let (source, name) = if let Some(e) = opt.eval.clone() {
        (e, "<eval>".to_owned())
    } else if let Some(f) = &opt.file {
        match std::fs::read_to_string(f) {
            Ok(source) => (source, f.display().to_string()),
            Err(e) => {
                eprintln!("Could not read file \"{}\": {}", f.display(), e);
                exit(EXIT_IO_ERROR);
            }
        }
    } else {
        repl(&opt);
        return;
    };

    if opt.compile_only {
        match mal_codegen::compile(&source, &name) {
            Ok(f) => print!("{}", Disassembly(&f)),
            Err(errors) => {
                eprintln!("{}", errors);
                exit(InterpretError::from(errors).exit_code());
            }
        }
        return;
    }

    let mut vm = Vm::with_options(opt.vm_options());
    if let Err(e) = vm.interpret(&source, &name) {
        eprintln!("{}", e);
        exit(e.exit_code());
    }
}

/// Reads and runs one line at a time. Globals persist between lines and
/// errors do not end the session.
fn repl(opt: &Opt) {
    let mut vm = Vm::with_options(opt.vm_options());
    let stdin = std::io::stdin();
    let mut stdin = stdin.lock();
    let mut line = String::new();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {
                if let Err(e) = vm.interpret(&line, "<repl>") {
                    eprintln!("{}", e);
                }
            }
            Err(e) => {
                eprintln!("Could not read input: {}", e);
                exit(EXIT_IO_ERROR);
            }
        }
    }
}

/// Logs go to stderr so they never mix with program output. `RUST_LOG`
/// overrides the default level.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(clap::Parser)]
#[clap(about, version, author)]
struct Opt {
    /// Only compile the input. Outputs the disassembled bytecode.
    #[clap(long)]
    compile_only: bool,

    /// Evaluate the given string as a program.
    #[clap(short, long)]
    eval: Option<String>,

    /// Run the given file. Starts a REPL if neither a file nor `--eval` is
    /// given.
    #[clap(parse(from_os_str))]
    file: Option<PathBuf>,

    /// Collect garbage before every allocation.
    #[clap(long)]
    stress_gc: bool,

    /// Maximum call depth.
    #[clap(long, default_value_t = 64)]
    max_frames: usize,

    /// Bytes allocated before the first garbage collection.
    #[clap(long)]
    gc_threshold: Option<usize>,
}

impl Opt {
    fn vm_options(&self) -> VmOptions {
        let defaults = VmOptions::default();
        VmOptions {
            max_frames: self.max_frames,
            initial_gc_threshold: self.gc_threshold.unwrap_or(defaults.initial_gc_threshold),
            stress_gc: self.stress_gc,
            ..defaults
        }
    }
}
