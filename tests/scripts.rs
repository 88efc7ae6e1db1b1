//! Runs every program under `tests/scripts` and checks what it prints.
//!
//! A script states its expectations in comments:
//!
//! - `// expect: text` for each line of output, in order
//! - `// expect runtime error: message` for the error that ends the run
//! - `// expect compile error: message` for each compile error, in order
//!
//! Each script runs twice, the second time collecting garbage before every
//! allocation.

use std::cell::RefCell;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mal_vm::{InterpretError, Vm, VmOptions};
use pretty_assertions::assert_eq;

#[derive(Clone, Default)]
struct Output(Rc<RefCell<Vec<u8>>>);

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Outcome {
    output: Vec<String>,
    runtime_error: Option<String>,
    compile_errors: Vec<String>,
}

fn expectations(source: &str) -> Outcome {
    let mut expected = Outcome::default();
    for line in source.lines() {
        let comment = match line.find("// expect") {
            Some(at) => &line[at + 3..],
            None => continue,
        };
        if let Some(text) = comment.strip_prefix("expect: ") {
            expected.output.push(text.to_owned());
        } else if let Some(message) = comment.strip_prefix("expect runtime error: ") {
            expected.runtime_error = Some(message.to_owned());
        } else if let Some(message) = comment.strip_prefix("expect compile error: ") {
            expected.compile_errors.push(message.to_owned());
        }
    }
    expected
}

fn run(path: &Path, source: &str, options: VmOptions) -> Outcome {
    let out = Output::default();
    let mut vm = Vm::with_options(options);
    vm.set_output(out.clone());

    let mut outcome = Outcome::default();
    match vm.interpret(source, &path.display().to_string()) {
        Ok(()) => {}
        Err(InterpretError::Runtime(e)) => outcome.runtime_error = Some(e.message),
        Err(InterpretError::Compile(e)) => {
            outcome.compile_errors = e.errors.iter().map(|e| e.message.to_string()).collect()
        }
    }
    let printed = String::from_utf8(out.0.borrow().clone()).unwrap();
    outcome.output = printed.lines().map(str::to_owned).collect();
    outcome
}

fn scripts() -> Vec<PathBuf> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/scripts");
    let mut scripts: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "mal"))
        .collect();
    scripts.sort();
    scripts
}

#[test]
fn scripts_print_what_they_expect() {
    let scripts = scripts();
    assert!(!scripts.is_empty());
    for path in scripts {
        let source = std::fs::read_to_string(&path).unwrap();
        let expected = expectations(&source);

        let outcome = run(&path, &source, VmOptions::default());
        assert_eq!(outcome, expected, "{}", path.display());

        let stressed = VmOptions {
            stress_gc: true,
            ..VmOptions::default()
        };
        let outcome = run(&path, &source, stressed);
        assert_eq!(outcome, expected, "{} (stress gc)", path.display());
    }
}
