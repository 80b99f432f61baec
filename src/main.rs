use macchiato::jvm::{read_class_file, JVMParser};
use macchiato::program::Program;
use macchiato::runtime::Runtime;

use std::env;
use std::path::Path;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("USAGE: {} <class file>", args[0]);
        process::exit(1);
    }
    let path = Path::new(&args[1]);
    let class_file_bytes = read_class_file(path).unwrap_or_else(|err| {
        eprintln!("failed to read class file {}: {err}", path.display());
        process::exit(1);
    });
    let class_file =
        JVMParser::parse(&class_file_bytes).unwrap_or_else(|err| {
            eprintln!("failed to parse class file {}: {err}", path.display());
            process::exit(1);
        });
    let program = Program::new(&class_file);
    let mut runtime = Runtime::new(program);
    if let Err(err) = runtime.run() {
        eprintln!("runtime error: {err}");
        process::exit(1);
    }
}
