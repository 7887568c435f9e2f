use wisp::app::handlers;

fn output_header() -> &'static str {
    "Wisp\nWisp is a local task-execution agent that plans, edits and verifies inside a sandboxed workspace."
}

fn print_header() {
    println!("{}\n", output_header());
}

fn run() -> Result<(), String> {
    print_header();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let output = handlers::run_cli(args)?;
    println!("{output}");
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
