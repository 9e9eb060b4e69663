mod cli;

fn main() -> anyhow::Result<()> {
    if let Err(e) = cli::run() {
        #[expect(clippy::print_stderr, reason = "top-level error path, before any other logging sink is reliable")]
        {
            eprintln!("Error: {e:?}");
        }
        std::process::exit(1);
    }
    Ok(())
}
