use clap::Parser;

fn main() -> miette::Result<()> {
    qm_run::Cli::parse().run()
}
