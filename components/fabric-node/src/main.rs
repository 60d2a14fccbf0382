mod cli;
#[cfg(test)]
mod e2e_tests;
mod errors;
mod fabric;
mod helpers;
mod instrumentation;
mod metrics;
mod proto;
mod rpc;
mod runtime;
mod supervisor;
mod worker;

fn main() -> anyhow::Result<()> {
    instrumentation::tracing::init_panic_handler();

    // Main entrypoint simply delegates control to the CLI layer, which
    // parses the subcommand and owns the tracing setup from there - the log
    // directory and level come from the configuration file, not a global
    // default.
    cli::cli::run()
}
