//! kubectl-realname-diff - diff live and local resources ignoring Kustomize hash-suffixes

use std::process::ExitCode;

use clap::Parser;

mod commands;
mod error;
mod exit_codes;
mod logging;

use commands::diff::DiffArgs;

const LONG_ABOUT: &str = "\
Diffs live and local resources ignoring Kustomize hash-suffixes.

Normally, \"kubectl realname-diff\" works the same as \"kubectl diff\", but if you
set \"real name\" as a label, local and live resources with the same label will be
compared.

The output is always YAML. KUBECTL_EXTERNAL_DIFF selects a diff program that is
run on two directories, LIVE and MERGED.

Exit status: 0 no differences, 1 differences found, 2 or more on error.";

const EXAMPLES: &str = "\
Examples:
  # Make sure you have already labeled the resources with
  # \"realname-diff/realname: [real name]\".

  # Diff resources included in the result of kustomize build
  kustomize build ./example | kubectl realname-diff -f -

  # Also you can use kubectl's built-in kustomize
  kubectl realname-diff -k ./example";

#[derive(Parser, Debug)]
#[command(name = "kubectl-realname-diff", bin_name = "kubectl realname-diff")]
#[command(version)]
#[command(about = "Diff live and local resources ignoring Kustomize hash-suffixes.")]
#[command(long_about = LONG_ABOUT, after_help = EXAMPLES)]
struct Cli {
    #[command(flatten)]
    diff: DiffArgs,

    /// Log level for diagnostics on stderr (overrides RUST_LOG)
    #[arg(long, value_name = "LEVEL", value_parser = logging::LEVELS)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    miette::set_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are reported as errors by clap
            let code = if e.use_stderr() {
                exit_codes::USAGE_ERROR
            } else {
                exit_codes::SUCCESS
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    logging::init(cli.log_level.as_deref());

    match commands::diff::run(&cli.diff).await {
        Ok(report) if report.has_differences() => ExitCode::from(exit_codes::DIFFERENCES),
        Ok(_) => ExitCode::from(exit_codes::SUCCESS),
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(code)
        }
    }
}
