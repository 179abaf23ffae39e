#![forbid(unsafe_code)]

use fa_conformance::{HarnessConfig, SuiteOptions, enforce_green, run_packets_grouped};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut config = HarnessConfig::default_paths();
    let mut packet_filter: Option<String> = None;
    let mut require_green = false;
    let mut json = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fixture-root" => {
                let value = args.next().ok_or("--fixture-root requires a directory")?;
                config = HarnessConfig::with_fixture_root(value);
            }
            "--packet-id" => {
                let value = args
                    .next()
                    .ok_or("--packet-id requires a value (e.g. FA-AGG-001)")?;
                packet_filter = Some(value);
            }
            "--require-green" => {
                require_green = true;
            }
            "--json" => {
                json = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    info!(root = %config.packet_fixture_root().display(), "running conformance packets");
    let reports = run_packets_grouped(&config, &SuiteOptions { packet_filter })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!(
                "packet={} suite={} fixtures={} passed={} failed={} green={}",
                report.packet_id.as_deref().unwrap_or("<all>"),
                report.suite,
                report.fixture_count,
                report.passed,
                report.failed,
                report.is_green()
            );
            for result in report.results.iter().filter(|r| r.mismatch.is_some()) {
                println!(
                    "  case={} operation={} mismatch={}",
                    result.case_id,
                    result.operation.function_name(),
                    result.mismatch.as_deref().unwrap_or_default()
                );
            }
        }
    }

    if require_green {
        enforce_green(&reports)?;
    }
    Ok(())
}

fn print_help() {
    println!(
        "fa-conformance-cli [--fixture-root DIR] [--packet-id ID] [--require-green] [--json]\n\
         \n\
         Runs the JSON fixture packets under DIR/packets through the compute\n\
         function registry and prints one summary line per packet.\n\
         \n\
         --fixture-root DIR  fixture directory (default: the crate's fixtures/)\n\
         --packet-id ID      only run cases of this packet\n\
         --require-green     exit non-zero unless every packet passes\n\
         --json              print the full reports as JSON\n\
         \n\
         Log verbosity follows RUST_LOG (default: info)."
    );
}
