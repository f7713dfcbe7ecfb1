#![forbid(unsafe_code)]

use std::io::Read;
use std::process::ExitCode;

use gs_runtime::{AggregationPolicy, RuntimeMode, SkipLedger};
use gs_upload::{UploadRequest, handle_upload_with_ledger};
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut group: Option<String> = None;
    let mut aggregate: Option<String> = None;
    let mut input: Option<String> = None;
    let mut mode: Option<RuntimeMode> = None;
    let mut show_skipped = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--group" => {
                group = Some(args.next().ok_or("--group requires a column name")?);
            }
            "--aggregate" => {
                aggregate = Some(args.next().ok_or("--aggregate requires a column name")?);
            }
            "--strict" => mode = Some(RuntimeMode::Strict),
            "--lenient" => mode = Some(RuntimeMode::Lenient),
            "--show-skipped" => show_skipped = true,
            "--help" | "-h" => {
                print_help();
                return Ok(ExitCode::SUCCESS);
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown argument: {other}").into());
            }
            path => {
                if input.replace(path.to_owned()).is_some() {
                    return Err("only one input file may be given".into());
                }
            }
        }
    }

    let mut policy = AggregationPolicy::from_env()?;
    if let Some(mode) = mode {
        policy.mode = mode;
    }

    let mut request = UploadRequest {
        group,
        aggregate,
        file: None,
    };
    match input.as_deref() {
        None => {}
        Some("-") => {
            let mut bytes = Vec::new();
            std::io::stdin().lock().read_to_end(&mut bytes)?;
            request = request.with_file(bytes);
        }
        Some(path) => request = request.with_file(std::fs::read(path)?),
    }

    let mut ledger = SkipLedger::new();
    let response = handle_upload_with_ledger(&request, &policy, &mut ledger);

    println!("{}", serde_json::to_string_pretty(&response.body)?);
    if show_skipped {
        for skipped in ledger.records() {
            eprintln!("skipped {skipped}");
        }
        eprintln!(
            "aggregated={} skipped={} blank={}",
            ledger.aggregated_rows(),
            ledger.skipped(),
            ledger.blank_rows()
        );
    }

    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_help() {
    println!(
        "groupsum --group <column> --aggregate <column> [--strict|--lenient] [--show-skipped] <file|->\n\
         \n\
         Sums the integer <aggregate> column of a CSV file per distinct <group> value\n\
         and prints the result as a JSON object. Errors print {{\"detail\": ...}} and exit 1.\n\
         \n\
         Environment:\n  \
           GROUPSUM_MODE   lenient (default) or strict\n  \
           RUST_LOG        tracing filter, e.g. gs_groupby=trace"
    );
}
