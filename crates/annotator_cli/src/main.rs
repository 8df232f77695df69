//! Command-line matrix report over an annotation database.
//!
//! # Responsibility
//! - Report stored feature matrix shapes for one split and a set of classes.
//! - Optionally wipe every stored feature row before reporting.
//!
//! Usage: `annotator_cli <db_path> <split> [class...] [--clear-all] [--log-dir <abs_dir>]`

use annotator_core::{
    core_version, default_log_level, init_logging, open_db, AnnotatorConfig, FeatureAnnotator,
};
use log::info;
use std::process::ExitCode;

struct Args {
    db_path: String,
    split: i64,
    classes: Vec<String>,
    clear_all: bool,
    log_dir: Option<String>,
}

fn parse_args(mut raw: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut positional = Vec::new();
    let mut clear_all = false;
    let mut log_dir = None;
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--clear-all" => clear_all = true,
            "--log-dir" => {
                log_dir = Some(raw.next().ok_or("--log-dir needs a directory")?);
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let db_path = positional.next().ok_or("missing <db_path>")?;
    let split = positional
        .next()
        .ok_or("missing <split>")?
        .parse::<i64>()
        .map_err(|err| format!("invalid <split>: {err}"))?;

    Ok(Args {
        db_path,
        split,
        classes: positional.collect(),
        clear_all,
        log_dir,
    })
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(log_dir) = &args.log_dir {
        init_logging(default_log_level(), log_dir)?;
    }

    let conn = open_db(&args.db_path)?;
    let annotator = FeatureAnnotator::new(
        &conn,
        args.classes.iter().cloned(),
        Vec::new(),
        AnnotatorConfig::default(),
    )?;

    if args.clear_all {
        let deleted = annotator.clear_all()?;
        println!("cleared feature_rows={deleted}");
    }

    for (class_name, matrix) in annotator.load_matrices(args.split)? {
        let (rows, cols) = matrix.shape();
        println!(
            "class={class_name} split={} rows={rows} cols={cols} nnz={}",
            args.split,
            matrix.nnz()
        );
    }
    info!(
        "event=cli_report module=cli status=ok split={} classes={}",
        args.split,
        args.classes.len()
    );
    Ok(())
}

fn main() -> ExitCode {
    println!("annotator_core version={}", core_version());

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("error: {err}");
            eprintln!(
                "usage: annotator_cli <db_path> <split> [class...] [--clear-all] [--log-dir <abs_dir>]"
            );
            return ExitCode::from(2);
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
