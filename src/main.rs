use anyhow::{Context, Result, bail};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use weave_config::WeaveConfig;
use weave_ir::{ConversionInput, SafetyGate, SafetyReport, TokenManifest, Verdict};

const USAGE: &str = "Usage:
  weave <page.html> [--css <file>] [--tokens <file>] [--config <weave.toml>]
        [--out <document.json>] [--report <report.json>] [--artifacts-dir <dir>] [--seed <n>]
  weave check <document.json> [--config <weave.toml>] [--report <report.json>]";

/// Exit status for a `block` verdict.
const BLOCKED: i32 = 2;

#[derive(Default)]
struct Options {
    input: PathBuf,
    css: Option<PathBuf>,
    tokens: Option<PathBuf>,
    config: Option<PathBuf>,
    out: Option<PathBuf>,
    report: Option<PathBuf>,
    artifacts_dir: Option<PathBuf>,
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let _ = env_logger::try_init();

    let mut args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        eprintln!("{USAGE}");
        bail!("missing input file");
    }
    let check = args[0] == "check";
    if check {
        args.remove(0);
    }
    let options = parse_args(args)?;
    let config = load_config(options.config.as_deref())?;
    weave_ir::diagnostics::init_diagnostics(config.diagnostics.as_deref());

    let verdict = if check {
        run_check(&options, &config)?
    } else {
        run_convert(&options, &config)?
    };
    if verdict == Verdict::Block {
        std::process::exit(BLOCKED);
    }
    Ok(())
}

fn parse_args(mut args: Vec<String>) -> Result<Options> {
    if args.is_empty() {
        eprintln!("{USAGE}");
        bail!("missing input file");
    }
    let mut options = Options {
        input: PathBuf::from(args.remove(0)),
        ..Options::default()
    };
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = args
            .get(i + 1)
            .with_context(|| format!("{flag} expects a value"))?;
        match flag {
            "--css" => options.css = Some(PathBuf::from(value)),
            "--tokens" => options.tokens = Some(PathBuf::from(value)),
            "--config" => options.config = Some(PathBuf::from(value)),
            "--out" => options.out = Some(PathBuf::from(value)),
            "--report" => options.report = Some(PathBuf::from(value)),
            "--artifacts-dir" => options.artifacts_dir = Some(PathBuf::from(value)),
            "--seed" => {
                options.seed = Some(
                    value
                        .parse()
                        .with_context(|| format!("--seed expects an integer, got {value}"))?,
                )
            }
            other => bail!("unknown flag {other}\n{USAGE}"),
        }
        i += 2;
    }
    Ok(options)
}

fn load_config(path: Option<&Path>) -> Result<WeaveConfig> {
    let mut config = match path {
        Some(path) => WeaveConfig::load_from_file(path).map_err(anyhow::Error::msg)?,
        None => WeaveConfig::load_or_default(),
    };
    config.merge_with_env();
    config.check().map_err(anyhow::Error::msg)?;
    Ok(config)
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn write(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

fn run_convert(options: &Options, config: &WeaveConfig) -> Result<Verdict> {
    let html = read(&options.input)?;
    let css = options.css.as_deref().map(read).transpose()?.unwrap_or_default();
    let tokens = match options.tokens.as_deref() {
        Some(path) => Some(
            TokenManifest::from_json(&read(path)?)
                .with_context(|| format!("invalid token manifest {}", path.display()))?,
        ),
        None => None,
    };

    let seed = options.seed.or(config.ids.seed);
    let gate = SafetyGate::from_config(config).with_seed(seed);
    let mut input = ConversionInput::new(&html).with_css(&css);
    if let Some(tokens) = &tokens {
        input = input.with_tokens(tokens);
    }
    let conversion = gate
        .convert(&input)
        .with_context(|| format!("failed to convert {}", options.input.display()))?;

    let document = serde_json::to_string_pretty(&conversion.document)?;
    match &options.out {
        Some(path) => write(path, &document)?,
        None if conversion.verdict() != Verdict::Block => println!("{document}"),
        None => {}
    }
    if let Some(dir) = &options.artifacts_dir {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let artifacts = &conversion.artifacts;
        for (name, extension, content) in [
            ("css-embed", "css", &artifacts.css),
            ("js-embed", "js", &artifacts.js),
            ("html-embed", "html", &artifacts.html),
        ] {
            if !content.is_empty() {
                write(&dir.join(format!("{name}.{extension}")), content)?;
            }
        }
        for plan in &conversion.report.chunking {
            for chunk in &plan.chunks {
                let file = format!("{}.part{}.{}", plan.artifact, chunk.index + 1, plan.kind);
                write(&dir.join(file), &chunk.content)?;
            }
        }
    }
    finish(&conversion.report, options.report.as_deref())
}

fn run_check(options: &Options, config: &WeaveConfig) -> Result<Verdict> {
    let source = read(&options.input)?;
    let value: serde_json::Value = serde_json::from_str(&source)
        .with_context(|| format!("{} is not JSON", options.input.display()))?;
    let report = SafetyGate::from_config(config)
        .check_document(value)
        .with_context(|| format!("failed to check {}", options.input.display()))?;
    finish(&report, options.report.as_deref())
}

fn finish(report: &SafetyReport, path: Option<&Path>) -> Result<Verdict> {
    let json = serde_json::to_string_pretty(report)?;
    match path {
        Some(path) => write(path, &json)?,
        None => eprintln!("{json}"),
    }
    for issue in report.fatal.iter().chain(&report.errors) {
        log::error!("{issue}");
    }
    for issue in &report.warnings {
        log::warn!("{issue}");
    }
    for fix in &report.fixes {
        log::info!("fixed [{}] {}", fix.code, fix.description);
    }
    log::info!("verdict: {}", report.verdict);
    Ok(report.verdict)
}
