//! pg-inspect: load a stage document, run the resolution pass, and report
//! what it found.
//!
//! ```text
//! pg-inspect <document.json> [--settings <settings.json>] [--json] [--msgpack-out <path>]
//! ```
//!
//! Exits with status 1 on unreadable input, 2 when the document loads but
//! holds dangling associations.

use pg_core::document::Document;
use pg_core::error::StageError;
use pg_core::resolve::ResolveReport;
use pg_editor::manager::StageManager;
use pg_editor::settings::SettingsService;

#[derive(Debug, Default)]
struct Args {
    document: String,
    settings: Option<String>,
    json: bool,
    msgpack_out: Option<String>,
}

fn parse_args(mut raw: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut args = Args::default();
    let mut document = None;
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--settings" => args.settings = Some(raw.next().ok_or("--settings needs a path")?),
            "--msgpack-out" => args.msgpack_out = Some(raw.next().ok_or("--msgpack-out needs a path")?),
            "--json" => args.json = true,
            flag if flag.starts_with("--") => return Err(format!("unknown flag {flag}")),
            path if document.is_none() => document = Some(path.to_string()),
            extra => return Err(format!("unexpected argument {extra}")),
        }
    }
    args.document = document.ok_or("missing document path")?;
    Ok(args)
}

fn read(path: &str) -> Result<String, StageError> {
    std::fs::read_to_string(path).map_err(|e| StageError::Document(format!("{path}: {e}")))
}

fn run(args: &Args) -> Result<ResolveReport, StageError> {
    let mut settings = match &args.settings {
        Some(path) => SettingsService::from_json(&read(path)?)?,
        None => SettingsService::default(),
    };
    let mut manager = StageManager::init(&mut settings);
    let document = Document::from_json(&read(&args.document)?)?;
    let report = manager.load_document(&document)?;
    let content = &manager.stage.content;

    let portals = manager.stage.child_stage_keys_and_cameras(&args.document);
    if args.json {
        let summary = serde_json::json!({
            "entities": content.entities.len(),
            "associations": content.associations.len(),
            "sections": content.sections().count(),
            "tags": content.tags().len(),
            "resolved": report.resolved,
            "dangling": report.dangling.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
            "prunedTags": report.pruned_tags.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
            "childStages": portals.iter().map(|(path, _)| path.as_str()).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("entities:     {}", content.entities.len());
        println!("associations: {}", content.associations.len());
        println!("sections:     {}", content.sections().count());
        println!("tags:         {}", content.tags().len());
        println!("resolved:     {}", report.resolved);
        for id in &report.dangling {
            println!("dangling:     {id}");
        }
        for id in &report.pruned_tags {
            println!("pruned tag:   {id}");
        }
        for (path, _) in &portals {
            println!("child stage:  {path}");
        }
    }

    if let Some(out) = &args.msgpack_out {
        let bytes = content.to_document().to_msgpack()?;
        std::fs::write(out, bytes).map_err(|e| StageError::Document(format!("{out}: {e}")))?;
        log::info!("wrote {out}");
    }
    Ok(report)
}

fn main() {
    env_logger::init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("pg-inspect: {e}");
            eprintln!(
                "usage: pg-inspect <document.json> [--settings <settings.json>] [--json] [--msgpack-out <path>]"
            );
            std::process::exit(1);
        }
    };

    match run(&args) {
        Ok(report) if report.dangling.is_empty() => {}
        Ok(report) => {
            log::warn!("{} dangling association(s)", report.dangling.len());
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("pg-inspect: {e}");
            std::process::exit(1);
        }
    }
}
