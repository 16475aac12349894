use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use roomshift_contracts::assets::ImageAsset;
use roomshift_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use roomshift_contracts::events::EventWriter;
use roomshift_contracts::export::write_export;
use roomshift_contracts::history::HistoryEntry;
use roomshift_contracts::models::{ModelSelector, IMAGE_EDIT};
use roomshift_engine::{
    default_generator_registry, image_asset_from_upload, timestamp_millis, ImageGenerator,
    RequestOutcome, Session, SessionStatus, REFINE_PRESETS,
};

#[derive(Debug, Parser)]
#[command(name = "roomshift", version, about = "AI room redesign from a photo")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate one redesign, apply refinements in order and export the result.
    Redesign(RedesignArgs),
    /// Interactive session: plain text generates, slash commands do the rest.
    Chat(ChatArgs),
    /// Print the quick refine presets.
    Presets,
}

#[derive(Debug, Parser)]
struct SessionArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "gemini")]
    provider: String,
    #[arg(long)]
    image_model: Option<String>,
}

#[derive(Debug, Parser)]
struct RedesignArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long = "refine")]
    refinements: Vec<String>,
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    image: Option<PathBuf>,
    #[command(flatten)]
    session: SessionArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("roomshift error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Redesign(args) => run_redesign(args),
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Presets => {
            print_presets();
            Ok(0)
        }
    }
}

fn open_session(args: &SessionArgs, generator: &dyn ImageGenerator) -> Result<Session> {
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed creating {}", args.out.display()))?;
    let selection = ModelSelector::new(None)
        .select(args.image_model.as_deref(), IMAGE_EDIT, Some(args.provider.as_str()))
        .map_err(|message| anyhow!(message))?;
    if let Some(reason) = selection.fallback_reason.as_deref() {
        eprintln!("{reason} Using {}.", selection.model.name);
    }
    if let Some(needed) = generator.missing_credentials() {
        eprintln!("{needed} is not set; requests will fail. Use --provider dryrun to work offline.");
    }

    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let session_id = format!("session-{}", timestamp_millis());
    let events = EventWriter::new(events_path, session_id);
    Ok(Session::new(selection.model.name).with_events(events))
}

fn run_redesign(args: RedesignArgs) -> Result<i32> {
    let generators = default_generator_registry();
    let generator = lookup_generator(&generators, &args.session.provider)?;
    let mut session = open_session(&args.session, generator)?;
    session.load_original(load_image_file(&args.image)?);

    let prompt = args
        .prompt
        .clone()
        .unwrap_or_else(|| session.current_prompt().to_string());
    println!("Generating with {}...", session.model());
    let outcome = session.start_generation(generator, &prompt);
    report_outcome(&session, &outcome);
    if !matches!(outcome, RequestOutcome::Appended { .. }) {
        return Ok(1);
    }

    for (idx, refinement) in args.refinements.iter().enumerate() {
        println!("Refining ({}/{}): {refinement}", idx + 1, args.refinements.len());
        let outcome = session.start_refinement(generator, refinement);
        report_outcome(&session, &outcome);
    }

    download_selected(&session, &args.session.out)?;
    Ok(0)
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let generators = default_generator_registry();
    let generator = lookup_generator(&generators, &args.session.provider)?;
    let mut session = open_session(&args.session, generator)?;
    if let Some(path) = args.image.as_deref() {
        session.load_original(load_image_file(path)?);
        println!("Loaded {}", path.display());
    }

    let stdin = io::stdin();
    let mut line = String::new();

    println!("Roomshift chat started. Type /help for commands.");
    if let Some(events) = session.events() {
        println!("Session {} logging to {}", events.session_id(), events.path().display());
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);

        match intent.action.as_str() {
            "noop" => {}
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
                println!("Any other text starts a new redesign of the original photo.");
            }
            "quit" => break,
            "open_image" => {
                let Some(path) = intent.arg_str("path") else {
                    println!("/open requires a path");
                    continue;
                };
                match load_image_file(Path::new(path)) {
                    Ok(image) => {
                        session.load_original(image);
                        println!("Loaded {path}. History cleared.");
                    }
                    Err(err) => println!("Open failed: {err:#}"),
                }
            }
            "generate" => {
                let prompt = intent.prompt.clone().unwrap_or_default();
                if session.original_image().is_none() {
                    println!("Load a room photo first with /open <path>");
                    continue;
                }
                println!("Generating...");
                let outcome = session.start_generation(generator, &prompt);
                report_outcome(&session, &outcome);
            }
            "refine" => {
                let prompt = intent
                    .prompt
                    .clone()
                    .unwrap_or_else(|| session.refine_prompt().to_string());
                if session.history().is_empty() {
                    println!("Nothing to refine yet. Describe a redesign first.");
                    continue;
                }
                if prompt.trim().is_empty() {
                    println!("/refine requires an instruction (or load one with /preset <n>)");
                    continue;
                }
                println!("Refining...");
                let outcome = session.start_refinement(generator, &prompt);
                report_outcome(&session, &outcome);
            }
            "apply_preset" => {
                let index = intent
                    .arg_str("index")
                    .and_then(|raw| raw.trim().parse::<usize>().ok());
                match index.and_then(|index| session.apply_refine_preset(index)) {
                    Some(preset) => println!("Refine prompt: {preset} (send with /refine)"),
                    None => println!("/preset expects 1-{}", REFINE_PRESETS.len()),
                }
            }
            "presets" => print_presets(),
            "select" => {
                let target = intent.arg_str("target").unwrap_or_default();
                let Some(entry_id) = resolve_history_target(&session, target) else {
                    println!("No version matches '{target}'. See /history.");
                    continue;
                };
                session.select_history(&entry_id);
                print_selection(&session);
            }
            "history" => print_history(&session),
            "status" => print_status(&session),
            "download" => {
                let dir = intent
                    .arg_str("path")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| args.session.out.clone());
                if let Err(err) = download_selected(&session, &dir) {
                    println!("Download failed: {err:#}");
                }
            }
            "reset" => {
                session.reset();
                println!("Started a new project. Load a photo with /open <path>.");
            }
            "unknown" => {
                let command = intent.arg_str("command").unwrap_or_default();
                println!("Unknown command: /{command}. Type /help for commands.");
            }
            other => println!("Unsupported action: {other}"),
        }
    }

    Ok(())
}

fn lookup_generator<'a>(
    generators: &'a roomshift_engine::ImageGeneratorRegistry,
    provider: &str,
) -> Result<&'a dyn ImageGenerator> {
    generators.get(provider).ok_or_else(|| {
        anyhow!(
            "unknown provider '{provider}' (available: {})",
            generators.names().join(", ")
        )
    })
}

/// Reads a room photo from disk. Files holding a `data:image/...;base64,`
/// URI are accepted as well as raw image files.
fn load_image_file(path: &Path) -> Result<ImageAsset> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    if bytes.starts_with(b"data:") {
        let text = String::from_utf8_lossy(&bytes);
        return ImageAsset::from_data_uri(&text)
            .ok_or_else(|| anyhow!("{} is not an image data URI", path.display()));
    }
    image_asset_from_upload(&bytes).with_context(|| format!("{} is not an image", path.display()))
}

/// Resolves `/select` input: a 1-based version number or an entry id.
fn resolve_history_target(session: &Session, target: &str) -> Option<String> {
    let target = target.trim();
    if target.is_empty() {
        return None;
    }
    if let Ok(index) = target.parse::<usize>() {
        return session
            .history()
            .by_display_index(index)
            .map(|entry| entry.id.clone());
    }
    session
        .history()
        .get(target)
        .map(|entry| entry.id.clone())
}

fn download_selected(session: &Session, dir: &Path) -> Result<()> {
    let Some(artifact) = session.export_selected(timestamp_millis())? else {
        bail!("no generated design selected");
    };
    let (image_path, receipt_path) = write_export(dir, &artifact)?;
    session.record_export(&artifact, &image_path, &receipt_path);
    println!(
        "Saved version {} to {}",
        artifact.version,
        image_path.display()
    );
    Ok(())
}

fn report_outcome(session: &Session, outcome: &RequestOutcome) {
    match outcome {
        RequestOutcome::Appended { .. } => print_selection(session),
        RequestOutcome::Skipped => println!("Nothing to do."),
        RequestOutcome::Discarded => println!("Response discarded (superseded)."),
        RequestOutcome::Empty | RequestOutcome::Failed => {
            if let Some(message) = session.error_message() {
                println!("{message}");
            }
            if let Some(suggestion) = session.suggestion() {
                println!("Suggestion: {suggestion}");
            }
        }
    }
}

fn print_selection(session: &Session) {
    let Some(entry) = session.selected_entry() else {
        return;
    };
    println!("{}", format_history_line(session, entry, true));
    if let Some(suggestion) = session.suggestion() {
        println!("Suggestion: {suggestion}");
    }
}

fn print_history(session: &Session) {
    if session.history().is_empty() {
        println!("No versions yet.");
        return;
    }
    for entry in session.history().entries() {
        let selected = session.selected_history_id() == Some(entry.id.as_str());
        println!("{}", format_history_line(session, entry, selected));
    }
}

fn format_history_line(session: &Session, entry: &HistoryEntry, selected: bool) -> String {
    let marker = if selected { "*" } else { " " };
    let version = session.history().display_index(&entry.id).unwrap_or(0);
    let parent = entry
        .parent_id
        .as_deref()
        .and_then(|parent| session.history().display_index(parent))
        .map(|index| format!(" (from v{index})"))
        .unwrap_or_default();
    format!("{marker} v{version}{parent} {}: {}", short_id(&entry.id), entry.prompt)
}

fn print_status(session: &Session) {
    println!("{}", format_status_line(session));
    if session.status() == SessionStatus::Error {
        if let Some(message) = session.error_message() {
            println!("error: {message}");
        }
    }
}

fn format_status_line(session: &Session) -> String {
    let original = session
        .original_mime_type()
        .map(str::to_string)
        .unwrap_or_else(|| "none".to_string());
    let selected = session
        .selected_entry()
        .and_then(|entry| session.history().display_index(&entry.id))
        .map(|index| format!("v{index}"))
        .unwrap_or_else(|| "none".to_string());
    let in_flight = session
        .in_flight_request()
        .map(|(id, kind)| format!("{}#{id}", kind.as_str()))
        .unwrap_or_else(|| "none".to_string());
    format!(
        "status={} refining={} in_flight={} model={} original={} versions={} selected={}",
        session.status().as_str(),
        session.is_refining(),
        in_flight,
        session.model(),
        original,
        session.history().len(),
        selected
    )
}

fn print_presets() {
    for (idx, preset) in REFINE_PRESETS.iter().enumerate() {
        println!("{}. {preset}", idx + 1);
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
