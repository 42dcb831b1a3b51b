use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mirage_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use mirage_contracts::models::{MediaKind, ModelRegistry};
use mirage_contracts::requests::{
    Credential, GenerationRequest, GenerationResult, DIMENSION_STEP, MIN_DIMENSION,
};
use mirage_contracts::session::{IMAGE_GALLERY_LIMIT, VIDEO_GALLERY_LIMIT};
use mirage_engine::{non_empty_env, StudioSession};
use serde_json::Value;

const DEFAULT_IMAGE_MODEL: &str = "black-forest-labs/FLUX.1-schnell";

#[derive(Debug, Parser)]
#[command(name = "mirage", version, about = "Text-to-media studio")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a single image and save it into the output directory.
    Run(RunArgs),
    /// Generate a single video clip and save it into the output directory.
    Video(VideoArgs),
    /// Interactive session: free text generates, slash commands steer.
    Chat(ChatArgs),
    /// List the registered model presets and their bounds.
    Models,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_IMAGE_MODEL)]
    model: String,
    #[arg(long, default_value_t = 768)]
    width: u32,
    #[arg(long, default_value_t = 768)]
    height: u32,
    #[arg(long, default_value_t = 20)]
    steps: u32,
    #[arg(long, default_value_t = 7.5)]
    guidance: f32,
    /// Negative means "let the provider choose".
    #[arg(long, default_value_t = -1)]
    seed: i64,
    #[arg(long)]
    negative: Option<String>,
    #[arg(long)]
    provider: Option<String>,
}

#[derive(Debug, Parser)]
struct VideoArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    provider: Option<String>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_IMAGE_MODEL)]
    model: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("mirage error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_image_once(args),
        Command::Video(args) => run_video_once(args),
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Models => {
            run_models();
            Ok(0)
        }
    }
}

fn credential_from_env() -> Credential {
    Credential::new(non_empty_env("HF_TOKEN"), non_empty_env("HF_PROVIDER"))
}

fn open_session(out: &Path, events: Option<PathBuf>) -> Result<StudioSession> {
    fs::create_dir_all(out)
        .with_context(|| format!("failed to create output directory {}", out.display()))?;
    let events_path = events.unwrap_or_else(|| out.join("events.jsonl"));
    StudioSession::new(events_path, credential_from_env())
}

fn run_image_once(args: RunArgs) -> Result<i32> {
    let mut session = open_session(&args.out, args.events.clone())?;
    let mut request = GenerationRequest::new(args.prompt.trim(), args.model.clone());
    request.width = snap_dimension(args.width);
    request.height = snap_dimension(args.height);
    request.steps = args.steps;
    request.guidance_scale = args.guidance;
    request.seed = Some(args.seed);
    request.negative_prompt = args.negative.clone();
    request.provider = args.provider.clone();

    let result = session.generate_image(&request)?;
    print_result(&result);
    match save_artifact(&args.out, &result, None)? {
        Some(path) => println!("Saved {}", path.display()),
        None => println!("No artifact bytes to save."),
    }
    session.finish()?;
    Ok(0)
}

fn run_video_once(args: VideoArgs) -> Result<i32> {
    let mut session = open_session(&args.out, args.events.clone())?;
    let model = match args.model.clone() {
        Some(model) => model,
        None => session
            .default_video_model()
            .context("no video model registered")?,
    };
    let mut request = GenerationRequest::new(args.prompt.trim(), model);
    request.provider = args.provider.clone();

    let result = session.generate_video(&request)?;
    print_result(&result);
    match save_artifact(&args.out, &result, None)? {
        Some(path) => println!("Saved {}", path.display()),
        None => println!("No artifact bytes to save."),
    }
    session.finish()?;
    Ok(0)
}

fn run_models() {
    let registry = ModelRegistry::new(None);
    for preset in registry.list() {
        println!(
            "{:<40} {:<6} max_steps={:<3} max_size={:<5} default_steps={}",
            preset.name,
            preset.kind.as_str(),
            preset.max_steps,
            preset.max_size,
            preset.default_steps
        );
    }
}

#[derive(Debug, Clone)]
struct ChatSettings {
    model: String,
    width: u32,
    height: u32,
    steps: u32,
    guidance_scale: f32,
    seed: i64,
    negative_prompt: Option<String>,
    provider: Option<String>,
}

impl ChatSettings {
    fn request(&self, prompt: &str) -> GenerationRequest {
        let mut request = GenerationRequest::new(prompt, self.model.clone());
        request.width = self.width;
        request.height = self.height;
        request.steps = self.steps;
        request.guidance_scale = self.guidance_scale;
        request.seed = Some(self.seed);
        request.negative_prompt = self.negative_prompt.clone();
        request.provider = self.provider.clone();
        request
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut session = open_session(&args.out, args.events.clone())?;
    let default_steps = session
        .registry()
        .get(&args.model)
        .map(|preset| preset.default_steps)
        .unwrap_or(20);
    let mut settings = ChatSettings {
        model: args.model.clone(),
        width: 768,
        height: 768,
        steps: default_steps,
        guidance_scale: 7.5,
        seed: -1,
        negative_prompt: None,
        provider: None,
    };

    println!("Mirage chat started. Type /help for commands.");
    if session.credential().has_token() {
        println!("Token: found");
    } else {
        println!("Token: not set (demo mode)");
    }

    let stdin = io::stdin();
    let mut line = String::new();
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
            "noop" => continue,
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            }
            "generate" => {
                let Some(prompt) = intent.prompt.as_deref() else {
                    continue;
                };
                match session.generate_image(&settings.request(prompt)) {
                    Ok(result) => print_result(&result),
                    Err(err) => println!("Generation rejected: {err:#}"),
                }
            }
            "generate_video" => {
                let Some(prompt) = intent.prompt.as_deref() else {
                    println!("/video requires a prompt");
                    continue;
                };
                let Some(model) = session.default_video_model() else {
                    println!("No video model registered.");
                    continue;
                };
                let mut request = GenerationRequest::new(prompt, model);
                request.seed = Some(settings.seed);
                request.provider = settings.provider.clone();
                match session.generate_video(&request) {
                    Ok(result) => print_result(&result),
                    Err(err) => println!("Generation rejected: {err:#}"),
                }
            }
            "set_model" => {
                let Some(model) = value_as_non_empty_string(intent.command_args.get("model"))
                else {
                    println!("Current model: {}", settings.model);
                    continue;
                };
                match session.registry().get(&model) {
                    Some(preset) => {
                        settings.steps = settings.steps.min(preset.max_steps);
                        settings.model = model;
                        println!("Model set to {}", settings.model);
                    }
                    None => println!("Unknown model {model}. /models lists the registry."),
                }
            }
            "set_provider" => {
                match value_as_non_empty_string(intent.command_args.get("provider")) {
                    Some(provider) => {
                        println!("Provider override set to {provider}");
                        settings.provider = Some(provider);
                    }
                    None => {
                        settings.provider = None;
                        println!("Provider override cleared");
                    }
                }
            }
            "set_negative_prompt" => {
                match value_as_non_empty_string(intent.command_args.get("text")) {
                    Some(text) => {
                        println!("Negative prompt set");
                        settings.negative_prompt = Some(text);
                    }
                    None => {
                        settings.negative_prompt = None;
                        println!("Negative prompt cleared");
                    }
                }
            }
            "set_steps" => match parse_setting::<u32>(intent.command_args.get("value")) {
                Some(value) => {
                    settings.steps = value;
                    println!("Steps set to {value}");
                }
                None => println!("usage: /steps <n>"),
            },
            "set_width" => match parse_setting::<u32>(intent.command_args.get("value")) {
                Some(value) => {
                    settings.width = snap_dimension(value);
                    println!("Width set to {}", settings.width);
                }
                None => println!("usage: /width <px>"),
            },
            "set_height" => match parse_setting::<u32>(intent.command_args.get("value")) {
                Some(value) => {
                    settings.height = snap_dimension(value);
                    println!("Height set to {}", settings.height);
                }
                None => println!("usage: /height <px>"),
            },
            "set_guidance" => match parse_setting::<f32>(intent.command_args.get("value")) {
                Some(value) => {
                    settings.guidance_scale = value.clamp(0.0, 12.0);
                    println!("Guidance scale set to {}", settings.guidance_scale);
                }
                None => println!("usage: /guidance <x>"),
            },
            "set_seed" => match parse_setting::<i64>(intent.command_args.get("value")) {
                Some(value) => {
                    settings.seed = value;
                    if value < 0 {
                        println!("Seed cleared (provider chooses)");
                    } else {
                        println!("Seed set to {value}");
                    }
                }
                None => println!("usage: /seed <n|-1>"),
            },
            "show_gallery" => print_gallery(&session),
            "clear_gallery" => {
                session.clear_gallery()?;
                println!("Gallery cleared.");
            }
            "save_artifact" => {
                let path_override = value_as_non_empty_string(intent.command_args.get("path"))
                    .map(PathBuf::from);
                let Some(entry) = session.gallery().latest() else {
                    println!("Nothing generated yet.");
                    continue;
                };
                let result = entry.result.clone();
                match save_artifact(&args.out, &result, path_override)? {
                    Some(path) => println!("Saved {}", path.display()),
                    None => println!("Latest artifact is empty; nothing to save."),
                }
            }
            "show_status" => {
                let token = if session.credential().has_token() {
                    "found"
                } else {
                    "not set (demo mode)"
                };
                println!("Token: {token}");
                println!("Model: {}", settings.model);
                println!(
                    "Provider override: {}",
                    settings.provider.as_deref().unwrap_or("none")
                );
                println!(
                    "Size: {}x{}  Steps: {}  Guidance: {}  Seed: {}",
                    settings.width,
                    settings.height,
                    settings.steps,
                    settings.guidance_scale,
                    settings.seed
                );
                println!("Gallery entries: {}", session.gallery().len());
            }
            "list_models" => run_models(),
            "quit" => break,
            "unknown" => {
                let command = value_as_non_empty_string(intent.command_args.get("command"))
                    .unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
            _ => {}
        }
    }

    session.finish()?;
    println!("Session closed.");
    Ok(())
}

fn print_result(result: &GenerationResult) {
    let summary = artifact_summary(result);
    if result.status.is_empty() {
        println!(
            "Generated {} via {} [{}] ({summary})",
            result.kind.as_str(),
            result.model,
            result.artifact.label()
        );
    } else {
        println!(
            "Generated {} via {} [{}] ({summary}): {}",
            result.kind.as_str(),
            result.model,
            result.artifact.label(),
            result.status
        );
    }
}

fn artifact_summary(result: &GenerationResult) -> String {
    match result.artifact.mime_type() {
        Some(mime) if mime.starts_with("image/") => {
            if let Ok(decoded) = image::load_from_memory(result.artifact.bytes()) {
                format!("{mime} {}x{}", decoded.width(), decoded.height())
            } else {
                format!("{mime} {} bytes", result.artifact.bytes().len())
            }
        }
        Some(mime) => format!("{mime} {} bytes", result.artifact.bytes().len()),
        None => "empty".to_string(),
    }
}

fn print_gallery(session: &StudioSession) {
    let gallery = session.gallery();
    if gallery.is_empty() {
        println!("Gallery is empty.");
        return;
    }
    let mut images = 0usize;
    let mut videos = 0usize;
    for entry in gallery.recent(gallery.len()) {
        let shown = match entry.result.kind {
            MediaKind::Image => {
                images += 1;
                images <= IMAGE_GALLERY_LIMIT
            }
            MediaKind::Video => {
                videos += 1;
                videos <= VIDEO_GALLERY_LIMIT
            }
        };
        if !shown {
            continue;
        }
        let short = entry.id.get(..8).unwrap_or(entry.id.as_str());
        let status = if entry.result.status.is_empty() {
            "ok"
        } else {
            entry.result.status.as_str()
        };
        println!(
            "#{short} [{}] {} {}: {}",
            entry.result.kind.as_str(),
            entry.result.artifact.label(),
            entry.result.model,
            status
        );
    }
}

fn artifact_filename(result: &GenerationResult) -> &'static str {
    match result.artifact.mime_type() {
        Some("image/png") => "generation.png",
        Some("image/gif") => "generation.gif",
        Some("video/mp4") => "generation.mp4",
        Some(mime) if mime.starts_with("image/") => "generation.png",
        Some(mime) if mime.starts_with("video/") => "generation.mp4",
        _ => "generation.bin",
    }
}

fn save_artifact(
    out: &Path,
    result: &GenerationResult,
    path_override: Option<PathBuf>,
) -> Result<Option<PathBuf>> {
    if result.artifact.is_empty() {
        return Ok(None);
    }
    let path = path_override.unwrap_or_else(|| out.join(artifact_filename(result)));
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    fs::write(&path, result.artifact.bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(Some(path))
}

/// Rounds to the slider step the interactive surface exposes; the engine's
/// clamp still owns the inclusive bounds.
fn snap_dimension(value: u32) -> u32 {
    let snapped = ((value + DIMENSION_STEP / 2) / DIMENSION_STEP) * DIMENSION_STEP;
    snapped.max(MIN_DIMENSION)
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn parse_setting<T: std::str::FromStr>(value: Option<&Value>) -> Option<T> {
    value_as_non_empty_string(value).and_then(|raw| raw.parse::<T>().ok())
}
