use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use jobs::{JobStatus, JobsHandle, PollConfig, TokioTimer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storyboard_text::{image_schedule, parse_dialogue_prompt, parse_shot_prompts, Storyboard};
use studio_client::{
    FilePart, HistoryQuery, MaterialKind, MaterialRef, MaterialSelectionSession, Shot, ShotCache,
    ShotPatch, StudioClient, StudioConfig, TaskResult, ToolRequest, ToolType,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "studio-cli")]
#[command(about = "Storyboard studio CLI - parse storyboard text and run generation tools")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend API base URL, overrides config and STUDIO_API_URL
    #[arg(long, global = true)]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a storyboard text file and print it as JSON
    Storyboard {
        file: PathBuf,

        /// Print the normalized text instead of JSON
        #[arg(long)]
        normalize: bool,
    },

    /// Parse a shot prompt text file and print the five sections as JSON
    Prompts { file: PathBuf },

    /// Parse dialogue cues and print them as JSON
    Dialogue {
        file: PathBuf,

        /// Image display duration in seconds; prints the subtitle schedule
        #[arg(long)]
        image_duration: Option<f64>,
    },

    /// Create a tool task and poll it to completion
    RunTool {
        /// Tool id (e.g. generate_script, text_to_image)
        tool: String,

        /// Form field as name=value, repeatable
        #[arg(short, long = "field")]
        fields: Vec<String>,

        /// File upload as field=path, repeatable
        #[arg(long = "file")]
        files: Vec<String>,
    },

    /// Generate a storyboard from a script and save it to an episode
    GenerateStoryboard {
        work_id: String,
        episode_id: String,

        /// Script text file
        #[arg(short, long)]
        script: PathBuf,

        /// Expected total duration in seconds
        #[arg(long, default_value = "60")]
        expected_duration: u32,

        /// Target duration of one shot in seconds
        #[arg(long, default_value = "5")]
        shot_duration: u32,

        /// Character material by name, repeatable
        #[arg(long = "character")]
        characters: Vec<String>,

        /// Scene material by name, repeatable
        #[arg(long = "scene")]
        scenes: Vec<String>,

        /// Prop material by name, repeatable
        #[arg(long = "prop")]
        props: Vec<String>,

        /// Print the generated text without saving it
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate the five prompts of episode shots and save them
    ShotPrompts {
        work_id: String,
        episode_id: String,

        /// Shot id
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        shot: Option<String>,

        /// Every shot, in storyboard order
        #[arg(long)]
        all: bool,
    },

    /// Turn an episode's saved storyboard text into shots
    Confirm { work_id: String, episode_id: String },

    /// List tool history, or act on one record
    History {
        #[arg(long)]
        tool: Option<String>,

        #[arg(long, default_value = "1")]
        page: u32,

        /// Print one record as JSON
        #[arg(long, value_name = "ID", conflicts_with_all = ["delete", "reuse"])]
        show: Option<String>,

        /// Delete one record
        #[arg(long, value_name = "ID", conflicts_with = "reuse")]
        delete: Option<String>,

        /// Print the inputs to re-run a record with
        #[arg(long, value_name = "ID")]
        reuse: Option<String>,
    },

    /// Write the effective configuration to the config file
    SaveConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(StudioConfig::default_path);
    let mut config = StudioConfig::load_or_default(&config_path)?.apply_env();
    if let Some(url) = &cli.api_url {
        config = config.with_api_url(url.clone());
    }

    match cli.command {
        Commands::Storyboard { file, normalize } => storyboard_command(&file, normalize),
        Commands::Prompts { file } => prompts_command(&file),
        Commands::Dialogue {
            file,
            image_duration,
        } => dialogue_command(&file, image_duration),
        Commands::RunTool {
            tool,
            fields,
            files,
        } => run_tool_command(&config, &tool, &fields, &files).await,
        Commands::GenerateStoryboard {
            work_id,
            episode_id,
            script,
            expected_duration,
            shot_duration,
            characters,
            scenes,
            props,
            dry_run,
        } => {
            let picks = [
                (MaterialKind::Character, characters),
                (MaterialKind::Scene, scenes),
                (MaterialKind::Prop, props),
            ];
            generate_storyboard_command(
                &config,
                &work_id,
                &episode_id,
                &script,
                expected_duration,
                shot_duration,
                &picks,
                dry_run,
            )
            .await
        }
        Commands::ShotPrompts {
            work_id,
            episode_id,
            shot,
            all,
        } => shot_prompts_command(&config, &work_id, &episode_id, shot.as_deref(), all).await,
        Commands::Confirm {
            work_id,
            episode_id,
        } => confirm_command(&config, &work_id, &episode_id).await,
        Commands::History {
            tool,
            page,
            show,
            delete,
            reuse,
        } => {
            let client = StudioClient::new(&config)?;
            match (show, delete, reuse) {
                (Some(id), _, _) => print_json(&client.get_history(&id).await?),
                (_, Some(id), _) => {
                    client.delete_history(&id).await?;
                    info!("History record {} deleted", id);
                    Ok(())
                }
                (_, _, Some(id)) => print_json(&client.reuse_history(&id).await?),
                _ => history_command(&client, tool.as_deref(), page).await,
            }
        }
        Commands::SaveConfig => {
            config.save(&config_path)?;
            info!("Configuration written to {:?}", config_path);
            Ok(())
        }
    }
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn storyboard_command(file: &Path, normalize: bool) -> Result<()> {
    let storyboard = Storyboard::parse(&read_text(file)?);
    info!(
        "Parsed {} shots, {}s total",
        storyboard.shots.len(),
        storyboard.total_duration()
    );
    if normalize {
        print!("{storyboard}");
        Ok(())
    } else {
        print_json(&storyboard)
    }
}

fn prompts_command(file: &Path) -> Result<()> {
    let prompts = parse_shot_prompts(&read_text(file)?);
    if prompts.is_empty() {
        warn!("No prompt sections found in {:?}", file);
    }
    print_json(&prompts)
}

fn dialogue_command(file: &Path, image_duration: Option<f64>) -> Result<()> {
    let cues = parse_dialogue_prompt(&read_text(file)?);
    info!("Parsed {} dialogue cues", cues.len());
    match image_duration {
        Some(duration) => {
            let schedule: Vec<_> = image_schedule(&cues, duration)
                .into_iter()
                .map(|window| {
                    serde_json::json!({
                        "character": window.cue.character,
                        "text": window.cue.text,
                        "show_at": window.show_at,
                        "hide_at": window.hide_at,
                    })
                })
                .collect();
            print_json(&schedule)
        }
        None => print_json(&cues),
    }
}

fn split_pair(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value)),
        _ => bail!("expected name=value, got '{raw}'"),
    }
}

fn build_request(tool: ToolType, fields: &[String], files: &[String]) -> Result<ToolRequest> {
    let mut request = ToolRequest::new(tool);
    for raw in fields {
        let (name, value) = split_pair(raw)?;
        request.set_field(name, value);
    }
    for raw in files {
        let (field, path) = split_pair(raw)?;
        let part = FilePart::from_path(field, Path::new(path))
            .with_context(|| format!("read upload {path}"))?;
        request = request.file(part);
    }
    Ok(request)
}

/// Submits `request` and blocks until its slot reports a terminal status.
async fn run_to_completion(config: &StudioConfig, request: &ToolRequest) -> Result<TaskResult> {
    let client = Arc::new(StudioClient::new(config)?);
    let jobs = JobsHandle::new(client, Arc::new(TokioTimer), PollConfig::from(config));

    info!(
        "Submitting {} ({}), giving up after {:?}",
        request.tool.display_name(),
        request.tool,
        config.poll_budget()
    );
    let (job_id, _loop) = jobs.submit("cli", request).await?;
    info!("Task {} created", job_id);

    let rx = jobs.rx_events.clone();
    let terminal = tokio::task::spawn_blocking(move || {
        for event in rx.iter() {
            match &event.status {
                JobStatus::Progress(progress) => info!("{}: {}%", event.job_id, progress),
                status if status.is_terminal() => return Some(event.status),
                _ => {}
            }
        }
        None
    })
    .await?;

    match terminal {
        Some(JobStatus::Succeeded(result)) => Ok(result),
        Some(status) => {
            if let JobStatus::Failed(failure) = &status {
                if !failure.diagnostics.is_empty() {
                    warn!("Task details: {}", serde_json::to_string(&failure.diagnostics)?);
                }
            }
            bail!(status.notice().unwrap_or_else(|| "任务已取消".to_string()))
        }
        None => bail!("job event channel closed"),
    }
}

async fn run_tool_command(
    config: &StudioConfig,
    tool: &str,
    fields: &[String],
    files: &[String],
) -> Result<()> {
    let tool: ToolType = tool.parse()?;
    let request = build_request(tool, fields, files)?;
    request.validate()?;
    let result = run_to_completion(config, &request).await?;
    print_json(&result)
}

/// Picks `names` out of the backend listing, in the order given.
/// Returns the names that matched no material.
fn select_materials(
    materials: &mut MaterialSelectionSession,
    kind: MaterialKind,
    available: &[MaterialRef],
    names: &[String],
) -> Vec<String> {
    let mut unknown = Vec::new();
    for name in names {
        match available.iter().find(|m| m.name == name.trim()) {
            Some(material) => {
                materials.add(kind, material.clone());
            }
            None => unknown.push(name.clone()),
        }
    }
    unknown
}

async fn resolve_materials(
    client: &StudioClient,
    picks: &[(MaterialKind, Vec<String>)],
) -> Result<MaterialSelectionSession> {
    let mut materials = MaterialSelectionSession::new();
    for (kind, names) in picks {
        if names.is_empty() {
            continue;
        }
        let available = client.list_materials(*kind).await?;
        let unknown = select_materials(&mut materials, *kind, &available, names);
        if !unknown.is_empty() {
            bail!("unknown {} materials: {}", kind.display_name(), unknown.join(", "));
        }
    }
    Ok(materials)
}

#[allow(clippy::too_many_arguments)]
async fn generate_storyboard_command(
    config: &StudioConfig,
    work_id: &str,
    episode_id: &str,
    script: &Path,
    expected_duration: u32,
    shot_duration: u32,
    picks: &[(MaterialKind, Vec<String>)],
    dry_run: bool,
) -> Result<()> {
    let client = StudioClient::new(config)?;
    let materials = resolve_materials(&client, picks).await?;
    if !materials.is_empty() {
        info!("Using materials: {}", materials.all_names().join(", "));
    }
    let request = ToolRequest::single_shot_storyboard(
        read_text(script)?,
        expected_duration,
        shot_duration,
        &materials,
    );
    let result = run_to_completion(config, &request).await?;
    let text = result
        .output
        .text
        .context("storyboard task returned no text")?;

    let storyboard = Storyboard::parse(&text);
    info!(
        "Generated {} shots, {}s total",
        storyboard.shots.len(),
        storyboard.total_duration()
    );
    if storyboard.shots.is_empty() {
        warn!("Generated text contains no shot lines");
    }

    if dry_run {
        println!("{text}");
        return Ok(());
    }
    client.save_storyboard_text(work_id, episode_id, &text).await?;
    info!("Storyboard saved to {}/{}", work_id, episode_id);
    Ok(())
}

async fn confirm_command(config: &StudioConfig, work_id: &str, episode_id: &str) -> Result<()> {
    let client = StudioClient::new(config)?;
    let record = client.confirm_storyboard(work_id, episode_id).await?;
    info!("Confirmed storyboard with {} shots", record.shots.len());
    print_json(&record)
}

/// Pause between consecutive shots of a batch.
const SHOT_GAP: Duration = Duration::from_millis(500);

/// Shot ids to generate prompts for, in storyboard order.
fn select_shots(shots: &[Shot], shot: Option<&str>, all: bool) -> Result<Vec<String>> {
    match (shot, all) {
        (Some(id), _) => {
            if !shots.iter().any(|s| s.id == id) {
                bail!("shot {id} not found in this episode");
            }
            Ok(vec![id.to_string()])
        }
        (None, true) => Ok(shots.iter().map(|s| s.id.clone()).collect()),
        (None, false) => bail!("pass --shot ID or --all"),
    }
}

async fn shot_prompts_command(
    config: &StudioConfig,
    work_id: &str,
    episode_id: &str,
    shot: Option<&str>,
    all: bool,
) -> Result<()> {
    let client = StudioClient::new(config)?;
    let record = client.get_storyboard(work_id, episode_id).await?;
    let mut cache = ShotCache::new(work_id, episode_id, record.shots);
    let targets = select_shots(cache.shots(), shot, all)?;
    if targets.is_empty() {
        bail!("episode has no shots, confirm the storyboard first");
    }

    let mut failed = 0;
    for (i, shot_id) in targets.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(SHOT_GAP).await;
        }
        let request = match cache.prompt_request(shot_id) {
            Ok(request) => request,
            Err(err) => {
                warn!("Skipping shot {}: {}", shot_id, err);
                failed += 1;
                continue;
            }
        };
        let prompts = match run_to_completion(config, &request).await {
            Ok(result) => parse_shot_prompts(result.output.text.as_deref().unwrap_or_default()),
            Err(err) => {
                warn!("Prompt generation for shot {} failed: {:#}", shot_id, err);
                failed += 1;
                continue;
            }
        };
        if prompts.is_empty() {
            warn!("No prompt sections generated for shot {}", shot_id);
            failed += 1;
            continue;
        }
        cache.apply(shot_id, ShotPatch::all_prompts(&prompts))?;
        info!("Shot {} prompts generated ({}/{})", shot_id, i + 1, targets.len());
    }

    let report = cache.flush(&client).await;
    for (shot_id, err) in &report.failed {
        warn!("Saving shot {} failed: {}", shot_id, err);
    }
    info!(
        "Saved {} shots, {} failed to generate, {} failed to save",
        report.written.len(),
        failed,
        report.failed.len()
    );
    if failed > 0 || !report.is_clean() {
        bail!("not every shot got its prompts");
    }
    Ok(())
}

async fn history_command(client: &StudioClient, tool: Option<&str>, page: u32) -> Result<()> {
    let query = match tool {
        Some(tool) => HistoryQuery::for_tool(tool.parse()?),
        None => HistoryQuery::default(),
    }
    .page(page);
    let history = client.list_history(&query).await?;
    for record in &history.records {
        let when = record
            .created_at()
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let label = record
            .tool()
            .map(|tool| tool.display_name())
            .unwrap_or(record.tool_type.as_str());
        println!("{}  {}  {}", record.record_id, when, label);
    }
    if history.has_more() {
        info!("More records on page {}", history.page + 1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pair() {
        assert_eq!(split_pair("prompt=雨夜=街道").unwrap(), ("prompt", "雨夜=街道"));
        assert_eq!(split_pair(" duration =5").unwrap(), ("duration", "5"));
        assert!(split_pair("=5").is_err());
        assert!(split_pair("novalue").is_err());
    }

    #[test]
    fn test_build_request_fields() {
        let fields = vec!["text=雨声".to_string(), "duration=5".to_string()];
        let request = build_request(ToolType::TextToAudio, &fields, &[]).unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(request.get("duration"), Some("5"));
    }

    #[test]
    fn test_cli_parses_run_tool() {
        let cli = Cli::try_parse_from([
            "studio-cli",
            "run-tool",
            "text_to_audio",
            "-f",
            "text=雨声",
            "--field",
            "duration=5",
        ])
        .unwrap();
        match cli.command {
            Commands::RunTool { tool, fields, .. } => {
                assert_eq!(tool, "text_to_audio");
                assert_eq!(fields.len(), 2);
            }
            _ => panic!("expected run-tool"),
        }
    }

    #[test]
    fn test_cli_parses_shot_prompts() {
        let cli = Cli::try_parse_from(["studio-cli", "shot-prompts", "w1", "e1", "--all"]).unwrap();
        match cli.command {
            Commands::ShotPrompts { shot, all, .. } => {
                assert_eq!(shot, None);
                assert!(all);
            }
            _ => panic!("expected shot-prompts"),
        }
        assert!(Cli::try_parse_from(["studio-cli", "shot-prompts", "w1", "e1"]).is_err());
        assert!(Cli::try_parse_from([
            "studio-cli",
            "shot-prompts",
            "w1",
            "e1",
            "--shot",
            "s1",
            "--all"
        ])
        .is_err());
    }

    #[test]
    fn test_cli_parses_history_actions() {
        let cli = Cli::try_parse_from(["studio-cli", "history", "--reuse", "r9"]).unwrap();
        match cli.command {
            Commands::History { reuse, show, .. } => {
                assert_eq!(reuse.as_deref(), Some("r9"));
                assert_eq!(show, None);
            }
            _ => panic!("expected history"),
        }
        assert!(
            Cli::try_parse_from(["studio-cli", "history", "--show", "r1", "--delete", "r1"])
                .is_err()
        );
    }

    #[test]
    fn test_cli_parses_material_picks() {
        let cli = Cli::try_parse_from([
            "studio-cli",
            "generate-storyboard",
            "w1",
            "e1",
            "-s",
            "script.txt",
            "--character",
            "小明",
            "--character",
            "小红",
            "--prop",
            "雨伞",
        ])
        .unwrap();
        match cli.command {
            Commands::GenerateStoryboard {
                characters,
                scenes,
                props,
                ..
            } => {
                assert_eq!(characters, vec!["小明", "小红"]);
                assert!(scenes.is_empty());
                assert_eq!(props, vec!["雨伞"]);
            }
            _ => panic!("expected generate-storyboard"),
        }
    }

    #[test]
    fn test_select_materials_by_name() {
        let available = vec![MaterialRef::new("c1", "小明"), MaterialRef::new("c2", "小红")];
        let mut materials = MaterialSelectionSession::new();
        let names = vec!["小红".to_string(), " 小明".to_string(), "老王".to_string()];
        let unknown = select_materials(&mut materials, MaterialKind::Character, &available, &names);
        assert_eq!(unknown, vec!["老王"]);
        assert_eq!(materials.names(MaterialKind::Character), vec!["小红", "小明"]);
    }

    #[test]
    fn test_select_shots() {
        let shots = vec![Shot::new("s1"), Shot::new("s2")];
        assert_eq!(select_shots(&shots, None, true).unwrap(), vec!["s1", "s2"]);
        assert_eq!(select_shots(&shots, Some("s2"), false).unwrap(), vec!["s2"]);
        assert!(select_shots(&shots, Some("s9"), false).is_err());
        assert!(select_shots(&shots, None, false).is_err());
    }
}
