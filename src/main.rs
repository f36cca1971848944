use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reflexity::{
    Config, ConfigBuilder, ModelInfo, ModelPuller, OllamaClient, OllamaClientBuilder,
    OllamaError, PullOutcome, PullUpdate, QueryObserver, QueryOutcome, QueryPipeline,
    SearchError, SearchResult,
};
use tokio_util::sync::CancellationToken;

const BANNER: &str = r"
 ____       __ _           _ _
|  _ \ ___ / _| | _____  _(_) |_ _   _
| |_) / _ \ |_| |/ _ \ \/ / | __| | | |
|  _ <  __/  _| |  __/>  <| | |_| |_| |
|_| \_\___|_| |_|\___/_/\_\_|\__|\__, |
                                 |___/";

/// reflexity - private web search answered by a local model
#[derive(Parser)]
#[command(name = "reflexity")]
#[command(about = "A privacy focused local AI web search tool")]
#[command(version)]
struct Cli {
    /// Ollama server URL (overrides OLLAMA_HOST)
    #[arg(long, value_name = "URL", global = true)]
    host: Option<String>,

    /// Search provider endpoint (overrides REFLEXITY_SEARCH_URL)
    #[arg(long, value_name = "URL", global = true)]
    search_url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available commands; without one the interactive menu starts
#[derive(Subcommand)]
enum Commands {
    /// Answer a single question from a web search
    Ask(AskCommand),
    /// Download a model into the local server
    Pull(PullCommand),
    /// List locally available models
    Models,
}

#[derive(Parser)]
struct AskCommand {
    /// The question to search for
    #[arg(value_name = "QUERY", required = true, num_args = 1..)]
    query: Vec<String>,

    /// Model to answer with (defaults to the first installed model)
    #[arg(short, long, value_name = "MODEL")]
    model: Option<String>,
}

#[derive(Parser)]
struct PullCommand {
    /// Model name, e.g. "llama3.2"
    #[arg(value_name = "NAME")]
    name: String,
}

/// Token of the operation Ctrl+C should stop, if any.
#[derive(Clone, Default)]
struct ActiveOperation(Arc<Mutex<Option<CancellationToken>>>);

impl ActiveOperation {
    fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.slot() = Some(token.clone());
        token
    }

    fn finish(&self) {
        *self.slot() = None;
    }

    fn current(&self) -> Option<CancellationToken> {
        self.slot().clone()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;
    let client = OllamaClientBuilder::new()
        .config(config.clone())
        .build()
        .context("Failed to create Ollama client")?;

    if !client.is_available().await {
        anyhow::bail!("Ollama is not running. Start it with 'ollama serve'.");
    }

    let active = ActiveOperation::default();
    spawn_interrupt_handler(active.clone());

    let app = App::new(config, client, active)?;
    match cli.command {
        Some(Commands::Ask(cmd)) => app.ask(&cmd).await,
        Some(Commands::Pull(cmd)) => app.pull(&cmd.name).await,
        Some(Commands::Models) => {
            app.print_models().await;
            Ok(())
        }
        None => app.interactive().await,
    }
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut builder = ConfigBuilder::new();
    if let Some(host) = &cli.host {
        builder = builder.ollama_host(host);
    }
    if let Some(url) = &cli.search_url {
        builder = builder.search_url(url);
    }
    builder.build().context("Invalid configuration")
}

/// Ctrl+C stops the running operation, or quits when nothing is running.
fn spawn_interrupt_handler(active: ActiveOperation) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::warn!("cannot listen for Ctrl+C: {e}");
                return;
            }
            match active.current() {
                Some(token) => token.cancel(),
                None => {
                    println!();
                    std::process::exit(130);
                }
            }
        }
    });
}

struct App {
    config: Config,
    client: Arc<OllamaClient>,
    pipeline: QueryPipeline,
    active: ActiveOperation,
}

impl App {
    fn new(config: Config, client: OllamaClient, active: ActiveOperation) -> Result<Self> {
        let client = Arc::new(client);
        let pipeline = QueryPipeline::new(&config, client.clone())
            .context("Failed to create web client")?
            .with_progress(true);
        Ok(Self {
            config,
            client,
            pipeline,
            active,
        })
    }

    /// Model catalog, empty when the server cannot list it.
    async fn models(&self) -> Vec<ModelInfo> {
        match self.client.list_models().await {
            Ok(models) => models,
            Err(e) => {
                log::warn!("cannot list models: {e}");
                Vec::new()
            }
        }
    }

    async fn print_models(&self) {
        let models = self.models().await;
        if models.is_empty() {
            println!("No models installed. Pull one with 'reflexity pull <name>'.");
        }
        for model in &models {
            println!("{}", describe_model(model));
        }
    }

    async fn ask(&self, cmd: &AskCommand) -> Result<()> {
        let model = match &cmd.model {
            Some(model) => model.clone(),
            None => self
                .models()
                .await
                .into_iter()
                .next()
                .map(|m| m.name)
                .context("No models installed. Pull one with 'reflexity pull <name>'.")?,
        };

        self.query(&cmd.query.join(" "), &model).await
    }

    /// Runs one query, printing sources and the streamed answer.
    async fn query(&self, query: &str, model: &str) -> Result<()> {
        let cancel = self.active.begin();
        let result = self
            .pipeline
            .run(query, model, &cancel, &mut ConsoleObserver::default())
            .await;
        self.active.finish();

        match result {
            Ok(QueryOutcome::Answered { .. }) => {
                println!();
                println!();
            }
            Ok(QueryOutcome::Cancelled) => {
                println!();
                println!("Response stopped by user.");
                println!();
            }
            Ok(QueryOutcome::Skipped) => {}
            Err(e) => {
                println!();
                println!("Ollama error: {e}");
                println!();
            }
        }
        Ok(())
    }

    async fn pull(&self, name: &str) -> Result<()> {
        let puller = ModelPuller::new(self.client.clone(), &self.config);
        let cancel = self.active.begin();

        println!();
        println!("Pulling {}...", name.trim());
        let result = puller.pull(name, &cancel, print_pull_update).await;
        self.active.finish();

        println!();
        match result {
            Ok(PullOutcome::Success { model }) => println!("{model} downloaded successfully."),
            Ok(PullOutcome::Cancelled) => println!("Pull of {} cancelled.", name.trim()),
            Err(OllamaError::Api { message }) => println!("Error: {message}"),
            Err(OllamaError::EmptyModelName) => println!("Error: No model name provided."),
            Err(e) => println!("Failed to pull {}: {e}", name.trim()),
        }
        Ok(())
    }

    async fn interactive(&self) -> Result<()> {
        loop {
            print_banner();
            let models = self.models().await;
            let Some(choice) = choose_option(&models).await? else {
                break;
            };

            match choice {
                MenuChoice::Exit => break,
                MenuChoice::Pull => {
                    let Some(name) = prompt("\nEnter model name to pull: ").await? else {
                        break;
                    };
                    self.pull(&name).await?;
                }
                MenuChoice::Model(index) => {
                    let model = &models[index].name;
                    println!();
                    println!("Using model: {model}");
                    println!();
                    if !self.query_loop(model).await? {
                        break;
                    }
                }
            }
        }

        println!();
        println!("Goodbye!");
        println!();
        Ok(())
    }

    /// Returns `false` when the user asked to quit, `true` to go back to the menu.
    async fn query_loop(&self, model: &str) -> Result<bool> {
        loop {
            println!(
                "Ask / Search for anything below (type 'back' to return to model selection, 'exit' to quit)"
            );
            println!();
            let Some(query) = prompt("Search: ").await? else {
                return Ok(false);
            };
            match query.to_lowercase().as_str() {
                "exit" => return Ok(false),
                "back" => return Ok(true),
                _ => self.query(&query, model).await?,
            }
        }
    }
}

/// Prints search progress and the answer as it streams.
#[derive(Default)]
struct ConsoleObserver {
    answering: bool,
}

impl QueryObserver for ConsoleObserver {
    fn search_failed(&mut self, error: &SearchError) {
        println!("Search error: {error}");
    }

    fn no_results(&mut self) {
        println!("No results found.");
    }

    fn sources_found(&mut self, results: &[SearchResult]) {
        println!();
        println!("Sources:");
        for (i, result) in results.iter().enumerate() {
            println!("[{}] {}", i + 1, result.title());
            println!(" {}", result.url());
        }
    }

    fn reading_pages(&mut self) {
        println!();
        println!("Reading pages...");
    }

    fn answer_started(&mut self) {
        println!();
    }

    fn fragment(&mut self, text: &str) {
        if !self.answering {
            self.answering = true;
            println!();
            println!();
            print!("AI Response: ");
        }
        print!("{text}");
        let _ = io::stdout().flush();
    }
}

fn print_pull_update(update: &PullUpdate) {
    match update {
        PullUpdate::Milestone(status) => {
            println!();
            println!("{status}");
        }
        PullUpdate::LayerStarted(layer) => {
            println!();
            println!("Downloading layer {layer}...");
        }
        PullUpdate::Progress(progress) => {
            print!("{progress}\r");
            let _ = io::stdout().flush();
        }
    }
}

enum MenuChoice {
    Model(usize),
    Pull,
    Exit,
}

fn print_banner() {
    for line in BANNER.lines().skip(1) {
        println!("\x1b[97m{line}\x1b[0m");
    }
    println!("\x1b[97m          A PRIVACY FOCUSED LOCAL AI WEB SEARCH TOOL\x1b[0m");
}

fn describe_model(model: &ModelInfo) -> String {
    match model.size_gb() {
        Some(gb) => format!("{} ({gb:.1} GB)", model.name),
        None => model.name.clone(),
    }
}

/// Shows the model menu until a valid option is picked. `None` on end of input.
async fn choose_option(models: &[ModelInfo]) -> Result<Option<MenuChoice>> {
    println!();
    println!("Choose a model / option:");
    for (i, model) in models.iter().enumerate() {
        println!(" {}. {}", i + 1, describe_model(model));
    }
    let pull = models.len() + 1;
    let exit = models.len() + 2;
    println!(" {pull}. Download (pull) a new model");
    println!(" {exit}. Exit the application");

    loop {
        println!();
        let Some(input) = prompt("Select option: ").await? else {
            return Ok(None);
        };
        match parse_choice(&input, models.len()) {
            Ok(choice) => return Ok(Some(choice)),
            Err(message) => {
                println!();
                println!("{message}");
            }
        }
    }
}

fn parse_choice(input: &str, model_count: usize) -> Result<MenuChoice, &'static str> {
    let choice: usize = input.trim().parse().map_err(|_| "Please enter a number.")?;
    match choice {
        n if (1..=model_count).contains(&n) => Ok(MenuChoice::Model(n - 1)),
        n if n == model_count + 1 => Ok(MenuChoice::Pull),
        n if n == model_count + 2 => Ok(MenuChoice::Exit),
        _ => Err("Invalid choice. Try Again."),
    }
}

/// Reads one trimmed line from stdin; `None` once input is closed.
async fn prompt(label: &str) -> Result<Option<String>> {
    print!("{label}");
    io::stdout().flush()?;

    let (read, line) = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        let read = io::stdin().read_line(&mut line)?;
        Ok::<_, io::Error>((read, line))
    })
    .await
    .context("stdin reader failed")??;

    Ok((read > 0).then(|| line.trim().to_string()))
}
