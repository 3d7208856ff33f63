use clap::{Parser, Subcommand};
use lib::auth::{IdentityProvider, SessionFile, SessionHolder, SupabaseAuth, DEFAULT_USER_ID};
use lib::chat::{thread_preview, ChatCoordinator, ChatMessage, Role, RunSettings};
use lib::langgraph::{LangGraphClient, Thread};
use lib::threads::{DeleteOutcome, LocalStore, SelectionStore, ThreadDirectory};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "langchat")]
#[command(about = "Chat with a LangGraph agent deployment", long_about = None)]
struct Cli {
    /// Config file path (default: LANGCHAT_CONFIG_PATH or ~/.langchat/config.json)
    #[arg(long, short, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json (existing files are kept).
    Init,

    /// Sign in with email and password (the password is read from stdin).
    Login {
        #[arg(long, value_name = "EMAIL")]
        email: String,
    },

    /// Sign out and forget the stored session.
    Logout,

    /// Show the signed-in user.
    Whoami,

    /// List threads, newest first. The remembered thread is marked with `*`.
    Threads,

    /// Create a new thread and make it the remembered one.
    New,

    /// Delete a thread.
    Delete {
        #[arg(value_name = "THREAD_ID")]
        thread_id: String,
    },

    /// Interactive chat on the remembered (or given) thread.
    Chat {
        /// Thread to open instead of the remembered one.
        #[arg(long, value_name = "ID")]
        thread: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = cli.config;

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("langchat {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init) => run_init(config),
        Some(Commands::Login { email }) => run_login(config, email).await,
        Some(Commands::Logout) => run_logout(config).await,
        Some(Commands::Whoami) => run_whoami(config).await,
        Some(Commands::Threads) => run_threads(config).await,
        Some(Commands::New) => run_new(config).await,
        Some(Commands::Delete { thread_id }) => run_delete(config, thread_id).await,
        Some(Commands::Chat { thread }) => run_chat(config, thread).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Everything a command needs, wired from the config file.
struct App {
    auth: Option<SessionHolder>,
    selection: Arc<LocalStore>,
    chat: Arc<ChatCoordinator>,
}

impl App {
    async fn connect(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let (config, path) = lib::config::load_config(config_path)?;

        let auth = match (
            lib::config::resolve_auth_url(&config),
            lib::config::resolve_anon_key(&config),
        ) {
            (Some(url), Some(key)) => {
                let file = SessionFile::new(lib::config::session_path(&path));
                let provider = Arc::new(SupabaseAuth::new(url, key, Some(file)));
                Some(SessionHolder::start(provider).await)
            }
            _ => {
                log::info!("auth not configured, running as {}", DEFAULT_USER_ID);
                None
            }
        };

        let client = Arc::new(LangGraphClient::new(
            Some(lib::config::resolve_deployment_url(&config)),
            None,
        ));
        if let Some(holder) = &auth {
            client.follow_session(holder.subscribe());
        }
        let user_id = auth
            .as_ref()
            .map(SessionHolder::user_id_or_default)
            .unwrap_or_else(|| DEFAULT_USER_ID.to_string());

        let selection = Arc::new(LocalStore::new(lib::config::state_path(&path)));
        let directory = Arc::new(ThreadDirectory::new(
            client.clone(),
            selection.clone(),
            user_id,
            &config.threads,
        ));
        if let Some(holder) = &auth {
            directory.follow_session(holder.subscribe());
        }
        let chat = Arc::new(ChatCoordinator::new(
            directory,
            client,
            RunSettings::from_config(&config),
        ));
        Ok(Self {
            auth,
            selection,
            chat,
        })
    }

    fn auth(&self) -> anyhow::Result<&SessionHolder> {
        self.auth.as_ref().ok_or_else(|| {
            anyhow::anyhow!("auth is not configured (set auth.url and auth.anonKey or SUPABASE_URL and SUPABASE_ANON_KEY)")
        })
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_login(config_path: Option<PathBuf>, email: String) -> anyhow::Result<()> {
    let app = App::connect(config_path).await?;
    let auth = app.auth()?;

    eprint!("password: ");
    io::stderr().flush()?;
    let mut password = String::new();
    io::stdin().read_line(&mut password)?;
    let password = password.trim_end_matches(['\r', '\n']);

    let session = auth
        .provider()
        .sign_in_with_password(&email, password)
        .await?;
    println!(
        "signed in as {}",
        session.user.email.as_deref().unwrap_or(&session.user.id)
    );
    Ok(())
}

async fn run_logout(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let app = App::connect(config_path).await?;
    let auth = app.auth()?;
    if auth.session().is_none() {
        println!("not signed in");
        return Ok(());
    }
    auth.sign_out().await;
    println!("signed out");
    Ok(())
}

async fn run_whoami(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let app = App::connect(config_path).await?;
    match app.auth.as_ref().and_then(SessionHolder::user) {
        Some(user) => {
            println!("{}", user.id);
            if let Some(email) = user.email {
                println!("email: {}", email);
            }
            if let Some(name) = user.display_name {
                println!("name: {}", name);
            }
        }
        None => println!("not signed in (user id {})", DEFAULT_USER_ID),
    }
    Ok(())
}

async fn run_threads(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let app = App::connect(config_path).await?;
    let directory = app.chat.directory();
    directory.refresh().await;
    let remembered = app.selection.load();
    for thread in directory.threads().await {
        let marker = if remembered.as_deref() == Some(thread.thread_id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {}  {}  {}",
            marker,
            thread.thread_id,
            thread.created_at_raw().unwrap_or("-"),
            listing_line(&thread)
        );
    }
    Ok(())
}

/// Title plus a short preview of the conversation.
fn listing_line(thread: &Thread) -> String {
    let title = thread.title().unwrap_or("(untitled)");
    match thread_preview(thread) {
        Some(preview) if preview.chars().count() > 60 => {
            let short: String = preview.chars().take(59).collect();
            format!("{}  {}…", title, short)
        }
        Some(preview) => format!("{}  {}", title, preview),
        None => title.to_string(),
    }
}

async fn run_new(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let app = App::connect(config_path).await?;
    let thread = app
        .chat
        .create_new_thread()
        .await
        .ok_or_else(|| anyhow::anyhow!("could not create a thread"))?;
    println!("{}", thread.thread_id);
    Ok(())
}

async fn run_delete(config_path: Option<PathBuf>, thread_id: String) -> anyhow::Result<()> {
    let app = App::connect(config_path).await?;
    app.chat.directory().refresh().await;
    if let Some(remembered) = app.selection.load() {
        app.chat
            .directory()
            .set_current_thread_id(Some(remembered))
            .await;
    }
    let outcome = app.chat.delete_thread(&thread_id).await;
    app.chat.directory().cancel_pending_refresh();
    report_delete(&thread_id, &outcome)
}

fn report_delete(thread_id: &str, outcome: &DeleteOutcome) -> anyhow::Result<()> {
    match outcome {
        DeleteOutcome::Failed => anyhow::bail!("could not delete thread {}", thread_id),
        DeleteOutcome::Removed => println!("deleted {}", thread_id),
        DeleteOutcome::RemovedActive { next: Some(next) } => {
            println!("deleted {}, now on {}", thread_id, next)
        }
        DeleteOutcome::RemovedActive { next: None } => {
            println!("deleted {}, no thread selected", thread_id)
        }
    }
    Ok(())
}

fn print_messages(messages: &[ChatMessage]) {
    for m in messages {
        let prefix = match m.role {
            Role::User => ">",
            Role::Assistant => "<",
        };
        println!("{} {}", prefix, m.content.trim());
    }
}

async fn run_chat(config_path: Option<PathBuf>, thread: Option<String>) -> anyhow::Result<()> {
    let app = App::connect(config_path).await?;
    let chat = &app.chat;

    let started = chat.start().await;
    if let Some(id) = thread {
        chat.switch_thread(&id).await?;
    } else if started.is_none() {
        anyhow::bail!("no thread available");
    }
    if let Some(id) = chat.directory().current_thread_id().await {
        println!("thread {}", id);
    }
    print_messages(&chat.messages().await);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let (command, arg) = match input.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (input, ""),
        };
        match command {
            "/exit" | "/quit" => break,
            "/new" => match chat.create_new_thread().await {
                Some(t) => println!("thread {}", t.thread_id),
                None => eprintln!("could not create a thread"),
            },
            "/threads" => {
                chat.directory().refresh().await;
                let current = chat.directory().current_thread_id().await;
                for t in chat.directory().threads().await {
                    let marker = if current.as_deref() == Some(t.thread_id.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!("{} {}  {}", marker, t.thread_id, listing_line(&t));
                }
            }
            "/switch" => match chat.switch_thread(arg).await {
                Ok(()) => {
                    println!("thread {}", arg);
                    print_messages(&chat.messages().await);
                }
                Err(e) => eprintln!("switch failed: {}", e),
            },
            "/delete" => {
                let outcome = chat.delete_thread(arg).await;
                if let Err(e) = report_delete(arg, &outcome) {
                    eprintln!("{}", e);
                } else if matches!(outcome, DeleteOutcome::RemovedActive { .. }) {
                    print_messages(&chat.messages().await);
                }
            }
            _ => {
                let mut print_token = |t: &str| {
                    print!("{}", t);
                    let _ = io::stdout().flush();
                };
                print!("< ");
                let sent = chat
                    .send_message(input, Some(&mut print_token as &mut (dyn FnMut(&str) + Send)))
                    .await;
                println!();
                if let Err(e) = sent {
                    eprintln!("chat error: {}", e);
                }
            }
        }
    }

    chat.directory().cancel_pending_refresh();
    Ok(())
}
