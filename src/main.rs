use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use taskdeck::api::{
  ApiClient, CreateTaskInput, HttpTransport, Priority, Status, Task, TaskFilter, TaskPage,
  UpdateTaskInput,
};
use taskdeck::auth::{Auth, ClearSessionRedirect};
use taskdeck::config::Config;
use taskdeck::error::ApiError;
use taskdeck::highlight::{highlight_matches, render_ansi};
use taskdeck::logging;
use taskdeck::query::QueryCache;
use taskdeck::recent::RecentSearches;
use taskdeck::search::SearchGate;
use taskdeck::storage::SqliteStorage;
use taskdeck::tasks::TaskStore;

/// Password source when `--password` is not given.
const PASSWORD_ENV: &str = "TASKDECK_PASSWORD";

#[derive(Parser, Debug)]
#[command(name = "taskdeck")]
#[command(about = "Manage tasks on a taskdeck server from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/taskdeck/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Log in and remember the session
  Login {
    email: String,
    /// Falls back to $TASKDECK_PASSWORD
    #[arg(long)]
    password: Option<String>,
  },
  /// Create an account and log in
  Register {
    name: String,
    email: String,
    #[arg(long)]
    password: Option<String>,
  },
  Logout,
  /// Renew the saved session
  Refresh,
  /// Show the logged-in user
  Whoami,
  /// List tasks
  List {
    #[command(flatten)]
    filter: FilterArgs,
  },
  /// Search task titles and descriptions
  Search {
    query: String,
    #[command(flatten)]
    filter: FilterArgs,
  },
  Create {
    title: String,
    #[arg(short, long)]
    description: Option<String>,
    #[arg(short, long)]
    priority: Option<Priority>,
    #[arg(short, long)]
    status: Option<Status>,
    /// YYYY-MM-DD
    #[arg(long)]
    due: Option<String>,
  },
  Update {
    id: String,
    #[arg(short, long)]
    title: Option<String>,
    #[arg(short, long)]
    description: Option<String>,
    #[arg(short, long)]
    priority: Option<Priority>,
    #[arg(short, long)]
    status: Option<Status>,
    #[arg(long)]
    due: Option<String>,
  },
  Delete {
    id: String,
  },
  /// Show recent searches
  Recent {
    /// Forget them instead
    #[arg(long)]
    clear: bool,
  },
}

#[derive(clap::Args, Debug)]
struct FilterArgs {
  #[arg(short, long)]
  priority: Option<Priority>,
  #[arg(short, long)]
  status: Option<Status>,
}

impl FilterArgs {
  fn into_filter(self) -> Option<TaskFilter> {
    TaskFilter::normalize(Some(TaskFilter {
      priority: self.priority,
      status: self.status,
    }))
  }
}

/// Everything a command needs, wired from the config.
struct Context {
  store: TaskStore,
  auth: Auth,
  recent: Arc<RecentSearches>,
  config: Config,
}

impl Context {
  fn new(config: Config, storage: Arc<SqliteStorage>) -> Result<Self> {
    let base_url = config.api.base_url.clone();
    let session = storage.session(&base_url)?;
    let redirect = Arc::new(ClearSessionRedirect::new(storage.clone(), base_url.clone()));
    let transport = HttpTransport::new(
      &base_url,
      session.as_ref().map(|s| s.cookies.as_str()),
      redirect,
    )?;

    let api = ApiClient::new(Arc::new(transport));
    let cache = QueryCache::with_options(config.cache.options());
    let store =
      TaskStore::new(api.clone(), cache.clone()).with_mutation_retry(config.cache.mutation_retry());
    let auth = Auth::new(api, cache, base_url).with_storage(storage.clone());
    let recent = Arc::new(RecentSearches::load(storage, config.search.recent_limit));

    Ok(Self {
      store,
      auth,
      recent,
      config,
    })
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let _log_guard = match logging::default_log_dir() {
    Some(dir) => Some(logging::init(&dir)?),
    None => None,
  };
  debug!(base_url = %config.api.base_url, "Starting");

  let storage = Arc::new(SqliteStorage::open()?);
  let ctx = Context::new(config, storage)?;

  run(ctx, args.command).await.map_err(report)
}

async fn run(ctx: Context, command: Command) -> Result<(), ApiError> {
  match command {
    Command::Login { email, password } => {
      let password = password_or_env(password)?;
      let user = ctx.auth.login(&email, &password).await?;
      println!("Logged in as {} <{}>", user.name, user.email);
    }
    Command::Register {
      name,
      email,
      password,
    } => {
      let password = password_or_env(password)?;
      let user = ctx.auth.register(&name, &email, &password).await?;
      println!("Registered {} <{}>", user.name, user.email);
    }
    Command::Logout => {
      ctx.auth.logout().await?;
      println!("Logged out");
    }
    Command::Refresh => {
      ctx.auth.refresh().await?;
      println!("Session refreshed");
    }
    Command::Whoami => {
      let user = ctx.auth.current_user().await?;
      println!("{} <{}>", user.name, user.email);
    }
    Command::List { filter } => {
      let page = ctx.store.list(filter.into_filter()).await?;
      print_page(&page, None);
    }
    Command::Search { query, filter } => {
      let min_length = ctx.config.search.min_length;
      if query.trim().chars().count() < min_length {
        println!("Type at least {} characters to search", min_length);
        return Ok(());
      }

      let gate = SearchGate::new(ctx.store.clone(), ctx.recent.clone(), ctx.config.search.options());
      gate.set_filter(filter.into_filter());
      gate.set_query(query.clone());
      let view = gate.wait_for(&query).await;
      if let Some(error) = view.error {
        return Err(error);
      }
      print_page(
        &TaskPage {
          count: view.count,
          tasks: view.tasks,
          query: Some(query.clone()),
        },
        Some(&query),
      );
    }
    Command::Create {
      title,
      description,
      priority,
      status,
      due,
    } => {
      let input = CreateTaskInput {
        title,
        description,
        priority,
        status,
        due_date: due,
      };
      let task = ctx.store.create_task(input).await?;
      println!("Created");
      print_task(&task, None);
    }
    Command::Update {
      id,
      title,
      description,
      priority,
      status,
      due,
    } => {
      let patch = UpdateTaskInput {
        title,
        description,
        priority,
        status,
        due_date: due,
      };
      let task = ctx.store.update_task(&id, patch).await?;
      println!("Updated");
      print_task(&task, None);
    }
    Command::Delete { id } => {
      ctx.store.delete_task(&id).await?;
      println!("Deleted {}", id);
    }
    Command::Recent { clear } => {
      if clear {
        ctx.recent.clear();
        println!("Cleared recent searches");
      } else {
        for query in ctx.recent.list() {
          println!("{}", query);
        }
      }
    }
  }

  // Let background revalidation finish before the runtime goes away
  ctx.store.settle().await;
  Ok(())
}

fn password_or_env(password: Option<String>) -> Result<String, ApiError> {
  password
    .or_else(|| std::env::var(PASSWORD_ENV).ok())
    .filter(|p| !p.is_empty())
    .ok_or_else(|| {
      ApiError::request(
        None,
        format!("Password required. Pass --password or set {}.", PASSWORD_ENV),
      )
    })
}

fn report(error: ApiError) -> color_eyre::Report {
  match error {
    ApiError::Auth { message } => eyre!("{}\nRun `taskdeck login <email>` to sign in.", message),
    ApiError::Validation(errors) => {
      let lines: Vec<String> = errors
        .errors()
        .iter()
        .map(|e| match e.field {
          Some(field) => format!("  {}: {}", field, e.message),
          None => format!("  {}", e.message),
        })
        .collect();
      eyre!("Invalid input:\n{}", lines.join("\n"))
    }
    other => match other.hint() {
      Some(hint) => eyre!("{}\n{}", other, hint),
      None => eyre!(other),
    },
  }
}

fn print_page(page: &TaskPage, query: Option<&str>) {
  match query {
    Some(q) => println!("{} task(s) matching \"{}\"", page.count, q),
    None => println!("{} task(s)", page.count),
  }
  for task in &page.tasks {
    print_task(task, query);
  }
}

fn print_task(task: &Task, query: Option<&str>) {
  let title = match query {
    Some(q) if std::io::stdout().is_terminal() => render_ansi(&highlight_matches(&task.title, q)),
    _ => task.title.clone(),
  };
  let due = task
    .due_date
    .as_deref()
    .map(|d| format!("  due {}", d.get(..10).unwrap_or(d)))
    .unwrap_or_default();
  println!(
    "{}  [{:<6}] {:<11} {}{}",
    task.id,
    task.priority.as_str(),
    task.status.as_str(),
    title,
    due
  );
  if let Some(description) = task.description.as_deref().filter(|d| !d.is_empty()) {
    println!("    {}", description);
  }
}
