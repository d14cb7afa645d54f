mod cli;

use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use serde::Serialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};
use worksync::{
    EngineConfig, GitOrigin, OperationResult, SyncEngine, WorkspaceDescriptor, WorkspaceKind,
    WorksyncError,
};

use cli::{Cli, Commands, CreateArgs};

/// Response wrapper printed for every command.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn init_logging(verbose: u8, json: bool) {
    // Bridge `log` records from the engine and libraries into tracing.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }

    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_target(true).with_writer(std::io::stderr)),
        )
    } else {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().compact().with_writer(std::io::stderr)),
        )
    };
    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

fn print<T: Serialize>(response: &ApiResponse<T>) -> ExitCode {
    match serde_json::to_string_pretty(response) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            return ExitCode::FAILURE;
        }
    }
    if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn respond<T: Serialize>(outcome: Result<T, WorksyncError>) -> ExitCode {
    match outcome {
        Ok(data) => print(&ApiResponse::ok(data)),
        Err(e) => print::<T>(&ApiResponse::err(e.to_string())),
    }
}

/// A completed operation is printed as data; a failed one also sets the exit code.
fn respond_operation(outcome: Result<OperationResult, WorksyncError>) -> ExitCode {
    match outcome {
        Ok(result) if result.success => print(&ApiResponse::ok(result)),
        Ok(result) => print(&ApiResponse {
            success: false,
            error: Some(result.message.clone()),
            data: Some(result),
        }),
        Err(e) => print::<OperationResult>(&ApiResponse::err(e.to_string())),
    }
}

fn descriptor(args: &CreateArgs) -> Result<WorkspaceDescriptor, String> {
    let (kind, git_origin) = match (&args.clone_url, args.git) {
        (Some(_), _) => (WorkspaceKind::Git, Some(GitOrigin::Cloned)),
        (None, true) => (WorkspaceKind::Git, Some(GitOrigin::Initialized)),
        (None, false) => (WorkspaceKind::Local, None),
    };
    Ok(WorkspaceDescriptor {
        name: args.name.clone(),
        path: args.path.clone(),
        kind,
        git_origin,
        remote_url: args.clone_url.clone(),
        branch: args.branch.clone(),
        auth: args.auth.settings()?.unwrap_or_default(),
    })
}

fn run(engine: &SyncEngine, command: Commands) -> ExitCode {
    match command {
        Commands::List => respond(engine.list_workspaces()),
        Commands::Show { id } => respond(engine.get_workspace(&id)),
        Commands::Create(args) => match descriptor(&args) {
            Ok(descriptor) => respond(engine.create_workspace(&descriptor)),
            Err(message) => print::<()>(&ApiResponse::err(message)),
        },
        Commands::Rename { id, name } => respond(engine.rename_workspace(&id, &name)),
        Commands::Delete { id, remove_files } => {
            respond(engine.delete_workspace(&id, remove_files))
        }
        Commands::Move { id, path } => respond(engine.move_workspace(&id, &path)),
        Commands::Activate { id } => respond(engine.set_active_workspace(&id)),
        Commands::Status { id, operation } => {
            respond(engine.check_git_status(&id, operation.into()))
        }
        Commands::Commit { id, message } => respond_operation(engine.commit_changes(&id, &message)),
        Commands::Push { id, force: false } => respond_operation(engine.push_changes(&id)),
        Commands::Push { id, force: true } => respond_operation(engine.force_push_changes(&id)),
        Commands::Pull { id, force: false } => respond_operation(engine.pull_updates(&id)),
        Commands::Pull { id, force: true } => respond_operation(engine.force_pull_updates(&id)),
        Commands::Stash { id } => respond_operation(engine.stash_changes(&id)),
        Commands::PopStash { id } => respond_operation(engine.pop_stash_changes(&id)),
        Commands::RemoteStatus { id } => respond_operation(engine.get_remote_status(&id)),
        Commands::AddRemote {
            id,
            url,
            branch,
            auth,
        } => match auth.settings() {
            Ok(auth) => respond_operation(engine.add_remote_repository(
                &id,
                &url,
                branch.as_deref(),
                auth,
            )),
            Err(message) => print::<()>(&ApiResponse::err(message)),
        },
        Commands::SetAuth { id, auth } => match auth.settings() {
            Ok(settings) => {
                respond(engine.update_git_authentication(&id, settings.unwrap_or_default()))
            }
            Err(message) => print::<()>(&ApiResponse::err(message)),
        },
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let config = match &cli.data_dir {
        Some(dir) => EngineConfig::load(dir.join(worksync::config::CONFIG_FILE)).map(|mut c| {
            c.data_dir = dir.clone();
            c
        }),
        None => EngineConfig::discover(),
    };
    let engine = match config.and_then(SyncEngine::open) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to start: {}", e);
            return print::<()>(&ApiResponse::err(e.to_string()));
        }
    };
    info!(
        "worksync v{} using {}",
        env!("CARGO_PKG_VERSION"),
        engine.config().data_dir.display()
    );

    run(&engine, cli.command)
}
