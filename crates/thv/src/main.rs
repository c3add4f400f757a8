use clap::Parser;
use thv_core::{Result, ThvError};

mod cli;
mod client_cmds;
mod config_cmds;
mod context;
mod docker;
mod group_cmds;
mod lifecycle_cmds;
mod logs_cmd;
mod output;
mod proxy_cmd;
mod run_cmd;
mod secret_cmds;
mod supervise_cmd;

use cli::{Cli, ClientCommands, Commands, ConfigCommands, GroupCommands, LogsCommands, SecretCommands};
use context::AppContext;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = cli.format.clone();

    // The supervisor logs to its workload's file; everything else to stderr.
    if !matches!(cli.command, Commands::Supervise { .. }) {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init()
            .ok();
    }

    match dispatch(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            output::print_error(&format, &e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run(args) => {
            let ctx = AppContext::init()?;
            return run_cmd::handle_run(&ctx, *args).await;
        }
        Commands::List { all, labels } => {
            let ctx = AppContext::init()?;
            let workloads = lifecycle_cmds::handle_list(&ctx, all, &labels).await?;
            output::print_workloads(&cli.format, &workloads);
        }
        Commands::Stop { name } => {
            let ctx = AppContext::init()?;
            lifecycle_cmds::handle_stop(&ctx, &name).await?;
        }
        Commands::Rm { name } => {
            let ctx = AppContext::init()?;
            lifecycle_cmds::handle_rm(&ctx, &name).await?;
        }
        Commands::Restart { name } => {
            let ctx = AppContext::init()?;
            lifecycle_cmds::handle_restart(&ctx, &name).await?;
        }
        Commands::Logs {
            command: Some(LogsCommands::Prune),
            ..
        } => {
            let ctx = AppContext::init()?;
            logs_cmd::handle_logs_prune(&ctx)?;
        }
        Commands::Logs {
            command: None,
            name,
            follow,
            proxy,
            tail,
        } => {
            let name = name.ok_or_else(|| {
                ThvError::invalid_config("logs", "a workload name is required")
            })?;
            let ctx = AppContext::init()?;
            logs_cmd::handle_logs(&ctx, &name, follow, proxy, tail).await?;
        }
        Commands::Proxy(args) => {
            proxy_cmd::handle_proxy(*args).await?;
        }
        Commands::Group { command } => {
            let ctx = AppContext::init()?;
            match command {
                GroupCommands::Create { name } => group_cmds::handle_group_create(&ctx, &name)?,
                GroupCommands::List => group_cmds::handle_group_list(&ctx)?,
                GroupCommands::Rm {
                    name,
                    with_workloads,
                } => group_cmds::handle_group_rm(&ctx, &name, with_workloads).await?,
                GroupCommands::Run { name } => group_cmds::handle_group_run(&ctx, &name)?,
            }
        }
        Commands::Config { command } => match command {
            ConfigCommands::Get { key } => config_cmds::handle_config_get(&key)?,
            ConfigCommands::Set { key, value } => config_cmds::handle_config_set(&key, &value)?,
            ConfigCommands::Unset { key } => config_cmds::handle_config_unset(&key)?,
            ConfigCommands::List => config_cmds::handle_config_list()?,
        },
        Commands::Secret { command } => {
            let ctx = AppContext::init()?;
            match command {
                SecretCommands::Setup => secret_cmds::handle_secret_setup(&ctx)?,
                SecretCommands::Set { name, value } => {
                    secret_cmds::handle_secret_set(&ctx, &name, value).await?;
                }
                SecretCommands::Get { name } => secret_cmds::handle_secret_get(&ctx, &name).await?,
                SecretCommands::Delete { name } => {
                    secret_cmds::handle_secret_delete(&ctx, &name).await?;
                }
                SecretCommands::List => secret_cmds::handle_secret_list(&ctx).await?,
                SecretCommands::Provider => secret_cmds::handle_secret_provider(&ctx)?,
                SecretCommands::ResetKeyring => secret_cmds::handle_secret_reset(&ctx)?,
            }
        }
        Commands::Client { command } => match command {
            ClientCommands::Status => client_cmds::handle_client_status()?,
            ClientCommands::Setup => {
                let ctx = AppContext::init()?;
                client_cmds::handle_client_setup(&ctx)?;
            }
            ClientCommands::Register { clients, groups } => {
                let ctx = AppContext::init()?;
                client_cmds::handle_client_register(&ctx, &clients, &groups)?;
            }
            ClientCommands::Remove { client, workload } => {
                client_cmds::handle_client_remove(&client, &workload)?;
            }
            ClientCommands::ListRegistered => {
                let ctx = AppContext::init()?;
                client_cmds::handle_client_list_registered(&ctx)?;
            }
        },
        Commands::Export { name, path } => {
            let ctx = AppContext::init()?;
            config_cmds::handle_export(&ctx, &name, &path)?;
        }
        Commands::Supervise { name } => {
            supervise_cmd::handle_supervise(&name).await?;
        }
    }
    Ok(0)
}
