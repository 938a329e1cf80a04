use clap::{Parser, Subcommand};
use policy_admin_sdk::AdminClient;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "policy-cli")]
#[command(about = "Management CLI for the policy proxy", long_about = None)]
struct Cli {
    /// Address of the running proxy.
    #[arg(short, long, default_value = "http://localhost:8080")]
    proxy: String,

    /// Administrative host name configured on the proxy.
    #[arg(long, default_value = policy_admin_sdk::DEFAULT_ADMIN_HOST)]
    admin_host: String,

    /// Log in first when the proxy requires a session.
    #[arg(long, requires = "password")]
    username: Option<String>,

    #[arg(long, requires = "username")]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage approved domains
    Domains {
        #[command(subcommand)]
        action: DomainAction,
    },
    /// Manage allowed content types per domain
    Contents {
        #[command(subcommand)]
        action: ContentAction,
    },
    /// Inspect or change the module ordering
    Plugins {
        #[command(subcommand)]
        action: PluginAction,
    },
    /// Register an admin user
    Register { username: String, password: String },
}

#[derive(Subcommand)]
enum DomainAction {
    List,
    Add { domain: String },
    Remove { domain: String },
}

#[derive(Subcommand)]
enum ContentAction {
    List,
    Add { domain: String, content_type: String },
    Remove { domain: String, content_type: String },
}

#[derive(Subcommand)]
enum PluginAction {
    Show,
    /// Replace the request and/or response module lists (comma separated)
    Set {
        #[arg(long, value_delimiter = ',')]
        request: Option<Vec<String>>,
        #[arg(long, value_delimiter = ',')]
        response: Option<Vec<String>>,
    },
    Remove { name: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = AdminClient::with_admin_host(&cli.proxy, &cli.admin_host)?;

    if let (Some(username), Some(password)) = (&cli.username, &cli.password) {
        client.login(username, password).await?;
    }

    match cli.command {
        Commands::Domains { action } => match action {
            DomainAction::List => print_json(&client.domains().await?)?,
            DomainAction::Add { domain } => println!("{}", client.add_domain(&domain).await?),
            DomainAction::Remove { domain } => print_json(&client.remove_domain(&domain).await?)?,
        },
        Commands::Contents { action } => match action {
            ContentAction::List => print_json(&client.content_rules().await?)?,
            ContentAction::Add { domain, content_type } => {
                println!("{}", client.add_content(&domain, &content_type).await?)
            }
            ContentAction::Remove { domain, content_type } => {
                println!("{}", client.remove_content(&domain, &content_type).await?)
            }
        },
        Commands::Plugins { action } => match action {
            PluginAction::Show => print_json(&client.plugins().await?)?,
            PluginAction::Set { request, response } => {
                if request.is_none() && response.is_none() {
                    return Err("nothing to set, pass --request and/or --response".into());
                }
                println!("{}", client.set_plugins(request, response).await?)
            }
            PluginAction::Remove { name } => println!("{}", client.remove_plugin(&name).await?),
        },
        Commands::Register { username, password } => {
            println!("{}", client.register(&username, &password).await?)
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
