#[macro_use]
extern crate diesel;

#[macro_use]
extern crate rocket;

#[macro_use]
extern crate log;

mod analyses;
mod audit;
mod auth;
mod batches;
mod config;
mod db;
mod error;
mod lineage;
mod models;
mod notify;
mod organizations;
mod paging;
mod projects;
mod samples;
mod schema;
mod trials;
mod validate;
mod web;
mod workspaces;

#[cfg(test)]
mod testing;

use std::error::Error;

use env_logger::Env;
use rocket::figment::Figment;
use structopt::StructOpt;

type Result<T> = std::result::Result<T, Box<dyn Error>>;

/// Rocket's configuration, with the connection string from the command line
/// or the environment taking precedence over `Rocket.toml`.
fn figment(connstr: Option<&str>) -> Figment {
    let figment = rocket::Config::figment();
    match connstr {
        Some(url) => figment.merge(("databases.mylab.url", url)),
        None => figment,
    }
}

fn connstr(config: &config::Opt) -> Result<String> {
    match &config.connstr {
        Some(url) => Ok(url.clone()),
        None => Ok(figment(None).extract_inner::<String>("databases.mylab.url")?),
    }
}

fn initialize(url: &str, force: bool) -> Result<()> {
    let mut conn = db::establish(url)?;
    db::initialize(&mut conn, force)?;
    info!("Database schema is ready");
    Ok(())
}

fn add_user(url: &str, workspace: String, email: String, name: String, password: String) -> Result<()> {
    let mut conn = db::establish(url)?;
    db::initialize(&mut conn, false)?;
    let input = auth::RegisterInput {
        workspace_name: workspace,
        email,
        name,
        password,
    };
    let (workspace, admin) = auth::create_workspace_with_admin(&mut conn, &input)?;
    info!("Created workspace {} ({}) with admin {}", workspace.name, workspace.slug, admin.email);
    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let config = config::Opt::from_args();

    // set up logging
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match config.cmd {
        config::Command::Web => {
            web::launch(figment(config.connstr.as_deref()))?;
            Ok(())
        }

        config::Command::Initialize { force } => {
            let url = connstr(&config)?;
            initialize(&url, force)
        }

        config::Command::AddUser { ref workspace, ref email, ref name, ref password } => {
            let url = connstr(&config)?;
            add_user(&url, workspace.clone(), email.clone(), name.clone(), password.clone())
        }
    }
}
