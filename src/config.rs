use serde::Deserialize;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Start the REST API server
    Web,

    /// Create the database schema
    Initialize {
        /// Drop all existing tables first
        #[structopt(long)]
        force: bool,
    },

    /// Create a workspace together with its first admin user
    AddUser {
        /// Name of the new workspace
        #[structopt(long)]
        workspace: String,

        #[structopt(long)]
        email: String,

        #[structopt(long)]
        name: String,

        /// Initial password, should be changed after first login
        #[structopt(long)]
        password: String,
    },
}

#[derive(StructOpt, Debug)]
pub struct Opt {
    /// DB connection URI. PostgreSQL URLs select PostgreSQL, anything else is a SQLite file
    #[structopt(long, env = "DATABASE_URL")]
    pub connstr: Option<String>,

    #[structopt(subcommand)]
    pub cmd: Command,
}

/// Service settings, read from the Rocket figment (`Rocket.toml`, `ROCKET_*`).
#[derive(Debug, Clone, Deserialize)]
pub struct LabConfig {
    /// Lifetime of a login session
    #[serde(default = "default_session_hours")]
    pub session_hours: i64,

    /// Notifications expire after this many days
    #[serde(default = "default_notification_ttl_days")]
    pub notification_ttl_days: i64,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,

    /// Deepest allowed derived sample, counted from the root sample
    #[serde(default = "default_max_lineage_depth")]
    pub max_lineage_depth: i32,
}

fn default_session_hours() -> i64 {
    24
}

fn default_notification_ttl_days() -> i64 {
    30
}

fn default_max_page_size() -> i64 {
    100
}

fn default_max_lineage_depth() -> i32 {
    5
}

impl Default for LabConfig {
    fn default() -> Self {
        LabConfig {
            session_hours: default_session_hours(),
            notification_ttl_days: default_notification_ttl_days(),
            max_page_size: default_max_page_size(),
            max_lineage_depth: default_max_lineage_depth(),
        }
    }
}
