mod metrics;
mod serve;

use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use fluidfeatures::{Config, FeatureValue, FluidFeatures, FluidFeaturesClient, UserIdentity};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ff")]
#[command(version)]
#[command(about = "Manage and check FluidFeatures feature flags", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short = 'c', long = "config", default_value = "fluidfeatures.toml", global = true)]
    config: String,

    /// Configuration section to use
    #[arg(
        short = 'e',
        long = "env",
        env = "FLUIDFEATURES_ENV",
        default_value = "development",
        global = true
    )]
    env: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every feature known for the application
    Features,
    /// Set the percentage of users who see a feature
    Rollout {
        feature: String,
        /// 0 to 100
        percent: u8,
    },
    /// Show the features enabled for a user
    User {
        user_id: String,

        #[arg(long)]
        anonymous: bool,

        /// Unique attribute, e.g. --unique email=a@b.c
        #[arg(long = "unique", value_name = "KEY=VALUE")]
        uniques: Vec<String>,

        /// Cohort attribute, e.g. --cohort plan=gold
        #[arg(long = "cohort", value_name = "KEY=VALUE")]
        cohorts: Vec<String>,
    },
    /// Check one feature for a user and report the hit
    Check {
        feature: String,

        #[arg(short = 'u', long = "user")]
        user: String,

        #[arg(long)]
        version: Option<String>,

        /// Answer when the service does not know the feature
        #[arg(long)]
        default_enabled: bool,
    },
    /// Record a goal for a user
    Goal {
        goal: String,

        #[arg(short = 'u', long = "user")]
        user: String,

        #[arg(long)]
        version: Option<String>,
    },
    /// Serve the AJAX feature and goal endpoints
    ///
    /// The `user_id` query parameter is taken on trust: any caller can check
    /// features and record goals as any user. Expose this server only to
    /// trusted or internal callers, e.g. behind your application's own
    /// authenticated proxy.
    Serve {
        #[arg(short = 'p', long = "port", default_value_t = 8080)]
        port: u16,

        #[arg(long = "hostname", default_value = "0.0.0.0")]
        hostname: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Features => run_features(&connect(&args.config, &args.env)),
        Command::Rollout { ref feature, percent } => {
            run_rollout(&connect(&args.config, &args.env), feature, percent)
        }
        Command::User {
            ref user_id,
            anonymous,
            ref uniques,
            ref cohorts,
        } => {
            let ff = connect(&args.config, &args.env);
            let user = build_user(user_id, anonymous, uniques, cohorts);
            run_user(&ff, &user);
        }
        Command::Check {
            ref feature,
            ref user,
            ref version,
            default_enabled,
        } => {
            let ff = connect(&args.config, &args.env);
            run_check(&ff, feature, user, version.as_deref(), default_enabled);
        }
        Command::Goal {
            ref goal,
            ref user,
            ref version,
        } => run_goal(&connect(&args.config, &args.env), goal, user, version.as_deref()),
        Command::Serve { port, ref hostname } => {
            // The blocking HTTP client is built and dropped outside the async runtime.
            let state = Arc::new(serve::AppState {
                ff: FluidFeatures::from_file_or_disabled(&args.config, &args.env),
            });
            let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
                eprintln!("Failed to start runtime: {}", e);
                process::exit(1);
            });
            runtime.block_on(serve::run_serve(Arc::clone(&state), hostname, port));
        }
    }
}

fn connect(config_path: &str, env: &str) -> FluidFeatures {
    let config = Config::load(config_path, env).unwrap_or_else(|e| {
        eprintln!("{}: {}", config_path, e);
        process::exit(1);
    });
    FluidFeatures::from_config(&config).unwrap_or_else(|e| {
        eprintln!("{}", e);
        process::exit(1);
    })
}

fn client(ff: &FluidFeatures) -> &FluidFeaturesClient {
    match ff.client() {
        Some(client) => client.as_ref(),
        None => {
            eprintln!("fluidfeatures is not configured");
            process::exit(1);
        }
    }
}

fn run_features(ff: &FluidFeatures) {
    match client(ff).list_features() {
        Ok(features) => {
            for (name, definition) in &features {
                println!("{} {}", name, definition);
            }
        }
        Err(e) => {
            eprintln!("Listing features failed: {}", e);
            process::exit(1);
        }
    }
}

fn run_rollout(ff: &FluidFeatures, feature: &str, percent: u8) {
    match client(ff).set_feature_rollout(feature, percent) {
        Ok(()) => println!("{} enabled for {}% of users", feature, percent),
        Err(e) => {
            eprintln!("Rollout of {} failed: {}", feature, e);
            process::exit(1);
        }
    }
}

fn run_user(ff: &FluidFeatures, user: &UserIdentity) {
    let fetch = client(ff).fetch_user_features(user);
    if fetch.degraded {
        eprintln!("Fetching features for {} failed", user.unique_id);
        process::exit(1);
    }
    for (name, value) in &fetch.features {
        println!("{}", describe_feature(name, value));
    }
}

fn run_check(ff: &FluidFeatures, feature: &str, user_id: &str, version: Option<&str>, default_enabled: bool) {
    let mut tx = ff
        .create_transaction(UserIdentity::new(user_id), format!("cli://ff/check/{}", feature))
        .unwrap_or_else(|e| {
            eprintln!("{}", e);
            process::exit(1);
        });
    let enabled = tx.feature_enabled(feature, version, default_enabled);
    tx.end_transaction();
    if tx.fetch_degraded() {
        tracing::warn!("answered {} from its default", feature);
    }
    println!("{}", enabled);
}

fn run_goal(ff: &FluidFeatures, goal: &str, user_id: &str, version: Option<&str>) {
    let mut tx = ff
        .create_transaction(UserIdentity::new(user_id), format!("cli://ff/goal/{}", goal))
        .unwrap_or_else(|e| {
            eprintln!("{}", e);
            process::exit(1);
        });
    tx.goal_hit(goal, version);
    tx.end_transaction();
    println!("{} recorded for {}", goal, user_id);
}

fn build_user(user_id: &str, anonymous: bool, uniques: &[String], cohorts: &[String]) -> UserIdentity {
    let mut user = UserIdentity::new(user_id).anonymous(anonymous);
    for (key, value) in uniques.iter().filter_map(|arg| parse_kv(arg)) {
        user = user.with_unique(key, value);
    }
    for (key, value) in cohorts.iter().filter_map(|arg| parse_kv(arg)) {
        user = user.with_cohort(key, value);
    }
    user
}

fn parse_kv(arg: &str) -> Option<(&str, &str)> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Some((key, value)),
        _ => {
            eprintln!("ignoring attribute '{}', expected KEY=VALUE", arg);
            None
        }
    }
}

fn describe_feature(name: &str, value: &FeatureValue) -> String {
    match value {
        FeatureValue::Flat(enabled) => format!("{} = {}", name, enabled),
        FeatureValue::Versioned(versions) => {
            let versions: Vec<String> = versions
                .iter()
                .map(|(version, enabled)| format!("{}={}", version, enabled))
                .collect();
            format!("{}: {}", name, versions.join(" "))
        }
    }
}
