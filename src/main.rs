mod cli;
mod handlers;

use anyhow::Result;
use edagent::config::Config;
use tracing_subscriber::EnvFilter;

use handlers::{history::HistoryHandler, run::RunHandler};

fn init_tracing(verbose: bool) {
    let default = if verbose { "edagent=debug" } else { "edagent=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);

    // Load config, then let CLI flags override it
    let mut cfg = Config::load();
    if let Some(model) = &args.model {
        cfg.set("DEFAULT_MODEL", model.as_str());
    }
    if let Some(t) = args.temperature {
        cfg.set("TEMPERATURE", t.to_string());
    }
    if let Some(n) = args.max_retries {
        cfg.set("MAX_RETRIES", n.to_string());
    }
    if let Some(secs) = args.timeout {
        cfg.set("EXEC_TIMEOUT", secs.to_string());
    }
    if let Some(dir) = &args.artifacts_dir {
        cfg.set("ARTIFACTS_DIR", dir.to_string_lossy());
    }

    let md = args.markdown(cfg.get_bool("PRETTIFY_MARKDOWN"));

    if args.list_runs {
        return HistoryHandler::list(&cfg);
    }
    if let Some(id) = &args.show_run {
        return HistoryHandler::show(&cfg, id, md);
    }

    // clap guarantees a CSV when neither history flag is given
    let Some(csv) = args.csv.as_deref() else {
        anyhow::bail!("a CSV path is required");
    };
    RunHandler::run(&cfg, csv, &args.goal, args.max_items, args.offline, args.caching(), md).await
}
