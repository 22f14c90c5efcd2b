use anyhow::Context;
use gamemind::{cli::config_path_from_args, config::Config, logging::init_tracing, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config_path_from_args()?;
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let _logging_guard = init_tracing(&config.logging)?;

    tracing::info!(
        target: "gamemind",
        config = %config_path.display(),
        listen_addr = %config.server.listen_addr,
        model = %config.completion.model,
        "gamemind_starting"
    );
    let result = server::run(config).await;
    if let Err(err) = &result {
        tracing::error!(target: "gamemind", error = %format!("{err:#}"), "gamemind_failed");
    }
    result
}
