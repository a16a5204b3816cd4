use stepgate_core::config::Config;
use stepgate_server::state::AppState;

pub fn run(mut config: Config, bind: Option<String>) -> anyhow::Result<()> {
    if let Some(bind) = bind {
        config.bind = bind;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&config.bind).await?;
        let app_state = AppState::from_config(&config)?;
        println!("stepgate listening on {}", listener.local_addr()?);

        tokio::select! {
            res = stepgate_server::serve_on(listener, app_state) => res,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                Ok(())
            }
        }
    })
}
