use anyhow::Context;
use courier::config::Config;
use courier::engine::Engine;
use courier::http::request::Method;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        eprintln!("usage: courier <url> [url ...]");
        std::process::exit(2);
    }

    let cfg = Config::load();
    let engine = Engine::start(cfg).await.context("engine startup failed")?;

    let mut failures = 0usize;
    for url in &urls {
        match engine.fetch(Method::GET, url).await {
            Ok(result) => {
                println!(
                    "{} {} {} ({} bytes)",
                    result.response.version,
                    result.response.status,
                    url,
                    result.body.len()
                );
            }
            Err(e) => {
                tracing::error!(url = %url, error = %e, "fetch failed");
                failures += 1;
            }
        }
    }

    engine.shutdown();
    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
