use futures::future::join_all;
use tracing::{error, info, warn};
use voicelink::{
    common::{logger, types::AnyResult},
    configs::Config,
    sources::SourceResolver,
};

/// Resolves every argument through the probe tool and prints the result as
/// one JSON line per input.
#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = Config::load()?;
    logger::init(&config);

    let inputs: Vec<String> = std::env::args().skip(1).collect();
    if inputs.is_empty() {
        warn!("Usage: voicelink <url | search terms>...");
        return Ok(());
    }

    let resolver = SourceResolver::new(&config.sources);
    let lookups = inputs.into_iter().map(|input| {
        let resolver = resolver.clone();
        async move {
            let result = resolver.resolve(&input).await;
            (input, result)
        }
    });

    let mut failures = 0usize;
    for (input, result) in join_all(lookups).await {
        match result {
            Ok(source) => {
                info!("Resolved {} -> {} ({:?})", input, source.title, source.duration);
                println!("{}", serde_json::to_string(&source)?);
            }
            Err(e) => {
                failures += 1;
                error!("Failed to resolve {}: {}", input, e);
            }
        }
    }

    if failures > 0 {
        return Err(format!("{failures} input(s) could not be resolved").into());
    }
    Ok(())
}
