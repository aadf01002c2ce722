use rshrink_runtime::{FeatureProbe, HostProbe, host_concurrency};

pub async fn probe(format: &str) -> anyhow::Result<()> {
    let supports_threads = HostProbe.supports_threads().await;
    let concurrency = host_concurrency().get();

    match format {
        "json" => {
            let report = serde_json::json!({
                "supports_threads": supports_threads,
                "concurrency": concurrency,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            println!("threads supported: {}", if supports_threads { "yes" } else { "no" });
            println!("host concurrency:  {concurrency}");
        }
    }

    Ok(())
}
