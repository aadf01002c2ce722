use rshrink_bridge::{Client, HandlersInfo, VariantInfo};
use rshrink_runtime::RuntimeOptions;

pub async fn inspect(options: RuntimeOptions, format: &str) -> anyhow::Result<()> {
    let client = Client::start(options).await?;
    let info = client.handlers().info().clone();
    client.shutdown().await;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&info)?),
        _ => print!("{}", format_info(&info)),
    }

    Ok(())
}

fn format_info(info: &HandlersInfo) -> String {
    let mut out = format!("module: {}\n", info.module);
    out.push_str(&format_variant(&info.single_thread));
    match &info.multi_thread {
        Some(multi) => out.push_str(&format_variant(multi)),
        None => {
            let reason = info.unavailable.as_deref().unwrap_or("unknown");
            out.push_str(&format!("multi-thread: unavailable ({reason})\n"));
        }
    }
    out
}

fn format_variant(info: &VariantInfo) -> String {
    let pool = info
        .pool_size
        .map(|size| format!(", pool of {size}"))
        .unwrap_or_default();
    format!(
        "{}: {} exports{pool}, memory {} of {} KiB\n  {}\n",
        info.variant,
        info.exports.len(),
        info.peak_memory / 1024,
        info.memory_limit / 1024,
        info.exports.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rshrink_core::Variant;

    #[test]
    fn text_report_lists_both_variants() {
        let info = HandlersInfo {
            module: "demo".to_string(),
            single_thread: VariantInfo {
                variant: Variant::SingleThread,
                exports: vec!["add".to_string(), "sum".to_string()],
                pool_size: None,
                peak_memory: 65536,
                memory_limit: 1 << 20,
            },
            supports_threads: true,
            multi_thread: Some(VariantInfo {
                variant: Variant::MultiThread,
                exports: vec!["add".to_string(), "sum".to_string()],
                pool_size: Some(4),
                peak_memory: 131072,
                memory_limit: 1 << 20,
            }),
            unavailable: None,
        };

        let text = format_info(&info);
        assert!(text.contains("single-thread: 2 exports, memory 64 of 1024 KiB\n  add, sum"));
        assert!(text.contains("multi-thread: 2 exports, pool of 4, memory 128 of 1024 KiB"));
    }

    #[test]
    fn text_report_explains_missing_multi_thread() {
        let info = HandlersInfo {
            module: "demo".to_string(),
            single_thread: VariantInfo {
                variant: Variant::SingleThread,
                exports: vec![],
                pool_size: None,
                peak_memory: 0,
                memory_limit: 1 << 20,
            },
            supports_threads: false,
            multi_thread: None,
            unavailable: Some("host does not support shared-memory threads".to_string()),
        };

        assert!(format_info(&info).contains("multi-thread: unavailable (host does not support"));
    }
}
