use anyhow::{Context, bail};
use rshrink_bridge::{Client, RemoteModule};
use rshrink_core::{Value, Variant};
use rshrink_runtime::RuntimeOptions;

pub struct CallRequest {
    /// `None` picks the best variant available.
    pub variant: Option<Variant>,
    pub export: String,
    pub args: Vec<String>,
    /// Each argument is its own call.
    pub batch: bool,
}

pub async fn call(options: RuntimeOptions, request: CallRequest, format: &str) -> anyhow::Result<()> {
    let args = request
        .args
        .iter()
        .map(|arg| parse_value(arg))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let client = Client::start(options).await?;
    let outcome = run(&client, &request, args, format).await;
    client.shutdown().await;
    outcome
}

async fn run(client: &Client, request: &CallRequest, args: Vec<Value>, format: &str) -> anyhow::Result<()> {
    let module = target(client, request.variant)?;

    if request.batch {
        let batches = args.into_iter().map(|arg| vec![arg]).collect();
        let results = module.call_many(&request.export, batches).await?;
        match format {
            "json" => println!("{}", serde_json::to_string_pretty(&results)?),
            _ => {
                for result in results {
                    match result {
                        Ok(value) => println!("{value}"),
                        Err(err) => println!("error: {err}"),
                    }
                }
            }
        }
    } else {
        let value = module.call(&request.export, args).await?;
        match format {
            "json" => println!("{}", serde_json::to_string_pretty(&value)?),
            _ => println!("{value}"),
        }
    }

    Ok(())
}

fn target(client: &Client, variant: Option<Variant>) -> anyhow::Result<RemoteModule> {
    let handlers = client.handlers();
    match variant {
        None => Ok(handlers.preferred()),
        Some(Variant::SingleThread) => Ok(handlers.single_thread()),
        Some(Variant::MultiThread) => handlers.multi_thread().with_context(|| {
            format!(
                "multi-thread variant unavailable: {}",
                handlers.info().unavailable.as_deref().unwrap_or("unknown")
            )
        }),
    }
}

pub fn parse_variant(s: &str) -> anyhow::Result<Variant> {
    match s.trim().to_ascii_lowercase().as_str() {
        "single" | "single-thread" | "single_thread" => Ok(Variant::SingleThread),
        "multi" | "multi-thread" | "multi_thread" => Ok(Variant::MultiThread),
        _ => bail!("invalid variant {s:?} (expected single or multi)"),
    }
}

/// Parse a command-line argument into a [`Value`].
pub fn parse_value(arg: &str) -> anyhow::Result<Value> {
    let arg = arg.trim();
    match arg {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }

    let is_array = arg.starts_with('[') || arg.contains(',');
    if is_array {
        let inner = arg.trim_start_matches('[').trim_end_matches(']').trim();
        if inner.is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        let items = inner
            .split(',')
            .map(|item| {
                let item = item.trim();
                item.parse::<i32>()
                    .with_context(|| format!("array element {item:?} is not an i32"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        return Ok(Value::Array(items));
    }

    if let Ok(v) = arg.parse::<i64>() {
        return Ok(Value::Int(v));
    }
    if let Ok(v) = arg.parse::<f64>() {
        return Ok(Value::Float(v));
    }
    bail!("cannot parse argument {arg:?} (expected a bool, number or comma-separated array)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalars() {
        assert_eq!(parse_value("true").unwrap(), Value::Bool(true));
        assert_eq!(parse_value("-7").unwrap(), Value::Int(-7));
        assert_eq!(parse_value("2.5").unwrap(), Value::Float(2.5));
    }

    #[test]
    fn parses_arrays() {
        assert_eq!(
            parse_value("1,2,3,4,5,6,8,0").unwrap(),
            Value::Array(vec![1, 2, 3, 4, 5, 6, 8, 0])
        );
        assert_eq!(parse_value("[1, -2]").unwrap(), Value::Array(vec![1, -2]));
        assert_eq!(parse_value("[]").unwrap(), Value::Array(vec![]));
        assert_eq!(parse_value("[5]").unwrap(), Value::Array(vec![5]));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_value("abc").is_err());
        assert!(parse_value("1,x").is_err());
        assert!(parse_value("1,99999999999").is_err());
    }

    #[test]
    fn parses_variants() {
        assert_eq!(parse_variant("single").unwrap(), Variant::SingleThread);
        assert_eq!(parse_variant("multi-thread").unwrap(), Variant::MultiThread);
        assert!(parse_variant("both").is_err());
    }
}
