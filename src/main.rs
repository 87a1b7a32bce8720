use artist_backend::api::server::{generation_service_from_config, serve};
use artist_backend::config::{load_config, resolve_config_path};
use tracing::level_filters::LevelFilter;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    if matches!(cli_args.first().map(String::as_str), Some("validate-config")) {
        run_validate_config_cli(cli_args.into_iter().skip(1).collect::<Vec<_>>())?;
        return Ok(());
    }

    let config_path = parse_config_flag(cli_args.as_slice())?;
    let config_path = resolve_config_path(config_path.as_deref());
    let config = load_config(config_path.as_path())?;
    info!(config = %config_path.display(), "loaded artist config");

    let addr = config.bind_addr()?;
    let generation = generation_service_from_config(&config)?;
    serve(addr, generation).await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

fn run_validate_config_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_validate_config_usage();
        return Ok(());
    }

    let config_path = parse_config_flag(args.as_slice())?;
    let config_path = resolve_config_path(config_path.as_deref());
    let summary = load_config(config_path.as_path())?.summary()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn parse_config_flag(args: &[String]) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let mut config_path = None::<String>;
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--config" => {
                let Some(value) = args.get(i + 1) else {
                    return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
                };
                config_path = Some(value.clone());
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }
    Ok(config_path)
}

fn print_validate_config_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  cargo run -- validate-config [--config PATH]\n\n",
        "Defaults:\n",
        "  --config defaults to $ARTIST_CONFIG, then config/artist.toml\n"
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_flag_defaults_to_none() {
        assert_eq!(parse_config_flag(&[]).expect("empty args parse"), None);
    }

    #[test]
    fn parse_config_flag_reads_value() {
        let parsed = parse_config_flag(&[
            String::from("--config"),
            String::from("/etc/artist.toml"),
        ])
        .expect("parse should succeed");
        assert_eq!(parsed.as_deref(), Some("/etc/artist.toml"));
    }

    #[test]
    fn parse_config_flag_requires_value() {
        let err = parse_config_flag(&[String::from("--config")]).expect_err("value required");
        assert!(err.to_string().contains("--config"));
    }

    #[test]
    fn parse_config_flag_rejects_unknown_arguments() {
        let err = parse_config_flag(&[String::from("--port")]).expect_err("unknown flag");
        assert!(err.to_string().contains("Unknown argument: --port"));
    }
}
