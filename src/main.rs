mod config_loader;
mod error;
mod framing;
mod handler;
mod legacy;
mod logger;
mod server;
mod varint;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logger::init_logger();

    let mut config_path = PathBuf::from("pingmock.json");
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config-path" | "--cp" => {
                let value = args
                    .next()
                    .ok_or("the \"--config-path\" parameter doesn't have a value")?;
                if Path::new(&value).is_dir() {
                    return Err(
                        format!("the config path may not be a directory: {}", value).into()
                    );
                }
                info!("Set config path to: {}", value);
                config_path = PathBuf::from(value);
            }
            other => warn!("Unknown launch parameter: {}", other),
        }
    }

    let mut properties = config_loader::load_or_create(&config_path)?;
    properties.load_favicon(Path::new("."));
    if !properties.mod_list.is_empty() || properties.server_type != "vanilla" {
        info!(
            "Posing as a \"{}\" server with {} mods listed.",
            properties.server_type,
            properties.mod_list.len()
        );
    }
    debug!(
        "use-epoll-when-available = {}; the runtime picks its own backend",
        properties.use_epoll_when_available
    );

    server::run(Arc::new(properties)).await?;
    Ok(())
}
