//! The properties file and everything derived from it: defaults, load and
//! write-back, favicon encoding, bind address resolution.
//!
//! The file is plain JSON with kebab-case keys. It is loaded (or generated)
//! once at startup and then handed to every connection task as a read-only
//! snapshot; nothing in the responder mutates it afterwards.

use std::fs;
use std::io::{self, Cursor};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::ImageFormat;
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PingProperties {
    /// The ip address to bind to; empty binds every interface.
    pub ip: String,
    /// The port to listen on.
    pub port: u16,
    /// Kept for compatibility with older property files; the runtime picks
    /// its own polling backend nowadays.
    pub use_epoll_when_available: bool,
    /// The message of the day, either plain text or a chat object.
    pub message_of_the_day: Value,
    /// The message of the day served to legacy clients. Plain text only.
    pub legacy_message_of_the_day: String,
    /// The label shown in the version slot of the server list entry.
    pub outdated_message: String,
    /// Hover text for the version label; every line becomes a fake player
    /// name. Empty disables the player sample block.
    pub outdated_message_tooltip: String,
    /// The kick reason for join attempts, plain text or a chat object.
    pub disconnect_message: Value,
    /// The kick reason for legacy join attempts. Plain text only.
    pub legacy_disconnect_message: String,
    /// Relative path of a 64x64 icon file, empty to disable the favicon.
    pub favicon: String,
    /// Informational; affects the icon modded clients draw next to the entry.
    pub server_type: String,
    /// Informational mod list shown by modded clients.
    pub mod_list: Vec<String>,
    #[serde(skip)]
    favicon_data: Option<String>,
}

impl Default for PingProperties {
    fn default() -> Self {
        Self {
            ip: String::new(),
            port: 25565,
            use_epoll_when_available: true,
            message_of_the_day: Value::String("Nothing here but the ping...".into()),
            legacy_message_of_the_day: "Nothing here but the ping... and an old client.".into(),
            outdated_message: "Move along...".into(),
            outdated_message_tooltip: String::new(),
            disconnect_message: Value::String("This server only answers pings.".into()),
            legacy_disconnect_message: "This server only answers pings.".into(),
            favicon: String::new(),
            server_type: "vanilla".into(),
            mod_list: Vec::new(),
            favicon_data: None,
        }
    }
}

impl PingProperties {
    /// The favicon as a `data:image/png;base64,...` URI, when one was
    /// configured and loaded successfully.
    pub fn favicon_data(&self) -> Option<&str> {
        self.favicon_data.as_deref()
    }

    /// Resolves and encodes the configured favicon. A missing or malformed
    /// icon only disables the favicon; the responder still starts.
    pub fn load_favicon(&mut self, directory: &Path) {
        if self.favicon.is_empty() {
            return;
        }
        match encode_favicon(&directory.join(&self.favicon)) {
            Ok(data) => {
                info!("Loaded favicon from {}", self.favicon);
                self.favicon_data = Some(data);
            }
            Err(e) => error!("Unable to load the favicon {}: {}", self.favicon, e),
        }
    }

    /// The socket address to bind: wildcard IPv4 when no ip is configured,
    /// otherwise the parsed or resolved host.
    pub fn bind_address(&self) -> io::Result<SocketAddr> {
        if self.ip.is_empty() {
            return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port));
        }
        if let Ok(ip) = self.ip.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        (self.ip.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no address found for '{}'", self.ip),
                )
            })
    }
}

/// Loads the properties file, generating it with defaults when absent. The
/// file is always written back afterwards so fields added in newer versions
/// show up in older files.
pub fn load_or_create(path: &Path) -> io::Result<PingProperties> {
    let properties: PingProperties = if path.exists() {
        info!("Loading the properties file...");
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
    } else {
        info!("Generating the properties file...");
        PingProperties::default()
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_json::to_string_pretty(&properties)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(path, contents)?;

    Ok(properties)
}

#[derive(Debug, Error)]
pub enum FaviconError {
    #[error("favicon file does not exist")]
    Missing,
    #[error("favicon must be 64x64 pixels, got {width}x{height}")]
    WrongSize { width: u32, height: u32 },
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// Reads the icon, checks its dimensions and re-encodes it as a
/// base64 PNG data URI.
fn encode_favicon(path: &Path) -> Result<String, FaviconError> {
    if !path.exists() {
        return Err(FaviconError::Missing);
    }
    let image = image::open(path)?;
    if image.width() != 64 || image.height() != 64 {
        return Err(FaviconError::WrongSize {
            width: image.width(),
            height: image.height(),
        });
    }
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(format!("data:image/png;base64,{}", BASE64.encode(&png)))
}
