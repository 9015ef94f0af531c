// Persisted session: who is logged in, against which server, with which
// token. The chat engine only ever reads the user id from here.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::info;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Clone)]
pub struct Session {
    pub server: String,
    pub user_id: String,
    pub display_name: String,
    // Obfuscated at rest; this keeps the token out of casual greps, it is
    // not encryption.
    token: String,
}

impl Session {
    pub fn new(server: &str, user_id: &str, display_name: &str, token: &str) -> Self {
        Session {
            server: server.to_string(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            token: BASE64.encode(token),
        }
    }

    pub fn token(&self) -> String {
        String::from_utf8(BASE64.decode(&self.token).unwrap_or_default()).unwrap_or_default()
    }
}

static CONFIG_DIR_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

/// Route the session file somewhere else (tests, `--config-dir`). Only the
/// first call wins.
pub fn set_config_dir_override(dir: PathBuf) {
    let _ = CONFIG_DIR_OVERRIDE.set(dir);
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = match CONFIG_DIR_OVERRIDE.get() {
        Some(dir) => dir.clone(),
        None => dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?
            .join("payphone"),
    };

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

fn session_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("session.json"))
}

pub fn save_session(session: &Session) -> Result<()> {
    let path = session_path()?;
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, session)?;

    info!("Session saved for {}", session.display_name);
    Ok(())
}

pub fn load_session() -> Result<Option<Session>> {
    let path = session_path()?;

    if !path.exists() {
        return Ok(None);
    }

    let path_str = path.display().to_string();

    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let session: Session = serde_json::from_str(&contents)?;
    info!("Loaded session for {} from {}", session.display_name, path_str);

    Ok(Some(session))
}

/// Forget the stored session, e.g. on logout or when the server rejects the
/// token.
pub fn clear_session() -> Result<()> {
    let path = session_path()?;
    if path.exists() {
        fs::remove_file(path)?;
        info!("Session cleared");
    }
    Ok(())
}
