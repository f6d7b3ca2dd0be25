use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use mcp_agent::models::message::Message;

pub fn ensure_session_dir() -> Result<PathBuf> {
    let home_dir =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
    let config_dir = home_dir.join(".config").join("mcp-agent").join("sessions");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Where the named session is recorded
pub fn session_path(name: &str) -> Result<PathBuf> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        anyhow::bail!("Invalid session name '{}'", name);
    }
    Ok(ensure_session_dir()?.join(format!("{}.jsonl", name)))
}

/// Read a recorded session; a file that doesn't exist yet is an empty session
pub fn load_messages(session_file: &Path) -> Result<Vec<Message>> {
    match File::open(session_file) {
        Ok(file) => deserialize_messages(file)
            .with_context(|| format!("Failed to read session {}", session_file.display())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(anyhow::anyhow!("Failed to open session file: {}", e)),
    }
}

pub fn persist_messages(session_file: &Path, messages: &[Message]) -> Result<()> {
    let file = File::create(session_file)?; // Create or truncate the file
    write_messages(file, messages)
}

fn write_messages(session_file: File, messages: &[Message]) -> Result<()> {
    let mut writer = io::BufWriter::new(session_file);

    for message in messages {
        serde_json::to_writer(&mut writer, &message)?;
        writeln!(writer)?;
    }

    writer.flush()?;
    Ok(())
}

fn deserialize_messages(file: File) -> Result<Vec<Message>> {
    let reader = io::BufReader::new(file);
    let mut messages = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        messages.push(serde_json::from_str::<Message>(&line)?);
    }

    Ok(messages)
}
