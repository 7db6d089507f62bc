use crate::prelude::*;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Appends one JSON object per line for every [`DebugRecord`] written.
#[derive(Debug, Clone)]
pub struct DiagnosticsWriter {
    file: Arc<Mutex<std::fs::File>>,
    path: String,
    records_written: Arc<Mutex<u64>>,
}

impl DiagnosticsWriter {
    pub fn new(path: &str) -> Result<Self> {
        info!("Opening diagnostics file at {}", path);

        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open diagnostics file {}: {}", path, e);
                return Err(e.into());
            }
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)) {
                warn!("Failed to set permissions on diagnostics file {}: {}", path, e);
            }
        }

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_string(),
            records_written: Arc::new(Mutex::new(0)),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn write(&self, record: &DebugRecord) -> Result<()> {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        let mut json = serde_json::Map::new();
        json.insert("utc_timestamp".to_string(), timestamp.into());
        match serde_json::to_value(record)? {
            serde_json::Value::Object(fields) => json.extend(fields),
            other => bail!("DebugRecord serialized to {} instead of an object", other),
        }
        let line = serde_json::to_string(&serde_json::Value::Object(json))?;

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("Failed to lock diagnostics file"))?;
        if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
            error!("Failed to write to diagnostics file {}: {}", self.path, e);
            return Err(e.into());
        }

        let mut written = self
            .records_written
            .lock()
            .map_err(|_| anyhow!("Failed to lock records counter"))?;
        *written += 1;
        debug!("{} diagnostics records written to {}", *written, self.path);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecu::client::FrameTrace;
    use tempfile::NamedTempFile;

    #[test]
    fn writes_one_json_object_per_line() -> Result<()> {
        let temp_file = NamedTempFile::new()?;
        let path = temp_file.path().to_str().ok_or_else(|| anyhow!("path"))?;
        let writer = DiagnosticsWriter::new(path)?;

        let record = DebugRecord {
            frames: vec![FrameTrace {
                command: Command::InverterData,
                attempts: 3,
                raw_hex: Some("415053".to_string()),
            }],
            errors: vec!["2024-01-01 00:00:00 : timeout".to_string()],
            last_known_good: None,
        };
        writer.write(&record)?;
        writer.write(&record)?;

        let contents = std::fs::read_to_string(temp_file.path())?;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let json: serde_json::Value = serde_json::from_str(lines[0])?;
        assert!(json["utc_timestamp"].as_u64().is_some());
        assert_eq!(json["frames"][0]["command"], "inverter-data");
        assert_eq!(json["frames"][0]["attempts"], 3);
        assert_eq!(json["frames"][0]["raw_hex"], "415053");
        assert_eq!(json["errors"][0], "2024-01-01 00:00:00 : timeout");
        assert!(json["last_known_good"].is_null());

        Ok(())
    }
}
