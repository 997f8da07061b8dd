use fs_err as fs;
use serde_json::to_string_pretty;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::session::{Session, Task};

/// Installs the stderr subscriber. `RUST_LOG` wins over the `--debug` default.
pub fn init_tracing(debug: bool) {
    let default = if debug { "pitch_wizard=debug" } else { "pitch_wizard=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr).with_target(false))
        .try_init();
}

/// Writes prompts, responses and session snapshots under `<root>/<session id>/`.
#[derive(Debug, Clone)]
pub struct Transcript {
    root: PathBuf,
}

impl Transcript {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn dir(&self, session: Uuid) -> PathBuf {
        self.root.join(session.to_string())
    }

    fn write(&self, session: Uuid, file: &str, contents: &str) -> io::Result<PathBuf> {
        let dir = self.dir(session);
        fs::create_dir_all(&dir)?;
        let path = dir.join(file);
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn save_prompt(&self, session: Uuid, task: Task, prompt: &str) -> io::Result<PathBuf> {
        self.write(session, &format!("{}.prompt.md", task.code()), prompt)
    }

    pub fn save_response(&self, session: Uuid, task: Task, raw: &str) -> io::Result<PathBuf> {
        self.write(session, &format!("{}.response.md", task.code()), raw)
    }

    pub fn save_session(&self, session: &Session) -> io::Result<PathBuf> {
        let json = to_string_pretty(session).map_err(io::Error::other)?;
        self.write(session.id, "session.json", &json)
    }

    /// Writes a free-form artifact such as the quick pitch.
    pub fn save_named(&self, session: Uuid, file: &str, contents: &str) -> io::Result<PathBuf> {
        self.write(session, file, contents)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_per_session_files() {
        let tmp = tempfile::tempdir().unwrap();
        let t = Transcript::new(tmp.path());
        let session = Session::new();

        let p = t.save_prompt(session.id, Task::FourP, "prompt").unwrap();
        assert_eq!(p, tmp.path().join(session.id.to_string()).join("4p.prompt.md"));
        t.save_response(session.id, Task::FourP, "raw").unwrap();
        let s = t.save_session(&session).unwrap();

        assert_eq!(fs::read_to_string(&p).unwrap(), "prompt");
        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(s).unwrap()).unwrap();
        assert_eq!(json["current"], "input");
        assert_eq!(json["id"], session.id.to_string());
    }
}
