//! Optional capture of session traffic for later replay

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;

/// Sidecar recording every (stdin, stdout) exchange on a session
pub trait ReplayRecorder: Send + Sync {
    /// Record one command and the output it produced
    fn record(&self, stdin: &str, stdout: &str);

    /// Persist everything recorded so far
    fn store(&self) -> Result<()>;
}

/// Directory-backed recorder writing numbered command/output file pairs
pub struct DirRecorder {
    basedir: PathBuf,
    exchanges: Mutex<Vec<(String, String)>>,
}

impl DirRecorder {
    /// Create a recorder rooted at `basedir`, creating it if needed
    pub fn new(basedir: impl AsRef<Path>) -> Result<Self> {
        let basedir = basedir.as_ref().to_path_buf();
        std::fs::create_dir_all(&basedir)?;
        Ok(Self {
            basedir,
            exchanges: Mutex::new(Vec::new()),
        })
    }
}

impl ReplayRecorder for DirRecorder {
    fn record(&self, stdin: &str, stdout: &str) {
        self.exchanges
            .lock()
            .expect("recorder lock")
            .push((stdin.to_string(), stdout.to_string()));
    }

    fn store(&self) -> Result<()> {
        let exchanges = self.exchanges.lock().expect("recorder lock");
        for (i, (stdin, stdout)) in exchanges.iter().enumerate() {
            std::fs::write(self.basedir.join(format!("{:03}.stdin", i)), stdin)?;
            std::fs::write(self.basedir.join(format!("{:03}.stdout", i)), stdout)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_and_stores_pairs() {
        let dir = std::env::temp_dir().join("rexec-replay-test");
        let _ = std::fs::remove_dir_all(&dir);
        let recorder = DirRecorder::new(&dir).unwrap();
        recorder.record("ls", "a.txt\n");
        recorder.record("pwd", "/tmp\n");
        recorder.store().unwrap();

        assert_eq!(std::fs::read_to_string(dir.join("000.stdin")).unwrap(), "ls");
        assert_eq!(
            std::fs::read_to_string(dir.join("001.stdout")).unwrap(),
            "/tmp\n"
        );
    }
}
