#![allow(dead_code)]

pub mod fakes;

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

use screencap::config::Settings;
use screencap::storage::JsonRecordingStore;

/// Run the binary in a throwaway sandbox
pub fn run_screencap(args: &[&str]) -> Output {
    Sandbox::new().run(args)
}

pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

pub fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// One temporary root holding every directory the binary may write to:
/// XDG config and data homes, HOME, and the recordings folder.
pub struct Sandbox {
    root: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("create sandbox root"),
        }
    }

    fn subdir(&self, name: &str) -> PathBuf {
        let path = self.root.path().join(name);
        std::fs::create_dir_all(&path).expect("create sandbox directory");
        path
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Where recordings land; passed through `SCREENCAP_OUTPUT_DIR`
    pub fn recordings_dir(&self) -> PathBuf {
        self.subdir("videos")
    }

    pub fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_screencap"))
            .args(args)
            .env("HOME", self.subdir("home"))
            .env("XDG_CONFIG_HOME", self.subdir("config"))
            .env("XDG_DATA_HOME", self.subdir("share"))
            .env("SCREENCAP_OUTPUT_DIR", self.recordings_dir())
            .env_remove("RUST_LOG")
            .output()
            .expect("failed to execute screencap binary")
    }

    /// The config file the sandboxed binary reads
    pub fn config_file(&self) -> PathBuf {
        let output = self.run(&["config", "path"]);
        assert!(
            output.status.success(),
            "config path should succeed\nstderr:\n{}",
            stderr_of(&output)
        );
        PathBuf::from(stdout_of(&output).trim())
    }

    pub fn write_config(&self, contents: &str) {
        let path = self.config_file();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create config directory");
        }
        std::fs::write(&path, contents).expect("write config file");
    }

    /// Point the binary's data directory into the sandbox and open the
    /// recents list it will read.
    pub fn recents(&self) -> JsonRecordingStore {
        let data_dir = self.subdir("data");
        self.write_config(&format!(
            "[general]\ndata_dir = {:?}\n",
            data_dir.display().to_string()
        ));

        let settings = Settings::load_from(&self.config_file()).expect("load sandbox config");
        assert_eq!(settings.general.data_dir, data_dir);
        JsonRecordingStore::new(settings.recordings_store_path())
    }
}
