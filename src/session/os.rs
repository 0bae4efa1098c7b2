//! Remote operating system detection
//!
//! Runs once per session, inside the open critical section, before the
//! session is published to the pool. Probes the release tool
//! (`lsb_release -a` on Linux, `sw_vers` on Darwin), the hardware name, the
//! remote PATH and the remote user.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{SessionState, SystemPath};
use crate::error::Result;
use crate::util::escape_stdout;

/// Descriptor of the remote operating system
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OperatingSystem {
    /// Distribution or product name, lowercased
    pub name: String,

    /// Release version, lowercased
    pub version: String,

    /// Normalized architecture: `amd64`, `arm64`, or the raw hardware name
    pub architecture: String,

    /// Toolchain-style architecture: `x64`, `aarch64`, or the raw name
    pub arch: String,

    /// Raw `uname -m` output
    pub hardware: String,

    /// Kernel family, e.g. `linux` or `darwin`
    pub system: String,
}

fn is_amd64_architecture(candidate: &str) -> bool {
    candidate.contains("amd64") || candidate.contains("x86_64")
}

fn is_arm64_architecture(hardware: &str) -> bool {
    hardware.contains("aarch64")
}

/// Probe the session's remote OS, PATH and user; fills `state.os`,
/// `state.path` and `state.username` in place.
pub(crate) async fn detect_operating_system(state: &mut SessionState) -> Result<OperatingSystem> {
    let mut os = OperatingSystem::default();
    state.path = SystemPath::default();

    let version_check_command = if state.system() == "darwin" {
        "sw_vers"
    } else {
        "lsb_release -a"
    };
    let output = state.run(version_check_command, None, 0, &[]).await?;

    for line in output.lines() {
        let line = line.trim_end_matches('\r');
        if is_amd64_architecture(line) {
            os.architecture = "amd64".to_string();
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.to_lowercase().replace(' ', "");
        let value = value.trim_matches([' ', '\t', '\r']).replace(' ', "");
        match key.as_str() {
            "productname" | "distributorid" => os.name = value.to_lowercase(),
            "productversion" | "release" => os.version = value.to_lowercase(),
            _ => {}
        }
    }

    os.hardware = state.run("uname -m", None, 0, &[]).await?;
    os.arch = os.architecture.clone();
    if is_amd64_architecture(&os.hardware) {
        os.architecture = "amd64".to_string();
        os.arch = "x64".to_string();
    }
    if is_arm64_architecture(&os.hardware) {
        os.architecture = "arm64".to_string();
        os.arch = "aarch64".to_string();
    }

    os.system = state.system();
    extract_os_path(state).await?;
    extract_os_user(state).await?;
    Ok(os)
}

/// Populate the session PATH from `echo $PATH`; the first line that looks
/// like a PATH value wins
async fn extract_os_path(state: &mut SessionState) -> Result<()> {
    let output = state.run("echo $PATH", None, 0, &[]).await?;
    for line in output.lines() {
        let line = line.trim_end_matches('\r');
        if !line.contains(':') || !line.contains('/') {
            continue;
        }
        state.path = SystemPath::new(line.split(':'));
        break;
    }
    Ok(())
}

/// Populate the session username from `echo $USER`, newline-stripped
async fn extract_os_user(state: &mut SessionState) -> Result<()> {
    let output = state.run("echo $USER", None, 0, &[]).await?;
    let output = escape_stdout(&output).replace(['\n', '\r'], "");
    state.username = output;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::testkit::{MockScript, MockTransport};
    use std::sync::Arc;

    async fn state_with(script: &MockScript) -> SessionState {
        let transport = Arc::new(MockTransport::new(script.clone()));
        let shell = crate::ssh::TransportAdapter::open_multi_command_shell(transport.clone())
            .await
            .unwrap();
        SessionState::new("fp", transport, shell, None)
    }

    #[tokio::test]
    async fn test_detects_linux_release_and_arch() {
        let script = MockScript::new();
        script.reply(
            "lsb_release -a",
            "Distributor ID:\tUbuntu\nRelease:\t22.04\nCodename:\tjammy\n",
        );
        script.reply("uname -m", "x86_64\n");
        script.reply("echo $PATH", "/usr/local/bin:/usr/bin:/bin\n");
        script.reply("echo $USER", "deploy\n");

        let mut state = state_with(&script).await;
        let os = detect_operating_system(&mut state).await.unwrap();

        assert_eq!(os.name, "ubuntu");
        assert_eq!(os.version, "22.04");
        assert_eq!(os.architecture, "amd64");
        assert_eq!(os.arch, "x64");
        assert_eq!(os.system, "linux");
        assert_eq!(state.username, "deploy");
        assert_eq!(state.path.env_value(), "/usr/local/bin:/usr/bin:/bin");
    }

    #[tokio::test]
    async fn test_arm_hardware_mapping() {
        let script = MockScript::new();
        script.reply("uname -m", "aarch64\n");
        script.reply("echo $USER", "ops\n");

        let mut state = state_with(&script).await;
        let os = detect_operating_system(&mut state).await.unwrap();

        assert_eq!(os.architecture, "arm64");
        assert_eq!(os.arch, "aarch64");
    }

    #[tokio::test]
    async fn test_username_newlines_are_stripped() {
        let script = MockScript::new();
        script.reply("echo $USER", "deploy\r\n");

        let mut state = state_with(&script).await;
        detect_operating_system(&mut state).await.unwrap();
        assert_eq!(state.username, "deploy");
    }
}
