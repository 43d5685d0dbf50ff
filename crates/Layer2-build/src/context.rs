//! Build context assembly
//!
//! A build context is an ephemeral, exclusively-owned directory that exists
//! for exactly one image build: the generated descriptor, the wrapped setup
//! and validation scripts, the secrets payload, and the generated agent
//! config/auth files. The directory is removed on every exit path - the
//! guard's destructor handles paths that never reach explicit cleanup.

use crate::dockerfile::CONTEXT_FILES;
use dockhand_foundation::{Error, Result};
use std::path::Path;
use tempfile::TempDir;
use tracing::debug;

/// Everything the context directory is materialized from
#[derive(Debug, Clone)]
pub struct ContextInputs {
    /// Generated descriptor text
    pub descriptor: String,

    /// Resolved, clonable source URL
    pub clone_url: String,

    /// Branch the task works on
    pub branch: Option<String>,

    /// Workspace setup script, run after the clone
    pub setup_script: Option<String>,

    /// Workspace validation script
    pub post_script: Option<String>,

    /// Secret environment entries exported before the setup script runs
    pub secrets: Vec<(String, String)>,

    /// Paths cached between builds, exported for the setup script
    pub cache_files: Vec<String>,

    /// Generated agent configuration
    pub agent_config: serde_json::Value,

    /// Generated agent credentials
    pub agent_auth: serde_json::Value,

    /// Custom agent instructions, when the workspace carries any
    pub instructions: Option<String>,
}

/// Ephemeral directory for one image build
pub struct BuildContext {
    dir: TempDir,
}

impl BuildContext {
    /// Materialize the context directory from its inputs
    pub async fn assemble(inputs: &ContextInputs) -> Result<Self> {
        let dir = TempDir::with_prefix("dockhand-build-")?;
        let root = dir.path();

        tokio::fs::write(root.join("Dockerfile"), &inputs.descriptor).await?;
        tokio::fs::write(root.join("setup.sh"), wrap_setup_script(inputs)).await?;
        tokio::fs::write(root.join("validate.sh"), wrap_validate_script(inputs)).await?;
        tokio::fs::write(
            root.join("agent-config.json"),
            serde_json::to_vec_pretty(&inputs.agent_config)?,
        )
        .await?;
        tokio::fs::write(
            root.join("agent-auth.json"),
            serde_json::to_vec_pretty(&inputs.agent_auth)?,
        )
        .await?;

        if let Some(instructions) = &inputs.instructions {
            tokio::fs::write(root.join("AGENT.md"), instructions).await?;
        }

        debug!(path = %root.display(), "Assembled build context");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Pack the directory into a tar archive for the daemon's build endpoint
    pub fn archive(&self) -> Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        builder
            .append_dir_all(".", self.dir.path())
            .map_err(Error::Io)?;
        builder.into_inner().map_err(Error::Io)
    }

    /// Remove the directory, surfacing removal errors.
    ///
    /// Dropping the guard removes it too; this variant exists so the builder
    /// can log a failed removal instead of losing it.
    pub fn cleanup(self) -> Result<()> {
        self.dir.close().map_err(Error::Io)
    }
}

/// Wrap the workspace setup script with clone bootstrapping and secrets
fn wrap_setup_script(inputs: &ContextInputs) -> String {
    let mut script = String::from("#!/usr/bin/env bash\nset -euo pipefail\n\n");

    for (key, value) in &inputs.secrets {
        script.push_str(&format!("export {}={}\n", key, shell_quote(value)));
    }
    script.push_str(&format!(
        "export DOCKHAND_CLONE_URL={}\n",
        shell_quote(&inputs.clone_url)
    ));
    if let Some(branch) = &inputs.branch {
        script.push_str(&format!("export DOCKHAND_BRANCH={}\n", shell_quote(branch)));
    }
    if !inputs.cache_files.is_empty() {
        script.push_str(&format!(
            "export DOCKHAND_CACHE_FILES={}\n",
            shell_quote(&inputs.cache_files.join(":"))
        ));
    }

    script.push_str("\nif [ ! -d /workspace/repo/.git ]; then\n");
    match &inputs.branch {
        Some(_) => script.push_str(
            "    git clone --branch \"$DOCKHAND_BRANCH\" \"$DOCKHAND_CLONE_URL\" /workspace/repo\n",
        ),
        None => script.push_str("    git clone \"$DOCKHAND_CLONE_URL\" /workspace/repo\n"),
    }
    script.push_str("fi\ncd /workspace/repo\n\n");

    if let Some(setup) = &inputs.setup_script {
        script.push_str(setup);
        if !setup.ends_with('\n') {
            script.push('\n');
        }
    }

    script.push_str("\nexec sleep infinity\n");
    script
}

/// Wrap the workspace validation script
fn wrap_validate_script(inputs: &ContextInputs) -> String {
    let mut script = String::from("#!/usr/bin/env bash\nset -euo pipefail\ncd /workspace/repo\n\n");
    if let Some(post) = &inputs.post_script {
        script.push_str(post);
        if !post.ends_with('\n') {
            script.push('\n');
        }
    } else {
        script.push_str("echo \"no validation script configured\"\n");
    }
    script
}

/// Single-quote a value for shell embedding
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
