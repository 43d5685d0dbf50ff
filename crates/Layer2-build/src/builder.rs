//! Image builder
//!
//! Drives the daemon's image-build endpoint: descriptor generation, context
//! assembly, base-image pull with progress, the build itself, and progress
//! translation into log lines. Supports both the classic progress protocol
//! (`stream`/`error` events) and the BuildKit protocol (`status`/`id`/
//! `progress` events plus typed trace frames), selected by configuration.
//!
//! The build context directory is removed on every exit path: explicitly on
//! the normal paths, by the guard's destructor otherwise.

use crate::context::{BuildContext, ContextInputs};
use crate::dockerfile::{self, DescriptorInput};
use bollard::image::{BuildImageOptions, BuilderVersion, CreateImageOptions};
use bollard::models::{BuildInfo, BuildInfoAux};
use bollard::Docker;
use dockhand_foundation::{
    AccountRecord, BuildConfig, ConnectionRecord, Error, Result, WorkspaceRecord,
};
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

/// Receives human-readable build progress lines
pub trait ProgressSink: Send + Sync {
    fn line(&self, line: &str);
}

impl<F: Fn(&str) + Send + Sync> ProgressSink for F {
    fn line(&self, line: &str) {
        self(line)
    }
}

/// Everything one image build needs
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub workspace: &'a WorkspaceRecord,
    pub account: Option<&'a AccountRecord>,
    pub connection: &'a ConnectionRecord,

    /// Resolved, verified clone URL
    pub clone_url: String,

    /// Branch the task works on
    pub branch: Option<String>,

    /// Tag for the built image
    pub image_tag: String,

    /// Build-job identifier; doubles as the BuildKit session id
    pub job_id: String,
}

/// Successful build result
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub image_tag: String,
}

/// Builds tagged task images from workspace templates
pub struct ImageBuilder {
    docker: Docker,
    config: BuildConfig,
}

impl ImageBuilder {
    pub fn new(docker: Docker, config: BuildConfig) -> Self {
        Self { docker, config }
    }

    /// Build a tagged image for one task.
    ///
    /// Returns the aggregated failure lines as `Error::Build` when any
    /// progress event carried an error. The context directory does not
    /// outlive this call.
    pub async fn build_image(
        &self,
        request: &BuildRequest<'_>,
        progress: &dyn ProgressSink,
    ) -> Result<BuildOutcome> {
        let git_name = request
            .account
            .and_then(|a| a.git_name.as_deref())
            .unwrap_or(&self.config.git_name_fallback);
        let git_email = request
            .account
            .and_then(|a| a.git_email.as_deref())
            .unwrap_or(&self.config.git_email_fallback);

        let descriptor = dockerfile::generate(&DescriptorInput {
            base_image: &self.config.base_image,
            custom_commands: request.workspace.custom_dockerfile_commands.as_deref(),
            git_name,
            git_email,
            include_instructions: request.workspace.agent_instructions.is_some(),
        });

        let mut secrets: Vec<(String, String)> = Vec::new();
        if let Some(token) = request.account.and_then(|a| a.access_token.clone()) {
            secrets.push(("DOCKHAND_GIT_TOKEN".to_string(), token));
        }

        let context = BuildContext::assemble(&ContextInputs {
            descriptor,
            clone_url: request.clone_url.clone(),
            branch: request.branch.clone(),
            setup_script: request.workspace.setup_script.clone(),
            post_script: request.workspace.post_script.clone(),
            secrets,
            cache_files: request.workspace.cache_files.clone(),
            agent_config: serde_json::json!({
                "provider": request.connection.provider,
                "model": request.connection.model,
            }),
            agent_auth: serde_json::json!({
                "apiKey": request.connection.api_key,
            }),
            instructions: request.workspace.agent_instructions.clone(),
        })
        .await?;

        let result = self
            .run_build(&context, &request.image_tag, &request.job_id, progress)
            .await;

        // Removal happens on every path; surface the rare failure instead of
        // silently relying on the destructor.
        if let Err(e) = context.cleanup() {
            warn!(error = %e, "Failed to remove build context directory");
        }

        result?;
        info!(tag = %request.image_tag, "Image build complete");
        Ok(BuildOutcome {
            image_tag: request.image_tag.clone(),
        })
    }

    async fn run_build(
        &self,
        context: &BuildContext,
        tag: &str,
        job_id: &str,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        self.pull_base_image(progress).await?;

        let archive = context.archive()?;
        let use_buildkit = self.config.use_buildkit;

        let options = BuildImageOptions::<String> {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            pull: true,
            rm: true,
            version: if use_buildkit {
                BuilderVersion::BuilderBuildKit
            } else {
                BuilderVersion::BuilderV1
            },
            session: use_buildkit.then(|| job_id.to_string()),
            ..Default::default()
        };

        debug!(tag, buildkit = use_buildkit, "Starting image build");
        let stream = self.docker.build_image(options, None, Some(archive.into()));

        let errors = consume_build_progress(stream, progress).await;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Build(errors))
        }
    }

    /// Pull the declared base image, reporting progress as log lines
    async fn pull_base_image(&self, progress: &dyn ProgressSink) -> Result<()> {
        let image = self.config.base_image.clone();
        debug!(%image, "Pulling base image");

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions::<String> {
                from_image: image.clone(),
                ..Default::default()
            }),
            None,
            None,
        );

        let mut errors = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => {
                    if let Some(error) = info.error {
                        errors.push(error);
                    } else if let Some(status) = info.status {
                        match info.progress {
                            Some(detail) => progress.line(&format!("{} {}", status, detail)),
                            None => progress.line(&status),
                        }
                    }
                }
                Err(e) => {
                    errors.push(format!("pull {}: {}", image, e));
                    break;
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Build(errors))
        }
    }
}

/// Consume a build progress stream.
///
/// `stream`/`status` events become log lines; any `error` field is fatal and
/// collected; BuildKit trace frames surface vertex names, printable log
/// bytes, and vertex errors. Returns the collected error lines - an empty
/// result means the build succeeded.
pub async fn consume_build_progress<S>(mut stream: S, progress: &dyn ProgressSink) -> Vec<String>
where
    S: Stream<Item = std::result::Result<BuildInfo, bollard::errors::Error>> + Unpin,
{
    let mut errors = Vec::new();

    while let Some(item) = stream.next().await {
        match item {
            Ok(info) => {
                if let Some(error) = info.error {
                    let detail = info
                        .error_detail
                        .and_then(|d| d.message)
                        .filter(|m| *m != error);
                    match detail {
                        Some(detail) => errors.push(format!("{} ({})", error, detail)),
                        None => errors.push(error),
                    }
                    continue;
                }

                if let Some(line) = info.stream.as_deref() {
                    emit_lines(progress, line);
                }
                if let Some(status) = info.status.as_deref() {
                    let mut line = String::new();
                    if let Some(id) = info.id.as_deref() {
                        line.push_str(id);
                        line.push_str(": ");
                    }
                    line.push_str(status);
                    if let Some(detail) = info.progress.as_deref() {
                        line.push(' ');
                        line.push_str(detail);
                    }
                    progress.line(&line);
                }

                match info.aux {
                    Some(BuildInfoAux::Default(image_id)) => {
                        if let Some(id) = image_id.id {
                            progress.line(&format!("writing image {}", id));
                        }
                    }
                    Some(BuildInfoAux::BuildKit(status)) => {
                        for vertex in &status.vertexes {
                            if !vertex.error.is_empty() {
                                errors.push(vertex.error.clone());
                            } else if !vertex.name.is_empty() {
                                progress.line(&vertex.name);
                            }
                        }
                        for log in &status.logs {
                            if let Some(text) = printable(&log.msg) {
                                emit_lines(progress, &text);
                            }
                        }
                    }
                    None => {}
                }
            }
            Err(e) => {
                errors.push(e.to_string());
                break;
            }
        }
    }

    errors
}

/// Split multi-line progress text into individual non-empty log lines
fn emit_lines(progress: &dyn ProgressSink, text: &str) {
    for line in text.lines() {
        let line = line.trim_end();
        if !line.is_empty() {
            progress.line(line);
        }
    }
}

/// Best-effort reduction of trace bytes to printable text
fn printable(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    if cleaned.trim().is_empty() {
        None
    } else {
        Some(cleaned)
    }
}
