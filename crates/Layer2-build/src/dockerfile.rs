//! Descriptor (Dockerfile) generation
//!
//! The descriptor is generated deterministically from the base image, a
//! fixed package list, the tool installation block, the workspace's custom
//! commands (inserted verbatim after the fixed block), and the git identity
//! taken from the auth account with configured fallbacks.

/// Packages installed in every task image
pub const FIXED_PACKAGES: &[&str] = &[
    "bash",
    "ca-certificates",
    "curl",
    "git",
    "jq",
    "openssh-client",
    "python3",
    "ripgrep",
    "unzip",
];

/// Files every build context contains, in the order they are written
pub const CONTEXT_FILES: &[&str] = &[
    "Dockerfile",
    "setup.sh",
    "validate.sh",
    "agent-config.json",
    "agent-auth.json",
];

/// Inputs the descriptor is derived from
#[derive(Debug, Clone)]
pub struct DescriptorInput<'a> {
    pub base_image: &'a str,
    pub custom_commands: Option<&'a str>,
    pub git_name: &'a str,
    pub git_email: &'a str,

    /// Whether the context carries custom agent instructions
    pub include_instructions: bool,
}

/// Generate the descriptor text.
///
/// Identical inputs always produce identical output.
pub fn generate(input: &DescriptorInput<'_>) -> String {
    let mut out = String::new();

    out.push_str(&format!("FROM {}\n", input.base_image));
    out.push_str("ENV DEBIAN_FRONTEND=noninteractive\n\n");

    out.push_str("RUN apt-get update \\\n");
    out.push_str(&format!(
        "    && apt-get install -y --no-install-recommends {} \\\n",
        FIXED_PACKAGES.join(" ")
    ));
    out.push_str("    && rm -rf /var/lib/apt/lists/*\n\n");

    // Tool installation: the agent runtime the setup script drives
    out.push_str("RUN curl -fsSL https://deb.nodesource.com/setup_22.x | bash - \\\n");
    out.push_str("    && apt-get install -y --no-install-recommends nodejs \\\n");
    out.push_str("    && rm -rf /var/lib/apt/lists/*\n\n");

    out.push_str(&format!(
        "RUN git config --system user.name \"{}\" \\\n    && git config --system user.email \"{}\"\n\n",
        input.git_name, input.git_email
    ));

    if let Some(custom) = input.custom_commands {
        let custom = custom.trim();
        if !custom.is_empty() {
            out.push_str(custom);
            out.push_str("\n\n");
        }
    }

    out.push_str("WORKDIR /workspace\n\n");
    out.push_str("COPY setup.sh /opt/dockhand/setup.sh\n");
    out.push_str("COPY validate.sh /opt/dockhand/validate.sh\n");
    out.push_str("COPY agent-config.json /root/.dockhand/config.json\n");
    out.push_str("COPY agent-auth.json /root/.dockhand/auth.json\n");
    if input.include_instructions {
        out.push_str("COPY AGENT.md /root/.dockhand/AGENT.md\n");
    }
    out.push_str("RUN chmod +x /opt/dockhand/setup.sh /opt/dockhand/validate.sh\n\n");
    out.push_str("CMD [\"/opt/dockhand/setup.sh\"]\n");

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(custom: Option<&'a str>) -> DescriptorInput<'a> {
        DescriptorInput {
            base_image: "ubuntu:24.04",
            custom_commands: custom,
            git_name: "Dockhand Agent",
            git_email: "agent@dockhand.local",
            include_instructions: false,
        }
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = generate(&input(Some("RUN apt-get install -y make")));
        let b = generate(&input(Some("RUN apt-get install -y make")));
        assert_eq!(a, b);
    }

    #[test]
    fn test_custom_commands_follow_fixed_block() {
        let text = generate(&input(Some("RUN echo custom-marker")));

        let git_pos = text.find("git config --system").unwrap();
        let custom_pos = text.find("custom-marker").unwrap();
        let workdir_pos = text.find("WORKDIR /workspace").unwrap();

        assert!(git_pos < custom_pos);
        assert!(custom_pos < workdir_pos);
    }

    #[test]
    fn test_no_custom_commands() {
        let text = generate(&input(None));
        assert!(text.starts_with("FROM ubuntu:24.04\n"));
        assert!(text.contains("WORKDIR /workspace"));
    }

    #[test]
    fn test_git_identity_embedded() {
        let text = generate(&DescriptorInput {
            base_image: "debian:12",
            custom_commands: None,
            git_name: "Jess Doe",
            git_email: "jess@example.com",
            include_instructions: false,
        });
        assert!(text.contains("user.name \"Jess Doe\""));
        assert!(text.contains("user.email \"jess@example.com\""));
    }

    #[test]
    fn test_instructions_copied_only_when_present() {
        let without = generate(&input(None));
        assert!(!without.contains("AGENT.md"));

        let mut with = input(None);
        with.include_instructions = true;
        assert!(generate(&with).contains("COPY AGENT.md /root/.dockhand/AGENT.md"));
    }
}
