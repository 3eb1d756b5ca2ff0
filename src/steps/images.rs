use super::Steps;
use crate::config::{
    fold_image_ref, SecondaryImage, KEY_BUILD_CONTEXT, KEY_BUILD_PLATFORM, KEY_DOCKERFILE,
};
use crate::gateway::registry::extract_registry_url;
use anyhow::{Context, Result};

const DEFAULT_PLATFORM: &str = "linux/amd64";

/// Full push target for an image path under the registry host, lowercased.
pub fn push_target(registry: &str, image_path: &str) -> String {
    fold_image_ref(&format!(
        "{}/{}",
        registry.trim_end_matches('/'),
        image_path.trim_start_matches('/')
    ))
}

impl Steps<'_> {
    fn platform(&self) -> &str {
        self.config.get_or(KEY_BUILD_PLATFORM, DEFAULT_PLATFORM)
    }

    pub fn build_image(&self) -> Result<()> {
        let config = self.config;
        let dockerfile = config.resolve_path(config.get_or(KEY_DOCKERFILE, "Dockerfile"));
        let context = config.resolve_path(config.get_or(KEY_BUILD_CONTEXT, "."));
        tracing::info!(
            image = %self.config.local_image,
            platform = self.platform(),
            dockerfile = %dockerfile.display(),
            "building image"
        );
        self.engine
            .build(&dockerfile, &context, &self.config.local_image, self.platform())
            .with_context(|| format!("build {}", self.config.local_image))
    }

    /// Log the container engine into the account registry and return its host.
    pub fn registry_login(&self) -> Result<String> {
        self.snow
            .run(&["spcs", "image-registry", "login"])
            .context("registry login")?;
        let output = self
            .snow
            .run(&["spcs", "image-registry", "url", "--format", "json"])
            .context("query registry URL")?;
        let registry = extract_registry_url(&output.stdout)?;
        tracing::info!(registry = %registry, "resolved image registry");
        Ok(registry)
    }

    /// Tag and push the primary image, plus secondary images when asked.
    pub fn push_images(&self, include_secondary: bool) -> Result<Vec<String>> {
        let registry = self.registry_login()?;
        let mut pushed = Vec::new();

        let primary = push_target(&registry, &self.config.image);
        self.tag_and_push(&self.config.local_image, &primary)?;
        pushed.push(primary);

        if include_secondary {
            for secondary in &self.config.secondary_images {
                let target = push_target(&registry, &self.secondary_path(secondary));
                self.engine
                    .pull(&secondary.local, self.platform())
                    .with_context(|| format!("pull {}", secondary.local))?;
                self.tag_and_push(&secondary.local, &target)?;
                pushed.push(target);
            }
        }
        Ok(pushed)
    }

    /// Single-target variant: primary image only.
    pub fn tag_and_push_primary(&self) -> Result<String> {
        let mut pushed = self.push_images(false)?;
        pushed.pop().context("no image was pushed")
    }

    fn tag_and_push(&self, source: &str, target: &str) -> Result<()> {
        tracing::info!(source, target, "pushing image");
        self.engine
            .tag(source, target)
            .with_context(|| format!("tag {source} as {target}"))?;
        self.engine
            .push(target)
            .with_context(|| format!("push {target}"))
    }

    fn secondary_path(&self, image: &SecondaryImage) -> String {
        if image.target.starts_with('/') {
            return image.target.clone();
        }
        format!(
            "/{}/{}/{}/{}",
            self.config.database,
            self.config.schema,
            self.config.repository_name(),
            image.target
        )
    }
}
