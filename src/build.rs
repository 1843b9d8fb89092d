use crate::{
    exec::{Executor, Invocation},
    registry::RegistryUrl,
};
use eyre::WrapErr;
use itertools::Itertools;
use std::{iter, path::PathBuf};
use tracing::{info, instrument};

/// What to build and how to tag it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Build {
    pub image: String,
    pub version: String,
    pub dockerfile: PathBuf,
    pub context: PathBuf,
    /// Whitespace-separated `name=value` pairs
    pub args: String,
    /// The registry reference to import the layer cache from
    pub previous_version: Option<String>,
}

impl Build {
    /// The fully-qualified tag, `<registry>/<image>:<version>`
    pub fn tag(&self, registry: &RegistryUrl) -> String {
        format!("{}/{}:{}", registry.as_str(), self.image, self.version)
    }

    /// The `--build-arg` flags, one per argument, in the order given
    pub fn build_args(&self) -> Vec<&str> {
        let args = self.args.split_whitespace().collect::<Vec<_>>();
        let flags = args.len() * 2;

        iter::repeat("--build-arg")
            .interleave_shortest(args)
            .take(flags)
            .collect()
    }

    /// The build command, using buildx when there is a cache to import
    pub fn command(&self, tool: &str, tag: &str) -> Invocation {
        let invocation = match &self.previous_version {
            Some(_) => Invocation::new(tool).args(["buildx", "build"]),
            None => Invocation::new(tool).arg("build"),
        };

        let invocation = invocation
            .args(["-t", tag])
            .args(self.build_args())
            .arg("-f")
            .arg(self.dockerfile.to_string_lossy())
            .arg(self.context.to_string_lossy());

        match &self.previous_version {
            Some(previous) => invocation
                .args(["--cache-to", "type=inline", "--cache-from"])
                .arg(format!("type=registry,ref={previous}")),
            None => invocation,
        }
    }
}

/// Build the image and push it, returning the pushed tag
#[instrument(skip_all, fields(image = %build.image, version = %build.version))]
pub fn publish<E: Executor>(
    build: &Build,
    registry: &RegistryUrl,
    tool: &str,
    executor: &mut E,
) -> eyre::Result<String> {
    let tag = build.tag(registry);
    info!(%tag, cached = build.previous_version.is_some(), "building image");

    executor
        .exec(&build.command(tool, &tag))
        .wrap_err_with(|| format!("failed to build {tag}"))?;

    info!(%tag, "pushing image");
    executor
        .exec(&Invocation::new(tool).arg("push").arg(&tag))
        .wrap_err_with(|| format!("failed to push {tag}"))?;

    Ok(tag)
}
