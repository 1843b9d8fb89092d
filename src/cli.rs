use crate::{build::Build, registry::Registry, secret::Secret};
use clap::{builder::TypedValueParser, error::ErrorKind, CommandFactory, Parser, ValueEnum};
use std::{ffi::OsStr, path::PathBuf};
use tracing::Level;

mod parsers;

/// Parse the command line arguments
pub fn parse() -> Args {
    Args::parse()
}

/// Log in to a container registry, then build, push, and report an image
///
/// Every option can also be supplied through the environment, which is how CI
/// pipelines pass their step inputs.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// The kind of registry to authenticate against
    #[arg(long, env = "INPUT_REGISTRY", value_enum)]
    registry: RegistryKind,

    /// The name of the image, without registry or tag
    #[arg(long, env = "INPUT_IMAGE", value_parser = parsers::string())]
    image: String,
    /// The version to tag the image with
    #[arg(long, env = "INPUT_IMAGE_VERSION", value_parser = parsers::string())]
    image_version: String,
    /// The path to the Dockerfile
    #[arg(long, env = "INPUT_IMAGE_DOCKERFILE")]
    dockerfile: PathBuf,
    /// The directory to use as the build context
    #[arg(long, default_value = ".", env = "INPUT_CONTEXT")]
    context: PathBuf,
    /// Whitespace-separated build arguments in the format name=value
    #[arg(long, default_value = "", env = "INPUT_ARGS")]
    args: String,
    /// A registry reference to import the build cache from
    ///
    /// When set, the image is built with buildx, exporting an inline cache and importing the
    /// cache from this reference.
    #[arg(long, env = "INPUT_IMAGE_PREVIOUS_VERSION")]
    previous_version: Option<String>,

    /// The user to log in as (ACR and Docker Hub)
    #[arg(long, env = "INPUT_USERNAME")]
    username: Option<String>,
    /// The password to log in with (ACR and Docker Hub), or the JSON key (GCR)
    #[arg(long, env = "INPUT_PASSWORD", hide_env_values = true)]
    password: Option<Secret>,
    /// The AWS role for ECR
    ///
    /// Accepted for compatibility, the ambient AWS credentials are always used.
    #[arg(long, env = "INPUT_AWS_ROLE")]
    aws_role: Option<String>,
    /// The AWS region hosting the ECR registry
    #[arg(long, env = "INPUT_AWS_REGION")]
    aws_region: Option<String>,
    /// The GCP project to push into (GCR)
    #[arg(long, env = "INPUT_PROJECT_ID")]
    project_id: Option<String>,
    /// The registry to log in to and push under (ACR), e.g. `myreg.azurecr.io/team`
    #[arg(long, env = "INPUT_REGISTRY_URL")]
    registry_url: Option<String>,

    /// The container engine to invoke
    #[arg(
        long,
        default_value = "docker",
        env = "INPUT_CONTAINER_TOOL",
        value_parser = parsers::string(),
    )]
    container_tool: String,
    /// The file to append step outputs to
    #[arg(long, env = "GITHUB_OUTPUT")]
    output: Option<PathBuf>,

    /// The minimum level to log at
    #[arg(long, default_value_t = Level::INFO, env = "LOG_LEVEL")]
    pub log_level: Level,
    /// Fine-grained log filter directives
    #[arg(long, env = "RUST_LOG")]
    pub log_filter: Option<String>,
}

/// The supported registries
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RegistryKind {
    /// Amazon Elastic Container Registry
    Ecr,
    /// Google Container Registry
    Gcr,
    /// Azure Container Registry
    Acr,
    /// Docker Hub
    #[value(name = "dockerhub")]
    DockerHub,
}

/// The validated configuration for a run
#[derive(Debug)]
pub struct Config {
    pub registry: Registry,
    pub build: Build,
    pub container_tool: String,
    pub output: Option<PathBuf>,
}

impl Args {
    /// Check that the credentials required by the selected registry are present
    pub fn into_config(self) -> Result<Config, clap::Error> {
        let username = non_empty(self.username);
        let password = self.password.filter(|p| !p.is_empty());
        let aws_region = non_empty(self.aws_region);
        let project_id = non_empty(self.project_id);

        let registry = match self.registry {
            RegistryKind::Ecr => Registry::Ecr {
                region: required(aws_region, "ecr", "--aws-region")?,
                role: non_empty(self.aws_role),
            },
            RegistryKind::Gcr => Registry::Gcr {
                key: required(password, "gcr", "--password")?,
                project_id: required(project_id, "gcr", "--project-id")?,
            },
            RegistryKind::Acr => Registry::Acr {
                url: registry_url(required(
                    non_empty(self.registry_url),
                    "acr",
                    "--registry-url",
                )?)?,
                username: required(username, "acr", "--username")?,
                password: required(password, "acr", "--password")?,
            },
            RegistryKind::DockerHub => Registry::DockerHub {
                username: required(username, "dockerhub", "--username")?,
                password: required(password, "dockerhub", "--password")?,
            },
        };

        let build = Build {
            image: self.image,
            version: self.image_version,
            dockerfile: self.dockerfile,
            context: self.context,
            args: self.args,
            previous_version: non_empty(self.previous_version),
        };

        Ok(Config {
            registry,
            build,
            container_tool: self.container_tool,
            output: self.output.filter(|path| !path.as_os_str().is_empty()),
        })
    }
}

/// Pipeline runners export unset inputs as empty strings
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required<T>(value: Option<T>, registry: &str, flag: &str) -> Result<T, clap::Error> {
    value.ok_or_else(|| {
        Args::command().error(
            ErrorKind::MissingRequiredArgument,
            format!("{flag} is required when logging in to {registry}"),
        )
    })
}

/// Only the registries that log in to a caller-supplied host validate it
fn registry_url(raw: String) -> Result<String, clap::Error> {
    let mut cmd = Args::command();
    cmd.build();

    let arg = cmd
        .get_arguments()
        .find(|arg| arg.get_id() == "registry_url");

    parsers::registry_host().parse_ref(&cmd, arg, OsStr::new(&raw))
}
