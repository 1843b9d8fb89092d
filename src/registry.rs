use crate::{
    exec::{Executor, Invocation},
    secret::Secret,
};
use eyre::{eyre, WrapErr};
use std::fmt::{self, Display, Formatter};
use tracing::{info, instrument, warn};

const GCR_HOST: &str = "gcr.io";
const DOCKER_HUB: &str = "docker.io";

/// A registry along with the credentials needed to log in to it
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Registry {
    /// Amazon ECR, authenticated through the ambient AWS credentials
    Ecr { region: String, role: Option<String> },
    /// Google Container Registry, authenticated with a service account JSON key
    Gcr { key: Secret, project_id: String },
    /// Azure Container Registry
    ///
    /// The URL may carry a namespace after the host, images are pushed under all of it.
    Acr {
        url: String,
        username: String,
        password: Secret,
    },
    DockerHub { username: String, password: Secret },
}

/// The base that image names are pushed under, e.g. `gcr.io/my-project`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryUrl(String);

impl RegistryUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    pub fn for_tests(url: &str) -> RegistryUrl {
        RegistryUrl(url.to_owned())
    }
}

impl Display for RegistryUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Registry {
    /// A human-readable name for the registry
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ecr { .. } => "AWS ECR",
            Self::Gcr { .. } => "GCR",
            Self::Acr { .. } => "ACR",
            Self::DockerHub { .. } => "Docker Hub",
        }
    }

    /// Log the container tool in to the registry and resolve the URL to push to
    #[instrument(skip_all, fields(registry = self.name()))]
    pub fn login<E: Executor>(&self, tool: &str, executor: &mut E) -> eyre::Result<RegistryUrl> {
        info!("logging in to {}", self.name());

        let url = match self {
            Self::Ecr { region, role } => {
                if role.is_some() {
                    warn!("the AWS role is not assumed, using the ambient AWS credentials");
                }

                ecr_login(tool, region, executor)?
            }
            Self::Gcr { key, project_id } => {
                executor
                    .exec(
                        &Invocation::new(tool)
                            .args(["login", "-u", "_json_key", "--password-stdin"])
                            .arg(format!("https://{GCR_HOST}"))
                            .stdin(key.clone()),
                    )
                    .wrap_err("failed to log in to GCR")?;

                format!("{GCR_HOST}/{project_id}")
            }
            Self::Acr {
                url,
                username,
                password,
            } => {
                let host = url.split_once('/').map_or(url.as_str(), |(host, _)| host);

                executor
                    .exec(
                        &Invocation::new(tool)
                            .arg("login")
                            .arg(host)
                            .args(["-u", username.as_str(), "--password-stdin"])
                            .stdin(password.clone()),
                    )
                    .wrap_err_with(|| format!("failed to log in to {host}"))?;

                url.clone()
            }
            Self::DockerHub { username, password } => {
                executor
                    .exec(
                        &Invocation::new(tool)
                            .args(["login", "-u", username.as_str(), "--password-stdin"])
                            .stdin(password.clone()),
                    )
                    .wrap_err("failed to log in to Docker Hub")?;

                DOCKER_HUB.to_owned()
            }
        };

        info!(registry_url = %url, "logged in");
        Ok(RegistryUrl(url))
    }
}

fn ecr_login<E: Executor>(tool: &str, region: &str, executor: &mut E) -> eyre::Result<String> {
    executor
        .exec(&aws().args(["configure", "set", "region", region]))
        .wrap_err("failed to configure the AWS region")?;

    let account = executor
        .exec(&aws().args([
            "sts",
            "get-caller-identity",
            "--query",
            "Account",
            "--output",
            "text",
        ]))
        .wrap_err("failed to resolve the AWS account")?;
    if account.is_empty() {
        return Err(eyre!("the AWS caller identity did not include an account"));
    }

    let url = format!("{account}.dkr.ecr.{region}.amazonaws.com");

    let token = executor
        .exec(
            &aws()
                .args(["ecr", "get-login-password", "--region", region])
                .masked(),
        )
        .wrap_err("failed to get an ECR login token")?;

    executor
        .exec(
            &Invocation::new(tool)
                .args(["login", "--username", "AWS", "--password-stdin"])
                .arg(&url)
                .stdin(Secret::new(token)),
        )
        .wrap_err_with(|| format!("failed to log in to {url}"))?;

    Ok(url)
}

fn aws() -> Invocation {
    Invocation::new("aws")
}

#[cfg(test)]
mod tests {
    use super::Registry;
    use crate::{exec::testing::Recorder, secret::Secret};

    fn secrets_only_on_stdin(recorder: &Recorder, secret: &str) {
        for invocation in &recorder.invocations {
            assert!(!invocation.to_string().contains(secret));
            assert!(!invocation.display().contains(secret));
        }
    }

    #[test]
    fn ecr() {
        let mut recorder = Recorder::default()
            .reply("aws", "sts", "123456789012")
            .reply("aws", "ecr", "ecr-token");
        let registry = Registry::Ecr {
            region: String::from("eu-west-1"),
            role: None,
        };

        let url = registry.login("docker", &mut recorder).unwrap();

        assert_eq!(url.as_str(), "123456789012.dkr.ecr.eu-west-1.amazonaws.com");
        assert_eq!(
            recorder.commands(),
            [
                "aws configure set region eu-west-1",
                "aws sts get-caller-identity --query Account --output text",
                "aws ecr get-login-password --region eu-west-1",
                "docker login --username AWS --password-stdin 123456789012.dkr.ecr.eu-west-1.amazonaws.com",
            ]
        );

        let invocations = &recorder.invocations;
        assert!(!invocations[0].is_masked());
        assert!(!invocations[1].is_masked());
        assert!(invocations[2].is_masked());
        assert_eq!(invocations[3].secret().map(Secret::expose), Some("ecr-token"));
        secrets_only_on_stdin(&recorder, "ecr-token");
    }

    #[test]
    fn ecr_requires_an_account() {
        let mut recorder = Recorder::default().reply("aws", "sts", "");
        let registry = Registry::Ecr {
            region: String::from("eu-west-1"),
            role: Some(String::from("arn:aws:iam::123456789012:role/ci")),
        };

        assert!(registry.login("docker", &mut recorder).is_err());
        assert_eq!(recorder.invocations.len(), 2);
    }

    #[test]
    fn ecr_stops_at_first_failure() {
        let mut recorder = Recorder::default().fail("aws", "configure");
        let registry = Registry::Ecr {
            region: String::from("eu-west-1"),
            role: None,
        };

        let error = registry.login("docker", &mut recorder).unwrap_err();
        assert!(format!("{error:?}").contains("simulated failure"));
        assert_eq!(recorder.invocations.len(), 1);
    }

    #[test]
    fn gcr() {
        let mut recorder = Recorder::default();
        let registry = Registry::Gcr {
            key: Secret::new(r#"{"type":"service_account"}"#),
            project_id: String::from("my-project"),
        };

        let url = registry.login("docker", &mut recorder).unwrap();

        assert_eq!(url.as_str(), "gcr.io/my-project");
        assert_eq!(
            recorder.commands(),
            ["docker login -u _json_key --password-stdin https://gcr.io"]
        );
        assert_eq!(
            recorder.invocations[0].secret().map(Secret::expose),
            Some(r#"{"type":"service_account"}"#)
        );
        secrets_only_on_stdin(&recorder, "service_account");
    }

    #[test]
    fn acr() {
        let mut recorder = Recorder::default();
        let registry = Registry::Acr {
            url: String::from("example.azurecr.io"),
            username: String::from("someone"),
            password: Secret::new("hunter2"),
        };

        let url = registry.login("docker", &mut recorder).unwrap();

        assert_eq!(url.as_str(), "example.azurecr.io");
        assert_eq!(
            recorder.commands(),
            ["docker login example.azurecr.io -u someone --password-stdin"]
        );
        assert!(recorder.invocations[0].is_masked());
        secrets_only_on_stdin(&recorder, "hunter2");
    }

    #[test]
    fn acr_with_namespace() {
        let mut recorder = Recorder::default();
        let registry = Registry::Acr {
            url: String::from("myreg.azurecr.io/team"),
            username: String::from("someone"),
            password: Secret::new("hunter2"),
        };

        let url = registry.login("docker", &mut recorder).unwrap();

        assert_eq!(url.as_str(), "myreg.azurecr.io/team");
        assert_eq!(
            recorder.commands(),
            ["docker login myreg.azurecr.io -u someone --password-stdin"]
        );
    }

    #[test]
    fn dockerhub() {
        let mut recorder = Recorder::default();
        let registry = Registry::DockerHub {
            username: String::from("someone"),
            password: Secret::new("hunter2"),
        };

        let url = registry.login("podman", &mut recorder).unwrap();

        assert_eq!(url.as_str(), "docker.io");
        assert_eq!(
            recorder.commands(),
            ["podman login -u someone --password-stdin"]
        );
        assert_eq!(
            recorder.invocations[0].secret().map(Secret::expose),
            Some("hunter2")
        );
        secrets_only_on_stdin(&recorder, "hunter2");
    }

    #[test]
    fn shell_metacharacters_stay_single_arguments() {
        let mut recorder = Recorder::default();
        let registry = Registry::DockerHub {
            username: String::from("someone; rm -rf /"),
            password: Secret::new("it's"),
        };

        registry.login("docker", &mut recorder).unwrap();

        assert_eq!(
            recorder.invocations[0].arguments(),
            ["login", "-u", "someone; rm -rf /", "--password-stdin"]
        );
    }
}
