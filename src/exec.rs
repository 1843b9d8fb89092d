use crate::secret::Secret;
use std::{
    fmt::{self, Display, Formatter},
    io::{self, Write},
    process::{Command, ExitStatus, Stdio},
};
use tracing::{debug, info, warn};

/// A single external command, described as an argument vector
///
/// Arguments are never interpolated through a shell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    stdin: Option<Secret>,
    masked: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Invocation {
        Invocation {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            masked: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Invocation {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed a secret to the process' stdin
    ///
    /// Implies [`Invocation::masked`].
    pub fn stdin(mut self, secret: Secret) -> Invocation {
        self.stdin = Some(secret);
        self.masked = true;
        self
    }

    /// Don't log the command line or echo the output
    pub fn masked(mut self) -> Invocation {
        self.masked = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn secret(&self) -> Option<&Secret> {
        self.stdin.as_ref()
    }

    pub fn is_masked(&self) -> bool {
        self.masked
    }

    /// A rendering of the command that is safe to log
    pub fn display(&self) -> String {
        if self.masked {
            match self.args.first() {
                Some(subcommand) => format!("{} {subcommand} [masked]", self.program),
                None => format!("{} [masked]", self.program),
            }
        } else {
            self.to_string()
        }
    }
}

impl Display for Invocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }

        Ok(())
    }
}

/// Errors that can occur while running an external command
#[derive(Debug)]
pub enum CommandError {
    /// The process could not be started or communicated with
    Spawn { command: String, source: io::Error },
    /// The process exited with a non-zero status
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn { source, .. } => Some(source),
            Self::Failed { .. } => None,
        }
    }
}

impl Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { command, .. } => write!(f, "failed to execute `{command}`"),
            Self::Failed {
                command,
                status,
                stderr,
            } => {
                write!(f, "`{command}` exited with non-zero status ({status})")?;
                if !stderr.is_empty() {
                    write!(f, ":\n{stderr}")?;
                }

                Ok(())
            }
        }
    }
}

/// Runs invocations and returns their trimmed stdout
pub trait Executor {
    fn exec(&mut self, invocation: &Invocation) -> Result<String, CommandError>;
}

/// Executes invocations as real child processes
#[derive(Debug, Default)]
pub struct System;

impl Executor for System {
    fn exec(&mut self, invocation: &Invocation) -> Result<String, CommandError> {
        let command = invocation.display();
        if invocation.is_masked() {
            info!(%command, "running masked command");
        } else {
            info!(%command, "running command");
        }

        let spawn_error = |source| CommandError::Spawn {
            command: command.clone(),
            source,
        };

        let mut child = Command::new(invocation.program())
            .args(invocation.arguments())
            .stdin(match invocation.secret() {
                Some(_) => Stdio::piped(),
                None => Stdio::null(),
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        if let Some(secret) = invocation.secret() {
            // stdin must be closed before waiting so the process sees EOF
            if let Some(mut stdin) = child.stdin.take() {
                match stdin.write_all(secret.expose().as_bytes()) {
                    // The process exited without reading, its status and stderr say why
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                    result => result.map_err(spawn_error)?,
                }
            }
        }

        let output = child.wait_with_output().map_err(spawn_error)?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();

        if !output.status.success() {
            return Err(CommandError::Failed {
                command: command.clone(),
                status: output.status,
                stderr,
            });
        }

        if let Err(error) = relay(invocation, &output.stdout, &mut io::stdout()) {
            warn!(%command, %error, "failed to echo command output");
        }
        if !invocation.is_masked() && !stderr.is_empty() {
            debug!(%command, %stderr, "command wrote to stderr");
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

/// Echo a command's stdout, unless it may carry a secret
fn relay<W: Write>(invocation: &Invocation, stdout: &[u8], sink: &mut W) -> io::Result<()> {
    if invocation.is_masked() {
        return Ok(());
    }

    sink.write_all(stdout)?;
    sink.flush()
}

#[cfg(test)]
pub mod testing {
    use super::{CommandError, Executor, Invocation};
    use std::{os::unix::process::ExitStatusExt, process::ExitStatus};

    /// Records every invocation and answers with canned responses
    ///
    /// Responses are matched against the program and its first argument.
    #[derive(Debug, Default)]
    pub struct Recorder {
        pub invocations: Vec<Invocation>,
        replies: Vec<(String, String, String)>,
        failures: Vec<(String, String)>,
    }

    impl Recorder {
        pub fn reply(mut self, program: &str, subcommand: &str, stdout: &str) -> Recorder {
            self.replies.push((program.to_owned(), subcommand.to_owned(), stdout.to_owned()));
            self
        }

        pub fn fail(mut self, program: &str, subcommand: &str) -> Recorder {
            self.failures.push((program.to_owned(), subcommand.to_owned()));
            self
        }

        /// The rendered command lines, in execution order
        pub fn commands(&self) -> Vec<String> {
            self.invocations.iter().map(ToString::to_string).collect()
        }

        fn matches(invocation: &Invocation, program: &str, subcommand: &str) -> bool {
            invocation.program() == program
                && invocation.arguments().first().map(String::as_str) == Some(subcommand)
        }
    }

    impl Executor for Recorder {
        fn exec(&mut self, invocation: &Invocation) -> Result<String, CommandError> {
            self.invocations.push(invocation.clone());

            if self
                .failures
                .iter()
                .any(|(program, subcommand)| Self::matches(invocation, program, subcommand))
            {
                return Err(CommandError::Failed {
                    command: invocation.display(),
                    status: ExitStatus::from_raw(1 << 8),
                    stderr: String::from("simulated failure"),
                });
            }

            let stdout = self
                .replies
                .iter()
                .find(|(program, subcommand, _)| Self::matches(invocation, program, subcommand))
                .map(|(_, _, stdout)| stdout.clone())
                .unwrap_or_default();
            Ok(stdout)
        }
    }
}
